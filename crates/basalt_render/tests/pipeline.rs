//! End-to-end pipeline scenarios: client threads producing into the
//! double-buffered queue, the render thread draining against the software
//! backend, observed through handles, the meta registry and the probe.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use basalt_render::command::{spec, CLEAR_COLOR};
use basalt_render::{
    DriverConfig, MapAccess, RenderDriver, ResourceState, SoftwareBackend, SoftwareProbe,
};

const VERTEX_SRC: &str = "void main() { position(); }";
const FRAGMENT_SRC: &str = "void main() { color(); }";

fn fixture() -> (RenderDriver, SoftwareProbe) {
    let config = DriverConfig {
        pool_bin_blocks: 64,
        pool_block_size: 4096,
        ..DriverConfig::default()
    };
    let backend = SoftwareBackend::new(config.memory_context());
    let probe = backend.probe();
    (RenderDriver::new(config, backend), probe)
}

#[test]
fn test_create_set_draw_in_one_frame() {
    let (driver, probe) = fixture();
    driver.wait_ready();

    // Everything below lands in the same buffer; the draw references
    // resources whose creations execute earlier in the same drain.
    let vertices = driver.create_buffer(0, 256);
    let indices = driver.create_buffer(1, 64);
    let layout = driver.create_buffer_layout(&[
        spec::LayoutEntry {
            location: 0,
            components: 3,
        },
        spec::LayoutEntry {
            location: 1,
            components: 2,
        },
    ]);
    let shader = driver.create_shader(VERTEX_SRC, FRAGMENT_SRC);

    driver.set(vertices, &[1u8; 128]);
    driver.draw_indexed(shader, vertices, indices, layout, 6, 4);

    driver.swap_frames();
    driver.sync();

    for handle in [vertices, indices, layout, shader] {
        assert_eq!(driver.resource_state(handle), ResourceState::Ready);
    }

    let draws = probe.draws();
    assert_eq!(draws.len(), 1);
    assert_eq!(draws[0].index_count, 6);
    assert_eq!(draws[0].index_width, 4);
    assert_eq!(draws[0].shader, driver.resource_id(shader).unwrap());
    assert_eq!(draws[0].vertex_buffer, driver.resource_id(vertices).unwrap());
}

#[test]
fn test_execution_order_matches_submission_order() {
    let (driver, probe) = fixture();

    let vertices = driver.create_buffer(0, 64);
    let indices = driver.create_buffer(1, 64);
    let layout = driver.create_buffer_layout(&[spec::LayoutEntry {
        location: 0,
        components: 3,
    }]);
    let shader = driver.create_shader(VERTEX_SRC, FRAGMENT_SRC);
    driver.swap_frames();
    driver.sync();

    for count in 1..=32u32 {
        driver.draw_indexed(shader, vertices, indices, layout, count, 4);
    }
    driver.swap_frames();
    driver.sync();

    let counts: Vec<u32> = probe.draws().iter().map(|draw| draw.index_count).collect();
    assert_eq!(counts, (1..=32).collect::<Vec<u32>>());
}

#[test]
fn test_map_callback_runs_during_swap() {
    let (driver, _probe) = fixture();

    let buffer = driver.create_buffer(0, 16);
    driver.swap_frames();
    driver.sync();

    let wrote = Arc::new(AtomicBool::new(false));
    driver.map_buffer(buffer, MapAccess::Write, {
        let wrote = Arc::clone(&wrote);
        move |mut region| {
            region.as_mut_slice().copy_from_slice(&[0xAB; 16]);
            wrote.store(true, Ordering::SeqCst);
        }
    });

    assert!(!wrote.load(Ordering::SeqCst), "results are never delivered inline");
    driver.swap_frames();
    assert!(wrote.load(Ordering::SeqCst), "promise resolved before swap returned");

    driver.unmap_buffer(buffer);
    driver.swap_frames();
    driver.sync();

    // A second mapping observes the bytes the first one wrote.
    let verified = Arc::new(AtomicBool::new(false));
    driver.map_buffer(buffer, MapAccess::Read, {
        let verified = Arc::clone(&verified);
        move |region| {
            assert_eq!(region.as_slice(), &[0xAB; 16]);
            verified.store(true, Ordering::SeqCst);
        }
    });
    driver.swap_frames();
    assert!(verified.load(Ordering::SeqCst));
    driver.unmap_buffer(buffer);
}

#[test]
fn test_two_producers_create_unique_resources() {
    let (driver, _probe) = fixture();
    let driver = Arc::new(driver);

    let mut workers = Vec::new();
    for _ in 0..2 {
        let driver = Arc::clone(&driver);
        workers.push(thread::spawn(move || {
            (0..1000).map(|_| driver.create_buffer(0, 64)).collect::<Vec<_>>()
        }));
    }

    let mut handles = Vec::new();
    for worker in workers {
        handles.extend(worker.join().unwrap());
    }

    driver.swap_frames();
    driver.sync();

    let mut ids = std::collections::HashSet::new();
    for handle in &handles {
        assert_eq!(driver.resource_state(*handle), ResourceState::Ready);
        let id = driver.resource_id(*handle).unwrap();
        assert!(ids.insert(id), "resource id handed out twice: {id:?}");
    }
    assert_eq!(ids.len(), 2000);
}

#[test]
fn test_many_frames_with_backpressure() {
    let (driver, probe) = fixture();

    for _ in 0..20 {
        driver.clear(CLEAR_COLOR);
        driver.swap_frames();
    }
    driver.sync();

    assert_eq!(probe.clear_count(), 20);
    assert!(driver.last_drain_time().is_some());
}

#[test]
fn test_pipeline_state_submits() {
    let (driver, probe) = fixture();

    let texture = driver.create_texture2d(2, 2, 0, &[0u8; 16]);
    driver.bind_texture(0, texture);
    driver.set_clear_color([0.0, 0.5, 1.0, 1.0]);
    driver.set_viewport(0, 0, 640, 480);
    driver.toggle(1, true);

    driver.swap_frames();
    driver.sync();

    assert_eq!(driver.resource_state(texture), ResourceState::Ready);
    assert_eq!(probe.clear_color(), [0.0, 0.5, 1.0, 1.0]);
    assert_eq!(probe.viewport(), (0, 0, 640, 480));
}

#[test]
fn test_failed_shader_reads_as_error() {
    let (driver, _probe) = fixture();

    let shader = driver.create_shader("", FRAGMENT_SRC);
    driver.swap_frames();
    driver.sync();

    assert_eq!(driver.resource_state(shader), ResourceState::Error);
}

#[test]
#[should_panic(expected = "set on a resource in state Error")]
fn test_set_on_errored_resource_is_fatal() {
    let (driver, _probe) = fixture();

    let shader = driver.create_shader("", FRAGMENT_SRC);
    driver.swap_frames();
    driver.sync();

    driver.set(shader, &[0u8; 4]);
}

#[test]
#[should_panic(expected = "mapped twice")]
fn test_double_map_is_fatal() {
    let (driver, _probe) = fixture();

    let buffer = driver.create_buffer(0, 16);
    driver.swap_frames();
    driver.sync();

    driver.map_buffer(buffer, MapAccess::Read, |_| {});
    driver.map_buffer(buffer, MapAccess::Read, |_| {});
}
