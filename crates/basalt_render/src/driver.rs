//! # Render Driver
//!
//! The client-facing surface of the pipeline and the render thread behind
//! it. Construction spawns the thread, initializes the backend on it, and
//! never lets backend state escape: producers talk exclusively through
//! command envelopes, handle slots, the meta registry and promises.

use std::collections::HashSet;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::backend::{BackendEnvironment, HandleResolver, RenderBackend};
use crate::command::{spec, CommandHeader, CommandKind, MapAccess, RenderMessage};
use crate::config::DriverConfig;
use crate::handle::{Handle, HandleTable, ResourceId, SlotValue};
use crate::promise::{MappedRegion, MappingPromise, PromiseSet};
use crate::queue::CommandQueue;
use crate::resource::{ResourceMeta, ResourceRegistry, ResourceState, ResourceType};

/// Everything both sides of the thread boundary share.
struct DriverShared {
    queue: CommandQueue,
    handles: HandleTable,
    registry: ResourceRegistry,
    promises: PromiseSet,
    startup: Mutex<Option<BackendEnvironment>>,
    started: Condvar,
    last_drain: Mutex<Option<Duration>>,
}

/// Resolves payload handles against the table at execution time.
struct TableResolver<'a> {
    handles: &'a HandleTable,
}

impl HandleResolver for TableResolver<'_> {
    fn resolve(&self, handle: Handle) -> ResourceId {
        match self.handles.get(handle) {
            SlotValue::Resolved(id) => id,
            SlotValue::Pending => panic!("command depends on an unresolved handle {handle:?}"),
            SlotValue::Failed => panic!("command depends on a failed resource {handle:?}"),
        }
    }
}

/// The pipeline front end.
///
/// Cheap operations append envelopes to the active buffer; blocking
/// operations are [`swap_frames`](Self::swap_frames),
/// [`sync`](Self::sync) and [`wait_ready`](Self::wait_ready). All methods
/// take `&self`; the driver can be shared across producer threads.
///
/// # Example
///
/// ```rust,ignore
/// let memory = MemoryContext::new(16, 1 << 20);
/// let driver = RenderDriver::new(DriverConfig::default(), SoftwareBackend::new(memory));
/// driver.wait_ready();
///
/// let buffer = driver.create_buffer(0, 256);
/// driver.swap_frames();
/// assert_eq!(driver.resource_state(buffer), ResourceState::Ready);
/// ```
pub struct RenderDriver {
    shared: Arc<DriverShared>,
    thread: Option<JoinHandle<()>>,
    /// Buffers currently mapped, tracked on the producer side so a double
    /// map or a destroy-while-mapped fails at the call site.
    mapped: Mutex<HashSet<Handle>>,
    /// Handles with a destroy submitted but not yet executed; pruned at
    /// each swap once the slot is retired.
    destroyed: Mutex<HashSet<Handle>>,
}

impl RenderDriver {
    /// Spawns the render thread and hands it the backend.
    #[must_use]
    pub fn new(config: DriverConfig, backend: impl RenderBackend + 'static) -> Self {
        let shared = Arc::new(DriverShared {
            queue: CommandQueue::new(config.command_arena_size),
            handles: HandleTable::new(config.handle_capacity),
            registry: ResourceRegistry::new(),
            promises: PromiseSet::new(config.promise_capacity),
            startup: Mutex::new(None),
            started: Condvar::new(),
            last_drain: Mutex::new(None),
        });

        let thread = {
            let shared = Arc::clone(&shared);
            std::thread::Builder::new()
                .name("basalt-render".to_owned())
                .spawn(move || render_loop(&shared, backend))
                .expect("failed to spawn the render thread")
        };

        Self {
            shared,
            thread: Some(thread),
            mapped: Mutex::new(HashSet::new()),
            destroyed: Mutex::new(HashSet::new()),
        }
    }

    /// Blocks until the backend finished initializing, and returns what it
    /// reported about its environment.
    pub fn wait_ready(&self) -> BackendEnvironment {
        let mut startup = self.shared.startup.lock();
        while startup.is_none() {
            self.shared.started.wait(&mut startup);
        }
        startup.clone().expect("started condvar signaled with environment set")
    }

    /// The backend environment, if initialization already finished.
    #[must_use]
    pub fn environment(&self) -> Option<BackendEnvironment> {
        self.shared.startup.lock().clone()
    }

    /// How long the render thread spent draining the last buffer.
    #[must_use]
    pub fn last_drain_time(&self) -> Option<Duration> {
        *self.shared.last_drain.lock()
    }

    /// Queues a resource creation and returns its handle immediately.
    ///
    /// The handle is stable for the resource's whole lifetime; its slot is
    /// written by the render thread when the creation executes.
    #[must_use]
    pub fn create(&self, ty: ResourceType, payload: &[&[u8]]) -> Handle {
        let handle = self.shared.handles.allocate();
        let len: usize = payload.iter().map(|part| part.len()).sum();
        self.shared
            .queue
            .push(CommandHeader::create(ty, handle, len), payload);
        handle
    }

    /// Queues a data replacement for an existing resource.
    ///
    /// # Panics
    ///
    /// Panics when the resource is already dead or errored; writing into
    /// such a resource is a producer bug.
    pub fn set(&self, handle: Handle, data: &[u8]) {
        let state = self.resource_state(handle);
        assert!(
            !matches!(state, ResourceState::Dead | ResourceState::Error),
            "set on a resource in state {state:?}"
        );
        self.shared
            .queue
            .push(CommandHeader::set(handle, data.len()), &[data]);
    }

    /// Queues a submit message.
    pub fn submit(&self, message: RenderMessage, handle: Handle, payload: &[&[u8]]) {
        let len: usize = payload.iter().map(|part| part.len()).sum();
        self.shared
            .queue
            .push(CommandHeader::submit(message, handle, len), payload);
    }

    /// Queues a destroy for `handle`'s resource.
    ///
    /// # Panics
    ///
    /// Panics on a second destroy of the same handle, on a resource that
    /// is already dead or errored, or while the buffer is still mapped.
    pub fn destroy(&self, handle: Handle) {
        assert!(
            !self.mapped.lock().contains(&handle),
            "destroying a mapped buffer {handle:?}"
        );
        let state = self.resource_state(handle);
        assert!(
            !matches!(state, ResourceState::Dead | ResourceState::Error),
            "destroy of a resource in state {state:?}"
        );
        assert!(
            self.destroyed.lock().insert(handle),
            "resource {handle:?} destroyed twice"
        );
        self.submit(RenderMessage::Destroy, handle, &[]);
    }

    /// Queues a buffer map; `callback` runs on this side during the next
    /// [`swap_frames`](Self::swap_frames) with the mapped region.
    ///
    /// # Panics
    ///
    /// Panics when the buffer is already mapped, or when the frame's
    /// promise capacity is exceeded.
    pub fn map_buffer(
        &self,
        handle: Handle,
        access: MapAccess,
        callback: impl FnOnce(MappedRegion) + Send + 'static,
    ) {
        let state = self.resource_state(handle);
        assert!(
            !matches!(state, ResourceState::Dead | ResourceState::Error),
            "map of a resource in state {state:?}"
        );
        assert!(
            self.mapped.lock().insert(handle),
            "buffer {handle:?} mapped twice"
        );
        self.shared
            .promises
            .insert(handle, MappingPromise::new(Box::new(callback)));

        let desc = spec::MapBufferSpec {
            access: access.code(),
            _pad: 0,
        };
        self.submit(RenderMessage::MapBuffer, handle, &[bytemuck::bytes_of(&desc)]);
    }

    /// Queues a buffer unmap, ending the mapped region's validity.
    ///
    /// # Panics
    ///
    /// Panics when the buffer is not mapped.
    pub fn unmap_buffer(&self, handle: Handle) {
        let state = self.resource_state(handle);
        assert!(
            !matches!(state, ResourceState::Dead | ResourceState::Error),
            "unmap of a resource in state {state:?}"
        );
        assert!(
            self.mapped.lock().remove(&handle),
            "buffer {handle:?} was not mapped"
        );
        self.submit(RenderMessage::UnmapBuffer, handle, &[]);
    }

    /// Flips the frame: queues the active buffer for the render thread,
    /// then harvests every outstanding mapping promise.
    ///
    /// Blocks while the previous frame is still draining (backpressure)
    /// and while promises await fulfillment. Map callbacks run here, on
    /// the calling thread.
    pub fn swap_frames(&self) {
        self.shared.queue.swap();
        self.shared.promises.harvest_all();

        // Executed destroys have retired their slots by now; the state
        // check in `destroy` keeps catching re-destroys of pruned handles.
        self.destroyed
            .lock()
            .retain(|handle| self.shared.handles.try_get(*handle).is_some());
    }

    /// Blocks until the render thread has drained everything queued.
    pub fn sync(&self) {
        self.shared.queue.sync();
    }

    /// The observable lifecycle state behind `handle`.
    ///
    /// A retired slot reads as `Dead`; a failed creation as `Error`; an
    /// unexecuted creation as `Busy`.
    #[must_use]
    pub fn resource_state(&self, handle: Handle) -> ResourceState {
        match self.shared.handles.try_get(handle) {
            None => ResourceState::Dead,
            Some(SlotValue::Pending) => ResourceState::Busy,
            Some(SlotValue::Failed) => ResourceState::Error,
            Some(SlotValue::Resolved(id)) => self
                .shared
                .registry
                .state_of(id)
                .unwrap_or(ResourceState::Dead),
        }
    }

    /// The resolved ID behind `handle`, once its creation executed.
    #[must_use]
    pub fn resource_id(&self, handle: Handle) -> Option<ResourceId> {
        match self.shared.handles.try_get(handle) {
            Some(SlotValue::Resolved(id)) => Some(id),
            _ => None,
        }
    }

    // ---- typed creation and submit helpers ----------------------------

    /// Creates a data buffer of `size` bytes.
    #[must_use]
    pub fn create_buffer(&self, usage: u32, size: u64) -> Handle {
        let desc = spec::CreateBufferSpec {
            size,
            usage,
            _pad: 0,
        };
        self.create(ResourceType::Buffer, &[bytemuck::bytes_of(&desc)])
    }

    /// Creates a shader from vertex and fragment sources.
    #[must_use]
    pub fn create_shader(&self, vertex: &str, fragment: &str) -> Handle {
        let desc = spec::CreateShaderSpec {
            vertex_len: vertex.len() as u32,
            fragment_len: fragment.len() as u32,
        };
        self.create(
            ResourceType::Shader,
            &[bytemuck::bytes_of(&desc), vertex.as_bytes(), fragment.as_bytes()],
        )
    }

    /// Creates a 2D texture with initial pixel data.
    #[must_use]
    pub fn create_texture2d(&self, width: u32, height: u32, format: u32, pixels: &[u8]) -> Handle {
        let desc = spec::CreateTexture2dSpec {
            width,
            height,
            format,
            _pad: 0,
        };
        self.create(
            ResourceType::Texture2d,
            &[bytemuck::bytes_of(&desc), pixels],
        )
    }

    /// Creates a vertex buffer layout.
    #[must_use]
    pub fn create_buffer_layout(&self, entries: &[spec::LayoutEntry]) -> Handle {
        let desc = spec::CreateBufferLayoutSpec {
            entry_count: entries.len() as u32,
            _pad: 0,
        };
        self.create(
            ResourceType::BufferLayout,
            &[bytemuck::bytes_of(&desc), bytemuck::cast_slice(entries)],
        )
    }

    /// Clears the bound render target.
    pub fn clear(&self, flags: u32) {
        let desc = spec::ClearSpec { flags, _pad: 0 };
        self.submit(RenderMessage::Clear, Handle::NONE, &[bytemuck::bytes_of(&desc)]);
    }

    /// Changes the clear color.
    pub fn set_clear_color(&self, color: [f32; 4]) {
        let desc = spec::SetClearColorSpec { color };
        self.submit(
            RenderMessage::SetClearColor,
            Handle::NONE,
            &[bytemuck::bytes_of(&desc)],
        );
    }

    /// Binds `texture` to a sampler slot.
    pub fn bind_texture(&self, slot: u32, texture: Handle) {
        let desc = spec::BindTextureSpec { slot, _pad: 0 };
        self.submit(RenderMessage::BindTexture, texture, &[bytemuck::bytes_of(&desc)]);
    }

    /// Issues an indexed draw with `shader`.
    pub fn draw_indexed(
        &self,
        shader: Handle,
        vertex_buffer: Handle,
        index_buffer: Handle,
        layout: Handle,
        index_count: u32,
        index_width: u32,
    ) {
        let desc = spec::DrawIndexedSpec {
            vertex_buffer,
            index_buffer,
            layout,
            index_count,
            index_width,
        };
        self.submit(RenderMessage::DrawIndexed, shader, &[bytemuck::bytes_of(&desc)]);
    }

    /// Enables or disables a pipeline option.
    pub fn toggle(&self, option: u32, enabled: bool) {
        let desc = spec::ToggleSpec {
            option,
            enabled: u32::from(enabled),
        };
        self.submit(RenderMessage::Toggle, Handle::NONE, &[bytemuck::bytes_of(&desc)]);
    }

    /// Changes the viewport rectangle.
    pub fn set_viewport(&self, x: i32, y: i32, width: u32, height: u32) {
        let desc = spec::SetViewportSpec {
            x,
            y,
            width,
            height,
        };
        self.submit(
            RenderMessage::SetViewport,
            Handle::NONE,
            &[bytemuck::bytes_of(&desc)],
        );
    }
}

impl Drop for RenderDriver {
    /// Flushes whatever was submitted, then shuts the render thread down.
    fn drop(&mut self) {
        if self.shared.queue.pending() > 0 {
            self.swap_frames();
        }
        self.shared.queue.sync();
        self.shared.queue.stop();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Aborts the process if the render thread unwinds. Producers block on
/// condvars only the consumer signals; a dead consumer would leave them
/// waiting forever instead of failing loudly.
struct AbortOnPanic;

impl Drop for AbortOnPanic {
    fn drop(&mut self) {
        if std::thread::panicking() {
            tracing::error!("render thread panicked; aborting");
            std::process::abort();
        }
    }
}

/// The render thread body: init, drain frames until stopped, shut down.
fn render_loop(shared: &DriverShared, mut backend: impl RenderBackend) {
    let _abort = AbortOnPanic;

    let environment = backend.init();
    tracing::info!(
        vendor = %environment.vendor,
        hardware = %environment.hardware,
        version = %environment.version,
        shading = %environment.shading_version,
        "render backend ready"
    );
    {
        let mut startup = shared.startup.lock();
        *startup = Some(environment);
    }
    shared.started.notify_all();

    while let Some(buffer) = shared.queue.next_drain() {
        let start = Instant::now();
        let commands = buffer.len();

        for (header, payload) in buffer.envelopes() {
            execute(shared, &mut backend, header, payload);
        }

        let elapsed = start.elapsed();
        *shared.last_drain.lock() = Some(elapsed);
        tracing::debug!(commands, elapsed_us = elapsed.as_micros() as u64, "frame drained");

        shared.queue.finish_drain(buffer);
    }

    backend.shutdown();
    tracing::info!("render thread stopped");
}

/// Executes one envelope against the backend.
fn execute(
    shared: &DriverShared,
    backend: &mut impl RenderBackend,
    header: CommandHeader,
    payload: &[u8],
) {
    let resolver = TableResolver {
        handles: &shared.handles,
    };

    match CommandKind::decode(&header) {
        CommandKind::Create(ty) => match backend.create_resource(ty, payload) {
            Ok(native) => {
                let id = ResourceId::encode(native, ty);
                shared.handles.resolve(header.handle, id);
                shared.registry.insert(
                    id,
                    ResourceMeta {
                        state: ResourceState::Ready,
                        ty,
                    },
                );
                tracing::trace!(?ty, native, "resource created");
            }
            Err(error) => {
                tracing::error!(?ty, %error, "resource creation failed");
                shared.handles.resolve_failed(header.handle);
            }
        },
        CommandKind::Set => {
            let id = resolver.resolve(header.handle);
            backend.set_resource(id, payload);
        }
        CommandKind::Submit(RenderMessage::Destroy) => {
            let id = resolver.resolve(header.handle);
            backend.destroy_resource(id);
            shared.registry.set_state(id, ResourceState::Dead);
            shared.handles.retire(header.handle);
            tracing::trace!(?id, "resource destroyed");
        }
        CommandKind::Submit(RenderMessage::MapBuffer) => {
            let desc: spec::MapBufferSpec =
                bytemuck::pod_read_unaligned(&payload[..core::mem::size_of::<spec::MapBufferSpec>()]);
            let id = resolver.resolve(header.handle);
            let region = backend.map_buffer(id, MapAccess::from_code(desc.access));
            shared.promises.get(header.handle).fulfill(region);
        }
        CommandKind::Submit(RenderMessage::UnmapBuffer) => {
            let id = resolver.resolve(header.handle);
            backend.unmap_buffer(id);
        }
        CommandKind::Submit(message) => {
            let target = if header.handle.is_none() {
                None
            } else {
                Some(resolver.resolve(header.handle))
            };
            backend.submit(message, target, payload, &resolver);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SoftwareBackend;

    fn driver() -> RenderDriver {
        let config = DriverConfig {
            pool_bin_blocks: 16,
            pool_block_size: 1 << 16,
            ..DriverConfig::default()
        };
        let memory = config.memory_context();
        RenderDriver::new(config, SoftwareBackend::new(memory))
    }

    #[test]
    fn test_wait_ready_reports_environment() {
        let driver = driver();
        let environment = driver.wait_ready();
        assert_eq!(environment.vendor, "basalt");
    }

    #[test]
    fn test_create_resolves_after_swap() {
        let driver = driver();
        let buffer = driver.create_buffer(0, 256);

        assert_eq!(driver.resource_state(buffer), ResourceState::Busy);

        driver.swap_frames();
        driver.sync();
        assert_eq!(driver.resource_state(buffer), ResourceState::Ready);
    }

    #[test]
    fn test_failed_creation_reads_as_error() {
        let driver = driver();
        // Larger than any pool block the test driver owns.
        let buffer = driver.create_buffer(0, 1 << 30);

        driver.swap_frames();
        driver.sync();
        assert_eq!(driver.resource_state(buffer), ResourceState::Error);
    }

    #[test]
    fn test_destroyed_resource_reads_as_dead() {
        let driver = driver();
        let buffer = driver.create_buffer(0, 64);
        driver.swap_frames();
        driver.sync();

        driver.destroy(buffer);
        driver.swap_frames();
        driver.sync();
        assert_eq!(driver.resource_state(buffer), ResourceState::Dead);
    }

    #[test]
    #[should_panic(expected = "destroyed twice")]
    fn test_double_destroy_is_fatal() {
        let driver = driver();
        let buffer = driver.create_buffer(0, 64);
        driver.swap_frames();
        driver.sync();

        driver.destroy(buffer);
        driver.destroy(buffer);
    }

    #[test]
    #[should_panic(expected = "map of a resource in state Error")]
    fn test_map_of_errored_resource_is_fatal() {
        let driver = driver();
        let shader = driver.create_shader("", "void main() {}");
        driver.swap_frames();
        driver.sync();

        driver.map_buffer(shader, MapAccess::Read, |_| {});
    }

    #[test]
    #[should_panic(expected = "destroy of a resource in state Dead")]
    fn test_destroy_after_death_is_fatal() {
        let driver = driver();
        let buffer = driver.create_buffer(0, 64);
        driver.swap_frames();
        driver.sync();

        driver.destroy(buffer);
        driver.swap_frames();
        driver.sync();
        // The next swap prunes the retired handle; the state check still
        // rejects a re-destroy.
        driver.swap_frames();
        driver.sync();

        driver.destroy(buffer);
    }

    #[test]
    fn test_drop_flushes_pending_commands() {
        let config = DriverConfig::default();
        let backend = SoftwareBackend::new(config.memory_context());
        let probe = backend.probe();

        {
            let driver = RenderDriver::new(DriverConfig::default(), backend);
            driver.clear(crate::command::CLEAR_COLOR);
            // Dropped without an explicit swap.
        }

        assert_eq!(probe.clear_count(), 1);
    }
}
