//! # Backend Executor Contract
//!
//! The render thread is the only thread that ever calls into a
//! [`RenderBackend`]. The trait is the seam where the command pipeline ends
//! and the native translation layer begins; [`SoftwareBackend`] is the
//! in-memory reference implementation used by tests and headless runs.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use basalt_core::{MemoryContext, PoolSlot};
use parking_lot::Mutex;
use thiserror::Error;

use crate::command::{spec, MapAccess, RenderMessage};
use crate::handle::{Handle, ResourceId};
use crate::promise::MappedRegion;
use crate::resource::ResourceType;

/// What a backend reports about itself at init time.
#[derive(Clone, Debug)]
pub struct BackendEnvironment {
    /// Vendor string.
    pub vendor: String,
    /// Hardware (or renderer) string.
    pub hardware: String,
    /// API version string.
    pub version: String,
    /// Shading language version string.
    pub shading_version: String,
}

/// Errors a backend can report without taking the pipeline down.
///
/// Everything else a backend could do wrong (unknown IDs, protocol misuse)
/// is a fatal assertion, matching the pipeline's fail-fast design.
#[derive(Debug, Error)]
pub enum BackendError {
    /// Resource creation failed for a backend-specific reason.
    #[error("{ty:?} creation failed: {reason}")]
    CreationFailed {
        /// Type that was being created.
        ty: ResourceType,
        /// Backend-specific description.
        reason: String,
    },
    /// A shader did not compile.
    #[error("shader compilation failed: {0}")]
    ShaderCompilation(String),
}

/// Resolves payload-embedded handles to IDs at execution time.
///
/// Implemented by the render loop over the handle table; handed to
/// [`RenderBackend::submit`] so payloads can reference resources created
/// earlier in the same buffer.
pub trait HandleResolver {
    /// The resolved ID behind `handle`.
    ///
    /// # Panics
    ///
    /// Panics when the handle is unresolved, failed, or stale; a command
    /// depending on such a handle is a fatal protocol violation.
    fn resolve(&self, handle: Handle) -> ResourceId;
}

/// The native translation layer, driven exclusively by the render thread.
pub trait RenderBackend: Send {
    /// One-time setup; reports the environment the backend runs against.
    fn init(&mut self) -> BackendEnvironment;

    /// Creates a resource and returns its backend-native ID.
    ///
    /// Native IDs are never reused, and must stay below the per-type
    /// partition width.
    fn create_resource(&mut self, ty: ResourceType, payload: &[u8])
        -> Result<u64, BackendError>;

    /// Replaces the data of an existing resource.
    fn set_resource(&mut self, id: ResourceId, data: &[u8]);

    /// Executes a submit message. `target` is the envelope's resolved
    /// handle, when it has one; handles inside `payload` go through the
    /// resolver.
    fn submit(
        &mut self,
        message: RenderMessage,
        target: Option<ResourceId>,
        payload: &[u8],
        resolver: &dyn HandleResolver,
    );

    /// Maps a buffer for direct access.
    fn map_buffer(&mut self, id: ResourceId, access: MapAccess) -> MappedRegion;

    /// Unmaps a previously mapped buffer.
    fn unmap_buffer(&mut self, id: ResourceId);

    /// Destroys a resource; its native ID is retired forever.
    fn destroy_resource(&mut self, id: ResourceId);

    /// Tears the backend down at the end of the render thread.
    fn shutdown(&mut self);
}

/// One indexed draw as the software backend recorded it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DrawCall {
    /// Shader the draw ran with.
    pub shader: ResourceId,
    /// Vertex buffer the draw sourced.
    pub vertex_buffer: ResourceId,
    /// Index buffer the draw sourced.
    pub index_buffer: ResourceId,
    /// Layout describing the vertex buffer.
    pub layout: ResourceId,
    /// Number of indices drawn.
    pub index_count: u32,
    /// Index element width in bytes (2 or 4).
    pub index_width: u32,
}

#[derive(Default)]
struct ProbeInner {
    draws: Vec<DrawCall>,
    clear_count: usize,
    clear_color: [f32; 4],
    viewport: (i32, i32, u32, u32),
}

/// A test-side window into a [`SoftwareBackend`] that has moved onto the
/// render thread.
#[derive(Clone, Default)]
pub struct SoftwareProbe {
    inner: Arc<Mutex<ProbeInner>>,
}

impl SoftwareProbe {
    /// All draws recorded so far, in execution order.
    #[must_use]
    pub fn draws(&self) -> Vec<DrawCall> {
        self.inner.lock().draws.clone()
    }

    /// Number of clears executed so far.
    #[must_use]
    pub fn clear_count(&self) -> usize {
        self.inner.lock().clear_count
    }

    /// The last clear color set.
    #[must_use]
    pub fn clear_color(&self) -> [f32; 4] {
        self.inner.lock().clear_color
    }

    /// The last viewport set.
    #[must_use]
    pub fn viewport(&self) -> (i32, i32, u32, u32) {
        self.inner.lock().viewport
    }
}

struct BufferRecord {
    slot: PoolSlot,
    size: usize,
}

struct ShaderRecord {
    vertex: String,
    fragment: String,
}

/// An in-memory backend: buffers live in the shared pool, draws are
/// recorded instead of rasterized.
///
/// ## Thread Safety
///
/// Owned and driven by the render thread like any backend; only the probe
/// is shared.
pub struct SoftwareBackend {
    memory: Arc<MemoryContext>,
    probe: SoftwareProbe,
    /// Next native ID per resource type; never reused.
    next_id: [u64; 4],
    buffers: HashMap<u64, BufferRecord>,
    textures: HashMap<u64, spec::CreateTexture2dSpec>,
    shaders: HashMap<u64, ShaderRecord>,
    layouts: HashMap<u64, Vec<spec::LayoutEntry>>,
    bound_textures: HashMap<u32, ResourceId>,
    toggles: HashMap<u32, bool>,
    mapped: HashSet<u64>,
}

impl SoftwareBackend {
    /// Creates a backend whose buffer bytes live in `memory`'s pool.
    #[must_use]
    pub fn new(memory: Arc<MemoryContext>) -> Self {
        Self {
            memory,
            probe: SoftwareProbe::default(),
            next_id: [0; 4],
            buffers: HashMap::new(),
            textures: HashMap::new(),
            shaders: HashMap::new(),
            layouts: HashMap::new(),
            bound_textures: HashMap::new(),
            toggles: HashMap::new(),
            mapped: HashSet::new(),
        }
    }

    /// A probe observing this backend's recorded output.
    #[must_use]
    pub fn probe(&self) -> SoftwareProbe {
        self.probe.clone()
    }

    /// The sources a shader was compiled from, if it exists.
    #[must_use]
    pub fn shader_source(&self, id: ResourceId) -> Option<(&str, &str)> {
        let native = id.decode(ResourceType::Shader);
        self.shaders
            .get(&native)
            .map(|record| (record.vertex.as_str(), record.fragment.as_str()))
    }

    fn take_id(&mut self, ty: ResourceType) -> u64 {
        let slot = &mut self.next_id[ty.code() as usize];
        let id = *slot;
        *slot += 1;
        id
    }

    fn buffer(&self, id: ResourceId) -> &BufferRecord {
        let native = id.decode(ResourceType::Buffer);
        self.buffers
            .get(&native)
            .unwrap_or_else(|| panic!("unknown buffer {native}"))
    }

    fn create_buffer(&mut self, payload: &[u8]) -> Result<u64, BackendError> {
        let desc: spec::CreateBufferSpec = read_spec(payload);
        let size = desc.size as usize;

        let slot = self.memory.pool().allocate(size).ok_or_else(|| {
            BackendError::CreationFailed {
                ty: ResourceType::Buffer,
                reason: format!(
                    "buffer of {size} bytes exceeds the pool block size {}",
                    self.memory.pool().block_size()
                ),
            }
        })?;

        let id = self.take_id(ResourceType::Buffer);
        self.buffers.insert(id, BufferRecord { slot, size });
        Ok(id)
    }

    fn create_shader(&mut self, payload: &[u8]) -> Result<u64, BackendError> {
        let desc: spec::CreateShaderSpec = read_spec(payload);
        let sources = &payload[core::mem::size_of::<spec::CreateShaderSpec>()..];
        let (vertex_bytes, fragment_bytes) = sources.split_at(desc.vertex_len as usize);

        let vertex = compile_stage("vertex", vertex_bytes)?;
        let fragment = compile_stage("fragment", fragment_bytes)?;

        let id = self.take_id(ResourceType::Shader);
        self.shaders.insert(id, ShaderRecord { vertex, fragment });
        Ok(id)
    }
}

fn read_spec<T: bytemuck::Pod>(payload: &[u8]) -> T {
    bytemuck::pod_read_unaligned(&payload[..core::mem::size_of::<T>()])
}

fn compile_stage(stage: &str, source: &[u8]) -> Result<String, BackendError> {
    let text = core::str::from_utf8(source)
        .map_err(|_| BackendError::ShaderCompilation(format!("{stage} source is not UTF-8")))?;
    if text.trim().is_empty() {
        return Err(BackendError::ShaderCompilation(format!(
            "{stage} source is empty"
        )));
    }
    Ok(text.to_owned())
}

impl RenderBackend for SoftwareBackend {
    fn init(&mut self) -> BackendEnvironment {
        BackendEnvironment {
            vendor: "basalt".to_owned(),
            hardware: "software reference".to_owned(),
            version: "1.0".to_owned(),
            shading_version: "1.0".to_owned(),
        }
    }

    fn create_resource(
        &mut self,
        ty: ResourceType,
        payload: &[u8],
    ) -> Result<u64, BackendError> {
        match ty {
            ResourceType::Buffer => self.create_buffer(payload),
            ResourceType::Shader => self.create_shader(payload),
            ResourceType::Texture2d => {
                let desc: spec::CreateTexture2dSpec = read_spec(payload);
                let id = self.take_id(ResourceType::Texture2d);
                self.textures.insert(id, desc);
                Ok(id)
            }
            ResourceType::BufferLayout => {
                let desc: spec::CreateBufferLayoutSpec = read_spec(payload);
                let tail = &payload[core::mem::size_of::<spec::CreateBufferLayoutSpec>()..];
                let entries: Vec<spec::LayoutEntry> = (0..desc.entry_count as usize)
                    .map(|i| {
                        let start = i * core::mem::size_of::<spec::LayoutEntry>();
                        read_spec(&tail[start..])
                    })
                    .collect();
                let id = self.take_id(ResourceType::BufferLayout);
                self.layouts.insert(id, entries);
                Ok(id)
            }
        }
    }

    fn set_resource(&mut self, id: ResourceId, data: &[u8]) {
        let record = self.buffer(id);
        assert!(data.len() <= record.size, "set exceeds buffer size");
        let slot = record.slot;
        self.memory.pool().write(slot, data);
    }

    fn submit(
        &mut self,
        message: RenderMessage,
        target: Option<ResourceId>,
        payload: &[u8],
        resolver: &dyn HandleResolver,
    ) {
        match message {
            RenderMessage::Clear => {
                let _desc: spec::ClearSpec = read_spec(payload);
                self.probe.inner.lock().clear_count += 1;
            }
            RenderMessage::SetClearColor => {
                let desc: spec::SetClearColorSpec = read_spec(payload);
                self.probe.inner.lock().clear_color = desc.color;
            }
            RenderMessage::BindTexture => {
                let desc: spec::BindTextureSpec = read_spec(payload);
                let texture = target.expect("bind-texture names a texture");
                let native = texture.decode(ResourceType::Texture2d);
                assert!(self.textures.contains_key(&native), "unknown texture {native}");
                self.bound_textures.insert(desc.slot, texture);
            }
            RenderMessage::DrawIndexed => {
                let desc: spec::DrawIndexedSpec = read_spec(payload);
                let shader = target.expect("draw names a shader");

                let call = DrawCall {
                    shader,
                    vertex_buffer: resolver.resolve(desc.vertex_buffer),
                    index_buffer: resolver.resolve(desc.index_buffer),
                    layout: resolver.resolve(desc.layout),
                    index_count: desc.index_count,
                    index_width: desc.index_width,
                };
                assert!(
                    self.shaders.contains_key(&call.shader.decode(ResourceType::Shader)),
                    "draw with unknown shader"
                );
                let _ = self.buffer(call.vertex_buffer);
                let _ = self.buffer(call.index_buffer);

                self.probe.inner.lock().draws.push(call);
            }
            RenderMessage::Toggle => {
                let desc: spec::ToggleSpec = read_spec(payload);
                self.toggles.insert(desc.option, desc.enabled != 0);
            }
            RenderMessage::SetViewport => {
                let desc: spec::SetViewportSpec = read_spec(payload);
                self.probe.inner.lock().viewport =
                    (desc.x, desc.y, desc.width, desc.height);
            }
            RenderMessage::Destroy | RenderMessage::MapBuffer | RenderMessage::UnmapBuffer => {
                unreachable!("lifecycle messages are dispatched to dedicated backend calls")
            }
        }
    }

    fn map_buffer(&mut self, id: ResourceId, _access: MapAccess) -> MappedRegion {
        let native = id.decode(ResourceType::Buffer);
        assert!(self.mapped.insert(native), "buffer {native} mapped twice");

        let record = self
            .buffers
            .get(&native)
            .unwrap_or_else(|| panic!("unknown buffer {native}"));
        let ptr = self.memory.pool().slot_ptr(record.slot, record.size);
        MappedRegion::new(ptr, record.size)
    }

    fn unmap_buffer(&mut self, id: ResourceId) {
        let native = id.decode(ResourceType::Buffer);
        assert!(self.mapped.remove(&native), "buffer {native} was not mapped");
    }

    fn destroy_resource(&mut self, id: ResourceId) {
        // The partition an ID sits in names its type.
        let ty = ResourceType::from_code((id.raw() / crate::handle::PARTITION_WIDTH) as u16);
        let native = id.decode(ty);

        match ty {
            ResourceType::Buffer => {
                assert!(!self.mapped.contains(&native), "destroying a mapped buffer");
                let record = self
                    .buffers
                    .remove(&native)
                    .unwrap_or_else(|| panic!("destroy of unknown buffer {native}"));
                self.memory.pool().deallocate(record.slot, record.size);
            }
            ResourceType::Texture2d => {
                assert!(
                    self.textures.remove(&native).is_some(),
                    "destroy of unknown texture {native}"
                );
            }
            ResourceType::Shader => {
                assert!(
                    self.shaders.remove(&native).is_some(),
                    "destroy of unknown shader {native}"
                );
            }
            ResourceType::BufferLayout => {
                assert!(
                    self.layouts.remove(&native).is_some(),
                    "destroy of unknown layout {native}"
                );
            }
        }
    }

    fn shutdown(&mut self) {
        for record in self.buffers.values() {
            self.memory.pool().deallocate(record.slot, record.size);
        }
        self.buffers.clear();
        self.textures.clear();
        self.shaders.clear();
        self.layouts.clear();
    }
}
