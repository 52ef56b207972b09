//! # Resource Model
//!
//! Resource types, lifecycle states and the shared meta registry. The
//! registry is the only structure written by the render thread and read by
//! producers, so it sits behind a single mutex.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::handle::ResourceId;

/// Kind of backend-owned resource a handle refers to.
#[repr(u16)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceType {
    /// A data buffer (vertex, index, uniform).
    Buffer = 0,
    /// A two-dimensional texture.
    Texture2d = 1,
    /// A compiled shader program.
    Shader = 2,
    /// A vertex buffer layout description.
    BufferLayout = 3,
}

/// Number of resource types; sizes the per-type ID partitions.
pub const RESOURCE_TYPE_COUNT: u64 = 4;

impl ResourceType {
    /// Wire code for command headers.
    #[inline]
    #[must_use]
    pub const fn code(self) -> u16 {
        self as u16
    }

    /// Decodes a wire code.
    ///
    /// # Panics
    ///
    /// Panics on an unknown code: a corrupt command stream has already
    /// desynchronized handle state, so continuing is not an option.
    #[must_use]
    pub fn from_code(code: u16) -> Self {
        match code {
            0 => Self::Buffer,
            1 => Self::Texture2d,
            2 => Self::Shader,
            3 => Self::BufferLayout,
            other => panic!("unknown resource type code {other}"),
        }
    }
}

/// Lifecycle state of one resource, as observed through its meta entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResourceState {
    /// Creation has been submitted but not yet executed.
    Busy,
    /// The backend resource exists and is usable.
    Ready,
    /// Backend creation (or a later mutation) failed; terminal.
    Error,
    /// The resource was destroyed; terminal.
    Dead,
}

/// Per-resource record kept by the registry.
#[derive(Clone, Copy, Debug)]
pub struct ResourceMeta {
    /// Current lifecycle state.
    pub state: ResourceState,
    /// The resource's type.
    pub ty: ResourceType,
}

/// Thread-safe map of [`ResourceId`] to [`ResourceMeta`].
///
/// Mutated only by the render thread; read under the lock by any thread
/// that must validate a handle before depending on it.
#[derive(Default)]
pub struct ResourceRegistry {
    map: Mutex<HashMap<ResourceId, ResourceMeta>>,
}

impl ResourceRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a freshly created resource. Render thread only.
    ///
    /// # Panics
    ///
    /// Panics if the ID is already registered: the partition scheme never
    /// reuses native IDs, so a collision means the backend broke that
    /// contract.
    pub fn insert(&self, id: ResourceId, meta: ResourceMeta) {
        let previous = self.map.lock().insert(id, meta);
        assert!(previous.is_none(), "resource id registered twice: {id:?}");
    }

    /// Updates the state of a known resource. Render thread only.
    ///
    /// # Panics
    ///
    /// Panics if the ID is unknown.
    pub fn set_state(&self, id: ResourceId, state: ResourceState) {
        let mut map = self.map.lock();
        let meta = map
            .get_mut(&id)
            .unwrap_or_else(|| panic!("state change for unknown resource {id:?}"));
        meta.state = state;
    }

    /// The state recorded for `id`, if any.
    #[must_use]
    pub fn state_of(&self, id: ResourceId) -> Option<ResourceState> {
        self.map.lock().get(&id).map(|meta| meta.state)
    }

    /// The full meta record for `id`, if any.
    #[must_use]
    pub fn get(&self, id: ResourceId) -> Option<ResourceMeta> {
        self.map.lock().get(&id).copied()
    }

    /// Number of registered resources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.lock().len()
    }

    /// Whether the registry holds no resources.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.lock().is_empty()
    }
}
