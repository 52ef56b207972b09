//! # Mapping Promises
//!
//! Map results cross the thread boundary with frame granularity. A client
//! requesting a mapped buffer gets a promise immediately; the render thread
//! fulfills it while draining; the producer harvests every outstanding
//! promise during the next frame swap and runs the callbacks there. Results
//! are never delivered inline from the render thread.

// Mapped regions point into backend arenas that outlive the mapping; the
// slice accessors below are the one place that trust crosses a raw pointer.
#![allow(unsafe_code)]

use std::collections::HashMap;
use std::ptr::NonNull;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::handle::Handle;

/// A window into backend-owned buffer memory.
///
/// Valid from fulfillment until the matching unmap executes; the map/unmap
/// protocol gives the holder exclusive access for that span.
#[derive(Debug)]
pub struct MappedRegion {
    ptr: NonNull<u8>,
    len: usize,
}

// SAFETY: the region is created on the render thread and handed to exactly
// one producer through the promise; the backend arena it points into is
// pinned for the backend's lifetime.
unsafe impl Send for MappedRegion {}

impl MappedRegion {
    /// Wraps a pointer into pinned backend memory.
    #[must_use]
    pub(crate) const fn new(ptr: NonNull<u8>, len: usize) -> Self {
        Self { ptr, len }
    }

    /// Length of the region in bytes.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Whether the region is empty.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The region's bytes.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: the backend keeps the arena alive and the map/unmap
        // protocol guarantees no other writer while the region is out.
        unsafe { core::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    /// The region's bytes, writable.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: as above, and `&mut self` makes this the only view.
        unsafe { core::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

/// Callback run on the producer thread with the fulfilled region.
pub type MapCallback = Box<dyn FnOnce(MappedRegion) + Send + 'static>;

struct PromiseState {
    region: Option<MappedRegion>,
    done: bool,
}

/// One pending map result.
///
/// ## Thread Safety
///
/// `fulfill` runs on the render thread, `harvest` on the producer; a mutex
/// and condvar pair orders the two.
pub struct MappingPromise {
    state: Mutex<PromiseState>,
    fulfilled: Condvar,
    callback: Mutex<Option<MapCallback>>,
}

impl MappingPromise {
    /// Creates a promise holding the callback to run at harvest time.
    #[must_use]
    pub fn new(callback: MapCallback) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(PromiseState {
                region: None,
                done: false,
            }),
            fulfilled: Condvar::new(),
            callback: Mutex::new(Some(callback)),
        })
    }

    /// Delivers the mapped region. Render thread, exactly once.
    ///
    /// # Panics
    ///
    /// Panics if the promise was already fulfilled.
    pub fn fulfill(&self, region: MappedRegion) {
        let mut state = self.state.lock();
        assert!(!state.done, "mapping promise fulfilled twice");
        state.region = Some(region);
        state.done = true;
        drop(state);
        self.fulfilled.notify_all();
    }

    /// Waits for fulfillment, then runs the callback with the region.
    /// Producer thread, during the frame swap.
    pub fn harvest(&self) {
        let mut state = self.state.lock();
        while !state.done {
            self.fulfilled.wait(&mut state);
        }
        let region = state.region.take().expect("fulfilled promise holds a region");
        drop(state);

        let callback = self
            .callback
            .lock()
            .take()
            .expect("promise harvested twice");
        callback(region);
    }
}

/// The outstanding promises of one frame cycle, keyed by buffer handle.
///
/// Bounded: the map payload carries no promise pointer, so the render
/// thread finds the promise here by the envelope's handle.
pub struct PromiseSet {
    map: Mutex<HashMap<Handle, Arc<MappingPromise>>>,
    capacity: usize,
}

impl PromiseSet {
    /// Creates a set admitting at most `capacity` promises per cycle.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            map: Mutex::new(HashMap::with_capacity(capacity)),
            capacity,
        }
    }

    /// Registers a promise for `handle`. Producer side.
    ///
    /// # Panics
    ///
    /// Panics when the cycle's capacity is exceeded or the buffer already
    /// has an outstanding promise (a double map).
    pub fn insert(&self, handle: Handle, promise: Arc<MappingPromise>) {
        let mut map = self.map.lock();
        assert!(
            map.len() < self.capacity,
            "too many map commands in one cycle"
        );
        let previous = map.insert(handle, promise);
        assert!(previous.is_none(), "buffer {handle:?} mapped twice in one cycle");
    }

    /// Looks up the promise for a map envelope. Render thread.
    ///
    /// # Panics
    ///
    /// Panics when no promise exists; a map command always has one.
    #[must_use]
    pub fn get(&self, handle: Handle) -> Arc<MappingPromise> {
        Arc::clone(
            self.map
                .lock()
                .get(&handle)
                .unwrap_or_else(|| panic!("map command without a promise for {handle:?}")),
        )
    }

    /// Waits on every outstanding promise, runs its callback, and removes
    /// it from the set. Producer side, at the frame swap.
    ///
    /// Entries stay in the map until after fulfillment; the render thread
    /// looks promises up by handle while this is waiting on them.
    pub fn harvest_all(&self) {
        let snapshot: Vec<(Handle, Arc<MappingPromise>)> = self
            .map
            .lock()
            .iter()
            .map(|(handle, promise)| (*handle, Arc::clone(promise)))
            .collect();

        for (_, promise) in &snapshot {
            promise.harvest();
        }

        let mut map = self.map.lock();
        for (handle, _) in snapshot {
            map.remove(&handle);
        }
    }

    /// Number of promises waiting in this cycle.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.map.lock().len()
    }
}
