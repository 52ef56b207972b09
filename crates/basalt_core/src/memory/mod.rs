//! # Memory Management
//!
//! The allocators that back the command pipeline.
//!
//! ## Design Philosophy
//!
//! All memory is reserved when a queue is built. While frames are in flight:
//! - Handle slots come from a fixed-block allocator (O(1), deterministic)
//! - Command envelopes come from per-buffer free-list arenas
//! - Unpredictable-volume storage comes from a growing, thread-safe pool
//!
//! Exhausting a bounded arena is a fatal condition at the call sites that
//! own them; the allocators themselves report failure by returning `None`.

mod block;
mod free_list;
mod growing;

pub use block::BlockAllocator;
pub use free_list::{FitMode, FreeListAllocator, FREE_NODE_SIZE};
pub use growing::{GrowingPool, PoolSlot};

use std::sync::Arc;

/// An explicitly constructed allocator context.
///
/// Replaces what would otherwise be process-global allocator state so that
/// multiple independent queues can coexist and tests stay deterministic.
/// Cheap to clone through [`Arc`]; owns the shared [`GrowingPool`].
pub struct MemoryContext {
    pool: GrowingPool,
}

impl MemoryContext {
    /// Creates a context whose pool grows in bins of `bin_blocks` blocks of
    /// `block_size` bytes each.
    #[must_use]
    pub fn new(bin_blocks: usize, block_size: usize) -> Arc<Self> {
        Arc::new(Self {
            pool: GrowingPool::new(bin_blocks, block_size),
        })
    }

    /// The shared pool for unpredictable-volume storage.
    #[inline]
    #[must_use]
    pub fn pool(&self) -> &GrowingPool {
        &self.pool
    }
}
