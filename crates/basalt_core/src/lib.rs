//! # BASALT Core
//!
//! Pre-allocated command memory for the render pipeline:
//! - Fixed-block allocation for resource handle slots
//! - Free-list arenas for variable-size command payloads
//! - A growing pool-of-pools for storage with unpredictable volume
//!
//! ## Architecture Rules
//!
//! 1. **Allocate once, up front** - arenas never reallocate or move
//! 2. **Offsets, not pointers** - free lists are index-based over one slice
//! 3. **Zeroed memory** - every allocation hands back cleared bytes

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![deny(clippy::perf)]

pub mod memory;

pub use memory::{
    BlockAllocator, FitMode, FreeListAllocator, GrowingPool, MemoryContext, PoolSlot,
    FREE_NODE_SIZE,
};
