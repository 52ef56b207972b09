//! # Growing Pool
//!
//! A thread-safe pool-of-pools: an expanding set of fixed-block bins.
//! Allocation locks one bin at a time; a new bin is created under the
//! growth lock only when every existing bin is exhausted. Nothing ever
//! takes an arena-wide lock on the hot path.
//!
//! ## Safety Note
//!
//! [`GrowingPool::slot_ptr`] hands out a raw pointer into a bin's arena for
//! mapped-region style access. The single unsafe block is documented below.

#![allow(unsafe_code)]

use std::ptr::NonNull;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use super::block::BlockAllocator;

/// Address of one allocation inside a [`GrowingPool`]: which bin, and the
/// byte offset inside that bin's arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PoolSlot {
    /// Index of the owning bin.
    pub bin: u32,
    /// Byte offset inside the bin's arena.
    pub offset: u32,
}

/// A dynamically growing set of fixed-block allocators.
///
/// Used where allocation volume is unpredictable: callers must not block on
/// one global lock for long, so contention is confined to a single bin (or,
/// rarely, the growth lock while a new bin is pushed).
///
/// # Thread Safety
///
/// All methods take `&self` and are safe to call from any thread.
pub struct GrowingPool {
    bin_blocks: usize,
    block_size: usize,
    /// Bins are `Arc`ed so their arenas stay pinned while the vector grows.
    bins: RwLock<Vec<Arc<Mutex<BlockAllocator>>>>,
}

impl GrowingPool {
    /// Creates a pool that grows in bins of `bin_blocks` blocks of
    /// `block_size` bytes. One bin is created eagerly.
    #[must_use]
    pub fn new(bin_blocks: usize, block_size: usize) -> Self {
        assert!(bin_blocks > 0, "bins must hold at least one block");
        let first = Arc::new(Mutex::new(BlockAllocator::new(
            bin_blocks * block_size,
            block_size,
        )));
        Self {
            bin_blocks,
            block_size,
            bins: RwLock::new(vec![first]),
        }
    }

    /// Size of one block in bytes.
    #[inline]
    #[must_use]
    pub const fn block_size(&self) -> usize {
        self.block_size
    }

    /// Number of bins currently live.
    #[must_use]
    pub fn bin_count(&self) -> usize {
        self.bins.read().len()
    }

    /// Allocates `size` bytes from the first bin with room, growing the
    /// pool when all bins are full. The region is zeroed.
    ///
    /// Returns `None` only when `size` exceeds the block size.
    pub fn allocate(&self, size: usize) -> Option<PoolSlot> {
        if size == 0 || size > self.block_size {
            return None;
        }

        let known = {
            let bins = self.bins.read();
            for (index, bin) in bins.iter().enumerate() {
                if let Some(offset) = bin.lock().allocate(size) {
                    return Some(PoolSlot {
                        bin: index as u32,
                        offset: offset as u32,
                    });
                }
            }
            bins.len()
        };

        // Every bin we saw was full; take the growth lock. Another thread
        // may have grown the pool in the window, so retry new bins first.
        let mut bins = self.bins.write();
        for (index, bin) in bins.iter().enumerate().skip(known) {
            if let Some(offset) = bin.lock().allocate(size) {
                return Some(PoolSlot {
                    bin: index as u32,
                    offset: offset as u32,
                });
            }
        }

        let mut fresh = BlockAllocator::new(self.bin_blocks * self.block_size, self.block_size);
        let offset = fresh
            .allocate(size)
            .expect("freshly created bin rejected allocation");
        let slot = PoolSlot {
            bin: bins.len() as u32,
            offset: offset as u32,
        };
        bins.push(Arc::new(Mutex::new(fresh)));
        Some(slot)
    }

    /// Returns a slot to its bin.
    ///
    /// # Panics
    ///
    /// Panics if the slot does not name a live bin.
    pub fn deallocate(&self, slot: PoolSlot, size: usize) {
        let bin = self.bin(slot);
        bin.lock().deallocate(slot.offset as usize, size);
    }

    /// Whether `slot` names memory owned by this pool.
    #[must_use]
    pub fn contains(&self, slot: PoolSlot) -> bool {
        let bins = self.bins.read();
        bins.get(slot.bin as usize)
            .is_some_and(|bin| bin.lock().contains(slot.offset as usize))
    }

    /// Copies `bytes` into a slot's block.
    ///
    /// # Panics
    ///
    /// Panics if `bytes` does not fit in one block.
    pub fn write(&self, slot: PoolSlot, bytes: &[u8]) {
        assert!(bytes.len() <= self.block_size, "write exceeds block size");
        let bin = self.bin(slot);
        bin.lock().write(slot.offset as usize, bytes);
    }

    /// Calls `f` with a read-only view of `len` bytes of a slot's block.
    pub fn with_slice<R>(&self, slot: PoolSlot, len: usize, f: impl FnOnce(&[u8]) -> R) -> R {
        assert!(len <= self.block_size, "read exceeds block size");
        let bin = self.bin(slot);
        let guard = bin.lock();
        f(guard.read(slot.offset as usize, len))
    }

    /// Raw pointer to a slot's storage, for mapped-region access that must
    /// outlive any lock guard.
    ///
    /// The pointer stays valid for the pool's lifetime: bins are never
    /// dropped and their arenas never move. The caller is responsible for
    /// exclusivity — the map/unmap protocol guarantees a mapped block is
    /// touched by exactly one thread at a time.
    #[must_use]
    pub fn slot_ptr(&self, slot: PoolSlot, len: usize) -> NonNull<u8> {
        assert!(
            slot.offset as usize + len <= self.bin_blocks * self.block_size,
            "region crosses bin arena"
        );
        let bin = self.bin(slot);
        let mut guard = bin.lock();
        let slice = guard.slice_mut(slot.offset as usize, len);
        // SAFETY: the arena is a pinned Box<[u8]> inside an Arc'ed bin that
        // is never freed while the pool lives; converting the slice to a
        // pointer that outlives the guard is sound as long as the caller
        // upholds the exclusivity contract above.
        unsafe { NonNull::new_unchecked(slice.as_mut_ptr()) }
    }

    fn bin(&self, slot: PoolSlot) -> Arc<Mutex<BlockAllocator>> {
        let bins = self.bins.read();
        bins.get(slot.bin as usize)
            .unwrap_or_else(|| panic!("pool slot names unknown bin {}", slot.bin))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::thread;

    #[test]
    fn test_grows_when_bins_fill() {
        let pool = GrowingPool::new(2, 64);
        assert_eq!(pool.bin_count(), 1);

        let a = pool.allocate(64).unwrap();
        let b = pool.allocate(64).unwrap();
        let c = pool.allocate(64).unwrap();

        assert_eq!(pool.bin_count(), 2);
        assert_eq!(a.bin, 0);
        assert_eq!(b.bin, 0);
        assert_eq!(c.bin, 1);
    }

    #[test]
    fn test_oversized_request_fails() {
        let pool = GrowingPool::new(4, 64);
        assert!(pool.allocate(65).is_none());
    }

    #[test]
    fn test_freed_slots_are_reused_before_growth() {
        let pool = GrowingPool::new(1, 32);
        let a = pool.allocate(32).unwrap();
        pool.deallocate(a, 32);

        let b = pool.allocate(32).unwrap();
        assert_eq!(a, b);
        assert_eq!(pool.bin_count(), 1);
    }

    #[test]
    fn test_write_then_read_roundtrip() {
        let pool = GrowingPool::new(4, 16);
        let slot = pool.allocate(16).unwrap();
        pool.write(slot, &[3u8; 16]);
        pool.with_slice(slot, 16, |bytes| assert_eq!(bytes, &[3u8; 16]));
    }

    #[test]
    fn test_concurrent_allocation_yields_disjoint_slots() {
        let pool = std::sync::Arc::new(GrowingPool::new(8, 64));
        let mut joins = Vec::new();

        for _ in 0..4 {
            let pool = std::sync::Arc::clone(&pool);
            joins.push(thread::spawn(move || {
                (0..250)
                    .map(|_| pool.allocate(64).unwrap())
                    .collect::<Vec<_>>()
            }));
        }

        let mut seen = HashSet::new();
        for join in joins {
            for slot in join.join().unwrap() {
                assert!(seen.insert(slot), "slot handed out twice: {slot:?}");
            }
        }
        assert_eq!(seen.len(), 1000);
    }
}
