//! # Fixed-Block Allocator
//!
//! Equal-size blocks over one contiguous arena, with an index-based free
//! stack instead of an intrusive pointer list. Allocate pops, deallocate
//! pushes; both are O(1).

/// A fixed-block allocator over a contiguous byte arena.
///
/// The arena is sliced into equal-size blocks. Freed blocks are remembered
/// on an index stack; fresh blocks are handed out from a high-water mark so
/// sequential allocations stay contiguous until the first free.
///
/// # Thread Safety
///
/// Not thread-safe. Callers wrap an instance in a mutex or keep one per
/// thread; [`GrowingPool`](super::GrowingPool) does the former per bin.
///
/// # Example
///
/// ```rust,ignore
/// let mut blocks = BlockAllocator::new(8 * 3_000_000, 8);
///
/// let slot = blocks.allocate(8).expect("handle arena exhausted");
/// blocks.write(slot, &resolved_id.to_le_bytes());
/// blocks.deallocate(slot, 8);
/// ```
pub struct BlockAllocator {
    /// The backing arena. Never reallocated, never moved.
    storage: Box<[u8]>,
    /// Size of one block in bytes.
    block_size: usize,
    /// Indices of freed blocks, most recently freed on top.
    free: Vec<u32>,
    /// Number of blocks handed out at least once.
    high_water: usize,
    /// Number of blocks currently allocated.
    allocated: usize,
}

impl BlockAllocator {
    /// Creates an allocator with `total_size` bytes of storage sliced into
    /// `block_size`-byte blocks. `total_size` is rounded up to a whole
    /// number of blocks.
    ///
    /// # Panics
    ///
    /// Panics if `block_size` is zero.
    #[must_use]
    pub fn new(total_size: usize, block_size: usize) -> Self {
        assert!(block_size > 0, "block size must be non-zero");
        let blocks = total_size.div_ceil(block_size).max(1);
        Self {
            storage: vec![0u8; blocks * block_size].into_boxed_slice(),
            block_size,
            free: Vec::new(),
            high_water: 0,
            allocated: 0,
        }
    }

    /// Size of one block in bytes.
    #[inline]
    #[must_use]
    pub const fn block_size(&self) -> usize {
        self.block_size
    }

    /// Total number of blocks in the arena.
    #[inline]
    #[must_use]
    pub fn capacity_blocks(&self) -> usize {
        self.storage.len() / self.block_size
    }

    /// Number of blocks currently allocated.
    #[inline]
    #[must_use]
    pub const fn allocated_blocks(&self) -> usize {
        self.allocated
    }

    /// Number of blocks available for allocation.
    #[inline]
    #[must_use]
    pub fn free_blocks(&self) -> usize {
        self.capacity_blocks() - self.allocated
    }

    /// Allocates one block and returns its byte offset into the arena.
    ///
    /// The block's bytes are zeroed before it is returned. Fails with `None`
    /// when `size` exceeds one block or the arena is exhausted.
    pub fn allocate(&mut self, size: usize) -> Option<usize> {
        if size == 0 || size > self.block_size {
            return None;
        }

        let index = match self.free.pop() {
            Some(index) => index as usize,
            None => {
                if self.high_water >= self.capacity_blocks() {
                    return None;
                }
                self.high_water += 1;
                self.high_water - 1
            }
        };

        let offset = index * self.block_size;
        self.storage[offset..offset + self.block_size].fill(0);
        self.allocated += 1;
        Some(offset)
    }

    /// Returns a block to the free stack.
    ///
    /// # Panics
    ///
    /// Panics if the offset is out of bounds, not block-aligned, or `size`
    /// exceeds one block. Freeing memory the allocator does not own would
    /// silently corrupt another allocation.
    pub fn deallocate(&mut self, offset: usize, size: usize) {
        assert!(self.contains(offset), "offset outside arena");
        assert!(offset % self.block_size == 0, "offset not block-aligned");
        assert!(size <= self.block_size, "size exceeds block size");

        self.free.push((offset / self.block_size) as u32);
        self.allocated -= 1;
    }

    /// Whether `offset` falls inside this arena.
    #[inline]
    #[must_use]
    pub fn contains(&self, offset: usize) -> bool {
        offset < self.storage.len()
    }

    /// Copies `bytes` into the arena starting at `offset`.
    ///
    /// # Panics
    ///
    /// Panics if the write would cross the end of the block's arena region.
    pub fn write(&mut self, offset: usize, bytes: &[u8]) {
        self.storage[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    /// Reads `len` bytes starting at `offset`.
    #[must_use]
    pub fn read(&self, offset: usize, len: usize) -> &[u8] {
        &self.storage[offset..offset + len]
    }

    /// Mutable view of `len` bytes starting at `offset`.
    pub fn slice_mut(&mut self, offset: usize, len: usize) -> &mut [u8] {
        &mut self.storage[offset..offset + len]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_deallocate_roundtrip() {
        let mut blocks = BlockAllocator::new(64, 8);

        let a = blocks.allocate(8).unwrap();
        let b = blocks.allocate(4).unwrap();
        assert_ne!(a, b);
        assert_eq!(blocks.allocated_blocks(), 2);

        blocks.deallocate(a, 8);
        assert_eq!(blocks.allocated_blocks(), 1);

        // Most recently freed block is reused first.
        let c = blocks.allocate(8).unwrap();
        assert_eq!(c, a);
    }

    #[test]
    fn test_oversized_request_fails() {
        let mut blocks = BlockAllocator::new(64, 8);
        assert!(blocks.allocate(9).is_none());
        assert!(blocks.allocate(0).is_none());
    }

    #[test]
    fn test_exhaustion_then_reuse() {
        let mut blocks = BlockAllocator::new(16, 8);

        let a = blocks.allocate(8).unwrap();
        let _b = blocks.allocate(8).unwrap();
        assert!(blocks.allocate(8).is_none());

        blocks.deallocate(a, 8);
        assert!(blocks.allocate(8).is_some());
    }

    #[test]
    fn test_returned_memory_is_zeroed() {
        let mut blocks = BlockAllocator::new(16, 8);

        let a = blocks.allocate(8).unwrap();
        blocks.write(a, &[0xFF; 8]);
        blocks.deallocate(a, 8);

        let b = blocks.allocate(8).unwrap();
        assert_eq!(b, a);
        assert_eq!(blocks.read(b, 8), &[0u8; 8]);
    }

    #[test]
    fn test_bounded_sequences_stay_aligned_and_in_range() {
        // Any allocate/free sequence that never exceeds the block count must
        // succeed, and every offset must be in-bounds and block-aligned.
        let mut blocks = BlockAllocator::new(32 * 16, 16);
        let mut live = Vec::new();

        for round in 0..100 {
            if round % 3 == 2 {
                if let Some(offset) = live.pop() {
                    blocks.deallocate(offset, 16);
                }
            } else if live.len() < 32 {
                let offset = blocks.allocate(16).unwrap();
                assert!(offset < 32 * 16);
                assert_eq!(offset % 16, 0);
                live.push(offset);
            }
        }
    }

    #[test]
    #[should_panic(expected = "not block-aligned")]
    fn test_misaligned_free_panics() {
        let mut blocks = BlockAllocator::new(64, 8);
        let a = blocks.allocate(8).unwrap();
        blocks.deallocate(a + 1, 8);
    }
}
