//! # Free-List Allocator
//!
//! Variable-size allocation over one arena. The free list is a sorted
//! vector of `(offset, len)` ranges rather than an intrusive pointer graph,
//! so splitting and coalescing are plain slice operations.

/// Granularity of every allocation, in bytes.
///
/// Requests are rounded up to a multiple of this, which bounds the free
/// list's smallest representable range from below (the moral equivalent of
/// the free-node header in a pointer-based list).
pub const FREE_NODE_SIZE: usize = 16;

/// Block selection strategy for [`FreeListAllocator`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum FitMode {
    /// Take the first free range large enough.
    #[default]
    First,
    /// Take the smallest free range large enough.
    Best,
}

/// One contiguous run of free bytes.
#[derive(Clone, Copy, Debug)]
struct FreeRange {
    offset: usize,
    len: usize,
}

/// A general-purpose allocator over a fixed arena.
///
/// Backs the per-frame command arenas, where envelope sizes vary. On a
/// freshly built (or [`reset`](Self::reset)) arena with no interleaved
/// frees, first-fit allocation degenerates into a bump pointer: offsets come
/// back in strictly increasing, contiguous order. The command queue relies
/// on exactly that to lay envelopes out back to back.
///
/// # Thread Safety
///
/// Not thread-safe; each command buffer owns one instance and guards it
/// with the queue lock.
pub struct FreeListAllocator {
    storage: Box<[u8]>,
    /// Free ranges, sorted by offset, never adjacent (always coalesced).
    free: Vec<FreeRange>,
    fit: FitMode,
    allocated: usize,
}

impl FreeListAllocator {
    /// Creates an allocator over a fresh zeroed arena of `capacity` bytes.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is not a multiple of [`FREE_NODE_SIZE`].
    #[must_use]
    pub fn new(capacity: usize, fit: FitMode) -> Self {
        assert!(
            capacity > 0 && capacity % FREE_NODE_SIZE == 0,
            "arena capacity must be a non-zero multiple of the node size"
        );
        Self {
            storage: vec![0u8; capacity].into_boxed_slice(),
            free: vec![FreeRange {
                offset: 0,
                len: capacity,
            }],
            fit,
            allocated: 0,
        }
    }

    /// Total arena size in bytes.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Bytes currently allocated (after granularity rounding).
    #[inline]
    #[must_use]
    pub const fn allocated_bytes(&self) -> usize {
        self.allocated
    }

    /// Rounds `size` up to the allocation granularity.
    #[inline]
    #[must_use]
    pub const fn align(size: usize) -> usize {
        size.div_ceil(FREE_NODE_SIZE) * FREE_NODE_SIZE
    }

    /// Allocates `size` bytes (rounded up to granularity) and returns the
    /// offset. The region is zeroed. Returns `None` when no free range can
    /// hold the request.
    pub fn allocate(&mut self, size: usize) -> Option<usize> {
        if size == 0 {
            return None;
        }
        let size = Self::align(size);

        let index = match self.fit {
            FitMode::First => self.free.iter().position(|range| range.len >= size)?,
            FitMode::Best => self
                .free
                .iter()
                .enumerate()
                .filter(|(_, range)| range.len >= size)
                .min_by_key(|(_, range)| range.len)
                .map(|(index, _)| index)?,
        };

        let range = self.free[index];
        if range.len == size {
            self.free.remove(index);
        } else {
            // Take from the front so the remainder stays where it was.
            self.free[index] = FreeRange {
                offset: range.offset + size,
                len: range.len - size,
            };
        }

        self.storage[range.offset..range.offset + size].fill(0);
        self.allocated += size;
        Some(range.offset)
    }

    /// Returns a region to the free list, coalescing with adjacent ranges.
    ///
    /// # Panics
    ///
    /// Panics if the region is out of bounds or overlaps a free range.
    pub fn deallocate(&mut self, offset: usize, size: usize) {
        let size = Self::align(size);
        assert!(
            offset + size <= self.storage.len(),
            "region outside arena"
        );

        let index = self
            .free
            .partition_point(|range| range.offset < offset);

        if let Some(next) = self.free.get(index) {
            assert!(offset + size <= next.offset, "double free or overlap");
        }
        if index > 0 {
            let prev = self.free[index - 1];
            assert!(prev.offset + prev.len <= offset, "double free or overlap");
        }

        let merges_prev =
            index > 0 && self.free[index - 1].offset + self.free[index - 1].len == offset;
        let merges_next = self
            .free
            .get(index)
            .is_some_and(|next| offset + size == next.offset);

        match (merges_prev, merges_next) {
            (true, true) => {
                self.free[index - 1].len += size + self.free[index].len;
                self.free.remove(index);
            }
            (true, false) => self.free[index - 1].len += size,
            (false, true) => {
                self.free[index].offset = offset;
                self.free[index].len += size;
            }
            (false, false) => self.free.insert(index, FreeRange { offset, len: size }),
        }

        self.allocated -= size;
    }

    /// Whether `offset` falls inside this arena.
    #[inline]
    #[must_use]
    pub fn contains(&self, offset: usize) -> bool {
        offset < self.storage.len()
    }

    /// Forgets every allocation and restores the single all-free range.
    ///
    /// The command queue calls this after a buffer has been drained; the
    /// next frame's envelopes start from offset zero again.
    pub fn reset(&mut self) {
        self.free.clear();
        self.free.push(FreeRange {
            offset: 0,
            len: self.storage.len(),
        });
        self.allocated = 0;
    }

    /// Copies `bytes` into the arena starting at `offset`.
    pub fn write(&mut self, offset: usize, bytes: &[u8]) {
        self.storage[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    /// Reads `len` bytes starting at `offset`.
    #[must_use]
    pub fn read(&self, offset: usize, len: usize) -> &[u8] {
        &self.storage[offset..offset + len]
    }
}
