//! # Resource IDs and Handles
//!
//! Clients never see backend-native identifiers. A [`ResourceId`] packs a
//! native ID and a resource type into one integer by partitioning the ID
//! space per type; a [`Handle`] names a slot in the [`HandleTable`] that the
//! render thread fills in once creation actually happens.
//!
//! The table slot plays the role of a future: its address (index) is handed
//! out synchronously, its value arrives asynchronously, exactly once. A
//! generation counter per slot turns dangling/reused handles into detected
//! errors instead of silent corruption.

use basalt_core::BlockAllocator;
use bytemuck::{Pod, Zeroable};
use parking_lot::Mutex;

use crate::resource::{ResourceType, RESOURCE_TYPE_COUNT};

/// Width of one type's slice of the ID space: the native u32 range divided
/// evenly between the resource types.
pub const PARTITION_WIDTH: u64 = (u32::MAX as u64 + 1) / RESOURCE_TYPE_COUNT;

/// Size of one handle slot in bytes (one `u64`).
pub const SLOT_SIZE: usize = 8;

/// A backend resource identifier with the resource type folded in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(u64);

impl ResourceId {
    /// Slot value meaning "creation not yet executed". Outside every
    /// partition, so it can never collide with an encoded ID.
    pub const PENDING: Self = Self(u64::MAX);

    /// Slot value meaning "creation failed on the backend". Also outside
    /// every partition.
    pub const FAILED: Self = Self(u64::MAX - 1);

    /// Packs a backend-native ID into the partition for `ty`.
    ///
    /// # Panics
    ///
    /// Panics when `native` does not fit one partition. An un-encodable ID
    /// would alias another type's range, which desynchronizes every
    /// downstream decode.
    #[must_use]
    pub fn encode(native: u64, ty: ResourceType) -> Self {
        assert!(
            native < PARTITION_WIDTH,
            "native id {native} exceeds the per-type partition width {PARTITION_WIDTH}"
        );
        Self(u64::from(ty.code()) * PARTITION_WIDTH + native)
    }

    /// Unpacks the backend-native ID, checking the value lies in `ty`'s
    /// partition.
    ///
    /// # Panics
    ///
    /// Panics when the ID belongs to a different type's partition.
    #[must_use]
    pub fn decode(self, ty: ResourceType) -> u64 {
        let base = u64::from(ty.code()) * PARTITION_WIDTH;
        assert!(
            self.0 >= base && self.0 < base + PARTITION_WIDTH,
            "resource id {} outside the partition for {ty:?}",
            self.0
        );
        self.0 - base
    }

    /// The packed integer value.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Rebuilds an ID from its packed value (registry keys, wire traffic).
    #[inline]
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

/// A capability token for one table slot: index plus generation.
///
/// `Pod` so handles can travel inside command payloads. [`Handle::NONE`]
/// marks header fields of commands that reference no resource.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct Handle {
    /// Slot index in the handle table.
    pub index: u32,
    /// Generation the slot had when this handle was issued.
    pub generation: u32,
}

impl Handle {
    /// The null handle.
    pub const NONE: Self = Self {
        index: u32::MAX,
        generation: 0,
    };

    /// Whether this is the null handle.
    #[inline]
    #[must_use]
    pub const fn is_none(self) -> bool {
        self.index == u32::MAX
    }
}

/// What a handle slot currently holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotValue {
    /// The render thread has not executed the creation yet.
    Pending,
    /// Creation failed; the slot is terminal.
    Failed,
    /// Creation succeeded with this ID.
    Resolved(ResourceId),
}

struct TableInner {
    slots: BlockAllocator,
    generations: Vec<u32>,
}

/// The bounded slot table behind every [`Handle`].
///
/// Slots are drawn from a fixed-block allocator the moment a client
/// requests creation; the render thread writes each slot exactly once when
/// the creation command executes. Slots are retired (generation bumped,
/// block freed) when a destroy command executes; failed creations keep
/// their slot forever, matching the never-reused native ID space.
pub struct HandleTable {
    inner: Mutex<TableInner>,
}

impl HandleTable {
    /// Creates a table with room for `capacity` live handles.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(TableInner {
                slots: BlockAllocator::new(capacity * SLOT_SIZE, SLOT_SIZE),
                generations: vec![0; capacity],
            }),
        }
    }

    /// Allocates a slot and returns its handle, before the resource exists.
    ///
    /// # Panics
    ///
    /// Panics when the table is exhausted. Handing out no handle would
    /// leave the caller with nothing to key the creation command on.
    #[must_use]
    pub fn allocate(&self) -> Handle {
        let mut inner = self.inner.lock();
        let offset = inner
            .slots
            .allocate(SLOT_SIZE)
            .expect("handle table exhausted");
        let index = offset / SLOT_SIZE;

        inner
            .slots
            .write(offset, &ResourceId::PENDING.raw().to_le_bytes());

        Handle {
            index: index as u32,
            generation: inner.generations[index],
        }
    }

    /// Writes the resolved ID into a slot. Render thread only, exactly once.
    ///
    /// # Panics
    ///
    /// Panics on a stale handle or a slot that was already written.
    pub fn resolve(&self, handle: Handle, id: ResourceId) {
        self.write_slot(handle, id);
    }

    /// Marks a slot's creation as failed. Render thread only, exactly once.
    ///
    /// # Panics
    ///
    /// Panics on a stale handle or a slot that was already written.
    pub fn resolve_failed(&self, handle: Handle) {
        self.write_slot(handle, ResourceId::FAILED);
    }

    /// Reads a slot from a command path.
    ///
    /// # Panics
    ///
    /// Panics on a stale handle: a command referencing a retired slot has
    /// already broken the lifecycle contract.
    #[must_use]
    pub fn get(&self, handle: Handle) -> SlotValue {
        self.try_get(handle)
            .unwrap_or_else(|| panic!("stale handle {handle:?} used in a command"))
    }

    /// Reads a slot from a state query; `None` means the slot was retired.
    /// An index outside the table reads the same way.
    #[must_use]
    pub fn try_get(&self, handle: Handle) -> Option<SlotValue> {
        let inner = self.inner.lock();
        let live = inner
            .generations
            .get(handle.index as usize)
            .is_some_and(|generation| *generation == handle.generation);
        if !live {
            return None;
        }

        let offset = handle.index as usize * SLOT_SIZE;
        let raw = u64::from_le_bytes(inner.slots.read(offset, SLOT_SIZE).try_into().expect("slot width"));

        Some(match ResourceId::from_raw(raw) {
            ResourceId::PENDING => SlotValue::Pending,
            ResourceId::FAILED => SlotValue::Failed,
            id => SlotValue::Resolved(id),
        })
    }

    /// Retires a slot after its resource reached a terminal state: bumps
    /// the generation and frees the block for reuse.
    ///
    /// # Panics
    ///
    /// Panics on a stale handle (a double retire).
    pub fn retire(&self, handle: Handle) {
        let mut inner = self.inner.lock();
        let index = handle.index as usize;
        assert!(
            inner.generations[index] == handle.generation,
            "stale handle {handle:?} retired twice"
        );

        inner.generations[index] = inner.generations[index].wrapping_add(1);
        inner.slots.deallocate(index * SLOT_SIZE, SLOT_SIZE);
    }

    fn write_slot(&self, handle: Handle, id: ResourceId) {
        let mut inner = self.inner.lock();
        let index = handle.index as usize;
        assert!(
            inner.generations[index] == handle.generation,
            "stale handle {handle:?} written"
        );

        let offset = index * SLOT_SIZE;
        let current = u64::from_le_bytes(inner.slots.read(offset, SLOT_SIZE).try_into().expect("slot width"));
        assert!(
            ResourceId::from_raw(current) == ResourceId::PENDING,
            "handle slot written twice"
        );

        inner.slots.write(offset, &id.raw().to_le_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_roundtrip() {
        for native in [0u64, 1, 42, PARTITION_WIDTH - 1] {
            let id = ResourceId::encode(native, ResourceType::Shader);
            assert_eq!(id.decode(ResourceType::Shader), native);
        }
    }

    #[test]
    fn test_partitions_do_not_collide() {
        let buffer = ResourceId::encode(5, ResourceType::Buffer);
        let texture = ResourceId::encode(5, ResourceType::Texture2d);
        assert_ne!(buffer, texture);
    }

    #[test]
    #[should_panic(expected = "exceeds the per-type partition width")]
    fn test_encode_rejects_oversized_native_id() {
        let _ = ResourceId::encode(PARTITION_WIDTH, ResourceType::Buffer);
    }

    #[test]
    #[should_panic(expected = "outside the partition")]
    fn test_decode_rejects_wrong_partition() {
        let id = ResourceId::encode(5, ResourceType::Buffer);
        let _ = id.decode(ResourceType::Shader);
    }

    #[test]
    fn test_slot_lifecycle() {
        let table = HandleTable::new(4);
        let handle = table.allocate();

        assert_eq!(table.get(handle), SlotValue::Pending);

        let id = ResourceId::encode(9, ResourceType::Buffer);
        table.resolve(handle, id);
        assert_eq!(table.get(handle), SlotValue::Resolved(id));

        table.retire(handle);
        assert_eq!(table.try_get(handle), None);
    }

    #[test]
    fn test_failed_creation_is_observable() {
        let table = HandleTable::new(4);
        let handle = table.allocate();
        table.resolve_failed(handle);
        assert_eq!(table.get(handle), SlotValue::Failed);
    }

    #[test]
    fn test_retired_slot_is_reused_with_new_generation() {
        let table = HandleTable::new(1);
        let first = table.allocate();
        table.resolve(first, ResourceId::encode(1, ResourceType::Buffer));
        table.retire(first);

        let second = table.allocate();
        assert_eq!(second.index, first.index);
        assert_ne!(second.generation, first.generation);
        // The old handle stays dead, the new one is live.
        assert_eq!(table.try_get(first), None);
        assert_eq!(table.get(second), SlotValue::Pending);
    }

    #[test]
    fn test_out_of_range_handle_reads_as_retired() {
        let table = HandleTable::new(2);
        let bogus = Handle {
            index: 999,
            generation: 0,
        };
        assert_eq!(table.try_get(bogus), None);
        assert_eq!(table.try_get(Handle::NONE), None);
    }

    #[test]
    #[should_panic(expected = "written twice")]
    fn test_double_resolve_panics() {
        let table = HandleTable::new(1);
        let handle = table.allocate();
        table.resolve(handle, ResourceId::encode(1, ResourceType::Buffer));
        table.resolve(handle, ResourceId::encode(2, ResourceType::Buffer));
    }

    #[test]
    #[should_panic(expected = "handle table exhausted")]
    fn test_exhaustion_is_fatal() {
        let table = HandleTable::new(1);
        let _a = table.allocate();
        let _b = table.allocate();
    }
}
