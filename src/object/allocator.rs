//! Per-type id allocator.
//!
//! Ids are dense and start at 1. Freed ids go back to a min-heap so the
//! smallest free id is handed out first; every free bumps the slot's
//! generation so handles captured before the free no longer resolve.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use super::{ObjectHandle, ObjectId, NULL_OBJECT_ID};
use crate::error::{Result, WireError};

struct Slot<T> {
    generation: u32,
    object: Option<T>,
}

/// Maps ids of one object type to the values stored for them.
pub struct ObjectAllocator<T> {
    slots: Vec<Slot<T>>,
    free_ids: BinaryHeap<Reverse<ObjectId>>,
    live: usize,
}

impl<T> ObjectAllocator<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_ids: BinaryHeap::new(),
            live: 0,
        }
    }

    /// Allocate an id and store the value built for its handle.
    ///
    /// Never fails; reuses the smallest freed id, otherwise `count + 1`.
    pub fn allocate(&mut self, make: impl FnOnce(ObjectHandle) -> T) -> ObjectHandle {
        self.live += 1;

        if let Some(Reverse(id)) = self.free_ids.pop() {
            let slot = &mut self.slots[(id - 1) as usize];
            let handle = ObjectHandle::new(id, slot.generation);
            slot.object = Some(make(handle));
            return handle;
        }

        let id = self.slots.len() as ObjectId + 1;
        let handle = ObjectHandle::new(id, 0);
        self.slots.push(Slot {
            generation: 0,
            object: Some(make(handle)),
        });
        handle
    }

    /// Free an allocated id and return its value.
    ///
    /// Freeing an id that is not currently allocated means the two sides
    /// disagree about object lifetimes, so it is reported as an error.
    pub fn free(&mut self, id: ObjectId) -> Result<T> {
        let slot = self
            .slot_mut(id)
            .ok_or_else(|| WireError::Allocator(format!("free of unallocated id {}", id)))?;
        let object = slot
            .object
            .take()
            .ok_or_else(|| WireError::Allocator(format!("double free of id {}", id)))?;

        slot.generation = slot.generation.wrapping_add(1);
        self.free_ids.push(Reverse(id));
        self.live -= 1;
        Ok(object)
    }

    /// Look up a live id. Out-of-range and freed ids return `None`.
    pub fn get(&self, id: ObjectId) -> Option<&T> {
        self.slot(id).and_then(|slot| slot.object.as_ref())
    }

    pub fn get_mut(&mut self, id: ObjectId) -> Option<&mut T> {
        self.slot_mut(id).and_then(|slot| slot.object.as_mut())
    }

    /// Look up a live id whose generation matches the handle.
    pub fn get_handle(&self, handle: ObjectHandle) -> Option<&T> {
        match self.slot(handle.id) {
            Some(slot) if slot.generation == handle.generation => slot.object.as_ref(),
            _ => None,
        }
    }

    pub fn get_handle_mut(&mut self, handle: ObjectHandle) -> Option<&mut T> {
        match self.slot_mut(handle.id) {
            Some(slot) if slot.generation == handle.generation => slot.object.as_mut(),
            _ => None,
        }
    }

    /// Current generation of a live id.
    pub fn generation(&self, id: ObjectId) -> Option<u32> {
        self.slot(id)
            .filter(|slot| slot.object.is_some())
            .map(|slot| slot.generation)
    }

    /// Whether the handle still names a live object.
    pub fn contains(&self, handle: ObjectHandle) -> bool {
        self.get_handle(handle).is_some()
    }

    /// Number of live objects.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Handles of all live objects, in id order.
    pub fn handles(&self) -> Vec<ObjectHandle> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.object.is_some())
            .map(|(index, slot)| ObjectHandle::new(index as ObjectId + 1, slot.generation))
            .collect()
    }

    /// Iterate live objects mutably.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (ObjectHandle, &mut T)> {
        self.slots.iter_mut().enumerate().filter_map(|(index, slot)| {
            let handle = ObjectHandle::new(index as ObjectId + 1, slot.generation);
            slot.object.as_mut().map(|object| (handle, object))
        })
    }

    fn slot(&self, id: ObjectId) -> Option<&Slot<T>> {
        if id == NULL_OBJECT_ID {
            return None;
        }
        self.slots.get((id - 1) as usize)
    }

    fn slot_mut(&mut self, id: ObjectId) -> Option<&mut Slot<T>> {
        if id == NULL_OBJECT_ID {
            return None;
        }
        self.slots.get_mut((id - 1) as usize)
    }
}

impl<T> Default for ObjectAllocator<T> {
    fn default() -> Self {
        Self::new()
    }
}
