//! Slot arena holding every live cache object.
//!
//! Slots are reused through a freelist. Each slot carries an incarnation
//! counter that is bumped on free, so a handle to a destroyed object is
//! detected instead of silently aliasing whatever reused the slot.

use crate::common::types::FsObjHandle;

/// Stable reference to a cache object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjHandle {
    index: u32,
    incarnation: u32,
}

impl ObjHandle {
    pub fn index(self) -> usize {
        self.index as usize
    }

    /// Packs the handle for the C ABI. Never returns 0.
    pub fn to_raw(self) -> FsObjHandle {
        ((self.incarnation as u64) << 32) | (self.index as u64 + 1)
    }

    pub fn from_raw(raw: FsObjHandle) -> Option<Self> {
        let low = (raw & 0xffff_ffff) as u32;
        if low == 0 {
            return None;
        }
        Some(Self {
            index: low - 1,
            incarnation: (raw >> 32) as u32,
        })
    }
}

enum Entry<T> {
    /// Free slot; holds the next free index.
    Vacant(Option<u32>),
    Occupied(T),
}

struct Slot<T> {
    incarnation: u32,
    entry: Entry<T>,
}

pub struct Arena<T> {
    slots: Vec<Slot<T>>,
    free_head: Option<u32>,
    len: usize,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Arena<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_head: None,
            len: 0,
        }
    }

    /// Returns `None` when the slot space or the allocator is exhausted.
    pub fn try_insert(&mut self, value: T) -> Option<ObjHandle> {
        if let Some(index) = self.free_head {
            let slot = &mut self.slots[index as usize];
            let next = match slot.entry {
                Entry::Vacant(next) => next,
                Entry::Occupied(_) => return None,
            };
            self.free_head = next;
            slot.entry = Entry::Occupied(value);
            self.len += 1;
            return Some(ObjHandle {
                index,
                incarnation: slot.incarnation,
            });
        }
        let index = u32::try_from(self.slots.len()).ok().filter(|i| *i < u32::MAX)?;
        self.slots.try_reserve(1).ok()?;
        self.slots.push(Slot {
            incarnation: 0,
            entry: Entry::Occupied(value),
        });
        self.len += 1;
        Some(ObjHandle {
            index,
            incarnation: 0,
        })
    }

    pub fn get(&self, handle: ObjHandle) -> Option<&T> {
        let slot = self.slots.get(handle.index())?;
        match &slot.entry {
            Entry::Occupied(value) if slot.incarnation == handle.incarnation => Some(value),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, handle: ObjHandle) -> Option<&mut T> {
        let slot = self.slots.get_mut(handle.index())?;
        match &mut slot.entry {
            Entry::Occupied(value) if slot.incarnation == handle.incarnation => Some(value),
            _ => None,
        }
    }

    pub fn remove(&mut self, handle: ObjHandle) -> Option<T> {
        let free_head = self.free_head;
        let slot = self.slots.get_mut(handle.index())?;
        if slot.incarnation != handle.incarnation || matches!(slot.entry, Entry::Vacant(_)) {
            return None;
        }
        let entry = std::mem::replace(&mut slot.entry, Entry::Vacant(free_head));
        slot.incarnation = slot.incarnation.wrapping_add(1);
        self.free_head = Some(handle.index);
        self.len -= 1;
        match entry {
            Entry::Occupied(value) => Some(value),
            Entry::Vacant(_) => None,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }
}
