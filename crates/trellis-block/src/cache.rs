//! Bounded cache of decoded pages keyed by block id.

use crate::replacer::{ClockReplacer, Replacer, SlotId};
use std::collections::HashMap;
use trellis_common::BlockId;

struct CacheEntry<T> {
    id: BlockId,
    value: T,
    dirty: bool,
}

/// Fixed-capacity page cache with clock eviction and dirty tracking.
///
/// Values are handed out by clone; callers write changes back with `put`.
/// Evicting a dirty entry returns it to the caller, which owns write-back.
pub struct PageCache<T: Clone> {
    slots: Vec<Option<CacheEntry<T>>>,
    index: HashMap<BlockId, SlotId>,
    free_slots: Vec<SlotId>,
    replacer: ClockReplacer,
}

impl<T: Clone> PageCache<T> {
    /// Creates an empty cache holding at most `capacity` pages.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            index: HashMap::with_capacity(capacity),
            free_slots: (0..capacity as u32).rev().map(SlotId).collect(),
            replacer: ClockReplacer::new(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn contains(&self, id: BlockId) -> bool {
        self.index.contains_key(&id)
    }

    /// Returns a copy of the cached page, if resident.
    pub fn get(&mut self, id: BlockId) -> Option<T> {
        let slot = *self.index.get(&id)?;
        self.replacer.record_access(slot);
        self.slots[slot.0 as usize].as_ref().map(|e| e.value.clone())
    }

    /// Returns true if the page is resident and has unwritten changes.
    pub fn is_dirty(&self, id: BlockId) -> bool {
        self.index
            .get(&id)
            .and_then(|slot| self.slots[slot.0 as usize].as_ref())
            .is_some_and(|e| e.dirty)
    }

    /// Stores a page. A dirty flag already set on the entry is kept.
    ///
    /// Returns the evicted page if making room pushed out a dirty entry.
    pub fn put(&mut self, id: BlockId, value: T, dirty: bool) -> Option<(BlockId, T)> {
        if let Some(&slot) = self.index.get(&id) {
            self.replacer.record_access(slot);
            if let Some(entry) = self.slots[slot.0 as usize].as_mut() {
                entry.value = value;
                entry.dirty |= dirty;
            }
            return None;
        }

        let mut evicted = None;
        let slot = match self.free_slots.pop() {
            Some(slot) => slot,
            None => {
                // Every occupied slot is evictable, so the sweep finds one.
                let slot = self.replacer.evict().unwrap_or(SlotId(0));
                if let Some(old) = self.slots[slot.0 as usize].take() {
                    self.index.remove(&old.id);
                    if old.dirty {
                        evicted = Some((old.id, old.value));
                    }
                }
                slot
            }
        };

        self.slots[slot.0 as usize] = Some(CacheEntry { id, value, dirty });
        self.index.insert(id, slot);
        self.replacer.set_evictable(slot, true);
        self.replacer.record_access(slot);
        evicted
    }

    /// Drops a page without write-back.
    pub fn remove(&mut self, id: BlockId) -> Option<T> {
        let slot = self.index.remove(&id)?;
        self.replacer.set_evictable(slot, false);
        self.free_slots.push(slot);
        self.slots[slot.0 as usize].take().map(|e| e.value)
    }

    /// Returns copies of every dirty page, ordered by id, and marks them clean.
    pub fn take_dirty(&mut self) -> Vec<(BlockId, T)> {
        let mut dirty: Vec<(BlockId, T)> = self
            .slots
            .iter_mut()
            .flatten()
            .filter(|e| e.dirty)
            .map(|e| {
                e.dirty = false;
                (e.id, e.value.clone())
            })
            .collect();
        dirty.sort_by_key(|(id, _)| *id);
        dirty
    }

    /// Drops every page without write-back.
    pub fn clear(&mut self) {
        let capacity = self.capacity();
        *self = Self::new(capacity);
    }
}
