//! Replacement policy for the decoded-page cache.

/// Index of a slot in a page cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId(pub u32);

impl std::fmt::Display for SlotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "slot:{}", self.0)
    }
}

/// Trait for cache replacement algorithms.
pub trait Replacer: Send {
    /// Records that the given slot was accessed.
    fn record_access(&mut self, slot: SlotId);

    /// Marks a slot as holding a page that may be evicted.
    fn set_evictable(&mut self, slot: SlotId, evictable: bool);

    /// Selects a victim slot for eviction.
    ///
    /// Returns None if no slots are evictable.
    fn evict(&mut self) -> Option<SlotId>;

    /// Returns the number of evictable slots.
    fn size(&self) -> usize;
}

/// Clock replacement algorithm implementation.
///
/// Each slot carries a reference bit. When selecting a victim the hand
/// sweeps the slots, clearing set reference bits, and stops at the first
/// evictable slot whose bit is already clear.
pub struct ClockReplacer {
    reference_bits: Vec<bool>,
    evictable: Vec<bool>,
    num_evictable: usize,
    clock_hand: usize,
}

impl ClockReplacer {
    /// Creates a new clock replacer over `num_slots` slots.
    pub fn new(num_slots: usize) -> Self {
        Self {
            reference_bits: vec![false; num_slots],
            evictable: vec![false; num_slots],
            num_evictable: 0,
            clock_hand: 0,
        }
    }

    /// Returns the total capacity.
    pub fn capacity(&self) -> usize {
        self.evictable.len()
    }
}

impl Replacer for ClockReplacer {
    fn record_access(&mut self, slot: SlotId) {
        if let Some(bit) = self.reference_bits.get_mut(slot.0 as usize) {
            *bit = true;
        }
    }

    fn set_evictable(&mut self, slot: SlotId, evictable: bool) {
        let idx = slot.0 as usize;
        if idx >= self.evictable.len() || self.evictable[idx] == evictable {
            return;
        }
        self.evictable[idx] = evictable;
        if evictable {
            self.num_evictable += 1;
        } else {
            self.num_evictable -= 1;
            self.reference_bits[idx] = false;
        }
    }

    fn evict(&mut self) -> Option<SlotId> {
        if self.num_evictable == 0 {
            return None;
        }
        let num_slots = self.evictable.len();

        // After one full sweep every reference bit is clear, so two suffice.
        for _ in 0..(2 * num_slots) {
            let hand = self.clock_hand;
            self.clock_hand = (hand + 1) % num_slots;

            if !self.evictable[hand] {
                continue;
            }
            if self.reference_bits[hand] {
                self.reference_bits[hand] = false;
            } else {
                self.evictable[hand] = false;
                self.num_evictable -= 1;
                return Some(SlotId(hand as u32));
            }
        }
        None
    }

    fn size(&self) -> usize {
        self.num_evictable
    }
}
