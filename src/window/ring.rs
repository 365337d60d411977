//! Fixed-capacity ring of materialized records, addressed by index modulo capacity.
//!
//! Every occupied slot remembers which logical index it holds, so a slot can
//! never answer for a different index that happens to share its position.
//! The owner still evicts ranges before reassigning them; the tag turns a
//! missed eviction into a "not ready" instead of a wrong record.

#![allow(missing_docs)]

use std::ops::Range;

#[derive(Debug, Clone)]
struct Slot<V> {
    index: usize,
    value: V,
}

/// Modulo-addressed slot store.
#[derive(Debug, Clone)]
pub struct RingCache<V> {
    slots: Vec<Option<Slot<V>>>,
}

impl<V> RingCache<V> {
    /// Create an empty ring. A zero capacity is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self { slots }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn position(&self, index: usize) -> usize {
        index % self.slots.len()
    }

    /// Value held for `index`, or `None` if not loaded.
    pub fn get(&self, index: usize) -> Option<&V> {
        match &self.slots[self.position(index)] {
            Some(slot) if slot.index == index => Some(&slot.value),
            _ => None,
        }
    }

    /// Store `value` for `index`, returning the previous value for the same index.
    ///
    /// A slot still owned by another index is overwritten; that index has
    /// already left the content window.
    pub fn put(&mut self, index: usize, value: V) -> Option<V> {
        let position = self.position(index);
        let previous = self.slots[position].replace(Slot { index, value });
        previous.filter(|slot| slot.index == index).map(|slot| slot.value)
    }

    /// Clear the slot for `index` if it holds that index.
    pub fn clear(&mut self, index: usize) -> Option<V> {
        let position = self.position(index);
        if self.slots[position]
            .as_ref()
            .is_some_and(|slot| slot.index == index)
        {
            return self.slots[position].take().map(|slot| slot.value);
        }
        None
    }

    /// Clear every index in `range`. Returns how many slots were emptied.
    pub fn clear_range(&mut self, range: Range<usize>) -> usize {
        if range.len() >= self.slots.len() {
            // Covers every position; only slots owned by an index in range go.
            let mut cleared = 0;
            for slot in &mut self.slots {
                if slot.as_ref().is_some_and(|s| range.contains(&s.index)) {
                    *slot = None;
                    cleared += 1;
                }
            }
            return cleared;
        }
        range.filter(|&index| self.clear(index).is_some()).count()
    }

    /// Drop everything.
    pub fn clear_all(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
    }

    /// Logical indices currently held, in slot order.
    pub fn held_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.slots.iter().flatten().map(|slot| slot.index)
    }
}
