//! Context table management.
//!
//! CIDs are dense small integers, so contexts live in a direct-indexed array
//! of options; no hashing. Each slot carries an access stamp and eviction
//! picks the least recently used slot when a new flow arrives on a full
//! table. The table is generic over the boxed context trait object so both
//! engine sides share the implementation.

use std::fmt::Debug;

use crate::types::ContextId;

#[derive(Debug)]
struct Slot<C: ?Sized> {
    stamp: u64,
    context: Box<C>,
}

/// Fixed-capacity CID-indexed context store with LRU eviction.
#[derive(Debug)]
pub struct ContextTable<C: ?Sized> {
    slots: Vec<Option<Slot<C>>>,
    tick: u64,
    live: usize,
}

impl<C: ?Sized> ContextTable<C> {
    /// Creates a table with `capacity` addressable CIDs (0..capacity).
    pub fn with_capacity(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            slots,
            tick: 0,
            live: 0,
        }
    }

    /// Number of live contexts.
    #[inline]
    pub fn len(&self) -> usize {
        self.live
    }

    /// True when no context is stored.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Addressable CID count.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    /// Immutable access without touching the LRU stamp.
    pub fn get(&self, cid: ContextId) -> Option<&C> {
        self.slots
            .get(cid.value() as usize)?
            .as_ref()
            .map(|slot| &*slot.context)
    }

    /// Mutable access; refreshes the LRU stamp.
    pub fn get_mut(&mut self, cid: ContextId) -> Option<&mut C> {
        let tick = self.next_tick();
        let slot = self.slots.get_mut(cid.value() as usize)?.as_mut()?;
        slot.stamp = tick;
        Some(&mut *slot.context)
    }

    /// Stores a context at `cid`, replacing any previous occupant.
    pub fn insert(&mut self, cid: ContextId, context: Box<C>) {
        let tick = self.next_tick();
        let index = cid.value() as usize;
        debug_assert!(index < self.slots.len(), "CID outside table capacity");
        if self.slots[index].is_none() {
            self.live += 1;
        }
        self.slots[index] = Some(Slot {
            stamp: tick,
            context,
        });
    }

    /// Removes and returns the context at `cid`.
    pub fn remove(&mut self, cid: ContextId) -> Option<Box<C>> {
        let removed = self.slots.get_mut(cid.value() as usize)?.take()?;
        self.live -= 1;
        Some(removed.context)
    }

    /// CID of the least recently used context, if any context is live.
    pub fn lru_cid(&self) -> Option<ContextId> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(cid, slot)| slot.as_ref().map(|s| (cid, s.stamp)))
            .min_by_key(|(_, stamp)| *stamp)
            .map(|(cid, _)| ContextId::new(cid as u16))
    }

    /// Finds a CID for a new flow: the first free slot probing forward from
    /// `start`, or the LRU slot when the table is full. Returns the chosen
    /// CID and the evicted context, if one had to make room.
    pub fn allocate(&mut self, start: ContextId) -> (ContextId, Option<Box<C>>) {
        let capacity = self.slots.len();
        debug_assert!(capacity > 0, "context table capacity must be positive");
        let start_index = start.value() as usize % capacity;
        for probe in 0..capacity {
            let index = (start_index + probe) % capacity;
            if self.slots[index].is_none() {
                return (ContextId::new(index as u16), None);
            }
        }
        // Full table: evict the least recently used flow. Never fails the call.
        let victim = self
            .lru_cid()
            .expect("full table must have an LRU entry");
        let evicted = self.remove(victim);
        (victim, evicted)
    }

    /// Iterates over live `(CID, context)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (ContextId, &C)> {
        self.slots.iter().enumerate().filter_map(|(cid, slot)| {
            slot.as_ref()
                .map(|s| (ContextId::new(cid as u16), &*s.context))
        })
    }

    /// Drops every context.
    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
        self.live = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Dummy(u32);

    fn table(capacity: usize) -> ContextTable<Dummy> {
        ContextTable::with_capacity(capacity)
    }

    #[test]
    fn insert_get_remove_round_trip() {
        let mut t = table(4);
        assert!(t.is_empty());
        t.insert(ContextId::new(2), Box::new(Dummy(7)));
        assert_eq!(t.len(), 1);
        assert_eq!(t.get(ContextId::new(2)), Some(&Dummy(7)));
        assert_eq!(t.get(ContextId::new(0)), None);
        assert_eq!(t.remove(ContextId::new(2)), Some(Box::new(Dummy(7))));
        assert!(t.is_empty());
    }

    #[test]
    fn allocate_probes_forward_from_start() {
        let mut t = table(4);
        t.insert(ContextId::new(1), Box::new(Dummy(1)));
        let (cid, evicted) = t.allocate(ContextId::new(1));
        assert_eq!(cid, ContextId::new(2));
        assert!(evicted.is_none());
    }

    #[test]
    fn allocate_wraps_around_table_end() {
        let mut t = table(4);
        t.insert(ContextId::new(3), Box::new(Dummy(3)));
        let (cid, _) = t.allocate(ContextId::new(3));
        assert_eq!(cid, ContextId::new(0));
    }

    #[test]
    fn full_table_evicts_least_recently_used() {
        let mut t = table(3);
        for cid in 0..3u16 {
            t.insert(ContextId::new(cid), Box::new(Dummy(cid as u32)));
        }
        // Touch 0 and 2; CID 1 becomes the LRU.
        t.get_mut(ContextId::new(0));
        t.get_mut(ContextId::new(2));

        let (cid, evicted) = t.allocate(ContextId::new(0));
        assert_eq!(cid, ContextId::new(1));
        assert_eq!(evicted, Some(Box::new(Dummy(1))));
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn get_mut_refreshes_lru_order() {
        let mut t = table(2);
        t.insert(ContextId::new(0), Box::new(Dummy(0)));
        t.insert(ContextId::new(1), Box::new(Dummy(1)));
        assert_eq!(t.lru_cid(), Some(ContextId::new(0)));
        t.get_mut(ContextId::new(0));
        assert_eq!(t.lru_cid(), Some(ContextId::new(1)));
    }

    #[test]
    fn iter_yields_live_contexts_in_cid_order() {
        let mut t = table(8);
        t.insert(ContextId::new(5), Box::new(Dummy(5)));
        t.insert(ContextId::new(1), Box::new(Dummy(1)));
        let cids: Vec<u16> = t.iter().map(|(cid, _)| cid.value()).collect();
        assert_eq!(cids, vec![1, 5]);
    }
}
