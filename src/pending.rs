//! # Pending-Request Index (component E, spec §3.4, §4.5)
//!
//! Tracks requests that are waiting on a matching response, keyed by the
//! packet sequence number that was assigned when the request went out.
//! Backed by an open-addressed circular buffer (slot = `seq % capacity`)
//! rather than a `HashMap<u32, T>` so a full table walk during `prune` is a
//! flat array scan, matching spec §4.5's fixed-slot design; [`ChunkBuffer`]
//! and this module are the two places the buffer itself is the state,
//! rather than a wrapper around `std::collections`.
//!
//! [`ChunkBuffer`]: crate::chunk::ChunkBuffer

use crate::error::{DiceyError, DiceyResult};

const INITIAL_CAPACITY: usize = 16;
const GROWTH_FACTOR: f64 = 1.5;
/// Grow once occupancy reaches this fraction of capacity (spec §4.5).
const GROWTH_THRESHOLD: f64 = 0.8;

struct Slot<T> {
    seq: u32,
    payload: T,
}

/// A circular-buffer index of in-flight requests awaiting a response
/// (spec §4.5). `T` is whatever the owner needs to resume a waiter: a
/// oneshot sender for the async client API, a semaphore handle for the
/// sync wrapper, or a submission record on the server side.
pub struct PendingIndex<T> {
    slots: Vec<Option<Slot<T>>>,
    count: usize,
    last_seq: Option<u32>,
}

impl<T> PendingIndex<T> {
    pub fn new() -> Self {
        Self {
            slots: (0..INITIAL_CAPACITY).map(|_| None).collect(),
            count: 0,
            last_seq: None,
        }
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    fn slot_index(&self, seq: u32) -> usize {
        (seq as usize) % self.slots.len()
    }

    /// Insert a pending request, keyed by `seq`. `seq` must equal exactly
    /// `last_seq + 2` (or `2` on the very first insert) — client-originated
    /// sequence numbers are gap-free, not merely increasing (spec §4.5,
    /// §8); a gap-skipping or repeated `seq` is a caller bug, not a
    /// runtime condition, so it is rejected rather than silently accepted.
    pub fn add(&mut self, seq: u32, payload: T) -> DiceyResult<()> {
        let expected = self.last_seq.map_or(2, |last| last + 2);
        if seq != expected {
            return Err(DiceyError::SeqNumMismatch { expected, got: seq });
        }
        if (self.count + 1) as f64 >= self.slots.len() as f64 * GROWTH_THRESHOLD {
            self.grow();
        }
        let idx = self.slot_index(seq);
        debug_assert!(self.slots[idx].is_none(), "slot collision on strictly monotonic seq");
        self.slots[idx] = Some(Slot { seq, payload });
        self.count += 1;
        self.last_seq = Some(seq);
        Ok(())
    }

    /// Remove and return the pending entry for `seq`, if present.
    pub fn complete(&mut self, seq: u32) -> Option<T> {
        let idx = self.slot_index(seq);
        match &self.slots[idx] {
            Some(slot) if slot.seq == seq => {
                self.count -= 1;
                self.slots[idx].take().map(|s| s.payload)
            }
            _ => None,
        }
    }

    pub fn get(&self, seq: u32) -> Option<&T> {
        let idx = self.slot_index(seq);
        match &self.slots[idx] {
            Some(slot) if slot.seq == seq => Some(&slot.payload),
            _ => None,
        }
    }

    /// Remove every entry for which `predicate` returns true, returning
    /// their `(seq, payload)` pairs. Used to fail out timed-out requests
    /// (spec §4.5).
    pub fn prune(&mut self, mut predicate: impl FnMut(u32, &T) -> bool) -> Vec<(u32, T)> {
        let mut removed = Vec::new();
        for slot in self.slots.iter_mut() {
            let matches = matches!(slot, Some(s) if predicate(s.seq, &s.payload));
            if matches {
                if let Some(s) = slot.take() {
                    self.count -= 1;
                    removed.push((s.seq, s.payload));
                }
            }
        }
        removed
    }

    /// Grow capacity by 1.5x and rehash every live entry into the new
    /// table (spec §4.5).
    fn grow(&mut self) {
        let new_cap = ((self.slots.len() as f64) * GROWTH_FACTOR).ceil() as usize;
        let old_slots = std::mem::replace(&mut self.slots, (0..new_cap).map(|_| None).collect());
        for slot in old_slots.into_iter().flatten() {
            let idx = (slot.seq as usize) % new_cap;
            debug_assert!(self.slots[idx].is_none(), "slot collision after rehash");
            self.slots[idx] = Some(slot);
        }
    }
}

impl<T> Default for PendingIndex<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_then_complete_returns_payload() {
        let mut idx: PendingIndex<&str> = PendingIndex::new();
        idx.add(2, "first").unwrap();
        idx.add(4, "second").unwrap();
        assert_eq!(idx.complete(2), Some("first"));
        assert_eq!(idx.complete(2), None);
        assert_eq!(idx.get(4), Some(&"second"));
    }

    #[test]
    fn add_rejects_non_monotonic_seq() {
        let mut idx: PendingIndex<()> = PendingIndex::new();
        idx.add(2, ()).unwrap();
        assert!(matches!(idx.add(2, ()), Err(DiceyError::SeqNumMismatch { .. })));
        assert!(matches!(idx.add(10, ()), Err(DiceyError::SeqNumMismatch { .. })));
    }

    #[test]
    fn add_rejects_gap_in_sequence() {
        let mut idx: PendingIndex<()> = PendingIndex::new();
        idx.add(2, ()).unwrap();
        match idx.add(6, ()) {
            Err(DiceyError::SeqNumMismatch { expected, got }) => {
                assert_eq!(expected, 4);
                assert_eq!(got, 6);
            }
            other => panic!("expected SeqNumMismatch, got {:?}", other.err()),
        }
        idx.add(4, ()).unwrap();
    }

    #[test]
    fn add_requires_first_seq_to_be_two() {
        let mut idx: PendingIndex<()> = PendingIndex::new();
        assert!(matches!(idx.add(4, ()), Err(DiceyError::SeqNumMismatch { expected: 2, got: 4 })));
    }

    #[test]
    fn grows_past_initial_capacity_without_losing_entries() {
        let mut idx: PendingIndex<u32> = PendingIndex::new();
        let mut seq = 2u32;
        for i in 0..64 {
            idx.add(seq, i).unwrap();
            seq += 2;
        }
        assert_eq!(idx.len(), 64);

        seq = 2;
        for i in 0..64u32 {
            assert_eq!(idx.get(seq), Some(&i));
            seq += 2;
        }
    }

    #[test]
    fn prune_removes_matching_entries_only() {
        let mut idx: PendingIndex<u32> = PendingIndex::new();
        idx.add(2, 100).unwrap();
        idx.add(4, 200).unwrap();
        idx.add(6, 300).unwrap();

        let removed = idx.prune(|_, payload| *payload >= 200);
        assert_eq!(removed.len(), 2);
        assert_eq!(idx.len(), 1);
        assert_eq!(idx.get(2), Some(&100));
    }
}
