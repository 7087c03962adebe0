//! Hierarchical cascading timing wheel.
//!
//! Five vectors cover the future in widening bands: `tv1` has 256 one-ms
//! slots, `tv2..tv5` have 64 slots each spanning 2^14, 2^20, 2^26 and 2^32
//! ms. Insert picks the vector by distance-to-deadline and the slot by the
//! matching bit-slice of the deadline, so insert and cancel are O(1) and only
//! the near-future slice is touched per tick. When `tv1` wraps, the current
//! slot of the next vector up is re-distributed downwards (a cascade).
//!
//! Entries live in a slab; slot membership is a doubly-linked list threaded
//! through slab keys, with head and tail kept per slot so same-deadline
//! entries fire in insertion order.

use slab::Slab;

const TVR_BITS: u32 = 8;
const TVR_SIZE: usize = 1 << TVR_BITS;
const TVR_MASK: u64 = (TVR_SIZE - 1) as u64;

const TVN_BITS: u32 = 6;
const TVN_SIZE: usize = 1 << TVN_BITS;
const TVN_MASK: u64 = (TVN_SIZE - 1) as u64;

/// Largest expressible distance; deadlines further out are clamped.
const MAX_TVAL: u64 = (1u64 << (TVR_BITS + 4 * TVN_BITS)) - 1;

const EMPTY: usize = usize::MAX;

/// Identifies an inserted timer. Carries the deadline as a safety check so a
/// stale reference cannot cancel a recycled slab slot.
#[derive(Clone, Debug)]
pub(crate) struct TimerRef {
    key: usize,
    deadline: u64,
}

#[derive(Copy, Clone)]
struct SlotList {
    head: usize,
    tail: usize,
}

impl SlotList {
    const NEW: SlotList = SlotList {
        head: EMPTY,
        tail: EMPTY,
    };
}

#[derive(Copy, Clone)]
struct SlotId {
    level: u8,
    index: u8,
}

struct Entry<T> {
    value: T,
    deadline: u64,
    prev: usize,
    next: usize,
    slot: SlotId,
}

pub(crate) struct TimerWheel<T> {
    entries: Slab<Entry<T>>,
    tv1: [SlotList; TVR_SIZE],
    tvn: [[SlotList; TVN_SIZE]; 4],
    /// Tick (= ms) the base of `tv1` currently corresponds to.
    next_tick: u64,
}

impl<T> TimerWheel<T> {
    pub(crate) fn new(now: u64) -> TimerWheel<T> {
        TimerWheel {
            entries: Slab::new(),
            tv1: [SlotList::NEW; TVR_SIZE],
            tvn: [[SlotList::NEW; TVN_SIZE]; 4],
            next_tick: now,
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn insert(&mut self, deadline: u64, value: T) -> TimerRef {
        let key = self.entries.insert(Entry {
            value,
            deadline,
            prev: EMPTY,
            next: EMPTY,
            slot: SlotId { level: 0, index: 0 },
        });
        self.link(key);
        TimerRef { key, deadline }
    }

    /// Cancel a timer. Returns its value, or `None` if the reference no
    /// longer names a live entry (already fired or already canceled).
    pub(crate) fn remove(&mut self, timer: &TimerRef) -> Option<T> {
        match self.entries.get(timer.key) {
            Some(entry) if entry.deadline == timer.deadline => {}
            _ => return None,
        }
        self.unlink(timer.key);
        Some(self.entries.remove(timer.key).value)
    }

    /// Extract one due timer, advancing the wheel base up to `now` and
    /// cascading upper vectors as slot 0 comes around. Returns `None` once
    /// nothing is due, leaving `next_tick` just past `now`.
    pub(crate) fn poll_due(&mut self, now: u64) -> Option<(u64, T)> {
        while self.next_tick <= now {
            let index = (self.next_tick & TVR_MASK) as usize;

            // A fresh tv1 revolution: pull the upper vectors' current slots
            // down. Re-running this for the same `next_tick` is a no-op, the
            // source slots are already empty.
            if index == 0 {
                self.cascade_all();
            }

            let head = self.tv1[index].head;
            if head != EMPTY {
                self.unlink(head);
                let entry = self.entries.remove(head);
                return Some((entry.deadline, entry.value));
            }

            self.next_tick += 1;
        }
        None
    }

    /// Milliseconds until the nearest timer, or `None` when the wheel is
    /// empty (the caller may block forever).
    ///
    /// Scans `tv1` from the current base; when `tv1` is empty the answer is
    /// the cascade horizon (256 ms), an upper bound on when a timer from an
    /// upper vector could possibly become due.
    pub(crate) fn next_timeout(&self, now: u64) -> Option<u64> {
        if self.is_empty() {
            return None;
        }

        let start = (self.next_tick & TVR_MASK) as usize;
        for off in 0..TVR_SIZE {
            let slot = (start + off) & (TVR_SIZE - 1);
            let head = self.tv1[slot].head;
            if head != EMPTY {
                let deadline = self.entries[head].deadline;
                return Some(deadline.saturating_sub(now).min(i32::MAX as u64));
            }
        }

        Some(TVR_SIZE as u64)
    }

    fn cascade_all(&mut self) {
        for level in 0..4u8 {
            let index = self.upper_index(level);
            self.cascade(level, index);
            if index != 0 {
                break;
            }
        }
    }

    /// Slot of upper vector `level` (0 = tv2) that `next_tick` maps to.
    fn upper_index(&self, level: u8) -> usize {
        ((self.next_tick >> (TVR_BITS + level as u32 * TVN_BITS)) & TVN_MASK) as usize
    }

    /// Move every entry of one upper slot back through `link`, which lands
    /// each in a lower vector now that its residual distance shrank.
    fn cascade(&mut self, level: u8, index: usize) {
        let mut key = self.tvn[level as usize][index].head;
        self.tvn[level as usize][index] = SlotList::NEW;

        while key != EMPTY {
            let next = self.entries[key].next;
            self.entries[key].prev = EMPTY;
            self.entries[key].next = EMPTY;
            self.link(key);
            key = next;
        }
    }

    fn link(&mut self, key: usize) {
        let deadline = self.entries[key].deadline;
        let slot = self.slot_for(deadline);
        self.entries[key].slot = slot;

        let list = self.slot_list_mut(slot);
        let tail = list.tail;
        if tail == EMPTY {
            list.head = key;
            list.tail = key;
        } else {
            list.tail = key;
            self.entries[tail].next = key;
            self.entries[key].prev = tail;
        }
    }

    fn unlink(&mut self, key: usize) {
        let Entry {
            prev, next, slot, ..
        } = self.entries[key];

        if prev == EMPTY {
            self.slot_list_mut(slot).head = next;
        } else {
            self.entries[prev].next = next;
        }
        if next == EMPTY {
            self.slot_list_mut(slot).tail = prev;
        } else {
            self.entries[next].prev = prev;
        }

        self.entries[key].prev = EMPTY;
        self.entries[key].next = EMPTY;
    }

    fn slot_list_mut(&mut self, slot: SlotId) -> &mut SlotList {
        match slot.level {
            0 => &mut self.tv1[slot.index as usize],
            _ => &mut self.tvn[slot.level as usize - 1][slot.index as usize],
        }
    }

    fn slot_for(&self, deadline: u64) -> SlotId {
        if deadline < self.next_tick {
            // Already past due; current base slot so it fires on the next
            // extraction.
            return SlotId {
                level: 0,
                index: (self.next_tick & TVR_MASK) as u8,
            };
        }

        let idx = deadline - self.next_tick;
        if idx < TVR_SIZE as u64 {
            SlotId {
                level: 0,
                index: (deadline & TVR_MASK) as u8,
            }
        } else if idx < 1u64 << (TVR_BITS + TVN_BITS) {
            SlotId {
                level: 1,
                index: ((deadline >> TVR_BITS) & TVN_MASK) as u8,
            }
        } else if idx < 1u64 << (TVR_BITS + 2 * TVN_BITS) {
            SlotId {
                level: 2,
                index: ((deadline >> (TVR_BITS + TVN_BITS)) & TVN_MASK) as u8,
            }
        } else if idx < 1u64 << (TVR_BITS + 3 * TVN_BITS) {
            SlotId {
                level: 3,
                index: ((deadline >> (TVR_BITS + 2 * TVN_BITS)) & TVN_MASK) as u8,
            }
        } else {
            // Clamp far-future deadlines to the wheel's reach. They cascade
            // down and are re-evaluated long before they fire.
            let clamped = if idx > MAX_TVAL {
                MAX_TVAL + self.next_tick
            } else {
                deadline
            };
            SlotId {
                level: 4,
                index: ((clamped >> (TVR_BITS + 3 * TVN_BITS)) & TVN_MASK) as u8,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(wheel: &mut TimerWheel<u32>, now: u64) -> Vec<u32> {
        let mut fired = Vec::new();
        while let Some((_, v)) = wheel.poll_due(now) {
            fired.push(v);
        }
        fired
    }

    #[test]
    fn fires_in_deadline_order() {
        let mut wheel = TimerWheel::new(0);
        // Deliberately permuted, with deadlines straddling all vectors.
        for (deadline, id) in [(300u64, 0u32), (5, 1), (70_000, 2), (12, 3), (299, 4)] {
            wheel.insert(deadline, id);
        }

        assert_eq!(drain(&mut wheel, 100_000), vec![1, 3, 4, 0, 2]);
        assert!(wheel.is_empty());
    }

    #[test]
    fn equal_deadlines_fire_in_insertion_order() {
        let mut wheel = TimerWheel::new(0);
        for id in 0..5u32 {
            wheel.insert(42, id);
        }
        assert_eq!(drain(&mut wheel, 42), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn cancel_unlinks() {
        let mut wheel = TimerWheel::new(0);
        let a = wheel.insert(10, 0u32);
        let b = wheel.insert(10, 1);
        let c = wheel.insert(500, 2);

        assert_eq!(wheel.remove(&b), Some(1));
        assert_eq!(wheel.remove(&b), None);
        assert_eq!(drain(&mut wheel, 1_000), vec![0, 2]);
        assert_eq!(wheel.remove(&a), None);
        let _ = c;
    }

    #[test]
    fn past_due_insert_fires_immediately() {
        let mut wheel = TimerWheel::new(0);
        assert!(wheel.poll_due(1_000).is_none());
        wheel.insert(500, 7u32);
        assert_eq!(wheel.poll_due(1_000).map(|(_, v)| v), Some(7));
    }

    #[test]
    fn cascade_preserves_deadline() {
        let mut wheel = TimerWheel::new(0);
        wheel.insert(256 + 17, 9u32);

        // Not yet due; base advances past the first revolution boundary.
        assert!(wheel.poll_due(256).is_none());
        assert_eq!(wheel.poll_due(256 + 17).map(|(d, v)| (d, v)), Some((273, 9)));
    }

    #[test]
    fn next_timeout_bounds() {
        let mut wheel: TimerWheel<u32> = TimerWheel::new(0);
        assert_eq!(wheel.next_timeout(0), None);

        wheel.insert(40, 0);
        assert_eq!(wheel.next_timeout(0), Some(40));
        assert_eq!(wheel.next_timeout(39), Some(1));
        assert_eq!(wheel.next_timeout(45), Some(0));

        let mut far: TimerWheel<u32> = TimerWheel::new(0);
        far.insert(10_000, 0);
        // tv1 empty: the cascade horizon bounds the answer.
        assert_eq!(far.next_timeout(0), Some(256));
    }

    #[test]
    fn far_future_deadline_is_clamped_not_lost() {
        let mut wheel = TimerWheel::new(0);
        wheel.insert(u64::MAX - 3, 1u32);
        assert!(!wheel.is_empty());
        assert!(wheel.poll_due(1 << 20).is_none());
        assert!(!wheel.is_empty());
    }
}
