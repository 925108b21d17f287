//! Bounded MPMC unordered container with per-slot state machines.
//!
//! A bag stores up to 32 items, duplicates allowed, no ordering. Each slot
//! carries a 2-bit state packed into one `AtomicU64`:
//!
//! ```text
//! FREE ──(claim)──▶ CLAIMED ──(publish)──▶ FULL
//! FULL ──(detach)──▶ REMOVING ──(release)──▶ FREE
//! ```
//!
//! Every transition is a CAS on the whole word that rewrites only one
//! slot's field (or, on the bulk paths, several fields at once), so all 32
//! slots compete for the same word but never for each other's payloads.
//!
//! `store` and `remove` cost at least two CAS instructions and are
//! lock-free; `peek`, `copy_to` and `len` cost a single snapshot load and
//! are wait-free. In rare transients the bag can be full and empty at the
//! same time — every slot CLAIMED, so nothing to store into and nothing to
//! remove — which resolves as soon as the in-flight writers publish.

use std::cell::Cell;
use std::marker::PhantomData;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicU64, Ordering};

use crossbeam_utils::{Backoff, CachePadded};

/// Number of slots in a [`Bag`].
pub const SLOTS: usize = 32;

const FREE: u64 = 0b00;
const CLAIMED: u64 = 0b01;
const FULL: u64 = 0b10;
const REMOVING: u64 = 0b11;

/// Low bit of every 2-bit field.
const LO_BITS: u64 = 0x5555_5555_5555_5555;

#[inline]
fn slot_mask(i: usize) -> u64 {
    0b11u64 << (2 * i)
}

#[inline]
fn slot_get(s: u64, i: usize) -> u64 {
    (s >> (2 * i)) & 0b11
}

/// Replaces field `i` of `s` with `v`. The old bits must be cleared before
/// OR-ing: OR alone cannot express transitions that drop a bit, such as
/// CLAIMED(01) to FULL(10).
#[inline]
fn slot_set(s: u64, i: usize, v: u64) -> u64 {
    (s & !slot_mask(i)) | (v << (2 * i))
}

/// An atomic, lock-free storage of up to 32 items.
///
/// The bag holds shared references to caller-owned payloads, so a
/// non-removing read ([`peek`](Bag::peek), [`copy_to`](Bag::copy_to)) can
/// hand out a reference that a concurrent remove has already detached —
/// the reference stays valid, it is merely stale. That is the intended
/// trade for long-lived payloads.
pub struct Bag<'a, T> {
    state: CachePadded<AtomicU64>,
    storage: [AtomicPtr<T>; SLOTS],
    // References flow in and out at exactly `'a`; keep it invariant.
    _marker: PhantomData<Cell<&'a T>>,
}

// SAFETY: the bag stores and hands out `&'a T` across threads, which is
// sharing by reference and needs `T: Sync`. Pointer cells are only
// dereferenced under the state word's release/acquire discipline.
unsafe impl<T: Sync> Send for Bag<'_, T> {}
unsafe impl<T: Sync> Sync for Bag<'_, T> {}

impl<'a, T> Bag<'a, T> {
    /// Creates an empty bag.
    pub fn new() -> Self {
        Bag {
            state: CachePadded::new(AtomicU64::new(0)),
            storage: std::array::from_fn(|_| AtomicPtr::new(ptr::null_mut())),
            _marker: PhantomData,
        }
    }

    /// Stores an item. Returns `false` if the bag had no free slot.
    pub fn store(&self, item: &'a T) -> bool {
        let backoff = Backoff::new();
        // Claim a free slot.
        let slot = loop {
            let s = self.state.load(Ordering::Acquire);
            let Some(i) = (0..SLOTS).find(|&i| slot_get(s, i) == FREE) else {
                return false;
            };
            if self
                .state
                .compare_exchange(s, slot_set(s, i, CLAIMED), Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                break i;
            }
            backoff.spin();
        };

        // Release, so a reader that catches the pointer before the publish
        // CAS still sees the payload it refers to.
        self.storage[slot].store(item as *const T as *mut T, Ordering::Release);

        // Publish.
        loop {
            let s = self.state.load(Ordering::Acquire);
            if self
                .state
                .compare_exchange(s, slot_set(s, slot, FULL), Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return true;
            }
            backoff.spin();
        }
    }

    /// Bulk store: one claim CAS and one publish CAS for up to
    /// `min(32, items.len())` items. Cheaper than repeated
    /// [`store`](Bag::store) calls. Returns how many items were stored.
    pub fn store_many(&self, items: &[&'a T]) -> usize {
        let num = items.len().min(SLOTS);
        if num == 0 {
            return 0;
        }
        let backoff = Backoff::new();

        // Claim up to `num` free slots in one transition.
        let (mask, found) = loop {
            let s = self.state.load(Ordering::Acquire);
            let mut mask = 0u32;
            let mut next = s;
            let mut found = 0;
            for i in 0..SLOTS {
                if found == num {
                    break;
                }
                if slot_get(s, i) == FREE {
                    mask |= 1 << i;
                    next = slot_set(next, i, CLAIMED);
                    found += 1;
                }
            }
            if found == 0 {
                return 0;
            }
            if self
                .state
                .compare_exchange(s, next, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                break (mask, found);
            }
            backoff.spin();
        };

        let mut stored = 0;
        for i in 0..SLOTS {
            if mask & (1 << i) != 0 {
                self.storage[i].store(items[stored] as *const T as *mut T, Ordering::Release);
                stored += 1;
            }
        }

        // Publish every claimed slot with one CAS. Each selected field is
        // rewritten CLAIMED -> FULL against a fresh snapshot; the other
        // fields pass through untouched.
        loop {
            let s = self.state.load(Ordering::Acquire);
            let mut next = s;
            for i in 0..SLOTS {
                if mask & (1 << i) != 0 {
                    debug_assert_eq!(slot_get(s, i), CLAIMED);
                    next = slot_set(next, i, FULL);
                }
            }
            if self
                .state
                .compare_exchange(s, next, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return found;
            }
            backoff.spin();
        }
    }

    /// Removes and returns an arbitrary item, or `None` if the bag holds
    /// none.
    pub fn remove(&self) -> Option<&'a T> {
        let backoff = Backoff::new();
        // Detach a full slot.
        let slot = loop {
            let s = self.state.load(Ordering::Acquire);
            let i = (0..SLOTS).find(|&i| slot_get(s, i) == FULL)?;
            if self
                .state
                .compare_exchange(s, slot_set(s, i, REMOVING), Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                break i;
            }
            backoff.spin();
        };

        let item = self.storage[slot].swap(ptr::null_mut(), Ordering::AcqRel);
        debug_assert!(!item.is_null());

        // Release the slot.
        loop {
            let s = self.state.load(Ordering::Acquire);
            if self
                .state
                .compare_exchange(s, slot_set(s, slot, FREE), Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                // SAFETY: every published pointer came from a `&'a T`
                // passed to store, and this thread detached it exclusively.
                return Some(unsafe { &*item });
            }
            backoff.spin();
        }
    }

    /// Bulk remove: detaches up to `max` items into `dest` with one CAS on
    /// each side of the payload reads. Cheaper than repeated
    /// [`remove`](Bag::remove) calls. Returns how many items were removed.
    pub fn remove_many(&self, dest: &mut Vec<&'a T>, max: usize) -> usize {
        if max == 0 {
            return 0;
        }
        let backoff = Backoff::new();

        // Detach up to `max` full slots in one transition.
        let mask = loop {
            let s = self.state.load(Ordering::Acquire);
            let mut mask = 0u32;
            let mut next = s;
            let mut found = 0;
            for i in 0..SLOTS {
                if found == max {
                    break;
                }
                if slot_get(s, i) == FULL {
                    mask |= 1 << i;
                    next = slot_set(next, i, REMOVING);
                    found += 1;
                }
            }
            if mask == 0 {
                return 0;
            }
            if self
                .state
                .compare_exchange(s, next, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                break mask;
            }
            backoff.spin();
        };

        let mut taken = 0;
        for i in 0..SLOTS {
            if mask & (1 << i) == 0 {
                continue;
            }
            let item = self.storage[i].swap(ptr::null_mut(), Ordering::AcqRel);
            debug_assert!(!item.is_null());
            // SAFETY: as in remove(); the REMOVING fields are this
            // thread's.
            dest.push(unsafe { &*item });
            taken += 1;
        }

        // Release all detached slots with one CAS.
        loop {
            let s = self.state.load(Ordering::Acquire);
            let mut next = s;
            for i in 0..SLOTS {
                if mask & (1 << i) != 0 {
                    next = slot_set(next, i, FREE);
                }
            }
            if self
                .state
                .compare_exchange(s, next, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return taken;
            }
            backoff.spin();
        }
    }

    /// Returns an arbitrary stored item without removing it, or `None` if
    /// the bag holds none. Wait-free.
    pub fn peek(&self) -> Option<&'a T> {
        let s = self.state.load(Ordering::Acquire);
        for i in 0..SLOTS {
            if slot_get(s, i) != FULL {
                continue;
            }
            let item = self.storage[i].load(Ordering::Acquire);
            // A racing remove may have detached the slot since the
            // snapshot; skip it.
            if let Some(item) = unsafe { item.as_ref() } {
                return Some(item);
            }
        }
        None
    }

    /// Copies up to `max` stored items into `dest` without removing them.
    /// Wait-free. Returns how many items were copied.
    pub fn copy_to(&self, dest: &mut Vec<&'a T>, max: usize) -> usize {
        let s = self.state.load(Ordering::Acquire);
        let mut copied = 0;
        for i in 0..SLOTS {
            if copied == max {
                break;
            }
            if slot_get(s, i) != FULL {
                continue;
            }
            let item = self.storage[i].load(Ordering::Acquire);
            if let Some(item) = unsafe { item.as_ref() } {
                dest.push(item);
                copied += 1;
            }
        }
        copied
    }

    /// Number of published items. Wait-free.
    pub fn len(&self) -> usize {
        let s = self.state.load(Ordering::Acquire);
        // FULL is the only field pattern with the high bit set and the low
        // bit clear, so `(s >> 1) & !s` marks exactly the FULL fields.
        (((s >> 1) & !s) & LO_BITS).count_ones() as usize
    }

    /// Whether the bag holds no published items. Wait-free.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for Bag<'_, T> {
    fn default() -> Self {
        Self::new()
    }
}
