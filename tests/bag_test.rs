use petek::{Bag, SLOTS};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

#[test]
fn empty_bag() {
    let bag: Bag<'_, u32> = Bag::new();
    assert!(bag.is_empty());
    assert!(bag.remove().is_none());
    assert!(bag.peek().is_none());

    let mut dest = Vec::new();
    assert_eq!(bag.remove_many(&mut dest, SLOTS), 0);
    assert_eq!(bag.copy_to(&mut dest, SLOTS), 0);
}

#[test]
fn store_then_drain_as_set() {
    let items = [1u32, 2, 3];
    let bag = Bag::new();
    for item in &items {
        assert!(bag.store(item));
    }
    assert_eq!(bag.len(), 3);

    let mut dest = Vec::new();
    assert_eq!(bag.remove_many(&mut dest, 3), 3);
    let got: HashSet<u32> = dest.iter().map(|&&v| v).collect();
    assert_eq!(got, HashSet::from([1, 2, 3]));
    assert!(bag.is_empty());
}

#[test]
fn round_trip_single_item() {
    let item = 7u32;
    let bag = Bag::new();
    assert!(bag.store(&item));
    let got = bag.remove().unwrap();
    assert!(std::ptr::eq(got, &item));
    assert!(bag.is_empty());
}

#[test]
fn store_fails_when_full() {
    let items: Vec<u32> = (0..33).collect();
    let bag = Bag::new();
    for item in items.iter().take(SLOTS) {
        assert!(bag.store(item));
    }
    assert_eq!(bag.len(), SLOTS);
    assert!(!bag.store(&items[32]));

    assert!(bag.remove().is_some());
    assert!(bag.store(&items[32]));
}

#[test]
fn peek_and_copy_leave_items_in_place() {
    let items = [10u32, 20, 30];
    let bag = Bag::new();
    for item in &items {
        bag.store(item);
    }

    assert!(bag.peek().is_some());
    let mut copies = Vec::new();
    assert_eq!(bag.copy_to(&mut copies, SLOTS), 3);
    assert_eq!(bag.len(), 3, "copy_to must not remove");

    let mut drained = Vec::new();
    assert_eq!(bag.remove_many(&mut drained, SLOTS), 3);
    assert!(bag.is_empty());

    let copied: HashSet<u32> = copies.iter().map(|&&v| v).collect();
    let removed: HashSet<u32> = drained.iter().map(|&&v| v).collect();
    assert_eq!(copied, removed);
}

#[test]
fn copy_to_respects_max() {
    let items = [1u32, 2, 3, 4];
    let bag = Bag::new();
    for item in &items {
        bag.store(item);
    }

    let mut dest = Vec::new();
    assert_eq!(bag.copy_to(&mut dest, 2), 2);
    assert_eq!(dest.len(), 2);

    let mut drained = Vec::new();
    assert_eq!(bag.remove_many(&mut drained, 2), 2);
    assert_eq!(bag.len(), 2);
}

#[test]
fn bulk_store_caps_at_slot_count() {
    let items: Vec<u32> = (0..40).collect();
    let refs: Vec<&u32> = items.iter().collect();
    let bag = Bag::new();

    assert_eq!(bag.store_many(&refs), SLOTS);
    assert_eq!(bag.len(), SLOTS);
    // Full bag: nothing further goes in.
    assert_eq!(bag.store_many(&refs[SLOTS..]), 0);

    let mut dest = Vec::new();
    assert_eq!(bag.remove_many(&mut dest, SLOTS), SLOTS);
    let got: HashSet<u32> = dest.iter().map(|&&v| v).collect();
    assert_eq!(got, (0..SLOTS as u32).collect::<HashSet<u32>>());
}

#[test]
fn bulk_store_after_partial_drain() {
    let items: Vec<u32> = (0..SLOTS as u32).collect();
    let refs: Vec<&u32> = items.iter().collect();
    let bag = Bag::new();

    assert_eq!(bag.store_many(&refs[..30]), 30);
    let mut dest = Vec::new();
    assert_eq!(bag.remove_many(&mut dest, 10), 10);
    assert_eq!(bag.len(), 20);

    // Only 12 slots are free, so a full-width bulk store stops there.
    assert_eq!(bag.store_many(&refs), 12);
    assert_eq!(bag.len(), SLOTS);
}

#[test]
#[cfg_attr(miri, ignore)]
fn concurrent_store_remove_preserves_multiset() {
    const PRODUCERS: usize = 4;
    const PER_PRODUCER: usize = 2_000;
    const TOTAL: usize = PRODUCERS * PER_PRODUCER;

    let items: Vec<usize> = (0..TOTAL).collect();
    let bag = Bag::new();
    let taken = AtomicUsize::new(0);

    let mut all: Vec<usize> = thread::scope(|scope| {
        for window in items.chunks(PER_PRODUCER) {
            let bag = &bag;
            scope.spawn(move || {
                for item in window {
                    while !bag.store(item) {
                        thread::yield_now();
                    }
                }
            });
        }

        // One consumer removes singly, one in batches.
        let handles: Vec<_> = (0..2)
            .map(|c| {
                let bag = &bag;
                let taken = &taken;
                scope.spawn(move || {
                    let mut got: Vec<usize> = Vec::new();
                    while taken.load(Ordering::Relaxed) < TOTAL {
                        if c == 0 {
                            match bag.remove() {
                                Some(item) => {
                                    got.push(*item);
                                    taken.fetch_add(1, Ordering::Relaxed);
                                }
                                None => thread::yield_now(),
                            }
                        } else {
                            let mut batch = Vec::new();
                            let n = bag.remove_many(&mut batch, 8);
                            if n == 0 {
                                thread::yield_now();
                                continue;
                            }
                            got.extend(batch.iter().map(|&&v| v));
                            taken.fetch_add(n, Ordering::Relaxed);
                        }
                    }
                    got
                })
            })
            .collect();

        let mut all = Vec::with_capacity(TOTAL);
        for h in handles {
            all.extend(h.join().unwrap());
        }
        all
    });

    assert_eq!(all.len(), TOTAL);
    all.sort_unstable();
    all.dedup();
    assert_eq!(all.len(), TOTAL, "item lost or duplicated");
}
