//! Unbounded lock-free LIFO object pool.
//!
//! The pool is an inverted list: one atomic `head` reference and an
//! intrusive link inside every [`Wrapper`]. Both `acquire` and `release`
//! are a single CAS on `head`; a batch release links its chain privately
//! and still spends only one CAS.
//!
//! The pool never owns wrapper memory. Callers keep their wrappers alive
//! (an arena, a `Vec`, stack frames) and lend them to the pool, which is
//! what makes the classic Treiber next-read safe without any reclamation
//! scheme: a stale pointer always refers to live, caller-owned memory.

use std::cell::Cell;
use std::marker::PhantomData;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

use crossbeam_utils::{Backoff, CachePadded};

/// A pooled item: a payload plus the intrusive link the pool threads
/// through it.
pub struct Wrapper<T> {
    item: T,
    /// Owned by the pool while the wrapper is linked; meaningless (and
    /// deliberately inaccessible) while the wrapper is detached.
    next: AtomicPtr<Wrapper<T>>,
}

impl<T> Wrapper<T> {
    /// Wraps a payload so it can be pooled.
    pub fn new(item: T) -> Self {
        Wrapper {
            item,
            next: AtomicPtr::new(ptr::null_mut()),
        }
    }

    /// The wrapped payload.
    #[inline]
    pub fn item(&self) -> &T {
        &self.item
    }

    /// Mutable access to the payload. Requires exclusive ownership of the
    /// wrapper, so it cannot be called while the wrapper is lent to a pool.
    #[inline]
    pub fn item_mut(&mut self) -> &mut T {
        &mut self.item
    }

    /// Unwraps the payload.
    pub fn into_item(self) -> T {
        self.item
    }
}

/// An atomic pool of objects.
///
/// The pool has no capacity limit and starts empty; load it by releasing
/// wrappers into it. `acquire` and `release` are lock-free: a failed CAS
/// always means another thread completed its own operation.
///
/// A wrapper is owned either by the pool (linked) or by the caller that
/// acquired it (detached), never both. Releasing a wrapper that is already
/// linked corrupts the list; a correct caller releases a wrapper only after
/// `acquire` has handed it back.
pub struct Pool<'a, T> {
    head: CachePadded<AtomicPtr<Wrapper<T>>>,
    // Wrappers flow in and out at exactly `'a`; keep it invariant.
    _marker: PhantomData<Cell<&'a Wrapper<T>>>,
}

// SAFETY: the pool only ever hands out `&'a Wrapper<T>`, so crossing
// threads shares the wrapper (and its payload) by reference. The head CAS
// orders all link traffic.
unsafe impl<T: Sync> Send for Pool<'_, T> {}
unsafe impl<T: Sync> Sync for Pool<'_, T> {}

impl<'a, T> Pool<'a, T> {
    /// Creates an empty pool.
    pub fn new() -> Self {
        Pool {
            head: CachePadded::new(AtomicPtr::new(ptr::null_mut())),
            _marker: PhantomData,
        }
    }

    /// Takes an arbitrary wrapper out of the pool, or `None` if it is
    /// empty.
    pub fn acquire(&self) -> Option<&'a Wrapper<T>> {
        let backoff = Backoff::new();
        loop {
            let head = self.head.load(Ordering::Acquire);
            if head.is_null() {
                return None;
            }
            // SAFETY: non-null head pointers always come from `&'a`
            // references handed to release, so the memory is live for `'a`
            // even if another thread pops the wrapper first.
            let next = unsafe { (*head).next.load(Ordering::Acquire) };
            if self
                .head
                .compare_exchange(head, next, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return Some(unsafe { &*head });
            }
            backoff.spin();
        }
    }

    /// Stores or returns a wrapper to the pool.
    ///
    /// The caller must hold the wrapper exclusively: it came from
    /// [`acquire`](Pool::acquire) or was never linked.
    pub fn release(&self, wrapper: &'a Wrapper<T>) {
        let ptr = wrapper as *const Wrapper<T> as *mut Wrapper<T>;
        let backoff = Backoff::new();
        loop {
            let head = self.head.load(Ordering::Acquire);
            wrapper.next.store(head, Ordering::Relaxed);
            if self
                .head
                .compare_exchange(head, ptr, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return;
            }
            backoff.spin();
        }
    }

    /// Releases a batch of wrappers with a single CAS.
    ///
    /// Equivalent to releasing each element of `items` in order, front to
    /// back, but the chain is linked privately first and spliced onto the
    /// list in one step. The last element of the batch receives the prior
    /// head as its link.
    pub fn release_many(&self, items: &[&'a Wrapper<T>]) {
        let [first, .., last] = items else {
            if let [only] = items {
                self.release(*only);
            }
            return;
        };
        for pair in items.windows(2) {
            let next = pair[1] as *const Wrapper<T> as *mut Wrapper<T>;
            pair[0].next.store(next, Ordering::Relaxed);
        }

        let first = *first as *const Wrapper<T> as *mut Wrapper<T>;
        let backoff = Backoff::new();
        loop {
            let head = self.head.load(Ordering::Acquire);
            last.next.store(head, Ordering::Relaxed);
            if self
                .head
                .compare_exchange(head, first, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return;
            }
            backoff.spin();
        }
    }
}

impl<T> Default for Pool<'_, T> {
    fn default() -> Self {
        Self::new()
    }
}
