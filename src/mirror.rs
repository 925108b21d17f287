//! Single-writer / many-reader snapshot mirror.
//!
//! A mirror holds one image. A single thread updates it; any number of
//! threads read it. The `before`/`after` counter pair is a seqlock over
//! the copy: quiescent means `before == after`, a write in flight means
//! `before == after + 1`, and both counters only grow. Writes cost one
//! fetch-add plus one CAS; reads cost two loads per attempt and finish in
//! at most two attempts under the single-writer contract.

use std::cell::UnsafeCell;
use std::ptr;
use std::sync::atomic::{AtomicU64, Ordering, fence};

use crossbeam_utils::CachePadded;

/// Something that can overwrite itself from another instance of its type.
///
/// This is the mirror's only requirement on payloads. Implementations must
/// copy field by field and nothing else: while [`Mirror::read`] runs, the
/// source may be overwritten mid-copy, and the mirror detects and discards
/// such snapshots afterwards. Do not validate, hash, or take references
/// into the source beyond the duration of the call.
pub trait Image {
    /// Updates this instance from `other`.
    fn mirror_from(&mut self, other: &Self);
}

/// A mirror containing a single image, updated by one thread and read by
/// many. Fully wait-free on both sides.
pub struct Mirror<T> {
    before: CachePadded<AtomicU64>,
    after: CachePadded<AtomicU64>,
    image: UnsafeCell<T>,
}

// SAFETY: the backing image is mutated only by the (unique) writing thread
// between the `before` increment and the `after` CAS; readers take shared
// references and discard any copy that overlapped a write, detected via
// the counter pair. Writing from any thread needs `T: Send`, concurrent
// shared reads need `T: Sync`.
unsafe impl<T: Send + Sync> Sync for Mirror<T> {}

impl<T: Image> Mirror<T> {
    /// Creates a mirror that uses `image` as its backing storage.
    pub fn new(image: T) -> Self {
        Mirror {
            before: CachePadded::new(AtomicU64::new(0)),
            after: CachePadded::new(AtomicU64::new(0)),
            image: UnsafeCell::new(image),
        }
    }

    /// Updates the image stored in this mirror from `from`.
    ///
    /// Only one thread may write. The contract is checked: a second
    /// concurrent writer trips the revision CAS and panics.
    ///
    /// # Panics
    ///
    /// If a concurrent write is detected, or if `from` is the mirror's own
    /// backing image (possible only by defeating the type system, but
    /// checked because recovery is impossible).
    pub fn write(&self, from: &T) {
        assert!(
            !ptr::eq(from, self.image.get()),
            "a mirror cannot be written from its own backing image"
        );
        // The acquire half pins the copy below after this increment; the
        // release half publishes "write in flight" before it.
        let b = self.before.fetch_add(1, Ordering::AcqRel);
        // SAFETY: single-writer contract; concurrent readers discard any
        // snapshot overlapping this mutation.
        unsafe { (*self.image.get()).mirror_from(from) };
        if self
            .after
            .compare_exchange(b, b + 1, Ordering::Release, Ordering::Relaxed)
            .is_err()
        {
            panic!("mirror revision skew: a second thread is writing");
        }
    }

    /// Reads the mirror's contents into `to`.
    ///
    /// Safe from any number of threads. On return, `to` holds the image as
    /// published by some completed write (or the initial image) — never a
    /// mixture of two writes.
    pub fn read(&self, to: &mut T) {
        loop {
            let rev = self.after.load(Ordering::Acquire);
            // SAFETY: may race the writer's copy; the revalidation below
            // rejects any snapshot that overlapped a write.
            to.mirror_from(unsafe { &*self.image.get() });
            // Order the copy's loads before the revalidation load.
            fence(Ordering::Acquire);
            if self.before.load(Ordering::Acquire) == rev {
                return;
            }
        }
    }

    /// Consumes the mirror and returns its backing image.
    pub fn into_inner(self) -> T {
        self.image.into_inner()
    }
}
