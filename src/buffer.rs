//! Bounded MPMC byte FIFO with all three cursors packed in one word.
//!
//! The buffer keeps `read <= written <= claimed <= capacity` as absolute,
//! non-wrapping offsets into a flat byte array, each `k + 1` bits wide
//! inside a single `AtomicU64` (capacity is `2^k`). Producers claim space
//! with one CAS, copy, then publish with a second CAS; publishes happen in
//! claim order, so bytes become visible exactly as they were claimed even
//! when the physical copies race. A consumer drains the whole contiguous
//! `[read, written)` span at once and resets the word to zero when the
//! buffer runs dry — the only moment any cursor moves backward.
//!
//! With a single producer the buffer is wait-free; with several, a
//! producer waits only for earlier claimants to publish, signalled through
//! an optional [`WaitListener`]. Consumers never wait.

use std::cell::UnsafeCell;
use std::ptr;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_utils::{Backoff, CachePadded};

/// Largest accepted size exponent.
///
/// Three `k + 1`-bit cursors have to fit the 64-bit state word, which
/// bounds `k` at 20 (a 1 MiB buffer).
pub const MAX_SIZE_POW2: u32 = 20;

/// Hook invoked whenever a producer must wait for an earlier claimant to
/// publish.
///
/// The listener is an abstraction boundary, not a thread primitive: it may
/// be called from any thread and must side-effect only the caller (yield,
/// back off, park — whatever the caller wants to do with the stall).
pub trait WaitListener {
    /// Called once per wait iteration.
    fn on_wait(&self);
}

/// The reference listener: yields the current thread on every wait.
pub struct YieldingWait;

impl WaitListener for YieldingWait {
    fn on_wait(&self) {
        std::thread::yield_now();
    }
}

/// A bounded byte buffer safe for any number of producers and consumers.
pub struct Buffer {
    state: CachePadded<AtomicU64>,
    data: Box<[UnsafeCell<u8>]>,
    /// Per-cursor field width and shift: `size_pow2 + 1`.
    shift: u32,
    mask: u64,
}

// SAFETY: all cross-thread access to `data` is either disjoint or ordered
// through `state`: a producer touches only its claimed span, which sits
// above `written` until its own publish CAS, and a consumer reads only at
// or below `written`. The one racy case — a consumer re-reading after a
// concurrent drain-and-refill — is discarded when its CAS fails.
unsafe impl Send for Buffer {}
unsafe impl Sync for Buffer {}

impl Buffer {
    /// Creates a buffer of `2^size_pow2` bytes.
    ///
    /// # Panics
    ///
    /// If `size_pow2 > MAX_SIZE_POW2`. This is a programmer error, not a
    /// recoverable condition.
    pub fn new(size_pow2: u32) -> Buffer {
        assert!(
            size_pow2 <= MAX_SIZE_POW2,
            "buffer size exponent {size_pow2} exceeds {MAX_SIZE_POW2}"
        );
        let capacity = 1usize << size_pow2;
        let data = (0..capacity).map(|_| UnsafeCell::new(0)).collect();
        Buffer {
            state: CachePadded::new(AtomicU64::new(0)),
            data,
            shift: size_pow2 + 1,
            mask: (1u64 << (size_pow2 + 1)) - 1,
        }
    }

    /// The buffer's capacity in bytes.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    #[inline]
    fn decode(&self, s: u64) -> (usize, usize, usize) {
        let read = (s & self.mask) as usize;
        let claimed = ((s >> self.shift) & self.mask) as usize;
        let written = ((s >> (2 * self.shift)) & self.mask) as usize;
        debug_assert!(read <= written && written <= claimed && claimed <= self.data.len());
        (read, written, claimed)
    }

    #[inline]
    fn encode(&self, read: usize, written: usize, claimed: usize) -> u64 {
        (read as u64) | ((claimed as u64) << self.shift) | ((written as u64) << (2 * self.shift))
    }

    #[inline]
    fn data_ptr(&self) -> *mut u8 {
        // UnsafeCell<u8> has the layout of u8.
        self.data.as_ptr() as *mut u8
    }

    /// Copies bytes from `src` into the buffer, busy-spinning if it has to
    /// wait for an earlier claimant.
    ///
    /// Returns how many bytes were copied: `src.len()` when everything
    /// fit, less when the buffer filled up mid-claim, and `0` when it was
    /// already full.
    pub fn put(&self, src: &[u8]) -> usize {
        self.put_inner(src, None)
    }

    /// Like [`put`](Buffer::put), but notifies `listener` on every
    /// iteration spent waiting for an earlier claimant to publish.
    pub fn put_with(&self, src: &[u8], listener: &dyn WaitListener) -> usize {
        self.put_inner(src, Some(listener))
    }

    fn put_inner(&self, src: &[u8], listener: Option<&dyn WaitListener>) -> usize {
        if src.is_empty() {
            return 0;
        }
        let capacity = self.data.len();
        let backoff = Backoff::new();

        // Claim phase: reserve [start, start + len) by advancing `claimed`.
        let (start, len) = loop {
            let s = self.state.load(Ordering::Acquire);
            let (read, written, claimed) = self.decode(s);
            if claimed == capacity {
                return 0;
            }
            let end = capacity.min(claimed + src.len());
            let next = self.encode(read, written, end);
            if self
                .state
                .compare_exchange(s, next, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                break (claimed, end - claimed);
            }
            backoff.spin();
        };

        // Write phase: earlier claimants publish first, so bytes appear in
        // claim order no matter how the copies interleave.
        loop {
            let s = self.state.load(Ordering::Acquire);
            let (read, written, claimed) = self.decode(s);
            if written < start {
                match listener {
                    Some(l) => l.on_wait(),
                    None => std::hint::spin_loop(),
                }
                continue;
            }
            debug_assert_eq!(written, start);
            // SAFETY: [start, start + len) is this producer's claim and
            // sits above `written`; nothing else touches it until the CAS
            // below publishes it.
            unsafe {
                ptr::copy_nonoverlapping(src.as_ptr(), self.data_ptr().add(start), len);
            }
            let next = self.encode(read, written + len, claimed);
            if self
                .state
                .compare_exchange(s, next, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return len;
            }
        }
    }

    /// Drains every written byte into `dest` and returns the count, `0`
    /// when the buffer is empty.
    ///
    /// # Panics
    ///
    /// If `dest` cannot hold the drained span. Any destination of
    /// [`capacity`](Buffer::capacity) bytes always fits.
    pub fn get(&self, dest: &mut [u8]) -> usize {
        let backoff = Backoff::new();
        loop {
            let s = self.state.load(Ordering::Acquire);
            let (read, written, claimed) = self.decode(s);
            if read == written {
                return 0;
            }
            let len = written - read;
            // SAFETY: [read, written) is published. The copy can race a
            // producer refilling after a concurrent consumer already drained
            // and reset the buffer, but that snapshot fails the CAS below
            // and is thrown away.
            unsafe {
                ptr::copy_nonoverlapping(self.data_ptr().add(read), dest[..len].as_mut_ptr(), len);
            }
            let next = if written == claimed {
                // Fully drained: reset all three cursors.
                0
            } else {
                self.encode(written, written, claimed)
            };
            if self
                .state
                .compare_exchange(s, next, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return len;
            }
            backoff.spin();
        }
    }
}
