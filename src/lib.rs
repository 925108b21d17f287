//! Petek: single-word atomic coordination primitives.
//!
//! Every structure in this crate keeps all of its coordination state in one
//! atomic machine word, so every state transition is a single
//! compare-and-swap on a single location. Payload memory lives beside the
//! word and is only ever touched by the thread that won the relevant CAS.
//!
//! ## Primitives
//!
//! - [`Pool`]: unbounded lock-free LIFO pool of caller-owned wrappers.
//! - [`Mirror`]: single-writer / many-reader snapshot of a typed image.
//! - [`Buffer`]: bounded MPMC byte FIFO with three cursors packed in one word.
//! - [`Bag`]: 32-slot MPMC unordered container with 2-bit per-slot states.
//!
//! No operation blocks. Writers publish by CAS after touching payload
//! memory; readers snapshot-then-revalidate or CAS-then-read. Capacity
//! exhaustion and emptiness are ordinary return values, never errors.
//!
//! ## Example
//!
//! ```rust
//! use petek::Buffer;
//!
//! let buf = Buffer::new(4);
//! assert_eq!(buf.put(&[1, 2, 3]), 3);
//!
//! let mut out = [0u8; 16];
//! assert_eq!(buf.get(&mut out), 3);
//! assert_eq!(&out[..3], &[1, 2, 3]);
//! ```

#![warn(missing_docs)]

mod bag;
mod buffer;
mod mirror;
mod pool;

pub use bag::{Bag, SLOTS};
pub use buffer::{Buffer, MAX_SIZE_POW2, WaitListener, YieldingWait};
pub use mirror::{Image, Mirror};
pub use pool::{Pool, Wrapper};
