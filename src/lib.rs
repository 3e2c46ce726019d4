//! A boundary-tag memory allocator over a single contiguous, growable heap.
//!
//! The heap is a sequence of variable-size blocks. Every block carries a
//! header *and* a footer word, each packing `(size, allocated_bit)`, so both
//! physical neighbors of any block can be reached in O(1): the next block
//! starts `size` bytes after the current header, and the previous block's
//! footer sits immediately before the current header.
//!
//! ```text
//!  heap base                                                       break
//!  |                                                                   |
//!  v                                                                   v
//!  +-----+----------+----------+--------------------------+-----------+
//!  | pad | prologue | prologue |          blocks          | epilogue  |
//!  |     |  header  |  footer  |           ...            |  header   |
//!  +-----+----------+----------+--------------------------+-----------+
//!
//!  one block:
//!  +----------+---------------------------------------+----------+
//!  |  header  |                payload                |  footer  |
//!  | size | a |   (next/prev link words while free)   | size | a |
//!  +----------+---------------------------------------+----------+
//! ```
//!
//! The prologue and epilogue are zero-payload "allocated" sentinels, so the
//! coalescer sees an allocated neighbor at both heap ends and never needs a
//! bounds check.
//!
//! On top of the physical layout there is an explicit doubly linked free
//! list: every *free* block stores `next`/`prev` link words in the first two
//! words of its payload. Allocation walks that list (first-fit), not the
//! physical block chain. See [`crate::freelist`].
//!
//! New memory comes from a [`HeapSource`], a collaborator that appends raw
//! extents to the end of the heap ([`SystemBreak`] moves the program break
//! on unix and commits reserved pages on windows). The heap only grows;
//! freed blocks are coalesced with their physical neighbors and reused.
//!
//! The allocator is single-caller by design: every operation takes
//! `&mut self` and there is no internal locking, so it does not implement
//! `GlobalAlloc`. Wrapping [`Allocator`] in a `Mutex` would be the first
//! step of a concurrent port.

mod allocator;
mod block;
mod freelist;
mod source;
mod utils;

pub use allocator::{Allocator, OutOfMemory};
pub use source::{HeapSource, SystemBreak};
