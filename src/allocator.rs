//! The allocator core.
//!
//! [`Allocator`] owns the free list and the heap bounds and implements the
//! three public operations on top of the boundary-tag layout described in
//! [`crate::block`]:
//!
//! - [`Allocator::allocate`]: first-fit search over the free list, growing
//!   the heap through the [`HeapSource`] when nothing fits, then splitting
//!   the chosen block if the leftover can stand on its own.
//! - [`Allocator::free`]: flips the tags, merges with free physical
//!   neighbors and puts the surviving block back on the free list.
//! - [`Allocator::reallocate`]: allocate-copy-free.
//!
//! One convention keeps the free list duplicate-free across all paths:
//! `coalesce` never inserts. It only *removes* the neighbors it absorbs and
//! reports which block survived; whoever called it (`free` or
//! `extend_heap`) inserts that survivor exactly once.

use std::{cmp, fmt, ptr::NonNull};

use crate::{
    block::{ALIGNMENT, BLOCK_OVERHEAD, BlockPtr, MIN_BLOCK_SIZE, WORD},
    freelist::FreeList,
    source::HeapSource,
    utils::align,
};

/// Bytes requested from the source per extension, unless a single
/// allocation needs more.
const CHUNK_SIZE: usize = 1 << 12;

/// The heap source refused to grow the heap. Allocations that were already
/// handed out remain valid; only the requesting operation fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutOfMemory;

impl fmt::Display for OutOfMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("heap source could not supply more memory")
    }
}

impl std::error::Error for OutOfMemory {}

/// A boundary-tag allocator over one contiguous heap supplied by `S`.
///
/// All heap state lives in this struct; there are no globals. Operations
/// take `&mut self`, which is also what makes the single-caller contract
/// explicit in the API.
pub struct Allocator<S: HeapSource> {
    source: S,
    free_list: FreeList,
    /// The prologue sentinel, start of the physical block chain.
    prologue: BlockPtr,
}

impl<S: HeapSource> Allocator<S> {
    /// Initializes an empty heap and seeds it with one [`CHUNK_SIZE`] free
    /// block.
    ///
    /// The initial extent is four words: an alignment padding word, the
    /// prologue header and footer, and the epilogue header. Prologue and
    /// epilogue are zero-payload blocks permanently marked allocated, so
    /// coalescing at either end of the heap sees an allocated neighbor
    /// instead of falling off the heap.
    pub fn new(mut source: S) -> Result<Self, OutOfMemory> {
        let base = unsafe { source.extend(4 * WORD) }.ok_or(OutOfMemory)?;

        let prologue = unsafe {
            // Padding word, so the first payload after the sentinels lands
            // on a double-word boundary.
            base.as_ptr().cast::<usize>().write(0);

            let payload = NonNull::new_unchecked(base.as_ptr().add(2 * WORD));
            let prologue = BlockPtr::from_payload(payload);
            prologue.set(BLOCK_OVERHEAD, true);
            prologue.next_physical().set_header(0, true);

            prologue
        };

        let mut allocator = Self {
            source,
            free_list: FreeList::new(),
            prologue,
        };

        allocator.extend_heap(CHUNK_SIZE)?;

        Ok(allocator)
    }

    /// Returns the payload address of a block with room for `size` bytes,
    /// or `None` when `size == 0` or the heap cannot grow any further.
    ///
    /// A failed allocation leaves the heap untouched; everything allocated
    /// before it stays valid.
    pub fn allocate(&mut self, size: usize) -> Option<NonNull<u8>> {
        if size == 0 {
            return None;
        }

        // A request too large to even tag fails like any other request the
        // heap cannot satisfy.
        let asize = adjusted_size(size)?;

        let block = match unsafe { self.free_list.find_fit(asize) } {
            Some(block) => block,
            None => self.extend_heap(cmp::max(asize, CHUNK_SIZE)).ok()?,
        };

        Some(unsafe { self.place(block, asize) })
    }

    /// Returns `ptr`'s block to the free list, merging it with any free
    /// physical neighbor.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by [`Allocator::allocate`] or
    /// [`Allocator::reallocate`] on this allocator and not freed since.
    /// There is no validation layer: a double free or a foreign pointer
    /// corrupts the heap.
    pub unsafe fn free(&mut self, ptr: NonNull<u8>) {
        unsafe {
            let block = BlockPtr::from_payload(ptr);
            block.set(block.size(), false);

            let merged = self.coalesce(block);
            self.free_list.insert(merged);
        }
    }

    /// Resizes the allocation at `ptr` to `new_size` bytes, moving it.
    ///
    /// `None` behaves as [`Allocator::allocate`], `new_size == 0` behaves as
    /// [`Allocator::free`] and returns `None`. Otherwise a fresh block is
    /// allocated, `min(new_size, old payload size)` bytes are copied over
    /// and the old block is freed. The old block is only freed after the
    /// new one exists, so running out of memory leaves it intact.
    ///
    /// # Safety
    ///
    /// Same contract as [`Allocator::free`] for a non-`None` `ptr`.
    pub unsafe fn reallocate(
        &mut self,
        ptr: Option<NonNull<u8>>,
        new_size: usize,
    ) -> Option<NonNull<u8>> {
        let Some(old) = ptr else {
            return self.allocate(new_size);
        };

        if new_size == 0 {
            unsafe { self.free(old) };
            return None;
        }

        let new = self.allocate(new_size)?;

        unsafe {
            let count = cmp::min(new_size, BlockPtr::from_payload(old).payload_size());
            std::ptr::copy_nonoverlapping(old.as_ptr(), new.as_ptr(), count);
            self.free(old);
        }

        Some(new)
    }

    /// Grows the heap by at least `bytes` and formats the new extent as one
    /// free block, merging it with the previous trailing block if that one
    /// was free. The surviving block is inserted into the free list and
    /// returned ready for placement.
    fn extend_heap(&mut self, bytes: usize) -> Result<BlockPtr, OutOfMemory> {
        // An even number of words keeps every extent double-word sized.
        let size = align(bytes, 2 * WORD).ok_or(OutOfMemory)?;
        let addr = unsafe { self.source.extend(size) }.ok_or(OutOfMemory)?;

        unsafe {
            // The word right before the new extent is the old epilogue
            // header, which now becomes the new block's header; the new
            // epilogue takes the last word of the extent.
            let block = BlockPtr::from_payload(addr);
            block.set(size, false);
            block.next_physical().set_header(0, true);

            let merged = self.coalesce(block);
            self.free_list.insert(merged);

            Ok(merged)
        }
    }

    /// Carves an allocated block of `asize` bytes out of the free block
    /// `block` (which must be on the free list) and returns its payload.
    ///
    /// When the leftover can hold a minimum block it becomes a new free
    /// block taking over `block`'s position on the list; otherwise the
    /// whole block is handed out and its list entry removed.
    unsafe fn place(&mut self, block: BlockPtr, asize: usize) -> NonNull<u8> {
        unsafe {
            let csize = block.size();

            if csize - asize >= MIN_BLOCK_SIZE {
                block.set(asize, true);

                let remainder = block.next_physical();
                remainder.set(csize - asize, false);

                // The allocated prefix keeps the low address; the remainder
                // inherits the free-list slot. The link words still live in
                // the prefix payload at this point, `replace` reads them
                // before they are handed to the caller.
                self.free_list.replace(block, remainder);
            } else {
                self.free_list.remove(block);
                block.set(csize, true);
            }

            block.payload()
        }
    }

    /// Merges `block` with whichever physical neighbors are free and
    /// returns the surviving block (which starts at the previous neighbor's
    /// address when that side merged).
    ///
    /// Neighbors that get absorbed are removed from the free list; the
    /// surviving block is never inserted here, that is the caller's job.
    unsafe fn coalesce(&mut self, block: BlockPtr) -> BlockPtr {
        unsafe {
            let prev = block.prev_physical();
            let next = block.next_physical();
            let size = block.size();

            match (prev.is_allocated(), next.is_allocated()) {
                // Both neighbors in use, nothing to merge.
                (true, true) => block,

                (true, false) => {
                    self.free_list.remove(next);
                    block.set(size + next.size(), false);
                    block
                }

                (false, true) => {
                    self.free_list.remove(prev);
                    prev.set(prev.size() + size, false);
                    prev
                }

                (false, false) => {
                    self.free_list.remove(prev);
                    self.free_list.remove(next);
                    prev.set(prev.size() + size + next.size(), false);
                    prev
                }
            }
        }
    }
}

/// Rounds a requested payload size up to a legal block size: tag overhead
/// added, word aligned, and never below [`MIN_BLOCK_SIZE`] so the block can
/// hold the free-list links once it is freed again.
///
/// `None` when the request is so large that the total would wrap; handing
/// back a wrapped size would mean handing back a too-small block.
fn adjusted_size(size: usize) -> Option<usize> {
    let padded = align(size.checked_add(BLOCK_OVERHEAD)?, ALIGNMENT)?;
    Some(cmp::max(padded, MIN_BLOCK_SIZE))
}

/// Physical block map: address, total size and state of every block between
/// the sentinels.
impl<S: HeapSource> fmt::Debug for Allocator<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut blocks = f.debug_list();

        unsafe {
            let mut block = self.prologue.next_physical();
            while block.size() != 0 {
                blocks.entry(&format_args!(
                    "{:p}: {} bytes, {}",
                    block.payload().as_ptr(),
                    block.size(),
                    if block.is_allocated() { "allocated" } else { "free" },
                ));
                block = block.next_physical();
            }
        }

        blocks.finish()
    }
}
