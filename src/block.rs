//! Boundary-tag block layout.
//!
//! Instead of a header struct, each block is described by two tag words: a
//! header immediately before the payload and a footer occupying the last
//! word of the block. Both pack the total block size together with the
//! allocated bit. Sizes are always multiples of [`ALIGNMENT`], so the low
//! bits of a tag word are free for the flag:
//!
//! ```text
//! +--------------------+ <- header, at payload - WORD
//! |  size | allocated  |
//! +--------------------+ <- payload (what `allocate` hands out)
//! |  next free link    |    \
//! +--------------------+     } only meaningful while the block is free;
//! |  prev free link    |    /  overwritten by user data once allocated
//! +--------------------+
//! |        ...         |
//! +--------------------+ <- footer, at payload + size - 2 * WORD
//! |  size | allocated  |
//! +--------------------+
//! ```
//!
//! Duplicating the size in the footer is what makes backward traversal
//! possible: the word right before any header is the previous block's
//! footer. Every block must stay large enough to hold the two link words
//! when it is eventually freed, hence [`MIN_BLOCK_SIZE`].
//!
//! [`BlockPtr`] is a copyable view over one block, identified by its payload
//! address like the original pointer-based design. All tag, link and
//! neighbor arithmetic lives here so the allocator itself never touches a
//! raw offset.

use std::ptr::NonNull;

/// Word size in bytes. Tags and free-list links are one word each.
///
/// The block layout fixes the alignment granularity at 8 bytes: a header is
/// one word and payloads start one word after the block, so the whole
/// scheme only lines up when words are 8 bytes. The crate therefore
/// requires a 64-bit target, enforced below.
pub(crate) const WORD: usize = std::mem::size_of::<usize>();

const _: () = assert!(WORD == 8, "this allocator requires a 64-bit target");

/// Block sizes and payload addresses are multiples of this.
pub(crate) const ALIGNMENT: usize = WORD;

/// Bytes of bookkeeping per block: one header word plus one footer word.
pub(crate) const BLOCK_OVERHEAD: usize = 2 * WORD;

/// Smallest block we ever create: header, footer and the two free-list
/// link words that move into the payload once the block is freed. Splitting
/// never leaves a remainder below this.
pub(crate) const MIN_BLOCK_SIZE: usize = 4 * WORD;

const ALLOCATED_BIT: usize = 1;
const SIZE_MASK: usize = !(ALIGNMENT - 1);

fn pack(size: usize, allocated: bool) -> usize {
    size | allocated as usize
}

unsafe fn load(addr: *mut u8) -> usize {
    unsafe { addr.cast::<usize>().read() }
}

unsafe fn store(addr: *mut u8, value: usize) {
    unsafe { addr.cast::<usize>().write(value) }
}

/// View over a single heap block, addressed by its payload start.
///
/// This is a plain address wrapper, not an owner: copying it is copying a
/// pointer. Every accessor is unsafe because it dereferences the underlying
/// tag words; callers must only build a `BlockPtr` from addresses that are
/// formatted as blocks (the allocator guarantees this for everything between
/// the prologue and the epilogue).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) struct BlockPtr {
    payload: NonNull<u8>,
}

impl BlockPtr {
    /// Reinterprets `payload` as the content address of a block, i.e. the
    /// address right after a header word. This is also how `free` recovers
    /// the block from a user pointer.
    pub fn from_payload(payload: NonNull<u8>) -> Self {
        Self { payload }
    }

    /// Address handed out to the caller on allocation.
    pub fn payload(self) -> NonNull<u8> {
        self.payload
    }

    fn header(self) -> *mut u8 {
        unsafe { self.payload.as_ptr().sub(WORD) }
    }

    unsafe fn footer(self) -> *mut u8 {
        unsafe { self.payload.as_ptr().add(self.size() - BLOCK_OVERHEAD) }
    }

    /// Total block size in bytes, tags included.
    pub unsafe fn size(self) -> usize {
        unsafe { load(self.header()) & SIZE_MASK }
    }

    /// Bytes usable by the caller: total size minus the two tag words.
    pub unsafe fn payload_size(self) -> usize {
        unsafe { self.size() - BLOCK_OVERHEAD }
    }

    pub unsafe fn is_allocated(self) -> bool {
        unsafe { load(self.header()) & ALLOCATED_BIT != 0 }
    }

    /// Rewrites both tags of this block. The header goes first because the
    /// footer position is derived from the new size.
    pub unsafe fn set(self, size: usize, allocated: bool) {
        unsafe {
            store(self.header(), pack(size, allocated));
            store(self.footer(), pack(size, allocated));
        }
    }

    /// Writes only the header tag. Used for the epilogue sentinel, which is
    /// a zero-payload block with no footer.
    pub unsafe fn set_header(self, size: usize, allocated: bool) {
        unsafe { store(self.header(), pack(size, allocated)) }
    }

    /// The physically following block (the epilogue header terminates the
    /// walk with size 0).
    pub unsafe fn next_physical(self) -> BlockPtr {
        unsafe {
            let payload = self.payload.as_ptr().add(self.size());
            BlockPtr::from_payload(NonNull::new_unchecked(payload))
        }
    }

    /// The physically preceding block, found through its footer, which is
    /// the word right before this block's header.
    pub unsafe fn prev_physical(self) -> BlockPtr {
        unsafe {
            let prev_footer = self.payload.as_ptr().sub(BLOCK_OVERHEAD);
            let prev_size = load(prev_footer) & SIZE_MASK;
            let payload = self.payload.as_ptr().sub(prev_size);
            BlockPtr::from_payload(NonNull::new_unchecked(payload))
        }
    }

    /// Next block on the free list. Only meaningful while this block is
    /// free: the link lives in the first payload word.
    pub unsafe fn next_free(self) -> Option<BlockPtr> {
        unsafe {
            let link = load(self.payload.as_ptr()) as *mut u8;
            NonNull::new(link).map(BlockPtr::from_payload)
        }
    }

    pub unsafe fn set_next_free(self, link: Option<BlockPtr>) {
        unsafe { store(self.payload.as_ptr(), raw_link(link)) }
    }

    /// Previous block on the free list, stored in the second payload word.
    pub unsafe fn prev_free(self) -> Option<BlockPtr> {
        unsafe {
            let link = load(self.payload.as_ptr().add(WORD)) as *mut u8;
            NonNull::new(link).map(BlockPtr::from_payload)
        }
    }

    pub unsafe fn set_prev_free(self, link: Option<BlockPtr>) {
        unsafe { store(self.payload.as_ptr().add(WORD), raw_link(link)) }
    }

    /// Raw header word, for consistency checks.
    #[cfg(test)]
    pub unsafe fn header_word(self) -> usize {
        unsafe { load(self.header()) }
    }

    /// Raw footer word, for consistency checks.
    #[cfg(test)]
    pub unsafe fn footer_word(self) -> usize {
        unsafe { load(self.footer()) }
    }
}

fn raw_link(link: Option<BlockPtr>) -> usize {
    match link {
        Some(block) => block.payload.as_ptr() as usize,
        None => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Formats a block at word offset `at` of `buf` (the payload starts one
    // word further, leaving room for the header).
    unsafe fn block_at(buf: &mut [usize], at: usize, size: usize, allocated: bool) -> BlockPtr {
        unsafe {
            let payload = buf.as_mut_ptr().add(at + 1).cast::<u8>();
            let block = BlockPtr::from_payload(NonNull::new_unchecked(payload));
            block.set(size, allocated);
            block
        }
    }

    #[test]
    fn tags_agree_after_set() {
        let mut buf = [0usize; 16];
        unsafe {
            let block = block_at(&mut buf, 0, 6 * WORD, false);

            assert_eq!(block.size(), 6 * WORD);
            assert_eq!(block.payload_size(), 4 * WORD);
            assert!(!block.is_allocated());
            assert_eq!(block.header_word(), block.footer_word());

            block.set(6 * WORD, true);
            assert!(block.is_allocated());
            assert_eq!(block.size(), 6 * WORD);
            assert_eq!(block.header_word(), block.footer_word());
        }
    }

    #[test]
    fn physical_neighbors() {
        let mut buf = [0usize; 16];
        unsafe {
            let first = block_at(&mut buf, 0, 4 * WORD, true);
            let second = block_at(&mut buf, 4, 6 * WORD, false);
            let third = block_at(&mut buf, 10, 4 * WORD, true);

            assert_eq!(first.next_physical(), second);
            assert_eq!(second.next_physical(), third);
            assert_eq!(second.prev_physical(), first);
            assert_eq!(third.prev_physical(), second);
        }
    }

    #[test]
    fn free_links_roundtrip() {
        let mut buf = [0usize; 16];
        unsafe {
            let block = block_at(&mut buf, 0, 4 * WORD, false);
            let other = block_at(&mut buf, 4, 4 * WORD, false);

            assert_eq!(block.next_free(), None);
            assert_eq!(block.prev_free(), None);

            block.set_next_free(Some(other));
            block.set_prev_free(Some(other));
            assert_eq!(block.next_free(), Some(other));
            assert_eq!(block.prev_free(), Some(other));

            block.set_next_free(None);
            assert_eq!(block.next_free(), None);
            // The prev link word must not be disturbed by the next link.
            assert_eq!(block.prev_free(), Some(other));
        }
    }

    #[test]
    fn min_block_holds_both_links() {
        assert!(MIN_BLOCK_SIZE >= BLOCK_OVERHEAD + 2 * WORD);
        assert_eq!(MIN_BLOCK_SIZE % ALIGNMENT, 0);
        // The granularity the whole layout is built around.
        assert_eq!(ALIGNMENT, 8);
    }
}
