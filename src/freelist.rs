//! Explicit free list.
//!
//! The list tracks exactly the set of currently free blocks, in a doubly
//! linked chain that is completely independent from physical adjacency:
//!
//! ```text
//!                 first                              last
//!                   |                                 |
//!                   v                                 v
//!  +----------+  +------+  +-------+  +------+     +------+  +-------+
//!  | prologue |  | FREE |->| alloc |  | FREE | ... | FREE |  | alloc |
//!  +----------+  +------+  +-------+  +--^---+     +------+  +-------+
//!                   |                    |
//!                   +--------------------+  (next/prev links, not
//!                                            physical neighbors)
//! ```
//!
//! Because the allocator cannot allocate nodes for its own bookkeeping, the
//! `next`/`prev` links are stored inside the payload of each free block
//! (see [`crate::block`]); this struct only owns the `first`/`last` ends.
//!
//! Insertion is at the head, so the most recently freed block is the first
//! candidate the first-fit search sees. A block split keeps the remainder in
//! the position the original block occupied ([`FreeList::replace`]) instead
//! of re-inserting it.

use crate::block::BlockPtr;

pub(crate) struct FreeList {
    first: Option<BlockPtr>,
    last: Option<BlockPtr>,
    len: usize,
}

impl FreeList {
    pub const fn new() -> Self {
        Self {
            first: None,
            last: None,
            len: 0,
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn first(&self) -> Option<BlockPtr> {
        self.first
    }

    #[cfg(test)]
    pub fn last(&self) -> Option<BlockPtr> {
        self.last
    }

    /// Pushes `block` at the head of the list, rewriting its payload link
    /// words. The block must already be marked free and must not be on the
    /// list yet.
    pub unsafe fn insert(&mut self, block: BlockPtr) {
        unsafe {
            block.set_prev_free(None);
            block.set_next_free(self.first);

            match self.first {
                Some(first) => first.set_prev_free(Some(block)),
                None => self.last = Some(block),
            }

            self.first = Some(block);
            self.len += 1;
        }
    }

    /// Unlinks `block`, fixing up whichever of `first`/`last`/neighbor links
    /// pointed at it. The block must currently be on the list.
    pub unsafe fn remove(&mut self, block: BlockPtr) {
        unsafe {
            let next = block.next_free();
            let prev = block.prev_free();

            match prev {
                Some(prev) => prev.set_next_free(next),
                None => self.first = next,
            }

            match next {
                Some(next) => next.set_prev_free(prev),
                None => self.last = prev,
            }

            self.len -= 1;
        }
    }

    /// Substitutes `new` for `old` in the exact list position `old`
    /// occupied. Used when splitting: the remainder inherits the entry of
    /// the block it was carved from. `old`'s link words must still be
    /// intact when this is called.
    pub unsafe fn replace(&mut self, old: BlockPtr, new: BlockPtr) {
        unsafe {
            let next = old.next_free();
            let prev = old.prev_free();

            new.set_next_free(next);
            new.set_prev_free(prev);

            match prev {
                Some(prev) => prev.set_next_free(Some(new)),
                None => self.first = Some(new),
            }

            match next {
                Some(next) => next.set_prev_free(Some(new)),
                None => self.last = Some(new),
            }
        }
    }

    /// First-fit search: the first block whose total size can hold `size`
    /// bytes, walking from `first` via the payload links.
    pub unsafe fn find_fit(&self, size: usize) -> Option<BlockPtr> {
        unsafe {
            let mut current = self.first();

            while let Some(block) = current {
                if block.size() >= size {
                    return Some(block);
                }
                current = block.next_free();
            }

            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::WORD;
    use std::ptr::NonNull;

    // Three fake free blocks of 4, 6 and 8 words formatted in a local
    // buffer. None of them are physically adjacent concerns here; the list
    // does not care.
    fn blocks(buf: &mut [usize; 32]) -> [BlockPtr; 3] {
        let mut at = 0;
        [4, 6, 8].map(|words| {
            let payload = unsafe { buf.as_mut_ptr().add(at + 1).cast::<u8>() };
            let block = BlockPtr::from_payload(NonNull::new(payload).unwrap());
            unsafe { block.set(words * WORD, false) };
            at += words;
            block
        })
    }

    #[test]
    fn new_list_is_empty() {
        let list = FreeList::new();

        assert_eq!(list.len(), 0);
        assert_eq!(list.first(), None);
        assert_eq!(list.last(), None);
        assert_eq!(unsafe { list.find_fit(1) }, None);
    }

    #[test]
    fn insert_pushes_to_head() {
        let mut buf = [0usize; 32];
        let [a, b, c] = blocks(&mut buf);
        let mut list = FreeList::new();

        unsafe {
            list.insert(a);
            assert_eq!(list.first(), Some(a));
            assert_eq!(list.last(), Some(a));

            list.insert(b);
            list.insert(c);

            // Head insertion: most recently freed first.
            assert_eq!(list.first(), Some(c));
            assert_eq!(c.next_free(), Some(b));
            assert_eq!(b.next_free(), Some(a));
            assert_eq!(a.next_free(), None);
            assert_eq!(a.prev_free(), Some(b));
            assert_eq!(list.last(), Some(a));
            assert_eq!(list.len(), 3);
        }
    }

    #[test]
    fn remove_sole_head_tail_and_interior() {
        let mut buf = [0usize; 32];
        let [a, b, c] = blocks(&mut buf);

        // Sole entry.
        let mut list = FreeList::new();
        unsafe {
            list.insert(a);
            list.remove(a);
            assert_eq!(list.len(), 0);
            assert_eq!(list.first(), None);
            assert_eq!(list.last(), None);
        }

        // Interior entry. List is c -> b -> a.
        let mut list = FreeList::new();
        unsafe {
            list.insert(a);
            list.insert(b);
            list.insert(c);

            list.remove(b);
            assert_eq!(c.next_free(), Some(a));
            assert_eq!(a.prev_free(), Some(c));
            assert_eq!(list.len(), 2);

            // Head entry.
            list.remove(c);
            assert_eq!(list.first(), Some(a));
            assert_eq!(a.prev_free(), None);

            // Tail entry (also sole again).
            list.remove(a);
            assert_eq!(list.first(), None);
            assert_eq!(list.last(), None);
        }
    }

    #[test]
    fn remove_tail_of_two() {
        let mut buf = [0usize; 32];
        let [a, b, _] = blocks(&mut buf);
        let mut list = FreeList::new();

        unsafe {
            list.insert(a);
            list.insert(b); // b -> a

            list.remove(a);
            assert_eq!(list.first(), Some(b));
            assert_eq!(list.last(), Some(b));
            assert_eq!(b.next_free(), None);
        }
    }

    #[test]
    fn replace_keeps_position() {
        let mut buf = [0usize; 32];
        let [a, b, c] = blocks(&mut buf);

        // Spare block to swap in.
        let payload = unsafe { buf.as_mut_ptr().add(20).cast::<u8>() };
        let d = BlockPtr::from_payload(NonNull::new(payload).unwrap());
        unsafe { d.set(4 * WORD, false) };

        let mut list = FreeList::new();
        unsafe {
            list.insert(a);
            list.insert(b);
            list.insert(c); // c -> b -> a

            // Interior position.
            list.replace(b, d);
            assert_eq!(c.next_free(), Some(d));
            assert_eq!(d.next_free(), Some(a));
            assert_eq!(a.prev_free(), Some(d));
            assert_eq!(d.prev_free(), Some(c));

            // Head position.
            list.replace(c, b);
            assert_eq!(list.first(), Some(b));
            assert_eq!(d.prev_free(), Some(b));

            // Tail position.
            list.replace(a, c);
            assert_eq!(list.last(), Some(c));
            assert_eq!(d.next_free(), Some(c));
            assert_eq!(c.next_free(), None);
        }
    }

    #[test]
    fn find_fit_is_first_fit() {
        let mut buf = [0usize; 32];
        let [small, medium, large] = blocks(&mut buf); // 4, 6, 8 words
        let mut list = FreeList::new();

        unsafe {
            list.insert(large);
            list.insert(medium);
            list.insert(small); // small -> medium -> large

            // The first adequate block wins even if a later one matches
            // more tightly.
            assert_eq!(list.find_fit(4 * WORD), Some(small));
            assert_eq!(list.find_fit(5 * WORD), Some(medium));
            assert_eq!(list.find_fit(7 * WORD), Some(large));
            assert_eq!(list.find_fit(9 * WORD), None);
        }
    }
}
