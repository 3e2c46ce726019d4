//! The heap-growth collaborator.
//!
//! The allocator core never talks to the operating system directly; it asks
//! a [`HeapSource`] for more bytes at the end of the heap. Keeping this
//! behind a trait means the core can be driven by the real program break on
//! unix, by committed virtual pages on windows, or by a plain in-process
//! arena in tests.

use std::ptr::NonNull;

/// Hands out raw memory extents appended to the end of a single growing
/// heap.
///
/// Implementations must guarantee that consecutive calls return contiguous
/// memory: the extent returned by one call starts exactly where the previous
/// extent ended. The allocator relies on this to overwrite its epilogue
/// sentinel with the header of each newly formatted block.
pub trait HeapSource {
    /// Extends the heap by `len` bytes and returns the address of the first
    /// new byte, or `None` when the system is out of address space. `len` is
    /// always a non-zero multiple of the word size.
    ///
    /// # Safety
    ///
    /// Caller must only use the returned extent for this heap; the
    /// implementation must return memory that is valid for reads and writes
    /// of `len` bytes and word-aligned.
    unsafe fn extend(&mut self, len: usize) -> Option<NonNull<u8>>;
}

/// The platform heap source. On unix it moves the program break with
/// `sbrk`, which is contiguous by definition. On windows there is no break
/// to move, so it reserves one large span of virtual address space up front
/// and commits pages from it incrementally.
///
/// Note that on unix the process allocator may also move the break; a
/// [`SystemBreak`]-backed heap is only sound while it is the sole `brk`
/// user in the process.
#[cfg(unix)]
pub struct SystemBreak;

#[cfg(unix)]
impl SystemBreak {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(unix)]
impl Default for SystemBreak {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
impl HeapSource for SystemBreak {
    unsafe fn extend(&mut self, len: usize) -> Option<NonNull<u8>> {
        use libc::{c_void, intptr_t, sbrk};

        unsafe {
            let addr = sbrk(len as intptr_t);

            if addr == usize::MAX as *mut c_void {
                None
            } else {
                Some(NonNull::new_unchecked(addr).cast::<u8>())
            }
        }
    }
}

/// See the unix variant. Reserves [`RESERVED_SPAN`] bytes of address space
/// on first use and commits `len` more of it per call, which keeps extents
/// contiguous the same way a moving break does.
#[cfg(windows)]
pub struct SystemBreak {
    base: *mut std::os::raw::c_void,
    committed: usize,
}

/// Address space reserved up front on windows. Reserving is cheap, only
/// committed pages consume memory.
#[cfg(windows)]
const RESERVED_SPAN: usize = 1 << 30;

#[cfg(windows)]
impl SystemBreak {
    pub fn new() -> Self {
        Self {
            base: std::ptr::null_mut(),
            committed: 0,
        }
    }
}

#[cfg(windows)]
impl Default for SystemBreak {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(windows)]
impl HeapSource for SystemBreak {
    unsafe fn extend(&mut self, len: usize) -> Option<NonNull<u8>> {
        use std::os::raw::c_void;
        use windows::Win32::System::Memory;

        unsafe {
            if self.base.is_null() {
                let base = Memory::VirtualAlloc(
                    None,
                    RESERVED_SPAN,
                    Memory::MEM_RESERVE,
                    Memory::PAGE_NOACCESS,
                );

                if base.is_null() {
                    return None;
                }

                self.base = base;
            }

            if self.committed + len > RESERVED_SPAN {
                return None;
            }

            let next = self.base.add(self.committed) as *const c_void;
            let addr = Memory::VirtualAlloc(
                Some(next),
                len,
                Memory::MEM_COMMIT,
                Memory::PAGE_READWRITE,
            );

            if addr.is_null() {
                return None;
            }

            self.committed += len;

            Some(NonNull::new_unchecked(addr.cast::<u8>()))
        }
    }
}
