//! A segregated-fit memory allocator for embedded systems
//!
//! This crate provides a single type called [`Allocator`]. This type implements
//! the [`core::alloc::GlobalAlloc`]-trait, which is required to use the
//! [`alloc`-crate][alloc] on `#![no_std]`-targets.
//!
//! Unlike a simple linear-scan allocator, this one partitions its arena into
//! boundary-tagged blocks and keeps free blocks in one of twelve segregated,
//! size-class free lists. This buys first-fit placement that only has to
//! walk the list it expects to find a fit in (plus a small, bounded number
//! of larger classes), constant-time coalescing of freed neighbors via the
//! header/footer boundary tags, and an in-place growth fast path for
//! `realloc` that avoids copying whenever the next physical block happens to
//! be free and large enough.
//!
//! # Usage
//! The usage is simple: just copy and paste the following code snipped into
//! your binary crate and potentially adjust the number of bytes of the heap
//! (here 4K):
//! ```no_run
//! #[global_allocator]
//! static ALLOCATOR: segfit_alloc::Allocator<4096> = segfit_alloc::Allocator::new();
//!
//! extern crate alloc;
//! ```
//! Afterwards you don't need to interact with the crate or the variable
//! `ALLOCATOR` anymore. Now you can just `use alloc::vec::Vec` or even
//! `use alloc::collections::HashMap`, i.e. every fancy collection which is
//! normally provided by the `std`.
//!
//! The arena is fixed at `N` bytes for the lifetime of the allocator: once
//! committed, memory is never returned to anything outside this crate, and
//! the arena itself never grows past `N` (there is no platform allocator or
//! `mmap` underneath this to ask for more from). Pick `N` with a worst-case
//! calculation plus some backup space, the same way you would size any
//! static buffer.
//!
//! Note to users with things like `MPU`s, `MMU`s, etc.: your device might
//! support things like memory remapping or memory protection with setting
//! read/write/execution rights. This crate _doesn't use_ those features at all!
//! If that is desired, you should take the address of the arena and use that
//! along with the known size `N` to protect the heap memory.
//!
//! [alloc]: https://doc.rust-lang.org/alloc/index.html
#![no_std]

mod raw_allocator;

use core::alloc::{GlobalAlloc, Layout};
use core::ptr::{self, NonNull};
use raw_allocator::{RawAllocator, ALIGNMENT};
use spin::Mutex;

/// The memory allocator for embedded systems.
///
/// This is the core type of this crate: it is an allocator with a predefined
/// heap size. Therefore the heap memory usage is statically limited to an upper
/// value, which also helps to prevent issues with heap/stack-smashes, as the
/// heap is counted to the static memory (e.g. `.data`/`.bss`-sections). Such a
/// smash might still happen though, if the stack pointer grows into the heap,
/// but the heap cannot grow into the stack pointer.
///
/// Its usage is simple: just copy and paste the following in the binary crate
/// you're developing. The memory size of the heap is `4096` or 4K in this
/// example. Adjust that value to your needs.
/// ```no_run
/// #[global_allocator]
/// static ALLOCATOR: segfit_alloc::Allocator<4096> = segfit_alloc::Allocator::new();
/// ```
pub struct Allocator<const N: usize>(Mutex<RawAllocator<N>>);
impl<const N: usize> Allocator<N> {
    /// Create a new [`Allocator`].
    ///
    /// This function is a `const fn`, therefore you can call it directly when
    /// creating the allocator.
    ///
    /// # Panics
    /// This function will panic if `N` is too small to hold a prologue, an
    /// epilogue and at least one minimum-sized block (see
    /// [`RawAllocator::new`]).
    #[must_use = "assign the allocator to a static variable and apply the `#[global_allocator]`-attribute to make it the global allocator"]
    pub const fn new() -> Self {
        Self(Mutex::new(RawAllocator::new()))
    }

    /// Run the structural consistency checker over the current heap state.
    ///
    /// Intended for tests and debugging; asserts every invariant from the
    /// block-layout design and is a no-op outside test/debug builds.
    pub fn checkheap(&self, verbose: bool) {
        self.0.lock().checkheap(verbose);
    }
}
impl<const N: usize> Default for Allocator<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Round `addr` up to the next multiple of `align` (`align` a power of two).
fn align_up(addr: usize, align: usize) -> usize {
    (addr + align - 1) & !(align - 1)
}

unsafe impl<const N: usize> GlobalAlloc for Allocator<N> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.align() <= ALIGNMENT {
            return self
                .0
                .lock()
                .allocate(layout.size())
                .map_or(ptr::null_mut(), NonNull::as_ptr);
        }

        // Over-aligned request: the segregated-fit engine only guarantees
        // `ALIGNMENT`-aligned payloads, so over-allocate enough slack to
        // carve an aligned pointer out of it, and stash the real block's
        // payload pointer one word before the aligned pointer so `dealloc`
        // and `realloc` can recover it.
        let Some(oversized) = over_aligned_request_size(layout) else {
            return ptr::null_mut();
        };
        let mut guard = self.0.lock();
        let Some(base) = guard.allocate(oversized) else {
            return ptr::null_mut();
        };
        drop(guard);

        let base = base.as_ptr();
        let aligned_addr = align_up(base as usize + ALIGNMENT, layout.align());
        let aligned = aligned_addr as *mut u8;
        // SAFETY: `aligned - ALIGNMENT` is within the block we just
        // allocated, since `over_aligned_request_size` reserves room for it.
        unsafe { (aligned.cast::<usize>()).sub(1).write(base as usize) };
        aligned
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        let base = if layout.align() <= ALIGNMENT {
            ptr
        } else {
            // SAFETY: written by `alloc` exactly one word before `ptr` for
            // every over-aligned allocation.
            unsafe { (ptr.cast::<usize>()).sub(1).read() as *mut u8 }
        };
        let Some(base) = NonNull::new(base) else {
            return;
        };
        self.0.lock().free(Some(base));
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        if layout.align() > ALIGNMENT {
            // The in-place fast path below assumes the old and new blocks
            // would both be at the arena's natural alignment; over-aligned
            // requests fall back to the generic alloc + copy + dealloc
            // sequence that `GlobalAlloc::realloc`'s default would run.
            let new_layout = match Layout::from_size_align(new_size, layout.align()) {
                Ok(layout) => layout,
                Err(_) => return ptr::null_mut(),
            };
            // SAFETY: forwarding to this impl's own `alloc`/`dealloc`.
            let new_ptr = unsafe { self.alloc(new_layout) };
            if !new_ptr.is_null() {
                let copy_len = layout.size().min(new_size);
                // SAFETY: both pointers are valid for `copy_len` bytes:
                // `ptr` by the caller's contract, `new_ptr` by `alloc`
                // returning a block of at least `new_size` bytes.
                unsafe {
                    ptr::copy_nonoverlapping(ptr, new_ptr, copy_len);
                    self.dealloc(ptr, layout);
                }
            }
            return new_ptr;
        }

        NonNull::new(ptr).map_or(ptr::null_mut(), |ptr| {
            self.0
                .lock()
                .reallocate(Some(ptr), new_size)
                .map_or(ptr::null_mut(), NonNull::as_ptr)
        })
    }
}

/// The block size to request for an over-aligned layout: enough room for the
/// payload, the worst-case alignment padding, and the one word needed to
/// stash the true payload pointer just before the aligned one.
fn over_aligned_request_size(layout: Layout) -> Option<usize> {
    layout
        .size()
        .checked_add(layout.align())
        .and_then(|n| n.checked_add(ALIGNMENT))
}
