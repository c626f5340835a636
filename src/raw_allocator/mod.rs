//! This module provides the raw allocator and its support types.
//!
//! A "raw allocator" is one that gets a request for a specific memory size
//! in bytes but does not need to worry about [`core::alloc::Layout`]
//! alignment beyond the doubleword alignment it always provides; the
//! [`crate::Allocator`] in the crate root handles anything stricter.
//!
//! This is a segregated-fit allocator over an in-band, boundary-tagged
//! block graph: every block carries a header and footer word, a prologue
//! and epilogue bookend the heap, and free blocks are linked into one of
//! [`size_class::CLASSES`] doubly-linked free lists by size class. See the
//! individual submodules for the four tightly-coupled pieces this design is
//! built from.
mod block;
mod buffer;
mod free_list;
mod size_class;

use block::{DWORD, MIN_BLOCK, WORD};
use buffer::Buffer;
use core::ptr::NonNull;
use free_list::FreeLists;
use size_class::CLASSES;

/// Re-exported for [`crate::Allocator`], which needs the doubleword
/// alignment guarantee to decide whether a requested [`core::alloc::Layout`]
/// needs the over-alignment slow path.
pub use block::DWORD as ALIGNMENT;

/// Bytes requested from the arena per heap extension, unless a larger
/// single allocation forces a bigger chunk.
const CHUNK_SIZE: usize = 4096;

/// Round `n` up to the next multiple of [`DWORD`].
const fn round_up_dword(n: usize) -> usize {
    (n + DWORD - 1) & !(DWORD - 1)
}

/// A segregated-fit, boundary-tag allocator over a fixed-size byte arena.
///
/// `N` is the total number of bytes the arena can ever hold; think of it as
/// the upper bound the memory provider's break pointer can reach. The
/// allocator commits this arena incrementally: [`Self::new`] carves out an
/// initial chunk, and [`Self::allocate`] extends further (up to `N`) only
/// when the free lists can't satisfy a request, mirroring a real `sbrk`
/// provider that can always be asked for more but never gives memory back.
pub struct RawAllocator<const N: usize> {
    buffer: Buffer<N>,
    /// Offset of the current epilogue header: the first byte past this
    /// word is uncommitted arena.
    break_offset: usize,
    free_lists: FreeLists<CLASSES>,
}
impl<const N: usize> RawAllocator<N> {
    /// Create a new [`RawAllocator`] and commit its initial chunk.
    ///
    /// # Panics
    /// Panics if `N` is too small to hold the prologue, the epilogue and at
    /// least one minimum-sized block.
    pub const fn new() -> Self {
        const OVERHEAD: usize = DWORD /* prologue */ + WORD /* epilogue */;
        assert!(
            N >= OVERHEAD + MIN_BLOCK,
            "too small heap memory: must fit a prologue, an epilogue and one block"
        );

        let mut buffer = Buffer::new();

        // Prologue: an allocated, minimum-sized sentinel block. Its
        // allocated footer at offset `WORD` is also the "previous block"
        // boundary tag for the first real block, which is what lets
        // coalescing skip the previous-block edge case entirely.
        buffer.write_word_const(0, block::pack(DWORD, true));
        buffer.write_word_const(WORD, block::pack(DWORD, true));

        // Epilogue placeholder right after the prologue; immediately
        // overwritten below by the initial free chunk.
        let first_block_offset = DWORD;
        buffer.write_word_const(first_block_offset, block::pack(0, true));

        let available = N - first_block_offset - WORD;
        let chunk = if available < CHUNK_SIZE { available } else { CHUNK_SIZE };
        let chunk = chunk - (chunk % DWORD);

        buffer.write_word_const(first_block_offset, block::pack(chunk, false));
        buffer.write_word_const(first_block_offset + chunk - WORD, block::pack(chunk, false));
        let break_offset = first_block_offset + chunk;
        buffer.write_word_const(break_offset, block::pack(0, true));

        // Seed the free-list node words (no neighbors yet: this is the
        // very first free block the allocator has ever seen) and the list
        // head directly, since `FreeLists::insert` is not itself callable
        // from a `const fn` (it goes through the non-const word accessors).
        buffer.write_word_const(first_block_offset + WORD, 0);
        buffer.write_word_const(first_block_offset + WORD + WORD, 0);
        let mut free_lists = FreeLists::new();
        free_lists.seed_head_const(size_class::class(chunk), first_block_offset);

        Self {
            buffer,
            break_offset,
            free_lists,
        }
    }

    /// Adjust a requested payload size to the actual block size to search
    /// and place, including header/footer overhead and doubleword rounding.
    const fn adjusted_size(size: usize) -> usize {
        if size <= DWORD {
            MIN_BLOCK
        } else {
            DWORD * ((size + DWORD + (DWORD - 1)) / DWORD)
        }
    }

    /// Allocate a block with at least `size` bytes of payload.
    ///
    /// Returns `None` iff `size == 0` or the arena is exhausted.
    pub fn allocate(&mut self, size: usize) -> Option<NonNull<u8>> {
        if size == 0 {
            return None;
        }
        let asize = Self::adjusted_size(size);

        let header_offset = match self.find_fit(asize) {
            Some(offset) => offset,
            None => {
                let offset = self.extend_heap(asize)?;
                let extended_size = block::size_of_word(self.buffer.header_word(offset));
                if extended_size < asize {
                    // The arena could not be extended far enough; the
                    // partial extension is left in its free list for a
                    // smaller future request.
                    return None;
                }
                // `extend_heap` returns the block still linked into its
                // free list (via `coalesce`); `place` requires an unlinked
                // block, same as the one `find_fit` hands back.
                let class = size_class::class(extended_size);
                self.free_lists.remove(&mut self.buffer, offset, class);
                offset
            }
        };

        self.place(header_offset, asize);
        NonNull::new(self.buffer.payload_ptr(header_offset))
    }

    /// Free a previously allocated block. A no-op if `ptr` is `None`.
    pub fn free(&mut self, ptr: Option<NonNull<u8>>) {
        let Some(ptr) = ptr else { return };
        let header_offset = self.buffer.header_offset_of(ptr.as_ptr());
        let size = block::size_of_word(self.buffer.header_word(header_offset));
        self.buffer.write_header_and_footer(header_offset, size, false);
        self.coalesce(header_offset);
    }

    /// Resize the allocation at `ptr` to hold at least `size` bytes.
    ///
    /// `size == 0` behaves like `free(ptr)`; `ptr == None` behaves like
    /// `allocate(size)`. On out-of-memory during the copying path the
    /// original block is left completely untouched.
    pub fn reallocate(&mut self, ptr: Option<NonNull<u8>>, size: usize) -> Option<NonNull<u8>> {
        let Some(ptr) = ptr else {
            return self.allocate(size);
        };
        if size == 0 {
            self.free(Some(ptr));
            return None;
        }

        let header_offset = self.buffer.header_offset_of(ptr.as_ptr());
        let oldsize = block::size_of_word(self.buffer.header_word(header_offset));

        let next_offset = self.buffer.next_block(header_offset);
        let next_word = self.buffer.header_word(next_offset);
        if !block::is_allocated(next_word) {
            let next_size = block::size_of_word(next_word);
            // Strict inequality: keeps one word of slack so the merged
            // block's footer always has somewhere to live.
            if oldsize + next_size > size {
                let next_class = size_class::class(next_size);
                self.free_lists.remove(&mut self.buffer, next_offset, next_class);
                let merged_size = oldsize + next_size;
                self.buffer.write_header_and_footer(header_offset, merged_size, true);
                return Some(ptr);
            }
        }

        let new_ptr = self.allocate(size)?;
        let new_header_offset = self.buffer.header_offset_of(new_ptr.as_ptr());
        let copy_len = size.min(oldsize - DWORD);
        self.buffer.copy_payload(header_offset, new_header_offset, copy_len);
        self.free(Some(ptr));
        Some(new_ptr)
    }

    /// First-fit search across size classes (§4.4).
    ///
    /// Removes the found block from its free list before returning it: the
    /// caller (`allocate`) always hands the result straight to `place`,
    /// which requires an unlinked block.
    fn find_fit(&mut self, asize: usize) -> Option<usize> {
        let start_class = size_class::class(asize);

        let mut cursor = self.free_lists.head(start_class);
        while let Some(offset) = cursor {
            if block::size_of_word(self.buffer.header_word(offset)) >= asize {
                self.free_lists.remove(&mut self.buffer, offset, start_class);
                return Some(offset);
            }
            cursor = self.free_lists.next_in_list(&self.buffer, offset);
        }

        // Classes strictly above `start_class` are power-of-two
        // lower-bounded, so `asize` always fits the head of any non-empty
        // higher class: no linear scan needed there. Every class up to the
        // top one must be checked, since the only populated higher class
        // might be the last.
        for class in (start_class + 1)..CLASSES {
            if let Some(offset) = self.free_lists.head(class) {
                self.free_lists.remove(&mut self.buffer, offset, class);
                return Some(offset);
            }
        }
        None
    }

    /// Place an allocation of `asize` bytes into the free block at
    /// `header_offset`, splitting off a free remainder when it would still
    /// meet the minimum block size (§4.4).
    ///
    /// `header_offset` must already be unlinked from its free list: both
    /// call sites in `allocate` (the `find_fit` hit and the `extend_heap`
    /// fallback) remove the block from its list before calling this.
    fn place(&mut self, header_offset: usize, asize: usize) {
        let csize = block::size_of_word(self.buffer.header_word(header_offset));

        if csize - asize >= MIN_BLOCK {
            self.buffer.write_header_and_footer(header_offset, asize, true);

            let remainder_offset = header_offset + asize;
            let remainder_size = csize - asize;
            self.buffer.write_header_and_footer(remainder_offset, remainder_size, false);
            let class = size_class::class(remainder_size);
            self.free_lists.insert(&mut self.buffer, remainder_offset, class);
        } else {
            self.buffer.write_header_and_footer(header_offset, csize, true);
        }
    }

    /// Boundary-tag coalescing (§4.5). Returns the header offset of the
    /// (possibly merged) free block, which is now linked into its class's
    /// free list.
    fn coalesce(&mut self, header_offset: usize) -> usize {
        let mut offset = header_offset;
        let mut size = block::size_of_word(self.buffer.header_word(offset));

        let prev_offset = self.buffer.prev_block(offset);
        let prev_word = self.buffer.header_word(prev_offset);
        let prev_free = !block::is_allocated(prev_word);

        let next_offset = self.buffer.next_block(offset);
        let next_word = self.buffer.header_word(next_offset);
        let next_free = !block::is_allocated(next_word);

        match (prev_free, next_free) {
            (false, false) => {}
            (false, true) => {
                let next_size = block::size_of_word(next_word);
                let next_class = size_class::class(next_size);
                self.free_lists.remove(&mut self.buffer, next_offset, next_class);
                size += next_size;
            }
            (true, false) => {
                let prev_size = block::size_of_word(prev_word);
                let prev_class = size_class::class(prev_size);
                self.free_lists.remove(&mut self.buffer, prev_offset, prev_class);
                size += prev_size;
                offset = prev_offset;
            }
            (true, true) => {
                let prev_size = block::size_of_word(prev_word);
                let next_size = block::size_of_word(next_word);
                let prev_class = size_class::class(prev_size);
                let next_class = size_class::class(next_size);
                self.free_lists.remove(&mut self.buffer, next_offset, next_class);
                self.free_lists.remove(&mut self.buffer, prev_offset, prev_class);
                size += prev_size + next_size;
                offset = prev_offset;
            }
        }

        self.buffer.write_header_and_footer(offset, size, false);
        let class = size_class::class(size);
        self.free_lists.insert(&mut self.buffer, offset, class);
        offset
    }

    /// Extend the committed arena by at least `min_bytes`, up to `N` total,
    /// and eagerly coalesce the new free block with a free tail left over
    /// from the previous extension.
    ///
    /// Returns `None` only if the arena is already fully committed.
    fn extend_heap(&mut self, min_bytes: usize) -> Option<usize> {
        let requested = round_up_dword(min_bytes.max(CHUNK_SIZE));

        let old_epilogue = self.break_offset;
        if old_epilogue + WORD >= N {
            return None;
        }
        let available = N - old_epilogue - WORD;
        if available < MIN_BLOCK {
            return None;
        }
        let size = requested.min(available);
        let size = size - (size % DWORD);
        if size < MIN_BLOCK {
            return None;
        }

        self.buffer.write_header_and_footer(old_epilogue, size, false);
        let new_epilogue = old_epilogue + size;
        self.buffer.write_word(new_epilogue, block::pack(0, true));
        self.break_offset = new_epilogue;

        Some(self.coalesce(old_epilogue))
    }

    /// Assert every structural invariant from the data model.
    ///
    /// This is a diagnostic, not part of the allocation fast path: it is a
    /// no-op in release builds that are not under test (§6, §7).
    pub fn checkheap(&self, verbose: bool) {
        if !cfg!(debug_assertions) && !cfg!(test) {
            return;
        }
        let first_block = DWORD;
        assert_eq!(self.buffer.header_word(0), block::pack(DWORD, true), "bad prologue header");
        assert_eq!(
            self.buffer.header_word(0),
            self.buffer.read_word(self.buffer.footer_offset(0)),
            "prologue header/footer mismatch"
        );

        let mut offset = first_block;
        let mut blocks_seen = 0usize;
        let mut prev_was_free = false;
        loop {
            let word = self.buffer.header_word(offset);
            let size = block::size_of_word(word);
            if size == 0 {
                assert!(block::is_allocated(word), "epilogue must be allocated");
                break;
            }

            let footer = self.buffer.read_word(self.buffer.footer_offset(offset));
            assert_eq!(word, footer, "header/footer mismatch at offset {offset}");

            let is_free = !block::is_allocated(word);
            assert!(!(is_free && prev_was_free), "adjacent free blocks at offset {offset}");
            prev_was_free = is_free;

            if is_free {
                let class = size_class::class(size);
                assert!(
                    self.list_contains(class, offset),
                    "free block at {offset} missing from its size class's list"
                );
            }

            if verbose {
                let _ = (offset, size, is_free); // structural dump point; no `core::fmt` sink in `no_std`.
            }

            blocks_seen += 1;
            assert!(blocks_seen <= N, "heap walk did not terminate");
            offset = self.buffer.next_block(offset);
        }
    }

    fn list_contains(&self, class: usize, header_offset: usize) -> bool {
        let mut cursor = self.free_lists.head(class);
        let mut steps = 0usize;
        while let Some(offset) = cursor {
            if offset == header_offset {
                return true;
            }
            steps += 1;
            assert!(steps <= N, "free list at class {class} does not terminate");
            cursor = self.free_lists.next_in_list(&self.buffer, offset);
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_split() {
        let mut allocator = RawAllocator::<4120>::new();
        let ptr = allocator.allocate(24).unwrap();
        assert_eq!(ptr.as_ptr() as usize % DWORD, 0);

        allocator.checkheap(false);
        // 4096-byte initial chunk; the remainder after placement must be
        // findable in the free list of its own size class.
        let asize = RawAllocator::<4120>::adjusted_size(24);
        let remainder_size = 4096 - asize;
        let remainder_class = size_class::class(remainder_size);
        assert!(allocator.list_contains(remainder_class, DWORD + asize));
    }

    #[test]
    fn coalesce_both_neighbors() {
        let mut allocator = RawAllocator::<4120>::new();
        let a = allocator.allocate(32).unwrap();
        let b = allocator.allocate(32).unwrap();
        let c = allocator.allocate(32).unwrap();

        allocator.free(Some(a));
        allocator.free(Some(c));
        allocator.free(Some(b));

        allocator.checkheap(false);

        // After freeing all three in this order, the middle free() must
        // merge with both the left and right free neighbors.
        let a_offset = allocator.buffer.header_offset_of(a.as_ptr());
        let merged_word = allocator.buffer.header_word(a_offset);
        assert!(!block::is_allocated(merged_word));
    }

    #[test]
    fn realloc_in_place_grow() {
        let mut allocator = RawAllocator::<4120>::new();
        let p = allocator.allocate(64).unwrap();
        for i in 0..64u8 {
            unsafe { *p.as_ptr().add(i as usize) = i };
        }

        let q = allocator.reallocate(Some(p), 96).unwrap();
        assert_eq!(q, p, "next block is a large free tail; fast path must trigger");
        for i in 0..64u8 {
            assert_eq!(unsafe { *q.as_ptr().add(i as usize) }, i);
        }
        allocator.checkheap(false);
    }

    #[test]
    fn realloc_requiring_copy() {
        let mut allocator = RawAllocator::<8192>::new();
        let p = allocator.allocate(64).unwrap();
        let _blocker = allocator.allocate(16).unwrap();
        for i in 0..64u8 {
            unsafe { *p.as_ptr().add(i as usize) = i };
        }

        let q = allocator.reallocate(Some(p), 4096).unwrap();
        assert_ne!(q, p);
        assert_eq!(q.as_ptr() as usize % DWORD, 0);
        for i in 0..64u8 {
            assert_eq!(unsafe { *q.as_ptr().add(i as usize) }, i);
        }
        allocator.checkheap(false);
    }

    #[test]
    fn oom_preserves_original_block() {
        let mut allocator = RawAllocator::<256>::new();
        let p = allocator.allocate(32).unwrap();
        for i in 0..32u8 {
            unsafe { *p.as_ptr().add(i as usize) = i };
        }
        // Exhaust the remaining arena.
        while allocator.allocate(16).is_some() {}

        let result = allocator.reallocate(Some(p), 1 << 20);
        assert!(result.is_none());
        for i in 0..32u8 {
            assert_eq!(unsafe { *p.as_ptr().add(i as usize) }, i);
        }
    }

    #[test]
    fn zero_size_allocate_returns_none() {
        let mut allocator = RawAllocator::<256>::new();
        assert!(allocator.allocate(0).is_none());
    }

    #[test]
    fn free_of_none_is_a_no_op() {
        let mut allocator = RawAllocator::<256>::new();
        allocator.free(None);
        allocator.checkheap(false);
    }

    #[test]
    fn reallocate_zero_size_frees_and_returns_none() {
        let mut allocator = RawAllocator::<256>::new();
        let p = allocator.allocate(32).unwrap();
        assert!(allocator.reallocate(Some(p), 0).is_none());
        allocator.checkheap(false);
    }

    #[test]
    fn reallocate_none_is_allocate() {
        let mut allocator = RawAllocator::<256>::new();
        let p = allocator.reallocate(None, 32).unwrap();
        assert_ne!(p.as_ptr(), core::ptr::null_mut());
    }

    #[test]
    fn size_class_stability_after_free() {
        let mut allocator = RawAllocator::<{ 1 << 18 }>::new();
        for size in [1usize, 7, 31, 33, 100, 1000, 5000, 70000] {
            let p = allocator.allocate(size).unwrap();
            let offset = allocator.buffer.header_offset_of(p.as_ptr());
            let block_size = block::size_of_word(allocator.buffer.header_word(offset));

            allocator.free(Some(p));
            let class = size_class::class(block_size);
            assert!(allocator.list_contains(class, offset));
        }
    }

    #[test]
    #[should_panic(expected = "too small heap memory")]
    fn new_panics_if_arena_cannot_hold_one_block() {
        let _ = RawAllocator::<8>::new();
    }
}
