//! Block header/footer encoding: a single word packs `(size, allocated)`.
//!
//! Every block, including the prologue and (header-only) epilogue, is
//! delimited by a header word and — except the epilogue — an identical
//! footer word one word before its end. Because every block size is a
//! multiple of [`DWORD`], the low bit of the size is always free and is used
//! to record whether the block is allocated.

use core::mem;

/// Size in bytes of the machine word this allocator packs headers into.
pub const WORD: usize = mem::size_of::<usize>();
/// Payload alignment unit: two words.
pub const DWORD: usize = 2 * WORD;
/// Smallest block that can hold a header, a footer and a free-list node.
pub const MIN_BLOCK: usize = 4 * WORD;

/// Pack a block size and an allocated flag into a single header/footer word.
///
/// # Panics
/// Panics (via `debug_assert!`) if `size` is not a multiple of [`DWORD`].
pub const fn pack(size: usize, allocated: bool) -> usize {
    debug_assert!(size & (DWORD - 1) == 0, "block size must be a dword multiple");
    size | (allocated as usize)
}

/// Extract the block size encoded in a header/footer word.
pub const fn size_of_word(word: usize) -> usize {
    word & !(DWORD - 1)
}

/// Extract the allocated flag encoded in a header/footer word.
pub const fn is_allocated(word: usize) -> bool {
    word & 1 != 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_roundtrips() {
        let w = pack(64, true);
        assert_eq!(size_of_word(w), 64);
        assert!(is_allocated(w));

        let w = pack(128, false);
        assert_eq!(size_of_word(w), 128);
        assert!(!is_allocated(w));
    }

    #[test]
    fn zero_sized_epilogue_word() {
        let w = pack(0, true);
        assert_eq!(size_of_word(w), 0);
        assert!(is_allocated(w));
    }
}
