//! Size-class index: a pure, total, monotonic mapping from a block size in
//! bytes to one of [`CLASSES`] buckets.
//!
//! Class `i` covers `(BOUNDARIES[i - 1], BOUNDARIES[i]]` (with an implicit
//! lower bound of `0` for class `0`); the last class absorbs every size
//! above `BOUNDARIES[CLASSES - 2]`. This is the canonical schedule from the
//! design: doubling thresholds up to 1024, a jump to 4096, doubling again up
//! to 65536, then an overflow class.

/// Number of segregated free-list size classes.
pub const CLASSES: usize = 12;

const BOUNDARIES: [usize; CLASSES - 1] = [
    32, 64, 128, 256, 512, 1024, 4096, 8192, 16384, 32768, 65536,
];

/// Map a block size in bytes to its size-class index in `[0, CLASSES)`.
///
/// Monotonic non-decreasing in `size`; any size larger than the last
/// boundary maps to `CLASSES - 1`.
pub const fn class(size: usize) -> usize {
    let mut i = 0;
    while i < BOUNDARIES.len() {
        if size <= BOUNDARIES[i] {
            return i;
        }
        i += 1;
    }
    CLASSES - 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_sizes_map_to_class_zero() {
        assert_eq!(class(1), 0);
        assert_eq!(class(32), 0);
    }

    #[test]
    fn boundary_is_inclusive_to_the_lower_class() {
        assert_eq!(class(64), 1);
        assert_eq!(class(65), 2);
    }

    #[test]
    fn overflow_class_absorbs_everything_above_the_last_boundary() {
        assert_eq!(class(65536), CLASSES - 2);
        assert_eq!(class(65537), CLASSES - 1);
        assert_eq!(class(usize::MAX), CLASSES - 1);
    }

    #[test]
    fn monotonic_non_decreasing() {
        let mut prev = class(1);
        for size in (1..=1 << 17).step_by(37) {
            let c = class(size);
            assert!(c >= prev);
            prev = c;
        }
    }
}
