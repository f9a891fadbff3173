//! Helper functions for the allocator. These don't particularly belong to any
//! concrete module of the program.

/// Every payload size the allocator hands out is a multiple of this unit, and
/// every block header starts at an address that is a multiple of it.
pub(crate) const ALIGNMENT: usize = 8;

/// Rounds `size` up to the next multiple of [`ALIGNMENT`].
///
/// Processors fetch data in fixed-size chunks rather than byte by byte, so
/// every address we hand out has to be aligned. We normalize the requested
/// size once, before any search or growth decision, and from then on every
/// size stored in a block header is already a multiple of the unit.
pub(crate) fn align(size: usize) -> usize {
    (size + ALIGNMENT - 1) & !(ALIGNMENT - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_rounds_up_to_unit() {
        let alignments = vec![(1..=8, 8), (9..=16, 16), (17..=24, 24), (25..=32, 32)];

        for (sizes, expected) in alignments {
            for size in sizes {
                assert_eq!(expected, align(size));
            }
        }
    }

    #[test]
    fn align_keeps_multiples() {
        for size in [0, 8, 64, 6 * 1024] {
            assert_eq!(size, align(size));
        }
    }
}
