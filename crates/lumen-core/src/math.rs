//! Math utilities and helpers.

/// Round `size` up to the next multiple of `alignment`.
///
/// An alignment of zero is treated as one. Vulkan reports power-of-two
/// alignments, but the rounding does not rely on that.
#[inline]
pub const fn align_up(size: u64, alignment: u64) -> u64 {
    let alignment = if alignment == 0 { 1 } else { alignment };
    size.div_ceil(alignment) * alignment
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_up_basic() {
        assert_eq!(align_up(0, 256), 0);
        assert_eq!(align_up(1, 256), 256);
        assert_eq!(align_up(208, 256), 256);
        assert_eq!(align_up(256, 256), 256);
        assert_eq!(align_up(257, 256), 512);
        assert_eq!(align_up(16, 64), 64);
    }

    #[test]
    fn align_up_properties() {
        for alignment in [1_u64, 4, 16, 64, 256, 3, 48, 100] {
            for size in 0..1024_u64 {
                let aligned = align_up(size, alignment);
                assert!(aligned >= size);
                assert_eq!(aligned % alignment, 0);
                assert!(aligned - size < alignment);
                assert_eq!(align_up(aligned, alignment), aligned);
            }
        }
    }

    #[test]
    fn align_up_zero_alignment() {
        assert_eq!(align_up(13, 0), 13);
    }
}
