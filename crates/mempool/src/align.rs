//! Alignment arithmetic shared by all pool types.

/// Maximum fundamental alignment. Block starts and arena bases are aligned
/// to this so any object that fits in a block can live there.
pub const MAX_ALIGN: usize = 16;

/// Round `value` up to the next multiple of `alignment`.
///
/// `alignment` must be a power of two.
#[inline(always)]
#[must_use]
pub const fn align_up(value: usize, alignment: usize) -> usize {
    (value + alignment - 1) & !(alignment - 1)
}

/// Check whether `addr` is aligned to `alignment` bytes.
#[inline(always)]
#[must_use]
pub const fn is_aligned(addr: usize, alignment: usize) -> bool {
    addr & (alignment - 1) == 0
}

/// Check whether `x` is a non-zero power of two.
#[inline(always)]
#[must_use]
pub const fn is_power_of_two(x: usize) -> bool {
    x != 0 && x & (x - 1) == 0
}
