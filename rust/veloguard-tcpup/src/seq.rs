//! Wraparound-safe 32-bit sequence number comparison
//!
//! Sequence and acknowledgment numbers live in a modulo 2^32 space; two
//! values are ordered by the sign of their wrapping difference. Every
//! ack/seq comparison in this crate goes through these helpers.

/// `a` is after `b`
#[inline]
pub fn seq_gt(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) > 0
}

/// `a` is before `b`
#[inline]
pub fn seq_lt(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) < 0
}

/// `a` is after or equal to `b`
#[inline]
pub fn seq_ge(a: u32, b: u32) -> bool {
    a == b || seq_gt(a, b)
}

/// `a` is before or equal to `b`
#[inline]
pub fn seq_le(a: u32, b: u32) -> bool {
    a == b || seq_lt(a, b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equal_is_not_greater() {
        for x in [0u32, 1, 0x7fff_ffff, 0x8000_0000, u32::MAX] {
            assert!(!seq_gt(x, x));
            assert!(!seq_lt(x, x));
            assert!(seq_ge(x, x));
            assert!(seq_le(x, x));
        }
    }

    #[test]
    fn test_successor_across_wrap() {
        assert!(seq_gt(0, u32::MAX));
        assert!(seq_lt(u32::MAX, 0));
        assert!(seq_gt(5, u32::MAX - 5));
        assert!(seq_gt(u32::MAX, u32::MAX - 1));
    }

    #[test]
    fn test_half_space_boundary() {
        // Exactly 2^31 apart: neither side is "after" the other in the signed view.
        assert!(!seq_gt(0, 0x8000_0000));
        assert!(!seq_gt(u32::MAX, u32::MAX.wrapping_add(0x8000_0000)));
        assert!(seq_gt(0x7fff_ffff, 0));
    }
}
