//! Comparisons between sequence numbers on the 32-bit ring.

/// `a < b` when both are read as positions in sequence-number space. Holds
/// when `b` lies less than half the ring ahead of `a`.
pub fn mod_le(a: u32, b: u32) -> bool {
    let distance = b.wrapping_sub(a);
    distance != 0 && distance < 1 << 31
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modular_comparison() {
        assert!(mod_le(10, 20));
        assert!(!mod_le(20, 10));
        assert!(mod_le(2_000_000_000, 3_000_000_000));
        assert!(!mod_le(3_000_000_000, 2_000_000_000));

        // Across the wrap point
        assert!(mod_le(u32::MAX - 5, 5));
        assert!(!mod_le(5, u32::MAX - 5));

        assert!(!mod_le(5, 5));
        assert!(mod_le(u32::MAX, 0));
    }
}
