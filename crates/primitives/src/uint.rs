//! 256-bit helpers for hash arithmetic.

use hodld_consensus::Hash256;
use primitive_types::U256;

/// Interprets a hash in internal (little-endian) byte order.
pub fn hash_to_u256(hash: &Hash256) -> U256 {
    U256::from_little_endian(hash)
}

pub fn u256_to_hash(value: U256) -> Hash256 {
    value.to_little_endian()
}

/// Bitcoin "compact" (nBits-style) encoding of an unsigned 256-bit value.
pub fn u256_to_compact(value: U256) -> u32 {
    if value.is_zero() {
        return 0;
    }

    let mut size = value.bits().div_ceil(8) as u32;
    let mut compact: u32;

    if size <= 3 {
        compact = value.low_u32() << (8 * (3 - size));
    } else {
        let shift = 8 * (size - 3);
        compact = (value >> shift).low_u32();
    }

    if (compact & 0x0080_0000) != 0 {
        compact >>= 8;
        size += 1;
    }

    (size << 24) | (compact & 0x007f_ffff)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compact_matches_known_targets() {
        assert_eq!(u256_to_compact(U256::zero()), 0);
        assert_eq!(u256_to_compact(U256::from(0x12u64)), 0x0112_0000);
        assert_eq!(u256_to_compact(U256::from(0x80u64)), 0x0200_8000);
        let pow_limit = U256::from(0xffffu64) << 208;
        assert_eq!(u256_to_compact(pow_limit), 0x1d00_ffff);
    }

    #[test]
    fn hash_roundtrips_through_u256() {
        let mut hash = [0u8; 32];
        hash[0] = 1;
        hash[31] = 0x80;
        assert_eq!(u256_to_hash(hash_to_u256(&hash)), hash);
        assert_eq!(hash_to_u256(&hash).low_u32(), 1);
    }
}
