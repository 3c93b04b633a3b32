//! 16-bit XOR-fold checksum used by the MQ79 ISP frame format.
//!
//! The wire value is the fold result with its two bytes swapped. The swap is
//! part of the wire format: the swapped value is then written in the frame's
//! little-endian field order, which puts the accumulator's natural bytes
//! high-byte-first on the wire. Devices reject frames whose checksum bytes
//! arrive in natural order, so the swap must never be optimized away.

/// XOR-fold a byte region into a 16-bit accumulator.
///
/// Bytes are consumed as big-endian pairs; an odd trailing byte folds into
/// the high half. For an even-length region, folding the region followed by
/// its wire checksum bytes yields zero.
pub fn xor_fold(bytes: &[u8]) -> u16 {
    let mut acc = 0u16;
    let mut pairs = bytes.chunks_exact(2);
    for pair in &mut pairs {
        acc ^= u16::from_be_bytes([pair[0], pair[1]]);
    }
    if let [tail] = pairs.remainder() {
        acc ^= u16::from(*tail) << 8;
    }
    acc
}

/// Compute the wire checksum of a frame region: XOR-fold, then byte-swap.
pub fn checksum(bytes: &[u8]) -> u16 {
    xor_fold(bytes).swap_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fold_of_empty_region_is_zero() {
        assert_eq!(xor_fold(&[]), 0);
    }

    #[test]
    fn fold_pairs_high_byte_first() {
        assert_eq!(xor_fold(&[0x12, 0x34]), 0x1234);
        assert_eq!(xor_fold(&[0x12, 0x34, 0x56, 0x78]), 0x1234 ^ 0x5678);
    }

    #[test]
    fn odd_tail_folds_into_high_half() {
        assert_eq!(xor_fold(&[0xAB]), 0xAB00);
        assert_eq!(xor_fold(&[0x12, 0x34, 0xAB]), 0x1234 ^ 0xAB00);
    }

    #[test]
    fn checksum_swaps_fold_result() {
        assert_eq!(checksum(&[0x12, 0x34]), 0x3412);
        assert_eq!(checksum(&[]), 0);
    }

    /// Appending the wire checksum bytes to an even-length region folds the
    /// extended region to zero. This is the oracle-free round-trip check
    /// used by the frame tests.
    #[test]
    fn appending_wire_checksum_folds_to_zero() {
        let regions: [&[u8]; 4] = [
            &[],
            &[0xB9, 0x46, 0x6A, 0x00],
            &[0x00, 0xFF, 0x55, 0xAA, 0x12, 0x34],
            &[0xDE, 0xAD, 0xBE, 0xEF, 0x00, 0x00, 0x01, 0x02],
        ];
        for region in regions {
            let sum = checksum(region);
            let mut extended = region.to_vec();
            // Little-endian write of the swapped value = accumulator
            // high-byte-first on the wire.
            extended.extend_from_slice(&sum.to_le_bytes());
            assert_eq!(xor_fold(&extended), 0, "region {region:02X?}");
        }
    }
}
