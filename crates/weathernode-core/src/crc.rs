//! CRC-8 used by the AHT20 measurement frame.
//!
//! Polynomial `0x31` (x^8 + x^5 + x^4 + 1), initial value `0xFF`, no
//! reflection and no final XOR. This is the `CRC-8/NRSC-5` catalogue entry.

use crc::{CRC_8_NRSC_5, Crc};

const CRC8: Crc<u8> = Crc::<u8>::new(&CRC_8_NRSC_5);

/// Compute the checksum of `data`.
pub fn crc8(data: &[u8]) -> u8 {
    CRC8.checksum(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalogue_check_value() {
        assert_eq!(crc8(b"123456789"), 0xF7);
    }

    #[test]
    fn test_sensirion_example() {
        assert_eq!(crc8(&[0xBE, 0xEF]), 0x92);
    }

    #[test]
    fn test_aht20_frame() {
        // Status and data bytes of a sample measurement
        let frame = [0x1C, 0x65, 0xB4, 0x25, 0xCD, 0x26];
        assert_eq!(crc8(&frame), 0xC6);
    }

    #[test]
    fn test_single_bit_corruption_changes_checksum() {
        let frame = [0x1C, 0x65, 0xB4, 0x25, 0xCD, 0x26];
        let expected = crc8(&frame);

        for byte in 0..frame.len() {
            for bit in 0..8 {
                let mut corrupted = frame;
                corrupted[byte] ^= 1 << bit;
                assert_ne!(
                    crc8(&corrupted),
                    expected,
                    "flipping bit {} of byte {} went undetected",
                    bit,
                    byte
                );
            }
        }
    }
}
