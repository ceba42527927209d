//! Frame checksum
//!
//! From the module datasheet: the arithmetic sum of the package identifier,
//! the package length and every content byte. Overflowing bits are omitted,
//! and the result is sent high byte first.

use tracing::trace;

/// Calculate the checksum of a frame
///
/// # Algorithm
///
/// ```text
/// sum = packet_type + length_hi + length_lo + payload[0] + ... + payload[n-1]
/// checksum = sum mod 0x10000
/// ```
///
/// `length` is the value carried in the frame's length field, i.e. the
/// payload length plus the two checksum bytes.
///
/// # Examples
///
/// ```
/// use fpdoorbell_core::checksum;
///
/// // GenImg command: type 0x01, length 0x0003, instruction 0x01
/// assert_eq!(checksum::calculate(0x01, 0x0003, &[0x01]), 0x0005);
/// ```
pub fn calculate(packet_type: u8, length: u16, payload: &[u8]) -> u16 {
    let [len_hi, len_lo] = length.to_be_bytes();

    let checksum = payload
        .iter()
        .fold(
            u16::from(packet_type)
                .wrapping_add(u16::from(len_hi))
                .wrapping_add(u16::from(len_lo)),
            |sum, byte| sum.wrapping_add(u16::from(*byte)),
        );

    trace!(
        packet_type = packet_type,
        length = length,
        checksum = format!("0x{:04X}", checksum),
        "Calculated checksum"
    );

    checksum
}

/// Verify checksum
pub fn verify(packet_type: u8, length: u16, payload: &[u8], expected: u16) -> bool {
    calculate(packet_type, length, payload) == expected
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_handshake_frame() {
        // VfyPwd with password 0: 01 00 07 13 00 00 00 00 -> 0x001B
        assert_eq!(calculate(0x01, 0x0007, &[0x13, 0, 0, 0, 0]), 0x001B);
    }

    #[test]
    fn test_checksum_ack_frame() {
        // Plain OK ack: 07 00 03 00 -> 0x000A
        assert_eq!(calculate(0x07, 0x0003, &[0x00]), 0x000A);
    }

    #[test]
    fn test_checksum_verify() {
        let payload = [0x04, 0x01, 0x00, 0x00, 0x00, 0xC8];
        let checksum = calculate(0x01, 0x0008, &payload);

        assert!(verify(0x01, 0x0008, &payload, checksum));
        assert!(!verify(0x01, 0x0008, &payload, checksum.wrapping_add(1)));
    }

    #[test]
    fn test_checksum_wraps() {
        // 300 bytes of 0xFF overflow 16 bits
        let payload = vec![0xFF; 300];
        let expected = (0x02u32 + 0x01 + 0x2E + 0xFF * 300) as u16;

        assert_eq!(calculate(0x02, 0x012E, &payload), expected);
    }

    #[test]
    fn test_checksum_depends_on_type() {
        assert_ne!(calculate(0x02, 0x0003, &[0x10]), calculate(0x08, 0x0003, &[0x10]));
    }
}
