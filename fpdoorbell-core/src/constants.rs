//! Protocol constants

/// Frame start code, high byte first on the wire
pub const START_CODE: u16 = 0xEF01;

/// Factory default module address
pub const DEFAULT_ADDRESS: u32 = 0xFFFF_FFFF;

/// Factory default handshake password
pub const DEFAULT_PASSWORD: u32 = 0x0000_0000;

/// Factory default UART speed (baud setting 6 x 9600)
pub const DEFAULT_BAUD_RATE: u32 = 57_600;

/// Default reply timeout (milliseconds)
pub const DEFAULT_REPLY_TIMEOUT_MS: u64 = 1_000;

/// Maximum payload carried by a single frame
pub const MAX_PAYLOAD_SIZE: usize = 256;

/// Bytes in front of the payload: start(2) + address(4) + type(1) + length(2)
pub const HEADER_SIZE: usize = 9;

/// Trailing checksum size
pub const CHECKSUM_SIZE: usize = 2;

/// Data packet length used when the module did not report one
pub const DEFAULT_DATA_PACKET_LEN: usize = 128;

/// Number of character buffers on R503-class modules
pub const CHAR_BUFFER_COUNT: u8 = 6;

/// Template slots described by one `ReadIndexTable` page
pub const INDEX_PAGE_SLOTS: u16 = 256;

/// Data packet length for a `ReadSysPara` packet size code
///
/// Codes 0-3 map to 32, 64, 128 and 256 bytes. Anything else falls back to
/// [`DEFAULT_DATA_PACKET_LEN`].
pub fn data_packet_len(code: u16) -> usize {
    match code {
        0 => 32,
        1 => 64,
        2 => 128,
        3 => 256,
        _ => DEFAULT_DATA_PACKET_LEN,
    }
}

/// Character buffer identifiers
pub mod buffers {
    /// Buffer used for searching and for the merged model
    pub const PRIMARY: u8 = 1;

    /// Second buffer, used by two-sample modules
    pub const SECONDARY: u8 = 2;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_packet_len_codes() {
        assert_eq!(data_packet_len(0), 32);
        assert_eq!(data_packet_len(3), 256);
        assert_eq!(data_packet_len(9), DEFAULT_DATA_PACKET_LEN);
    }
}
