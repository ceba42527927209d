//! Error types for fpdoorbell-core



/// Result type alias for fpdoorbell operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core protocol errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Frame does not begin with the start code
    #[error("Bad start code: expected 0xEF01, got 0x{0:04X}")]
    BadStartCode(u16),

    /// Length field outside the valid range
    #[error("Invalid length field: {0} (must be 2..=258)")]
    InvalidLength(u16),

    /// Unknown package identifier
    #[error("Unknown packet type: 0x{0:02X}")]
    UnknownPacketType(u8),

    /// Checksum verification failed
    #[error("Checksum mismatch: expected 0x{expected:04X}, received 0x{received:04X}")]
    ChecksumMismatch {
        expected: u16,
        received: u16,
    },

    /// Frame came from a different module address
    #[error("Address mismatch: expected 0x{expected:08X}, got 0x{actual:08X}")]
    AddressMismatch {
        expected: u32,
        actual: u32,
    },

    /// Unknown instruction code
    #[error("Unknown instruction code: 0x{0:02X}")]
    UnknownInstruction(u8),

    /// Acknowledge packet without a confirmation code
    #[error("Acknowledge packet carries no confirmation code")]
    EmptyAck,

    /// Command packet without an instruction code
    #[error("Command packet carries no instruction code")]
    EmptyCommand,

    /// Payload too large
    #[error("Payload too large: {size} bytes (max: {max} bytes)")]
    PayloadTooLarge {
        size: usize,
        max: usize,
    },

    /// Invalid session state
    #[error("Invalid session state: {0}")]
    InvalidSessionState(String),
}

impl Error {
    /// Check if error is recoverable (retry might succeed)
    ///
    /// Line noise and stale bytes show up as framing errors; the next frame
    /// usually parses fine.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::BadStartCode(_)
                | Self::InvalidLength(_)
                | Self::UnknownPacketType(_)
                | Self::ChecksumMismatch { .. }
        )
    }

    /// Check if error is a malformed frame (as opposed to a bad checksum)
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            Self::BadStartCode(_)
                | Self::InvalidLength(_)
                | Self::UnknownPacketType(_)
                | Self::EmptyAck
                | Self::EmptyCommand
                | Self::AddressMismatch { .. }
        )
    }
}
