//! High-level error types

use fpdoorbell_core::{ConfirmationCode, Instruction, PacketType};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Core protocol error: {0}")]
    Core(#[from] fpdoorbell_core::Error),

    #[error("Transport error: {0}")]
    Transport(#[from] fpdoorbell_transport::Error),

    #[error("Type error: {0}")]
    Types(#[from] fpdoorbell_types::Error),

    #[error("Sensor not connected")]
    NotConnected,

    #[error("{instruction} failed: {code}")]
    Sensor {
        instruction: Instruction,
        code: ConfirmationCode,
    },

    #[error("Unexpected packet: expected {expected}, got {actual}")]
    UnexpectedPacket {
        expected: PacketType,
        actual: PacketType,
    },

    #[error("Invalid template id {id} (valid: 1..={capacity})")]
    InvalidTemplateId {
        id: u16,
        capacity: u16,
    },

    #[error("An enrollment is already in progress")]
    EnrollmentInProgress,

    #[error("Template transfer exceeded {seconds}s")]
    TransferTimeout {
        seconds: u64,
    },

    #[error("Template too small: {size} bytes (min: {min} bytes)")]
    TemplateTooSmall {
        size: usize,
        min: usize,
    },

    #[error("Template too large: {size} bytes (max: {max} bytes)")]
    TemplateTooLarge {
        size: usize,
        max: usize,
    },

    #[error("Name registry error: {0}")]
    Registry(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid response from sensor: {0}")]
    InvalidResponse(String),
}

impl Error {
    pub(crate) fn sensor(instruction: Instruction, code: ConfirmationCode) -> Self {
        Self::Sensor { instruction, code }
    }

    /// Check if a retry on the next tick might succeed
    ///
    /// Timeouts, framing noise and packet-level complaints from the module
    /// are transient. Domain failures (bad id, mismatched samples) are not.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Core(e) => e.is_recoverable(),
            Self::Transport(e) => e.is_timeout(),
            Self::Sensor { code, .. } => code.is_communication_error(),
            Self::UnexpectedPacket { .. } => true,
            _ => false,
        }
    }

    /// Check if the error came from the link itself (no valid reply)
    pub fn is_link_failure(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Confirmation code carried by a sensor failure
    pub fn confirmation_code(&self) -> Option<ConfirmationCode> {
        match self {
            Self::Sensor { code, .. } => Some(*code),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        let timeout = Error::Transport(fpdoorbell_transport::Error::ReadTimeout);
        assert!(timeout.is_transient());
        assert!(timeout.is_link_failure());

        let checksum = Error::Core(fpdoorbell_core::Error::ChecksumMismatch {
            expected: 1,
            received: 2,
        });
        assert!(checksum.is_transient());
        assert!(!checksum.is_link_failure());

        let mismatch = Error::sensor(Instruction::RegModel, ConfirmationCode::EnrollMismatch);
        assert!(!mismatch.is_transient());
        assert_eq!(mismatch.confirmation_code(), Some(ConfirmationCode::EnrollMismatch));

        assert!(!Error::InvalidTemplateId { id: 0, capacity: 200 }.is_transient());
    }

    #[test]
    fn test_sensor_error_message() {
        let e = Error::sensor(Instruction::Store, ConfirmationCode::FlashError);
        assert_eq!(e.to_string(), "STORE(0x06) failed: flash write error (0x18)");
    }
}
