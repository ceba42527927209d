//! Confirmation codes carried in acknowledge packets

use std::fmt;

/// Confirmation code returned by the module
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ConfirmationCode {
    /// Command execution complete
    Ok,
    /// Error when receiving the packet
    PacketReceiveError,
    /// No finger on the sensor
    NoFinger,
    /// Failed to enroll the finger image
    ImageFail,
    /// Image too disordered to extract features
    ImageMess,
    /// Too few feature points
    FeatureFail,
    /// Fingers do not match
    NoMatch,
    /// No matching template in the library
    NotFound,
    /// Character files could not be combined
    EnrollMismatch,
    /// Page id beyond the library
    BadLocation,
    /// Error reading a template from the library
    DbReadFail,
    /// Error uploading a template
    UploadFeatureFail,
    /// Module cannot receive the following data packets
    PacketResponseFail,
    /// Error uploading an image
    UploadFail,
    /// Failed to delete the template
    DeleteFail,
    /// Failed to clear the library
    DbClearFail,
    /// Wrong password
    PasswordFail,
    /// No valid primary image in the buffer
    InvalidImage,
    /// Error writing flash
    FlashError,
    /// Invalid register number
    InvalidRegister,
    /// Sensor hardware fault
    SensorAbnormal,
    /// Anything the datasheet does not name
    Unknown(u8),
}

impl ConfirmationCode {
    /// Check if the command succeeded
    pub fn is_ok(self) -> bool {
        self == Self::Ok
    }

    /// Check if the code reports a link-level problem rather than a result
    ///
    /// These are worth retrying; the module did not act on the command.
    pub fn is_communication_error(self) -> bool {
        matches!(
            self,
            Self::PacketReceiveError | Self::PacketResponseFail | Self::Unknown(_)
        )
    }

    /// Human-readable description
    pub fn description(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::PacketReceiveError => "packet receive error",
            Self::NoFinger => "no finger detected",
            Self::ImageFail => "imaging failed",
            Self::ImageMess => "image too messy",
            Self::FeatureFail => "could not find fingerprint features",
            Self::NoMatch => "fingerprints do not match",
            Self::NotFound => "no match in library",
            Self::EnrollMismatch => "fingerprints did not match",
            Self::BadLocation => "template id out of range",
            Self::DbReadFail => "could not read template",
            Self::UploadFeatureFail => "template upload failed",
            Self::PacketResponseFail => "module cannot receive data packets",
            Self::UploadFail => "image upload failed",
            Self::DeleteFail => "could not delete template",
            Self::DbClearFail => "could not clear library",
            Self::PasswordFail => "wrong password",
            Self::InvalidImage => "no valid image in buffer",
            Self::FlashError => "flash write error",
            Self::InvalidRegister => "invalid register",
            Self::SensorAbnormal => "sensor abnormal",
            Self::Unknown(_) => "unknown error",
        }
    }
}

impl From<u8> for ConfirmationCode {
    fn from(value: u8) -> Self {
        match value {
            0x00 => Self::Ok,
            0x01 => Self::PacketReceiveError,
            0x02 => Self::NoFinger,
            0x03 => Self::ImageFail,
            0x06 => Self::ImageMess,
            0x07 => Self::FeatureFail,
            0x08 => Self::NoMatch,
            0x09 => Self::NotFound,
            0x0A => Self::EnrollMismatch,
            0x0B => Self::BadLocation,
            0x0C => Self::DbReadFail,
            0x0D => Self::UploadFeatureFail,
            0x0E => Self::PacketResponseFail,
            0x0F => Self::UploadFail,
            0x10 => Self::DeleteFail,
            0x11 => Self::DbClearFail,
            0x13 => Self::PasswordFail,
            0x15 => Self::InvalidImage,
            0x18 => Self::FlashError,
            0x1A => Self::InvalidRegister,
            0x29 => Self::SensorAbnormal,
            other => Self::Unknown(other),
        }
    }
}

impl From<ConfirmationCode> for u8 {
    fn from(code: ConfirmationCode) -> u8 {
        match code {
            ConfirmationCode::Ok => 0x00,
            ConfirmationCode::PacketReceiveError => 0x01,
            ConfirmationCode::NoFinger => 0x02,
            ConfirmationCode::ImageFail => 0x03,
            ConfirmationCode::ImageMess => 0x06,
            ConfirmationCode::FeatureFail => 0x07,
            ConfirmationCode::NoMatch => 0x08,
            ConfirmationCode::NotFound => 0x09,
            ConfirmationCode::EnrollMismatch => 0x0A,
            ConfirmationCode::BadLocation => 0x0B,
            ConfirmationCode::DbReadFail => 0x0C,
            ConfirmationCode::UploadFeatureFail => 0x0D,
            ConfirmationCode::PacketResponseFail => 0x0E,
            ConfirmationCode::UploadFail => 0x0F,
            ConfirmationCode::DeleteFail => 0x10,
            ConfirmationCode::DbClearFail => 0x11,
            ConfirmationCode::PasswordFail => 0x13,
            ConfirmationCode::InvalidImage => 0x15,
            ConfirmationCode::FlashError => 0x18,
            ConfirmationCode::InvalidRegister => 0x1A,
            ConfirmationCode::SensorAbnormal => 0x29,
            ConfirmationCode::Unknown(value) => value,
        }
    }
}

impl fmt::Display for ConfirmationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:02X})", self.description(), u8::from(*self))
    }
}
