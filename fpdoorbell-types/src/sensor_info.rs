//! Sensor system parameters

use std::fmt;

use bitflags::bitflags;
use byteorder::{BigEndian, ByteOrder};

use crate::error::{Error, Result};

bitflags! {
    /// Status register bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct StatusFlags: u16 {
        /// Module is executing a command
        const BUSY = 1 << 0;
        /// A finger matched (always confirm with the search reply)
        const PASS = 1 << 1;
        /// Handshake password verified
        const PWD = 1 << 2;
        /// Image buffer holds a valid image
        const IMG_BUF_STAT = 1 << 3;
    }
}

/// System parameters reported by `ReadSysPara`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorInfo {
    /// Status register
    pub status: StatusFlags,

    /// System identifier code (0x0009 on R50x modules)
    pub system_id: u16,

    /// Library size
    pub capacity: u16,

    /// Security level 1-5
    pub security_level: u16,

    /// Module address
    pub address: u32,

    /// Data packet size code 0-3 (32, 64, 128, 256 bytes)
    pub packet_size_code: u16,

    /// Baud setting; multiply by 9600 for the line speed
    pub baud_setting: u16,
}

impl SensorInfo {
    /// Size of the parameter block in the `ReadSysPara` reply
    pub const SIZE: usize = 16;

    /// Parse the parameter block (the ack content after the confirmation code)
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parse`] if fewer than 16 bytes are supplied.
    pub fn parse(params: &[u8]) -> Result<Self> {
        if params.len() < Self::SIZE {
            return Err(Error::Parse(format!(
                "system parameters need {} bytes, got {}",
                Self::SIZE,
                params.len()
            )));
        }

        Ok(Self {
            status: StatusFlags::from_bits_truncate(BigEndian::read_u16(&params[0..2])),
            system_id: BigEndian::read_u16(&params[2..4]),
            capacity: BigEndian::read_u16(&params[4..6]),
            security_level: BigEndian::read_u16(&params[6..8]),
            address: BigEndian::read_u32(&params[8..12]),
            packet_size_code: BigEndian::read_u16(&params[12..14]),
            baud_setting: BigEndian::read_u16(&params[14..16]),
        })
    }

    /// Serialize into the 16-byte parameter block
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        BigEndian::write_u16(&mut buf[0..2], self.status.bits());
        BigEndian::write_u16(&mut buf[2..4], self.system_id);
        BigEndian::write_u16(&mut buf[4..6], self.capacity);
        BigEndian::write_u16(&mut buf[6..8], self.security_level);
        BigEndian::write_u32(&mut buf[8..12], self.address);
        BigEndian::write_u16(&mut buf[12..14], self.packet_size_code);
        BigEndian::write_u16(&mut buf[14..16], self.baud_setting);
        buf
    }

    /// Line speed in baud
    pub fn baud_rate(&self) -> u32 {
        u32::from(self.baud_setting) * 9600
    }

    /// True if the module is executing another command
    pub fn busy(&self) -> bool {
        self.status.contains(StatusFlags::BUSY)
    }
}

impl fmt::Display for SensorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Sensor[capacity: {}, security: {}, address: 0x{:08X}, baud: {}]",
            self.capacity,
            self.security_level,
            self.address,
            self.baud_rate()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const R503_PARAMS: [u8; 16] = [
        0x00, 0x04, // status: PWD
        0x00, 0x09, // system id
        0x00, 0xC8, // capacity 200
        0x00, 0x03, // security level
        0xFF, 0xFF, 0xFF, 0xFF, // address
        0x00, 0x02, // 128 byte packets
        0x00, 0x06, // 57600 baud
    ];

    #[test]
    fn test_parse_r503_params() {
        let info = SensorInfo::parse(&R503_PARAMS).unwrap();

        assert_eq!(info.capacity, 200);
        assert_eq!(info.security_level, 3);
        assert_eq!(info.address, 0xFFFF_FFFF);
        assert_eq!(info.packet_size_code, 2);
        assert_eq!(info.baud_rate(), 57_600);
        assert!(info.status.contains(StatusFlags::PWD));
        assert!(!info.busy());
    }

    #[test]
    fn test_parse_short_block() {
        assert!(matches!(SensorInfo::parse(&R503_PARAMS[..10]), Err(Error::Parse(_))));
    }

    #[test]
    fn test_to_bytes_matches_wire_layout() {
        let info = SensorInfo::parse(&R503_PARAMS).unwrap();
        assert_eq!(info.to_bytes(), R503_PARAMS);
    }

    #[test]
    fn test_display() {
        let info = SensorInfo::parse(&R503_PARAMS).unwrap();
        assert_eq!(
            info.to_string(),
            "Sensor[capacity: 200, security: 3, address: 0xFFFFFFFF, baud: 57600]"
        );
    }
}
