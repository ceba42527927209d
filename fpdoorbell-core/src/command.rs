//! Sensor instruction set
//!
//! Naming follows the R502/R503 datasheet.

use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

use crate::error::{Error, Result};

/// Instruction codes
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Instruction {
    // Fingerprint processing
    GenImg = 0x01,
    Img2Tz = 0x02,
    Search = 0x04,
    RegModel = 0x05,

    // Template library
    Store = 0x06,
    LoadChar = 0x07,
    UpChar = 0x08,
    DownChar = 0x09,
    DeletChar = 0x0C,
    Empty = 0x0D,

    // System
    ReadSysPara = 0x0F,
    VfyPwd = 0x13,
    TempleteNum = 0x1D,
    ReadIndexTable = 0x1F,
}

impl Instruction {
    /// Get instruction name
    pub fn name(self) -> &'static str {
        match self {
            Self::GenImg => "GEN_IMG",
            Self::Img2Tz => "IMG2TZ",
            Self::Search => "SEARCH",
            Self::RegModel => "REG_MODEL",
            Self::Store => "STORE",
            Self::LoadChar => "LOAD_CHAR",
            Self::UpChar => "UP_CHAR",
            Self::DownChar => "DOWN_CHAR",
            Self::DeletChar => "DELET_CHAR",
            Self::Empty => "EMPTY",
            Self::ReadSysPara => "READ_SYS_PARA",
            Self::VfyPwd => "VFY_PWD",
            Self::TempleteNum => "TEMPLETE_NUM",
            Self::ReadIndexTable => "READ_INDEX_TABLE",
        }
    }

    /// Check if the module follows the ack with data packets
    pub fn sends_data(self) -> bool {
        matches!(self, Self::UpChar)
    }

    /// Check if the module expects data packets after acking
    pub fn receives_data(self) -> bool {
        matches!(self, Self::DownChar)
    }
}

impl From<Instruction> for u8 {
    fn from(instruction: Instruction) -> u8 {
        instruction as u8
    }
}

impl TryFrom<u8> for Instruction {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x01 => Ok(Self::GenImg),
            0x02 => Ok(Self::Img2Tz),
            0x04 => Ok(Self::Search),
            0x05 => Ok(Self::RegModel),
            0x06 => Ok(Self::Store),
            0x07 => Ok(Self::LoadChar),
            0x08 => Ok(Self::UpChar),
            0x09 => Ok(Self::DownChar),
            0x0C => Ok(Self::DeletChar),
            0x0D => Ok(Self::Empty),
            0x0F => Ok(Self::ReadSysPara),
            0x13 => Ok(Self::VfyPwd),
            0x1D => Ok(Self::TempleteNum),
            0x1F => Ok(Self::ReadIndexTable),
            _ => Err(Error::UnknownInstruction(value)),
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(0x{:02X})", self.name(), *self as u8)
    }
}

/// A command together with its parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Verify the handshake password
    VfyPwd {
        password: u32,
    },

    /// Read status register and basic configuration
    ReadSysPara,

    /// Number of stored templates
    TempleteNum,

    /// Read the occupancy bitmap of one index page
    ReadIndexTable {
        page: u8,
    },

    /// Capture a fingerprint image into the image buffer
    GenImg,

    /// Extract features from the image buffer into a character buffer
    Img2Tz {
        buffer: u8,
    },

    /// Search the library for the contents of a character buffer
    Search {
        buffer: u8,
        start_page: u16,
        page_count: u16,
    },

    /// Merge the character buffers into a model
    RegModel,

    /// Store a character buffer at a library slot
    Store {
        buffer: u8,
        page_id: u16,
    },

    /// Load a library slot into a character buffer
    LoadChar {
        buffer: u8,
        page_id: u16,
    },

    /// Send a character buffer to the host
    UpChar {
        buffer: u8,
    },

    /// Receive a character buffer from the host
    DownChar {
        buffer: u8,
    },

    /// Delete `count` templates starting at `page_id`
    DeletChar {
        page_id: u16,
        count: u16,
    },

    /// Delete every template
    Empty,
}

impl Command {
    /// Instruction code of this command
    pub fn instruction(&self) -> Instruction {
        match self {
            Self::VfyPwd { .. } => Instruction::VfyPwd,
            Self::ReadSysPara => Instruction::ReadSysPara,
            Self::TempleteNum => Instruction::TempleteNum,
            Self::ReadIndexTable { .. } => Instruction::ReadIndexTable,
            Self::GenImg => Instruction::GenImg,
            Self::Img2Tz { .. } => Instruction::Img2Tz,
            Self::Search { .. } => Instruction::Search,
            Self::RegModel => Instruction::RegModel,
            Self::Store { .. } => Instruction::Store,
            Self::LoadChar { .. } => Instruction::LoadChar,
            Self::UpChar { .. } => Instruction::UpChar,
            Self::DownChar { .. } => Instruction::DownChar,
            Self::DeletChar { .. } => Instruction::DeletChar,
            Self::Empty => Instruction::Empty,
        }
    }

    /// Encode the command packet content (instruction code + parameters)
    ///
    /// # Examples
    ///
    /// ```
    /// use fpdoorbell_core::Command;
    ///
    /// let payload = Command::Store { buffer: 1, page_id: 0x0102 }.to_payload();
    /// assert_eq!(&payload[..], &[0x06, 0x01, 0x01, 0x02]);
    /// ```
    pub fn to_payload(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(6);
        buf.put_u8(self.instruction().into());

        match *self {
            Self::VfyPwd { password } => buf.put_u32(password),
            Self::ReadIndexTable { page } => buf.put_u8(page),
            Self::Img2Tz { buffer } | Self::UpChar { buffer } | Self::DownChar { buffer } => {
                buf.put_u8(buffer)
            }
            Self::Search {
                buffer,
                start_page,
                page_count,
            } => {
                buf.put_u8(buffer);
                buf.put_u16(start_page);
                buf.put_u16(page_count);
            }
            Self::Store { buffer, page_id } | Self::LoadChar { buffer, page_id } => {
                buf.put_u8(buffer);
                buf.put_u16(page_id);
            }
            Self::DeletChar { page_id, count } => {
                buf.put_u16(page_id);
                buf.put_u16(count);
            }
            Self::ReadSysPara | Self::TempleteNum | Self::GenImg | Self::RegModel | Self::Empty => {}
        }

        buf.freeze()
    }

    /// Decode command packet content
    ///
    /// The inverse of [`Command::to_payload`]; used by the simulated sensor.
    pub fn from_payload(payload: &[u8]) -> Result<Self> {
        let (&code, args) = payload.split_first().ok_or(Error::EmptyCommand)?;
        let instruction = Instruction::try_from(code)?;

        let byte = |i: usize| args.get(i).copied().unwrap_or_default();
        let word = |i: usize| u16::from_be_bytes([byte(i), byte(i + 1)]);

        Ok(match instruction {
            Instruction::VfyPwd => Self::VfyPwd {
                password: u32::from_be_bytes([byte(0), byte(1), byte(2), byte(3)]),
            },
            Instruction::ReadSysPara => Self::ReadSysPara,
            Instruction::TempleteNum => Self::TempleteNum,
            Instruction::ReadIndexTable => Self::ReadIndexTable { page: byte(0) },
            Instruction::GenImg => Self::GenImg,
            Instruction::Img2Tz => Self::Img2Tz { buffer: byte(0) },
            Instruction::Search => Self::Search {
                buffer: byte(0),
                start_page: word(1),
                page_count: word(3),
            },
            Instruction::RegModel => Self::RegModel,
            Instruction::Store => Self::Store {
                buffer: byte(0),
                page_id: word(1),
            },
            Instruction::LoadChar => Self::LoadChar {
                buffer: byte(0),
                page_id: word(1),
            },
            Instruction::UpChar => Self::UpChar { buffer: byte(0) },
            Instruction::DownChar => Self::DownChar { buffer: byte(0) },
            Instruction::DeletChar => Self::DeletChar {
                page_id: word(0),
                count: word(2),
            },
            Instruction::Empty => Self::Empty,
        })
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.instruction())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_instruction_conversion() {
        assert_eq!(u8::from(Instruction::GenImg), 0x01);
        assert_eq!(Instruction::try_from(0x13).unwrap(), Instruction::VfyPwd);
    }

    #[test]
    fn test_unknown_instruction() {
        assert!(matches!(
            Instruction::try_from(0xAA),
            Err(Error::UnknownInstruction(0xAA))
        ));
    }

    #[test]
    fn test_instruction_data_phase() {
        assert!(Instruction::UpChar.sends_data());
        assert!(Instruction::DownChar.receives_data());
        assert!(!Instruction::Search.sends_data());
    }

    #[test]
    fn test_command_payloads() {
        assert_eq!(
            &Command::VfyPwd { password: 0x0A0B0C0D }.to_payload()[..],
            &[0x13, 0x0A, 0x0B, 0x0C, 0x0D]
        );
        assert_eq!(
            &Command::Search { buffer: 1, start_page: 0, page_count: 200 }.to_payload()[..],
            &[0x04, 0x01, 0x00, 0x00, 0x00, 0xC8]
        );
        assert_eq!(
            &Command::DeletChar { page_id: 7, count: 1 }.to_payload()[..],
            &[0x0C, 0x00, 0x07, 0x00, 0x01]
        );
        assert_eq!(&Command::GenImg.to_payload()[..], &[0x01]);
    }

    #[test]
    fn test_command_from_payload() {
        let commands = [
            Command::Img2Tz { buffer: 3 },
            Command::LoadChar { buffer: 1, page_id: 42 },
            Command::ReadIndexTable { page: 0 },
            Command::Empty,
        ];

        for command in commands {
            assert_eq!(Command::from_payload(&command.to_payload()).unwrap(), command);
        }
    }

    #[test]
    fn test_command_display() {
        assert_eq!(Command::RegModel.to_string(), "REG_MODEL(0x05)");
    }
}
