//! # fpdoorbell-core
//!
//! Core protocol implementation for R502/R503 style fingerprint modules.
//!
//! This crate provides the low-level protocol primitives:
//! - Frame structure and encoding/decoding
//! - Streaming decoder with resynchronization
//! - Checksum calculation
//! - Instruction and confirmation code definitions
//! - Protocol constants

pub mod checksum;
pub mod codec;
pub mod command;
pub mod confirm;
pub mod constants;
pub mod error;
pub mod packet;
pub mod session;

pub use codec::FrameDecoder;
pub use command::{Command, Instruction};
pub use confirm::ConfirmationCode;
pub use error::{Error, Result};
pub use packet::{Packet, PacketType};
pub use session::{Session, SessionInfo, SessionState};

/// Protocol version information
pub const PROTOCOL_VERSION: &str = "1.0";
