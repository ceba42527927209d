//! Sensor protocol frame structure and encoding/decoding

use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

use crate::{
    checksum,
    constants::{CHECKSUM_SIZE, HEADER_SIZE, MAX_PAYLOAD_SIZE, START_CODE},
    error::{Error, Result},
};

/// Package identifier
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    /// Host to module instruction
    Command = 0x01,

    /// Data packet; never appears alone, always follows a command or ack
    Data = 0x02,

    /// Module reply carrying a confirmation code
    Ack = 0x07,

    /// Last data packet of a transfer
    EndOfData = 0x08,
}

impl PacketType {
    /// Check if this packet carries transfer data
    pub fn is_data(self) -> bool {
        matches!(self, Self::Data | Self::EndOfData)
    }
}

impl From<PacketType> for u8 {
    fn from(packet_type: PacketType) -> u8 {
        packet_type as u8
    }
}

impl TryFrom<u8> for PacketType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x01 => Ok(Self::Command),
            0x02 => Ok(Self::Data),
            0x07 => Ok(Self::Ack),
            0x08 => Ok(Self::EndOfData),
            _ => Err(Error::UnknownPacketType(value)),
        }
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Command => "COMMAND",
            Self::Data => "DATA",
            Self::Ack => "ACK",
            Self::EndOfData => "END_OF_DATA",
        };
        write!(f, "{}(0x{:02X})", name, *self as u8)
    }
}

/// Sensor protocol frame
///
/// # Frame Structure
///
/// ```text
/// ┌──────────┬───────────┬──────────┬──────────┬───────────┬──────────┐
/// │  Start   │  Address  │   Type   │  Length  │  Payload  │ Checksum │
/// │ 2 bytes  │  4 bytes  │  1 byte  │ 2 bytes  │  N bytes  │ 2 bytes  │
/// │ (0xEF01) │ (BE u32)  │          │ (N + 2)  │           │ (BE u16) │
/// └──────────┴───────────┴──────────┴──────────┴───────────┴──────────┘
/// ```
///
/// All multi-byte values are big-endian. The checksum covers type, length
/// and payload.
///
/// # Examples
///
/// ```
/// use fpdoorbell_core::{Packet, PacketType};
///
/// // GenImg instruction
/// let packet = Packet::command(0xFFFF_FFFF, vec![0x01]).unwrap();
/// let encoded = packet.encode();
///
/// let (decoded, consumed) = Packet::decode(&encoded).unwrap().unwrap();
/// assert_eq!(consumed, encoded.len());
/// assert_eq!(decoded.packet_type, PacketType::Command);
/// assert_eq!(decoded.payload(), &[0x01]);
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct Packet {
    /// Module address
    pub address: u32,

    /// Package identifier
    pub packet_type: PacketType,

    /// Packet content (instruction + parameters, confirmation code +
    /// parameters, or raw data)
    payload: Bytes,
}

impl Packet {
    /// Create a packet
    ///
    /// # Errors
    ///
    /// Returns [`Error::PayloadTooLarge`] for payloads over 256 bytes.
    pub fn new(address: u32, packet_type: PacketType, payload: impl Into<Bytes>) -> Result<Self> {
        let payload = payload.into();

        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(Error::PayloadTooLarge {
                size: payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }

        Ok(Self {
            address,
            packet_type,
            payload,
        })
    }

    /// Create a command packet
    pub fn command(address: u32, payload: impl Into<Bytes>) -> Result<Self> {
        Self::new(address, PacketType::Command, payload)
    }

    /// Create a data packet; `last` marks the end of the transfer
    pub fn data(address: u32, payload: impl Into<Bytes>, last: bool) -> Result<Self> {
        let packet_type = if last {
            PacketType::EndOfData
        } else {
            PacketType::Data
        };
        Self::new(address, packet_type, payload)
    }

    /// Packet content
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Consume the packet, returning its content
    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    /// Value of the length field (payload + checksum)
    pub fn length_field(&self) -> u16 {
        (self.payload.len() + CHECKSUM_SIZE) as u16
    }

    /// Calculate checksum for this packet
    pub fn checksum(&self) -> u16 {
        checksum::calculate(self.packet_type.into(), self.length_field(), &self.payload)
    }

    /// Confirmation code of an acknowledge packet
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyAck`] if the payload is empty.
    pub fn confirmation_code(&self) -> Result<u8> {
        self.payload.first().copied().ok_or(Error::EmptyAck)
    }

    /// Encode packet to bytes
    ///
    /// # Examples
    ///
    /// ```
    /// use fpdoorbell_core::Packet;
    ///
    /// let packet = Packet::command(0xFFFF_FFFF, vec![0x01]).unwrap();
    /// let bytes = packet.encode();
    /// assert_eq!(
    ///     &bytes[..],
    ///     &[0xEF, 0x01, 0xFF, 0xFF, 0xFF, 0xFF, 0x01, 0x00, 0x03, 0x01, 0x00, 0x05]
    /// );
    /// ```
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(self.size());

        buf.put_u16(START_CODE);
        buf.put_u32(self.address);
        buf.put_u8(self.packet_type.into());
        buf.put_u16(self.length_field());
        buf.put_slice(&self.payload);
        buf.put_u16(self.checksum());

        buf
    }

    /// Decode one frame from the front of `buf`
    ///
    /// Returns `Ok(None)` when `buf` holds an incomplete frame, so callers
    /// reading a live stream can poll again once more bytes arrive. On
    /// success the frame is returned together with the number of bytes it
    /// occupied.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `buf` does not start with the start code
    /// - the length field is outside `2..=258`
    /// - the packet type is unknown
    /// - checksum verification fails
    pub fn decode(buf: &[u8]) -> Result<Option<(Self, usize)>> {
        if buf.len() < 2 {
            return Ok(None);
        }

        let start = u16::from_be_bytes([buf[0], buf[1]]);
        if start != START_CODE {
            return Err(Error::BadStartCode(start));
        }

        if buf.len() < HEADER_SIZE {
            return Ok(None);
        }

        let address = u32::from_be_bytes([buf[2], buf[3], buf[4], buf[5]]);
        let type_raw = buf[6];
        let length = u16::from_be_bytes([buf[7], buf[8]]);

        if !(CHECKSUM_SIZE..=MAX_PAYLOAD_SIZE + CHECKSUM_SIZE).contains(&(length as usize)) {
            return Err(Error::InvalidLength(length));
        }

        let packet_type = PacketType::try_from(type_raw)?;

        let total = HEADER_SIZE + length as usize;
        if buf.len() < total {
            return Ok(None);
        }

        let payload = &buf[HEADER_SIZE..total - CHECKSUM_SIZE];
        let received = u16::from_be_bytes([buf[total - 2], buf[total - 1]]);
        let expected = checksum::calculate(type_raw, length, payload);

        if expected != received {
            return Err(Error::ChecksumMismatch { expected, received });
        }

        let packet = Self {
            address,
            packet_type,
            payload: Bytes::copy_from_slice(payload),
        };

        Ok(Some((packet, total)))
    }

    /// Check if this is an acknowledge packet
    pub fn is_ack(&self) -> bool {
        self.packet_type == PacketType::Ack
    }

    /// Check if this packet terminates a transfer
    pub fn is_end_of_data(&self) -> bool {
        self.packet_type == PacketType::EndOfData
    }

    /// Get total encoded size
    pub fn size(&self) -> usize {
        HEADER_SIZE + self.payload.len() + CHECKSUM_SIZE
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let preview = &self.payload[..self.payload.len().min(16)];
        f.debug_struct("Packet")
            .field("address", &format!("0x{:08X}", self.address))
            .field("packet_type", &self.packet_type)
            .field("checksum", &format!("0x{:04X}", self.checksum()))
            .field("payload_len", &self.payload.len())
            .field("payload", &hex::encode(preview))
            .finish()
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Packet[{}](address=0x{:08X}, len={})",
            self.packet_type,
            self.address,
            self.payload.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::DEFAULT_ADDRESS;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn test_packet_command() {
        let packet = Packet::command(DEFAULT_ADDRESS, vec![0x13, 0, 0, 0, 0]).unwrap();
        assert_eq!(packet.packet_type, PacketType::Command);
        assert_eq!(packet.length_field(), 7);
        assert_eq!(packet.checksum(), 0x001B);
    }

    #[test]
    fn test_packet_encode_layout() {
        let packet = Packet::command(0x1234_5678, vec![0x0F]).unwrap();
        let encoded = packet.encode();

        assert_eq!(
            &encoded[..],
            &[0xEF, 0x01, 0x12, 0x34, 0x56, 0x78, 0x01, 0x00, 0x03, 0x0F, 0x00, 0x13]
        );
        assert_eq!(encoded.len(), packet.size());
    }

    #[test]
    fn test_packet_decode_ack() {
        let raw = [0xEF, 0x01, 0xFF, 0xFF, 0xFF, 0xFF, 0x07, 0x00, 0x03, 0x00, 0x00, 0x0A];
        let (packet, consumed) = Packet::decode(&raw).unwrap().unwrap();

        assert_eq!(consumed, raw.len());
        assert!(packet.is_ack());
        assert_eq!(packet.confirmation_code().unwrap(), 0x00);
    }

    #[test]
    fn test_packet_decode_incomplete() {
        let encoded = Packet::data(DEFAULT_ADDRESS, vec![0xAB; 64], false)
            .unwrap()
            .encode();

        for cut in [0, 1, 5, HEADER_SIZE, encoded.len() - 1] {
            assert_eq!(Packet::decode(&encoded[..cut]).unwrap(), None, "cut at {}", cut);
        }
    }

    #[test]
    fn test_packet_decode_trailing_bytes() {
        let mut encoded = Packet::command(DEFAULT_ADDRESS, vec![0x1D]).unwrap().encode();
        let frame_len = encoded.len();
        encoded.extend_from_slice(&[0xEF, 0x01, 0x00]);

        let (_, consumed) = Packet::decode(&encoded).unwrap().unwrap();
        assert_eq!(consumed, frame_len);
    }

    #[test]
    fn test_packet_checksum_verification() {
        let packet = Packet::command(DEFAULT_ADDRESS, vec![0x01]).unwrap();
        let mut encoded = packet.encode();

        // Corrupt checksum (last two bytes)
        let last = encoded.len() - 1;
        encoded[last] ^= 0xFF;

        let result = Packet::decode(&encoded);

        if let Err(Error::ChecksumMismatch { expected, received }) = result {
            assert_ne!(expected, received);
        } else {
            panic!("Expected ChecksumMismatch error");
        }
    }

    #[test]
    fn test_packet_bad_start_code() {
        let result = Packet::decode(&[0x00, 0x01, 0xFF]);
        assert!(matches!(result, Err(Error::BadStartCode(0x0001))));
    }

    #[test]
    fn test_packet_invalid_length() {
        let raw = [0xEF, 0x01, 0xFF, 0xFF, 0xFF, 0xFF, 0x07, 0x00, 0x01];
        assert!(matches!(Packet::decode(&raw), Err(Error::InvalidLength(1))));

        let raw = [0xEF, 0x01, 0xFF, 0xFF, 0xFF, 0xFF, 0x02, 0x01, 0x03];
        assert!(matches!(Packet::decode(&raw), Err(Error::InvalidLength(259))));
    }

    #[test]
    fn test_packet_unknown_type() {
        let raw = [0xEF, 0x01, 0xFF, 0xFF, 0xFF, 0xFF, 0x05, 0x00, 0x03];
        assert!(matches!(Packet::decode(&raw), Err(Error::UnknownPacketType(0x05))));
    }

    #[test]
    fn test_packet_payload_too_large() {
        let result = Packet::data(DEFAULT_ADDRESS, vec![0; MAX_PAYLOAD_SIZE + 1], true);
        assert!(matches!(result, Err(Error::PayloadTooLarge { size: 257, max: 256 })));
    }

    #[test]
    fn test_empty_ack() {
        let packet = Packet::new(DEFAULT_ADDRESS, PacketType::Ack, Bytes::new()).unwrap();
        assert_eq!(packet.confirmation_code(), Err(Error::EmptyAck));
    }

    fn packet_type() -> impl Strategy<Value = PacketType> {
        prop_oneof![
            Just(PacketType::Command),
            Just(PacketType::Data),
            Just(PacketType::Ack),
            Just(PacketType::EndOfData),
        ]
    }

    proptest! {
        #[test]
        fn prop_encode_decode_round_trip(
            address in any::<u32>(),
            packet_type in packet_type(),
            payload in proptest::collection::vec(any::<u8>(), 0..=MAX_PAYLOAD_SIZE),
        ) {
            let packet = Packet::new(address, packet_type, payload.clone()).unwrap();
            let encoded = packet.encode();

            let (decoded, consumed) = Packet::decode(&encoded).unwrap().unwrap();
            prop_assert_eq!(consumed, encoded.len());
            prop_assert_eq!(decoded.packet_type, packet_type);
            prop_assert_eq!(decoded.payload(), payload.as_slice());
        }

        #[test]
        fn prop_corrupt_checksum_byte_rejected(
            payload in proptest::collection::vec(any::<u8>(), 0..=MAX_PAYLOAD_SIZE),
            which in 0usize..2,
            flip in 1u8..=255,
        ) {
            let mut encoded = Packet::data(DEFAULT_ADDRESS, payload, false).unwrap().encode();
            let index = encoded.len() - 2 + which;
            encoded[index] ^= flip;

            let is_checksum_error = matches!(
                Packet::decode(&encoded),
                Err(Error::ChecksumMismatch { .. })
            );
            prop_assert!(is_checksum_error);
        }
    }
}
