//! Streaming frame decoder
//!
//! Bytes from the link arrive in arbitrary pieces and may carry leftovers of
//! earlier exchanges. [`FrameDecoder`] buffers them, discards anything in
//! front of a start code, and after a rejected frame skips past that start
//! code so the next call resynchronizes on the following frame.

use bytes::{Buf, BytesMut};
use tracing::{debug, trace};

use crate::{
    constants::START_CODE,
    error::Result,
    packet::Packet,
};

/// Incremental decoder for a live byte stream
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: BytesMut,
    discarded: usize,
}

impl FrameDecoder {
    /// Create an empty decoder
    pub fn new() -> Self {
        Self::default()
    }

    /// Append received bytes
    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Number of buffered, not yet decoded bytes
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Total bytes dropped while hunting for start codes
    pub fn discarded(&self) -> usize {
        self.discarded
    }

    /// Drop everything buffered
    pub fn clear(&mut self) {
        if !self.buf.is_empty() {
            debug!("Discarding {} buffered bytes", self.buf.len());
            self.discarded += self.buf.len();
            self.buf.clear();
        }
    }

    /// Take up to `n` raw bytes from the front of the buffer
    pub fn take_raw(&mut self, n: usize) -> BytesMut {
        let n = n.min(self.buf.len());
        self.buf.split_to(n)
    }

    /// Decode the next complete frame
    ///
    /// Returns `Ok(None)` when more bytes are needed.
    ///
    /// # Errors
    ///
    /// Returns the decode error of a rejected frame. The offending start code
    /// has already been skipped, so calling again continues with the rest of
    /// the stream.
    pub fn next_packet(&mut self) -> Result<Option<Packet>> {
        self.sync();

        match Packet::decode(&self.buf) {
            Ok(Some((packet, consumed))) => {
                self.buf.advance(consumed);
                trace!("Decoded {}", packet);
                Ok(Some(packet))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                debug!("Rejected frame: {}", e);
                self.skip(1);
                self.sync();
                Err(e)
            }
        }
    }

    /// Drop bytes in front of the next start code
    ///
    /// A trailing lone high byte of the start code is kept since its partner
    /// may still be in flight.
    fn sync(&mut self) {
        let [hi, lo] = START_CODE.to_be_bytes();

        let position = self.buf.windows(2).position(|w| w == [hi, lo]);
        let garbage = match position {
            Some(position) => position,
            None if self.buf.last() == Some(&hi) => self.buf.len() - 1,
            None => self.buf.len(),
        };

        if garbage > 0 {
            trace!("Skipping {} bytes of garbage: {:02X?}", garbage, &self.buf[..garbage.min(16)]);
            self.skip(garbage);
        }
    }

    fn skip(&mut self, n: usize) {
        let n = n.min(self.buf.len());
        self.buf.advance(n);
        self.discarded += n;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{constants::DEFAULT_ADDRESS, error::Error, packet::PacketType};
    use pretty_assertions::assert_eq;

    fn ack(code: u8) -> BytesMut {
        Packet::new(DEFAULT_ADDRESS, PacketType::Ack, vec![code]).unwrap().encode()
    }

    #[test]
    fn test_decoder_partial_arrival() {
        let encoded = ack(0x02);
        let mut decoder = FrameDecoder::new();

        for byte in &encoded[..encoded.len() - 1] {
            decoder.extend(&[*byte]);
            assert_eq!(decoder.next_packet().unwrap(), None);
        }

        decoder.extend(&encoded[encoded.len() - 1..]);
        let packet = decoder.next_packet().unwrap().unwrap();
        assert_eq!(packet.confirmation_code().unwrap(), 0x02);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_decoder_skips_leading_garbage() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(&[0x00, 0x13, 0x37, 0xEF]);
        decoder.extend(&ack(0x00));

        let packet = decoder.next_packet().unwrap().unwrap();
        assert!(packet.is_ack());
        assert_eq!(decoder.discarded(), 4);
    }

    #[test]
    fn test_decoder_keeps_partial_start_code() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(&[0x55, 0xEF]);

        assert_eq!(decoder.next_packet().unwrap(), None);
        assert_eq!(decoder.buffered(), 1);

        let encoded = ack(0x00);
        decoder.extend(&encoded[1..]);
        assert!(decoder.next_packet().unwrap().is_some());
    }

    #[test]
    fn test_decoder_resyncs_after_corruption() {
        let mut bad = ack(0x00);
        let last = bad.len() - 1;
        bad[last] ^= 0x40;

        let mut decoder = FrameDecoder::new();
        decoder.extend(&bad);
        decoder.extend(&ack(0x09));

        assert!(matches!(
            decoder.next_packet(),
            Err(Error::ChecksumMismatch { .. })
        ));

        let packet = decoder.next_packet().unwrap().unwrap();
        assert_eq!(packet.confirmation_code().unwrap(), 0x09);
    }

    #[test]
    fn test_decoder_take_raw_and_clear() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(&[1, 2, 3, 4, 5]);

        assert_eq!(&decoder.take_raw(2)[..], &[1, 2]);
        decoder.clear();
        assert_eq!(decoder.buffered(), 0);
        assert_eq!(decoder.discarded(), 3);
    }
}
