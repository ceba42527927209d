//! Device link: framed request/reply exchanges over a transport
//!
//! Every wait here is bounded by an explicit timeout. This is the only
//! layer that blocks; the engines above budget one exchange per tick.

use std::time::Duration;

use bytes::Bytes;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use fpdoorbell_core::{
    constants::{DEFAULT_ADDRESS, DEFAULT_REPLY_TIMEOUT_MS},
    Command, ConfirmationCode, FrameDecoder, Packet, PacketType,
};
use fpdoorbell_transport::Transport;

use crate::error::{Error, Result};

/// Decoded acknowledge packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    /// Confirmation code
    pub code: ConfirmationCode,

    /// Reply parameters following the confirmation code
    pub params: Bytes,
}

impl Ack {
    fn from_packet(packet: Packet) -> Result<Self> {
        if packet.packet_type != PacketType::Ack {
            return Err(Error::UnexpectedPacket {
                expected: PacketType::Ack,
                actual: packet.packet_type,
            });
        }

        let code = ConfirmationCode::from(packet.confirmation_code()?);
        let params = packet.into_payload().slice(1..);

        Ok(Self { code, params })
    }

    /// Check if the command succeeded
    pub fn is_ok(&self) -> bool {
        self.code.is_ok()
    }
}

/// Framed link to one module
pub struct DeviceLink {
    transport: Box<dyn Transport>,
    decoder: FrameDecoder,
    address: u32,
    timeout: Duration,
    consecutive_failures: u32,
}

impl DeviceLink {
    /// Create a link to the module at the factory default address
    pub fn new(transport: impl Transport + 'static) -> Self {
        Self {
            transport: Box::new(transport),
            decoder: FrameDecoder::new(),
            address: DEFAULT_ADDRESS,
            timeout: Duration::from_millis(DEFAULT_REPLY_TIMEOUT_MS),
            consecutive_failures: 0,
        }
    }

    /// Set module address
    pub fn with_address(mut self, address: u32) -> Self {
        self.address = address;
        self
    }

    /// Set reply timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Module address
    pub fn address(&self) -> u32 {
        self.address
    }

    /// Reply timeout used by [`DeviceLink::transact`]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Exchanges in a row that got no reply at all
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Open the transport if needed
    pub async fn open(&mut self) -> Result<()> {
        if !self.transport.is_connected() {
            debug!("Opening link to {}", self.transport.describe());
            self.transport.connect().await?;
        }
        Ok(())
    }

    /// Close the transport
    pub async fn close(&mut self) -> Result<()> {
        self.decoder.clear();
        self.transport.disconnect().await?;
        Ok(())
    }

    /// Check if the transport is open
    pub fn is_open(&self) -> bool {
        self.transport.is_connected()
    }

    /// Discard stale bytes on the line and in the decoder
    pub async fn flush(&mut self) -> Result<usize> {
        let buffered = self.decoder.buffered();
        self.decoder.clear();

        let drained = self
            .transport
            .drain()
            .await
            .inspect_err(|_| self.consecutive_failures += 1)?;

        Ok(buffered + drained)
    }

    /// Send a command packet
    pub async fn send_command(&mut self, command: &Command) -> Result<()> {
        trace!("Sending command {}", command);
        let packet = Packet::command(self.address, command.to_payload())?;
        self.send_packet(&packet).await
    }

    /// Send a data packet; `last` marks it as end of data
    pub async fn send_data(&mut self, payload: Bytes, last: bool) -> Result<()> {
        let packet = Packet::data(self.address, payload, last)?;
        self.send_packet(&packet).await
    }

    /// Send any packet
    pub async fn send_packet(&mut self, packet: &Packet) -> Result<()> {
        trace!("Sending: {:?}", packet);

        let data = packet.encode();
        self.transport
            .send(&data)
            .await
            .inspect_err(|_| self.consecutive_failures += 1)?;

        Ok(())
    }

    /// Read the next frame, waiting at most `timeout`
    ///
    /// # Errors
    ///
    /// Framing errors are returned as they occur; the decoder has already
    /// skipped the bad frame, so a later call resynchronizes.
    pub async fn read_packet(&mut self, timeout: Duration) -> Result<Packet> {
        let deadline = Instant::now() + timeout;

        loop {
            match self.decoder.next_packet() {
                Ok(Some(packet)) => return self.accept(packet),
                Ok(None) => {}
                Err(e) => {
                    warn!("Dropped malformed frame: {}", e);
                    return Err(e.into());
                }
            }

            self.fill(deadline).await?;
        }
    }

    /// Read the next frame and interpret it as an acknowledge packet
    pub async fn await_ack(&mut self, timeout: Duration) -> Result<Ack> {
        let packet = self.read_packet(timeout).await?;
        Ack::from_packet(packet)
    }

    /// Read exactly `n` raw bytes, waiting at most `timeout`
    pub async fn read_bytes(&mut self, n: usize, timeout: Duration) -> Result<Bytes> {
        let deadline = Instant::now() + timeout;

        while self.decoder.buffered() < n {
            self.fill(deadline).await?;
        }

        self.consecutive_failures = 0;
        Ok(self.decoder.take_raw(n).freeze())
    }

    /// Send a command and wait for its acknowledge packet
    pub async fn transact(&mut self, command: &Command) -> Result<Ack> {
        self.send_command(command).await?;
        let ack = self.await_ack(self.timeout).await?;

        debug!("{} -> {}", command, ack.code);
        Ok(ack)
    }

    async fn fill(&mut self, deadline: Instant) -> Result<()> {
        let remaining = deadline.saturating_duration_since(Instant::now());

        if remaining.is_zero() {
            self.consecutive_failures += 1;
            return Err(fpdoorbell_transport::Error::ReadTimeout.into());
        }

        match self.transport.receive(remaining).await {
            Ok(bytes) => {
                self.decoder.extend(&bytes);
                Ok(())
            }
            Err(e) => {
                self.consecutive_failures += 1;
                Err(e.into())
            }
        }
    }

    fn accept(&mut self, packet: Packet) -> Result<Packet> {
        if packet.address != self.address {
            return Err(fpdoorbell_core::Error::AddressMismatch {
                expected: self.address,
                actual: packet.address,
            }
            .into());
        }

        self.consecutive_failures = 0;
        trace!("Received: {:?}", packet);
        Ok(packet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fpdoorbell_transport::StreamTransport;
    use pretty_assertions::assert_eq;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

    fn link() -> (DeviceLink, DuplexStream) {
        let (near, far) = tokio::io::duplex(4096);
        (DeviceLink::new(StreamTransport::new("duplex", near)), far)
    }

    fn ack_bytes(address: u32, payload: &[u8]) -> Vec<u8> {
        Packet::new(address, PacketType::Ack, payload.to_vec())
            .unwrap()
            .encode()
            .to_vec()
    }

    #[tokio::test]
    async fn test_transact_reads_ack() {
        let (mut link, mut far) = link();

        far.write_all(&ack_bytes(DEFAULT_ADDRESS, &[0x00, 0x00, 0x05]))
            .await
            .unwrap();
        let ack = link.transact(&Command::TempleteNum).await.unwrap();

        assert!(ack.is_ok());
        assert_eq!(&ack.params[..], &[0x00, 0x05]);

        let mut sent = [0u8; 12];
        far.read_exact(&mut sent).await.unwrap();
        assert_eq!(sent[9], 0x1D);
    }

    #[tokio::test]
    async fn test_ack_split_across_reads() {
        let (mut link, mut far) = link();
        let frame = ack_bytes(DEFAULT_ADDRESS, &[0x02]);

        let writer = tokio::spawn(async move {
            for chunk in frame.chunks(3) {
                far.write_all(chunk).await.unwrap();
                tokio::task::yield_now().await;
            }
            far
        });

        let ack = link.await_ack(Duration::from_secs(1)).await.unwrap();
        assert_eq!(ack.code, ConfirmationCode::NoFinger);
        writer.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_await_ack_timeout_counts_failure() {
        let (mut link, _far) = link();

        let result = link.await_ack(Duration::from_millis(200)).await;

        assert!(matches!(
            result,
            Err(Error::Transport(fpdoorbell_transport::Error::ReadTimeout))
        ));
        assert_eq!(link.consecutive_failures(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_discards_stale_bytes() {
        let (mut link, mut far) = link();

        far.write_all(&[0x12, 0x34]).await.unwrap();
        far.write_all(&ack_bytes(DEFAULT_ADDRESS, &[0x09])).await.unwrap();

        assert_eq!(link.flush().await.unwrap(), 14);

        far.write_all(&ack_bytes(DEFAULT_ADDRESS, &[0x00])).await.unwrap();
        let ack = link.await_ack(Duration::from_secs(1)).await.unwrap();
        assert!(ack.is_ok());
    }

    #[tokio::test]
    async fn test_checksum_error_then_resync() {
        let (mut link, mut far) = link();

        let mut bad = ack_bytes(DEFAULT_ADDRESS, &[0x00]);
        let last = bad.len() - 1;
        bad[last] ^= 0x01;
        far.write_all(&bad).await.unwrap();
        far.write_all(&ack_bytes(DEFAULT_ADDRESS, &[0x0A])).await.unwrap();

        let first = link.await_ack(Duration::from_secs(1)).await;
        assert!(matches!(
            first,
            Err(Error::Core(fpdoorbell_core::Error::ChecksumMismatch { .. }))
        ));

        let second = link.await_ack(Duration::from_secs(1)).await.unwrap();
        assert_eq!(second.code, ConfirmationCode::EnrollMismatch);
    }

    #[tokio::test]
    async fn test_unexpected_packet_type() {
        let (mut link, mut far) = link();

        let data = Packet::data(DEFAULT_ADDRESS, vec![1, 2, 3], false).unwrap().encode();
        far.write_all(&data).await.unwrap();

        let result = link.await_ack(Duration::from_secs(1)).await;
        assert!(matches!(
            result,
            Err(Error::UnexpectedPacket {
                expected: PacketType::Ack,
                actual: PacketType::Data
            })
        ));
    }

    #[tokio::test]
    async fn test_address_mismatch_rejected() {
        let (mut link, mut far) = link();

        far.write_all(&ack_bytes(0x1234_5678, &[0x00])).await.unwrap();

        let result = link.await_ack(Duration::from_secs(1)).await;
        assert!(matches!(
            result,
            Err(Error::Core(fpdoorbell_core::Error::AddressMismatch { .. }))
        ));
    }

    #[tokio::test]
    async fn test_read_bytes() {
        let (mut link, mut far) = link();

        far.write_all(&[1, 2, 3, 4, 5, 6]).await.unwrap();

        let bytes = link.read_bytes(4, Duration::from_secs(1)).await.unwrap();
        assert_eq!(&bytes[..], &[1, 2, 3, 4]);

        let rest = link.read_bytes(2, Duration::from_secs(1)).await.unwrap();
        assert_eq!(&rest[..], &[5, 6]);
    }
}
