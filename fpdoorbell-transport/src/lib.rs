//! Transport layer for the sensor link
//!
//! The module speaks over a plain byte stream. A direct UART is the usual
//! wiring; serial-to-TCP bridges (ser2net, ESP-Link) are common on hosts
//! that sit away from the door.

pub mod error;
pub mod stream;
pub mod tcp;

pub use error::{Error, Result};
pub use stream::StreamTransport;
pub use tcp::TcpTransport;

use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use tracing::debug;

/// How long [`Transport::drain`] waits for more stale bytes
pub const DRAIN_QUIET_PERIOD: Duration = Duration::from_millis(5);

/// Upper bound on bytes [`Transport::drain`] throws away in one call
pub const DRAIN_LIMIT: usize = 64 * 1024;

/// Transport trait for different communication methods
#[async_trait]
pub trait Transport: Send {
    /// Open the link
    async fn connect(&mut self) -> Result<()>;

    /// Close the link
    async fn disconnect(&mut self) -> Result<()>;

    /// Check if connected
    fn is_connected(&self) -> bool;

    /// Send raw bytes
    async fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Receive whatever bytes arrive first, waiting at most `timeout`
    async fn receive(&mut self, timeout: Duration) -> Result<BytesMut>;

    /// Discard bytes left over from earlier exchanges
    ///
    /// Reads until the line stays quiet for [`DRAIN_QUIET_PERIOD`] and
    /// returns the number of bytes thrown away.
    async fn drain(&mut self) -> Result<usize> {
        let mut dropped = 0;

        while dropped < DRAIN_LIMIT {
            match self.receive(DRAIN_QUIET_PERIOD).await {
                Ok(stale) => dropped += stale.len(),
                Err(Error::ReadTimeout) => break,
                Err(e) => return Err(e),
            }
        }

        if dropped > 0 {
            debug!("Drained {} stale bytes from {}", dropped, self.describe());
        }

        Ok(dropped)
    }

    /// Human-readable description of the remote end
    fn describe(&self) -> String;
}
