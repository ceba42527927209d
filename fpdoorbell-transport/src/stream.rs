//! Transport over any async byte stream
//!
//! Wraps anything implementing `AsyncRead + AsyncWrite`: a serial port
//! stream, a pseudo terminal, or an in-memory duplex pipe.

use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tracing::{debug, trace};

use crate::{error::*, Transport};

/// Transport over an already opened byte stream
pub struct StreamTransport<S> {
    name: String,
    stream: Option<S>,
}

impl<S> StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin,
{
    /// Wrap an open stream
    pub fn new(name: impl Into<String>, stream: S) -> Self {
        Self {
            name: name.into(),
            stream: Some(stream),
        }
    }

    /// Take the stream back, leaving the transport disconnected
    pub fn into_inner(mut self) -> Option<S> {
        self.stream.take()
    }
}

#[async_trait]
impl<S> Transport for StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin,
{
    async fn connect(&mut self) -> Result<()> {
        // The stream is opened by the owner; closing it is final
        if self.stream.is_some() {
            Ok(())
        } else {
            Err(Error::ConnectionClosed)
        }
    }

    async fn disconnect(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            debug!("Closing {}", self.name);
            let _ = stream.shutdown().await;
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    async fn send(&mut self, data: &[u8]) -> Result<()> {
        let stream = self.stream.as_mut().ok_or(Error::NotConnected)?;

        trace!("Sending {} bytes: {:02X?}", data.len(), &data[..data.len().min(16)]);

        stream.write_all(data).await?;
        stream.flush().await?;

        Ok(())
    }

    async fn receive(&mut self, wait: Duration) -> Result<BytesMut> {
        let stream = self.stream.as_mut().ok_or(Error::NotConnected)?;

        let mut buf = BytesMut::with_capacity(512);

        let n = timeout(wait, stream.read_buf(&mut buf))
            .await
            .map_err(|_| Error::ReadTimeout)?
            .map_err(Error::Io)?;

        if n == 0 {
            return Err(Error::ConnectionClosed);
        }

        trace!("Received {} bytes: {:02X?}", n, &buf[..n.min(16)]);

        Ok(buf)
    }

    fn describe(&self) -> String {
        self.name.clone()
    }
}
