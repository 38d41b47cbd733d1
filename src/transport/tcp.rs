//! TCP transport with bounded connect, read and write times

use super::{Transport, TransportConfig, TransportError};
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// TCP transport
pub struct TcpTransport {
    stream: Option<TcpStream>,
    config: TransportConfig,
}

impl TcpTransport {
    /// Create a new, unconnected TCP transport
    pub fn new(config: TransportConfig) -> Self {
        Self {
            stream: None,
            config,
        }
    }

    /// Create with default configuration
    pub fn new_default() -> Self {
        Self::new(TransportConfig::default())
    }

    /// Wrap a socket returned by `accept`
    pub fn from_stream(stream: TcpStream, config: TransportConfig) -> Self {
        stream.set_nodelay(true).ok();
        Self {
            stream: Some(stream),
            config,
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&mut self, addr: &str) -> Result<(), TransportError> {
        let stream = tokio::time::timeout(self.config.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(|source| TransportError::ConnectionFailed {
                addr: addr.to_string(),
                source,
            })?;

        stream.set_nodelay(true).ok();

        self.stream = Some(stream);
        Ok(())
    }

    async fn send(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::Closed)?;

        tokio::time::timeout(self.config.write_timeout, stream.write_all(data))
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(TransportError::Io)?;

        Ok(())
    }

    async fn recv(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::Closed)?;

        let n = tokio::time::timeout(self.config.read_timeout, stream.read(buf))
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(TransportError::Io)?;

        if n == 0 {
            return Err(TransportError::Closed);
        }

        Ok(n)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if let Some(mut stream) = self.stream.take() {
            stream.shutdown().await.ok();
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn set_read_timeout(&mut self, timeout: Duration) {
        self.config.read_timeout = timeout;
    }
}
