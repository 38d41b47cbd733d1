//! Transport layer
//!
//! Every socket a relay touches (browser, relay-to-relay link, target) goes
//! through a [`Transport`], which turns connect/read/write stalls into
//! [`TransportError::Timeout`] and a peer close into [`TransportError::Closed`].

mod tcp;

pub use tcp::TcpTransport;

use async_trait::async_trait;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Transport layer errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Connection to {addr} failed: {source}")]
    ConnectionFailed { addr: String, source: io::Error },

    #[error("Connection closed")]
    Closed,

    #[error("Timeout")]
    Timeout,
}

/// Trait for transport implementations
#[async_trait]
pub trait Transport: Send + Sync {
    /// Connect to a remote endpoint
    async fn connect(&mut self, addr: &str) -> Result<(), TransportError>;

    /// Send data
    async fn send(&mut self, data: &[u8]) -> Result<(), TransportError>;

    /// Receive data; a clean peer close is reported as [`TransportError::Closed`]
    async fn recv(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// Close the connection
    async fn close(&mut self) -> Result<(), TransportError>;

    /// Check if connected
    fn is_connected(&self) -> bool;

    /// Change the inactivity timeout applied to subsequent reads
    fn set_read_timeout(&mut self, timeout: Duration);
}

/// Transport configuration
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Read inactivity timeout
    pub read_timeout: Duration,
    /// Write timeout
    pub write_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            read_timeout: Duration::from_secs(60),
            write_timeout: Duration::from_secs(60),
        }
    }
}
