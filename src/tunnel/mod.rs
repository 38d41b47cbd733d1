//! Tunnel layer - encrypted communication channel between the relays
//!
//! Provides:
//! - Handshake driver (hello, public key, wrapped session key)
//! - Length-prefixed encrypted frame encoding/decoding
//! - Buffered frame I/O over any [`Transport`](crate::transport::Transport)

mod connection;
mod frame;

pub use connection::{ConnectionState, TunnelConnection};
pub use frame::{EncryptedFrame, LENGTH_PREFIX_SIZE};

use crate::crypto::CryptoError;
use crate::protocol::ProtocolError;
use crate::transport::TransportError;
use thiserror::Error;

/// Tunnel layer errors
#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("Frame too large: {0} > {1}")]
    FrameTooLarge(usize, usize),

    #[error("Peer stopped mid-frame with {0} bytes buffered")]
    TruncatedFrame(usize),

    #[error("Tunnel not established")]
    NotEstablished,

    #[error("Invalid state: {0}")]
    InvalidState(&'static str),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl TunnelError {
    /// True for tag verification failures on received frames
    pub fn is_security_event(&self) -> bool {
        matches!(self, TunnelError::Crypto(e) if e.is_security_event())
    }
}
