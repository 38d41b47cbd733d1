//! Protocol definitions and constants

pub mod handshake;

use std::time::Duration;
use thiserror::Error;

/// Handshake stage, used for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeStage {
    /// Waiting for the initiator's hello
    Hello,
    /// Waiting for the responder's public key
    PublicKey,
    /// Waiting for the wrapped session key
    SessionKey,
}

impl std::fmt::Display for HandshakeStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            HandshakeStage::Hello => "hello",
            HandshakeStage::PublicKey => "public key",
            HandshakeStage::SessionKey => "session key",
        };
        f.write_str(name)
    }
}

/// Protocol errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Peer did not send the hello marker")]
    MissingHello,

    #[error("Connection closed while waiting for {stage}")]
    ClosedDuringHandshake { stage: HandshakeStage },

    #[error("Marker {marker:?} not found within {limit} bytes")]
    MarkerNotFound { marker: &'static str, limit: usize },

    #[error("Malformed session key transmission")]
    MalformedKeyTransmission,
}

/// Maximum bytes accumulated while waiting for any single handshake marker
pub const MAX_HANDSHAKE_MESSAGE: usize = 16 * 1024;

/// Handshake timeout in seconds
pub const HANDSHAKE_TIMEOUT: u64 = 30;

/// Default egress-to-target connect timeout
pub const TARGET_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Default inter-chunk inactivity timeout marking the end of a response
pub const CHUNK_TIMEOUT: Duration = Duration::from_secs(2);

/// Default read buffer size
pub const DEFAULT_BUFFER_SIZE: usize = 4096;
