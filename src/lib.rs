//! # Veilgate
//!
//! A two-hop HTTP forward proxy. A *local relay* faces the browser and an
//! *egress relay* faces the open web; every byte exchanged between the two
//! relays travels inside an authenticated-encryption tunnel keyed per
//! connection.
//!
//! ## Features
//!
//! - **Per-connection session keys**: AES-256-GCM keys generated by the local
//!   relay and delivered under RSA-OAEP (SHA-256)
//! - **Authenticated framing**: every payload is `nonce ‖ tag ‖ ciphertext`,
//!   tampering terminates the connection
//! - **Shared-nothing workers**: one task per accepted connection, failures
//!   and panics stay inside the task that caused them
//!
//! ## Architecture
//!
//! ```text
//!  browser ──HTTP──▶ local relay ══encrypted tunnel══▶ egress relay ──HTTP──▶ target
//!                    (initiator)                       (responder)
//! ┌─────────────────────────────────────────────────────┐
//! │                    Relay Layer                       │
//! │       (acceptor, local worker, egress worker)        │
//! ├─────────────────────────────────────────────────────┤
//! │                   Tunnel Layer                       │
//! │       (handshake driver, length-prefixed frames)     │
//! ├─────────────────────────────────────────────────────┤
//! │                   Crypto Layer                       │
//! │     (AES-256-GCM codec, RSA-OAEP key transport)      │
//! ├─────────────────────────────────────────────────────┤
//! │                  Transport Layer                     │
//! │             (TCP with bounded timeouts)              │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod crypto;
pub mod protocol;
pub mod proxy;
pub mod relay;
pub mod transport;
pub mod tunnel;

pub use config::Config;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Maximum plaintext carried by a single encrypted frame (1 MiB)
pub const MAX_PLAINTEXT_SIZE: usize = 1 << 20;

/// Maximum encoded frame size: plaintext plus nonce and tag
pub const MAX_FRAME_SIZE: usize = MAX_PLAINTEXT_SIZE + crypto::FRAME_OVERHEAD;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Crypto error: {0}")]
    Crypto(#[from] crypto::CryptoError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] protocol::ProtocolError),

    #[error("Transport error: {0}")]
    Transport(#[from] transport::TransportError),

    #[error("Tunnel error: {0}")]
    Tunnel(#[from] tunnel::TunnelError),

    #[error("Proxy error: {0}")]
    Proxy(#[from] proxy::ProxyError),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// True when the error indicates tampering or a wrong key on the tunnel.
    ///
    /// These are reported as security events and never retried.
    pub fn is_security_event(&self) -> bool {
        match self {
            Error::Crypto(e) => e.is_security_event(),
            Error::Tunnel(e) => e.is_security_event(),
            _ => false,
        }
    }
}
