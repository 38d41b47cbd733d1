//! Browser-facing HTTP handling
//!
//! Provides:
//! - Capture of a plain-HTTP proxy request up to the end of its headers
//! - Target resolution from the request line and `Host` header

mod http;

pub use http::{find_header_end, read_request_head, request_line, resolve_target};

use crate::transport::TransportError;
use thiserror::Error;

/// Default port when the `Host` header names none
pub const DEFAULT_HTTP_PORT: u16 = 80;

/// Proxy errors
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Request has no Host header")]
    MissingTargetHost,

    #[error("Cannot parse request: {0}")]
    TargetParseError(String),

    #[error("Request headers exceed {0} bytes")]
    RequestTooLarge(usize),

    #[error("Client closed before sending a complete request")]
    ClientClosed,
}

/// Where the egress relay must send a decrypted request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetDescriptor {
    /// Hostname or address, exactly as named by the `Host` header
    pub host: String,
    /// TCP port
    pub port: u16,
    /// Request target from the request line
    pub path: String,
}

impl TargetDescriptor {
    /// `host:port` suitable for `TcpStream::connect`
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl std::fmt::Display for TargetDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}{}", self.host, self.port, self.path)
    }
}
