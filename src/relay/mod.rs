//! Relay engine
//!
//! Provides:
//! - A listening acceptor that runs one supervised worker per connection
//! - The local relay worker (browser side, tunnel initiator)
//! - The egress relay worker (internet side, tunnel responder)
//!
//! Workers share nothing but immutable configuration and, on the egress side,
//! the relay key pair. A failure or panic in one worker never reaches the
//! acceptor or any other worker.

mod acceptor;
mod egress;
mod local;

pub use acceptor::Acceptor;
pub use egress::{EgressRelay, EgressState};
pub use local::{LocalRelay, LocalState};

use std::fmt;

/// Byte counts for one completed request/response cycle
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RelaySummary {
    /// Plaintext request bytes forwarded
    pub request_bytes: usize,
    /// Plaintext response bytes forwarded
    pub response_bytes: u64,
    /// Response chunks forwarded, one encrypted frame each
    pub chunks: u64,
}

impl RelaySummary {
    pub(crate) fn record_chunk(&mut self, len: usize) {
        self.response_bytes += len as u64;
        self.chunks += 1;
    }
}

impl fmt::Display for RelaySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} request bytes, {} response bytes in {} chunks",
            self.request_bytes, self.response_bytes, self.chunks
        )
    }
}
