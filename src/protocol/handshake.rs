//! Handshake wire messages
//!
//! The exchange is marker delimited:
//!
//! ```text
//! initiator                                   responder
//!     | -- PROXY_SECURITY_HELLO\r\n ------------> |
//!     | <-------------- PEM public key (SPKI) --- |
//!     | -- ENCRYPTED_SESSION_KEY:<wrapped>:END_KEY\r\n --> |
//! ```
//!
//! Markers are found by scanning accumulated bytes for a literal substring.
//! The wrapped session key is binary, so the end marker could in principle
//! occur inside it; scanners accept a minimum payload length so the search
//! starts past the bytes the responder knows to be key material.

use super::ProtocolError;

/// Role in the handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeRole {
    /// Initiator (local relay)
    Initiator,
    /// Responder (egress relay)
    Responder,
}

/// Hello message sent by the initiator
pub const HELLO: &[u8] = b"PROXY_SECURITY_HELLO\r\n";

/// Marker the responder looks for in the hello
pub const HELLO_MARKER: &[u8] = b"PROXY_SECURITY_HELLO";

/// Footer terminating the PEM public key
pub const PUBLIC_KEY_FOOTER: &[u8] = b"-----END PUBLIC KEY-----\n";

/// Prefix of the session key transmission
pub const SESSION_KEY_PREFIX: &[u8] = b"ENCRYPTED_SESSION_KEY:";

/// Suffix of the session key transmission
pub const SESSION_KEY_SUFFIX: &[u8] = b":END_KEY\r\n";

/// Find `marker` in `haystack` at or after `from`, returning the offset just
/// past its end.
pub fn find_marker(haystack: &[u8], marker: &[u8], from: usize) -> Option<usize> {
    if marker.is_empty() || from > haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(marker.len())
        .position(|window| window == marker)
        .map(|pos| from + pos + marker.len())
}

/// Offset just past the hello marker, if present
pub fn scan_hello(buf: &[u8]) -> Option<usize> {
    find_marker(buf, HELLO_MARKER, 0)
}

/// Offset just past the PEM footer, if present
pub fn scan_public_key(buf: &[u8]) -> Option<usize> {
    find_marker(buf, PUBLIC_KEY_FOOTER, 0)
}

/// Build the session key transmission for a wrapped key
pub fn encode_key_transmission(wrapped: &[u8]) -> Vec<u8> {
    let mut message =
        Vec::with_capacity(SESSION_KEY_PREFIX.len() + wrapped.len() + SESSION_KEY_SUFFIX.len());
    message.extend_from_slice(SESSION_KEY_PREFIX);
    message.extend_from_slice(wrapped);
    message.extend_from_slice(SESSION_KEY_SUFFIX);
    message
}

/// Offset just past a complete session key transmission, if present
///
/// The suffix search begins `min_payload` bytes after the prefix.
pub fn scan_key_transmission(buf: &[u8], min_payload: usize) -> Option<usize> {
    let payload_start = find_marker(buf, SESSION_KEY_PREFIX, 0)?;
    find_marker(buf, SESSION_KEY_SUFFIX, payload_start + min_payload)
}

/// Extract the wrapped key from a complete transmission returned by
/// [`scan_key_transmission`]
pub fn parse_key_transmission(message: &[u8]) -> Result<&[u8], ProtocolError> {
    let payload_start = find_marker(message, SESSION_KEY_PREFIX, 0)
        .ok_or(ProtocolError::MalformedKeyTransmission)?;

    let payload_end = message
        .len()
        .checked_sub(SESSION_KEY_SUFFIX.len())
        .filter(|end| *end >= payload_start && message.ends_with(SESSION_KEY_SUFFIX))
        .ok_or(ProtocolError::MalformedKeyTransmission)?;

    if payload_end == payload_start {
        return Err(ProtocolError::MalformedKeyTransmission);
    }

    Ok(&message[payload_start..payload_end])
}
