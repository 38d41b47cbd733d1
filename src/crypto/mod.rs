//! Cryptographic primitives for the relay tunnel
//!
//! This module provides:
//! - AES-256-GCM frame encryption under a per-connection session key
//! - RSA-2048 key pair generation and PEM (SPKI) serialization
//! - RSA-OAEP (SHA-256) session key transport
//! - Secure random number generation

mod aead;
mod keys;

pub use aead::{SessionCipher, SessionKey};
pub use keys::{EgressKeyPair, RelayPublicKey, RSA_KEY_BITS, RSA_PUBLIC_EXPONENT};

use thiserror::Error;

/// Length of symmetric key in bytes
pub const KEY_LEN: usize = 32;

/// Length of nonce in bytes
pub const NONCE_LEN: usize = 12;

/// Length of authentication tag in bytes
pub const TAG_LEN: usize = 16;

/// Bytes added to every plaintext by the frame codec (nonce + tag)
pub const FRAME_OVERHEAD: usize = NONCE_LEN + TAG_LEN;

/// Cryptographic errors
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Malformed frame: {len} bytes is shorter than nonce and tag")]
    MalformedFrame { len: usize },

    #[error("Authentication failed: frame was tampered with or the key is wrong")]
    AuthenticationFailure,

    #[error("Public key import failed")]
    KeyImportFailure,

    #[error("Session key unwrap failed")]
    KeyUnwrapFailure,

    #[error("Session key wrap failed")]
    KeyWrapFailure,

    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    #[error("Encryption failed")]
    Encryption,

    #[error("Secure random source unavailable")]
    Random,

    #[error("Invalid key length")]
    InvalidKeyLength,
}

impl CryptoError {
    /// Tag mismatches are the only crypto failures that signal tampering.
    pub fn is_security_event(&self) -> bool {
        matches!(self, CryptoError::AuthenticationFailure)
    }
}

/// Fill `buf` with cryptographically secure random bytes
pub fn random_bytes(buf: &mut [u8]) -> Result<(), CryptoError> {
    use ring::rand::{SecureRandom, SystemRandom};
    let rng = SystemRandom::new();
    rng.fill(buf).map_err(|_| CryptoError::Random)
}

/// Generate a random nonce
pub fn generate_nonce() -> Result<[u8; NONCE_LEN], CryptoError> {
    let mut nonce = [0u8; NONCE_LEN];
    random_bytes(&mut nonce)?;
    Ok(nonce)
}
