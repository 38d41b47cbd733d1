//! Key management for the relay tunnel
//!
//! The egress relay owns one RSA key pair for its whole lifetime and hands the
//! PEM-encoded public half to every local relay that connects. Local relays
//! import that key and use it to wrap a fresh [`SessionKey`] per connection.

use super::{CryptoError, SessionKey};
use base64::Engine;
use rand::rngs::OsRng;
use rsa::pkcs8::{DecodePublicKey, EncodePublicKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::{BigUint, Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use std::fmt;

/// RSA modulus size in bits
pub const RSA_KEY_BITS: usize = 2048;

/// RSA public exponent
pub const RSA_PUBLIC_EXPONENT: u64 = 65537;

/// Long-lived egress relay key pair
///
/// Immutable after generation; share it between connection workers behind an
/// `Arc`.
pub struct EgressKeyPair {
    private: RsaPrivateKey,
    public_pem: String,
}

impl EgressKeyPair {
    /// Generate a new 2048-bit key pair
    pub fn generate() -> Result<Self, CryptoError> {
        Self::generate_with_bits(RSA_KEY_BITS)
    }

    /// Generate a key pair with a custom modulus size
    pub fn generate_with_bits(bits: usize) -> Result<Self, CryptoError> {
        let exponent = BigUint::from(RSA_PUBLIC_EXPONENT);
        let private = RsaPrivateKey::new_with_exp(&mut OsRng, bits, &exponent)
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;

        let public_pem = private
            .to_public_key()
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;

        Ok(Self {
            private,
            public_pem,
        })
    }

    /// SubjectPublicKeyInfo PEM sent to local relays during the handshake
    pub fn public_pem(&self) -> &str {
        &self.public_pem
    }

    /// Length in bytes of a session key wrapped under this key pair
    pub fn wrapped_key_len(&self) -> usize {
        self.private.size()
    }

    /// Base64 SHA-256 digest of the public PEM, safe to log
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.public_pem)
    }

    /// Recover a session key wrapped with RSA-OAEP (SHA-256 hash and MGF1)
    ///
    /// Every failure collapses into [`CryptoError::KeyUnwrapFailure`].
    pub fn unwrap_session_key(&self, wrapped: &[u8]) -> Result<SessionKey, CryptoError> {
        let mut bytes = self
            .private
            .decrypt(Oaep::new::<Sha256>(), wrapped)
            .map_err(|_| CryptoError::KeyUnwrapFailure)?;

        let key = SessionKey::from_bytes(&bytes).map_err(|_| CryptoError::KeyUnwrapFailure);
        bytes.fill(0);
        key
    }
}

impl fmt::Debug for EgressKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EgressKeyPair")
            .field("fingerprint", &self.fingerprint())
            .field("private", &"[REDACTED]")
            .finish()
    }
}

/// Egress relay public key as imported by a local relay
#[derive(Clone)]
pub struct RelayPublicKey {
    key: RsaPublicKey,
    pem: String,
}

impl RelayPublicKey {
    /// Import a PEM-encoded SubjectPublicKeyInfo
    pub fn from_pem(bytes: &[u8]) -> Result<Self, CryptoError> {
        let pem = std::str::from_utf8(bytes).map_err(|_| CryptoError::KeyImportFailure)?;
        let key =
            RsaPublicKey::from_public_key_pem(pem).map_err(|_| CryptoError::KeyImportFailure)?;

        Ok(Self {
            key,
            pem: pem.to_string(),
        })
    }

    /// Wrap a session key with RSA-OAEP (SHA-256 hash and MGF1)
    pub fn wrap_session_key(&self, session_key: &SessionKey) -> Result<Vec<u8>, CryptoError> {
        self.key
            .encrypt(&mut OsRng, Oaep::new::<Sha256>(), session_key.as_bytes())
            .map_err(|_| CryptoError::KeyWrapFailure)
    }

    /// Modulus size in bits
    pub fn bits(&self) -> usize {
        self.key.n().bits()
    }

    /// Base64 SHA-256 digest of the PEM, safe to log
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.pem)
    }
}

impl fmt::Debug for RelayPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RelayPublicKey({})", self.fingerprint())
    }
}

fn fingerprint(pem: &str) -> String {
    let digest = ring::digest::digest(&ring::digest::SHA256, pem.as_bytes());
    base64::engine::general_purpose::STANDARD_NO_PAD.encode(digest.as_ref())
}
