//! AEAD frame codec
//!
//! Every payload crossing the tunnel is sealed with AES-256-GCM under the
//! connection's session key and laid out as:
//!
//! ```text
//! +----------------+----------------+----------------------+
//! |  Nonce (12B)   |   Tag (16B)    |  Ciphertext (= len)  |
//! +----------------+----------------+----------------------+
//! ```
//!
//! A fresh random nonce is drawn for every frame; no associated data is used.

use super::{generate_nonce, random_bytes, CryptoError, FRAME_OVERHEAD, KEY_LEN, NONCE_LEN, TAG_LEN};
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM};
use std::fmt;

/// 256-bit symmetric key securing a single tunnel connection
pub struct SessionKey([u8; KEY_LEN]);

impl SessionKey {
    /// Generate a fresh key from the system CSPRNG
    pub fn generate() -> Result<Self, CryptoError> {
        let mut key = [0u8; KEY_LEN];
        random_bytes(&mut key)?;
        Ok(Self(key))
    }

    /// Create from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != KEY_LEN {
            return Err(CryptoError::InvalidKeyLength);
        }
        let mut arr = [0u8; KEY_LEN];
        arr.copy_from_slice(bytes);
        Ok(Self(arr))
    }

    /// Get as bytes
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionKey([REDACTED])")
    }
}

// Zeroize session key on drop
impl Drop for SessionKey {
    fn drop(&mut self) {
        for byte in &mut self.0 {
            unsafe {
                std::ptr::write_volatile(byte, 0);
            }
        }
        std::sync::atomic::compiler_fence(std::sync::atomic::Ordering::SeqCst);
    }
}

/// AES-256-GCM codec bound to one session key
pub struct SessionCipher {
    key: LessSafeKey,
}

impl SessionCipher {
    /// Create a new cipher from a session key
    pub fn new(key: &SessionKey) -> Result<Self, CryptoError> {
        let unbound_key = UnboundKey::new(&AES_256_GCM, key.as_bytes())
            .map_err(|_| CryptoError::InvalidKeyLength)?;

        Ok(Self {
            key: LessSafeKey::new(unbound_key),
        })
    }

    /// Encrypt `plaintext` into a `nonce ‖ tag ‖ ciphertext` frame
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let nonce = generate_nonce()?;
        self.encrypt_with_nonce(nonce, plaintext)
    }

    fn encrypt_with_nonce(
        &self,
        nonce: [u8; NONCE_LEN],
        plaintext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let mut frame = Vec::with_capacity(FRAME_OVERHEAD + plaintext.len());
        frame.extend_from_slice(&nonce);
        frame.extend_from_slice(&[0u8; TAG_LEN]);
        frame.extend_from_slice(plaintext);

        let tag = self
            .key
            .seal_in_place_separate_tag(
                Nonce::assume_unique_for_key(nonce),
                Aad::empty(),
                &mut frame[FRAME_OVERHEAD..],
            )
            .map_err(|_| CryptoError::Encryption)?;

        frame[NONCE_LEN..FRAME_OVERHEAD].copy_from_slice(tag.as_ref());
        Ok(frame)
    }

    /// Decrypt a frame produced by [`SessionCipher::encrypt`], verifying its tag
    ///
    /// Frames shorter than nonce + tag are rejected before any cryptographic
    /// work. A tag mismatch yields [`CryptoError::AuthenticationFailure`].
    pub fn decrypt(&self, frame: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if frame.len() < FRAME_OVERHEAD {
            return Err(CryptoError::MalformedFrame { len: frame.len() });
        }

        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&frame[..NONCE_LEN]);
        let tag = &frame[NONCE_LEN..FRAME_OVERHEAD];
        let ciphertext = &frame[FRAME_OVERHEAD..];

        // ring expects the tag appended to the ciphertext
        let mut buffer = Vec::with_capacity(ciphertext.len() + TAG_LEN);
        buffer.extend_from_slice(ciphertext);
        buffer.extend_from_slice(tag);

        let plaintext_len = self
            .key
            .open_in_place(Nonce::assume_unique_for_key(nonce), Aad::empty(), &mut buffer)
            .map_err(|_| CryptoError::AuthenticationFailure)?
            .len();

        buffer.truncate(plaintext_len);
        Ok(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> SessionCipher {
        SessionCipher::new(&SessionKey::generate().unwrap()).unwrap()
    }

    #[test]
    fn test_round_trip_all_lengths() {
        let cipher = cipher();
        for len in (0..=600).chain([4095, 4096, 4097, 65536]) {
            let mut plaintext = vec![0u8; len];
            random_bytes(&mut plaintext).unwrap();

            let frame = cipher.encrypt(&plaintext).unwrap();
            assert_eq!(frame.len(), len + FRAME_OVERHEAD);
            assert_eq!(cipher.decrypt(&frame).unwrap(), plaintext);
        }
    }

    #[test]
    fn test_tamper_detection_every_bit() {
        let cipher = cipher();
        let frame = cipher.encrypt(b"GET / HTTP/1.1\r\nHost: a\r\n\r\n").unwrap();

        // Every bit of tag and ciphertext
        for byte in NONCE_LEN..frame.len() {
            for bit in 0..8 {
                let mut tampered = frame.clone();
                tampered[byte] ^= 1 << bit;
                assert!(matches!(
                    cipher.decrypt(&tampered),
                    Err(CryptoError::AuthenticationFailure)
                ));
            }
        }
    }

    #[test]
    fn test_tampered_nonce_rejected() {
        let cipher = cipher();
        let mut frame = cipher.encrypt(b"payload").unwrap();
        frame[0] ^= 0x01;
        assert!(matches!(
            cipher.decrypt(&frame),
            Err(CryptoError::AuthenticationFailure)
        ));
    }

    #[test]
    fn test_short_frames_are_malformed() {
        let cipher = cipher();
        for len in 0..FRAME_OVERHEAD {
            let frame = vec![0u8; len];
            match cipher.decrypt(&frame) {
                Err(CryptoError::MalformedFrame { len: got }) => assert_eq!(got, len),
                other => panic!("expected MalformedFrame, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_empty_plaintext_frame_is_exactly_overhead() {
        let cipher = cipher();
        let frame = cipher.encrypt(&[]).unwrap();
        assert_eq!(frame.len(), FRAME_OVERHEAD);
        assert!(cipher.decrypt(&frame).unwrap().is_empty());
    }

    #[test]
    fn test_wrong_key_fails_authentication() {
        let frame = cipher().encrypt(b"secret").unwrap();
        assert!(matches!(
            cipher().decrypt(&frame),
            Err(CryptoError::AuthenticationFailure)
        ));
    }

    #[test]
    fn test_fixed_nonce_is_deterministic() {
        let key = SessionKey::from_bytes(&[0x42u8; KEY_LEN]).unwrap();
        let cipher = SessionCipher::new(&key).unwrap();
        let nonce = [7u8; NONCE_LEN];

        let a = cipher.encrypt_with_nonce(nonce, b"same").unwrap();
        let b = cipher.encrypt_with_nonce(nonce, b"same").unwrap();
        assert_eq!(a, b);
        assert_eq!(&a[..NONCE_LEN], &nonce);
    }

    #[test]
    fn test_fresh_nonce_per_frame() {
        let cipher = cipher();
        let a = cipher.encrypt(b"same").unwrap();
        let b = cipher.encrypt(b"same").unwrap();
        assert_ne!(a[..NONCE_LEN], b[..NONCE_LEN]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_session_key_length_checked() {
        assert!(matches!(
            SessionKey::from_bytes(&[0u8; 16]),
            Err(CryptoError::InvalidKeyLength)
        ));
        assert!(format!("{:?}", SessionKey::generate().unwrap()).contains("REDACTED"));
    }
}
