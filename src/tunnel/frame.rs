//! Wire envelope for encrypted frames
//!
//! Frame format:
//! ```text
//! +--------+--------+--------+--------+
//! |          Length (4B, BE)          |
//! +--------+--------+--------+--------+
//! |            Nonce (12B)            |
//! +--------+--------+--------+--------+
//! |             Tag (16B)             |
//! +--------+--------+--------+--------+
//! |            Ciphertext             |
//! +--------+--------+--------+--------+
//! ```
//!
//! `Length` covers nonce, tag and ciphertext.

use super::TunnelError;
use crate::MAX_FRAME_SIZE;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Size of the length prefix in bytes
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// One sealed payload: `nonce ‖ tag ‖ ciphertext`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedFrame(Bytes);

impl EncryptedFrame {
    /// Wrap the output of the session cipher
    pub fn new(sealed: impl Into<Bytes>) -> Self {
        Self(sealed.into())
    }

    /// Sealed bytes without the length prefix
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Length of the sealed bytes
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when the frame carries no bytes at all
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Encode frame to bytes
    pub fn encode(&self) -> Result<BytesMut, TunnelError> {
        if self.0.len() > MAX_FRAME_SIZE {
            return Err(TunnelError::FrameTooLarge(self.0.len(), MAX_FRAME_SIZE));
        }

        let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + self.0.len());
        buf.put_u32(self.0.len() as u32);
        buf.extend_from_slice(&self.0);
        Ok(buf)
    }

    /// Decode frame from bytes
    ///
    /// Returns `Ok(None)` until a whole frame is buffered. The declared
    /// length is checked before anything is allocated.
    pub fn decode(buf: &mut BytesMut) -> Result<Option<Self>, TunnelError> {
        if buf.len() < LENGTH_PREFIX_SIZE {
            return Ok(None);
        }

        let frame_len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        if frame_len > MAX_FRAME_SIZE {
            return Err(TunnelError::FrameTooLarge(frame_len, MAX_FRAME_SIZE));
        }

        if buf.len() < LENGTH_PREFIX_SIZE + frame_len {
            return Ok(None);
        }

        buf.advance(LENGTH_PREFIX_SIZE);
        Ok(Some(Self(buf.split_to(frame_len).freeze())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_encode_decode() {
        let original = EncryptedFrame::new(vec![7u8; 40]);
        let mut encoded = original.encode().unwrap();
        assert_eq!(encoded.len(), LENGTH_PREFIX_SIZE + 40);
        assert_eq!(&encoded[..4], &[0, 0, 0, 40]);

        let decoded = EncryptedFrame::decode(&mut encoded).unwrap().unwrap();
        assert_eq!(decoded, original);
        assert!(encoded.is_empty());
    }

    #[test]
    fn test_partial_frame_waits() {
        let encoded = EncryptedFrame::new(vec![1u8; 64]).encode().unwrap();

        let mut buf = BytesMut::new();
        for byte in &encoded[..encoded.len() - 1] {
            buf.put_u8(*byte);
            assert!(EncryptedFrame::decode(&mut buf).unwrap().is_none());
        }
        buf.put_u8(encoded[encoded.len() - 1]);
        assert_eq!(EncryptedFrame::decode(&mut buf).unwrap().unwrap().len(), 64);
    }

    #[test]
    fn test_back_to_back_frames() {
        let mut buf = EncryptedFrame::new(&b"first frame payload"[..]).encode().unwrap();
        buf.extend_from_slice(&EncryptedFrame::new(&b"second"[..]).encode().unwrap());

        let first = EncryptedFrame::decode(&mut buf).unwrap().unwrap();
        let second = EncryptedFrame::decode(&mut buf).unwrap().unwrap();
        assert_eq!(first.as_bytes(), b"first frame payload");
        assert_eq!(second.as_bytes(), b"second");
        assert!(EncryptedFrame::decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_oversized_length_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u32((MAX_FRAME_SIZE + 1) as u32);
        assert!(matches!(
            EncryptedFrame::decode(&mut buf),
            Err(TunnelError::FrameTooLarge(..))
        ));
    }
}
