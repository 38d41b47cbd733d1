//! Connection management for the tunnel
//!
//! Handles the full lifecycle of a relay-to-relay connection:
//! - Marker-delimited handshake, either role
//! - Frame encryption/decryption under the negotiated session key
//! - Buffering of bytes that arrive ahead of the stage that consumes them

use super::{EncryptedFrame, TunnelError};
use crate::crypto::{CryptoError, EgressKeyPair, RelayPublicKey, SessionCipher, SessionKey};
use crate::protocol::handshake::{
    encode_key_transmission, parse_key_transmission, scan_hello, scan_key_transmission,
    scan_public_key, HandshakeRole, HELLO,
};
use crate::protocol::{HandshakeStage, ProtocolError, MAX_HANDSHAKE_MESSAGE};
use crate::transport::{Transport, TransportError};
use bytes::BytesMut;
use std::sync::Arc;
use tracing::trace;

/// Bytes tolerated before the hello marker must have shown up
const HELLO_SCAN_LIMIT: usize = 512;

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Handshake not started
    Fresh,
    /// Handshake in progress
    Handshaking,
    /// Session key established, frames may flow
    Established,
    /// Connection closed
    Closed,
}

/// A relay-to-relay tunnel connection
pub struct TunnelConnection<T: Transport> {
    transport: T,
    state: ConnectionState,
    role: HandshakeRole,
    cipher: Option<SessionCipher>,
    read_buffer: BytesMut,
    scratch: Vec<u8>,
}

impl<T: Transport> TunnelConnection<T> {
    /// Create the local-relay side of a connection
    pub fn new_initiator(transport: T, buffer_size: usize) -> Self {
        Self::new(transport, HandshakeRole::Initiator, buffer_size)
    }

    /// Create the egress-relay side of a connection
    pub fn new_responder(transport: T, buffer_size: usize) -> Self {
        Self::new(transport, HandshakeRole::Responder, buffer_size)
    }

    fn new(transport: T, role: HandshakeRole, buffer_size: usize) -> Self {
        Self {
            transport,
            state: ConnectionState::Fresh,
            role,
            cipher: None,
            read_buffer: BytesMut::with_capacity(buffer_size),
            scratch: vec![0u8; buffer_size.max(1)],
        }
    }

    /// Get current connection state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Check if the session key is established
    pub fn is_established(&self) -> bool {
        self.state == ConnectionState::Established
    }

    /// Access the underlying transport (e.g. to change its read timeout)
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Run the handshake as initiator
    ///
    /// Sends the hello, imports the responder's public key, and delivers a
    /// freshly generated session key wrapped under it.
    pub async fn initiate(&mut self) -> Result<RelayPublicKey, TunnelError> {
        self.begin_handshake(HandshakeRole::Initiator)?;

        self.transport.send(HELLO).await?;
        trace!("Hello sent");

        let pem = self
            .read_message(HandshakeStage::PublicKey, MAX_HANDSHAKE_MESSAGE, scan_public_key)
            .await?;
        let public_key = RelayPublicKey::from_pem(&pem)?;
        trace!("Imported public key {}", public_key.fingerprint());

        let session_key = SessionKey::generate()?;
        let wrapped = public_key.wrap_session_key(&session_key)?;
        self.transport.send(&encode_key_transmission(&wrapped)).await?;

        self.cipher = Some(SessionCipher::new(&session_key)?);
        self.state = ConnectionState::Established;
        Ok(public_key)
    }

    /// Run the handshake as responder using the relay's long-lived key pair
    pub async fn respond(&mut self, keys: &Arc<EgressKeyPair>) -> Result<(), TunnelError> {
        self.recv_hello().await?;
        self.send_public_key(keys).await?;
        self.recv_session_key(keys).await
    }

    /// Responder step 1: wait for the hello marker
    pub async fn recv_hello(&mut self) -> Result<(), TunnelError> {
        self.begin_handshake(HandshakeRole::Responder)?;

        self.read_message(HandshakeStage::Hello, HELLO_SCAN_LIMIT, scan_hello)
            .await?;
        trace!("Hello received");
        Ok(())
    }

    /// Responder step 2: send the PEM public key
    pub async fn send_public_key(&mut self, keys: &EgressKeyPair) -> Result<(), TunnelError> {
        self.expect_handshaking()?;

        self.transport.send(keys.public_pem().as_bytes()).await?;
        trace!("Public key sent");
        Ok(())
    }

    /// Responder step 3: receive and unwrap the session key
    ///
    /// The RSA decryption runs on the blocking pool.
    pub async fn recv_session_key(
        &mut self,
        keys: &Arc<EgressKeyPair>,
    ) -> Result<(), TunnelError> {
        self.expect_handshaking()?;

        let min_payload = keys.wrapped_key_len();
        let message = self
            .read_message(HandshakeStage::SessionKey, MAX_HANDSHAKE_MESSAGE, |buf: &[u8]| {
                scan_key_transmission(buf, min_payload)
            })
            .await?;
        let wrapped = parse_key_transmission(&message)?.to_vec();
        let keys = Arc::clone(keys);
        let session_key =
            tokio::task::spawn_blocking(move || keys.unwrap_session_key(&wrapped))
                .await
                .map_err(|_| CryptoError::KeyUnwrapFailure)??;

        self.cipher = Some(SessionCipher::new(&session_key)?);
        self.state = ConnectionState::Established;
        Ok(())
    }

    fn expect_handshaking(&self) -> Result<(), TunnelError> {
        if self.state != ConnectionState::Handshaking {
            return Err(TunnelError::InvalidState("handshake not in progress"));
        }
        Ok(())
    }

    fn begin_handshake(&mut self, role: HandshakeRole) -> Result<(), TunnelError> {
        if self.role != role {
            return Err(TunnelError::InvalidState("wrong handshake role"));
        }
        if self.state != ConnectionState::Fresh {
            return Err(TunnelError::InvalidState("handshake already attempted"));
        }
        self.state = ConnectionState::Handshaking;
        Ok(())
    }

    /// Accumulate bytes until `scan` locates the end of a message, then
    /// split the message off the read buffer
    async fn read_message<F>(
        &mut self,
        stage: HandshakeStage,
        limit: usize,
        scan: F,
    ) -> Result<BytesMut, TunnelError>
    where
        F: Fn(&[u8]) -> Option<usize>,
    {
        loop {
            if let Some(end) = scan(&self.read_buffer[..]) {
                return Ok(self.read_buffer.split_to(end));
            }

            if self.read_buffer.len() > limit {
                let err = match stage {
                    HandshakeStage::Hello => ProtocolError::MissingHello,
                    HandshakeStage::PublicKey => ProtocolError::MarkerNotFound {
                        marker: "-----END PUBLIC KEY-----",
                        limit,
                    },
                    HandshakeStage::SessionKey => ProtocolError::MarkerNotFound {
                        marker: ":END_KEY",
                        limit,
                    },
                };
                return Err(err.into());
            }

            match self.transport.recv(&mut self.scratch).await {
                Ok(n) => self.read_buffer.extend_from_slice(&self.scratch[..n]),
                Err(TransportError::Closed) => {
                    return Err(ProtocolError::ClosedDuringHandshake { stage }.into())
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Encrypt `plaintext` into one frame and send it
    ///
    /// Returns the number of bytes written to the wire.
    pub async fn send_frame(&mut self, plaintext: &[u8]) -> Result<usize, TunnelError> {
        let cipher = self.cipher.as_ref().ok_or(TunnelError::NotEstablished)?;
        let wire = EncryptedFrame::new(cipher.encrypt(plaintext)?).encode()?;

        self.transport.send(&wire).await?;
        Ok(wire.len())
    }

    /// Receive and decrypt the next frame
    ///
    /// Returns `Ok(None)` when the peer closes cleanly between frames. A tag
    /// mismatch is returned as an error and the frame is never exposed. A
    /// close or read timeout with part of a frame buffered is
    /// [`TunnelError::TruncatedFrame`], never a plain transport error.
    pub async fn recv_frame(&mut self) -> Result<Option<Vec<u8>>, TunnelError> {
        if self.cipher.is_none() {
            return Err(TunnelError::NotEstablished);
        }

        loop {
            if let Some(frame) = EncryptedFrame::decode(&mut self.read_buffer)? {
                let cipher = self.cipher.as_ref().ok_or(TunnelError::NotEstablished)?;
                return Ok(Some(cipher.decrypt(frame.as_bytes())?));
            }

            match self.transport.recv(&mut self.scratch).await {
                Ok(n) => self.read_buffer.extend_from_slice(&self.scratch[..n]),
                Err(TransportError::Closed) if self.read_buffer.is_empty() => return Ok(None),
                Err(TransportError::Closed | TransportError::Timeout)
                    if !self.read_buffer.is_empty() =>
                {
                    return Err(TunnelError::TruncatedFrame(self.read_buffer.len()))
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Close the connection and drop the session key
    pub async fn close(&mut self) {
        self.transport.close().await.ok();
        self.cipher = None;
        self.state = ConnectionState::Closed;
    }
}
