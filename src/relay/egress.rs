//! Egress relay worker: tunnel in, target server out

use super::{Acceptor, RelaySummary};
use crate::config::EgressConfig;
use crate::crypto::EgressKeyPair;
use crate::proxy::{request_line, resolve_target};
use crate::transport::{TcpTransport, Transport, TransportError};
use crate::tunnel::TunnelConnection;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpStream;
use tracing::{debug, info, trace, warn};

/// Progress of one tunnel connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EgressState {
    Init,
    AwaitingHello,
    PublicKeySent,
    AwaitingSessionKey,
    SessionEstablished,
    AwaitingRequest,
    RequestDecrypted,
    ConnectingTarget,
    ForwardingRequest,
    StreamingResponse,
    Closed,
}

/// Internet-facing relay
#[derive(Clone)]
pub struct EgressRelay {
    keys: Arc<EgressKeyPair>,
    config: Arc<EgressConfig>,
    log_traffic: bool,
}

impl EgressRelay {
    pub fn new(keys: Arc<EgressKeyPair>, config: EgressConfig, log_traffic: bool) -> Self {
        Self {
            keys,
            config: Arc::new(config),
            log_traffic,
        }
    }

    /// Serve local relays from `acceptor` until `shutdown` resolves
    pub async fn serve<S>(self, acceptor: Acceptor, shutdown: S)
    where
        S: Future<Output = ()>,
    {
        acceptor
            .run(
                move |stream, _| {
                    let relay = self.clone();
                    async move { relay.handle(stream).await }
                },
                shutdown,
            )
            .await
    }

    /// Run the handshake and one request/response cycle for a local relay
    pub async fn handle(&self, stream: TcpStream) -> crate::Result<RelaySummary> {
        let mut worker = EgressWorker {
            state: EgressState::Init,
            keys: &self.keys,
            config: &self.config,
            log_traffic: self.log_traffic,
            summary: RelaySummary::default(),
        };

        let result = worker.run(stream).await;
        worker.advance(EgressState::Closed);
        result
    }
}

struct EgressWorker<'a> {
    state: EgressState,
    keys: &'a Arc<EgressKeyPair>,
    config: &'a EgressConfig,
    log_traffic: bool,
    summary: RelaySummary,
}

impl EgressWorker<'_> {
    fn advance(&mut self, next: EgressState) {
        trace!(from = ?self.state, to = ?next, "egress state");
        self.state = next;
    }

    async fn handshake(
        &mut self,
        tunnel: &mut TunnelConnection<TcpTransport>,
    ) -> crate::Result<()> {
        self.advance(EgressState::AwaitingHello);
        tunnel.recv_hello().await?;

        tunnel.send_public_key(self.keys).await?;
        self.advance(EgressState::PublicKeySent);

        self.advance(EgressState::AwaitingSessionKey);
        tunnel.recv_session_key(self.keys).await?;
        self.advance(EgressState::SessionEstablished);
        Ok(())
    }

    async fn run(&mut self, stream: TcpStream) -> crate::Result<RelaySummary> {
        let transport = TcpTransport::from_stream(stream, self.config.tunnel_transport());
        let mut tunnel = TunnelConnection::new_responder(transport, self.config.buffer_size);

        tokio::time::timeout(self.config.handshake_timeout(), self.handshake(&mut tunnel))
            .await
            .map_err(|_| TransportError::Timeout)??;
        debug!("Session established");

        self.advance(EgressState::AwaitingRequest);
        tunnel
            .transport_mut()
            .set_read_timeout(self.config.request_timeout());
        let request = match tunnel.recv_frame().await? {
            Some(request) => request,
            None => {
                debug!("Local relay closed before sending a request");
                return Ok(self.summary);
            }
        };
        self.summary.request_bytes = request.len();
        self.advance(EgressState::RequestDecrypted);

        let target = resolve_target(&request)?;
        if self.log_traffic {
            info!(
                "Request: {} -> {} ({} bytes)",
                request_line(&request).unwrap_or_default(),
                target,
                request.len()
            );
        }

        self.advance(EgressState::ConnectingTarget);
        let mut upstream = TcpTransport::new(self.config.target_transport());
        upstream.connect(&target.authority()).await?;

        self.advance(EgressState::ForwardingRequest);
        upstream.send(&request).await?;

        self.advance(EgressState::StreamingResponse);
        let mut chunk = vec![0u8; self.config.buffer_size];
        loop {
            match upstream.recv(&mut chunk).await {
                Ok(n) => {
                    tunnel.send_frame(&chunk[..n]).await?;
                    self.summary.record_chunk(n);
                    if self.log_traffic {
                        debug!("Response chunk: {} bytes", n);
                    }
                }
                Err(TransportError::Closed) => break,
                Err(TransportError::Timeout) => {
                    debug!("Target idle, ending response");
                    break;
                }
                Err(e) => {
                    warn!("Target read failed from {}: {}", target.authority(), e);
                    break;
                }
            }
        }

        upstream.close().await.ok();
        tunnel.close().await;
        Ok(self.summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::testing::shared_keys_arc;
    use crate::protocol::ProtocolError;
    use crate::tunnel::TunnelError;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn relay(config: EgressConfig) -> EgressRelay {
        EgressRelay::new(shared_keys_arc(), config, true)
    }

    async fn tunnel_pair() -> (TunnelConnection<TcpTransport>, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        let tunnel = TunnelConnection::new_initiator(
            TcpTransport::from_stream(client.unwrap(), Default::default()),
            4096,
        );
        (tunnel, accepted.unwrap().0)
    }

    #[tokio::test]
    async fn test_streams_response_in_chunks() {
        let target = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let target_addr = target.local_addr().unwrap();
        let body = vec![b'x'; 10_000];
        let response = [b"HTTP/1.1 200 OK\r\n\r\n".as_slice(), &body].concat();
        let expected = response.clone();

        let target_task = tokio::spawn(async move {
            let (mut socket, _) = target.accept().await.unwrap();
            let mut buf = vec![0u8; 1024];
            let n = socket.read(&mut buf).await.unwrap();
            socket.write_all(&response).await.unwrap();
            buf.truncate(n);
            buf
        });

        let relay = relay(EgressConfig {
            buffer_size: 1024,
            ..EgressConfig::default()
        });
        let (mut local, accepted) = tunnel_pair().await;
        let worker = tokio::spawn(async move { relay.handle(accepted).await });

        local.initiate().await.unwrap();
        let request = format!("GET /x HTTP/1.1\r\nHost: {}\r\n\r\n", target_addr);
        local.send_frame(request.as_bytes()).await.unwrap();

        let mut received = Vec::new();
        let mut frames = 0;
        while let Some(chunk) = local.recv_frame().await.unwrap() {
            assert!(chunk.len() <= 1024);
            received.extend_from_slice(&chunk);
            frames += 1;
        }
        assert_eq!(received, expected);
        assert!(frames >= 10);

        assert_eq!(target_task.await.unwrap(), request.as_bytes());
        let summary = worker.await.unwrap().unwrap();
        assert_eq!(summary.request_bytes, request.len());
        assert_eq!(summary.response_bytes, expected.len() as u64);
        assert_eq!(summary.chunks, frames);
    }

    #[tokio::test]
    async fn test_idle_target_ends_response() {
        let target = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let target_addr = target.local_addr().unwrap();
        let target_task = tokio::spawn(async move {
            let (mut socket, _) = target.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            socket.read(&mut buf).await.unwrap();
            socket.write_all(b"HTTP/1.1 200 OK\r\n\r\npartial").await.unwrap();
            // Keep the socket open well past the chunk timeout
            tokio::time::sleep(Duration::from_secs(2)).await;
        });

        let relay = relay(EgressConfig {
            chunk_timeout_ms: 200,
            ..EgressConfig::default()
        });
        let (mut local, accepted) = tunnel_pair().await;
        let worker = tokio::spawn(async move { relay.handle(accepted).await });

        local.initiate().await.unwrap();
        let request = format!("GET / HTTP/1.1\r\nHost: {}\r\n\r\n", target_addr);
        local.send_frame(request.as_bytes()).await.unwrap();

        let mut received = Vec::new();
        while let Some(chunk) = local.recv_frame().await.unwrap() {
            received.extend_from_slice(&chunk);
        }
        assert_eq!(received, b"HTTP/1.1 200 OK\r\n\r\npartial");
        assert!(worker.await.unwrap().is_ok());
        target_task.abort();
    }

    #[tokio::test]
    async fn test_missing_host_never_contacts_target() {
        let relay = relay(EgressConfig::default());
        let (mut local, accepted) = tunnel_pair().await;
        let worker = tokio::spawn(async move { relay.handle(accepted).await });

        local.initiate().await.unwrap();
        local
            .send_frame(b"GET / HTTP/1.1\r\nAccept: */*\r\n\r\n")
            .await
            .unwrap();

        assert!(local.recv_frame().await.unwrap().is_none());
        assert!(matches!(
            worker.await.unwrap(),
            Err(crate::Error::Proxy(crate::proxy::ProxyError::MissingTargetHost))
        ));
    }

    #[tokio::test]
    async fn test_tampered_request_is_security_event() {
        let relay = relay(EgressConfig::default());
        let (mut local, accepted) = tunnel_pair().await;
        let worker = tokio::spawn(async move { relay.handle(accepted).await });

        local.initiate().await.unwrap();
        // Hand-build a frame whose ciphertext is random bytes
        let mut frame = vec![0u8, 0, 0, 40];
        frame.extend_from_slice(&[0x5Au8; 40]);
        local.transport_mut().send(&frame).await.unwrap();

        let result = worker.await.unwrap();
        assert!(result.as_ref().unwrap_err().is_security_event());
        assert!(matches!(
            local.recv_frame().await,
            Ok(None) | Err(TunnelError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn test_non_tunnel_peer_rejected() {
        let relay = relay(EgressConfig::default());
        let (mut local, accepted) = tunnel_pair().await;
        let worker = tokio::spawn(async move { relay.handle(accepted).await });

        local.transport_mut().send(&[b'G'; 600]).await.unwrap();

        assert!(matches!(
            worker.await.unwrap(),
            Err(crate::Error::Tunnel(TunnelError::Protocol(
                ProtocolError::MissingHello
            )))
        ));
    }

    #[tokio::test]
    async fn test_refused_target_ends_cycle() {
        let closed = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let target_addr = closed.local_addr().unwrap();
        drop(closed);

        let relay = relay(EgressConfig::default());
        let (mut local, accepted) = tunnel_pair().await;
        let worker = tokio::spawn(async move { relay.handle(accepted).await });

        local.initiate().await.unwrap();
        let request = format!("GET / HTTP/1.1\r\nHost: {}\r\n\r\n", target_addr);
        local.send_frame(request.as_bytes()).await.unwrap();

        assert!(local.recv_frame().await.unwrap().is_none());
        assert!(matches!(
            worker.await.unwrap(),
            Err(crate::Error::Transport(TransportError::ConnectionFailed { .. }))
        ));
    }
}
