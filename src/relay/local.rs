//! Local relay worker: browser in, tunnel out

use super::{Acceptor, RelaySummary};
use crate::config::LocalConfig;
use crate::proxy::{read_request_head, request_line, ProxyError};
use crate::transport::{TcpTransport, Transport, TransportError};
use crate::tunnel::{TunnelConnection, TunnelError};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpStream;
use tracing::{debug, info, trace};

/// Progress of one browser connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalState {
    Init,
    ConnectingEgress,
    HandshakeInProgress,
    RequestPending,
    RequestSent,
    StreamingResponse,
    Closed,
}

/// Browser-facing relay
#[derive(Clone)]
pub struct LocalRelay {
    config: Arc<LocalConfig>,
    log_traffic: bool,
}

impl LocalRelay {
    pub fn new(config: LocalConfig, log_traffic: bool) -> Self {
        Self {
            config: Arc::new(config),
            log_traffic,
        }
    }

    /// Serve browsers from `acceptor` until `shutdown` resolves
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

    /// Run one request/response cycle for an accepted browser socket
    pub async fn handle(&self, browser: TcpStream) -> crate::Result<RelaySummary> {
        let mut worker = LocalWorker {
            state: LocalState::Init,
            config: &self.config,
            log_traffic: self.log_traffic,
            summary: RelaySummary::default(),
        };

        let result = worker.run(browser).await;
        worker.advance(LocalState::Closed);

        match result {
            Err(crate::Error::Proxy(ProxyError::ClientClosed)) => {
                debug!("Browser closed before sending a request");
                Ok(worker.summary)
            }
            other => other,
        }
    }
}

struct LocalWorker<'a> {
    state: LocalState,
    config: &'a LocalConfig,
    log_traffic: bool,
    summary: RelaySummary,
}

impl LocalWorker<'_> {
    fn advance(&mut self, next: LocalState) {
        trace!(from = ?self.state, to = ?next, "local state");
        self.state = next;
    }

    async fn run(&mut self, browser: TcpStream) -> crate::Result<RelaySummary> {
        let mut browser = TcpTransport::from_stream(browser, self.config.transport());

        self.advance(LocalState::ConnectingEgress);
        let mut transport = TcpTransport::new(self.config.transport());
        transport.connect(&self.config.egress).await?;
        transport.set_read_timeout(self.config.handshake_timeout());
        let mut egress = TunnelConnection::new_initiator(transport, self.config.buffer_size);

        self.advance(LocalState::HandshakeInProgress);
        let egress_key = tokio::time::timeout(self.config.handshake_timeout(), egress.initiate())
            .await
            .map_err(|_| TransportError::Timeout)??;
        debug!("Tunnel established with egress key {}", egress_key.fingerprint());

        self.advance(LocalState::RequestPending);
        let request = read_request_head(
            &mut browser,
            self.config.buffer_size,
            self.config.max_request_size,
        )
        .await?;
        if self.log_traffic {
            info!(
                "Request: {} ({} bytes)",
                request_line(&request).unwrap_or_default(),
                request.len()
            );
        }

        egress.send_frame(&request).await?;
        self.summary.request_bytes = request.len();
        self.advance(LocalState::RequestSent);

        egress
            .transport_mut()
            .set_read_timeout(self.config.response_timeout());
        self.advance(LocalState::StreamingResponse);

        loop {
            match egress.recv_frame().await {
                Ok(Some(chunk)) => {
                    browser.send(&chunk).await?;
                    self.summary.record_chunk(chunk.len());
                    if self.log_traffic {
                        debug!("Response chunk: {} bytes", chunk.len());
                    }
                }
                Ok(None) => break,
                Err(TunnelError::Transport(TransportError::Timeout)) => {
                    debug!("Egress idle, ending response");
                    break;
                }
                Err(e) => return Err(e.into()),
            }
        }

        egress.close().await;
        browser.close().await.ok();
        Ok(self.summary)
    }
}
