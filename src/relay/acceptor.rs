//! Listening socket and per-connection supervision

use super::RelaySummary;
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn, Instrument};

/// Pause after a failed `accept`, so descriptor exhaustion does not spin
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Accepts connections and hands each one to its own worker task
pub struct Acceptor {
    listener: TcpListener,
    role: &'static str,
}

impl Acceptor {
    /// Bind the listening socket
    ///
    /// Failure here is fatal for the relay process.
    pub async fn bind(addr: &str, role: &'static str) -> crate::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!("{} relay listening on {}", role, listener.local_addr()?);
        Ok(Self { listener, role })
    }

    /// Address actually bound (useful with port 0)
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept until `shutdown` resolves, then wait for in-flight workers
    ///
    /// Each connection runs `handler` in a fresh task. Errors are logged; a
    /// panicking worker is reported and the loop keeps accepting. Shutdown
    /// only stops new accepts: connections already running finish or time
    /// out on their own before this returns.
    pub async fn run<F, Fut, S>(self, handler: F, shutdown: S)
    where
        F: Fn(TcpStream, SocketAddr) -> Fut,
        Fut: Future<Output = crate::Result<RelaySummary>> + Send + 'static,
        S: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut workers = JoinSet::new();
        let mut next_id: u64 = 0;

        loop {
            tokio::select! {
                accept_result = self.listener.accept() => {
                    match accept_result {
                        Ok((stream, peer_addr)) => {
                            next_id += 1;
                            debug!("New connection from {}", peer_addr);
                            let worker = handler(stream, peer_addr);
                            workers.spawn(supervise(self.role, next_id, peer_addr, worker));
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                            tokio::time::sleep(ACCEPT_BACKOFF).await;
                        }
                    }
                }
                // Reap finished workers so the set does not grow unbounded
                Some(_) = workers.join_next(), if !workers.is_empty() => {}
                _ = &mut shutdown => {
                    info!("Shutting down {} relay...", self.role);
                    break;
                }
            }
        }

        drop(self.listener);
        if !workers.is_empty() {
            info!("Waiting for {} active connection(s)", workers.len());
        }
        while workers.join_next().await.is_some() {}
        info!("{} relay stopped", self.role);
    }
}

/// Run `worker` in its own task and report how it ended
///
/// The returned future completes once the worker has finished or panicked.
fn supervise<Fut>(
    role: &'static str,
    id: u64,
    peer: SocketAddr,
    worker: Fut,
) -> impl Future<Output = ()> + Send + 'static
where
    Fut: Future<Output = crate::Result<RelaySummary>> + Send + 'static,
{
    let span = tracing::info_span!("conn", role, id, %peer);
    let inner = tokio::spawn(worker.instrument(span.clone()));

    async move {
        match inner.await {
            Ok(Ok(summary)) => debug!("Connection finished: {}", summary),
            Ok(Err(e)) if e.is_security_event() => {
                error!(target: "security", "SECURITY ALERT: {}", e);
            }
            Ok(Err(e)) => warn!("Connection failed: {}", e),
            Err(e) if e.is_panic() => error!("Connection worker panicked"),
            Err(e) => debug!("Connection worker cancelled: {}", e),
        }
    }
    .instrument(span)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_panicking_worker_does_not_stop_acceptor() {
        let acceptor = Acceptor::bind("127.0.0.1:0", "test").await.unwrap();
        let addr = acceptor.local_addr().unwrap();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();

        let server = tokio::spawn(acceptor.run(
            |mut stream: TcpStream, _| async move {
                let mut byte = [0u8; 1];
                stream.read_exact(&mut byte).await?;
                if byte[0] == b'!' {
                    panic!("worker failure");
                }
                stream.write_all(b"ok").await?;
                Ok::<_, crate::Error>(RelaySummary::default())
            },
            async {
                stop_rx.await.ok();
            },
        ));

        let mut doomed = TcpStream::connect(addr).await.unwrap();
        doomed.write_all(b"!").await.unwrap();
        let mut buf = [0u8; 2];
        assert_eq!(doomed.read(&mut buf).await.unwrap(), 0);

        let mut healthy = TcpStream::connect(addr).await.unwrap();
        healthy.write_all(b"?").await.unwrap();
        healthy.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ok");

        stop_tx.send(()).unwrap();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_bind_failure_is_reported() {
        let first = Acceptor::bind("127.0.0.1:0", "test").await.unwrap();
        let addr = first.local_addr().unwrap().to_string();
        assert!(matches!(
            Acceptor::bind(&addr, "test").await,
            Err(crate::Error::Io(_))
        ));
    }

    #[test]
    fn test_shutdown_waits_for_in_flight_workers() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .unwrap();
        let acceptor = runtime
            .block_on(Acceptor::bind("127.0.0.1:0", "test"))
            .unwrap();
        let addr = acceptor.local_addr().unwrap();

        // Blocking client, so it outlives the runtime
        let mut client = std::net::TcpStream::connect(addr).unwrap();

        runtime.block_on(acceptor.run(
            |mut stream: TcpStream, _| async move {
                tokio::time::sleep(Duration::from_millis(400)).await;
                stream.write_all(b"done").await?;
                Ok::<_, crate::Error>(RelaySummary::default())
            },
            async {
                tokio::time::sleep(Duration::from_millis(100)).await;
            },
        ));
        drop(runtime);

        let mut reply = Vec::new();
        std::io::Read::read_to_end(&mut client, &mut reply).unwrap();
        assert_eq!(reply, b"done");
    }
}
