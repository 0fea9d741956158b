//! One control application per user session
//!
//! The first launch binds a fixed loopback port and listens for a wake
//! token. Later launches fail to bind, send the token to the first one, and
//! exit. The exchange is connect, send token, close; nothing is answered.

use std::io;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Most bytes read from one wake connection
pub const WAKE_READ_LIMIT: u64 = 1024;

/// Bound on connecting to, and reading from, a peer
const WAKE_TIMEOUT: Duration = Duration::from_secs(1);

/// Outcome of [`SingleInstanceGuard::acquire`]
pub enum InstanceRole {
    /// This launch owns the port and should keep running
    Primary(SingleInstanceGuard),
    /// Another launch owns the port and has been asked to come forward
    Secondary,
}

/// Held by the primary instance; releases the port on drop
pub struct SingleInstanceGuard {
    port: u16,
    wake_rx: mpsc::UnboundedReceiver<()>,
    shutdown: CancellationToken,
}

impl SingleInstanceGuard {
    /// Become the primary instance on `port`, or wake the existing one
    pub async fn acquire(port: u16, token: &str) -> InstanceRole {
        match TcpListener::bind(("127.0.0.1", port)).await {
            Ok(listener) => {
                tracing::debug!("Single-instance listener on 127.0.0.1:{}", port);
                let (wake_tx, wake_rx) = mpsc::unbounded_channel();
                let shutdown = CancellationToken::new();
                tokio::spawn(listen(
                    listener,
                    token.as_bytes().to_vec(),
                    wake_tx,
                    shutdown.clone(),
                ));
                InstanceRole::Primary(Self {
                    port,
                    wake_rx,
                    shutdown,
                })
            }
            Err(e) => {
                tracing::info!("Another instance holds port {} ({}), waking it", port, e);
                if let Err(e) = notify(port, token).await {
                    tracing::debug!("Failed to wake the running instance: {}", e);
                }
                InstanceRole::Secondary
            }
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Wait for the next wake request
    ///
    /// Returns `false` once the listener has stopped.
    pub async fn woken(&mut self) -> bool {
        self.wake_rx.recv().await.is_some()
    }
}

impl Drop for SingleInstanceGuard {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Send the wake token to the instance on `port`
pub async fn notify(port: u16, token: &str) -> io::Result<()> {
    let mut stream = tokio::time::timeout(WAKE_TIMEOUT, TcpStream::connect(("127.0.0.1", port)))
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))??;
    stream.write_all(token.as_bytes()).await?;
    stream.shutdown().await?;
    Ok(())
}

async fn listen(
    listener: TcpListener,
    token: Vec<u8>,
    wake_tx: mpsc::UnboundedSender<()>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    if !peer.ip().is_loopback() {
                        tracing::warn!("Rejected non-loopback wake from {}", peer);
                        continue;
                    }
                    tokio::spawn(read_wake(stream, token.clone(), wake_tx.clone()));
                }
                Err(e) => {
                    tracing::warn!("Single-instance accept failed: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            },
        }
    }
    tracing::debug!("Single-instance listener stopped");
}

async fn read_wake(stream: TcpStream, token: Vec<u8>, wake_tx: mpsc::UnboundedSender<()>) {
    let mut received = Vec::new();
    let read = tokio::time::timeout(
        WAKE_TIMEOUT,
        stream.take(WAKE_READ_LIMIT).read_to_end(&mut received),
    )
    .await;

    match read {
        Ok(Ok(_)) if received == token => {
            tracing::info!("Wake request received");
            let _ = wake_tx.send(());
        }
        Ok(Ok(_)) => tracing::debug!("Ignoring {} unexpected bytes on wake port", received.len()),
        Ok(Err(e)) => tracing::debug!("Wake connection failed: {}", e),
        Err(_) => tracing::debug!("Wake connection timed out"),
    }
}
