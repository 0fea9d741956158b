//! TCP connect latency probing

use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::net::{lookup_host, TcpStream};

use crate::candidates::split_host_port;

/// Latency reported for an endpoint that could not be reached
pub const UNREACHABLE_MS: f64 = 99_999.0;

/// One measured endpoint
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointCandidate {
    /// The endpoint exactly as listed
    pub address: String,
    /// Connect latency in milliseconds, or [`UNREACHABLE_MS`]
    pub latency_ms: f64,
}

impl EndpointCandidate {
    pub fn new(address: impl Into<String>, latency_ms: f64) -> Self {
        Self {
            address: address.into(),
            latency_ms,
        }
    }

    /// A candidate whose probe failed
    pub fn unreachable(address: impl Into<String>) -> Self {
        Self::new(address, UNREACHABLE_MS)
    }

    /// Whether the probe succeeded
    pub fn is_reachable(&self) -> bool {
        self.latency_ms < UNREACHABLE_MS
    }
}

/// Measures how long it takes to reach one endpoint
///
/// Implementations never fail: any error is reported as an
/// [`UNREACHABLE_MS`] latency so a probe can never abort a selection run.
#[async_trait]
pub trait LatencyProbe: Send + Sync {
    /// Probe `target` (a host or `host:port`), using `default_port` when the
    /// target carries no port
    async fn probe(&self, target: &str, default_port: u16, timeout: Duration) -> EndpointCandidate;
}

/// Probe that times a plain TCP connect
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpProbe;

#[async_trait]
impl LatencyProbe for TcpProbe {
    async fn probe(&self, target: &str, default_port: u16, timeout: Duration) -> EndpointCandidate {
        match connect_latency(target, default_port, timeout).await {
            Ok(latency) => {
                tracing::trace!("Probe {} -> {:.1}ms", target, latency);
                EndpointCandidate::new(target, latency)
            }
            Err(e) => {
                tracing::debug!("Probe {} failed: {}", target, e);
                EndpointCandidate::unreachable(target)
            }
        }
    }
}

/// Resolve `target` and time a TCP connect to it, in milliseconds
///
/// Only the connect is timed; resolution is bounded by the same timeout but
/// not counted. The stream is dropped before returning on every path.
async fn connect_latency(target: &str, default_port: u16, timeout: Duration) -> io::Result<f64> {
    let (host, port) = split_host_port(target, default_port).ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "port out of range")
    })?;

    let addrs = tokio::time::timeout(timeout, lookup_host((host, port)))
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "resolution timed out"))??;
    let addr = pick_address(addrs)
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no addresses resolved"))?;

    let started = Instant::now();
    let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))??;
    let elapsed = started.elapsed();
    drop(stream);

    Ok(elapsed.as_secs_f64() * 1000.0)
}

/// Prefer the first IPv4 address, falling back to whatever resolved first
fn pick_address(addrs: impl Iterator<Item = SocketAddr>) -> Option<SocketAddr> {
    let mut first = None;
    for addr in addrs {
        if addr.is_ipv4() {
            return Some(addr);
        }
        first.get_or_insert(addr);
    }
    first
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_probe_reachable_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accept = tokio::spawn(async move {
            let _ = listener.accept().await;
        });

        let result = TcpProbe
            .probe(&addr.to_string(), 443, Duration::from_secs(2))
            .await;

        assert_eq!(result.address, addr.to_string());
        assert!(result.is_reachable());
        assert!(result.latency_ms >= 0.0);
        accept.abort();
    }

    #[tokio::test]
    async fn test_probe_uses_default_port() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let result = TcpProbe
            .probe("127.0.0.1", port, Duration::from_secs(2))
            .await;

        assert_eq!(result.address, "127.0.0.1");
        assert!(result.is_reachable());
    }

    #[tokio::test]
    async fn test_probe_refused_is_sentinel() {
        // Bind then drop to get a port with nothing listening
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };

        let target = format!("127.0.0.1:{}", port);
        let result = TcpProbe.probe(&target, 443, Duration::from_secs(1)).await;

        assert_eq!(result, EndpointCandidate::unreachable(target));
    }

    #[tokio::test]
    async fn test_probe_unresolvable_is_sentinel() {
        let result = TcpProbe
            .probe("no-such-host.invalid:443", 443, Duration::from_secs(2))
            .await;
        assert_eq!(result.latency_ms, UNREACHABLE_MS);
    }

    #[tokio::test]
    async fn test_probe_bad_port_is_sentinel() {
        let result = TcpProbe
            .probe("127.0.0.1:70000", 443, Duration::from_secs(1))
            .await;
        assert!(!result.is_reachable());
    }

    #[test]
    fn test_pick_address_prefers_ipv4() {
        let v6: SocketAddr = "[::1]:443".parse().unwrap();
        let v4: SocketAddr = "127.0.0.1:443".parse().unwrap();
        assert_eq!(pick_address(vec![v6, v4].into_iter()), Some(v4));
        assert_eq!(pick_address(vec![v6].into_iter()), Some(v6));
        assert_eq!(pick_address(std::iter::empty()), None);
    }
}
