//! Probe command implementation

use std::time::Duration;

use anyhow::Result;

use crate::output::{print_success, print_warning};
use ep_probe::{LatencyProbe, TcpProbe};

/// Measure a single endpoint with a TCP connect
///
/// Returns whether the endpoint was reachable.
pub async fn probe_command(target: &str, default_port: u16, timeout: Duration) -> Result<bool> {
    let target = target.trim();
    if target.is_empty() {
        anyhow::bail!("Probe target cannot be empty");
    }

    let result = TcpProbe.probe(target, default_port, timeout).await;
    if result.is_reachable() {
        print_success(&format!("{} {:.1}ms", result.address, result.latency_ms));
        Ok(true)
    } else {
        print_warning(&format!("{} unreachable", result.address));
        Ok(false)
    }
}
