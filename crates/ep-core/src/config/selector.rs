//! Endpoint selector tuning

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::serde_utils::duration_secs_f64;

/// Tuning knobs for the tiered endpoint selector
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    /// Port used when a candidate has no `:port` suffix
    pub default_port: u16,

    /// Timeout when only one candidate is listed
    #[serde(with = "duration_secs_f64")]
    pub single_timeout: Duration,

    /// Per-probe timeout for the coarse scan
    #[serde(with = "duration_secs_f64")]
    pub scan_timeout: Duration,

    /// Maximum simultaneous probes during the coarse scan
    pub max_concurrency: usize,

    /// Candidates at or above this latency are treated as failed
    pub qualify_below_ms: f64,

    /// How many of the fastest candidates go to the stability re-scan
    pub top_n: usize,

    /// A coarse-scan winner under this latency is returned immediately
    pub fast_path_below_ms: f64,

    /// Extra samples taken per candidate in the stability re-scan
    pub retest_samples: usize,

    /// Per-probe timeout for the stability re-scan
    #[serde(with = "duration_secs_f64")]
    pub retest_timeout: Duration,

    /// Pause between consecutive re-scan samples of one candidate
    #[serde(with = "duration_secs_f64")]
    pub retest_spacing: Duration,

    /// Weight of the standard deviation in the composite score
    pub jitter_weight: f64,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            default_port: 443,
            single_timeout: Duration::from_secs(2),
            scan_timeout: Duration::from_secs(1),
            max_concurrency: 64,
            qualify_below_ms: 5000.0,
            top_n: 5,
            fast_path_below_ms: 15.0,
            retest_samples: 3,
            retest_timeout: Duration::from_millis(1500),
            retest_spacing: Duration::from_millis(50),
            jitter_weight: 1.5,
        }
    }
}
