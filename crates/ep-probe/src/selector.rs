//! Tiered endpoint selection
//!
//! Picks the best endpoint from a candidate list in two passes:
//!
//! 1. **Coarse scan**: every candidate is probed once, concurrently, by a
//!    bounded worker pool. Candidates at or above the qualification bar are
//!    dropped. If the fastest survivor is already near zero it wins outright.
//! 2. **Stability re-scan**: the fastest few are sampled again and ranked by
//!    `mean + weight * stddev`, so a steady endpoint beats one that is only
//!    fast on average.
//!
//! Probing never fails the run. With nothing reachable the first listed
//! candidate is returned so the caller can still try it.

use std::cmp::Ordering;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;

use tokio::task::JoinSet;

use ep_core::config::SelectorConfig;

use crate::candidates::parse_candidates;
use crate::latency::{EndpointCandidate, LatencyProbe, TcpProbe};
use crate::stats::JitterStats;

/// Progress phases reported while a selection runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionPhase {
    /// Coarse scan over every candidate
    Measuring,
    /// Re-sampling the fastest candidates
    RetestingStability,
}

impl SelectionPhase {
    /// Human-readable phase name
    pub fn label(&self) -> &'static str {
        match self {
            SelectionPhase::Measuring => "measuring",
            SelectionPhase::RetestingStability => "retesting stability",
        }
    }
}

impl std::fmt::Display for SelectionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// How the returned endpoint was chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionMethod {
    /// The list had no candidates
    Empty,
    /// Only one candidate; returned as measured
    Single,
    /// Coarse-scan winner was below the fast-path threshold
    FastPath,
    /// Ranked by composite score after the re-scan
    Stable,
    /// Nothing qualified; first listed candidate returned untested
    Degraded,
    /// Re-scan left nothing usable; coarse-scan winner returned
    Tier1Fallback,
}

/// Outcome of a selection run
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    /// Chosen endpoint, always one of the listed candidates
    pub endpoint: Option<String>,
    /// Reported latency: the measured mean, or 0 when degraded
    pub latency_ms: f64,
    /// How the endpoint was chosen
    pub method: SelectionMethod,
}

impl Selection {
    fn new(endpoint: Option<String>, latency_ms: f64, method: SelectionMethod) -> Self {
        Self {
            endpoint,
            latency_ms,
            method,
        }
    }

    fn from_candidate(candidate: EndpointCandidate, method: SelectionMethod) -> Self {
        Self::new(Some(candidate.address), candidate.latency_ms, method)
    }
}

/// Ranks candidate endpoints by live latency and stability
#[derive(Clone)]
pub struct EndpointSelector {
    probe: Arc<dyn LatencyProbe>,
    config: SelectorConfig,
}

impl EndpointSelector {
    /// Create a selector using the given probe
    pub fn new(probe: Arc<dyn LatencyProbe>, config: SelectorConfig) -> Self {
        Self { probe, config }
    }

    /// Create a selector that measures TCP connect time
    pub fn with_tcp_probe(config: SelectorConfig) -> Self {
        Self::new(Arc::new(TcpProbe), config)
    }

    /// Selector tuning
    pub fn config(&self) -> &SelectorConfig {
        &self.config
    }

    /// Pick the best endpoint from a newline-separated candidate list
    ///
    /// `on_progress` receives each phase as it starts. Dropping the returned
    /// future abandons in-flight probes.
    pub async fn select_best(
        &self,
        candidate_text: &str,
        on_progress: Option<&(dyn Fn(SelectionPhase) + Send + Sync)>,
    ) -> Selection {
        let report = |phase: SelectionPhase| {
            tracing::debug!("Endpoint selection: {}", phase);
            if let Some(callback) = on_progress {
                callback(phase);
            }
        };

        let candidates = parse_candidates(candidate_text);
        if candidates.is_empty() {
            return Selection::new(None, 0.0, SelectionMethod::Empty);
        }

        if candidates.len() == 1 {
            let only = self
                .probe
                .probe(
                    &candidates[0],
                    self.config.default_port,
                    self.config.single_timeout,
                )
                .await;
            return Selection::from_candidate(only, SelectionMethod::Single);
        }

        report(SelectionPhase::Measuring);
        let mut qualified: Vec<EndpointCandidate> = self
            .coarse_scan(&candidates)
            .await
            .into_iter()
            .filter(|c| c.latency_ms < self.config.qualify_below_ms)
            .collect();

        if qualified.is_empty() {
            tracing::warn!(
                "No endpoint answered below {}ms, falling back to {}",
                self.config.qualify_below_ms,
                candidates[0]
            );
            return Selection::new(Some(candidates[0].clone()), 0.0, SelectionMethod::Degraded);
        }

        // Stable sort keeps list order among equal latencies
        qualified.sort_by(|a, b| cmp_f64(a.latency_ms, b.latency_ms));
        qualified.truncate(self.config.top_n.max(1));

        if qualified[0].latency_ms < self.config.fast_path_below_ms {
            let best = qualified.swap_remove(0);
            tracing::info!("Fast path: {} at {:.1}ms", best.address, best.latency_ms);
            return Selection::from_candidate(best, SelectionMethod::FastPath);
        }

        report(SelectionPhase::RetestingStability);
        let mut scored = self.stability_rescan(&qualified).await;
        // Ties keep coarse-scan rank
        scored.sort_by(|a, b| cmp_f64(a.1.score, b.1.score));

        match scored.into_iter().next() {
            Some((rank, stats)) => {
                let address = qualified[rank].address.clone();
                tracing::info!(
                    "Selected {} (mean {:.1}ms, jitter {:.1}ms, score {:.1})",
                    address,
                    stats.mean,
                    stats.stddev,
                    stats.score
                );
                Selection::new(Some(address), stats.mean, SelectionMethod::Stable)
            }
            None => {
                let best = qualified.swap_remove(0);
                tracing::info!("Re-scan inconclusive, keeping {}", best.address);
                Selection::from_candidate(best, SelectionMethod::Tier1Fallback)
            }
        }
    }

    /// Probe every candidate once with a bounded worker pool
    ///
    /// Results come back in list order regardless of completion order.
    async fn coarse_scan(&self, candidates: &[String]) -> Vec<EndpointCandidate> {
        let targets: Arc<[String]> = candidates.into();
        let next = Arc::new(AtomicUsize::new(0));
        let workers = self.config.max_concurrency.clamp(1, targets.len());

        let mut join_set = JoinSet::new();
        for _ in 0..workers {
            let probe = Arc::clone(&self.probe);
            let targets = Arc::clone(&targets);
            let next = Arc::clone(&next);
            let port = self.config.default_port;
            let timeout = self.config.scan_timeout;

            join_set.spawn(async move {
                let mut measured = Vec::new();
                loop {
                    let index = next.fetch_add(1, AtomicOrdering::Relaxed);
                    let Some(target) = targets.get(index) else {
                        break;
                    };
                    measured.push((index, probe.probe(target, port, timeout).await));
                }
                measured
            });
        }

        let mut results: Vec<Option<EndpointCandidate>> = vec![None; targets.len()];
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(measured) => {
                    for (index, candidate) in measured {
                        results[index] = Some(candidate);
                    }
                }
                Err(e) => tracing::debug!("Probe worker failed: {}", e),
            }
        }

        results
            .into_iter()
            .zip(targets.iter())
            .map(|(result, target)| {
                result.unwrap_or_else(|| EndpointCandidate::unreachable(target.as_str()))
            })
            .collect()
    }

    /// Re-sample each finalist; returns `(rank, stats)` in rank order
    ///
    /// Samples for one candidate are taken sequentially with a short pause;
    /// finalists are sampled concurrently.
    async fn stability_rescan(&self, finalists: &[EndpointCandidate]) -> Vec<(usize, JitterStats)> {
        let mut join_set = JoinSet::new();
        for (rank, finalist) in finalists.iter().enumerate() {
            let probe = Arc::clone(&self.probe);
            let finalist = finalist.clone();
            let config = self.config.clone();

            join_set.spawn(async move {
                let mut samples = vec![finalist.latency_ms];
                for attempt in 0..config.retest_samples {
                    if attempt > 0 {
                        tokio::time::sleep(config.retest_spacing).await;
                    }
                    let sample = probe
                        .probe(&finalist.address, config.default_port, config.retest_timeout)
                        .await;
                    if sample.latency_ms < config.qualify_below_ms {
                        samples.push(sample.latency_ms);
                    }
                }
                (rank, JitterStats::from_samples(&samples, config.jitter_weight))
            });
        }

        let mut scored = Vec::with_capacity(finalists.len());
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((rank, Some(stats))) => scored.push((rank, stats)),
                Ok((rank, None)) => {
                    tracing::debug!("Dropping {}: no usable samples", finalists[rank].address)
                }
                Err(e) => tracing::debug!("Re-scan task failed: {}", e),
            }
        }
        scored.sort_by_key(|(rank, _)| *rank);
        scored
    }
}

fn cmp_f64(a: f64, b: f64) -> Ordering {
    a.partial_cmp(&b).unwrap_or(Ordering::Equal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::latency::UNREACHABLE_MS;

    /// Probe that replays scripted latencies per target
    #[derive(Default)]
    struct ScriptedProbe {
        scripts: Mutex<HashMap<String, VecDeque<f64>>>,
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        delay: Option<Duration>,
    }

    impl ScriptedProbe {
        fn new(scripts: &[(&str, &[f64])]) -> Self {
            let scripts = scripts
                .iter()
                .map(|(target, samples)| (target.to_string(), samples.iter().copied().collect()))
                .collect();
            Self {
                scripts: Mutex::new(scripts),
                ..Default::default()
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(AtomicOrdering::SeqCst)
        }
    }

    #[async_trait]
    impl LatencyProbe for ScriptedProbe {
        async fn probe(&self, target: &str, _port: u16, _timeout: Duration) -> EndpointCandidate {
            self.calls.fetch_add(1, AtomicOrdering::SeqCst);
            let now = self.in_flight.fetch_add(1, AtomicOrdering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, AtomicOrdering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.in_flight.fetch_sub(1, AtomicOrdering::SeqCst);

            let latency = self
                .scripts
                .lock()
                .unwrap()
                .get_mut(target)
                .and_then(|samples| samples.pop_front())
                .unwrap_or(UNREACHABLE_MS);
            EndpointCandidate::new(target, latency)
        }
    }

    fn selector(probe: &Arc<ScriptedProbe>) -> EndpointSelector {
        EndpointSelector::new(probe.clone(), SelectorConfig::default())
    }

    fn recorder() -> (Arc<Mutex<Vec<SelectionPhase>>>, impl Fn(SelectionPhase) + Send + Sync) {
        let phases = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&phases);
        (phases, move |phase| sink.lock().unwrap().push(phase))
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_list() {
        let probe = Arc::new(ScriptedProbe::default());
        let result = selector(&probe).select_best("# nothing\n\n", None).await;

        assert_eq!(result, Selection::new(None, 0.0, SelectionMethod::Empty));
        assert_eq!(probe.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_candidate_returned_even_if_unreachable() {
        let probe = Arc::new(ScriptedProbe::default());
        let result = selector(&probe).select_best("dead.example:443\n", None).await;

        assert_eq!(result.endpoint.as_deref(), Some("dead.example:443"));
        assert_eq!(result.latency_ms, UNREACHABLE_MS);
        assert_eq!(result.method, SelectionMethod::Single);
        assert_eq!(probe.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_path_skips_rescan() {
        let probe = Arc::new(ScriptedProbe::new(&[
            ("A", &[10.0]),
            ("B", &[12.0]),
            ("C", &[UNREACHABLE_MS]),
        ]));
        let (phases, sink) = recorder();

        let result = selector(&probe).select_best("A\nB\nC", Some(&sink)).await;

        assert_eq!(result.endpoint.as_deref(), Some("A"));
        assert_eq!(result.latency_ms, 10.0);
        assert_eq!(result.method, SelectionMethod::FastPath);
        assert_eq!(probe.calls(), 3);
        assert_eq!(*phases.lock().unwrap(), vec![SelectionPhase::Measuring]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stable_endpoint_beats_jittery_one() {
        // A: mean 50, high jitter. B: mean 55, steady.
        let probe = Arc::new(ScriptedProbe::new(&[
            ("A", &[50.0, 10.0, 90.0, 50.0]),
            ("B", &[55.0, 53.0, 57.0, 55.0]),
        ]));
        let (phases, sink) = recorder();

        let result = selector(&probe).select_best("A\nB", Some(&sink)).await;

        assert_eq!(result.endpoint.as_deref(), Some("B"));
        assert!((result.latency_ms - 55.0).abs() < 1e-9);
        assert_eq!(result.method, SelectionMethod::Stable);
        assert_eq!(probe.calls(), 8);
        assert_eq!(
            *phases.lock().unwrap(),
            vec![SelectionPhase::Measuring, SelectionPhase::RetestingStability]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_rescan_samples_are_discarded() {
        let probe = Arc::new(ScriptedProbe::new(&[
            ("A", &[30.0, UNREACHABLE_MS, UNREACHABLE_MS, UNREACHABLE_MS]),
            ("B", &[40.0, 40.0, 40.0, 40.0]),
        ]));

        let result = selector(&probe).select_best("A\nB", None).await;

        assert_eq!(result.endpoint.as_deref(), Some("A"));
        assert_eq!(result.latency_ms, 30.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_nothing_qualifies_returns_first_listed() {
        let probe = Arc::new(ScriptedProbe::new(&[
            ("first", &[UNREACHABLE_MS]),
            ("second", &[6000.0]),
        ]));

        let result = selector(&probe).select_best("# c\nfirst\nsecond", None).await;

        assert_eq!(
            result,
            Selection::new(Some("first".to_string()), 0.0, SelectionMethod::Degraded)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_only_top_five_are_retested() {
        let names: Vec<String> = (0..8).map(|i| format!("n{}", i)).collect();
        let scripts: Vec<(String, Vec<f64>)> = names
            .iter()
            .enumerate()
            .map(|(i, n)| (n.clone(), vec![100.0 + i as f64; 4]))
            .collect();
        let script_refs: Vec<(&str, &[f64])> = scripts
            .iter()
            .map(|(n, s)| (n.as_str(), s.as_slice()))
            .collect();
        let probe = Arc::new(ScriptedProbe::new(&script_refs));

        let result = selector(&probe).select_best(&names.join("\n"), None).await;

        assert_eq!(result.endpoint.as_deref(), Some("n0"));
        assert_eq!(probe.calls(), 8 + 5 * 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_equal_scores_keep_list_order() {
        let probe = Arc::new(ScriptedProbe::new(&[
            ("later", &[20.0, 20.0, 20.0, 20.0]),
            ("earlier", &[20.0, 20.0, 20.0, 20.0]),
        ]));

        let result = selector(&probe).select_best("earlier\nlater", None).await;
        assert_eq!(result.endpoint.as_deref(), Some("earlier"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_result_is_always_a_listed_candidate() {
        let lists = [
            "a\nb\nc",
            "x:1\ny:2",
            "# header\nonly-reachable\nother",
        ];
        for list in lists {
            let probe = Arc::new(ScriptedProbe::new(&[
                ("b", &[300.0, 310.0, 290.0, 300.0]),
                ("only-reachable", &[80.0, 80.0, 80.0, 80.0]),
            ]));
            let result = selector(&probe).select_best(list, None).await;
            let endpoint = result.endpoint.expect("non-empty list yields an endpoint");
            assert!(parse_candidates(list).contains(&endpoint), "{} not in list", endpoint);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_coarse_scan_concurrency_is_bounded() {
        let mut probe = ScriptedProbe::default();
        probe.delay = Some(Duration::from_millis(100));
        let probe = Arc::new(probe);
        let config = SelectorConfig {
            max_concurrency: 4,
            ..SelectorConfig::default()
        };
        let selector = EndpointSelector::new(probe.clone(), config);

        let list: Vec<String> = (0..20).map(|i| format!("host{}", i)).collect();
        let result = selector.select_best(&list.join("\n"), None).await;

        assert_eq!(result.method, SelectionMethod::Degraded);
        assert_eq!(probe.calls(), 20);
        assert!(probe.max_in_flight.load(AtomicOrdering::SeqCst) <= 4);
    }

    #[test]
    fn test_phase_labels() {
        assert_eq!(SelectionPhase::Measuring.label(), "measuring");
        assert_eq!(
            SelectionPhase::RetestingStability.to_string(),
            "retesting stability"
        );
    }
}
