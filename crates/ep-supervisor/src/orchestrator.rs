//! Connection lifecycle
//!
//! [`ConnectionOrchestrator`] turns a [`Profile`] into a running tunnel core:
//!
//! ```text
//! Idle -> Starting -> Running -> Stopping -> Idle
//!             |          |
//!             +----------+--> Failed
//! ```
//!
//! Each `start` spawns one attempt task that resolves the endpoint, launches
//! the core through the [`ProcessSupervisor`], and streams classified output
//! to the [`EventSink`] until the core exits or the attempt is cancelled.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use ep_core::config::AppConfig;
use ep_core::Profile;
use ep_probe::{parse_candidates, EndpointSelector, IdentityProbe, SelectionPhase};

use crate::args::{CommandLine, CoreArgs};
use crate::error::FailureKind;
use crate::events::EventSink;
use crate::output::Severity;
use crate::supervisor::{ProcessHandle, ProcessSupervisor};

/// How long to wait when checking whether the listen port is taken
const PORT_CHECK_TIMEOUT: Duration = Duration::from_millis(500);

/// Longest time spent reading leftover output once the core has been reaped
const OUTPUT_DRAIN_GRACE: Duration = Duration::from_millis(250);

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Starting,
    Running,
    Stopping,
    Failed(FailureKind),
}

impl ConnectionState {
    /// Whether an attempt is in progress
    pub fn is_active(&self) -> bool {
        matches!(self, ConnectionState::Starting | ConnectionState::Running)
    }

    /// Whether the state is final until the next `start`
    pub fn is_settled(&self) -> bool {
        matches!(self, ConnectionState::Idle | ConnectionState::Failed(_))
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Idle => f.write_str("idle"),
            ConnectionState::Starting => f.write_str("starting"),
            ConnectionState::Running => f.write_str("running"),
            ConnectionState::Stopping => f.write_str("stopping"),
            ConnectionState::Failed(kind) => write!(f, "failed: {}", kind),
        }
    }
}

struct Attempt {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// State shared between the orchestrator and its attempt tasks
struct Inner {
    supervisor: Arc<ProcessSupervisor>,
    selector: EndpointSelector,
    identity: IdentityProbe,
    core_path: PathBuf,
    events: EventSink,
    state: watch::Sender<ConnectionState>,
}

/// Drives one connection at a time for a profile
pub struct ConnectionOrchestrator {
    inner: Arc<Inner>,
    attempt: Mutex<Option<Attempt>>,
}

impl ConnectionOrchestrator {
    pub fn new(
        supervisor: Arc<ProcessSupervisor>,
        selector: EndpointSelector,
        identity: IdentityProbe,
        core_path: impl Into<PathBuf>,
        events: EventSink,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Idle);
        Self {
            inner: Arc::new(Inner {
                supervisor,
                selector,
                identity,
                core_path: core_path.into(),
                events,
                state,
            }),
            attempt: Mutex::new(None),
        }
    }

    /// Orchestrator using TCP probing and the configured core path
    pub fn from_config(
        config: &AppConfig,
        supervisor: Arc<ProcessSupervisor>,
        events: EventSink,
    ) -> Self {
        Self::new(
            supervisor,
            EndpointSelector::with_tcp_probe(config.selector.clone()),
            IdentityProbe::new(config.identity.clone()),
            &config.core_path,
            events,
        )
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Watch state changes
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    pub fn supervisor(&self) -> &Arc<ProcessSupervisor> {
        &self.inner.supervisor
    }

    /// Start connecting with `profile`, superseding any current attempt
    pub async fn start(&self, profile: Profile) {
        let mut attempt = self.attempt.lock().await;
        if let Some(previous) = attempt.take() {
            tracing::info!("Superseding the current connection");
            self.finish(previous).await;
        }

        tracing::info!("Connecting with profile '{}'", profile.name);
        let cancel = CancellationToken::new();
        self.inner.set_state(ConnectionState::Starting);
        let task = tokio::spawn(Arc::clone(&self.inner).run_attempt(profile, cancel.clone()));
        *attempt = Some(Attempt { cancel, task });
    }

    /// Stop the current attempt and its core
    ///
    /// Returns once the core has been stopped. A no-op without an attempt.
    pub async fn stop(&self) {
        let mut attempt = self.attempt.lock().await;
        match attempt.take() {
            Some(current) => self.finish(current).await,
            None => tracing::debug!("Stop requested with no connection"),
        }
    }

    async fn finish(&self, attempt: Attempt) {
        // Cancel before reading state so the task cannot overwrite Stopping
        attempt.cancel.cancel();
        let active = self.state().is_active();
        if active {
            self.inner.set_state(ConnectionState::Stopping);
        }

        if let Err(e) = attempt.task.await {
            if e.is_panic() {
                tracing::error!("Connection task panicked: {}", e);
            }
        }
        self.inner.supervisor.stop().await;

        if active {
            self.inner.set_state(ConnectionState::Idle);
            tracing::info!("Connection stopped");
        }
    }

    /// Wait until the current attempt reaches `Idle` or `Failed`
    pub async fn wait_settled(&self) -> ConnectionState {
        let mut rx = self.subscribe();
        let settled = match rx.wait_for(ConnectionState::is_settled).await {
            Ok(state) => *state,
            Err(_) => ConnectionState::Idle,
        };
        settled
    }
}

impl Drop for ConnectionOrchestrator {
    fn drop(&mut self) {
        if let Some(attempt) = self.attempt.get_mut().take() {
            attempt.cancel.cancel();
            attempt.task.abort();
        }
        self.inner.supervisor.kill_current();
    }
}

impl Inner {
    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
        tracing::debug!("Connection state: {}", state);
        self.events.state(state);
    }

    /// Change state from an attempt task unless it has been cancelled
    ///
    /// The check and the write happen under the watch lock, so a concurrent
    /// `stop` always wins.
    fn advance(&self, cancel: &CancellationToken, state: ConnectionState) -> bool {
        let changed = self.state.send_if_modified(|current| {
            if cancel.is_cancelled() {
                return false;
            }
            *current = state;
            true
        });
        if changed {
            tracing::debug!("Connection state: {}", state);
            self.events.state(state);
        }
        changed
    }

    async fn run_attempt(self: Arc<Self>, profile: Profile, cancel: CancellationToken) {
        let launched = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            launched = self.launch(&profile) => launched,
        };
        let mut handle = match launched {
            Ok(handle) => handle,
            Err(kind) => {
                self.advance(&cancel, ConnectionState::Failed(kind));
                return;
            }
        };

        if !self.advance(&cancel, ConnectionState::Running) {
            return;
        }
        self.events.status("running");

        let identity_cancel = cancel.child_token();
        let _identity_guard = identity_cancel.clone().drop_guard();
        tokio::spawn(
            Arc::clone(&self).report_identity(profile.listen_address.clone(), identity_cancel),
        );

        let exited = handle.exited();
        tokio::pin!(exited);

        let reaped = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                line = handle.next_line() => match line {
                    Some(line) => self.emit_core_line(&line),
                    None => break None,
                },
                outcome = &mut exited => break Some(outcome),
            }
        };

        let outcome = match reaped {
            Some(outcome) => {
                // Output may still be buffered, or held open by a child
                let deadline = tokio::time::Instant::now() + OUTPUT_DRAIN_GRACE;
                loop {
                    let line = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return,
                        line = tokio::time::timeout_at(deadline, handle.next_line()) => line,
                    };
                    match line {
                        Ok(Some(line)) => self.emit_core_line(&line),
                        Ok(None) | Err(_) => break,
                    }
                }
                outcome
            }
            None => tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                outcome = &mut exited => outcome,
            },
        };
        self.supervisor.release_if_current(handle.generation());

        if outcome.success() {
            tracing::info!("Core exited on its own");
            self.events.log("Core exited", Severity::Info);
            if self.advance(&cancel, ConnectionState::Stopping) {
                self.advance(&cancel, ConnectionState::Idle);
            }
        } else {
            tracing::warn!("Core exited unexpectedly ({})", outcome);
            self.events.log(
                format!("Core stopped unexpectedly ({})", outcome),
                Severity::Failure,
            );
            self.advance(
                &cancel,
                ConnectionState::Failed(FailureKind::UnexpectedProcessExit),
            );
        }
    }

    fn emit_core_line(&self, line: &str) {
        let line = line.trim();
        if !line.is_empty() {
            self.events.core_line(line);
        }
    }

    /// Everything in `Starting`: checks, endpoint resolution, launch
    async fn launch(&self, profile: &Profile) -> Result<ProcessHandle, FailureKind> {
        if !self.core_path.exists() {
            tracing::error!("Core executable not found at {}", self.core_path.display());
            self.events.log(
                format!("Core executable missing: {}", self.core_path.display()),
                Severity::Failure,
            );
            return Err(FailureKind::BinaryMissing);
        }

        if let Some(port) = profile.listen_port() {
            if port_in_use(port).await {
                tracing::warn!("Listen port {} is taken, clearing stale core", port);
                self.events
                    .log(format!("Port {} in use, stopping old core", port), Severity::Info);
                self.supervisor.stop().await;
                if let Some(pid) = self.supervisor.kill_stale() {
                    self.events
                        .log(format!("Killed stale core (pid {})", pid), Severity::Info);
                }
            }
        }

        let endpoint = self.resolve_endpoint(profile).await;
        let command = CommandLine::for_core(
            &self.core_path,
            &CoreArgs::from_profile(profile, endpoint.as_deref()),
        );
        tracing::info!("Launching {}", command.redacted());

        self.supervisor.start(&command).await.map_err(|e| {
            tracing::error!("{}", e);
            self.events.log(e.to_string(), Severity::Failure);
            FailureKind::ProcessStartFailure
        })
    }

    /// Pick the endpoint passed to the core, or `None` for direct mode
    async fn resolve_endpoint(&self, profile: &Profile) -> Option<String> {
        let candidates = parse_candidates(&profile.endpoint_list);
        let Some(first) = candidates.first() else {
            self.events.selection("direct mode");
            return None;
        };

        if !profile.auto_select_best {
            tracing::info!("Using fixed endpoint {}", first);
            self.events
                .log(format!("Using fixed endpoint {}", first), Severity::Info);
            self.events.selection(format!("fixed | {}", first));
            return Some(first.clone());
        }

        let progress = |phase: SelectionPhase| self.events.status(phase.label());
        let selection = self
            .selector
            .select_best(&profile.endpoint_list, Some(&progress))
            .await;

        match selection.endpoint {
            Some(endpoint) => {
                self.events.log(
                    format!(
                        "Selected endpoint {} ({:.1}ms)",
                        endpoint, selection.latency_ms
                    ),
                    Severity::Success,
                );
                self.events
                    .selection(format!("{}ms | {}", selection.latency_ms as i64, endpoint));
                Some(endpoint)
            }
            None => {
                tracing::warn!("Endpoint selection failed, connecting directly");
                self.events.selection("selection failed");
                None
            }
        }
    }

    /// Look up the public identity once the tunnel has settled
    async fn report_identity(self: Arc<Self>, listen_address: String, cancel: CancellationToken) {
        let settle_delay = self.identity.config().settle_delay;
        let lookup = async {
            tokio::time::sleep(settle_delay).await;
            if *self.state.borrow() != ConnectionState::Running {
                return;
            }

            let report = self.identity.lookup(&listen_address).await;
            if cancel.is_cancelled() || *self.state.borrow() != ConnectionState::Running {
                return;
            }
            tracing::info!("Identity through tunnel:\n{}", report);
            self.events.identity(report.to_string());
        };

        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = lookup => {}
        }
    }
}

/// Whether something already accepts connections on the loopback port
async fn port_in_use(port: u16) -> bool {
    matches!(
        tokio::time::timeout(PORT_CHECK_TIMEOUT, TcpStream::connect(("127.0.0.1", port))).await,
        Ok(Ok(_))
    )
}
