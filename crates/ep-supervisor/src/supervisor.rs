//! Single live tunnel core process
//!
//! [`ProcessSupervisor`] tracks at most one core process. Starting a new one
//! always stops the previous one first, and every state change is
//! serialized so concurrent callers can never leave two cores running.
//!
//! Termination escalates from a graceful request to killing the whole
//! process tree to killing the handle itself. Each step is best-effort and
//! its failure is only logged.

use std::fmt;
use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use parking_lot::Mutex;
use tokio::io::AsyncRead;
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch};
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;

use ep_core::pidfile;

use crate::args::CommandLine;
use crate::error::SupervisorError;
use crate::output::OutputLineCodec;
use crate::platform;

/// Buffered output lines per process
const OUTPUT_BUFFER: usize = 256;

/// How long `start` and `stop` wait for a killed core to be reaped
pub const DEFAULT_EXIT_TIMEOUT: Duration = Duration::from_secs(3);

/// How a core process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitOutcome {
    /// Exit code, `None` when killed by a signal or not observable
    pub code: Option<i32>,
}

impl ExitOutcome {
    /// Outcome when the exit status could not be collected
    pub const UNKNOWN: ExitOutcome = ExitOutcome { code: None };

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl fmt::Display for ExitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "exit code {}", code),
            None => f.write_str("terminated"),
        }
    }
}

/// Termination primitives for one launched process
///
/// All methods are synchronous so they can run from `Drop` and the panic
/// hook.
pub trait ProcessControl: Send + Sync {
    /// Ask the process to exit
    fn terminate(&self) -> io::Result<()>;
    /// Kill the process and its children
    fn kill_tree(&self) -> io::Result<()>;
    /// Kill the process handle itself
    fn kill(&self) -> io::Result<()>;
}

/// A process as returned by a [`ProcessLauncher`]
pub struct LaunchedProcess {
    /// OS process id, if known
    pub pid: Option<u32>,
    /// Merged stdout and stderr lines; closes when both pipes close
    pub output: mpsc::Receiver<String>,
    /// Termination primitives
    pub control: Box<dyn ProcessControl>,
    /// Becomes `Some` once the process has been reaped
    pub exit: watch::Receiver<Option<ExitOutcome>>,
}

/// Starts OS processes
///
/// Production code uses [`TokioLauncher`]; tests substitute a fake to count
/// live processes.
pub trait ProcessLauncher: Send + Sync {
    fn launch(&self, command: &CommandLine) -> io::Result<LaunchedProcess>;
}

/// Launches real processes with `tokio::process`
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioLauncher;

impl ProcessLauncher for TokioLauncher {
    fn launch(&self, command: &CommandLine) -> io::Result<LaunchedProcess> {
        let mut std_cmd = std::process::Command::new(&command.program);
        std_cmd
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        // Own process group so the whole tree can be killed at once
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            std_cmd.process_group(0);
        }
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            std_cmd.creation_flags(platform::creation_flags());
        }

        let mut cmd = Command::from(std_cmd);
        cmd.kill_on_drop(true);
        let mut child = cmd.spawn()?;
        let pid = child.id();

        let (line_tx, line_rx) = mpsc::channel(OUTPUT_BUFFER);
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, line_tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, line_tx.clone()));
        }
        drop(line_tx);

        let (exit_tx, exit_rx) = watch::channel(None);
        let kill = CancellationToken::new();
        tokio::spawn(reap(child, kill.clone(), exit_tx));

        Ok(LaunchedProcess {
            pid,
            output: line_rx,
            control: Box::new(ChildControl { pid, kill }),
            exit: exit_rx,
        })
    }
}

async fn forward_lines<R: AsyncRead + Unpin>(reader: R, tx: mpsc::Sender<String>) {
    let mut lines = FramedRead::new(reader, OutputLineCodec::new());
    while let Some(line) = lines.next().await {
        match line {
            Ok(line) => {
                if tx.send(line).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::debug!("Core output read failed: {}", e);
                break;
            }
        }
    }
}

/// Own the child until it exits, then publish its outcome
async fn reap(
    mut child: Child,
    kill: CancellationToken,
    exit_tx: watch::Sender<Option<ExitOutcome>>,
) {
    let exited = tokio::select! {
        status = child.wait() => Some(status),
        _ = kill.cancelled() => None,
    };
    let status = match exited {
        Some(status) => status,
        None => {
            if let Err(e) = child.start_kill() {
                tracing::debug!("Killing core handle failed: {}", e);
            }
            child.wait().await
        }
    };

    let outcome = match status {
        Ok(status) => ExitOutcome {
            code: status.code(),
        },
        Err(e) => {
            tracing::warn!("Failed to collect core exit status: {}", e);
            ExitOutcome::UNKNOWN
        }
    };
    tracing::debug!("Core reaped: {}", outcome);
    exit_tx.send_replace(Some(outcome));
}

struct ChildControl {
    pid: Option<u32>,
    kill: CancellationToken,
}

impl ProcessControl for ChildControl {
    fn terminate(&self) -> io::Result<()> {
        self.pid.map_or(Ok(()), platform::terminate)
    }

    fn kill_tree(&self) -> io::Result<()> {
        self.pid.map_or(Ok(()), platform::kill_tree)
    }

    fn kill(&self) -> io::Result<()> {
        self.kill.cancel();
        Ok(())
    }
}

/// Caller's view of a started core
pub struct ProcessHandle {
    generation: u64,
    pid: Option<u32>,
    output: mpsc::Receiver<String>,
    exit: watch::Receiver<Option<ExitOutcome>>,
}

impl ProcessHandle {
    /// Identifies this start among all starts of the supervisor
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Next output line; `None` once the process closed its output
    pub async fn next_line(&mut self) -> Option<String> {
        self.output.recv().await
    }

    /// Exit outcome if the process has already been reaped
    pub fn exit_outcome(&self) -> Option<ExitOutcome> {
        *self.exit.borrow()
    }

    /// Wait until the process has been reaped
    pub async fn wait(&mut self) -> ExitOutcome {
        wait_for_exit(&mut self.exit).await
    }

    /// Future resolving once the process has been reaped
    ///
    /// Holds no borrow of the handle, so it can be awaited alongside
    /// [`next_line`](Self::next_line). Children that inherited the output
    /// pipes can keep them open long after the core itself exited.
    pub fn exited(&self) -> impl Future<Output = ExitOutcome> + Send + 'static {
        let mut exit = self.exit.clone();
        async move { wait_for_exit(&mut exit).await }
    }
}

async fn wait_for_exit(exit: &mut watch::Receiver<Option<ExitOutcome>>) -> ExitOutcome {
    let outcome = match exit.wait_for(Option::is_some).await {
        Ok(outcome) => (*outcome).unwrap_or(ExitOutcome::UNKNOWN),
        Err(_) => ExitOutcome::UNKNOWN,
    };
    outcome
}

struct TrackedProcess {
    generation: u64,
    pid: Option<u32>,
    control: Box<dyn ProcessControl>,
    exit: watch::Receiver<Option<ExitOutcome>>,
}

impl TrackedProcess {
    fn has_exited(&self) -> bool {
        self.exit.borrow().is_some()
    }
}

/// Owner of the one live core process
pub struct ProcessSupervisor {
    launcher: Arc<dyn ProcessLauncher>,
    current: Mutex<Option<TrackedProcess>>,
    /// Serializes `start` and `stop`
    transition: tokio::sync::Mutex<()>,
    next_generation: AtomicU64,
    pid_path: Option<PathBuf>,
    exit_timeout: Duration,
}

impl ProcessSupervisor {
    pub fn new(launcher: Arc<dyn ProcessLauncher>) -> Self {
        Self {
            launcher,
            current: Mutex::new(None),
            transition: tokio::sync::Mutex::new(()),
            next_generation: AtomicU64::new(0),
            pid_path: None,
            exit_timeout: DEFAULT_EXIT_TIMEOUT,
        }
    }

    /// Supervisor that launches real processes
    pub fn with_tokio_launcher() -> Self {
        Self::new(Arc::new(TokioLauncher))
    }

    /// Record the live core's pid at `path`
    pub fn with_pid_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.pid_path = Some(path.into());
        self
    }

    pub fn with_exit_timeout(mut self, timeout: Duration) -> Self {
        self.exit_timeout = timeout;
        self
    }

    /// Start `command`, stopping any tracked process first
    pub async fn start(&self, command: &CommandLine) -> Result<ProcessHandle, SupervisorError> {
        if command.program.as_os_str().is_empty() {
            return Err(SupervisorError::EmptyCommand);
        }

        let _transition = self.transition.lock().await;
        self.stop_tracked().await;

        let mut current = self.current.lock();
        let launched =
            self.launcher
                .launch(command)
                .map_err(|source| SupervisorError::ProcessStartFailure {
                    program: command.program.display().to_string(),
                    source,
                })?;

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::info!(
            "Started core {} (pid {:?})",
            command.program.display(),
            launched.pid
        );

        if let (Some(path), Some(pid)) = (&self.pid_path, launched.pid) {
            if let Err(e) = pidfile::write_pid_file(path, pid) {
                tracing::warn!("Failed to write PID file {:?}: {}", path, e);
            }
        }

        *current = Some(TrackedProcess {
            generation,
            pid: launched.pid,
            control: launched.control,
            exit: launched.exit.clone(),
        });

        Ok(ProcessHandle {
            generation,
            pid: launched.pid,
            output: launched.output,
            exit: launched.exit,
        })
    }

    /// Stop the tracked process and wait for it to be reaped
    ///
    /// A no-op when nothing is tracked.
    pub async fn stop(&self) {
        let _transition = self.transition.lock().await;
        self.stop_tracked().await;
    }

    async fn stop_tracked(&self) {
        let previous = self.current.lock().take();
        let Some(previous) = previous else {
            return;
        };

        let mut exit = previous.exit.clone();
        self.escalate(previous);
        if tokio::time::timeout(self.exit_timeout, wait_for_exit(&mut exit))
            .await
            .is_err()
        {
            tracing::warn!("Core was not reaped within {:?}", self.exit_timeout);
        }
    }

    /// Kill the tracked process without waiting
    ///
    /// Safe to call from any context, including shutdown paths.
    pub fn kill_current(&self) {
        let previous = self.current.lock().take();
        if let Some(previous) = previous {
            self.escalate(previous);
        }
    }

    /// Kill the tracked process from a panic hook without risking deadlock
    fn kill_current_from_hook(&self) {
        let previous = match self.current.try_lock_for(Duration::from_millis(200)) {
            Some(mut current) => current.take(),
            None => return,
        };
        if let Some(previous) = previous {
            self.escalate(previous);
        }
    }

    /// Kill the tracked process if the application panics
    pub fn install_shutdown_hook(self: &Arc<Self>) {
        let supervisor = Arc::downgrade(self);
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            if let Some(supervisor) = supervisor.upgrade() {
                supervisor.kill_current_from_hook();
            }
            previous(info);
        }));
    }

    /// Forget a process that ended on its own
    ///
    /// Only acts if `generation` is still the tracked process, so a late call
    /// from an old connection attempt cannot touch a newer core.
    pub fn release_if_current(&self, generation: u64) -> bool {
        let released = {
            let mut current = self.current.lock();
            if current.as_ref().map(|p| p.generation) != Some(generation) {
                return false;
            }
            current.take()
        };
        if let Some(process) = released {
            self.escalate(process);
        }
        true
    }

    /// Whether a tracked process is still running
    pub fn is_running(&self) -> bool {
        self.current
            .lock()
            .as_ref()
            .is_some_and(|process| !process.has_exited())
    }

    /// Pid of the tracked process
    pub fn current_pid(&self) -> Option<u32> {
        self.current.lock().as_ref().and_then(|process| process.pid)
    }

    /// Kill a core left alive by an earlier run, as recorded in the pidfile
    ///
    /// Returns the pid that was signalled.
    pub fn kill_stale(&self) -> Option<u32> {
        let path = self.pid_path.as_ref()?;
        let tracked = self.current_pid();
        let pid = pidfile::take_live_pid(path)?;

        if Some(pid) == tracked {
            if let Err(e) = pidfile::write_pid_file(path, pid) {
                tracing::warn!("Failed to restore PID file {:?}: {}", path, e);
            }
            return None;
        }

        tracing::warn!("Killing stale core from an earlier run (pid {})", pid);
        if let Err(e) = platform::terminate(pid) {
            tracing::debug!("Graceful termination of stale core failed: {}", e);
        }
        if let Err(e) = platform::kill_tree(pid) {
            tracing::debug!("Killing stale core tree failed: {}", e);
        }
        Some(pid)
    }

    fn escalate(&self, process: TrackedProcess) {
        let exited = process.has_exited();
        if exited {
            tracing::debug!("Core (pid {:?}) already exited", process.pid);
        } else {
            tracing::info!("Stopping core (pid {:?})", process.pid);
            if let Err(e) = process.control.terminate() {
                tracing::debug!("Graceful termination failed: {}", e);
            }
        }

        // Children outlive the core's own exit; the group stays addressable
        // while any member is alive
        if let Err(e) = process.control.kill_tree() {
            tracing::debug!("Killing process tree failed: {}", e);
        }

        if !exited {
            if let Err(e) = process.control.kill() {
                tracing::debug!("Killing process handle failed: {}", e);
            }
        }

        if let Some(path) = &self.pid_path {
            if let Err(e) = pidfile::remove_pid_file(path) {
                tracing::warn!("Failed to remove PID file {:?}: {}", path, e);
            }
        }
    }
}

impl Drop for ProcessSupervisor {
    fn drop(&mut self) {
        let previous = self.current.get_mut().take();
        if let Some(previous) = previous {
            self.escalate(previous);
        }
    }
}
