//! ep-supervisor: Tunnel core lifecycle for echpilot
//!
//! Owns the single live tunnel core process, turns a profile into a running
//! connection, classifies the core's output, and keeps a second launch of
//! the control application from starting a competing instance.

pub mod args;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod output;
pub mod platform;
pub mod single_instance;
pub mod supervisor;

pub use args::{CommandLine, CoreArgs};
pub use error::{FailureKind, SupervisorError};
pub use events::{ConnectionEvent, EventSink};
pub use orchestrator::{ConnectionOrchestrator, ConnectionState};
pub use output::{classify, OutputLineCodec, Severity};
pub use single_instance::{InstanceRole, SingleInstanceGuard};
pub use supervisor::{
    ExitOutcome, LaunchedProcess, ProcessControl, ProcessHandle, ProcessLauncher,
    ProcessSupervisor, TokioLauncher,
};
