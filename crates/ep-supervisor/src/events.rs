//! Events pushed to the front-end
//!
//! The orchestrator never talks to a UI directly. Everything it wants to
//! show goes through an [`EventSink`] as a [`ConnectionEvent`].

use tokio::sync::mpsc;

use crate::orchestrator::ConnectionState;
use crate::output::{classify, Severity};

/// One notification from a connection attempt
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// A log line, from the core or from the orchestrator itself
    Log { text: String, severity: Severity },
    /// Short phase text such as "measuring" or "running"
    Status(String),
    /// Endpoint resolution result, e.g. `"42ms | 203.0.113.5:443"`
    Selection(String),
    /// Multi-line identity report
    Identity(String),
    /// The orchestrator changed state
    StateChanged(ConnectionState),
}

/// Sending half of the event channel
///
/// Sends never fail: events are dropped once the receiver is gone.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<ConnectionEvent>,
}

impl EventSink {
    /// Create a sink and the receiver the front-end reads from
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn emit(&self, event: ConnectionEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("Event receiver gone; dropping event");
        }
    }

    pub fn log(&self, text: impl Into<String>, severity: Severity) {
        self.emit(ConnectionEvent::Log {
            text: text.into(),
            severity,
        });
    }

    /// Log a core output line with its classified severity
    pub fn core_line(&self, line: &str) {
        self.log(line, classify(line));
    }

    pub fn status(&self, text: impl Into<String>) {
        self.emit(ConnectionEvent::Status(text.into()));
    }

    pub fn selection(&self, text: impl Into<String>) {
        self.emit(ConnectionEvent::Selection(text.into()));
    }

    pub fn identity(&self, report: impl Into<String>) {
        self.emit(ConnectionEvent::Identity(report.into()));
    }

    pub fn state(&self, state: ConnectionState) {
        self.emit(ConnectionEvent::StateChanged(state));
    }
}
