//! Supervisor error types

use std::fmt;
use std::io;

use thiserror::Error;

/// Errors returned by the process supervisor
#[derive(Error, Debug)]
pub enum SupervisorError {
    /// Command line had no program
    #[error("Empty command line")]
    EmptyCommand,

    /// The core process could not be launched
    #[error("Failed to start {program}: {source}")]
    ProcessStartFailure {
        program: String,
        #[source]
        source: io::Error,
    },

    /// Core arguments could not be parsed
    #[error("Invalid core argument: {0}")]
    InvalidArgument(String),
}

/// Why a connection attempt ended in the `Failed` state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// The core executable does not exist
    BinaryMissing,
    /// The core executable could not be started
    ProcessStartFailure,
    /// The core exited abnormally without being asked to
    UnexpectedProcessExit,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            FailureKind::BinaryMissing => "core executable missing",
            FailureKind::ProcessStartFailure => "core failed to start",
            FailureKind::UnexpectedProcessExit => "core exited unexpectedly",
        };
        f.write_str(text)
    }
}
