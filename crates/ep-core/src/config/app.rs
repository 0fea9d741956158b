//! Application configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::{IdentityConfig, SelectorConfig};

/// File name of the tunnel core executable
#[cfg(windows)]
pub const CORE_EXE_NAME: &str = "ech-workers.exe";
/// File name of the tunnel core executable
#[cfg(not(windows))]
pub const CORE_EXE_NAME: &str = "ech-workers";

/// Top-level configuration for the control application
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Path to the tunnel core executable
    pub core_path: PathBuf,

    /// Loopback port used by the single-instance guard
    pub instance_port: u16,

    /// Token a second launch sends to wake the first
    pub wake_token: String,

    /// Where the live core's pid is recorded
    pub pid_path: PathBuf,

    /// Endpoint selector tuning
    pub selector: SelectorConfig,

    /// Post-start identity lookups
    pub identity: IdentityConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            core_path: default_core_path(),
            instance_port: 56789,
            wake_token: "WAKE".to_string(),
            pid_path: crate::pidfile::default_pid_path(),
            selector: SelectorConfig::default(),
            identity: IdentityConfig::default(),
        }
    }
}

/// The core executable next to the running binary
pub fn default_core_path() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.to_path_buf()))
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CORE_EXE_NAME)
}
