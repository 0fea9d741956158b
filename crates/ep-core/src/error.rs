//! Core error types for echpilot

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for the echpilot crates
#[derive(Error, Debug)]
pub enum EpError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Profile store error
    #[error("Profile error: {0}")]
    Profile(#[from] ProfileError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Profile store errors
#[derive(Error, Debug)]
pub enum ProfileError {
    /// No profile matches the given id or name
    #[error("Profile not found: {0}")]
    NotFound(String),

    /// The store must always keep at least one profile
    #[error("Cannot remove the last remaining profile")]
    LastProfile,

    /// Invalid field value
    #[error("Invalid value for {field}: {message}")]
    InvalidField { field: String, message: String },

    /// Store could not be read or written
    #[error("Profile store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Store contents are not valid JSON
    #[error("Profile store JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
