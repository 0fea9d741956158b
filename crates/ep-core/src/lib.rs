//! ep-core: Core abstractions and configuration for echpilot
//!
//! This crate provides the connection profile model, the profile store,
//! application configuration, and the error types shared by the probe,
//! supervisor and CLI crates.

pub mod config;
pub mod error;
pub mod pidfile;
pub mod profiles;
pub mod types;

pub use error::{ConfigError, EpError, ProfileError};
pub use profiles::ProfileStore;
pub use types::{Profile, RoutingMode};
