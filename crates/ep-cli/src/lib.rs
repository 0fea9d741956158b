//! ep-cli: Terminal front-end for echpilot
//!
//! Provides the `echpilot` binary: connect with a profile, run the endpoint
//! selector or a single probe by hand, and manage profiles and configuration.

pub mod commands;
pub mod output;
