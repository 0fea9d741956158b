//! Core domain types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ProfileError;

/// Default local listen address handed to the tunnel core
pub const DEFAULT_LISTEN: &str = "127.0.0.1:30000";

/// Traffic routing mode understood by the tunnel core
///
/// Stored values are read as leniently as `FromStr`; an unknown value falls
/// back to the default mode instead of failing the whole profile.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String")]
pub enum RoutingMode {
    /// Route local-region traffic directly, tunnel the rest
    #[default]
    #[serde(rename = "bypass_cn")]
    BypassLocal,
    /// Tunnel everything
    #[serde(rename = "global")]
    Global,
    /// Forward only, no routing rules
    #[serde(rename = "none")]
    Passthrough,
}

impl RoutingMode {
    /// All routing modes, in display order
    pub fn all() -> &'static [RoutingMode] {
        &[
            RoutingMode::BypassLocal,
            RoutingMode::Global,
            RoutingMode::Passthrough,
        ]
    }

    /// Value passed to the core's `-routing` flag
    pub fn as_flag(&self) -> &'static str {
        match self {
            RoutingMode::BypassLocal => "bypass_cn",
            RoutingMode::Global => "global",
            RoutingMode::Passthrough => "none",
        }
    }
}

impl fmt::Display for RoutingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_flag())
    }
}

impl From<String> for RoutingMode {
    fn from(value: String) -> Self {
        value.parse().unwrap_or_else(|e| {
            tracing::warn!("{}, using {}", e, RoutingMode::default());
            RoutingMode::default()
        })
    }
}

impl FromStr for RoutingMode {
    type Err = ProfileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bypass_cn" | "bypass-local" | "bypass" => Ok(RoutingMode::BypassLocal),
            "global" => Ok(RoutingMode::Global),
            "none" | "passthrough" => Ok(RoutingMode::Passthrough),
            other => Err(ProfileError::InvalidField {
                field: "routing".to_string(),
                message: format!("unknown routing mode '{}'", other),
            }),
        }
    }
}

/// A connection profile
///
/// Field names on disk follow the profile store's JSON layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    /// Stable unique identifier
    #[serde(default)]
    pub id: String,

    /// Display name
    #[serde(default)]
    pub name: String,

    /// Remote server address (`-f`)
    #[serde(default, rename = "server")]
    pub remote_server: String,

    /// Local listen address, `host:port` (`-l`)
    #[serde(default = "default_listen", rename = "listen")]
    pub listen_address: String,

    /// Authentication token (`-token`)
    #[serde(default, rename = "token")]
    pub auth_token: String,

    /// Candidate endpoints, one per line; `#` comments and blank lines ignored
    #[serde(default, rename = "ip_list")]
    pub endpoint_list: String,

    /// Routing mode (`-routing`)
    #[serde(default, rename = "routing")]
    pub routing_mode: RoutingMode,

    /// Measure candidates and pick the best instead of using the first entry
    #[serde(default = "default_true", rename = "auto_best")]
    pub auto_select_best: bool,
}

fn default_listen() -> String {
    DEFAULT_LISTEN.to_string()
}

fn default_true() -> bool {
    true
}

impl Profile {
    /// Create a profile with a fresh id and default settings
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: new_profile_id(),
            name: name.into(),
            remote_server: String::new(),
            listen_address: default_listen(),
            auth_token: String::new(),
            endpoint_list: String::new(),
            routing_mode: RoutingMode::default(),
            auto_select_best: true,
        }
    }

    /// Port part of the listen address, if it has one
    pub fn listen_port(&self) -> Option<u16> {
        let (_, port) = self.listen_address.trim().rsplit_once(':')?;
        port.parse().ok()
    }

    /// Set a field by its store key, as used by `profile set`
    pub fn set_field(&mut self, key: &str, value: &str) -> Result<(), ProfileError> {
        match key {
            "name" => self.name = value.to_string(),
            "server" => self.remote_server = value.to_string(),
            "listen" => self.listen_address = value.to_string(),
            "token" => self.auth_token = value.to_string(),
            "ip_list" => self.endpoint_list = value.to_string(),
            "routing" => self.routing_mode = value.parse()?,
            "auto_best" => {
                self.auto_select_best =
                    value
                        .trim()
                        .parse()
                        .map_err(|_| ProfileError::InvalidField {
                            field: key.to_string(),
                            message: format!("expected true or false, got '{}'", value),
                        })?
            }
            other => {
                return Err(ProfileError::InvalidField {
                    field: other.to_string(),
                    message: "unknown profile field".to_string(),
                })
            }
        }
        Ok(())
    }
}

impl Default for Profile {
    fn default() -> Self {
        Self::new("Default")
    }
}

/// Generate a new unique profile id
pub fn new_profile_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_routing_mode_flags() {
        assert_eq!(RoutingMode::BypassLocal.as_flag(), "bypass_cn");
        assert_eq!(RoutingMode::Global.as_flag(), "global");
        assert_eq!(RoutingMode::Passthrough.as_flag(), "none");
    }

    #[test]
    fn test_routing_mode_parse() {
        assert_eq!("global".parse::<RoutingMode>().unwrap(), RoutingMode::Global);
        assert_eq!("NONE".parse::<RoutingMode>().unwrap(), RoutingMode::Passthrough);
        assert!("sideways".parse::<RoutingMode>().is_err());
    }

    #[test]
    fn test_profile_json_keys() {
        let json = r#"{"id":"a","name":"n","server":"s.example:443","listen":"127.0.0.1:1080",
            "token":"t","ip_list":"1.1.1.1","routing":"global","auto_best":false}"#;
        let profile: Profile = serde_json::from_str(json).unwrap();
        assert_eq!(profile.remote_server, "s.example:443");
        assert_eq!(profile.listen_address, "127.0.0.1:1080");
        assert_eq!(profile.routing_mode, RoutingMode::Global);
        assert!(!profile.auto_select_best);
    }

    #[test]
    fn test_routing_mode_reads_leniently() {
        let read = |value: &str| -> RoutingMode {
            serde_json::from_str(&format!("\"{}\"", value)).unwrap()
        };
        assert_eq!(read("Global"), RoutingMode::Global);
        assert_eq!(read("passthrough"), RoutingMode::Passthrough);
        assert_eq!(read("sideways"), RoutingMode::BypassLocal);
        assert_eq!(
            serde_json::to_string(&RoutingMode::Passthrough).unwrap(),
            "\"none\""
        );
    }

    #[test]
    fn test_profile_missing_fields_default() {
        let profile: Profile = serde_json::from_str(r#"{"name":"bare"}"#).unwrap();
        assert!(profile.id.is_empty());
        assert_eq!(profile.listen_address, DEFAULT_LISTEN);
        assert!(profile.auto_select_best);
        assert_eq!(profile.routing_mode, RoutingMode::BypassLocal);
    }

    #[test]
    fn test_listen_port() {
        let mut profile = Profile::new("p");
        assert_eq!(profile.listen_port(), Some(30000));
        profile.listen_address = "localhost".to_string();
        assert_eq!(profile.listen_port(), None);
    }

    #[test]
    fn test_set_field() {
        let mut profile = Profile::new("p");
        profile.set_field("routing", "global").unwrap();
        profile.set_field("auto_best", "false").unwrap();
        assert_eq!(profile.routing_mode, RoutingMode::Global);
        assert!(!profile.auto_select_best);
        assert!(profile.set_field("auto_best", "maybe").is_err());
        assert!(profile.set_field("colour", "red").is_err());
    }
}
