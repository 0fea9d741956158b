//! Post-start identity lookup configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::serde_utils::duration_secs_f64;

/// Response layout of an identity lookup service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityFormat {
    /// `{"country_code": .., "ip": ..}`
    IpSb,
    /// `{"data": {"location": [..], "ip": ..}}`
    Ipip,
    /// `{"country": .., "org": .., "ip": ..}`
    IpInfo,
}

/// One identity lookup endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentitySource {
    /// Label used in the report
    pub name: String,
    /// Lookup URL
    pub url: String,
    /// How to read the JSON response
    pub format: IdentityFormat,
}

impl IdentitySource {
    pub fn new(name: &str, url: &str, format: IdentityFormat) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
            format,
        }
    }
}

/// Settings for the identity probe run after the core starts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Delay after start before the tunnel is considered settled
    #[serde(with = "duration_secs_f64")]
    pub settle_delay: Duration,

    /// Per-source request timeout
    #[serde(with = "duration_secs_f64")]
    pub timeout: Duration,

    /// Proxy used when the listen address is not a loopback address
    pub fallback_proxy: String,

    /// User-Agent header sent with lookups
    pub user_agent: String,

    /// Lookup services, in report order
    pub sources: Vec<IdentitySource>,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_secs(5),
            timeout: Duration::from_secs(15),
            fallback_proxy: "http://127.0.0.1:30000".to_string(),
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36"
                .to_string(),
            sources: vec![
                IdentitySource::new("IPIP", "https://myip.ipip.net/json", IdentityFormat::Ipip),
                IdentitySource::new("IPSB", "https://api.ip.sb/geoip", IdentityFormat::IpSb),
                IdentitySource::new("INFO", "https://ipinfo.io/json", IdentityFormat::IpInfo),
            ],
        }
    }
}
