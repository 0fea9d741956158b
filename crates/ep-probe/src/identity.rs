//! Public identity lookups through an established tunnel
//!
//! After the core starts, each configured lookup service is queried through
//! the core's local HTTP proxy. Every source is independent: a failed source
//! shows up as [`UNAVAILABLE`] in the report and never affects the others.

use std::fmt;

use reqwest::{Client, Proxy};
use serde_json::Value;
use tokio::task::JoinSet;

use ep_core::config::{IdentityConfig, IdentityFormat, IdentitySource};

/// Result text for a source that could not be queried or parsed
pub const UNAVAILABLE: &str = "unavailable";

/// Per-source lookup results, in configured order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityReport {
    /// `(source name, result text)` pairs
    pub entries: Vec<(String, String)>,
}

impl IdentityReport {
    /// Result for the named source
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, result)| result.as_str())
    }

    /// Whether every source failed
    pub fn all_unavailable(&self) -> bool {
        self.entries.iter().all(|(_, result)| result == UNAVAILABLE)
    }
}

impl fmt::Display for IdentityReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (name, result)) in self.entries.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}: {}", name, result)?;
        }
        Ok(())
    }
}

/// Queries identity lookup services through a local proxy
#[derive(Debug, Clone)]
pub struct IdentityProbe {
    config: IdentityConfig,
}

impl IdentityProbe {
    pub fn new(config: IdentityConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &IdentityConfig {
        &self.config
    }

    /// Proxy URL for a profile listen address
    ///
    /// A bare `host:port` gets an `http://` scheme. Addresses that are not on
    /// a loopback name use the configured fallback proxy.
    pub fn proxy_url(&self, listen_address: &str) -> String {
        let listen_address = listen_address.trim();
        let url = if listen_address.contains("://") {
            listen_address.to_string()
        } else {
            format!("http://{}", listen_address)
        };

        if url.contains("127.0.0.1") || url.contains("localhost") {
            url
        } else {
            self.config.fallback_proxy.clone()
        }
    }

    /// Query every source concurrently through the proxy at `listen_address`
    pub async fn lookup(&self, listen_address: &str) -> IdentityReport {
        let proxy_url = self.proxy_url(listen_address);
        tracing::debug!("Identity lookup via proxy {}", proxy_url);

        let client = match build_client(&proxy_url, &self.config) {
            Ok(client) => client,
            Err(e) => {
                tracing::warn!("Cannot build identity client for {}: {}", proxy_url, e);
                return self.unavailable_report();
            }
        };

        let mut join_set = JoinSet::new();
        for (index, source) in self.config.sources.iter().enumerate() {
            let client = client.clone();
            let source = source.clone();
            join_set.spawn(async move { (index, fetch_identity(&client, &source).await) });
        }

        let mut results: Vec<Option<String>> = vec![None; self.config.sources.len()];
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((index, result)) => results[index] = result,
                Err(e) => tracing::debug!("Identity task failed: {}", e),
            }
        }

        IdentityReport {
            entries: self
                .config
                .sources
                .iter()
                .zip(results)
                .map(|(source, result)| {
                    (
                        source.name.clone(),
                        result.unwrap_or_else(|| UNAVAILABLE.to_string()),
                    )
                })
                .collect(),
        }
    }

    fn unavailable_report(&self) -> IdentityReport {
        IdentityReport {
            entries: self
                .config
                .sources
                .iter()
                .map(|s| (s.name.clone(), UNAVAILABLE.to_string()))
                .collect(),
        }
    }
}

fn build_client(proxy_url: &str, config: &IdentityConfig) -> reqwest::Result<Client> {
    Client::builder()
        .proxy(Proxy::all(proxy_url)?)
        .timeout(config.timeout)
        .user_agent(config.user_agent.as_str())
        .build()
}

async fn fetch_identity(client: &Client, source: &IdentitySource) -> Option<String> {
    let response = match client.get(&source.url).send().await {
        Ok(response) => response,
        Err(e) => {
            tracing::debug!("Identity source {} failed: {}", source.name, e);
            return None;
        }
    };

    let body: Value = match response.error_for_status() {
        Ok(response) => match response.json().await {
            Ok(body) => body,
            Err(e) => {
                tracing::debug!("Identity source {} sent bad JSON: {}", source.name, e);
                return None;
            }
        },
        Err(e) => {
            tracing::debug!("Identity source {} returned {}", source.name, e);
            return None;
        }
    };

    parse_identity(source.format, &body)
}

/// Render a lookup response; `None` when it carries nothing usable
pub fn parse_identity(format: IdentityFormat, body: &Value) -> Option<String> {
    let field = |value: &Value, key: &str| -> String {
        match value.get(key) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => String::new(),
        }
    };

    let text = match format {
        IdentityFormat::IpSb => format!("{} {}", field(body, "country_code"), field(body, "ip")),
        IdentityFormat::Ipip => {
            let data = body.get("data").cloned().unwrap_or(Value::Null);
            let location: String = data
                .get("location")
                .and_then(Value::as_array)
                .map(|parts| parts.iter().filter_map(Value::as_str).collect())
                .unwrap_or_default();
            format!("{} {}", location, field(&data, "ip"))
        }
        IdentityFormat::IpInfo => format!(
            "{} {} {}",
            field(body, "country"),
            field(body, "org"),
            field(body, "ip")
        ),
    };

    let text = text.trim();
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn test_parse_ipsb() {
        let body = json!({"country_code": "JP", "ip": "203.0.113.7", "asn": 64500});
        assert_eq!(
            parse_identity(IdentityFormat::IpSb, &body).as_deref(),
            Some("JP 203.0.113.7")
        );
    }

    #[test]
    fn test_parse_ipip_joins_location() {
        let body = json!({
            "ret": "ok",
            "data": {"ip": "198.51.100.4", "location": ["US", "California", "", "Example ISP"]}
        });
        assert_eq!(
            parse_identity(IdentityFormat::Ipip, &body).as_deref(),
            Some("USCaliforniaExample ISP 198.51.100.4")
        );
    }

    #[test]
    fn test_parse_ipinfo() {
        let body = json!({"ip": "192.0.2.1", "country": "DE", "org": "AS64501 Example"});
        assert_eq!(
            parse_identity(IdentityFormat::IpInfo, &body).as_deref(),
            Some("DE AS64501 Example 192.0.2.1")
        );
    }

    #[test]
    fn test_parse_missing_fields() {
        assert_eq!(parse_identity(IdentityFormat::IpInfo, &json!({})), None);
        assert_eq!(
            parse_identity(IdentityFormat::IpSb, &json!({"ip": "192.0.2.9"})).as_deref(),
            Some("192.0.2.9")
        );
    }

    #[test]
    fn test_proxy_url_rules() {
        let probe = IdentityProbe::new(IdentityConfig::default());
        assert_eq!(probe.proxy_url("127.0.0.1:30000"), "http://127.0.0.1:30000");
        assert_eq!(probe.proxy_url("localhost:1080"), "http://localhost:1080");
        assert_eq!(
            probe.proxy_url("socks5://127.0.0.1:1080"),
            "socks5://127.0.0.1:1080"
        );
        assert_eq!(probe.proxy_url("0.0.0.0:30000"), "http://127.0.0.1:30000");
        assert_eq!(probe.proxy_url("192.168.1.5:8080"), "http://127.0.0.1:30000");
    }

    #[test]
    fn test_report_display() {
        let report = IdentityReport {
            entries: vec![
                ("IPIP".to_string(), "CN 1.2.3.4".to_string()),
                ("IPSB".to_string(), UNAVAILABLE.to_string()),
            ],
        };
        assert_eq!(report.to_string(), "IPIP: CN 1.2.3.4\nIPSB: unavailable");
        assert_eq!(report.get("IPSB"), Some(UNAVAILABLE));
        assert!(!report.all_unavailable());
    }

    #[tokio::test]
    async fn test_dead_proxy_reports_every_source_unavailable() {
        let config = IdentityConfig {
            timeout: Duration::from_secs(2),
            ..IdentityConfig::default()
        };
        let probe = IdentityProbe::new(config);

        let report = probe.lookup("127.0.0.1:1").await;

        let names: Vec<&str> = report.entries.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["IPIP", "IPSB", "INFO"]);
        assert!(report.all_unavailable());
    }
}
