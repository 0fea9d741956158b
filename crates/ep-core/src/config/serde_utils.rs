//! Shared serialization/deserialization utilities for configuration

/// Helper module for Duration serialization as fractional seconds
///
/// Probe timeouts are routinely sub-second (`0.05`, `1.5`), so durations are
/// stored as an `f64` number of seconds in TOML.
///
/// # Example
///
/// ```ignore
/// use std::time::Duration;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct Config {
///     #[serde(with = "ep_core::config::serde_utils::duration_secs_f64")]
///     timeout: Duration,
/// }
/// ```
pub mod duration_secs_f64 {
    use serde::{self, de::Error, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    /// Serialize a Duration as seconds (f64)
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    /// Deserialize a Duration from seconds (f64)
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::time::Duration;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct TestConfig {
        #[serde(with = "duration_secs_f64")]
        timeout: Duration,
    }

    #[test]
    fn test_duration_serialize() {
        let config = TestConfig {
            timeout: Duration::from_millis(1500),
        };
        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(json, r#"{"timeout":1.5}"#);
    }

    #[test]
    fn test_duration_deserialize_integer_and_fraction() {
        let config: TestConfig = serde_json::from_str(r#"{"timeout":2}"#).unwrap();
        assert_eq!(config.timeout, Duration::from_secs(2));

        let config: TestConfig = serde_json::from_str(r#"{"timeout":0.05}"#).unwrap();
        assert_eq!(config.timeout, Duration::from_millis(50));
    }

    #[test]
    fn test_negative_duration_rejected() {
        let result: Result<TestConfig, _> = serde_json::from_str(r#"{"timeout":-1.0}"#);
        assert!(result.is_err());
    }
}
