//! Performance test definition models
//!
//! A performance test pairs a name with the load-generator configuration
//! used to launch it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Identifier of a performance test definition
pub type TestId = i64;

/// Stored performance test definition
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PerformanceTest {
    pub id: TestId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub config: LoadTestConfig,
}

impl PerformanceTest {
    pub fn new(id: TestId, name: impl Into<String>, config: LoadTestConfig) -> Self {
        Self {
            id,
            name: name.into(),
            description: None,
            config,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

impl fmt::Display for PerformanceTest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Test {}: {}", self.id, self.name)
    }
}

/// Load generator settings for a performance test
///
/// Every field is optional here; the command builder decides which ones are
/// mandatory and fills defaults for the rest. Keys this crate does not know
/// about are kept in `extra` so definitions round-trip unchanged.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadTestConfig {
    /// Target host passed to `--host`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    /// Script reference passed to `-f`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locustfile: Option<String>,

    /// Concurrent simulated users
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub users: Option<u32>,

    /// Users spawned per second
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spawn_rate: Option<f64>,

    /// Run duration, e.g. "30s", "1m", "1h30m"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_time: Option<String>,

    /// Prefix for the generator's CSV artifacts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_file_prefix: Option<String>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl LoadTestConfig {
    pub fn new(host: impl Into<String>, locustfile: impl Into<String>) -> Self {
        Self {
            host: Some(host.into()),
            locustfile: Some(locustfile.into()),
            ..Default::default()
        }
    }

    pub fn users(mut self, users: u32) -> Self {
        self.users = Some(users);
        self
    }

    pub fn spawn_rate(mut self, rate: f64) -> Self {
        self.spawn_rate = Some(rate);
        self
    }

    pub fn run_time(mut self, run_time: impl Into<String>) -> Self {
        self.run_time = Some(run_time.into());
        self
    }

    pub fn result_file_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.result_file_prefix = Some(prefix.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_keeps_unknown_keys() {
        let json = r#"{
            "host": "http://localhost:8080",
            "locustfile": "scenarios/checkout.py",
            "users": 50,
            "tags": ["checkout"]
        }"#;

        let config: LoadTestConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.host.as_deref(), Some("http://localhost:8080"));
        assert_eq!(config.users, Some(50));
        assert!(config.spawn_rate.is_none());
        assert!(config.extra.contains_key("tags"));

        let back = serde_json::to_value(&config).unwrap();
        assert_eq!(back["tags"][0], "checkout");
    }

    #[test]
    fn test_definition_from_yaml() {
        let yaml = r#"
id: 7
name: checkout
config:
  host: http://shop.local
  locustfile: checkout.py
  run_time: 30s
"#;
        let test: PerformanceTest = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(test.id, 7);
        assert!(test.description.is_none());
        assert_eq!(test.config.run_time.as_deref(), Some("30s"));
        assert_eq!(test.to_string(), "Test 7: checkout");
    }
}
