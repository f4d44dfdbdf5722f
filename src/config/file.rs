//! Configuration file management
//!
//! Handles finding, loading, and validating configuration files.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{AppConfig, EnvConfig, MetricsConfig};
use crate::models::{LoadTestConfig, PerformanceTest, TestId};

/// Configuration file locations (in order of precedence)
const CONFIG_LOCATIONS: &[&str] = &[
    "./perf-orchestrator.yaml",
    "./perf-orchestrator.yml",
    "./.perf-orchestrator.yaml",
    "~/.config/perf-orchestrator/config.yaml",
    "~/.perf-orchestrator.yaml",
];

/// Full configuration file structure
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Version of config file format
    #[serde(default = "default_version")]
    pub version: String,

    /// Application settings
    #[serde(default)]
    pub app: AppConfig,

    /// Performance test definitions
    #[serde(default)]
    pub performance_tests: Vec<PerformanceTest>,
}

fn default_version() -> String {
    "1.0".to_string()
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            version: default_version(),
            app: AppConfig::default(),
            performance_tests: Vec::new(),
        }
    }
}

impl ConfigFile {
    /// Find configuration file in standard locations
    pub fn find() -> Option<PathBuf> {
        for location in CONFIG_LOCATIONS {
            let path = expand_path(location);
            if path.exists() {
                return Some(path);
            }
        }
        None
    }

    /// Load from `explicit`, else `PERF_ORCH_CONFIG`, else the first standard
    /// location, else defaults. Environment overrides are applied last.
    pub fn resolve(explicit: Option<&Path>, env: &EnvConfig) -> Result<(Self, Option<PathBuf>)> {
        let path = explicit
            .map(Path::to_path_buf)
            .or_else(|| env.config_file.as_deref().map(expand_path))
            .or_else(Self::find);

        let mut config = match &path {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        debug!("Using config file: {:?}", path);

        config.app.apply_env(env);
        config.app.validate()?;
        Ok((config, path))
    }

    /// Load configuration from file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = if is_yaml_file(path) {
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse YAML config: {}", path.display()))?
        } else {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display()))?
        };

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = if is_yaml_file(path) {
            serde_yaml::to_string(self).context("Failed to serialize config")?
        } else {
            serde_json::to_string_pretty(self).context("Failed to serialize config")?
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if !["1.0"].contains(&self.version.as_str()) {
            anyhow::bail!("Unsupported config version: {}", self.version);
        }

        self.app.validate()?;

        let mut seen = HashSet::new();
        for test in &self.performance_tests {
            if !seen.insert(test.id) {
                anyhow::bail!("Duplicate performance test id {}", test.id);
            }
        }

        Ok(())
    }

    /// Generate example configuration
    pub fn example() -> Self {
        Self {
            version: default_version(),
            app: AppConfig {
                work_dir: PathBuf::from("./loadtests"),
                metrics: MetricsConfig {
                    enabled: false,
                    ..Default::default()
                },
                ..Default::default()
            },
            performance_tests: vec![
                PerformanceTest::new(
                    1,
                    "homepage-smoke",
                    LoadTestConfig::new("http://localhost:8080", "locustfile.py")
                        .users(5)
                        .run_time("30s"),
                )
                .with_description("Short smoke load against the landing page"),
                PerformanceTest::new(
                    2,
                    "checkout-soak",
                    LoadTestConfig::new("http://localhost:8080", "checkout.py")
                        .users(50)
                        .spawn_rate(5.0)
                        .run_time("10m")
                        .result_file_prefix("checkout"),
                ),
            ],
        }
    }

    /// Get performance test by id
    pub fn performance_test(&self, id: TestId) -> Option<&PerformanceTest> {
        self.performance_tests.iter().find(|t| t.id == id)
    }
}

/// Expand ~ to home directory
pub(crate) fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

/// Check if file is YAML based on extension
pub(crate) fn is_yaml_file(path: &Path) -> bool {
    path.extension()
        .map(|e| e == "yaml" || e == "yml")
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_config_file_default() {
        let config = ConfigFile::default();
        assert_eq!(config.version, "1.0");
        assert!(config.performance_tests.is_empty());
    }

    #[test]
    fn test_config_file_save_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");

        let config = ConfigFile::example();
        config.save(&path).unwrap();

        let loaded = ConfigFile::load(&path).unwrap();
        assert_eq!(loaded.version, config.version);
        assert_eq!(loaded.performance_tests, config.performance_tests);
        assert_eq!(loaded.performance_test(2).unwrap().name, "checkout-soak");
    }

    #[test]
    fn test_load_yaml_definitions() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yml");
        std::fs::write(
            &path,
            r#"
version: "1.0"
app:
  work_dir: /var/lib/loadtests
  stop_grace_secs: 2
performance_tests:
  - id: 7
    name: api
    config:
      host: http://api:8000
      locustfile: api.py
      tags: [nightly]
"#,
        )
        .unwrap();

        let config = ConfigFile::load(&path).unwrap();
        assert_eq!(config.app.stop_grace_secs, 2);
        let test = config.performance_test(7).unwrap();
        assert_eq!(test.config.host.as_deref(), Some("http://api:8000"));
        assert!(test.config.extra.contains_key("tags"));
    }

    #[test]
    fn test_validate_config() {
        let mut config = ConfigFile::example();
        assert!(config.validate().is_ok());

        config.performance_tests.push(config.performance_tests[0].clone());
        assert!(config.validate().is_err());

        let config = ConfigFile {
            version: "9.9".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_resolve_explicit_path_with_env_override() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        ConfigFile::example().save(&path).unwrap();

        let env = EnvConfig {
            stop_grace_secs: Some(1),
            ..Default::default()
        };
        let (config, used) = ConfigFile::resolve(Some(&path), &env).unwrap();
        assert_eq!(used, Some(path));
        assert_eq!(config.app.stop_grace_secs, 1);
        assert_eq!(config.performance_tests.len(), 2);
    }

    #[test]
    fn test_expand_path() {
        let path = expand_path("./test.yaml");
        assert_eq!(path, PathBuf::from("./test.yaml"));
    }
}
