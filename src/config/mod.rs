//! Configuration module
//!
//! Handles loading and managing configuration.

#![allow(dead_code)]

pub mod env;
pub mod file;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub use env::EnvConfig;
pub use file::ConfigFile;

/// Application configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Working directory of the load generator; artifacts and PID side files
    /// are written here
    pub work_dir: PathBuf,

    /// Directory holding run records (platform data dir when unset)
    pub runs_dir: Option<PathBuf>,

    /// Load generator settings
    pub generator: GeneratorConfig,

    /// Maximum concurrently running background executions
    pub max_workers: usize,

    /// Maximum queued background executions
    pub queue_capacity: usize,

    /// Seconds to wait after SIGTERM before escalating to SIGKILL
    pub stop_grace_secs: u64,

    /// Metrics export
    pub metrics: MetricsConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("."),
            runs_dir: None,
            generator: GeneratorConfig::default(),
            max_workers: 4,
            queue_capacity: 64,
            stop_grace_secs: 5,
            metrics: MetricsConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content =
            std::fs::read_to_string(path.as_ref()).context("Failed to read config file")?;

        let config: Self = if file::is_yaml_file(path.as_ref()) {
            serde_yaml::from_str(&content).context("Failed to parse YAML config")?
        } else {
            serde_json::from_str(&content).context("Failed to parse JSON config")?
        };

        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = if file::is_yaml_file(path.as_ref()) {
            serde_yaml::to_string(self).context("Failed to serialize config")?
        } else {
            serde_json::to_string_pretty(self).context("Failed to serialize config")?
        };

        std::fs::write(path, content).context("Failed to write config file")?;
        Ok(())
    }

    /// Apply environment overrides
    pub fn apply_env(&mut self, env: &EnvConfig) {
        if let Some(dir) = &env.work_dir {
            self.work_dir = PathBuf::from(dir);
        }
        if let Some(dir) = &env.runs_dir {
            self.runs_dir = Some(PathBuf::from(dir));
        }
        if let Some(program) = &env.generator {
            self.generator.program = program.clone();
        }
        if let Some(n) = env.max_workers {
            self.max_workers = n;
        }
        if let Some(n) = env.queue_capacity {
            self.queue_capacity = n;
        }
        if let Some(secs) = env.stop_grace_secs {
            self.stop_grace_secs = secs;
        }
        if let Some(url) = &env.metrics_url {
            self.metrics.url = url.clone();
            self.metrics.enabled = true;
        }
        if let Some(db) = &env.metrics_database {
            self.metrics.database = db.clone();
        }
        if let Some(enabled) = env.metrics_enabled {
            self.metrics.enabled = enabled;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_workers == 0 {
            anyhow::bail!("max_workers must be at least 1");
        }
        if self.queue_capacity == 0 {
            anyhow::bail!("queue_capacity must be at least 1");
        }
        if self.generator.program.trim().is_empty() {
            anyhow::bail!("generator.program must not be empty");
        }
        if self.metrics.enabled && self.metrics.url.trim().is_empty() {
            anyhow::bail!("metrics.url is required when metrics are enabled");
        }
        Ok(())
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }
}

/// Load generator configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Executable name or path
    pub program: String,

    /// Arguments placed before the Locust options
    pub args: Vec<String>,

    /// Suffix the generator appends to the CSV prefix for its stats file
    pub result_suffix: String,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            program: "locust".to_string(),
            args: Vec::new(),
            result_suffix: "_stats.csv".to_string(),
        }
    }
}

/// Time-series metrics backend
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,

    /// Base URL of the InfluxDB HTTP API
    pub url: String,

    pub database: String,

    pub measurement: String,

    /// HTTP timeout in seconds
    pub timeout_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: "http://localhost:8086".to_string(),
            database: "performance".to_string(),
            measurement: "performance_results".to_string(),
            timeout_secs: 10,
        }
    }
}
