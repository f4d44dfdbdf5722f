//! Environment variable configuration
//!
//! Provides environment variable overrides for configuration.

use std::env;

/// Environment variable prefix
const ENV_PREFIX: &str = "PERF_ORCH";

/// Environment configuration from environment variables
#[derive(Clone, Debug, Default)]
pub struct EnvConfig {
    /// Config file from PERF_ORCH_CONFIG
    pub config_file: Option<String>,
    /// Generator working directory from PERF_ORCH_WORK_DIR
    pub work_dir: Option<String>,
    /// Run record directory from PERF_ORCH_RUNS_DIR
    pub runs_dir: Option<String>,
    /// Generator executable from PERF_ORCH_GENERATOR
    pub generator: Option<String>,
    /// Worker count from PERF_ORCH_MAX_WORKERS
    pub max_workers: Option<usize>,
    /// Queue capacity from PERF_ORCH_QUEUE_CAPACITY
    pub queue_capacity: Option<usize>,
    /// Stop grace period from PERF_ORCH_STOP_GRACE
    pub stop_grace_secs: Option<u64>,
    /// Metrics toggle from PERF_ORCH_METRICS
    pub metrics_enabled: Option<bool>,
    /// Metrics backend URL from PERF_ORCH_METRICS_URL
    pub metrics_url: Option<String>,
    /// Metrics database from PERF_ORCH_METRICS_DB
    pub metrics_database: Option<String>,
    /// Output format from PERF_ORCH_FORMAT
    pub format: Option<String>,
}

impl EnvConfig {
    /// Load configuration from environment variables
    pub fn load() -> Self {
        Self {
            config_file: get_env("CONFIG"),
            work_dir: get_env("WORK_DIR"),
            runs_dir: get_env("RUNS_DIR"),
            generator: get_env("GENERATOR"),
            max_workers: get_env_parse("MAX_WORKERS"),
            queue_capacity: get_env_parse("QUEUE_CAPACITY"),
            stop_grace_secs: get_env_parse("STOP_GRACE"),
            metrics_enabled: get_env_bool("METRICS"),
            metrics_url: get_env("METRICS_URL"),
            metrics_database: get_env("METRICS_DB"),
            format: get_env("FORMAT"),
        }
    }

    /// Check if any environment variables are set
    pub fn has_any(&self) -> bool {
        self.config_file.is_some()
            || self.work_dir.is_some()
            || self.runs_dir.is_some()
            || self.generator.is_some()
            || self.max_workers.is_some()
            || self.queue_capacity.is_some()
            || self.stop_grace_secs.is_some()
            || self.metrics_enabled.is_some()
            || self.metrics_url.is_some()
            || self.metrics_database.is_some()
            || self.format.is_some()
    }

    /// Print current environment configuration
    pub fn print_summary(&self) {
        println!("Environment Configuration:");
        println!("  {}_CONFIG:          {:?}", ENV_PREFIX, self.config_file);
        println!("  {}_WORK_DIR:        {:?}", ENV_PREFIX, self.work_dir);
        println!("  {}_RUNS_DIR:        {:?}", ENV_PREFIX, self.runs_dir);
        println!("  {}_GENERATOR:       {:?}", ENV_PREFIX, self.generator);
        println!("  {}_MAX_WORKERS:     {:?}", ENV_PREFIX, self.max_workers);
        println!("  {}_QUEUE_CAPACITY:  {:?}", ENV_PREFIX, self.queue_capacity);
        println!("  {}_STOP_GRACE:      {:?}", ENV_PREFIX, self.stop_grace_secs);
        println!("  {}_METRICS:         {:?}", ENV_PREFIX, self.metrics_enabled);
        println!("  {}_METRICS_URL:     {:?}", ENV_PREFIX, self.metrics_url);
        println!("  {}_METRICS_DB:      {:?}", ENV_PREFIX, self.metrics_database);
        println!("  {}_FORMAT:          {:?}", ENV_PREFIX, self.format);
    }
}

/// Get environment variable with prefix
fn get_env(name: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}_{name}")).ok()
}

/// Get environment variable and parse to type
fn get_env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    get_env(name).and_then(|v| v.parse().ok())
}

/// Get environment variable as boolean
fn get_env_bool(name: &str) -> Option<bool> {
    get_env(name).map(|v| {
        matches!(
            v.to_lowercase().as_str(),
            "1" | "true" | "yes" | "on" | "enabled"
        )
    })
}

/// Builder for setting environment variables in tests
pub struct EnvBuilder {
    vars: Vec<(String, String)>,
}

impl EnvBuilder {
    pub fn new() -> Self {
        Self { vars: Vec::new() }
    }

    fn set(mut self, name: &str, value: impl Into<String>) -> Self {
        self.vars.push((format!("{ENV_PREFIX}_{name}"), value.into()));
        self
    }

    pub fn work_dir(self, dir: impl Into<String>) -> Self {
        self.set("WORK_DIR", dir)
    }

    pub fn generator(self, program: impl Into<String>) -> Self {
        self.set("GENERATOR", program)
    }

    pub fn max_workers(self, n: usize) -> Self {
        self.set("MAX_WORKERS", n.to_string())
    }

    pub fn stop_grace(self, secs: u64) -> Self {
        self.set("STOP_GRACE", secs.to_string())
    }

    pub fn metrics(self, enabled: bool) -> Self {
        self.set("METRICS", enabled.to_string())
    }

    /// Apply environment variables
    pub fn apply(self) {
        for (key, value) in self.vars {
            env::set_var(key, value);
        }
    }

    /// Apply and return guard that restores on drop
    pub fn apply_scoped(self) -> EnvGuard {
        let previous: Vec<_> = self
            .vars
            .iter()
            .map(|(k, _)| (k.clone(), env::var(k).ok()))
            .collect();

        self.apply();

        EnvGuard { previous }
    }
}

impl Default for EnvBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Guard that restores environment variables on drop
pub struct EnvGuard {
    previous: Vec<(String, Option<String>)>,
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, value) in &self.previous {
            match value {
                Some(v) => env::set_var(key, v),
                None => env::remove_var(key),
            }
        }
    }
}

/// Print all PERF_ORCH environment variables
pub fn print_env_help() {
    println!("Environment Variables:");
    println!();
    println!("  {ENV_PREFIX}_CONFIG          Path to configuration file");
    println!("  {ENV_PREFIX}_WORK_DIR        Load generator working directory");
    println!("  {ENV_PREFIX}_RUNS_DIR        Directory for run records");
    println!("  {ENV_PREFIX}_GENERATOR       Load generator executable (default: locust)");
    println!("  {ENV_PREFIX}_MAX_WORKERS     Concurrent background executions");
    println!("  {ENV_PREFIX}_QUEUE_CAPACITY  Queued background executions");
    println!("  {ENV_PREFIX}_STOP_GRACE      Seconds between SIGTERM and SIGKILL");
    println!("  {ENV_PREFIX}_METRICS         Enable metrics export (true/false)");
    println!("  {ENV_PREFIX}_METRICS_URL     InfluxDB base URL");
    println!("  {ENV_PREFIX}_METRICS_DB      InfluxDB database");
    println!("  {ENV_PREFIX}_FORMAT          Output format (table, json, csv)");
    println!("  {ENV_PREFIX}_LOG             Log filter, e.g. perf_orchestrator=debug");
    println!();
    println!("Example:");
    println!("  export {ENV_PREFIX}_WORK_DIR=/srv/loadtests");
    println!("  perf-orchestrator run 7 --run-id nightly");
}
