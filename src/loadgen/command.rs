//! Load generator command construction
//!
//! Turns a test's load configuration into a Locust invocation.

use std::fmt;

use crate::error::ExecutionError;
use crate::models::{LoadTestConfig, TestId};
use crate::utils::fs::file_safe;

pub const DEFAULT_USERS: u32 = 10;
pub const DEFAULT_SPAWN_RATE: f64 = 1.0;
pub const DEFAULT_RUN_TIME: &str = "1m";
pub const DEFAULT_RESULT_PREFIX: &str = "locust_result";

/// A fully resolved load generator invocation
#[derive(Clone, Debug, PartialEq)]
pub struct LoadCommand {
    pub program: String,
    pub args: Vec<String>,
    /// Script reference as given in the configuration
    pub locustfile: String,
    /// Prefix of every CSV artifact the generator writes
    pub output_prefix: String,
}

impl LoadCommand {
    /// Command line for logs
    pub fn display(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            if arg.contains(char::is_whitespace) {
                line.push_str(&format!("'{arg}'"));
            } else {
                line.push_str(arg);
            }
        }
        line
    }

    /// Narrow the output prefix to one `(run, test)` pair.
    ///
    /// The result is `<prefix>.<run>.<test>`; the encoded run id never
    /// contains `.`, so two pairs never share a prefix.
    pub fn scoped(mut self, run_id: &str, test_id: TestId) -> Self {
        let prefix = format!("{}.{}.{}", self.output_prefix, file_safe(run_id), test_id);
        for arg in &mut self.args {
            if arg.starts_with("--csv=") {
                *arg = format!("--csv={prefix}");
            }
        }
        self.output_prefix = prefix;
        self
    }
}

impl fmt::Display for LoadCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display())
    }
}

/// Builds headless Locust invocations
#[derive(Clone, Debug)]
pub struct LocustCommandBuilder {
    program: String,
    leading_args: Vec<String>,
}

impl LocustCommandBuilder {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            leading_args: Vec::new(),
        }
    }

    /// Arguments placed before the Locust options, e.g. `-m locust` when the
    /// program is a Python interpreter
    pub fn with_leading_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.leading_args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Build the invocation, filling defaults for optional settings
    pub fn build(&self, config: &LoadTestConfig) -> Result<LoadCommand, ExecutionError> {
        let host = required(config.host.as_deref(), "host")?;
        let locustfile = required(config.locustfile.as_deref(), "locustfile")?;

        let users = config.users.unwrap_or(DEFAULT_USERS);
        if users == 0 {
            return Err(ExecutionError::Configuration(
                "users must be at least 1".to_string(),
            ));
        }

        let spawn_rate = config.spawn_rate.unwrap_or(DEFAULT_SPAWN_RATE);
        if !spawn_rate.is_finite() || spawn_rate <= 0.0 {
            return Err(ExecutionError::Configuration(format!(
                "spawn_rate must be positive, got {spawn_rate}"
            )));
        }

        let run_time = config
            .run_time
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_RUN_TIME);

        let output_prefix = config
            .result_file_prefix
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_RESULT_PREFIX);

        let mut args = self.leading_args.clone();
        args.extend([
            "-f".to_string(),
            locustfile.to_string(),
            "--headless".to_string(),
            "--users".to_string(),
            users.to_string(),
            "--spawn-rate".to_string(),
            spawn_rate.to_string(),
            "--run-time".to_string(),
            run_time.to_string(),
            "--host".to_string(),
            host.to_string(),
            format!("--csv={output_prefix}"),
        ]);

        Ok(LoadCommand {
            program: self.program.clone(),
            args,
            locustfile: locustfile.to_string(),
            output_prefix: output_prefix.to_string(),
        })
    }
}

impl Default for LocustCommandBuilder {
    fn default() -> Self {
        Self::new("locust")
    }
}

fn required<'a>(value: Option<&'a str>, field: &str) -> Result<&'a str, ExecutionError> {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(ExecutionError::Configuration(format!(
            "missing required field '{field}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arg_after<'a>(cmd: &'a LoadCommand, flag: &str) -> &'a str {
        let idx = cmd.args.iter().position(|a| a == flag).unwrap();
        &cmd.args[idx + 1]
    }

    #[test]
    fn test_defaults_filled() {
        let config = LoadTestConfig::new("http://localhost:8080", "load.py");
        let cmd = LocustCommandBuilder::default().build(&config).unwrap();

        assert_eq!(cmd.program, "locust");
        assert_eq!(arg_after(&cmd, "--users"), "10");
        assert_eq!(arg_after(&cmd, "--spawn-rate"), "1");
        assert_eq!(arg_after(&cmd, "--run-time"), "1m");
        assert_eq!(arg_after(&cmd, "--host"), "http://localhost:8080");
        assert_eq!(arg_after(&cmd, "-f"), "load.py");
        assert!(cmd.args.contains(&"--headless".to_string()));
        assert!(cmd.args.contains(&"--csv=locust_result".to_string()));
        assert_eq!(cmd.output_prefix, "locust_result");
    }

    #[test]
    fn test_explicit_values_win() {
        let config = LoadTestConfig::new("http://api", "api.py")
            .users(200)
            .spawn_rate(12.5)
            .run_time("5m")
            .result_file_prefix("nightly");
        let cmd = LocustCommandBuilder::new("/opt/locust/bin/locust")
            .build(&config)
            .unwrap();

        assert_eq!(cmd.program, "/opt/locust/bin/locust");
        assert_eq!(arg_after(&cmd, "--users"), "200");
        assert_eq!(arg_after(&cmd, "--spawn-rate"), "12.5");
        assert_eq!(arg_after(&cmd, "--run-time"), "5m");
        assert_eq!(cmd.args.last().unwrap(), "--csv=nightly");
    }

    #[test]
    fn test_missing_host_or_script_is_configuration_error() {
        let builder = LocustCommandBuilder::default();

        let no_host = LoadTestConfig {
            locustfile: Some("load.py".into()),
            ..Default::default()
        };
        assert!(matches!(
            builder.build(&no_host),
            Err(ExecutionError::Configuration(msg)) if msg.contains("host")
        ));

        let no_script = LoadTestConfig {
            host: Some("http://localhost".into()),
            ..Default::default()
        };
        assert!(matches!(
            builder.build(&no_script),
            Err(ExecutionError::Configuration(msg)) if msg.contains("locustfile")
        ));

        let blank_host = LoadTestConfig::new("  ", "load.py");
        assert!(builder.build(&blank_host).is_err());
    }

    #[test]
    fn test_invalid_numbers_rejected() {
        let builder = LocustCommandBuilder::default();
        assert!(builder
            .build(&LoadTestConfig::new("h", "f.py").users(0))
            .is_err());
        assert!(builder
            .build(&LoadTestConfig::new("h", "f.py").spawn_rate(0.0))
            .is_err());
    }

    #[test]
    fn test_leading_args_come_first() {
        let config = LoadTestConfig::new("http://h", "load.py");
        let cmd = LocustCommandBuilder::new("python3")
            .with_leading_args(["-m", "locust"])
            .build(&config)
            .unwrap();

        assert_eq!(&cmd.args[..3], ["-m", "locust", "-f"]);
        assert_eq!(arg_after(&cmd, "-f"), "load.py");
    }

    #[test]
    fn test_scoped_prefix() {
        let config = LoadTestConfig::new("http://h", "load.py");
        let cmd = LocustCommandBuilder::default()
            .build(&config)
            .unwrap()
            .scoped("run A", 7);

        assert_eq!(cmd.output_prefix, "locust_result.run%20A.7");
        assert_eq!(cmd.args.last().unwrap(), "--csv=locust_result.run%20A.7");
    }

    #[test]
    fn test_display_quotes_whitespace() {
        let config = LoadTestConfig::new("http://h", "my tests/load.py");
        let cmd = LocustCommandBuilder::default().build(&config).unwrap();
        assert!(cmd.display().starts_with("locust -f 'my tests/load.py' --headless"));
    }
}
