//! CLI argument parsing
//!
//! Defines command-line interface using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

/// Performance test orchestrator
#[derive(Parser, Debug)]
#[command(name = "perf-orchestrator")]
#[command(version)]
#[command(about = "Launch, track and stop Locust performance tests")]
#[command(long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Configuration file (defaults to PERF_ORCH_CONFIG or a standard location)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Performance test definitions file (YAML or JSON); overrides the
    /// config file's performance_tests section
    #[arg(short, long, global = true)]
    pub definitions: Option<PathBuf>,

    /// Output format (table, json, json-pretty, csv, summary)
    #[arg(short, long, global = true)]
    pub format: Option<String>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a performance test in the foreground and print its report
    Run(RunArgs),

    /// Queue a performance test on the worker pool and wait for it
    Start(RunArgs),

    /// Queue a performance test after a delay and wait for it
    Schedule(ScheduleArgs),

    /// Stop a running performance test (works from another process)
    Stop(TargetArgs),

    /// Show the status of a run
    Status(StatusArgs),

    /// List recorded runs
    Runs(RunsArgs),

    /// Delete a run record
    Delete(DeleteArgs),

    /// List performance test definitions
    Tests,

    /// Manage configuration
    Config(ConfigArgs),
}

/// Arguments for run and start
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Performance test id
    pub test_id: i64,

    /// Run id to execute under (generated when omitted)
    #[arg(short, long)]
    pub run_id: Option<String>,
}

/// Arguments for schedule
#[derive(Parser, Debug)]
pub struct ScheduleArgs {
    /// Performance test id
    pub test_id: i64,

    /// Delay before the test is queued, e.g. 90, 30s, 5m, 1h
    #[arg(long, value_parser = parse_delay)]
    pub delay: Duration,

    /// Run id to execute under (generated when omitted)
    #[arg(short, long)]
    pub run_id: Option<String>,
}

/// Arguments identifying one test in one run
#[derive(Parser, Debug)]
pub struct TargetArgs {
    /// Performance test id
    pub test_id: i64,

    /// Run id
    #[arg(short, long)]
    pub run_id: String,
}

/// Arguments for status
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// Run id
    pub run_id: String,

    /// Export the run to a file (.json or .csv)
    #[arg(short, long)]
    pub export: Option<PathBuf>,
}

/// Arguments for runs
#[derive(Parser, Debug)]
pub struct RunsArgs {
    /// Show at most this many runs, newest first
    #[arg(short, long, default_value = "20")]
    pub limit: usize,
}

/// Arguments for delete
#[derive(Parser, Debug)]
pub struct DeleteArgs {
    /// Run id
    pub run_id: String,
}

/// Configuration management
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Write an example configuration file
    Init {
        /// Output path
        #[arg(short, long, default_value = "perf-orchestrator.yaml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Show the effective configuration
    Show,

    /// Validate a configuration file
    Validate {
        /// File to validate (defaults to the discovered config file)
        file: Option<PathBuf>,
    },

    /// Show environment variable overrides
    Env,
}

/// Parse a delay: plain seconds or a number with an `s`, `m` or `h` suffix
pub fn parse_delay(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let (number, unit) = match s.char_indices().find(|(_, c)| !c.is_ascii_digit()) {
        Some((idx, _)) => s.split_at(idx),
        None => (s, "s"),
    };

    let value: u64 = number
        .parse()
        .map_err(|_| format!("invalid delay '{s}'"))?;
    let secs = match unit {
        "s" => value,
        "m" => value * 60,
        "h" => value * 3600,
        other => return Err(format!("unknown delay unit '{other}' (use s, m or h)")),
    };
    Ok(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_delay() {
        assert_eq!(parse_delay("90").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_delay("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_delay("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_delay("1h").unwrap(), Duration::from_secs(3600));
        assert!(parse_delay("").is_err());
        assert!(parse_delay("5d").is_err());
        assert!(parse_delay("m").is_err());
    }

    #[test]
    fn test_parse_args() {
        let args = Args::parse_from([
            "perf-orchestrator",
            "-vv",
            "schedule",
            "7",
            "--delay",
            "2m",
            "--run-id",
            "nightly",
        ]);
        assert_eq!(args.verbose, 2);
        match args.command {
            Command::Schedule(s) => {
                assert_eq!(s.test_id, 7);
                assert_eq!(s.delay, Duration::from_secs(120));
                assert_eq!(s.run_id.as_deref(), Some("nightly"));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_stop_requires_run_id() {
        assert!(Args::try_parse_from(["perf-orchestrator", "stop", "9"]).is_err());
        let args =
            Args::try_parse_from(["perf-orchestrator", "stop", "9", "--run-id", "run-B"]).unwrap();
        assert!(matches!(args.command, Command::Stop(TargetArgs { test_id: 9, .. })));
    }
}
