//! Performance Orchestrator - launch, track and stop Locust load tests
//!
//! Runs registered performance tests through an external load generator,
//! records each test's lifecycle under a run id, aggregates the generator's
//! CSV output and can stop a running generator from another process.
//!
//! ## Usage
//!
//! ```bash
//! # Run a test in the foreground
//! perf-orchestrator run 7 --run-id nightly
//!
//! # Queue a test on the worker pool, or after a delay
//! perf-orchestrator start 7
//! perf-orchestrator schedule 7 --delay 5m
//!
//! # Stop it from another terminal
//! perf-orchestrator stop 7 --run-id nightly
//!
//! # Inspect runs
//! perf-orchestrator status nightly --export nightly.csv
//! perf-orchestrator runs
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

mod cli;
mod config;
mod definitions;
mod error;
mod executor;
mod loadgen;
mod models;
mod output;
mod registry;
mod results;
mod utils;

use cli::Args;
use config::{ConfigFile, EnvConfig};
use definitions::{FileDefinitions, InMemoryDefinitions, TestDefinitionStore};
use error::ExecutionError;
use executor::{EngineDeps, EngineSettings, ExecutionEngine};
use models::{PerformanceTest, RunStatus, TestId};
use output::{OutputFormat, ResultFormatter};
use registry::{RunRegistry, RunStore};
use results::{generate_run_id, ExportFormat, InfluxSink, JsonRunStore, MetricsSink, NoopSink};
use utils::{init_logger, LogLevel};

const WAIT_POLL: Duration = Duration::from_millis(500);

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logger(LogLevel::from_flags(args.verbose, args.quiet));

    let env = EnvConfig::load();
    let format = args.format.clone().or_else(|| env.format.clone());
    let mut formatter = match format.as_deref() {
        Some(name) => ResultFormatter::new(
            OutputFormat::from_str(name)
                .with_context(|| format!("Unknown output format: {name}"))?,
        ),
        None => ResultFormatter::default(),
    };
    if !std::io::stdout().is_terminal() {
        formatter = formatter.no_color();
    }

    let command = match args.command {
        cli::Command::Config(config_args) => {
            return manage_config(config_args, args.config.as_deref(), &env);
        }
        command => command,
    };

    let (config, source) = ConfigFile::resolve(args.config.as_deref(), &env)?;
    match &source {
        Some(path) => debug!("Using configuration file {}", path.display()),
        None => debug!("No configuration file found, using defaults"),
    }

    let app = App {
        config,
        definitions_path: args.definitions,
        formatter,
    };

    match command {
        cli::Command::Run(run_args) => run_test(&app, run_args).await,
        cli::Command::Start(run_args) => start_test(&app, run_args).await,
        cli::Command::Schedule(schedule_args) => schedule_test(&app, schedule_args).await,
        cli::Command::Stop(target) => stop_test(&app, target).await,
        cli::Command::Status(status_args) => show_status(&app, status_args),
        cli::Command::Runs(runs_args) => list_runs(&app, runs_args),
        cli::Command::Delete(delete_args) => delete_run(&app, delete_args),
        cli::Command::Tests => list_tests(&app),
        cli::Command::Config(config_args) => {
            manage_config(config_args, args.config.as_deref(), &env)
        }
    }
}

/// Everything a command handler needs after configuration is resolved
struct App {
    config: ConfigFile,
    definitions_path: Option<PathBuf>,
    formatter: ResultFormatter,
}

impl App {
    fn definitions(&self) -> Result<InMemoryDefinitions> {
        match &self.definitions_path {
            Some(path) => FileDefinitions::load(path),
            None => Ok(self.config.performance_tests.iter().cloned().collect()),
        }
    }

    fn run_store(&self) -> JsonRunStore {
        match &self.config.app.runs_dir {
            Some(dir) => JsonRunStore::new(dir),
            None => JsonRunStore::default_dir(),
        }
    }

    fn engine(&self) -> Result<ExecutionEngine> {
        let definitions: Arc<dyn TestDefinitionStore> = Arc::new(self.definitions()?);
        let registry = Arc::new(RunRegistry::new(Arc::new(self.run_store())));

        let metrics = &self.config.app.metrics;
        let sink: Arc<dyn MetricsSink> = if metrics.enabled {
            info!("Pushing results to {}", metrics.url);
            Arc::new(InfluxSink::new(metrics)?)
        } else {
            Arc::new(NoopSink)
        };

        Ok(ExecutionEngine::new(
            EngineDeps {
                definitions,
                registry,
                sink,
            },
            EngineSettings::from_config(&self.config.app),
        ))
    }
}

async fn run_test(app: &App, args: cli::RunArgs) -> Result<()> {
    let engine = app.engine()?;
    let run_id = args.run_id.unwrap_or_else(generate_run_id);
    let test_id = args.test_id;
    info!("Running test {} in run {}", test_id, run_id);

    let mut task = tokio::spawn({
        let engine = engine.clone();
        let run_id = run_id.clone();
        async move { engine.execute(test_id, &run_id).await }
    });

    let outcome = tokio::select! {
        joined = &mut task => joined?,
        _ = tokio::signal::ctrl_c() => {
            interrupt(&engine, test_id, &run_id).await;
            tokio::select! {
                joined = task => joined?,
                _ = tokio::signal::ctrl_c() => anyhow::bail!("Interrupted again, not waiting for test {test_id}"),
            }
        }
    };
    let report = outcome.map_err(with_hint)?;

    println!("{}", app.formatter.format_report(&report));
    finish(report.status, test_id, &run_id)
}

async fn start_test(app: &App, args: cli::RunArgs) -> Result<()> {
    let engine = app.engine()?;
    let run_id = args.run_id.unwrap_or_else(generate_run_id);

    engine
        .execute_async(args.test_id, &run_id)
        .map_err(with_hint)?;
    println!("Queued test {} in run {}", args.test_id, run_id);

    wait_and_report(app, &engine, args.test_id, &run_id).await
}

async fn schedule_test(app: &App, args: cli::ScheduleArgs) -> Result<()> {
    let engine = app.engine()?;
    let run_id = args.run_id.unwrap_or_else(generate_run_id);

    engine
        .schedule(args.test_id, &run_id, args.delay)
        .map_err(with_hint)?;
    println!(
        "Scheduled test {} in run {} in {}s",
        args.test_id,
        run_id,
        args.delay.as_secs()
    );

    wait_and_report(app, &engine, args.test_id, &run_id).await
}

/// Keep the process alive until the background execution finishes; the
/// generator is a child of this process. A first Ctrl-C stops the test, a
/// second one gives up waiting.
async fn wait_and_report(
    app: &App,
    engine: &ExecutionEngine,
    test_id: TestId,
    run_id: &str,
) -> Result<()> {
    let status = tokio::select! {
        status = engine.wait_for(run_id, test_id, WAIT_POLL) => status?,
        _ = tokio::signal::ctrl_c() => {
            interrupt(engine, test_id, run_id).await;
            tokio::select! {
                status = engine.wait_for(run_id, test_id, WAIT_POLL) => status?,
                _ = tokio::signal::ctrl_c() => anyhow::bail!("Interrupted again, not waiting for test {test_id}"),
            }
        }
    };
    engine.shutdown().await;

    if let Some(run) = engine.get_status(run_id)? {
        println!("{}", app.formatter.format_run(&run));
    }

    match status {
        Some(status) => finish(status, test_id, run_id),
        None => anyhow::bail!("Run {run_id} has no record of test {test_id}"),
    }
}

async fn interrupt(engine: &ExecutionEngine, test_id: TestId, run_id: &str) {
    warn!("Interrupted, stopping test {} in run {}", test_id, run_id);
    if let Err(e) = engine.stop(test_id, run_id).await {
        warn!("Failed to stop test {}: {}", test_id, e);
    }
}

fn with_hint(e: ExecutionError) -> anyhow::Error {
    if e.is_user_fixable() {
        eprintln!("hint: list the known performance tests with `perf-orchestrator tests`");
    }
    e.into()
}

fn finish(status: RunStatus, test_id: TestId, run_id: &str) -> Result<()> {
    match status {
        RunStatus::Completed => Ok(()),
        other => anyhow::bail!("Test {test_id} in run {run_id} ended with status {other}"),
    }
}

async fn stop_test(app: &App, target: cli::TargetArgs) -> Result<()> {
    let engine = app.engine()?;
    let status = engine.stop(target.test_id, &target.run_id).await?;
    println!(
        "{} Test {} in run {} {}",
        status.symbol(),
        target.test_id,
        target.run_id,
        status
    );
    Ok(())
}

fn show_status(app: &App, args: cli::StatusArgs) -> Result<()> {
    let store = app.run_store();
    let run = store
        .load(&args.run_id)?
        .with_context(|| format!("Run {} not found in {}", args.run_id, store.base_dir().display()))?;

    println!("{}", app.formatter.format_run(&run));

    if let Some(path) = args.export {
        let format = ExportFormat::from_extension(&path).unwrap_or(ExportFormat::Json);
        store.export(&run, &path, format)?;
        println!("✓ Exported run {} to {}", run.id, path.display());
    }
    Ok(())
}

fn list_runs(app: &App, args: cli::RunsArgs) -> Result<()> {
    let store = app.run_store();
    let mut runs = store.list_info()?;

    if runs.is_empty() {
        println!("\nNo recorded runs in {}.", store.base_dir().display());
        println!("   Start one with: perf-orchestrator run <TEST_ID>");
        return Ok(());
    }

    runs.truncate(args.limit);
    println!("{}", app.formatter.format_runs(&runs));
    Ok(())
}

fn delete_run(app: &App, args: cli::DeleteArgs) -> Result<()> {
    let store = app.run_store();
    if store.load(&args.run_id)?.is_none() {
        anyhow::bail!("Run {} not found in {}", args.run_id, store.base_dir().display());
    }

    store.delete(&args.run_id)?;
    println!("✓ Deleted run {}", args.run_id);
    Ok(())
}

fn list_tests(app: &App) -> Result<()> {
    let definitions = app.definitions()?;
    let tests: Vec<PerformanceTest> = definitions.list()?;

    if tests.is_empty() {
        println!("\nNo performance tests defined.");
        println!("   Create a config with: perf-orchestrator config init");
        return Ok(());
    }

    println!("{}", app.formatter.format_tests(&tests));
    Ok(())
}

fn manage_config(args: cli::ConfigArgs, explicit: Option<&Path>, env: &EnvConfig) -> Result<()> {
    match args.action {
        cli::ConfigAction::Init { output, force } => {
            if output.exists() && !force {
                anyhow::bail!(
                    "Configuration file already exists: {}. Use --force to overwrite.",
                    output.display()
                );
            }

            ConfigFile::example().save(&output)?;
            println!("✓ Configuration file created: {}", output.display());
            println!("\nEdit the file to describe your performance tests.");
        }

        cli::ConfigAction::Show => {
            let (config, source) = ConfigFile::resolve(explicit, env)?;
            match source {
                Some(path) => println!("# {}", path.display()),
                None => println!("# defaults (no configuration file found)"),
            }
            println!("{}", serde_yaml::to_string(&config)?);
        }

        cli::ConfigAction::Validate { file } => {
            let path = file
                .or_else(|| explicit.map(Path::to_path_buf))
                .or_else(ConfigFile::find)
                .unwrap_or_else(|| PathBuf::from("./perf-orchestrator.yaml"));

            match ConfigFile::load(&path) {
                Ok(config) => {
                    println!("✓ Configuration file is valid: {}", path.display());
                    println!("  {} performance test(s)", config.performance_tests.len());
                }
                Err(e) => {
                    println!("✗ Configuration file is invalid: {}", path.display());
                    println!("  Error: {e:#}");
                    return Err(e);
                }
            }
        }

        cli::ConfigAction::Env => {
            if env.has_any() {
                env.print_summary();
            }
            config::env::print_env_help();
        }
    }

    Ok(())
}
