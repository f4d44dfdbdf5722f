//! Execution engine
//!
//! Drives one performance test through its lifecycle: command construction,
//! process launch and tracking, result parsing and aggregation, status
//! bookkeeping in the run registry, metrics export and artifact cleanup.
//! Foreground (`execute`), background (`execute_async`), delayed
//! (`schedule`) and `stop` all share the same state machine.

use futures::FutureExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use super::pool::{Job, WorkerPool};
use super::process::{self, ProcessTable, Termination};
use crate::config::AppConfig;
use crate::definitions::TestDefinitionStore;
use crate::error::ExecutionError;
use crate::loadgen::{LoadCommand, LocustCommandBuilder, ResultParser, ResultRecord};
use crate::models::{AggregatedResult, ExecutionReport, RunStatus, TestId, TestRun};
use crate::registry::RunRegistry;
use crate::results::{MetricsSink, ResultAggregator};
use crate::utils::fs::remove_with_prefix;
use crate::utils::Timer;

/// Collaborators injected into the engine
pub struct EngineDeps {
    pub definitions: Arc<dyn TestDefinitionStore>,
    pub registry: Arc<RunRegistry>,
    pub sink: Arc<dyn MetricsSink>,
}

/// Engine tuning
#[derive(Clone, Debug)]
pub struct EngineSettings {
    /// Generator working directory; artifacts and side files live here
    pub work_dir: PathBuf,
    pub program: String,
    pub program_args: Vec<String>,
    pub result_suffix: String,
    pub max_workers: usize,
    pub queue_capacity: usize,
    /// Wait between SIGTERM and SIGKILL on stop
    pub stop_grace: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

impl EngineSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            work_dir: config.work_dir.clone(),
            program: config.generator.program.clone(),
            program_args: config.generator.args.clone(),
            result_suffix: config.generator.result_suffix.clone(),
            max_workers: config.max_workers,
            queue_capacity: config.queue_capacity,
            stop_grace: config.stop_grace(),
        }
    }
}

/// How a launched generator ended, short of an error
enum Outcome {
    Completed(AggregatedResult),
    /// The pair left `started` while the generator ran (stop or failure
    /// recorded elsewhere)
    Interrupted(RunStatus),
}

struct EngineCore {
    definitions: Arc<dyn TestDefinitionStore>,
    registry: Arc<RunRegistry>,
    sink: Arc<dyn MetricsSink>,
    settings: EngineSettings,
    builder: LocustCommandBuilder,
    aggregator: ResultAggregator,
    processes: ProcessTable,
}

/// Performance test execution engine
///
/// Cheap to clone; clones share the process table and the worker pool.
#[derive(Clone)]
pub struct ExecutionEngine {
    core: Arc<EngineCore>,
    pool: Arc<WorkerPool>,
}

impl ExecutionEngine {
    /// Create the engine and start its worker pool. Must be called inside a
    /// tokio runtime.
    pub fn new(deps: EngineDeps, settings: EngineSettings) -> Self {
        let builder = LocustCommandBuilder::new(settings.program.clone())
            .with_leading_args(settings.program_args.clone());
        let pool = WorkerPool::new(settings.max_workers, settings.queue_capacity);

        let core = EngineCore {
            definitions: deps.definitions,
            registry: deps.registry,
            sink: deps.sink,
            processes: ProcessTable::new(settings.work_dir.clone()),
            builder,
            aggregator: ResultAggregator::new(),
            settings,
        };

        Self {
            core: Arc::new(core),
            pool: Arc::new(pool),
        }
    }

    #[cfg(test)]
    pub fn registry(&self) -> &Arc<RunRegistry> {
        &self.core.registry
    }

    #[cfg(test)]
    pub fn settings(&self) -> &EngineSettings {
        &self.core.settings
    }

    /// Run a test to completion under `run_id`.
    ///
    /// Lookup, configuration and transition errors are returned before
    /// anything is launched. Once the generator is being launched, failures
    /// are recorded as status `error` and reported in the returned report.
    pub async fn execute(
        &self,
        test_id: TestId,
        run_id: &str,
    ) -> Result<ExecutionReport, ExecutionError> {
        let command = self.core.prepare(test_id, run_id)?;
        self.core.registry.get_or_create(run_id)?;
        self.core
            .registry
            .transition(run_id, test_id, RunStatus::Started, None)?;

        Ok(self.core.run(test_id, run_id, command).await)
    }

    /// Validate, mark `pending` and queue the execution on the worker pool.
    ///
    /// Failures of the queued execution are observable through status only.
    pub fn execute_async(&self, test_id: TestId, run_id: &str) -> Result<(), ExecutionError> {
        let command = self.core.prepare(test_id, run_id)?;
        self.core.mark_pending(test_id, run_id)?;

        let job = self.job(test_id, run_id.to_string(), command);
        if let Err(e) = self.pool.try_submit(job) {
            self.core.abandon(test_id, run_id, &e.to_string());
            return Err(e);
        }

        info!(run_id = %run_id, test_id, "Execution queued");
        Ok(())
    }

    /// Like [`execute_async`](Self::execute_async), but the execution is
    /// queued only after `delay`. Not cancellable.
    pub fn schedule(
        &self,
        test_id: TestId,
        run_id: &str,
        delay: Duration,
    ) -> Result<(), ExecutionError> {
        let command = self.core.prepare(test_id, run_id)?;
        self.core.mark_pending(test_id, run_id)?;

        let engine = self.clone();
        let task_run_id = run_id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            debug!(run_id = %task_run_id, test_id, "Scheduled execution due");

            let job = engine.job(test_id, task_run_id.clone(), command);
            if let Err(e) = engine.pool.submit(job).await {
                engine.core.abandon(test_id, &task_run_id, &e.to_string());
            }
        });

        info!(run_id = %run_id, test_id, delay_ms = delay.as_millis() as u64, "Execution scheduled");
        Ok(())
    }

    /// Stop a running test: signal its generator, clean up, mark `stopped`.
    pub async fn stop(&self, test_id: TestId, run_id: &str) -> Result<RunStatus, ExecutionError> {
        let core = &self.core;
        core.registry.begin_stop(run_id, test_id)?;
        info!(run_id = %run_id, test_id, "Stopping execution");

        let pid = match core.processes.claim(run_id, test_id) {
            Ok(pid) => pid,
            Err(e) => {
                core.fail(test_id, run_id, &e.to_string());
                return Err(e);
            }
        };

        match process::terminate(pid, core.settings.stop_grace).await {
            Ok(Termination::Graceful) => debug!(pid, "Load generator exited"),
            Ok(Termination::Killed) => warn!(pid, "Load generator had to be killed"),
            Err(e) => {
                core.fail(test_id, run_id, &e.to_string());
                return Err(e);
            }
        }

        match core.prepare(test_id, run_id) {
            Ok(command) => core.cleanup(&command),
            Err(e) => warn!(run_id = %run_id, test_id, "Skipping artifact cleanup: {}", e),
        }

        core.registry
            .transition(run_id, test_id, RunStatus::Stopped, None)?;
        info!(run_id = %run_id, test_id, pid, "Execution stopped");
        Ok(RunStatus::Stopped)
    }

    /// The run record, if the run exists
    pub fn get_status(&self, run_id: &str) -> Result<Option<TestRun>, ExecutionError> {
        self.core.registry.get(run_id)
    }

    /// Poll until the pair reaches a terminal status. `None` if the run
    /// never saw the test.
    pub async fn wait_for(
        &self,
        run_id: &str,
        test_id: TestId,
        poll: Duration,
    ) -> Result<Option<RunStatus>, ExecutionError> {
        loop {
            match self.core.registry.status(run_id, test_id)? {
                None => return Ok(None),
                Some(status) if status.is_terminal() => return Ok(Some(status)),
                Some(_) => tokio::time::sleep(poll).await,
            }
        }
    }

    /// Stop accepting background work and wait for queued and running jobs
    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
    }

    fn job(&self, test_id: TestId, run_id: String, command: LoadCommand) -> Job {
        let core = self.core.clone();
        async move {
            match core.registry.transition_from(
                &run_id,
                test_id,
                RunStatus::Pending,
                RunStatus::Started,
                None,
            ) {
                Ok(true) => {}
                // another execution took the pair over while this job waited
                Ok(false) => {
                    warn!(run_id = %run_id, test_id, "Queued execution skipped, test is no longer pending");
                    return;
                }
                Err(e) => {
                    warn!(run_id = %run_id, test_id, "Queued execution not started: {}", e);
                    core.abandon(test_id, &run_id, &e.to_string());
                    return;
                }
            }

            let report = core.run(test_id, &run_id, command).await;
            info!("{}", report);
        }
        .boxed()
    }
}

impl EngineCore {
    /// Look the test up and build its command, scoped to the pair
    fn prepare(&self, test_id: TestId, run_id: &str) -> Result<LoadCommand, ExecutionError> {
        let test = self
            .definitions
            .get(test_id)?
            .ok_or(ExecutionError::TestNotFound(test_id))?;
        let command = self.builder.build(&test.config)?;
        Ok(command.scoped(run_id, test_id))
    }

    fn mark_pending(&self, test_id: TestId, run_id: &str) -> Result<(), ExecutionError> {
        self.registry.get_or_create(run_id)?;
        self.registry
            .transition(run_id, test_id, RunStatus::Pending, None)?;
        Ok(())
    }

    /// Record `error` for a pair this engine queued, but only while it is
    /// still `pending`
    fn abandon(&self, test_id: TestId, run_id: &str, message: &str) {
        match self.registry.transition_from(
            run_id,
            test_id,
            RunStatus::Pending,
            RunStatus::Error,
            Some(message),
        ) {
            Ok(true) => {}
            Ok(false) => debug!(run_id = %run_id, test_id, "Not recording '{}', test is no longer pending", message),
            Err(e) => warn!(run_id = %run_id, test_id, "Could not record failure '{}': {}", message, e),
        }
    }

    /// Record `error`; logs instead of failing if that edge is not allowed
    fn fail(&self, test_id: TestId, run_id: &str, message: &str) {
        if let Err(e) = self
            .registry
            .transition(run_id, test_id, RunStatus::Error, Some(message))
        {
            warn!(run_id = %run_id, test_id, "Could not record failure '{}': {}", message, e);
        }
    }

    /// Launch and collect, then always clean up. Never fails: errors become
    /// status `error` and the report's message.
    async fn run(&self, test_id: TestId, run_id: &str, command: LoadCommand) -> ExecutionReport {
        let timer = Timer::start(format!("test {test_id} in run {run_id}"));
        let outcome = self.launch_and_collect(test_id, run_id, &command).await;
        self.cleanup(&command);

        let (status, result, message) = match outcome {
            Ok(Outcome::Completed(result)) => {
                info!(run_id = %run_id, test_id, "Execution completed: {}", result);
                (RunStatus::Completed, Some(result), None)
            }
            Ok(Outcome::Interrupted(status)) => {
                info!(run_id = %run_id, test_id, status = %status, "Execution interrupted");
                (status, None, None)
            }
            Err(e) => {
                error!(run_id = %run_id, test_id, "Execution failed: {}", e);
                let message = e.to_string();
                self.fail(test_id, run_id, &message);
                let status = self
                    .registry
                    .status(run_id, test_id)
                    .ok()
                    .flatten()
                    .unwrap_or(RunStatus::Error);
                (status, None, Some(message))
            }
        };

        ExecutionReport {
            run_id: run_id.to_string(),
            test_id,
            status,
            result,
            message,
            duration_ms: timer.stop().as_millis() as u64,
        }
    }

    async fn launch_and_collect(
        &self,
        test_id: TestId,
        run_id: &str,
        command: &LoadCommand,
    ) -> Result<Outcome, ExecutionError> {
        let work_dir = &self.settings.work_dir;
        std::fs::create_dir_all(work_dir).map_err(|e| {
            ExecutionError::Launch(format!(
                "cannot create work directory {}: {e}",
                work_dir.display()
            ))
        })?;

        let script = self.resolve(&command.locustfile);
        if !script.is_file() {
            return Err(ExecutionError::Launch(format!(
                "locustfile not found: {}",
                script.display()
            )));
        }

        info!(run_id = %run_id, test_id, "Launching: {}", command);
        let mut child = Command::new(&command.program)
            .args(&command.args)
            .current_dir(work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                ExecutionError::Launch(format!("cannot start {}: {e}", command.program))
            })?;

        let Some(pid) = child.id() else {
            return Err(ExecutionError::Launch(
                "load generator exited before it could be tracked".to_string(),
            ));
        };

        if let Err(e) = self.processes.register(run_id, test_id, pid) {
            if let Err(kill_err) = child.kill().await {
                warn!(pid, "Failed to kill untracked generator: {}", kill_err);
            }
            return Err(e);
        }
        info!(run_id = %run_id, test_id, pid, "Load generator running");

        if let Some(stderr) = child.stderr.take() {
            let run_id = run_id.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(run_id = %run_id, test_id, "generator: {}", line);
                }
            });
        }

        // a stop that raced the launch found no handle and moved the pair on
        if !matches!(
            self.registry.status(run_id, test_id),
            Ok(Some(RunStatus::Started))
        ) {
            if let Ok(pid) = self.processes.claim(run_id, test_id) {
                warn!(pid, "Status changed during launch, terminating generator");
                if let Err(e) = process::terminate(pid, self.settings.stop_grace).await {
                    debug!(pid, "Terminate after launch race: {}", e);
                }
            }
        }

        let exit = child.wait().await;
        self.processes.release(run_id, test_id);
        let exit = exit.map_err(|e| {
            ExecutionError::Launch(format!("failed waiting for load generator: {e}"))
        })?;
        debug!(run_id = %run_id, test_id, pid, exit_code = ?exit.code(), "Load generator exited");

        match self.registry.status(run_id, test_id)? {
            Some(RunStatus::Started) => {}
            other => return Ok(Outcome::Interrupted(other.unwrap_or(RunStatus::Error))),
        }

        if !exit.success() {
            warn!(run_id = %run_id, test_id, exit_code = ?exit.code(), "Load generator reported failure");
        }

        let records = self.read_results(command)?;
        let result = self.aggregator.aggregate(records).with_exit_code(exit.code());

        match self
            .registry
            .transition(run_id, test_id, RunStatus::Completed, None)
        {
            Ok(_) => {}
            Err(ExecutionError::InvalidTransition { from, .. }) => {
                return Ok(Outcome::Interrupted(from.unwrap_or(RunStatus::Error)));
            }
            Err(e) => return Err(e),
        }
        self.registry.attach_result(run_id, test_id, result.clone())?;

        if let Err(e) = self.sink.push(run_id, test_id, &result).await {
            warn!(run_id = %run_id, test_id, "Metrics push failed: {:#}", e);
        }

        Ok(Outcome::Completed(result))
    }

    /// Parse the artifact; a missing artifact is an empty result set
    fn read_results(&self, command: &LoadCommand) -> Result<Vec<ResultRecord>, ExecutionError> {
        let path = self.artifact_path(command);
        let rows = match ResultParser::open(&path) {
            Ok(rows) => rows,
            Err(e) => {
                warn!("{}; continuing with no result rows", e);
                return Ok(Vec::new());
            }
        };
        rows.collect()
    }

    fn artifact_path(&self, command: &LoadCommand) -> PathBuf {
        self.settings.work_dir.join(format!(
            "{}{}",
            command.output_prefix, self.settings.result_suffix
        ))
    }

    fn resolve(&self, locustfile: &str) -> PathBuf {
        let path = Path::new(locustfile);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.settings.work_dir.join(path)
        }
    }

    /// Remove generator artifacts for this command. Never fails.
    fn cleanup(&self, command: &LoadCommand) {
        let full = self.settings.work_dir.join(&command.output_prefix);
        let (Some(dir), Some(prefix)) = (full.parent(), full.file_name().and_then(|n| n.to_str()))
        else {
            return;
        };

        match remove_with_prefix(dir, prefix) {
            Ok(removed) if !removed.is_empty() => {
                debug!("Removed {} artifact(s) for {}", removed.len(), prefix)
            }
            Ok(_) => {}
            Err(e) => warn!("Artifact cleanup in {} failed: {}", dir.display(), e),
        }
    }
}
