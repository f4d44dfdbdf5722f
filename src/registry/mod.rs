//! Run registry
//!
//! Tracks, per run id, the status of every test executed under that run and
//! the results attached to it. Every read-modify-write cycle happens under a
//! per-run lock and re-reads the backing store, so status transitions stay
//! atomic when `execute` and `stop` race on the same pair. Stores shared
//! between processes add their own lock on top of the in-process one.

use anyhow::Result;
use std::collections::HashMap;
use std::fs::File;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

use crate::error::ExecutionError;
use crate::models::{AggregatedResult, RunStatus, TestId, TestRun};

/// Backing storage for run records
pub trait RunStore: Send + Sync {
    fn load(&self, run_id: &str) -> Result<Option<TestRun>>;
    fn save(&self, run: &TestRun) -> Result<()>;
    fn list(&self) -> Result<Vec<TestRun>>;

    /// Exclude other writers of `run_id`, including other processes, until
    /// the returned lock is dropped
    fn lock_run(&self, _run_id: &str) -> Result<StoreLock> {
        Ok(StoreLock::default())
    }
}

/// Exclusive hold on one run record in a [`RunStore`]
#[derive(Debug, Default)]
pub struct StoreLock {
    file: Option<File>,
}

impl StoreLock {
    /// Wrap a file that is already locked exclusively
    pub fn file(file: File) -> Self {
        Self { file: Some(file) }
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        if let Some(file) = &self.file {
            if let Err(e) = fs2::FileExt::unlock(file) {
                debug!("Failed to unlock run lock file: {}", e);
            }
        }
    }
}

/// Process-local run storage
#[cfg(test)]
#[derive(Default)]
pub struct MemoryRunStore {
    runs: Mutex<HashMap<String, TestRun>>,
}

#[cfg(test)]
impl MemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
impl RunStore for MemoryRunStore {
    fn load(&self, run_id: &str) -> Result<Option<TestRun>> {
        Ok(lock(&self.runs).get(run_id).cloned())
    }

    fn save(&self, run: &TestRun) -> Result<()> {
        lock(&self.runs).insert(run.id.clone(), run.clone());
        Ok(())
    }

    fn list(&self) -> Result<Vec<TestRun>> {
        let mut runs: Vec<_> = lock(&self.runs).values().cloned().collect();
        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(runs)
    }
}

/// Registry of test runs over a [`RunStore`]
pub struct RunRegistry {
    store: Arc<dyn RunStore>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl RunRegistry {
    pub fn new(store: Arc<dyn RunStore>) -> Self {
        Self {
            store,
            locks: Mutex::new(HashMap::new()),
        }
    }

    #[cfg(test)]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryRunStore::new()))
    }

    /// Run `f` holding the run's in-process lock and the store's lock
    fn locked<T>(
        &self,
        run_id: &str,
        f: impl FnOnce() -> Result<T, ExecutionError>,
    ) -> Result<T, ExecutionError> {
        let run_lock = lock(&self.locks)
            .entry(run_id.to_string())
            .or_default()
            .clone();

        let value = {
            let _guard = lock(&run_lock);
            match self.store.lock_run(run_id) {
                Ok(_store_lock) => f(),
                Err(e) => Err(e.into()),
            }
        };

        // drop the entry once no other caller holds a clone
        let mut locks = lock(&self.locks);
        drop(run_lock);
        if locks
            .get(run_id)
            .is_some_and(|entry| Arc::strong_count(entry) == 1)
        {
            locks.remove(run_id);
        }
        value
    }

    /// Fetch a run, creating it on first use
    pub fn get_or_create(&self, run_id: &str) -> Result<TestRun, ExecutionError> {
        self.locked(run_id, || self.load_or_create(run_id))
    }

    fn load_or_create(&self, run_id: &str) -> Result<TestRun, ExecutionError> {
        if let Some(run) = self.store.load(run_id)? {
            return Ok(run);
        }

        let run = TestRun::new(run_id);
        self.store.save(&run)?;
        info!(run_id = %run_id, "Created test run");
        Ok(run)
    }

    pub fn get(&self, run_id: &str) -> Result<Option<TestRun>, ExecutionError> {
        Ok(self.store.load(run_id)?)
    }

    pub fn status(&self, run_id: &str, test_id: TestId) -> Result<Option<RunStatus>, ExecutionError> {
        Ok(self.get(run_id)?.and_then(|run| run.status(test_id)))
    }

    /// Move a test to `to`, returning its previous status.
    ///
    /// Illegal edges fail with `InvalidTransition` and leave the record
    /// untouched. `message` is recorded when moving to `Error`.
    pub fn transition(
        &self,
        run_id: &str,
        test_id: TestId,
        to: RunStatus,
        message: Option<&str>,
    ) -> Result<Option<RunStatus>, ExecutionError> {
        self.update(run_id, |run| apply(run, run_id, test_id, to, message))
    }

    /// Move a test to `to` only if it is currently `from`.
    ///
    /// Returns `false` without touching the record when the test is in any
    /// other status.
    pub fn transition_from(
        &self,
        run_id: &str,
        test_id: TestId,
        from: RunStatus,
        to: RunStatus,
        message: Option<&str>,
    ) -> Result<bool, ExecutionError> {
        self.modify(run_id, |run| {
            if run.status(test_id) != Some(from) {
                return Ok((false, false));
            }
            apply(run, run_id, test_id, to, message)?;
            Ok((true, true))
        })
    }

    /// Move a test from `started` to `stopping`.
    ///
    /// A test already `stopping` has been claimed by a concurrent stop; the
    /// caller gets `ProcessNotFound` and the record is left as is.
    pub fn begin_stop(&self, run_id: &str, test_id: TestId) -> Result<(), ExecutionError> {
        self.update(run_id, |run| match run.status(test_id) {
            Some(RunStatus::Started) => {
                run.statuses.insert(test_id, RunStatus::Stopping);
                Ok(())
            }
            Some(RunStatus::Stopping) => Err(ExecutionError::ProcessNotFound(format!(
                "test {test_id} in run '{run_id}' is already being stopped"
            ))),
            from => Err(ExecutionError::InvalidTransition {
                run_id: run_id.to_string(),
                test_id,
                from,
                to: RunStatus::Stopping,
            }),
        })
    }

    /// Attach an aggregated result; only valid once the test completed
    pub fn attach_result(
        &self,
        run_id: &str,
        test_id: TestId,
        result: AggregatedResult,
    ) -> Result<(), ExecutionError> {
        self.update(run_id, |run| match run.status(test_id) {
            Some(RunStatus::Completed) => {
                run.results.insert(test_id, result);
                Ok(())
            }
            other => Err(ExecutionError::ResultRejected {
                run_id: run_id.to_string(),
                test_id,
                status: other
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "not started".to_string()),
            }),
        })
    }

    /// Apply `f` to a fresh copy of the run (a new record if the run is
    /// unknown) and persist it only if `f` succeeds
    fn update<T>(
        &self,
        run_id: &str,
        f: impl FnOnce(&mut TestRun) -> Result<T, ExecutionError>,
    ) -> Result<T, ExecutionError> {
        self.modify(run_id, |run| f(run).map(|value| (value, true)))
    }

    /// Like `update`, but `f` also says whether the record changed; an
    /// unchanged record is not written back
    fn modify<T>(
        &self,
        run_id: &str,
        f: impl FnOnce(&mut TestRun) -> Result<(T, bool), ExecutionError>,
    ) -> Result<T, ExecutionError> {
        self.locked(run_id, || {
            let mut run = match self.store.load(run_id)? {
                Some(run) => run,
                None => TestRun::new(run_id),
            };
            let (value, changed) = f(&mut run)?;
            if changed {
                run.touch();
                self.store.save(&run)?;
            }
            Ok(value)
        })
    }

    #[cfg(test)]
    fn lock_count(&self) -> usize {
        lock(&self.locks).len()
    }
}

/// Enforce the allowed edges and record `to`, returning the previous status
fn apply(
    run: &mut TestRun,
    run_id: &str,
    test_id: TestId,
    to: RunStatus,
    message: Option<&str>,
) -> Result<Option<RunStatus>, ExecutionError> {
    let from = run.status(test_id);
    if !RunStatus::allows(from, to) {
        return Err(ExecutionError::InvalidTransition {
            run_id: run_id.to_string(),
            test_id,
            from,
            to,
        });
    }

    run.statuses.insert(test_id, to);
    if to == RunStatus::Error {
        run.errors.insert(
            test_id,
            message.unwrap_or("execution failed").to_string(),
        );
    }
    debug!(run_id = %run_id, test_id, from = ?from, to = %to, "Status transition");
    Ok(from)
}

/// Lock a mutex, recovering the data if a holder panicked
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
