//! Test run models
//!
//! A test run correlates the executions of one or more performance tests
//! under a single run id and records each test's status and result.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::TestId;

/// Lifecycle status of one test within a run
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Started,
    Completed,
    Error,
    Stopping,
    Stopped,
}

impl RunStatus {
    /// Whether `from -> to` is an allowed edge. `None` is a test the run has
    /// not seen yet.
    pub fn allows(from: Option<RunStatus>, to: RunStatus) -> bool {
        use RunStatus::*;

        matches!(
            (from, to),
            (None, Pending)
                | (None, Started)
                | (Some(Pending), Started)
                | (Some(Pending), Error)
                | (Some(Started), Completed)
                | (Some(Started), Error)
                | (Some(Started), Stopping)
                | (Some(Stopping), Stopped)
                | (Some(Stopping), Error)
        )
    }

    /// No transition leaves a terminal status
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Error | RunStatus::Stopped
        )
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            RunStatus::Pending => "…",
            RunStatus::Started => "▶",
            RunStatus::Completed => "✓",
            RunStatus::Error => "!",
            RunStatus::Stopping => "■",
            RunStatus::Stopped => "■",
        }
    }

    #[cfg(test)]
    pub fn all() -> Vec<RunStatus> {
        vec![
            RunStatus::Pending,
            RunStatus::Started,
            RunStatus::Completed,
            RunStatus::Error,
            RunStatus::Stopping,
            RunStatus::Stopped,
        ]
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Pending => "pending",
            RunStatus::Started => "started",
            RunStatus::Completed => "completed",
            RunStatus::Error => "error",
            RunStatus::Stopping => "stopping",
            RunStatus::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Response time statistics in milliseconds
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TimingStats {
    pub count: u64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub mean_ms: f64,
}

/// Summary of a load generator's result rows
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregatedResult {
    pub total: u64,
    pub success_count: u64,
    pub failure_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timing: Option<TimingStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

impl AggregatedResult {
    pub fn with_exit_code(mut self, code: Option<i32>) -> Self {
        self.exit_code = code;
        self
    }

    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.success_count as f64 / self.total as f64) * 100.0
        }
    }
}

impl fmt::Display for AggregatedResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "total={} success={} failure={}",
            self.total, self.success_count, self.failure_count
        )?;
        if let Some(timing) = &self.timing {
            write!(
                f,
                " min={:.1}ms mean={:.1}ms max={:.1}ms",
                timing.min_ms, timing.mean_ms, timing.max_ms
            )?;
        }
        Ok(())
    }
}

/// Run record: per-test statuses, results and error messages
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TestRun {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub statuses: BTreeMap<TestId, RunStatus>,
    #[serde(default)]
    pub results: BTreeMap<TestId, AggregatedResult>,
    #[serde(default)]
    pub errors: BTreeMap<TestId, String>,
}

impl TestRun {
    pub fn new(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            created_at: now,
            updated_at: now,
            statuses: BTreeMap::new(),
            results: BTreeMap::new(),
            errors: BTreeMap::new(),
        }
    }

    pub fn status(&self, test_id: TestId) -> Option<RunStatus> {
        self.statuses.get(&test_id).copied()
    }

    pub fn result(&self, test_id: TestId) -> Option<&AggregatedResult> {
        self.results.get(&test_id)
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn count(&self, status: RunStatus) -> usize {
        self.statuses.values().filter(|s| **s == status).count()
    }
}

/// Outcome of a single `execute` call
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub run_id: String,
    pub test_id: TestId,
    pub status: RunStatus,
    pub result: Option<AggregatedResult>,
    pub message: Option<String>,
    pub duration_ms: u64,
}

impl fmt::Display for ExecutionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} Test {} [{}] {} ({}ms)",
            self.status.symbol(),
            self.test_id,
            self.run_id,
            self.status,
            self.duration_ms
        )?;
        if let Some(result) = &self.result {
            write!(f, " - {result}")?;
        }
        if let Some(msg) = &self.message {
            write!(f, " - {msg}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allowed_edges() {
        use RunStatus::*;

        assert!(RunStatus::allows(None, Started));
        assert!(RunStatus::allows(None, Pending));
        assert!(RunStatus::allows(Some(Pending), Started));
        assert!(RunStatus::allows(Some(Started), Completed));
        assert!(RunStatus::allows(Some(Started), Stopping));
        assert!(RunStatus::allows(Some(Stopping), Stopped));
        assert!(RunStatus::allows(Some(Stopping), Error));

        assert!(!RunStatus::allows(Some(Completed), Started));
        assert!(!RunStatus::allows(Some(Started), Stopped));
        assert!(!RunStatus::allows(Some(Stopping), Completed));
        assert!(!RunStatus::allows(None, Completed));
    }

    #[test]
    fn test_no_edge_leaves_terminal_status() {
        for from in RunStatus::all().into_iter().filter(|s| s.is_terminal()) {
            for to in RunStatus::all() {
                assert!(!RunStatus::allows(Some(from), to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn test_status_serde() {
        let json = serde_json::to_string(&RunStatus::Stopping).unwrap();
        assert_eq!(json, "\"stopping\"");
    }

    #[test]
    fn test_run_round_trip_keeps_integer_keys() {
        let mut run = TestRun::new("run-A");
        run.statuses.insert(7, RunStatus::Completed);
        run.results.insert(
            7,
            AggregatedResult {
                total: 3,
                success_count: 2,
                failure_count: 1,
                ..Default::default()
            },
        );

        let json = serde_json::to_string(&run).unwrap();
        let back: TestRun = serde_json::from_str(&json).unwrap();
        assert_eq!(back.status(7), Some(RunStatus::Completed));
        assert_eq!(back.result(7).unwrap().total, 3);
    }

    #[test]
    fn test_success_rate() {
        let result = AggregatedResult {
            total: 4,
            success_count: 3,
            failure_count: 1,
            ..Default::default()
        };
        assert_eq!(result.success_rate(), 75.0);
        assert_eq!(AggregatedResult::default().success_rate(), 0.0);
    }
}
