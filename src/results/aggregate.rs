//! Result aggregation
//!
//! Reduces parsed result rows into pass/fail counts and response time
//! statistics. The reduction only uses commutative operations (counts, an
//! integer sum of microseconds, min, max) so row order never changes the
//! outcome, not even in the last bit of the mean.

use crate::loadgen::ResultRecord;
use crate::models::{AggregatedResult, TimingStats};

/// Decides whether a result row counts as a success
pub type SuccessPredicate = fn(&ResultRecord) -> bool;

/// Default success rule: an explicit `success`/`passed` status, or, for
/// Locust stats rows without a status column, zero failures.
pub fn default_success(record: &ResultRecord) -> bool {
    match record.status() {
        Some(status) => {
            status.eq_ignore_ascii_case("success") || status.eq_ignore_ascii_case("passed")
        }
        None => record.failure_count() == Some(0),
    }
}

/// Folds result rows into an [`AggregatedResult`]
#[derive(Clone, Copy, Debug)]
pub struct ResultAggregator {
    predicate: SuccessPredicate,
}

impl ResultAggregator {
    pub fn new() -> Self {
        Self {
            predicate: default_success,
        }
    }

    pub fn with_predicate(predicate: SuccessPredicate) -> Self {
        Self { predicate }
    }

    pub fn aggregate<I>(&self, records: I) -> AggregatedResult
    where
        I: IntoIterator<Item = ResultRecord>,
    {
        let mut acc = Accumulator::default();
        for record in records {
            acc.add(&record, (self.predicate)(&record));
        }
        acc.finish()
    }
}

impl Default for ResultAggregator {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Default)]
struct Accumulator {
    total: u64,
    success: u64,
    timed: u64,
    sum_micros: i128,
    min_ms: Option<f64>,
    max_ms: Option<f64>,
}

impl Accumulator {
    fn add(&mut self, record: &ResultRecord, success: bool) {
        self.total += 1;
        if success {
            self.success += 1;
        }

        if let Some(ms) = record.response_time_ms() {
            self.timed += 1;
            self.sum_micros += (ms * 1000.0).round() as i128;
            self.min_ms = Some(self.min_ms.map_or(ms, |m| m.min(ms)));
            self.max_ms = Some(self.max_ms.map_or(ms, |m| m.max(ms)));
        }
    }

    fn finish(self) -> AggregatedResult {
        let timing = match (self.min_ms, self.max_ms) {
            (Some(min_ms), Some(max_ms)) => Some(TimingStats {
                count: self.timed,
                min_ms,
                max_ms,
                mean_ms: self.sum_micros as f64 / (self.timed as f64 * 1000.0),
            }),
            _ => None,
        };

        AggregatedResult {
            total: self.total,
            success_count: self.success,
            failure_count: self.total - self.success,
            timing,
            exit_code: None,
        }
    }
}
