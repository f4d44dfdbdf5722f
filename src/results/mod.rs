//! Result aggregation, run storage and metrics export
//!
//! Turns parsed load generator output into aggregated results, persists run
//! records and optionally forwards results to a time-series backend.

#![allow(dead_code)]

mod aggregate;
mod sink;
mod storage;

pub use aggregate::ResultAggregator;
pub use sink::{InfluxSink, MetricsSink, NoopSink};
pub use storage::{generate_run_id, ExportFormat, JsonRunStore, RunInfo};
