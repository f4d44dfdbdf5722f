//! Data models for performance test orchestration
//!
//! This module contains all data structures used throughout the application.

mod performance_test;
mod test_run;

pub use performance_test::{LoadTestConfig, PerformanceTest, TestId};
pub use test_run::{AggregatedResult, ExecutionReport, RunStatus, TestRun, TimingStats};
