//! Test execution engine
//!
//! Launches load generators, tracks their processes and runs background
//! executions on a bounded worker pool.

mod engine;
mod pool;
mod process;

pub use engine::{EngineDeps, EngineSettings, ExecutionEngine};
