//! Per-variable batch fitting and testing.

pub mod config;
pub mod result;
pub mod runner;

pub use config::{AnalysisConfig, BackendConfig};
pub use result::{BatchResult, BatchRow, TestSummary, TEST_ROW};
pub use runner::{run_batch, BatchConfig, BatchRunner, FailurePolicy, HypothesisFn};
