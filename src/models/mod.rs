//! Data models for test execution
//!
//! Test descriptors, results, run configuration and summaries.

mod run_config;
mod summary;
mod test_result;
mod test_unit;

pub use run_config::{BackoffConfig, BackoffStrategy, RunConfig};
pub use summary::{DurationStats, Percentiles, RunSummary};
pub use test_result::{TestResult, TestStatus};
pub use test_unit::{ActionFuture, TestAction, TestUnit};
