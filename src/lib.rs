//! testflow - concurrent test execution engine
//!
//! Runs independent test units on a bounded pool of workers with per-test
//! timeouts, retries with backoff, memoization of passed results and an
//! optional fail-fast policy. Results always come back in input order.
//!
//! ## Example
//!
//! ```no_run
//! use testflow::{RunConfig, TestRunner, TestUnit};
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let runner = TestRunner::new(RunConfig::new(4).with_retries(1))?;
//! let units = vec![
//!     TestUnit::from_fn("ping", || async { Ok(()) }),
//!     TestUnit::from_fn("pong", || async { anyhow::bail!("no reply") }),
//! ];
//!
//! let results = runner.run(&units).await;
//! assert_eq!(results.len(), 2);
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod events;
pub mod executor;
pub mod models;
pub mod monitor;
pub mod output;
pub mod pool;
pub mod suite;
pub mod utils;

pub use cache::{CacheStats, ResultCache};
pub use error::{ConfigError, PoolError, SuiteError, TestFailure};
pub use events::{LogListener, RunEvent, RunListener};
pub use executor::{TestExecutor, TestRunner};
pub use models::{
    BackoffConfig, BackoffStrategy, RunConfig, RunSummary, TestAction, TestResult, TestStatus,
    TestUnit,
};
pub use monitor::{MonitorConfig, PerformanceMonitor, TestMetrics};
pub use pool::{PoolStats, WorkerHandle, WorkerPool};
