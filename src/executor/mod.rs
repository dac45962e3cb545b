//! Test execution engine
//!
//! [`TestExecutor`] runs a single unit with timeout and retries;
//! [`TestRunner`] schedules whole lists over the worker pool.

mod runner;
mod test_executor;

pub use runner::TestRunner;
pub use test_executor::TestExecutor;
