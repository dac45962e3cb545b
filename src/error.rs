//! Error types
//!
//! Failure classification for test results and the library's own errors.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classified failure carried by a failed test result
#[derive(Clone, Debug, Error, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TestFailure {
    /// The test action returned an error or panicked
    #[error("{message}")]
    Execution { message: String },

    /// The effective timeout elapsed before the action completed
    #[error("Test timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}

impl TestFailure {
    pub fn execution(message: impl Into<String>) -> Self {
        TestFailure::Execution {
            message: message.into(),
        }
    }

    pub fn timeout(timeout_ms: u64) -> Self {
        TestFailure::Timeout { timeout_ms }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, TestFailure::Timeout { .. })
    }

    /// Short classification label
    pub fn kind(&self) -> &'static str {
        match self {
            TestFailure::Execution { .. } => "execution",
            TestFailure::Timeout { .. } => "timeout",
        }
    }
}

/// Structurally invalid run configuration
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("max_workers must be at least 1 (got {0})")]
    InvalidWorkers(usize),

    #[error("cache_capacity must be at least 1 when caching is enabled")]
    InvalidCacheCapacity,

    #[error("timeout_ms must be greater than zero")]
    InvalidTimeout,
}

/// Worker pool errors
///
/// Saturation is never an error; callers queue instead.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("worker pool has been shut down")]
    Closed,
}

/// Suite file loading errors
#[derive(Debug, Error)]
pub enum SuiteError {
    #[error("failed to read suite file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse suite file {path}: {message}")]
    Parse { path: String, message: String },

    #[error("duplicate test id '{0}'")]
    DuplicateId(String),

    #[error("test #{0} has an empty id")]
    EmptyId(usize),
}
