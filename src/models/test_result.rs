//! Test result models
//!
//! Defines the terminal status and per-test result types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::TestFailure;
use crate::monitor::TestMetrics;

/// Terminal test status
///
/// `Running` only exists inside the executor and is never stored in a result.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Passed,
    Failed,
    Skipped,
}

impl TestStatus {
    pub fn symbol(&self) -> &'static str {
        match self {
            TestStatus::Passed => "✓",
            TestStatus::Failed => "✗",
            TestStatus::Skipped => "○",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TestStatus::Passed)
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestStatus::Passed => write!(f, "PASS"),
            TestStatus::Failed => write!(f, "FAIL"),
            TestStatus::Skipped => write!(f, "SKIP"),
        }
    }
}

/// Result of a single test execution chain
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TestResult {
    pub id: String,
    pub name: String,
    pub status: TestStatus,
    pub duration_ms: u64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TestFailure>,
    pub retries_used: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<TestMetrics>,
}

impl TestResult {
    pub fn passed(
        id: impl Into<String>,
        name: impl Into<String>,
        start_time: DateTime<Utc>,
        duration_ms: u64,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            status: TestStatus::Passed,
            duration_ms,
            start_time,
            end_time: start_time + chrono::Duration::milliseconds(duration_ms as i64),
            error: None,
            retries_used: 0,
            metrics: None,
        }
    }

    pub fn failed(
        id: impl Into<String>,
        name: impl Into<String>,
        start_time: DateTime<Utc>,
        duration_ms: u64,
        error: TestFailure,
    ) -> Self {
        Self {
            status: TestStatus::Failed,
            error: Some(error),
            ..Self::passed(id, name, start_time, duration_ms)
        }
    }

    /// Result for a unit that was never dispatched
    pub fn skipped(id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            status: TestStatus::Skipped,
            ..Self::passed(id, name, now, 0)
        }
    }

    pub fn with_retries(mut self, retries_used: u32) -> Self {
        self.retries_used = retries_used;
        self
    }

    pub fn with_metrics(mut self, metrics: TestMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_end_time(mut self, end_time: DateTime<Utc>) -> Self {
        self.end_time = end_time;
        self
    }

    pub fn is_failed(&self) -> bool {
        self.status == TestStatus::Failed
    }
}

impl fmt::Display for TestResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} [{}ms]",
            self.status.symbol(),
            self.name,
            self.duration_ms
        )?;
        if self.retries_used > 0 {
            write!(f, " (retries: {})", self.retries_used)?;
        }
        if let Some(err) = &self.error {
            write!(f, " - {err}")?;
        }
        Ok(())
    }
}
