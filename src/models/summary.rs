//! Run summaries
//!
//! Aggregates a run's results into counts and duration statistics.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::test_result::{TestResult, TestStatus};

/// Duration percentiles (p50, p90, p95, p99)
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Percentiles {
    pub p50: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
}

impl Percentiles {
    /// Calculate percentiles from sorted samples
    pub fn from_sorted(sorted: &[f64]) -> Self {
        if sorted.is_empty() {
            return Self::default();
        }

        Self {
            p50: percentile(sorted, 50.0),
            p90: percentile(sorted, 90.0),
            p95: percentile(sorted, 95.0),
            p99: percentile(sorted, 99.0),
        }
    }
}

/// Linear interpolation between closest ranks
fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    if sorted.len() == 1 {
        return sorted[0];
    }

    let idx = (p / 100.0) * (sorted.len() - 1) as f64;
    let lower = idx.floor() as usize;
    let upper = idx.ceil() as usize;
    let fraction = idx - lower as f64;

    if upper >= sorted.len() {
        sorted[sorted.len() - 1]
    } else {
        sorted[lower] * (1.0 - fraction) + sorted[upper] * fraction
    }
}

/// Test duration statistics in milliseconds
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DurationStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
    pub percentiles: Percentiles,
    pub count: usize,
}

impl DurationStats {
    pub fn from_samples(samples: &[f64]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }

        let mut sorted = samples.to_vec();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let mean = sorted.iter().sum::<f64>() / sorted.len() as f64;
        let variance =
            sorted.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / sorted.len() as f64;

        Self {
            min: sorted[0],
            max: sorted[sorted.len() - 1],
            mean,
            std_dev: variance.sqrt(),
            percentiles: Percentiles::from_sorted(&sorted),
            count: sorted.len(),
        }
    }

    pub fn format_summary(&self) -> String {
        format!(
            "min={:.0}ms max={:.0}ms mean={:.1}ms p95={:.1}ms",
            self.min, self.max, self.mean, self.percentiles.p95
        )
    }
}

/// Summary of one run
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunSummary {
    pub round: u32,
    pub suite: String,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub retried: usize,
    /// Wall-clock time of the whole run
    pub total_duration_ms: u64,
    /// Statistics over executed (non-skipped) tests
    pub durations: DurationStats,
    pub results: Vec<TestResult>,
}

impl RunSummary {
    pub fn new(
        round: u32,
        suite: impl Into<String>,
        results: Vec<TestResult>,
        total_duration_ms: u64,
    ) -> Self {
        let count = |status: TestStatus| results.iter().filter(|r| r.status == status).count();
        let samples: Vec<f64> = results
            .iter()
            .filter(|r| r.status != TestStatus::Skipped)
            .map(|r| r.duration_ms as f64)
            .collect();

        Self {
            round,
            suite: suite.into(),
            total: results.len(),
            passed: count(TestStatus::Passed),
            failed: count(TestStatus::Failed),
            skipped: count(TestStatus::Skipped),
            retried: results.iter().filter(|r| r.retries_used > 0).count(),
            total_duration_ms,
            durations: DurationStats::from_samples(&samples),
            results,
        }
    }

    /// Percentage of executed tests that passed
    pub fn pass_rate(&self) -> f64 {
        let executed = self.total - self.skipped;
        if executed == 0 {
            0.0
        } else {
            (self.passed as f64 / executed as f64) * 100.0
        }
    }

    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    pub fn failures(&self) -> impl Iterator<Item = &TestResult> {
        self.results.iter().filter(|r| r.is_failed())
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Round {} - {}", self.round, self.suite)?;
        writeln!(f, "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━")?;
        for result in &self.results {
            writeln!(f, "  {result}")?;
        }
        writeln!(f, "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━")?;
        writeln!(
            f,
            "Total: {} | Pass: {} | Fail: {} | Skip: {} | Retried: {}",
            self.total, self.passed, self.failed, self.skipped, self.retried
        )?;
        writeln!(
            f,
            "Pass Rate: {:.1}% | Duration: {}ms",
            self.pass_rate(),
            self.total_duration_ms
        )
    }
}
