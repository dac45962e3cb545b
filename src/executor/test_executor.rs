//! Single-test execution
//!
//! Runs one unit with timeout enforcement and retry/backoff.
//!
//! Each attempt runs the action on its own task and races it against a timer.
//! When the timer wins, only the *result* is declared failed: the action task
//! is detached, not aborted, and may keep running to completion in the
//! background. Stopping it would require the action to observe a cancellation
//! signal, which test actions are not required to do.

use chrono::Utc;
use rand::Rng;
use std::time::Duration;
use tokio::task::JoinError;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, warn};

use crate::error::TestFailure;
use crate::models::{BackoffConfig, RunConfig, TestResult, TestUnit};
use crate::monitor::PerformanceMonitor;

/// Executes test units with timeout and retry policy
#[derive(Clone, Debug, Default)]
pub struct TestExecutor {
    monitor: Option<PerformanceMonitor>,
}

impl TestExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sample resource usage during every attempt
    pub fn with_monitor(mut self, monitor: PerformanceMonitor) -> Self {
        self.monitor = Some(monitor);
        self
    }

    pub fn has_monitor(&self) -> bool {
        self.monitor.is_some()
    }

    /// Run a unit until it passes or its retry budget is spent
    ///
    /// The result describes the final attempt only; `retries_used` counts the
    /// whole chain.
    pub async fn execute(&self, unit: &TestUnit, config: &RunConfig) -> TestResult {
        let limit = unit.timeout.unwrap_or_else(|| config.timeout());
        let budget = unit.retries.unwrap_or(config.retries);
        let mut retries_used = 0;

        debug!(test = %unit.id, timeout_ms = limit.as_millis() as u64, budget, "Executing test");

        loop {
            let result = self.attempt(unit, limit).await;

            let Some(error) = &result.error else {
                return result.with_retries(retries_used);
            };
            if retries_used >= budget {
                return result.with_retries(retries_used);
            }

            retries_used += 1;
            let delay = backoff_delay(&config.backoff, retries_used);
            warn!(
                test = %unit.id,
                attempt = retries_used + 1,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Retrying test"
            );
            sleep(delay).await;
        }
    }

    /// One attempt raced against the timeout
    async fn attempt(&self, unit: &TestUnit, limit: Duration) -> TestResult {
        let start_time = Utc::now();
        let started = Instant::now();
        let session = self.monitor.as_ref().map(|m| m.start(&unit.id));

        let task = tokio::spawn(unit.action.invoke());
        let outcome = match timeout(limit, task).await {
            Ok(Ok(Ok(()))) => None,
            Ok(Ok(Err(e))) => Some(TestFailure::execution(format!("{e:#}"))),
            Ok(Err(join_error)) => Some(TestFailure::execution(describe_join_error(join_error))),
            // The JoinHandle was dropped with the timeout future, detaching the task
            Err(_) => {
                debug!(test = %unit.id, "Attempt timed out, action left running");
                Some(TestFailure::timeout(limit.as_millis() as u64))
            }
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        let metrics = session.map(|s| s.finish());

        let result = match outcome {
            None => TestResult::passed(&unit.id, &unit.name, start_time, duration_ms),
            Some(error) => {
                TestResult::failed(&unit.id, &unit.name, start_time, duration_ms, error)
            }
        };
        let result = result.with_end_time(Utc::now());

        match metrics {
            Some(metrics) => result.with_metrics(metrics),
            None => result,
        }
    }
}

/// Backoff delay for retry number `retry`, including jitter
fn backoff_delay(backoff: &BackoffConfig, retry: u32) -> Duration {
    let delay = backoff.delay_for(retry);
    if backoff.jitter_ms == 0 {
        return delay;
    }
    let jitter = rand::rng().random_range(0..=backoff.jitter_ms);
    delay + Duration::from_millis(jitter)
}

fn describe_join_error(error: JoinError) -> String {
    if !error.is_panic() {
        return "test task was cancelled".to_string();
    }

    let payload = error.into_panic();
    let message = if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    };
    format!("test panicked: {message}")
}
