//! Run lifecycle events
//!
//! Reporting sinks subscribe to a runner through [`RunListener`]. Listeners are
//! called from worker tasks and must not block.

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::models::{RunConfig, TestResult, TestStatus, TestUnit};

/// Subscriber for run lifecycle signals
///
/// All methods default to no-ops.
pub trait RunListener: Send + Sync {
    fn on_run_start(&self, _config: &RunConfig) {}

    fn on_test_start(&self, _unit: &TestUnit) {}

    fn on_test_complete(&self, _result: &TestResult) {}

    fn on_run_complete(&self, _results: &[TestResult], _total_duration_ms: u64) {}
}

/// Owned form of the lifecycle signals
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    RunStart {
        config: RunConfig,
    },
    TestStart {
        id: String,
        name: String,
    },
    TestComplete {
        result: TestResult,
    },
    RunComplete {
        results: Vec<TestResult>,
        total_duration_ms: u64,
    },
}

impl RunEvent {
    pub fn name(&self) -> &'static str {
        match self {
            RunEvent::RunStart { .. } => "run_start",
            RunEvent::TestStart { .. } => "test_start",
            RunEvent::TestComplete { .. } => "test_complete",
            RunEvent::RunComplete { .. } => "run_complete",
        }
    }
}

/// Forwards every signal into an unbounded channel
#[derive(Clone, Debug)]
pub struct ChannelListener {
    tx: mpsc::UnboundedSender<RunEvent>,
}

impl ChannelListener {
    fn send(&self, event: RunEvent) {
        // Receiver dropped means nobody is listening anymore
        let _ = self.tx.send(event);
    }
}

/// Create a listener and the stream of events it produces
pub fn channel() -> (ChannelListener, mpsc::UnboundedReceiver<RunEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ChannelListener { tx }, rx)
}

impl RunListener for ChannelListener {
    fn on_run_start(&self, config: &RunConfig) {
        self.send(RunEvent::RunStart {
            config: config.clone(),
        });
    }

    fn on_test_start(&self, unit: &TestUnit) {
        self.send(RunEvent::TestStart {
            id: unit.id.clone(),
            name: unit.name.clone(),
        });
    }

    fn on_test_complete(&self, result: &TestResult) {
        self.send(RunEvent::TestComplete {
            result: result.clone(),
        });
    }

    fn on_run_complete(&self, results: &[TestResult], total_duration_ms: u64) {
        self.send(RunEvent::RunComplete {
            results: results.to_vec(),
            total_duration_ms,
        });
    }
}

/// Reports progress through tracing
#[derive(Clone, Copy, Debug, Default)]
pub struct LogListener;

impl RunListener for LogListener {
    fn on_run_start(&self, config: &RunConfig) {
        info!(
            "Starting run (workers: {}, timeout: {}ms, retries: {}, bail: {}, cache: {})",
            config.max_workers, config.timeout_ms, config.retries, config.bail, config.cache_enabled
        );
    }

    fn on_test_complete(&self, result: &TestResult) {
        match result.status {
            TestStatus::Failed => warn!("  {}", result),
            _ => info!("  {}", result),
        }
    }

    fn on_run_complete(&self, results: &[TestResult], total_duration_ms: u64) {
        let passed = results.iter().filter(|r| r.status.is_success()).count();
        info!(
            "Run completed in {}ms - Pass: {}/{}",
            total_duration_ms,
            passed,
            results.len()
        );
    }
}
