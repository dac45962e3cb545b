//! Test run orchestration
//!
//! Drives a whole test list through the cache, the worker pool and the
//! executor. Scheduling is streaming: up to `max_workers` tests are in flight
//! and the next pending test is dispatched as soon as any one completes.
//! Results are stored by input position, so output order always equals input
//! order regardless of completion order.

use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, error, info};

use crate::cache::ResultCache;
use crate::error::{ConfigError, TestFailure};
use crate::events::RunListener;
use crate::models::{RunConfig, RunSummary, TestResult, TestUnit};
use crate::monitor::{MonitorConfig, PerformanceMonitor};
use crate::pool::{PoolStats, WorkerHandle, WorkerPool};
use crate::utils::Timer;

use super::TestExecutor;

/// Per-id execution locks
///
/// Guarantees at most one in-flight execution per test id within a runner,
/// including across concurrent `run` calls.
#[derive(Debug, Default)]
struct InFlight {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl InFlight {
    fn lock_for(&self, id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(id.to_string())
            .or_default()
            .clone()
    }

    fn forget(&self, id: &str, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // Map + ours; anyone else waiting holds another clone
        if Arc::strong_count(&lock) <= 2 {
            locks.remove(id);
        }
    }
}

/// Worker checked out for one execution, returned to the pool on drop
struct Lease<'a> {
    pool: &'a WorkerPool,
    handle: Option<WorkerHandle>,
}

impl Drop for Lease<'_> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.pool.release(handle);
        }
    }
}

/// Everything a dispatched test needs, shared with worker tasks
#[derive(Clone)]
struct RunContext {
    config: Arc<RunConfig>,
    pool: Arc<WorkerPool>,
    cache: Arc<ResultCache>,
    executor: Arc<TestExecutor>,
    listeners: Arc<[Arc<dyn RunListener>]>,
    in_flight: Arc<InFlight>,
}

impl RunContext {
    fn emit(&self, f: impl Fn(&dyn RunListener)) {
        for listener in self.listeners.iter() {
            f(listener.as_ref());
        }
    }

    fn cached(&self, id: &str) -> Option<TestResult> {
        if !self.config.cache_enabled {
            return None;
        }
        self.cache.get(id)
    }

    /// Re-check after waiting on the id lock; an absent entry is not a new miss
    fn cached_after_wait(&self, id: &str) -> Option<TestResult> {
        if !self.config.cache_enabled || !self.cache.contains(id) {
            return None;
        }
        self.cache.get(id)
    }

    fn complete(&self, result: TestResult) -> TestResult {
        self.emit(|l| l.on_test_complete(&result));
        result
    }

    /// Run one unit while holding its id lock
    async fn dispatch(self, unit: TestUnit) -> TestResult {
        let lock = self.in_flight.lock_for(&unit.id);
        let result = {
            let _exclusive = lock.lock().await;
            self.execute_exclusive(&unit).await
        };
        self.in_flight.forget(&unit.id, lock);
        result
    }

    async fn execute_exclusive(&self, unit: &TestUnit) -> TestResult {
        // A duplicate id that finished while we waited may have cached a pass
        if let Some(cached) = self.cached_after_wait(&unit.id) {
            debug!(test = %unit.id, "Using result cached by an earlier execution");
            return self.complete(cached);
        }

        let handle = match self.pool.acquire().await {
            Ok(handle) => handle,
            Err(e) => {
                error!(test = %unit.id, "Could not acquire worker: {}", e);
                let result = TestResult::failed(
                    &unit.id,
                    &unit.name,
                    Utc::now(),
                    0,
                    TestFailure::execution(e.to_string()),
                );
                return self.complete(result);
            }
        };

        let mut lease = Lease {
            pool: &self.pool,
            handle: Some(handle),
        };
        self.emit(|l| l.on_test_start(unit));

        let result = match lease.handle.as_mut() {
            Some(worker) => worker.run(unit, &self.executor, &self.config).await,
            None => unreachable!("lease is populated above"),
        };
        drop(lease);

        if self.config.cache_enabled {
            self.cache.set(&unit.id, result.clone());
        }
        self.complete(result)
    }
}

/// Orchestrates test runs over a bounded worker pool
pub struct TestRunner {
    ctx: RunContext,
}

impl TestRunner {
    /// Create a runner with its own pool, cache and executor
    ///
    /// Fails if the configuration is structurally invalid.
    pub fn new(config: RunConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let mut executor = TestExecutor::new();
        if config.collect_metrics {
            executor = executor.with_monitor(PerformanceMonitor::new(MonitorConfig {
                interval: config.monitor_interval(),
                max_rss_mib: config.max_rss_mib,
            }));
        }

        Ok(Self {
            ctx: RunContext {
                pool: Arc::new(WorkerPool::new(config.max_workers)),
                cache: Arc::new(ResultCache::new(config.cache_capacity)),
                executor: Arc::new(executor),
                listeners: Arc::from(Vec::new()),
                in_flight: Arc::new(InFlight::default()),
                config: Arc::new(config),
            },
        })
    }

    /// Share a cache with other runners
    pub fn with_cache(mut self, cache: Arc<ResultCache>) -> Self {
        self.ctx.cache = cache;
        self
    }

    /// Subscribe a listener to lifecycle events
    pub fn with_listener(mut self, listener: Arc<dyn RunListener>) -> Self {
        let mut listeners = self.ctx.listeners.to_vec();
        listeners.push(listener);
        self.ctx.listeners = Arc::from(listeners);
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.ctx.config
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.ctx.cache
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.ctx.pool.stats()
    }

    /// Run a test list, returning results in input order
    ///
    /// Under bail, the list ends at the last dispatched unit.
    pub async fn run(&self, units: &[TestUnit]) -> Vec<TestResult> {
        self.run_timed(units).await.0
    }

    /// Run a test list and summarize it
    pub async fn run_round(&self, round: u32, suite: &str, units: &[TestUnit]) -> RunSummary {
        let (results, total_duration_ms) = self.run_timed(units).await;
        RunSummary::new(round, suite, results, total_duration_ms)
    }

    async fn run_timed(&self, units: &[TestUnit]) -> (Vec<TestResult>, u64) {
        let ctx = &self.ctx;
        let config = ctx.config.as_ref();
        let timer = Timer::start("run");
        ctx.emit(|l| l.on_run_start(config));

        let focused = units.iter().any(|u| u.only);
        let mut slots: Vec<Option<TestResult>> = vec![None; units.len()];
        let mut in_flight = FuturesUnordered::new();
        let mut next = 0;
        let mut bailed = false;

        loop {
            while !bailed && in_flight.len() < config.max_workers && next < units.len() {
                let index = next;
                next += 1;
                let unit = &units[index];

                if unit.skip || (focused && !unit.only) {
                    debug!(test = %unit.id, "Skipping test");
                    slots[index] = Some(ctx.complete(TestResult::skipped(&unit.id, &unit.name)));
                    continue;
                }

                if let Some(cached) = ctx.cached(&unit.id) {
                    slots[index] = Some(ctx.complete(cached));
                    continue;
                }

                let task = tokio::spawn(ctx.clone().dispatch(unit.clone()));
                in_flight.push(async move { (index, task.await) });
            }

            let Some((index, joined)) = in_flight.next().await else {
                break;
            };

            let result = match joined {
                Ok(result) => result,
                Err(e) => {
                    let unit = &units[index];
                    error!(test = %unit.id, "Test task failed: {}", e);
                    ctx.complete(TestResult::failed(
                        &unit.id,
                        &unit.name,
                        Utc::now(),
                        0,
                        TestFailure::execution(format!("runner task failed: {e}")),
                    ))
                }
            };

            if config.bail && result.is_failed() && !bailed {
                info!(
                    "Bailing after failure of {}; waiting for {} in-flight test(s)",
                    result.id,
                    in_flight.len()
                );
                bailed = true;
            }
            slots[index] = Some(result);
        }

        let results: Vec<TestResult> = slots.into_iter().flatten().collect();
        let total_duration_ms = timer.stop().as_millis() as u64;
        ctx.emit(|l| l.on_run_complete(&results, total_duration_ms));
        (results, total_duration_ms)
    }

    /// Tear down workers and clear the cache
    ///
    /// The runner cannot dispatch tests afterwards.
    pub fn cleanup(&self) {
        let rejected = self.ctx.pool.cleanup();
        self.ctx.cache.clear();
        debug!(rejected, "Runner cleaned up");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events;
    use crate::models::{BackoffConfig, TestStatus};
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::time::{sleep, Instant};

    fn sleeper(id: &str, ms: u64) -> TestUnit {
        TestUnit::from_fn(id, move || async move {
            sleep(Duration::from_millis(ms)).await;
            Ok(())
        })
    }

    fn failing(id: &str) -> TestUnit {
        TestUnit::from_fn(id, || async { anyhow::bail!("assertion failed") })
    }

    fn counted(id: &str, calls: Arc<AtomicU32>) -> TestUnit {
        TestUnit::from_fn(id, move || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
    }

    #[test]
    fn test_invalid_config_is_fatal() {
        assert_eq!(
            TestRunner::new(RunConfig::new(0)).err(),
            Some(ConfigError::InvalidWorkers(0))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_output_order_matches_input() {
        let runner = TestRunner::new(RunConfig::new(3)).unwrap();
        let units = vec![
            sleeper("slow", 90),
            sleeper("fast", 10),
            sleeper("medium", 50),
            sleeper("instant", 0),
        ];

        let results = runner.run(&units).await;
        assert_eq!(results.len(), units.len());
        for (unit, result) in units.iter().zip(&results) {
            assert_eq!(unit.id, result.id);
            assert_eq!(result.status, TestStatus::Passed);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_parallelism() {
        let runner = TestRunner::new(RunConfig::new(2)).unwrap();
        let units: Vec<_> = (0..4).map(|i| sleeper(&format!("t{i}"), 50)).collect();

        let started = Instant::now();
        let results = runner.run(&units).await;
        let elapsed = started.elapsed();

        assert_eq!(results.len(), 4);
        assert!(elapsed >= Duration::from_millis(100));
        assert!(elapsed < Duration::from_millis(150));

        let stats = runner.pool_stats();
        assert_eq!(stats.created, 2);
        assert!(stats.peak_busy <= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_streaming_keeps_workers_busy() {
        // Chunked scheduling would take 100 + 100 = 200ms here
        let runner = TestRunner::new(RunConfig::new(2)).unwrap();
        let units = vec![
            sleeper("long", 100),
            sleeper("a", 10),
            sleeper("b", 10),
            sleeper("c", 100),
        ];

        let started = Instant::now();
        runner.run(&units).await;
        assert!(started.elapsed() < Duration::from_millis(150));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bail_stops_dispatch() {
        let calls = Arc::new(AtomicU32::new(0));
        let config = RunConfig::new(1).with_bail(true);
        let runner = TestRunner::new(config).unwrap();
        let units = vec![sleeper("a", 5), failing("b"), counted("c", calls.clone())];

        let results = runner.run(&units).await;
        let ids: Vec<_> = results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(results[1].status, TestStatus::Failed);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bail_waits_for_in_flight() {
        let config = RunConfig::new(2).with_bail(true);
        let runner = TestRunner::new(config).unwrap();
        let units = vec![failing("fails"), sleeper("running", 50), sleeper("never", 1)];

        let results = runner.run(&units).await;
        let ids: Vec<_> = results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["fails", "running"]);
        assert_eq!(results[1].status, TestStatus::Passed);
    }

    #[tokio::test]
    async fn test_failures_without_bail_run_everything() {
        let runner = TestRunner::new(RunConfig::new(2)).unwrap();
        let units = vec![failing("x"), sleeper("y", 1), failing("z")];

        let results = runner.run(&units).await;
        assert_eq!(results.len(), 3);
        assert_eq!(
            results.iter().filter(|r| r.is_failed()).count(),
            2
        );
    }

    #[tokio::test]
    async fn test_cached_pass_is_not_rerun() {
        let calls = Arc::new(AtomicU32::new(0));
        let runner = TestRunner::new(RunConfig::new(2)).unwrap();
        let units = vec![counted("cached", calls.clone())];

        runner.run(&units).await;
        runner.run(&units).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        runner.cache().clear();
        runner.run(&units).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cache_disabled_always_runs() {
        let calls = Arc::new(AtomicU32::new(0));
        let runner = TestRunner::new(RunConfig::new(2).with_cache(false)).unwrap();
        let units = vec![counted("uncached", calls.clone())];

        runner.run(&units).await;
        runner.run(&units).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(runner.cache().is_empty());
    }

    #[tokio::test]
    async fn test_failures_are_retried_next_run() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let unit = TestUnit::from_fn("always-fails", move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                anyhow::bail!("still broken")
            }
        });
        let runner = TestRunner::new(RunConfig::new(1)).unwrap();

        runner.run(std::slice::from_ref(&unit)).await;
        runner.run(std::slice::from_ref(&unit)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_shared_cache_between_runners() {
        let calls = Arc::new(AtomicU32::new(0));
        let cache = Arc::new(ResultCache::new(10));
        let units = vec![counted("shared", calls.clone())];

        let first = TestRunner::new(RunConfig::new(1))
            .unwrap()
            .with_cache(cache.clone());
        let second = TestRunner::new(RunConfig::new(1))
            .unwrap()
            .with_cache(cache.clone());

        first.run(&units).await;
        second.run(&units).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats().hits, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_ids_never_overlap() {
        let active = Arc::new(AtomicUsize::new(0));
        let overlap = Arc::new(AtomicUsize::new(0));
        let make = || {
            let active = active.clone();
            let overlap = overlap.clone();
            TestUnit::from_fn("dup", move || {
                let active = active.clone();
                let overlap = overlap.clone();
                async move {
                    if active.fetch_add(1, Ordering::SeqCst) > 0 {
                        overlap.fetch_add(1, Ordering::SeqCst);
                    }
                    sleep(Duration::from_millis(20)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    anyhow::bail!("fail so the cache never short-circuits")
                }
            })
        };

        let runner = TestRunner::new(RunConfig::new(4)).unwrap();
        let units = vec![make(), make(), make()];
        let started = Instant::now();
        let results = runner.run(&units).await;

        assert_eq!(results.len(), 3);
        assert_eq!(overlap.load(Ordering::SeqCst), 0);
        assert!(started.elapsed() >= Duration::from_millis(60));
    }

    #[tokio::test]
    async fn test_duplicate_id_reuses_fresh_pass() {
        let calls = Arc::new(AtomicU32::new(0));
        let runner = TestRunner::new(RunConfig::new(2)).unwrap();
        let units = vec![counted("twice", calls.clone()), counted("twice", calls.clone())];

        let results = runner.run(&units).await;
        assert_eq!(results.len(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_skip_and_only() {
        let calls = Arc::new(AtomicU32::new(0));
        let runner = TestRunner::new(RunConfig::new(2)).unwrap();

        let units = vec![
            counted("skipped", calls.clone()).skipped(),
            counted("normal", calls.clone()),
        ];
        let results = runner.run(&units).await;
        assert_eq!(results[0].status, TestStatus::Skipped);
        assert_eq!(results[1].status, TestStatus::Passed);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        runner.cache().clear();
        let units = vec![
            counted("other", calls.clone()),
            counted("focused", calls.clone()).only(),
        ];
        let results = runner.run(&units).await;
        assert_eq!(results[0].status, TestStatus::Skipped);
        assert_eq!(results[1].status, TestStatus::Passed);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_through_runner() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        let unit = TestUnit::from_fn("flaky", move || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    anyhow::bail!("transient");
                }
                Ok(())
            }
        });

        let config = RunConfig::new(1)
            .with_retries(2)
            .with_backoff(BackoffConfig::linear(10));
        let runner = TestRunner::new(config).unwrap();
        let results = runner.run(&[unit]).await;

        assert_eq!(results[0].status, TestStatus::Passed);
        assert_eq!(results[0].retries_used, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_attempt_times_out_and_retry_passes() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        let unit = TestUnit::from_fn("hangs-once", move || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    std::future::pending::<()>().await;
                }
                Ok(())
            }
        });

        let config = RunConfig::new(1)
            .with_timeout_ms(50)
            .with_retries(1)
            .with_backoff(BackoffConfig::linear(10));
        let runner = TestRunner::new(config).unwrap();
        let results = runner.run(&[unit]).await;

        assert_eq!(results[0].status, TestStatus::Passed);
        assert_eq!(results[0].retries_used, 1);
        assert!(results[0].error.is_none());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(runner.pool_stats().busy, 0);
    }

    #[tokio::test]
    async fn test_cache_miss_counted_once_per_execution() {
        let calls = Arc::new(AtomicU32::new(0));
        let runner = TestRunner::new(RunConfig::new(1)).unwrap();
        let units = vec![counted("once", calls.clone())];

        runner.run(&units).await;
        let stats = runner.cache().stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 0);

        runner.run(&units).await;
        let stats = runner.cache().stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lifecycle_events() {
        let (listener, mut rx) = events::channel();
        let runner = TestRunner::new(RunConfig::new(2))
            .unwrap()
            .with_listener(Arc::new(listener));

        let units = vec![sleeper("a", 10), failing("b")];
        runner.run(&units).await;

        let mut names = Vec::new();
        while let Ok(event) = rx.try_recv() {
            names.push(event.name());
        }

        assert_eq!(names.first(), Some(&"run_start"));
        assert_eq!(names.last(), Some(&"run_complete"));
        assert_eq!(names.iter().filter(|n| **n == "test_start").count(), 2);
        assert_eq!(names.iter().filter(|n| **n == "test_complete").count(), 2);
    }

    #[tokio::test]
    async fn test_run_round_summary() {
        let runner = TestRunner::new(RunConfig::new(2)).unwrap();
        let units = vec![sleeper("a", 1), failing("b"), sleeper("c", 1).skipped()];

        let summary = runner.run_round(1, "demo", &units).await;
        assert_eq!(summary.total, 3);
        assert_eq!(summary.passed, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.suite, "demo");
    }

    #[tokio::test]
    async fn test_cleanup_fails_later_runs_gracefully() {
        let runner = TestRunner::new(RunConfig::new(1)).unwrap();
        runner.cleanup();

        let results = runner.run(&[sleeper("late", 1)]).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status, TestStatus::Failed);
        assert!(runner.pool_stats().closed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_multi_thread_runtime() {
        let runner = TestRunner::new(RunConfig::new(3)).unwrap();
        let units: Vec<_> = (0..20).map(|i| sleeper(&format!("mt{i}"), 2)).collect();

        let results = runner.run(&units).await;
        assert_eq!(results.len(), 20);
        assert!(results.iter().all(|r| r.status == TestStatus::Passed));
        assert!(runner.pool_stats().peak_busy <= 3);
    }
}
