//! Performance monitoring
//!
//! Samples process resource usage while a test attempt runs. Sampling reads
//! `/proc/self` on Linux; on other platforms sessions finish with no samples.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

/// Clock ticks per second assumed for `/proc/<pid>/stat` CPU times
#[cfg(target_os = "linux")]
const CLOCK_TICKS_PER_SEC: u64 = 100;

/// Page size assumed for `/proc/<pid>/statm`
#[cfg(target_os = "linux")]
const PAGE_SIZE_KIB: u64 = 4;

/// Monitor configuration
#[derive(Clone, Debug)]
pub struct MonitorConfig {
    /// Time between samples
    pub interval: Duration,
    /// Warn when resident memory exceeds this many MiB
    pub max_rss_mib: Option<u64>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(100),
            max_rss_mib: None,
        }
    }
}

/// One resource usage sample
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSample {
    /// Resident set size in KiB
    pub rss_kib: u64,
    /// Cumulative user + system CPU time of the process
    pub cpu_time_ms: u64,
}

/// Resource usage over one attempt window
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TestMetrics {
    pub samples: usize,
    pub duration_ms: u64,
    pub avg_rss_kib: u64,
    pub peak_rss_kib: u64,
    /// CPU time consumed by the whole process during the window
    pub cpu_time_ms: u64,
}

impl TestMetrics {
    /// Aggregate samples taken over a window of `duration`
    pub fn from_samples(samples: &[ResourceSample], duration: Duration) -> Self {
        if samples.is_empty() {
            return Self {
                duration_ms: duration.as_millis() as u64,
                ..Self::default()
            };
        }

        let total_rss: u64 = samples.iter().map(|s| s.rss_kib).sum();
        let first = samples[0];
        let last = samples[samples.len() - 1];

        Self {
            samples: samples.len(),
            duration_ms: duration.as_millis() as u64,
            avg_rss_kib: total_rss / samples.len() as u64,
            peak_rss_kib: samples.iter().map(|s| s.rss_kib).max().unwrap_or(0),
            cpu_time_ms: last.cpu_time_ms.saturating_sub(first.cpu_time_ms),
        }
    }

    pub fn format_summary(&self) -> String {
        format!(
            "samples={} avg_rss={}KiB peak_rss={}KiB cpu={}ms",
            self.samples, self.avg_rss_kib, self.peak_rss_kib, self.cpu_time_ms
        )
    }
}

/// Samples resource usage for test attempts
#[derive(Clone, Debug, Default)]
pub struct PerformanceMonitor {
    config: MonitorConfig,
}

impl PerformanceMonitor {
    pub fn new(config: MonitorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Begin sampling; must be called from within a tokio runtime
    pub fn start(&self, test_id: &str) -> MonitorSession {
        let samples = Arc::new(Mutex::new(Vec::new()));
        let sampler = tokio::spawn(sample_loop(
            test_id.to_string(),
            self.config.clone(),
            samples.clone(),
        ));

        MonitorSession {
            test_id: test_id.to_string(),
            started: Instant::now(),
            samples,
            sampler,
        }
    }
}

async fn sample_loop(
    test_id: String,
    config: MonitorConfig,
    samples: Arc<Mutex<Vec<ResourceSample>>>,
) {
    let mut ticker = tokio::time::interval(config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut alerted = false;

    loop {
        ticker.tick().await;
        let Some(sample) = read_sample() else {
            continue;
        };

        if let Some(limit) = config.max_rss_mib {
            if !alerted && sample.rss_kib / 1024 > limit {
                warn!(
                    test = %test_id,
                    rss_mib = sample.rss_kib / 1024,
                    limit_mib = limit,
                    "Performance threshold exceeded"
                );
                alerted = true;
            }
        }

        samples
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(sample);
    }
}

/// Sampling window for one attempt
#[derive(Debug)]
pub struct MonitorSession {
    test_id: String,
    started: Instant,
    samples: Arc<Mutex<Vec<ResourceSample>>>,
    sampler: JoinHandle<()>,
}

impl MonitorSession {
    /// Stop sampling and aggregate the window
    pub fn finish(self) -> TestMetrics {
        self.sampler.abort();
        let duration = self.started.elapsed();

        let mut samples = self
            .samples
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(sample) = read_sample() {
            samples.push(sample);
        }

        let metrics = TestMetrics::from_samples(&samples, duration);
        debug!(test = %self.test_id, "{}", metrics.format_summary());
        metrics
    }
}

impl Drop for MonitorSession {
    fn drop(&mut self) {
        self.sampler.abort();
    }
}

/// Read RSS and CPU time of the current process
///
/// `statm` holds sizes in pages: `size resident shared text lib data dt`.
/// `stat` holds `utime` and `stime` in clock ticks as fields 14 and 15.
#[cfg(target_os = "linux")]
pub fn read_sample() -> Option<ResourceSample> {
    let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
    let resident_pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;

    let stat = std::fs::read_to_string("/proc/self/stat").ok()?;
    // The command name may contain spaces; fields resume after the last ')'
    let rest = &stat[stat.rfind(')')? + 1..];
    let mut fields = rest.split_whitespace().skip(11);
    let utime: u64 = fields.next()?.parse().ok()?;
    let stime: u64 = fields.next()?.parse().ok()?;

    Some(ResourceSample {
        rss_kib: resident_pages * PAGE_SIZE_KIB,
        cpu_time_ms: (utime + stime) * 1000 / CLOCK_TICKS_PER_SEC,
    })
}

#[cfg(not(target_os = "linux"))]
pub fn read_sample() -> Option<ResourceSample> {
    None
}
