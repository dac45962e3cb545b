//! Run configuration
//!
//! Parameters for one runner instance, validated before any test is dispatched.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ConfigError;

/// Delay growth between retry attempts
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    /// `base * n`
    Linear,
    /// `base * 2^(n-1)`
    Exponential,
}

impl BackoffStrategy {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "linear" => Some(BackoffStrategy::Linear),
            "exponential" | "exp" => Some(BackoffStrategy::Exponential),
            _ => None,
        }
    }
}

/// Retry backoff settings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub base_ms: u64,
    pub max_ms: u64,
    pub strategy: BackoffStrategy,
    /// Upper bound of random delay added to each wait
    pub jitter_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_ms: 1000,
            max_ms: 30_000,
            strategy: BackoffStrategy::Linear,
            jitter_ms: 0,
        }
    }
}

impl BackoffConfig {
    pub fn linear(base_ms: u64) -> Self {
        Self {
            base_ms,
            ..Self::default()
        }
    }

    pub fn exponential(base_ms: u64) -> Self {
        Self {
            base_ms,
            strategy: BackoffStrategy::Exponential,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (1-based), without jitter
    pub fn delay_for(&self, retry: u32) -> Duration {
        let retry = retry.max(1);
        let ms = match self.strategy {
            BackoffStrategy::Linear => self.base_ms.saturating_mul(retry as u64),
            BackoffStrategy::Exponential => {
                let factor = 2u64.checked_pow(retry - 1).unwrap_or(u64::MAX);
                self.base_ms.saturating_mul(factor)
            }
        };
        Duration::from_millis(ms.min(self.max_ms))
    }
}

/// Configuration for one runner instance
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Upper bound on concurrently executing tests
    pub max_workers: usize,

    /// Default per-attempt timeout
    pub timeout_ms: u64,

    /// Default retry budget
    pub retries: u32,

    /// Stop dispatching after the first failure
    pub bail: bool,

    pub cache_enabled: bool,
    pub cache_capacity: usize,

    pub backoff: BackoffConfig,

    /// Attach a performance monitor to every attempt
    pub collect_metrics: bool,
    pub monitor_interval_ms: u64,
    /// RSS alert threshold for the monitor
    pub max_rss_mib: Option<u64>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            timeout_ms: 5000,
            retries: 0,
            bail: false,
            cache_enabled: true,
            cache_capacity: 1000,
            backoff: BackoffConfig::default(),
            collect_metrics: false,
            monitor_interval_ms: 100,
            max_rss_mib: None,
        }
    }
}

impl RunConfig {
    pub fn new(max_workers: usize) -> Self {
        Self {
            max_workers,
            ..Self::default()
        }
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_bail(mut self, bail: bool) -> Self {
        self.bail = bail;
        self
    }

    pub fn with_cache(mut self, enabled: bool) -> Self {
        self.cache_enabled = enabled;
        self
    }

    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_metrics(mut self, enabled: bool) -> Self {
        self.collect_metrics = enabled;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms.max(1))
    }

    /// Reject configurations that cannot run at all
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_workers < 1 {
            return Err(ConfigError::InvalidWorkers(self.max_workers));
        }
        if self.cache_enabled && self.cache_capacity < 1 {
            return Err(ConfigError::InvalidCacheCapacity);
        }
        if self.timeout_ms == 0 {
            return Err(ConfigError::InvalidTimeout);
        }
        Ok(())
    }
}
