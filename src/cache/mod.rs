//! Result cache
//!
//! Memoizes passed results by test id with a bounded, LRU-evicted capacity.
//! Failures are never cached, so flaky or broken tests always run again.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::models::{TestResult, TestStatus};

#[derive(Debug)]
struct CacheEntry {
    result: TestResult,
    /// Recency tick of the last access
    tick: u64,
}

#[derive(Debug, Default)]
struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    /// tick -> id, oldest first
    recency: BTreeMap<u64, String>,
    next_tick: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl CacheInner {
    fn touch(&mut self, id: &str) {
        let tick = self.next_tick;
        self.next_tick += 1;
        if let Some(entry) = self.entries.get_mut(id) {
            self.recency.remove(&entry.tick);
            entry.tick = tick;
            self.recency.insert(tick, id.to_string());
        }
    }

    fn remove(&mut self, id: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(id)?;
        self.recency.remove(&entry.tick);
        Some(entry)
    }

    fn evict_lru(&mut self) -> Option<String> {
        let (_, id) = self.recency.pop_first()?;
        self.entries.remove(&id);
        self.evictions += 1;
        Some(id)
    }
}

/// Cache statistics
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

/// Bounded LRU cache of passed test results
#[derive(Debug)]
pub struct ResultCache {
    capacity: usize,
    inner: Mutex<CacheInner>,
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl ResultCache {
    /// Create a cache; `capacity` is clamped to at least one entry
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(CacheInner::default()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Lock the cache, recovering from poisoning by starting empty
    fn inner(&self) -> MutexGuard<'_, CacheInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Result cache lock was poisoned, discarding cached entries");
                let mut guard = poisoned.into_inner();
                *guard = CacheInner::default();
                self.inner.clear_poison();
                guard
            }
        }
    }

    /// Look up a result, marking it most recently used
    pub fn get(&self, id: &str) -> Option<TestResult> {
        let mut inner = self.inner();

        let consistent = inner
            .entries
            .get(id)
            .map(|entry| entry.result.id == id && entry.result.status == TestStatus::Passed);

        let Some(consistent) = consistent else {
            inner.misses += 1;
            return None;
        };

        if !consistent {
            warn!(test = id, "Dropping inconsistent cache entry");
            inner.remove(id);
            inner.misses += 1;
            return None;
        }

        inner.touch(id);
        inner.hits += 1;
        debug!(test = id, "Cache hit");
        inner.entries.get(id).map(|entry| entry.result.clone())
    }

    /// Store a result; only passed results are accepted
    ///
    /// Returns whether the result was stored.
    pub fn set(&self, id: &str, result: TestResult) -> bool {
        if result.status != TestStatus::Passed {
            debug!(test = id, status = %result.status, "Not caching non-passed result");
            return false;
        }
        if result.id != id {
            warn!(
                test = id,
                result_id = %result.id,
                "Refusing to cache result under a different id"
            );
            return false;
        }

        let mut inner = self.inner();
        if inner.remove(id).is_none() && inner.entries.len() >= self.capacity {
            if let Some(evicted) = inner.evict_lru() {
                debug!(test = %evicted, "Evicted least recently used result");
            }
        }

        let tick = inner.next_tick;
        inner.next_tick += 1;
        inner.recency.insert(tick, id.to_string());
        inner.entries.insert(id.to_string(), CacheEntry { result, tick });
        debug!(test = id, "Cache set");
        true
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner().entries.contains_key(id)
    }

    /// Remove every entry and reset statistics
    pub fn clear(&self) {
        *self.inner() = CacheInner::default();
        debug!("Cache cleared");
    }

    pub fn len(&self) -> usize {
        self.inner().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner();
        CacheStats {
            size: inner.entries.len(),
            capacity: self.capacity,
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
        }
    }
}
