//! Bounded worker pool
//!
//! Workers are created lazily up to `max_workers` and reused afterwards.
//! `acquire` hands out an owned [`WorkerHandle`]; `release` consumes it, so a
//! handle cannot be released twice or used after release. When the pool is
//! saturated, callers queue and are served in strict arrival order: a released
//! handle is transferred straight to the oldest waiter without going idle.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::PoolError;
use crate::executor::TestExecutor;
use crate::models::{RunConfig, TestResult, TestUnit};

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// Worker state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Busy,
}

/// Exclusive ownership token for one execution slot
#[derive(Debug)]
pub struct WorkerHandle {
    id: usize,
    pool_id: u64,
    state: WorkerState,
    jobs_completed: u64,
}

impl WorkerHandle {
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Number of tests this worker has run
    pub fn jobs_completed(&self) -> u64 {
        self.jobs_completed
    }

    /// Run one test unit on this worker
    pub async fn run(
        &mut self,
        unit: &TestUnit,
        executor: &TestExecutor,
        config: &RunConfig,
    ) -> TestResult {
        debug!(worker = self.id, test = %unit.id, "Worker picked up test");
        let result = executor.execute(unit, config).await;
        self.jobs_completed += 1;
        result
    }
}

/// Point-in-time pool counters
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub max_workers: usize,
    pub created: usize,
    pub idle: usize,
    pub busy: usize,
    pub waiting: usize,
    /// Highest number of simultaneously busy handles observed
    pub peak_busy: usize,
    pub closed: bool,
}

#[derive(Debug, Default)]
struct PoolState {
    created: usize,
    idle: Vec<WorkerHandle>,
    waiters: VecDeque<oneshot::Sender<WorkerHandle>>,
    busy: usize,
    peak_busy: usize,
    closed: bool,
}

impl PoolState {
    fn mark_busy(&mut self) {
        self.busy += 1;
        self.peak_busy = self.peak_busy.max(self.busy);
    }
}

/// Bounded pool of worker handles with FIFO waiter queuing
#[derive(Debug)]
pub struct WorkerPool {
    id: u64,
    max_workers: usize,
    state: Mutex<PoolState>,
}

impl WorkerPool {
    /// Create a pool; `max_workers` is clamped to at least one
    pub fn new(max_workers: usize) -> Self {
        Self {
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            max_workers: max_workers.max(1),
            state: Mutex::new(PoolState::default()),
        }
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    fn state(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get a worker, waiting in line if the pool is saturated
    pub async fn acquire(&self) -> Result<WorkerHandle, PoolError> {
        let rx = {
            let mut state = self.state();
            if state.closed {
                return Err(PoolError::Closed);
            }

            if let Some(mut handle) = state.idle.pop() {
                handle.state = WorkerState::Busy;
                state.mark_busy();
                return Ok(handle);
            }

            if state.created < self.max_workers {
                state.created += 1;
                state.mark_busy();
                let handle = WorkerHandle {
                    id: state.created,
                    pool_id: self.id,
                    state: WorkerState::Busy,
                    jobs_completed: 0,
                };
                debug!(
                    worker = handle.id,
                    created = state.created,
                    max = self.max_workers,
                    "Created worker"
                );
                return Ok(handle);
            }

            let (tx, rx) = oneshot::channel();
            state.waiters.push_back(tx);
            debug!(waiting = state.waiters.len(), "Pool saturated, queued");
            rx
        };

        let mut waiter = Waiter {
            pool: self,
            rx,
            done: false,
        };
        let received = (&mut waiter.rx).await;
        waiter.done = true;
        received.map_err(|_| PoolError::Closed)
    }

    /// Return a worker, handing it to the oldest waiter if there is one
    pub fn release(&self, mut handle: WorkerHandle) {
        if handle.pool_id != self.id {
            warn!(
                worker = handle.id,
                "Ignoring release of a worker that belongs to another pool"
            );
            return;
        }

        let mut state = self.state();
        if state.closed {
            state.busy = state.busy.saturating_sub(1);
            debug!(worker = handle.id, "Discarding worker released after cleanup");
            return;
        }

        while let Some(waiter) = state.waiters.pop_front() {
            match waiter.send(handle) {
                Ok(()) => return,
                // Waiter gave up; try the next one
                Err(returned) => handle = returned,
            }
        }

        handle.state = WorkerState::Idle;
        state.busy = state.busy.saturating_sub(1);
        state.idle.push(handle);
    }

    /// Discard all workers and reject every queued waiter
    ///
    /// Cleanup is terminal: later `acquire` calls fail with [`PoolError::Closed`]
    /// and handles still in use are discarded when released. Returns the number
    /// of waiters that were rejected.
    pub fn cleanup(&self) -> usize {
        let mut state = self.state();
        state.closed = true;
        state.idle.clear();
        let rejected = state.waiters.len();
        // Dropping the senders wakes each waiter with an error
        state.waiters.clear();
        debug!(rejected, "Worker pool cleaned up");
        rejected
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.state();
        PoolStats {
            max_workers: self.max_workers,
            created: state.created,
            idle: state.idle.len(),
            busy: state.busy,
            waiting: state.waiters.len(),
            peak_busy: state.peak_busy,
            closed: state.closed,
        }
    }
}

/// Pending acquisition
///
/// If the acquiring future is dropped after a handle was transferred to it but
/// before it was observed, the handle is released again instead of leaking.
struct Waiter<'a> {
    pool: &'a WorkerPool,
    rx: oneshot::Receiver<WorkerHandle>,
    done: bool,
}

impl Drop for Waiter<'_> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        self.rx.close();
        if let Ok(handle) = self.rx.try_recv() {
            self.pool.release(handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::sleep;

    #[tokio::test]
    async fn test_lazy_creation_and_reuse() {
        let pool = WorkerPool::new(2);
        assert_eq!(pool.stats().created, 0);

        let first = pool.acquire().await.unwrap();
        assert_eq!(first.state(), WorkerState::Busy);
        let first_id = first.id();
        pool.release(first);

        let again = pool.acquire().await.unwrap();
        assert_eq!(again.id(), first_id);

        let stats = pool.stats();
        assert_eq!(stats.created, 1);
        assert_eq!(stats.busy, 1);
        pool.release(again);
        assert_eq!(pool.stats().idle, 1);
    }

    #[tokio::test]
    async fn test_never_exceeds_max_workers() {
        let pool = Arc::new(WorkerPool::new(3));
        let mut tasks = Vec::new();

        for _ in 0..12 {
            let pool = pool.clone();
            tasks.push(tokio::spawn(async move {
                let handle = pool.acquire().await.unwrap();
                sleep(Duration::from_millis(5)).await;
                pool.release(handle);
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let stats = pool.stats();
        assert_eq!(stats.created, 3);
        assert!(stats.peak_busy <= 3);
        assert_eq!(stats.busy, 0);
        assert_eq!(stats.idle, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiters_served_in_fifo_order() {
        let pool = Arc::new(WorkerPool::new(1));
        let held = pool.acquire().await.unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut tasks = Vec::new();
        for i in 0..4 {
            let worker_pool = pool.clone();
            let order = order.clone();
            tasks.push(tokio::spawn(async move {
                let handle = worker_pool.acquire().await.unwrap();
                order.lock().unwrap().push(i);
                sleep(Duration::from_millis(1)).await;
                worker_pool.release(handle);
            }));
            // Let each task enqueue before spawning the next
            while pool.stats().waiting < i + 1 {
                tokio::task::yield_now().await;
            }
        }

        pool.release(held);
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_release_transfers_without_idle() {
        let pool = Arc::new(WorkerPool::new(1));
        let held = pool.acquire().await.unwrap();
        let held_id = held.id();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire().await })
        };
        while pool.stats().waiting == 0 {
            tokio::task::yield_now().await;
        }

        pool.release(held);
        // The handle went straight to the waiter
        let stats = pool.stats();
        assert_eq!(stats.idle, 0);
        assert_eq!(stats.busy, 1);

        let handle = waiter.await.unwrap().unwrap();
        assert_eq!(handle.id(), held_id);
        assert_eq!(handle.state(), WorkerState::Busy);
    }

    #[tokio::test]
    async fn test_cancelled_waiter_is_skipped() {
        let pool = Arc::new(WorkerPool::new(1));
        let held = pool.acquire().await.unwrap();

        let abandoned = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire().await })
        };
        while pool.stats().waiting == 0 {
            tokio::task::yield_now().await;
        }
        abandoned.abort();
        let _ = abandoned.await;

        pool.release(held);
        let stats = pool.stats();
        assert_eq!(stats.idle, 1);
        assert_eq!(stats.busy, 0);
    }

    #[tokio::test]
    async fn test_cleanup_rejects_waiters() {
        let pool = Arc::new(WorkerPool::new(1));
        let held = pool.acquire().await.unwrap();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire().await })
        };
        while pool.stats().waiting == 0 {
            tokio::task::yield_now().await;
        }

        assert_eq!(pool.cleanup(), 1);
        assert_eq!(waiter.await.unwrap().unwrap_err(), PoolError::Closed);
        assert_eq!(pool.acquire().await.unwrap_err(), PoolError::Closed);

        pool.release(held);
        let stats = pool.stats();
        assert!(stats.closed);
        assert_eq!(stats.idle, 0);
        assert_eq!(stats.busy, 0);
    }

    #[tokio::test]
    async fn test_foreign_handle_is_ignored() {
        let pool_a = WorkerPool::new(1);
        let pool_b = WorkerPool::new(1);

        let handle = pool_a.acquire().await.unwrap();
        pool_b.release(handle);

        assert_eq!(pool_b.stats().idle, 0);
        assert_eq!(pool_a.stats().busy, 1);
    }

    #[test]
    fn test_saturated_acquire_wakes_on_release() {
        let pool = WorkerPool::new(1);
        let held = tokio_test::assert_ready_ok!(tokio_test::task::spawn(pool.acquire()).poll());

        let mut waiting = tokio_test::task::spawn(pool.acquire());
        tokio_test::assert_pending!(waiting.poll());
        assert_eq!(pool.stats().waiting, 1);

        pool.release(held);
        assert!(waiting.is_woken());
        let handle = tokio_test::assert_ready_ok!(waiting.poll());
        assert_eq!(handle.id(), 1);
    }
}
