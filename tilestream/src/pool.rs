//! Bounded fetch worker pool on a Tokio runtime.
//!
//! [`TokioFetchPool`] runs each [`FetchTask`] on Tokio's blocking thread
//! pool. Fetch work is ordinary synchronous I/O, so it must stay off the
//! async workers. At most `capacity` tasks are in flight at once, and a key
//! already in flight is not submitted twice.
//!
//! Outcomes are sent over an unbounded channel and collected by the render
//! thread through [`WorkerPool::drain_completed`]:
//!
//! ```text
//! render thread                    tokio runtime
//! ─────────────                    ─────────────
//! submit(task) ──spawn──────────►  spawn_blocking(task.run)
//!                                        │
//!                                  remove key from in-flight
//!                                        │
//! drain_completed() ◄──channel────  FetchOutcome
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::mpsc;

use crate::error::FetchError;
use crate::request::{FetchOutcome, FetchTask, SubmitStatus, WorkerPool};
use crate::tile::TileKey;

/// Default number of concurrent fetches.
pub const DEFAULT_POOL_CAPACITY: usize = 16;

/// Counters describing pool activity since creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub submitted: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub rejected: u64,
    pub in_flight: usize,
}

#[derive(Debug, Default)]
struct PoolCounters {
    submitted: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    rejected: AtomicU64,
}

/// Worker pool that executes fetch tasks on a Tokio runtime.
pub struct TokioFetchPool {
    handle: Handle,
    capacity: usize,
    in_flight: Arc<DashMap<TileKey, ()>>,
    completed_tx: mpsc::UnboundedSender<FetchOutcome>,
    completed_rx: Mutex<mpsc::UnboundedReceiver<FetchOutcome>>,
    counters: Arc<PoolCounters>,
}

impl TokioFetchPool {
    /// Creates a pool that spawns onto `handle` with at most `capacity`
    /// tasks in flight.
    pub fn new(handle: Handle, capacity: usize) -> Self {
        let (completed_tx, completed_rx) = mpsc::unbounded_channel();

        tracing::info!(capacity, "Fetch pool created");

        Self {
            handle,
            capacity: capacity.max(1),
            in_flight: Arc::new(DashMap::new()),
            completed_tx,
            completed_rx: Mutex::new(completed_rx),
            counters: Arc::new(PoolCounters::default()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of tasks currently running.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Returns true if a task for `key` is running.
    pub fn is_in_flight(&self, key: &TileKey) -> bool {
        self.in_flight.contains_key(key)
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            succeeded: self.counters.succeeded.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
            in_flight: self.in_flight(),
        }
    }
}

impl WorkerPool for TokioFetchPool {
    fn is_full(&self) -> bool {
        self.in_flight.len() >= self.capacity
    }

    fn submit(&self, task: FetchTask) -> SubmitStatus {
        if self.is_full() {
            self.counters.rejected.fetch_add(1, Ordering::Relaxed);
            return SubmitStatus::Rejected;
        }

        let key = task.key().clone();
        if self.in_flight.insert(key.clone(), ()).is_some() {
            return SubmitStatus::AlreadyInFlight;
        }
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);

        let in_flight = Arc::clone(&self.in_flight);
        let counters = Arc::clone(&self.counters);
        let completed_tx = self.completed_tx.clone();

        self.handle.spawn(async move {
            let outcome = match tokio::task::spawn_blocking(move || task.run()).await {
                Ok(outcome) => outcome,
                Err(e) => FetchOutcome {
                    key: key.clone(),
                    result: Err(FetchError::Other(format!("fetch task aborted: {}", e))),
                },
            };

            match &outcome.result {
                Ok(()) => {
                    counters.succeeded.fetch_add(1, Ordering::Relaxed);
                    tracing::trace!(key = %key, "Fetch succeeded");
                }
                Err(e) => {
                    counters.failed.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(key = %key, error = %e, "Fetch failed");
                }
            }

            in_flight.remove(&key);
            // The receiver lives as long as the pool; a closed channel only
            // means the pool was dropped while this task ran.
            let _ = completed_tx.send(outcome);
        });

        SubmitStatus::Accepted
    }

    fn drain_completed(&self) -> Vec<FetchOutcome> {
        let mut rx = self.completed_rx.lock();
        let mut outcomes = Vec::new();
        while let Ok(outcome) = rx.try_recv() {
            outcomes.push(outcome);
        }
        outcomes
    }
}

impl std::fmt::Debug for TokioFetchPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokioFetchPool")
            .field("capacity", &self.capacity)
            .field("in_flight", &self.in_flight.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc as std_mpsc;
    use std::time::Duration;

    fn key(row: i32) -> TileKey {
        TileKey::new(1, row, 0, "test/1")
    }

    async fn drain_until(pool: &TokioFetchPool, expected: usize) -> Vec<FetchOutcome> {
        let mut outcomes = Vec::new();
        for _ in 0..500 {
            outcomes.extend(pool.drain_completed());
            if outcomes.len() >= expected {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        outcomes
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_submitted_task_reports_success() {
        let pool = TokioFetchPool::new(Handle::current(), 4);

        let status = pool.submit(FetchTask::new(key(0), || Ok(())));
        assert_eq!(status, SubmitStatus::Accepted);

        let outcomes = drain_until(&pool, 1).await;
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].is_success());
        assert_eq!(outcomes[0].key, key(0));
        assert_eq!(pool.in_flight(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_failed_task_reports_error() {
        let pool = TokioFetchPool::new(Handle::current(), 4);
        pool.submit(FetchTask::new(key(0), || {
            Err(FetchError::NotFound("missing".into()))
        }));

        let outcomes = drain_until(&pool, 1).await;
        assert!(matches!(outcomes[0].result, Err(FetchError::NotFound(_))));
        assert_eq!(pool.stats().failed, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_pool_bounds_in_flight_and_rejects_duplicates() {
        let pool = TokioFetchPool::new(Handle::current(), 2);
        let (release_tx, release_rx) = std_mpsc::channel::<()>();
        let release_rx = Arc::new(Mutex::new(release_rx));

        let blocking = |row: i32| {
            let rx = Arc::clone(&release_rx);
            FetchTask::new(key(row), move || {
                let _ = rx.lock().recv_timeout(Duration::from_secs(5));
                Ok(())
            })
        };

        assert_eq!(pool.submit(blocking(0)), SubmitStatus::Accepted);
        assert_eq!(pool.submit(blocking(0)), SubmitStatus::AlreadyInFlight);
        assert_eq!(pool.submit(blocking(1)), SubmitStatus::Accepted);
        assert!(pool.is_full());
        assert_eq!(pool.submit(blocking(2)), SubmitStatus::Rejected);
        assert!(pool.is_in_flight(&key(1)));

        release_tx.send(()).unwrap();
        release_tx.send(()).unwrap();

        let outcomes = drain_until(&pool, 2).await;
        assert_eq!(outcomes.len(), 2);
        assert!(!pool.is_full());

        let stats = pool.stats();
        assert_eq!(stats.submitted, 2);
        assert_eq!(stats.succeeded, 2);
        assert_eq!(stats.rejected, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_panicking_task_is_reported_as_failure() {
        let pool = TokioFetchPool::new(Handle::current(), 2);
        pool.submit(FetchTask::new(key(3), || panic!("boom")));

        let outcomes = drain_until(&pool, 1).await;
        assert_eq!(outcomes[0].key, key(3));
        assert!(matches!(outcomes[0].result, Err(FetchError::Other(_))));
        assert!(!pool.is_in_flight(&key(3)));
    }

    #[test]
    fn test_drain_is_empty_without_work() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        let pool = TokioFetchPool::new(runtime.handle().clone(), 1);
        assert!(pool.drain_completed().is_empty());
        assert!(!pool.is_full());
    }
}
