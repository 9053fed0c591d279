//! Fetch requests, the per-frame request queue, and the worker pool seam.
//!
//! The assembler offers [`FetchTask`]s to a bounded [`RequestQueue`] while
//! it traverses. After drawing, the driver flushes the queue into a
//! [`WorkerPool`]:
//!
//! ```text
//!  assembler ──offer──► RequestQueue (≤ capacity, dedup by key)
//!                            │ flush (after draw)
//!                            ▼
//!                   sort by RequestOrder
//!                            │
//!            ┌───────────────┴───────────────┐
//!            │ pool.is_full()?               │
//!            │   no  → submit, next          │
//!            │   yes → discard the remainder │
//!            └───────────────────────────────┘
//! ```
//!
//! The queue is a single-frame scratch buffer: whatever is not dispatched
//! is discarded. Discarded and overflowed requests are not lost work; the
//! tiles fail their residency check again next frame and are re-offered.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use crate::error::FetchError;
use crate::tile::TileKey;

/// Default maximum number of requests queued per frame.
pub const DEFAULT_QUEUE_CAPACITY: usize = 200;

// =============================================================================
// Fetch Task
// =============================================================================

/// Work that loads one tile's content into the content cache.
pub type FetchWork = Box<dyn FnOnce() -> Result<(), FetchError> + Send + 'static>;

/// A request to load one tile's content off the render thread.
///
/// The work closure is opaque to the engine. It must be idempotent: a tile
/// may be requested again before an earlier request's result is observed.
pub struct FetchTask {
    key: TileKey,
    priority: f64,
    work: FetchWork,
}

impl FetchTask {
    /// Creates a task whose priority is the tile's level number.
    pub fn new<F>(key: TileKey, work: F) -> Self
    where
        F: FnOnce() -> Result<(), FetchError> + Send + 'static,
    {
        let priority = key.level() as f64;
        Self {
            key,
            priority,
            work: Box::new(work),
        }
    }

    /// Overrides the priority (higher values dispatch first under
    /// [`RequestOrder::HighestPriority`]).
    pub fn with_priority(mut self, priority: f64) -> Self {
        self.priority = priority;
        self
    }

    pub fn key(&self) -> &TileKey {
        &self.key
    }

    pub fn priority(&self) -> f64 {
        self.priority
    }

    /// Executes the work on the calling thread.
    pub fn run(self) -> FetchOutcome {
        let result = (self.work)();
        FetchOutcome {
            key: self.key,
            result,
        }
    }
}

impl fmt::Debug for FetchTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchTask")
            .field("key", &self.key)
            .field("priority", &self.priority)
            .finish()
    }
}

/// Result of a dispatched fetch, reported back to the render thread.
#[derive(Debug)]
pub struct FetchOutcome {
    pub key: TileKey,
    pub result: Result<(), FetchError>,
}

impl FetchOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

// =============================================================================
// Ordering
// =============================================================================

/// Comparator used by [`RequestOrder::Custom`].
pub type RequestComparator = Arc<dyn Fn(&FetchTask, &FetchTask) -> Ordering + Send + Sync>;

/// Order in which queued requests are dispatched.
#[derive(Clone, Default)]
pub enum RequestOrder {
    /// Traversal order: tiles nearer the view's start are enqueued first.
    #[default]
    Fifo,
    /// Lower level numbers first.
    CoarsestFirst,
    /// Higher level numbers first.
    FinestFirst,
    /// Higher task priority first.
    HighestPriority,
    /// Caller-supplied comparator.
    Custom(RequestComparator),
}

impl RequestOrder {
    fn sort(&self, tasks: &mut [FetchTask]) {
        // All sorts are stable, so ties keep traversal order.
        match self {
            RequestOrder::Fifo => {}
            RequestOrder::CoarsestFirst => tasks.sort_by_key(|t| t.key.level()),
            RequestOrder::FinestFirst => {
                tasks.sort_by_key(|t| std::cmp::Reverse(t.key.level()));
            }
            RequestOrder::HighestPriority => {
                tasks.sort_by(|a, b| b.priority.total_cmp(&a.priority));
            }
            RequestOrder::Custom(compare) => tasks.sort_by(|a, b| compare(a, b)),
        }
    }

    /// Configuration name of the order; `None` for a custom comparator.
    pub fn name(&self) -> Option<&'static str> {
        match self {
            RequestOrder::Fifo => Some("fifo"),
            RequestOrder::CoarsestFirst => Some("coarsest"),
            RequestOrder::FinestFirst => Some("finest"),
            RequestOrder::HighestPriority => Some("priority"),
            RequestOrder::Custom(_) => None,
        }
    }

    /// Parses a configuration name (`fifo`, `coarsest`, `finest`, `priority`).
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "fifo" => Some(Self::Fifo),
            "coarsest" | "coarsest_first" => Some(Self::CoarsestFirst),
            "finest" | "finest_first" => Some(Self::FinestFirst),
            "priority" | "highest_priority" => Some(Self::HighestPriority),
            _ => None,
        }
    }
}

impl fmt::Debug for RequestOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestOrder::Fifo => write!(f, "Fifo"),
            RequestOrder::CoarsestFirst => write!(f, "CoarsestFirst"),
            RequestOrder::FinestFirst => write!(f, "FinestFirst"),
            RequestOrder::HighestPriority => write!(f, "HighestPriority"),
            RequestOrder::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

// =============================================================================
// Worker Pool
// =============================================================================

/// Result of submitting a task to a worker pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitStatus {
    /// The task will run.
    Accepted,
    /// A task for the same key is already running; this one was dropped.
    AlreadyInFlight,
    /// The pool had no capacity; the task was dropped.
    Rejected,
}

/// Executor that runs fetch tasks off the render thread.
///
/// Implementations must be bounded: `is_full` reports when no further
/// tasks should be submitted this frame. Completed tasks are reported
/// through `drain_completed`, which the driver calls on the render thread.
pub trait WorkerPool: Send + Sync {
    /// Returns true when the pool has no spare capacity.
    fn is_full(&self) -> bool;

    /// Submits a task for execution.
    fn submit(&self, task: FetchTask) -> SubmitStatus;

    /// Returns outcomes of tasks completed since the last call.
    fn drain_completed(&self) -> Vec<FetchOutcome>;
}

impl<T: WorkerPool + ?Sized> WorkerPool for Arc<T> {
    fn is_full(&self) -> bool {
        (**self).is_full()
    }

    fn submit(&self, task: FetchTask) -> SubmitStatus {
        (**self).submit(task)
    }

    fn drain_completed(&self) -> Vec<FetchOutcome> {
        (**self).drain_completed()
    }
}

// =============================================================================
// Request Queue
// =============================================================================

/// Result of offering a task to the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueStatus {
    Queued,
    /// A request for the same key is already queued this frame.
    Duplicate,
    /// The queue is at capacity.
    Dropped,
}

/// Counters from one flush of the queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Tasks accepted by the pool.
    pub dispatched: usize,
    /// Tasks the pool reported as already in flight.
    pub in_flight: usize,
    /// Tasks left undispatched because the pool was full.
    pub discarded: usize,
    /// Offers dropped this frame because the queue was at capacity.
    pub overflowed: usize,
}

/// Bounded, ordered, single-frame collection of pending fetch tasks.
pub struct RequestQueue {
    capacity: usize,
    order: RequestOrder,
    tasks: Vec<FetchTask>,
    queued: HashSet<TileKey>,
    overflowed: usize,
}

impl RequestQueue {
    /// Creates a queue holding at most `capacity` tasks.
    pub fn new(capacity: usize, order: RequestOrder) -> Self {
        Self {
            capacity,
            order,
            tasks: Vec::with_capacity(capacity),
            queued: HashSet::with_capacity(capacity),
            overflowed: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn order(&self) -> &RequestOrder {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Returns true if a request for `key` is queued.
    pub fn contains(&self, key: &TileKey) -> bool {
        self.queued.contains(key)
    }

    /// Keys in the queue, in the order they were offered.
    pub fn keys(&self) -> impl Iterator<Item = &TileKey> {
        self.tasks.iter().map(FetchTask::key)
    }

    /// Offers a task; it is dropped if the queue is full or already holds
    /// a request for the same key.
    pub fn offer(&mut self, task: FetchTask) -> EnqueueStatus {
        if self.queued.contains(task.key()) {
            return EnqueueStatus::Duplicate;
        }
        if self.tasks.len() >= self.capacity {
            self.overflowed += 1;
            tracing::trace!(key = %task.key(), "Request queue full, dropping request");
            return EnqueueStatus::Dropped;
        }
        self.queued.insert(task.key().clone());
        self.tasks.push(task);
        EnqueueStatus::Queued
    }

    /// Dispatches queued tasks into `pool` until it is full, then clears
    /// the queue.
    pub fn flush(&mut self, pool: &dyn WorkerPool) -> DispatchStats {
        let mut stats = DispatchStats {
            overflowed: std::mem::take(&mut self.overflowed),
            ..DispatchStats::default()
        };

        self.order.sort(&mut self.tasks);

        let mut pending = self.tasks.drain(..);
        while let Some(task) = pending.next() {
            if pool.is_full() {
                stats.discarded += 1 + pending.len();
                break;
            }
            match pool.submit(task) {
                SubmitStatus::Accepted => stats.dispatched += 1,
                SubmitStatus::AlreadyInFlight => stats.in_flight += 1,
                SubmitStatus::Rejected => {
                    // The pool filled up between the check and the submit.
                    stats.discarded += 1 + pending.len();
                    break;
                }
            }
        }
        drop(pending);
        self.queued.clear();

        stats
    }

    /// Discards all queued tasks without dispatching.
    pub fn clear(&mut self) {
        self.tasks.clear();
        self.queued.clear();
        self.overflowed = 0;
    }
}

impl fmt::Debug for RequestQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestQueue")
            .field("len", &self.tasks.len())
            .field("capacity", &self.capacity)
            .field("order", &self.order)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
