//! Two-priority task scheduler with bounded concurrency and per-task timeouts.
//!
//! Every embedding call goes through this scheduler. Interactive queries are
//! submitted at [`Priority::High`] and bulk indexing at [`Priority::Normal`].
//! Dequeueing is strict priority: a `High` task always starts before any
//! queued `Normal` task, so a query waits at most for the tasks currently
//! running. A continuous stream of `High` tasks starves `Normal` ones
//! indefinitely; indexing is not latency-critical.
//!
//! # Task lifecycle
//!
//! `Queued -> Running -> {Settled, TimedOut, Failed}`
//!
//! # Timeouts and detached work
//!
//! A running task is spawned onto the runtime and raced against its timer.
//! When the timer wins, the caller receives [`EngineError::TaskTimeout`] and
//! the slot is released, but the spawned work is *not* cancelled: the
//! embedding backends expose no cancellation hook, so the computation runs to
//! completion and its result is discarded. Under sustained timeout pressure
//! these detached tasks pile up and hold CPU and memory. Callers must treat a
//! timeout as "result unknown", never as "no match".

use crate::{EngineError, EngineResult};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Scheduling priority of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Normal,
}

/// How a task left the `Running` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskOutcome {
    Settled,
    TimedOut,
    Failed,
    /// The caller dropped its handle before the task started
    Abandoned,
}

type Job = Pin<Box<dyn Future<Output = TaskOutcome> + Send>>;

#[derive(Default)]
struct Queues {
    high: VecDeque<Job>,
    normal: VecDeque<Job>,
    running: usize,
}

impl Queues {
    fn next(&mut self) -> Option<Job> {
        self.high.pop_front().or_else(|| self.normal.pop_front())
    }
}

#[derive(Default)]
struct Counters {
    settled: AtomicU64,
    timed_out: AtomicU64,
    failed: AtomicU64,
    abandoned: AtomicU64,
}

struct Inner {
    queues: Mutex<Queues>,
    max_concurrency: usize,
    counters: Counters,
}

/// Point-in-time view of the scheduler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    pub queued_high: usize,
    pub queued_normal: usize,
    pub running: usize,
    pub settled: u64,
    pub timed_out: u64,
    pub failed: u64,
    pub abandoned: u64,
}

/// Handle to a submitted task; resolves when the task settles or times out.
#[must_use = "a task handle does nothing unless awaited"]
pub struct TaskHandle<T> {
    rx: oneshot::Receiver<EngineResult<T>>,
}

impl<T> Future for TaskHandle<T> {
    type Output = EngineResult<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|received| {
            received.unwrap_or_else(|_| {
                Err(EngineError::TaskFailed(
                    "scheduler dropped the task before it settled".to_string(),
                ))
            })
        })
    }
}

/// Priority work queue. Cheap to clone; clones share the same queues.
#[derive(Clone)]
pub struct TaskScheduler {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for TaskScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskScheduler")
            .field("max_concurrency", &self.inner.max_concurrency)
            .field("stats", &self.stats())
            .finish()
    }
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::new(1)
    }
}

impl TaskScheduler {
    /// Create a scheduler running at most `max_concurrency` tasks at once.
    ///
    /// The embedding backends are not proven reentrant, so the engine uses 1.
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                queues: Mutex::new(Queues::default()),
                max_concurrency: max_concurrency.max(1),
                counters: Counters::default(),
            }),
        }
    }

    /// Enqueue `work` and return a handle to its result.
    ///
    /// The task is queued synchronously, so submission order within a
    /// priority is FIFO. Must be called from within a Tokio runtime.
    pub fn submit<T, F>(&self, priority: Priority, timeout: Duration, work: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: Future<Output = EngineResult<T>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();

        if timeout.is_zero() {
            let _ = tx.send(Err(EngineError::Config(
                "task timeout must be positive".to_string(),
            )));
            return TaskHandle { rx };
        }

        let timeout_ms = timeout.as_millis() as u64;
        let job: Job = Box::pin(async move {
            if tx.is_closed() {
                return TaskOutcome::Abandoned;
            }

            let work = tokio::spawn(work);
            // Dropping the JoinHandle on timeout detaches the work; it is not aborted
            let (result, outcome) = match tokio::time::timeout(timeout, work).await {
                Ok(Ok(Ok(value))) => (Ok(value), TaskOutcome::Settled),
                Ok(Ok(Err(e))) => (Err(e), TaskOutcome::Failed),
                Ok(Err(join_error)) => (
                    Err(EngineError::TaskFailed(join_error.to_string())),
                    TaskOutcome::Failed,
                ),
                Err(_) => (
                    Err(EngineError::TaskTimeout { timeout_ms }),
                    TaskOutcome::TimedOut,
                ),
            };

            if outcome == TaskOutcome::TimedOut {
                warn!(timeout_ms, "task timed out; its work continues detached");
            }
            let _ = tx.send(result);
            outcome
        });

        {
            let mut queues = self.inner.queues.lock();
            match priority {
                Priority::High => queues.high.push_back(job),
                Priority::Normal => queues.normal.push_back(job),
            }
        }
        debug!(?priority, "task queued");

        Self::pump(&self.inner);
        TaskHandle { rx }
    }

    /// Start queued tasks while there is free capacity.
    fn pump(inner: &Arc<Inner>) {
        loop {
            let job = {
                let mut queues = inner.queues.lock();
                if queues.running >= inner.max_concurrency {
                    return;
                }
                match queues.next() {
                    Some(job) => {
                        queues.running += 1;
                        job
                    }
                    None => return,
                }
            };

            let inner = Arc::clone(inner);
            tokio::spawn(async move {
                let outcome = job.await;
                inner.record(outcome);
                inner.queues.lock().running -= 1;
                // Settled: immediately try the next task
                Self::pump(&inner);
            });
        }
    }

    /// Current queue depths and lifetime counters.
    pub fn stats(&self) -> SchedulerStats {
        let queues = self.inner.queues.lock();
        let counters = &self.inner.counters;
        SchedulerStats {
            queued_high: queues.high.len(),
            queued_normal: queues.normal.len(),
            running: queues.running,
            settled: counters.settled.load(Ordering::Relaxed),
            timed_out: counters.timed_out.load(Ordering::Relaxed),
            failed: counters.failed.load(Ordering::Relaxed),
            abandoned: counters.abandoned.load(Ordering::Relaxed),
        }
    }

    pub fn max_concurrency(&self) -> usize {
        self.inner.max_concurrency
    }
}

impl Inner {
    fn record(&self, outcome: TaskOutcome) {
        let counter = match outcome {
            TaskOutcome::Settled => &self.counters.settled,
            TaskOutcome::TimedOut => &self.counters.timed_out,
            TaskOutcome::Failed => &self.counters.failed,
            TaskOutcome::Abandoned => &self.counters.abandoned,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}
