//! Worker pool for offloading CPU-bound work off the scheduler thread.
//!
//! All workers pull from one shared job queue, so whichever thread is free
//! takes the next job. Finished jobs go into a shared completion queue; the
//! scheduler turns every completion into an I/O-phase task, so results always
//! re-enter the single logical thread through a queue and never call back
//! directly.
//!
//! Idle workers and a waiting scheduler sleep on a [`Parker`]. Every push is
//! followed by an unpark, and an unpark issued before the matching park makes
//! that park return immediately, so wakeups are never lost.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};

use crossbeam_queue::SegQueue;
use crossbeam_utils::sync::{Parker, Unparker};

use crate::error::{Error, Result};
use crate::scheduler::TaskId;

/// Number of worker threads used when nothing else is configured.
pub const DEFAULT_WORKER_THREADS: usize = 4;

/// Type-erased unit of offloaded work. The boxed value is whatever the
/// submitting side knows how to downcast.
pub type Job = Box<dyn FnOnce() -> Box<dyn Any + Send> + Send>;

/// Result of one offloaded job, tagged with the id of the task that will
/// receive it.
pub struct Completion {
    pub id: TaskId,
    pub outcome: Box<dyn Any + Send>,
}

impl std::fmt::Debug for Completion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Completion")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// Wrap a fallible closure into a [`Job`] whose outcome is an
/// `anyhow::Result<T>`. Panics are caught and reported as errors so the
/// completion is never lost.
pub fn job<T, W>(work: W) -> Job
where
    T: Send + 'static,
    W: FnOnce() -> anyhow::Result<T> + Send + 'static,
{
    Box::new(move || {
        let outcome: anyhow::Result<T> = match panic::catch_unwind(AssertUnwindSafe(work)) {
            Ok(result) => result,
            Err(payload) => Err(anyhow::anyhow!(
                "offloaded work panicked: {}",
                panic_message(payload.as_ref())
            )),
        };
        Box::new(outcome)
    })
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// State shared between the pool handle and its workers.
struct Shared {
    jobs: SegQueue<(TaskId, Job)>,
    completions: SegQueue<Completion>,
    shutdown: AtomicBool,
    live_workers: AtomicUsize,
    /// Wakes the thread blocked in [`WorkerPool::recv`].
    completion_ready: Unparker,
}

/// Fixed-size pool of worker threads sharing one job queue.
pub struct WorkerPool {
    shared: Arc<Shared>,
    /// Parks the owning (scheduler) thread while it waits for completions.
    parker: Parker,
    unparkers: Vec<Unparker>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `threads` workers (at least one).
    pub fn new(threads: usize) -> Result<Self> {
        let threads = threads.max(1);
        let parker = Parker::new();
        let shared = Arc::new(Shared {
            jobs: SegQueue::new(),
            completions: SegQueue::new(),
            shutdown: AtomicBool::new(false),
            live_workers: AtomicUsize::new(0),
            completion_ready: parker.unparker().clone(),
        });

        let mut pool = Self {
            shared,
            parker,
            unparkers: Vec::with_capacity(threads),
            handles: Vec::with_capacity(threads),
        };
        for index in 0..threads {
            let worker_parker = Parker::new();
            let unparker = worker_parker.unparker().clone();
            let shared = Arc::clone(&pool.shared);
            shared.live_workers.fetch_add(1, Ordering::AcqRel);
            let spawned = thread::Builder::new()
                .name(format!("phase-worker-{index}"))
                .spawn(move || worker_loop(index, &shared, &worker_parker));
            match spawned {
                Ok(handle) => {
                    pool.unparkers.push(unparker);
                    pool.handles.push(handle);
                }
                Err(err) => {
                    pool.shared.live_workers.fetch_sub(1, Ordering::AcqRel);
                    // Dropping `pool` stops the workers spawned so far.
                    return Err(err.into());
                }
            }
        }

        tracing::debug!(event = "worker_pool.start", threads, "Worker pool started");
        Ok(pool)
    }

    /// Number of worker threads.
    #[must_use]
    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Jobs submitted but not yet picked up by a worker.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.shared.jobs.len()
    }

    /// Queue a job for the first free worker.
    pub fn submit(&self, id: TaskId, job: Job) {
        self.shared.jobs.push((id, job));
        // Any idle worker may take it; busy ones just re-check the queue.
        for unparker in &self.unparkers {
            unparker.unpark();
        }
        tracing::trace!(event = "worker_pool.submit", %id, "Job submitted");
    }

    /// Non-blocking receive of one completion.
    pub fn try_recv(&self) -> Option<Completion> {
        self.shared.completions.pop()
    }

    /// Block until one completion arrives.
    pub fn recv(&self) -> Result<Completion> {
        loop {
            if let Some(completion) = self.shared.completions.pop() {
                return Ok(completion);
            }
            if self.shared.live_workers.load(Ordering::Acquire) == 0 {
                return Err(Error::worker_pool("no worker threads left"));
            }
            self.parker.park();
        }
    }
}

fn worker_loop(index: usize, shared: &Shared, parker: &Parker) {
    while !shared.shutdown.load(Ordering::Acquire) {
        let Some((id, job)) = shared.jobs.pop() else {
            parker.park();
            continue;
        };
        tracing::trace!(event = "worker_pool.job.start", worker = index, %id, "Job started");
        let outcome = job();
        shared.completions.push(Completion { id, outcome });
        shared.completion_ready.unpark();
    }
    shared.live_workers.fetch_sub(1, Ordering::AcqRel);
    shared.completion_ready.unpark();
    tracing::trace!(event = "worker_pool.worker.exit", worker = index, "Worker exiting");
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
        for unparker in &self.unparkers {
            unparker.unpark();
        }
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("size", &self.handles.len())
            .field("queued", &self.shared.jobs.len())
            .field("completed", &self.shared.completions.len())
            .finish_non_exhaustive()
    }
}
