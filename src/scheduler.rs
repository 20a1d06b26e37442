//! Deterministic cooperative phase scheduler.
//!
//! Queue model:
//! - next-tick and microtask queues, drained to a joint fixed point
//! - a timer heap ordered by `(deadline, seq)` against a logical clock
//! - I/O, immediate (check) and close queues, FIFO
//!
//! One outer pass runs: microtask drain, timer phase, I/O phase, immediate
//! phase, close phase. Every task of a macrotask phase is followed by a full
//! microtask drain.
//!
//! # Invariants
//!
//! - a task leaves its queue before it executes
//! - next-tick + microtask queues drain to empty before any macrotask phase
//!   and after every macrotask
//! - timers with equal deadlines fire in increasing seq order
//! - tasks run one at a time; `run()` inside a task is rejected
//! - timers, I/O, immediates and close callbacks enqueued during their own
//!   phase wait for the next pass

use std::any::Any;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::worker_pool::{self, Completion, DEFAULT_WORKER_THREADS, WorkerPool};

/// Monotonically increasing sequence counter for deterministic ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Seq(u64);

impl Seq {
    /// Create the initial sequence value.
    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }

    /// Get the next sequence value, incrementing the counter.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Get the raw value.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Seq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seq:{}", self.0)
    }
}

/// Handle returned by every enqueue call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct TaskId(u64);

impl TaskId {
    pub(crate) const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw value.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task:{}", self.0)
    }
}

/// The queue a task was enqueued into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    NextTick,
    Microtask,
    Timer,
    Io,
    Immediate,
    Close,
}

impl Phase {
    /// All phases in precedence order.
    pub const ALL: [Self; 6] = [
        Self::NextTick,
        Self::Microtask,
        Self::Timer,
        Self::Io,
        Self::Immediate,
        Self::Close,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NextTick => "next_tick",
            Self::Microtask => "microtask",
            Self::Timer => "timer",
            Self::Io => "io",
            Self::Immediate => "immediate",
            Self::Close => "close",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How next-tick work discovered while draining microtasks is scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MicrotaskPolicy {
    /// Re-check the next-tick queue after every microtask.
    #[default]
    TickFirst,
    /// Finish the whole microtask queue, including microtasks added while
    /// draining, before the next-tick queue is checked again.
    Batch,
}

impl MicrotaskPolicy {
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "tick-first" | "tick_first" | "interleaved" => Some(Self::TickFirst),
            "batch" | "batched" | "host" => Some(Self::Batch),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TickFirst => "tick-first",
            Self::Batch => "batch",
        }
    }
}

/// Resolved scheduler settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SchedulerOptions {
    pub microtask_policy: MicrotaskPolicy,
    /// Threads spawned for `offload` (created on first use).
    pub worker_threads: usize,
    /// Abort `run()` once this many tasks have executed.
    pub max_tasks: Option<u64>,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            microtask_policy: MicrotaskPolicy::default(),
            worker_threads: DEFAULT_WORKER_THREADS,
            max_tasks: None,
        }
    }
}

type TaskFn = Box<dyn FnOnce(&mut Scheduler) -> anyhow::Result<()>>;
type IntervalFn = Box<dyn FnMut(&mut Scheduler) -> anyhow::Result<()>>;
type Continuation = Box<dyn FnOnce(&mut Scheduler, Box<dyn Any + Send>) -> anyhow::Result<()>>;

/// Phases backed by a plain FIFO queue. Timers live in the heap instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Queue {
    NextTick,
    Microtask,
    Io,
    Immediate,
    Close,
}

impl Queue {
    const fn phase(self) -> Phase {
        match self {
            Self::NextTick => Phase::NextTick,
            Self::Microtask => Phase::Microtask,
            Self::Io => Phase::Io,
            Self::Immediate => Phase::Immediate,
            Self::Close => Phase::Close,
        }
    }
}

struct Task {
    id: TaskId,
    seq: Seq,
    phase: Phase,
    callback: TaskFn,
}

enum TimerCallback {
    Once(TaskFn),
    Repeat { interval: u64, callback: IntervalFn },
}

/// A timer entry in the timer heap.
struct TimerEntry {
    id: TaskId,
    /// Absolute deadline on the logical clock.
    deadline: u64,
    seq: Seq,
    callback: TimerCallback,
}

// Order by (deadline, seq) ascending - min-heap needs reversed comparison.
impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        match other.deadline.cmp(&self.deadline) {
            Ordering::Equal => other.seq.cmp(&self.seq),
            ord => ord,
        }
    }
}

/// Interval currently executing; lets its callback stop its own re-arm.
#[derive(Debug, Clone, Copy)]
struct ActiveInterval {
    id: TaskId,
    cancelled: bool,
}

/// One executed task, in execution order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionRecord {
    pub id: TaskId,
    pub phase: Phase,
    pub seq: Seq,
    /// Logical clock value when the task started.
    pub clock: u64,
}

/// A task that returned an error or panicked. The run continued past it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskFailure {
    pub id: TaskId,
    pub phase: Phase,
    pub message: String,
}

/// Everything observable about one `run()`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub executed: Vec<ExecutionRecord>,
    /// Lines passed to [`Scheduler::emit`], in order.
    pub output: Vec<String>,
    pub failures: Vec<TaskFailure>,
    /// Outer loop iterations.
    pub passes: u64,
    /// Logical clock when the run finished.
    pub clock: u64,
}

impl RunReport {
    #[must_use]
    pub fn executed_count(&self) -> usize {
        self.executed.len()
    }

    /// True when no task failed.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// The cooperative phase scheduler.
pub struct Scheduler {
    options: SchedulerOptions,
    /// Monotone sequence counter.
    seq: Seq,
    next_task_id: u64,
    /// Logical clock, in ticks.
    clock: u64,
    running: bool,
    next_ticks: VecDeque<Task>,
    microtasks: VecDeque<Task>,
    /// Timer heap (min-heap by deadline, seq).
    timer_heap: BinaryHeap<TimerEntry>,
    /// Cancelled timer IDs still sitting in the heap.
    cancelled_timers: HashSet<TaskId>,
    io: VecDeque<Task>,
    immediates: VecDeque<Task>,
    close: VecDeque<Task>,
    active_interval: Option<ActiveInterval>,
    pool: Option<WorkerPool>,
    /// Offloaded work still in flight, keyed by the id `offload` returned.
    continuations: HashMap<TaskId, Continuation>,
    output: Vec<String>,
    executed: Vec<ExecutionRecord>,
    failures: Vec<TaskFailure>,
    passes: u64,
    tasks_this_run: u64,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    /// Create a scheduler with default options.
    #[must_use]
    pub fn new() -> Self {
        Self::with_options(SchedulerOptions::default())
    }

    #[must_use]
    pub fn with_options(options: SchedulerOptions) -> Self {
        Self {
            options,
            seq: Seq::zero(),
            next_task_id: 1,
            clock: 0,
            running: false,
            next_ticks: VecDeque::new(),
            microtasks: VecDeque::new(),
            timer_heap: BinaryHeap::new(),
            cancelled_timers: HashSet::new(),
            io: VecDeque::new(),
            immediates: VecDeque::new(),
            close: VecDeque::new(),
            active_interval: None,
            pool: None,
            continuations: HashMap::new(),
            output: Vec::new(),
            executed: Vec::new(),
            failures: Vec::new(),
            passes: 0,
            tasks_this_run: 0,
        }
    }

    #[must_use]
    pub const fn options(&self) -> &SchedulerOptions {
        &self.options
    }

    /// Get the current sequence number.
    #[must_use]
    pub const fn current_seq(&self) -> Seq {
        self.seq
    }

    /// Get the next sequence number and increment the counter.
    const fn next_seq(&mut self) -> Seq {
        let current = self.seq;
        self.seq = self.seq.next();
        current
    }

    const fn next_id(&mut self) -> TaskId {
        let id = TaskId(self.next_task_id);
        self.next_task_id += 1;
        id
    }

    /// Current logical clock value.
    #[must_use]
    pub const fn now(&self) -> u64 {
        self.clock
    }

    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.running
    }

    /// Number of live (not cancelled) timers and intervals.
    #[must_use]
    pub fn timer_count(&self) -> usize {
        self.timer_heap.len() - self.cancelled_timers.len()
    }

    #[must_use]
    pub fn pending_count(&self, phase: Phase) -> usize {
        match phase {
            Phase::NextTick => self.next_ticks.len(),
            Phase::Microtask => self.microtasks.len(),
            Phase::Timer => self.timer_count(),
            Phase::Io => self.io.len(),
            Phase::Immediate => self.immediates.len(),
            Phase::Close => self.close.len(),
        }
    }

    /// Offloaded jobs whose completion has not been delivered yet.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.continuations.len()
    }

    /// Id of the interval whose callback is executing right now.
    #[must_use]
    pub fn current_interval(&self) -> Option<TaskId> {
        self.active_interval.map(|active| active.id)
    }

    /// Check if any work remains, including offloaded work.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        Phase::ALL.iter().any(|&phase| self.pending_count(phase) > 0) || self.in_flight() > 0
    }

    /// Get the deadline of the next live timer, if any.
    #[must_use]
    pub fn next_timer_deadline(&self) -> Option<u64> {
        self.timer_heap
            .iter()
            .filter(|entry| !self.cancelled_timers.contains(&entry.id))
            .map(|entry| entry.deadline)
            .min()
    }

    /// Append a line to the ordered output.
    pub fn emit(&mut self, line: impl Into<String>) {
        let line = line.into();
        tracing::debug!(event = "scheduler.emit", clock = self.clock, line = %line);
        self.output.push(line);
    }

    /// Output emitted since the last completed run.
    #[must_use]
    pub fn output(&self) -> &[String] {
        &self.output
    }

    /// Drain the output emitted since the last report.
    pub fn take_output(&mut self) -> Vec<String> {
        std::mem::take(&mut self.output)
    }

    fn fifo_queue(&mut self, queue: Queue) -> &mut VecDeque<Task> {
        match queue {
            Queue::NextTick => &mut self.next_ticks,
            Queue::Microtask => &mut self.microtasks,
            Queue::Io => &mut self.io,
            Queue::Immediate => &mut self.immediates,
            Queue::Close => &mut self.close,
        }
    }

    fn push_task(&mut self, queue: Queue, callback: TaskFn) -> TaskId {
        let id = self.next_id();
        let seq = self.next_seq();
        let phase = queue.phase();
        self.fifo_queue(queue).push_back(Task {
            id,
            seq,
            phase,
            callback,
        });
        tracing::trace!(
            event = "scheduler.task.enqueue",
            %id,
            phase = phase.as_str(),
            %seq,
            "Task enqueued"
        );
        id
    }

    pub fn next_tick<F>(&mut self, task: F) -> TaskId
    where
        F: FnOnce(&mut Self) -> anyhow::Result<()> + 'static,
    {
        self.push_task(Queue::NextTick, Box::new(task))
    }

    pub fn queue_microtask<F>(&mut self, task: F) -> TaskId
    where
        F: FnOnce(&mut Self) -> anyhow::Result<()> + 'static,
    {
        self.push_task(Queue::Microtask, Box::new(task))
    }

    pub fn set_immediate<F>(&mut self, task: F) -> TaskId
    where
        F: FnOnce(&mut Self) -> anyhow::Result<()> + 'static,
    {
        self.push_task(Queue::Immediate, Box::new(task))
    }

    /// Queue a completed I/O callback for the next I/O phase.
    pub fn queue_io<F>(&mut self, task: F) -> TaskId
    where
        F: FnOnce(&mut Self) -> anyhow::Result<()> + 'static,
    {
        self.push_task(Queue::Io, Box::new(task))
    }

    /// Queue a close callback, run after the immediate phase.
    pub fn on_close<F>(&mut self, task: F) -> TaskId
    where
        F: FnOnce(&mut Self) -> anyhow::Result<()> + 'static,
    {
        self.push_task(Queue::Close, Box::new(task))
    }

    fn checked_delay(delay: i64) -> Result<u64> {
        u64::try_from(delay).map_err(|_| Error::NegativeDelay { delay })
    }

    fn arm_timer(&mut self, id: TaskId, delay: u64, callback: TimerCallback) {
        let deadline = self.clock.saturating_add(delay);
        let seq = self.next_seq();
        self.timer_heap.push(TimerEntry {
            id,
            deadline,
            seq,
            callback,
        });
        tracing::trace!(
            event = "scheduler.timer.set",
            %id,
            delay,
            deadline,
            %seq,
            "Timer scheduled"
        );
    }

    /// Schedule `task` to run once `delay` ticks have elapsed on the logical
    /// clock. A negative delay is rejected.
    pub fn set_timeout<F>(&mut self, delay: i64, task: F) -> Result<TaskId>
    where
        F: FnOnce(&mut Self) -> anyhow::Result<()> + 'static,
    {
        let delay = Self::checked_delay(delay)?;
        let id = self.next_id();
        self.arm_timer(id, delay, TimerCallback::Once(Box::new(task)));
        Ok(id)
    }

    /// Schedule `task` every `delay` ticks until cancelled.
    pub fn set_interval<F>(&mut self, delay: i64, task: F) -> Result<TaskId>
    where
        F: FnMut(&mut Self) -> anyhow::Result<()> + 'static,
    {
        let interval = Self::checked_delay(delay)?;
        let id = self.next_id();
        self.arm_timer(
            id,
            interval,
            TimerCallback::Repeat {
                interval,
                callback: Box::new(task),
            },
        );
        Ok(id)
    }

    /// Run `work` on the worker pool and deliver its result to `on_complete`
    /// as an I/O-phase task.
    pub fn offload<T, W, C>(&mut self, work: W, on_complete: C) -> Result<TaskId>
    where
        T: Send + 'static,
        W: FnOnce() -> anyhow::Result<T> + Send + 'static,
        C: FnOnce(&mut Self, anyhow::Result<T>) -> anyhow::Result<()> + 'static,
    {
        if self.pool.is_none() {
            self.pool = Some(WorkerPool::new(self.options.worker_threads)?);
        }
        let id = self.next_id();
        let continuation: Continuation = Box::new(move |sched, outcome| {
            let result = outcome
                .downcast::<anyhow::Result<T>>()
                .map_err(|_| anyhow::anyhow!("offloaded result has an unexpected type"))?;
            on_complete(sched, *result)
        });
        let pool = self
            .pool
            .as_ref()
            .ok_or_else(|| Error::worker_pool("worker pool unavailable"))?;
        pool.submit(id, worker_pool::job(work));
        self.continuations.insert(id, continuation);
        tracing::trace!(event = "scheduler.offload.submit", %id, "Work offloaded");
        Ok(id)
    }

    /// Withdraw a pending timer, interval or immediate.
    ///
    /// Returns true if the task was pending and is now cancelled. An interval
    /// may cancel itself from inside its own callback.
    pub fn cancel(&mut self, id: TaskId) -> bool {
        if let Some(active) = self.active_interval.as_mut() {
            if active.id == id {
                let first = !active.cancelled;
                active.cancelled = true;
                tracing::trace!(event = "scheduler.interval.cancel", %id, "Interval cancelled");
                return first;
            }
        }

        if let Some(position) = self.immediates.iter().position(|task| task.id == id) {
            self.immediates.remove(position);
            tracing::trace!(event = "scheduler.immediate.cancel", %id, "Immediate cancelled");
            return true;
        }

        // Mark as cancelled; will be skipped when popped
        let pending = self.timer_heap.iter().any(|entry| entry.id == id);
        let cancelled = pending && self.cancelled_timers.insert(id);
        tracing::trace!(
            event = "scheduler.timer.cancel",
            %id,
            cancelled,
            "Timer cancelled"
        );
        cancelled
    }

    /// Drain every queue.
    ///
    /// Returns when all queues are empty and no offloaded work is in flight.
    /// The scheduler can be run again afterwards. If the run aborts (task
    /// budget, worker pool failure) the remaining work stays queued and the
    /// execution records, failures and pass count of the aborted run are
    /// discarded. Its output stays available through [`Scheduler::output`]
    /// and is carried into the next report unless taken with
    /// [`Scheduler::take_output`].
    pub fn run(&mut self) -> Result<RunReport> {
        if self.running {
            return Err(Error::ReentrantRun);
        }
        self.running = true;
        self.tasks_this_run = 0;
        tracing::debug!(
            event = "scheduler.run.start",
            clock = self.clock,
            seq = %self.seq,
            "Run started"
        );

        let outcome = self.run_loop();
        self.running = false;
        if let Err(err) = outcome {
            self.executed.clear();
            self.failures.clear();
            self.passes = 0;
            tracing::debug!(event = "scheduler.run.abort", error = %err, "Run aborted");
            return Err(err);
        }

        if self.timer_count() == 0 {
            self.timer_heap.clear();
            self.cancelled_timers.clear();
        }

        let report = RunReport {
            executed: std::mem::take(&mut self.executed),
            output: std::mem::take(&mut self.output),
            failures: std::mem::take(&mut self.failures),
            passes: std::mem::take(&mut self.passes),
            clock: self.clock,
        };
        tracing::debug!(
            event = "scheduler.run.finish",
            executed = report.executed.len(),
            failures = report.failures.len(),
            passes = report.passes,
            clock = report.clock,
            "Run finished"
        );
        Ok(report)
    }

    fn run_loop(&mut self) -> Result<()> {
        loop {
            self.drain_microtasks()?;
            if !self.has_pending() {
                return Ok(());
            }
            self.passes += 1;
            tracing::trace!(
                event = "scheduler.pass.start",
                pass = self.passes,
                clock = self.clock,
                "Pass started"
            );
            self.run_timers()?;
            self.run_io()?;
            self.run_batch(Queue::Immediate)?;
            self.run_batch(Queue::Close)?;
        }
    }

    /// Drain next-tick and microtask queues to a joint fixed point.
    fn drain_microtasks(&mut self) -> Result<()> {
        loop {
            if let Some(task) = self.next_ticks.pop_front() {
                self.execute(task)?;
                continue;
            }
            let Some(task) = self.microtasks.pop_front() else {
                return Ok(());
            };
            self.execute(task)?;
            if self.options.microtask_policy == MicrotaskPolicy::Batch {
                while let Some(task) = self.microtasks.pop_front() {
                    self.execute(task)?;
                }
            }
        }
    }

    fn run_timers(&mut self) -> Result<()> {
        let boundary = self.seq;
        let mut fired = 0_usize;
        while let Some(entry) = self.pop_due_timer(boundary) {
            fired += 1;
            self.fire_timer(entry)?;
            self.drain_microtasks()?;
        }
        if fired == 0 {
            self.advance_clock();
        }
        Ok(())
    }

    /// Pop the next timer that is due and was armed before `boundary`.
    fn pop_due_timer(&mut self, boundary: Seq) -> Option<TimerEntry> {
        loop {
            let entry = self.timer_heap.peek()?;
            if entry.deadline > self.clock || entry.seq >= boundary {
                return None;
            }
            let entry = self.timer_heap.pop()?;

            // Skip cancelled timers
            if self.cancelled_timers.remove(&entry.id) {
                tracing::trace!(
                    event = "scheduler.timer.skip_cancelled",
                    id = %entry.id,
                    "Skipped cancelled timer"
                );
                continue;
            }
            return Some(entry);
        }
    }

    fn fire_timer(&mut self, entry: TimerEntry) -> Result<()> {
        let TimerEntry {
            id,
            deadline,
            seq,
            callback,
        } = entry;
        tracing::trace!(
            event = "scheduler.timer.fire",
            %id,
            deadline,
            now = self.clock,
            %seq,
            "Timer fired"
        );
        match callback {
            TimerCallback::Once(callback) => self.execute(Task {
                id,
                seq,
                phase: Phase::Timer,
                callback,
            }),
            TimerCallback::Repeat {
                interval,
                mut callback,
            } => {
                self.active_interval = Some(ActiveInterval {
                    id,
                    cancelled: false,
                });
                let outcome = self.invoke(id, seq, Phase::Timer, |sched| callback(sched));
                let cancelled = self
                    .active_interval
                    .take()
                    .is_some_and(|active| active.cancelled);
                outcome?;
                if !cancelled {
                    self.arm_timer(id, interval, TimerCallback::Repeat { interval, callback });
                }
                Ok(())
            }
        }
    }

    /// Jump the logical clock to the earliest live deadline instead of
    /// spinning.
    fn advance_clock(&mut self) {
        if let Some(deadline) = self.next_timer_deadline() {
            if deadline > self.clock {
                tracing::trace!(
                    event = "scheduler.clock.advance",
                    from = self.clock,
                    to = deadline,
                    "Clock advanced"
                );
                self.clock = deadline;
            }
        }
    }

    fn run_io(&mut self) -> Result<()> {
        self.collect_completions()?;
        self.run_batch(Queue::Io)
    }

    /// Move finished offloaded work into the I/O queue. Blocks only when
    /// nothing else could run.
    fn collect_completions(&mut self) -> Result<()> {
        if self.continuations.is_empty() {
            return Ok(());
        }
        let Some(pool) = self.pool.as_ref() else {
            return Err(Error::worker_pool("work in flight without a worker pool"));
        };

        let mut arrived = Vec::new();
        while let Some(completion) = pool.try_recv() {
            arrived.push(completion);
        }
        let idle = self.io.is_empty()
            && self.timer_count() == 0
            && self.immediates.is_empty()
            && self.close.is_empty();
        if arrived.is_empty() && idle {
            tracing::trace!(
                event = "scheduler.poll.wait",
                in_flight = self.continuations.len(),
                "Waiting for offloaded work"
            );
            arrived.push(pool.recv()?);
            while let Some(completion) = pool.try_recv() {
                arrived.push(completion);
            }
        }

        for completion in arrived {
            self.deliver(completion);
        }
        Ok(())
    }

    fn deliver(&mut self, completion: Completion) {
        let Completion { id, outcome } = completion;
        let Some(continuation) = self.continuations.remove(&id) else {
            tracing::warn!(
                event = "scheduler.offload.orphan",
                %id,
                "Completion for unknown task dropped"
            );
            return;
        };
        let seq = self.next_seq();
        self.io.push_back(Task {
            id,
            seq,
            phase: Phase::Io,
            callback: Box::new(move |sched| continuation(sched, outcome)),
        });
        tracing::trace!(event = "scheduler.offload.complete", %id, %seq, "Offloaded work completed");
    }

    /// Run the FIFO tasks of `phase` that were queued before the phase
    /// began, draining microtasks after each.
    fn run_batch(&mut self, queue: Queue) -> Result<()> {
        let boundary = self.seq;
        while let Some(task) = self.pop_batch_task(queue, boundary) {
            self.execute(task)?;
            self.drain_microtasks()?;
        }
        Ok(())
    }

    fn pop_batch_task(&mut self, queue: Queue, boundary: Seq) -> Option<Task> {
        let queue = self.fifo_queue(queue);
        if queue.front()?.seq >= boundary {
            return None;
        }
        queue.pop_front()
    }

    fn execute(&mut self, task: Task) -> Result<()> {
        let Task {
            id,
            seq,
            phase,
            callback,
        } = task;
        self.invoke(id, seq, phase, callback)
    }

    fn invoke<F>(&mut self, id: TaskId, seq: Seq, phase: Phase, callback: F) -> Result<()>
    where
        F: FnOnce(&mut Self) -> anyhow::Result<()>,
    {
        if let Some(limit) = self.options.max_tasks {
            if self.tasks_this_run >= limit {
                tracing::warn!(
                    event = "scheduler.budget.exhausted",
                    limit,
                    "Task budget exhausted"
                );
                return Err(Error::TaskBudgetExhausted { limit });
            }
        }
        self.tasks_this_run += 1;
        self.executed.push(ExecutionRecord {
            id,
            phase,
            seq,
            clock: self.clock,
        });
        tracing::trace!(
            event = "scheduler.task.execute",
            %id,
            phase = phase.as_str(),
            %seq,
            clock = self.clock,
            "Executing task"
        );

        let message = match panic::catch_unwind(AssertUnwindSafe(|| callback(self))) {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(err)) => format!("{err:#}"),
            Err(payload) => format!(
                "task panicked: {}",
                worker_pool::panic_message(payload.as_ref())
            ),
        };
        tracing::warn!(
            event = "scheduler.task.failed",
            %id,
            phase = phase.as_str(),
            error = %message,
            "Task failed"
        );
        self.failures.push(TaskFailure { id, phase, message });
        Ok(())
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("seq", &self.seq)
            .field("clock", &self.clock)
            .field("running", &self.running)
            .field("next_tick_count", &self.next_ticks.len())
            .field("microtask_count", &self.microtasks.len())
            .field("timer_count", &self.timer_count())
            .field("io_count", &self.io.len())
            .field("immediate_count", &self.immediates.len())
            .field("close_count", &self.close.len())
            .field("in_flight", &self.continuations.len())
            .finish_non_exhaustive()
    }
}
