//! phase - a deterministic cooperative phase scheduler.
//!
//! A single logical thread drains next-tick, microtask, timer, I/O,
//! immediate and close queues in fixed precedence against a logical clock.
//! CPU-bound work goes to a worker pool and comes back as an I/O-phase task.
//!
//! ```
//! use phase::scheduler::Scheduler;
//!
//! let mut sched = Scheduler::new();
//! sched.set_immediate(|s| { s.emit("D"); Ok(()) });
//! sched.set_timeout(0, |s| { s.emit("C"); Ok(()) })?;
//! sched.queue_microtask(|s| { s.emit("B"); Ok(()) });
//! sched.next_tick(|s| { s.emit("A"); Ok(()) });
//!
//! let report = sched.run()?;
//! assert_eq!(report.output, ["A", "B", "C", "D"]);
//! # Ok::<(), phase::Error>(())
//! ```

#![forbid(unsafe_code)]
#![allow(clippy::must_use_candidate, clippy::doc_markdown)]

pub mod cli;
pub mod config;
pub mod error;
pub mod scenarios;
pub mod scheduler;
pub mod worker_pool;

pub use error::{Error, Result};
pub use scheduler::{Phase, RunReport, Scheduler};
