//! Ordering experiments as named, replayable scenarios.
//!
//! Each scenario plays the synchronous "main task": it may emit lines
//! directly, then enqueues work. [`Scenario::run`] drains the scheduler and
//! returns the report, so the emitted output is the observed execution order.

use sha2::{Digest, Sha512};

use crate::error::{Error, Result};
use crate::scheduler::{RunReport, Scheduler, SchedulerOptions};

/// Parallel jobs submitted by the `thread-pool` scenario.
pub const HASH_JOBS: usize = 8;
const HASH_ROUNDS: u32 = 20_000;

#[derive(Debug, Clone, Copy)]
pub struct Scenario {
    pub name: &'static str,
    pub description: &'static str,
    setup: fn(&mut Scheduler) -> Result<()>,
}

impl Scenario {
    /// Run the main task and drain the scheduler.
    pub fn run(&self, options: SchedulerOptions) -> Result<RunReport> {
        let mut sched = Scheduler::with_options(options);
        tracing::info!(
            event = "scenario.start",
            scenario = self.name,
            policy = options.microtask_policy.as_str(),
            "Running scenario"
        );
        (self.setup)(&mut sched)?;
        sched.run()
    }
}

pub const SCENARIOS: &[Scenario] = &[
    Scenario {
        name: "phases",
        description: "One callback per queue between synchronous Start/End lines",
        setup: phases,
    },
    Scenario {
        name: "microtasks",
        description: "Nested next-ticks and promises; a timer scheduled from a promise",
        setup: microtasks,
    },
    Scenario {
        name: "timers",
        description: "Microtasks run between individual timer callbacks",
        setup: timers,
    },
    Scenario {
        name: "io",
        description: "A file read completion against next-ticks, promises and a timer",
        setup: io,
    },
    Scenario {
        name: "check",
        description: "Immediates against I/O, with microtasks between immediates",
        setup: check,
    },
    Scenario {
        name: "close",
        description: "Close callbacks run after the immediate phase",
        setup: close,
    },
    Scenario {
        name: "nested-timers",
        description: "Timers and microtasks scheduled from inside timers; a long timer",
        setup: nested_timers,
    },
    Scenario {
        name: "thread-pool",
        description: "CPU-bound password hashing offloaded to the worker pool",
        setup: thread_pool,
    },
];

pub fn find(name: &str) -> Result<&'static Scenario> {
    SCENARIOS
        .iter()
        .find(|scenario| scenario.name == name)
        .ok_or_else(|| Error::unknown_scenario(name))
}

fn say(line: &'static str) -> impl FnOnce(&mut Scheduler) -> anyhow::Result<()> + 'static {
    move |sched| {
        sched.emit(line);
        Ok(())
    }
}

fn phases(sched: &mut Scheduler) -> Result<()> {
    sched.emit("Start");
    sched.queue_microtask(say("Promise resolved"));
    sched.next_tick(say("Next tick callback"));
    sched.set_timeout(0, say("Timeout callback"))?;
    sched.set_immediate(say("Immediate callback"));
    sched.emit("End");
    Ok(())
}

fn microtasks(sched: &mut Scheduler) -> Result<()> {
    sched.next_tick(say("Next Tick 1"));
    sched.next_tick(|sched| {
        sched.emit("Next Tick 2");
        sched.next_tick(say("Inner Next Tick inside Tick 2"));
        Ok(())
    });
    sched.next_tick(say("Next Tick 3"));

    sched.queue_microtask(say("Promise Resolve 1"));
    sched.queue_microtask(|sched| {
        sched.emit("Promise Resolve 2");
        sched.set_timeout(0, say("Timer inside 2"))?;
        sched.next_tick(|sched| {
            sched.emit("Inner Next Tick inside Promise 2");
            sched.queue_microtask(say("Inner Promise inside Inner Next Tick"));
            Ok(())
        });
        sched.queue_microtask(say("Inner Promise inside Promise 2"));
        Ok(())
    });
    sched.queue_microtask(say("Promise Resolve 3"));
    Ok(())
}

fn timers(sched: &mut Scheduler) -> Result<()> {
    sched.set_timeout(0, say("Timer 1"))?;
    sched.set_timeout(0, |sched| {
        sched.emit("Timer 2");
        sched.queue_microtask(say("Promise inside Timer 2"));
        Ok(())
    })?;
    sched.set_timeout(0, say("Timer 3"))?;
    sched.queue_microtask(say("Promise 1"));
    sched.next_tick(say("Next Tick 1"));
    Ok(())
}

/// Stand-in for an asynchronous file read: stat the running executable.
fn read_file() -> anyhow::Result<u64> {
    let path = std::env::current_exe()?;
    Ok(std::fs::metadata(path)?.len())
}

fn io(sched: &mut Scheduler) -> Result<()> {
    sched.offload(read_file, |sched, result| {
        result?;
        sched.emit("File read complete");
        Ok(())
    })?;
    sched.next_tick(say("Next Tick 1"));
    sched.queue_microtask(say("Promise 1"));
    sched.next_tick(say("Next Tick 2"));
    sched.set_timeout(0, say("Timeout callback 2"))?;
    Ok(())
}

fn check(sched: &mut Scheduler) -> Result<()> {
    sched.set_immediate(say("Immediate callback 1"));
    sched.offload(read_file, |sched, result| {
        result?;
        sched.emit("File read complete");
        sched.set_immediate(say("Immediate callback inside I/O"));
        sched.queue_microtask(say("Promise inside I/O"));
        sched.next_tick(say("Next Tick inside I/O"));
        Ok(())
    })?;
    sched.set_immediate(|sched| {
        sched.emit("Immediate callback 2");
        sched.queue_microtask(say("Promise inside Immediate callback 2"));
        sched.next_tick(say("Next Tick inside Immediate callback 2"));
        Ok(())
    });
    sched.set_immediate(say("Immediate callback 3"));
    sched.next_tick(say("Next Tick 1"));
    sched.queue_microtask(say("Promise 1"));
    sched.set_timeout(0, say("Timeout callback 1"))?;
    Ok(())
}

fn close(sched: &mut Scheduler) -> Result<()> {
    sched.on_close(|sched| {
        sched.emit("Stream closed");
        sched.set_immediate(say("Immediate callback inside close event"));
        sched.queue_microtask(say("Promise inside close event"));
        sched.next_tick(say("Next Tick inside close event"));
        Ok(())
    });
    sched.set_immediate(say("Immediate callback 1"));
    sched.set_timeout(0, say("Timeout callback 1"))?;
    sched.queue_microtask(say("Promise 1"));
    sched.next_tick(say("Next Tick 1"));
    Ok(())
}

fn nested_timers(sched: &mut Scheduler) -> Result<()> {
    sched.set_timeout(0, |sched| {
        sched.emit("Timer 1");
        sched.queue_microtask(say("IIFE Microtask"));
        sched.set_timeout(0, |sched| {
            sched.emit("Nested Timer 1");
            sched.queue_microtask(say("Nested Microtask 1"));
            Ok(())
        })?;
        sched.queue_microtask(say("Microtask 1"));
        Ok(())
    })?;
    sched.set_timeout(0, |sched| {
        sched.emit("Timer 2");
        sched.queue_microtask(say("Microtask 2"));
        Ok(())
    })?;
    sched.set_timeout(1000, |sched| {
        sched.emit("Timer 3");
        sched.queue_microtask(say("Microtask 3"));
        Ok(())
    })?;
    sched.queue_microtask(say("Microtask 4"));
    sched.emit("Main Task");
    Ok(())
}

/// Key stretching by repeated SHA-512, hex encoded.
#[must_use]
pub fn stretch_password(password: &[u8], salt: &[u8], rounds: u32) -> String {
    let mut digest = Sha512::new()
        .chain_update(salt)
        .chain_update(password)
        .finalize();
    for _ in 1..rounds {
        digest = Sha512::digest(digest);
    }
    format!("{digest:x}")
}

fn thread_pool(sched: &mut Scheduler) -> Result<()> {
    let threads = sched.options().worker_threads;
    sched.emit(format!(
        "Hashing {HASH_JOBS} passwords on {threads} worker threads"
    ));
    for _ in 0..HASH_JOBS {
        sched.offload(
            || Ok(stretch_password(b"password", b"salt", HASH_ROUNDS)),
            |sched, digest| {
                let digest = digest?;
                sched.emit(format!("Password hashed: {}", &digest[..16]));
                Ok(())
            },
        )?;
    }
    sched.set_timeout(0, say("Timer fired while hashing"))?;
    Ok(())
}
