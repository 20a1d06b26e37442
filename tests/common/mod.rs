//! Common test infrastructure for `phase_scheduler`.
//!
//! - `say` builds a task that emits one line
//! - `init_tracing` routes scheduler events to the test writer
//! - `position` / `assert_before` check relative order in a trace

#![allow(dead_code)]

use std::sync::OnceLock;

use phase::Scheduler;
use tracing_subscriber::EnvFilter;

/// Task that emits `line` and succeeds.
pub fn say(line: impl Into<String>) -> impl FnOnce(&mut Scheduler) -> anyhow::Result<()> + 'static {
    let line = line.into();
    move |sched| {
        sched.emit(line);
        Ok(())
    }
}

/// Install a test-writer subscriber once per test binary. Honors `RUST_LOG`.
pub fn init_tracing() {
    static INIT: OnceLock<()> = OnceLock::new();
    INIT.get_or_init(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub fn position(trace: &[String], line: &str) -> usize {
    trace
        .iter()
        .position(|entry| entry == line)
        .unwrap_or_else(|| panic!("{line:?} missing from trace {trace:#?}"))
}

pub fn assert_before(trace: &[String], earlier: &str, later: &str) {
    let a = position(trace, earlier);
    let b = position(trace, later);
    assert!(
        a < b,
        "expected {earlier:?} (at {a}) before {later:?} (at {b}) in {trace:#?}"
    );
}
