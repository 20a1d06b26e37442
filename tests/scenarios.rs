//! Expected traces of the bundled scenarios.

mod common;

use common::{assert_before, init_tracing, position};
use phase::scenarios::{self, HASH_JOBS, SCENARIOS};
use phase::scheduler::{MicrotaskPolicy, SchedulerOptions};
use pretty_assertions::assert_eq;

fn run(name: &str) -> Vec<String> {
    run_with(name, SchedulerOptions::default())
}

fn run_with(name: &str, options: SchedulerOptions) -> Vec<String> {
    init_tracing();
    let report = scenarios::find(name).unwrap().run(options).unwrap();
    assert!(report.is_clean(), "{name} failures: {:?}", report.failures);
    report.output
}

fn batch() -> SchedulerOptions {
    SchedulerOptions {
        microtask_policy: MicrotaskPolicy::Batch,
        ..SchedulerOptions::default()
    }
}

#[test]
fn phases() {
    assert_eq!(
        run("phases"),
        vec![
            "Start",
            "End",
            "Next tick callback",
            "Promise resolved",
            "Timeout callback",
            "Immediate callback",
        ]
    );
}

#[test]
fn microtasks_tick_first() {
    assert_eq!(
        run("microtasks"),
        vec![
            "Next Tick 1",
            "Next Tick 2",
            "Next Tick 3",
            "Inner Next Tick inside Tick 2",
            "Promise Resolve 1",
            "Promise Resolve 2",
            "Inner Next Tick inside Promise 2",
            "Promise Resolve 3",
            "Inner Promise inside Promise 2",
            "Inner Promise inside Inner Next Tick",
            "Timer inside 2",
        ]
    );
}

#[test]
fn microtasks_batch() {
    assert_eq!(
        run_with("microtasks", batch()),
        vec![
            "Next Tick 1",
            "Next Tick 2",
            "Next Tick 3",
            "Inner Next Tick inside Tick 2",
            "Promise Resolve 1",
            "Promise Resolve 2",
            "Promise Resolve 3",
            "Inner Promise inside Promise 2",
            "Inner Next Tick inside Promise 2",
            "Inner Promise inside Inner Next Tick",
            "Timer inside 2",
        ]
    );
}

#[test]
fn timers() {
    let expected = vec![
        "Next Tick 1",
        "Promise 1",
        "Timer 1",
        "Timer 2",
        "Promise inside Timer 2",
        "Timer 3",
    ];
    assert_eq!(run("timers"), expected);
    assert_eq!(run_with("timers", batch()), expected);
}

#[test]
fn io() {
    assert_eq!(
        run("io"),
        vec![
            "Next Tick 1",
            "Next Tick 2",
            "Promise 1",
            "Timeout callback 2",
            "File read complete",
        ]
    );
}

#[test]
fn check_relative_order() {
    let trace = run("check");
    assert_eq!(trace.len(), 12);
    assert_eq!(&trace[..3], &["Next Tick 1", "Promise 1", "Timeout callback 1"]);

    assert_before(&trace, "Immediate callback 1", "Immediate callback 2");
    assert_before(&trace, "Immediate callback 2", "Immediate callback 3");

    let second = position(&trace, "Immediate callback 2");
    assert_eq!(
        &trace[second + 1..second + 3],
        &[
            "Next Tick inside Immediate callback 2",
            "Promise inside Immediate callback 2",
        ]
    );

    let read = position(&trace, "File read complete");
    assert_eq!(
        &trace[read + 1..read + 3],
        &["Next Tick inside I/O", "Promise inside I/O"]
    );
    assert_before(&trace, "File read complete", "Immediate callback inside I/O");
    assert_eq!(trace.last().unwrap(), "Immediate callback inside I/O");
}

#[test]
fn close() {
    assert_eq!(
        run("close"),
        vec![
            "Next Tick 1",
            "Promise 1",
            "Timeout callback 1",
            "Immediate callback 1",
            "Stream closed",
            "Next Tick inside close event",
            "Promise inside close event",
            "Immediate callback inside close event",
        ]
    );
}

#[test]
fn nested_timers() {
    init_tracing();
    let report = scenarios::find("nested-timers")
        .unwrap()
        .run(SchedulerOptions::default())
        .unwrap();
    assert_eq!(
        report.output,
        vec![
            "Main Task",
            "Microtask 4",
            "Timer 1",
            "IIFE Microtask",
            "Microtask 1",
            "Timer 2",
            "Microtask 2",
            "Nested Timer 1",
            "Nested Microtask 1",
            "Timer 3",
            "Microtask 3",
        ]
    );
    assert_eq!(report.clock, 1000);
    assert_eq!(report.passes, 4);
}

#[test]
fn thread_pool_timer_runs_before_hashes() {
    let options = SchedulerOptions {
        worker_threads: 2,
        ..SchedulerOptions::default()
    };
    let trace = run_with("thread-pool", options);
    assert_eq!(trace.len(), HASH_JOBS + 2);
    assert_eq!(trace[0], "Hashing 8 passwords on 2 worker threads");
    assert_eq!(trace[1], "Timer fired while hashing");

    let hashes = &trace[2..];
    assert!(hashes.iter().all(|line| line.starts_with("Password hashed: ")));
    assert!(hashes.windows(2).all(|pair| pair[0] == pair[1]));
}

#[test]
fn every_scenario_runs_clean_under_both_policies() {
    for scenario in SCENARIOS {
        for options in [SchedulerOptions::default(), batch()] {
            let report = scenario.run(options).unwrap();
            assert!(report.is_clean(), "{}: {:?}", scenario.name, report.failures);
            assert!(!report.output.is_empty(), "{} emitted nothing", scenario.name);
        }
    }
}

#[test]
fn budget_applies_to_scenarios() {
    let options = SchedulerOptions {
        max_tasks: Some(2),
        ..SchedulerOptions::default()
    };
    let err = scenarios::find("phases").unwrap().run(options).unwrap_err();
    assert!(matches!(
        err,
        phase::Error::TaskBudgetExhausted { limit: 2 }
    ));
}
