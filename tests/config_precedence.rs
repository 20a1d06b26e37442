//! Integration tests for configuration precedence: settings file, then
//! environment, then command-line flags.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use clap::Parser;
use phase::Error;
use phase::cli::{Cli, Commands, SchedulerArgs};
use phase::config::{Config, ENV_MAX_TASKS, ENV_MICROTASK_POLICY, ENV_WORKER_THREADS};
use phase::scheduler::{MicrotaskPolicy, SchedulerOptions};
use pretty_assertions::assert_eq;

fn write_settings(dir: &Path, contents: &str) -> PathBuf {
    let path = dir.join("settings.json");
    std::fs::write(&path, contents).expect("write settings");
    path
}

fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = pairs
        .iter()
        .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
        .collect();
    move |key| vars.get(key).cloned()
}

fn run_overrides(args: &[&str]) -> SchedulerArgs {
    let cli = Cli::try_parse_from(args).expect("parse cli");
    match cli.command {
        Commands::Run { overrides, .. } | Commands::Config { overrides } => overrides,
        Commands::List => unreachable!("expected run or config"),
    }
}

#[test]
fn defaults_without_any_layer() {
    let options = Config::default().scheduler_options().unwrap();
    assert_eq!(options, SchedulerOptions::default());
    assert_eq!(options.microtask_policy, MicrotaskPolicy::TickFirst);
    assert_eq!(options.max_tasks, None);
}

#[test]
fn settings_file_accepts_camel_and_snake_case() {
    let dir = tempfile::tempdir().unwrap();
    let camel = write_settings(
        dir.path(),
        r#"{ "microtaskPolicy": "batch", "workerThreads": 2, "maxTasks": 500 }"#,
    );
    let from_camel = Config::load_from(&camel).unwrap();

    let snake_dir = tempfile::tempdir().unwrap();
    let snake = write_settings(
        snake_dir.path(),
        r#"{ "microtask_policy": "batch", "worker_threads": 2, "max_tasks": 500 }"#,
    );
    let from_snake = Config::load_from(&snake).unwrap();

    assert_eq!(from_camel, from_snake);
    let options = from_camel.scheduler_options().unwrap();
    assert_eq!(options.microtask_policy, MicrotaskPolicy::Batch);
    assert_eq!(options.worker_threads, 2);
    assert_eq!(options.max_tasks, Some(500));
}

#[test]
fn env_beats_file_and_flags_beat_env() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_settings(
        dir.path(),
        r#"{ "microtaskPolicy": "batch", "workerThreads": 2, "maxTasks": 10 }"#,
    );

    let mut config = Config::load_from(&path).unwrap();
    config
        .apply_env_with(env(&[
            (ENV_WORKER_THREADS, "6"),
            (ENV_MAX_TASKS, "20"),
        ]))
        .unwrap();
    assert_eq!(config.microtask_policy.as_deref(), Some("batch"));
    assert_eq!(config.worker_threads, Some(6));
    assert_eq!(config.max_tasks, Some(20));

    let flags = run_overrides(&["phase", "run", "phases", "--max-tasks", "30"]);
    config.merge(flags.to_config());
    let options = config.scheduler_options().unwrap();
    assert_eq!(
        options,
        SchedulerOptions {
            microtask_policy: MicrotaskPolicy::Batch,
            worker_threads: 6,
            max_tasks: Some(30),
        }
    );
}

#[test]
fn unset_flags_do_not_clear_lower_layers() {
    let mut config = Config {
        microtask_policy: Some("batch".to_string()),
        worker_threads: Some(3),
        max_tasks: None,
    };
    config.merge(SchedulerArgs::default().to_config());
    assert_eq!(config.microtask_policy.as_deref(), Some("batch"));
    assert_eq!(config.worker_threads, Some(3));
}

#[test]
fn explicit_missing_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = Config::load(Some(&dir.path().join("absent.json"))).unwrap_err();
    assert!(matches!(err, Error::Config(_)), "{err}");
}

#[test]
fn malformed_settings_are_reported_with_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_settings(dir.path(), "{ not json");
    let err = Config::load_from(&path).unwrap_err();
    assert!(err.to_string().contains("settings.json"), "{err}");
}

#[test]
fn invalid_values_fail_validation() {
    let bad_policy = Config {
        microtask_policy: Some("eager".to_string()),
        ..Config::default()
    };
    assert!(matches!(
        bad_policy.scheduler_options(),
        Err(Error::Config(_))
    ));

    let zero_threads = Config {
        worker_threads: Some(0),
        ..Config::default()
    };
    assert!(matches!(
        zero_threads.scheduler_options(),
        Err(Error::Config(_))
    ));

    let mut config = Config::default();
    let err = config
        .apply_env_with(env(&[(ENV_WORKER_THREADS, "many")]))
        .unwrap_err();
    assert!(err.to_string().contains(ENV_WORKER_THREADS), "{err}");
}

#[test]
fn env_policy_is_validated_late() {
    let mut config = Config::default();
    config
        .apply_env_with(env(&[(ENV_MICROTASK_POLICY, "batch")]))
        .unwrap();
    assert_eq!(
        config.scheduler_options().unwrap().microtask_policy,
        MicrotaskPolicy::Batch
    );
}
