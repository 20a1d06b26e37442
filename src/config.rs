//! Configuration loading and management.
//!
//! Precedence, lowest to highest: built-in defaults, settings file,
//! `PHASE_*` environment variables, command-line flags.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::scheduler::{MicrotaskPolicy, SchedulerOptions};

pub const ENV_MICROTASK_POLICY: &str = "PHASE_MICROTASK_POLICY";
pub const ENV_WORKER_THREADS: &str = "PHASE_WORKER_THREADS";
pub const ENV_MAX_TASKS: &str = "PHASE_MAX_TASKS";

/// Settings file contents. Every field is optional; unset fields fall
/// through to the next layer.
///
/// # Example (settings.json)
///
/// ```json
/// {
///   "microtaskPolicy": "batch",
///   "workerThreads": 8,
///   "maxTasks": 100000
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// "tick-first" (default) or "batch".
    #[serde(alias = "microtaskPolicy")]
    pub microtask_policy: Option<String>,
    /// Worker pool size for offloaded work.
    #[serde(alias = "workerThreads")]
    pub worker_threads: Option<usize>,
    /// Cap on tasks executed per run.
    #[serde(alias = "maxTasks")]
    pub max_tasks: Option<u64>,
}

impl Config {
    /// `<config_dir>/phase/settings.json`, if the platform has a config dir.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("phase").join("settings.json"))
    }

    /// Load the settings file at `path` (which must exist), or the default
    /// settings file if present, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load_from(path)?,
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::load_from(&path)?,
                _ => Self::default(),
            },
        };
        config.apply_env()?;
        Ok(config)
    }

    /// Parse a settings file.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|err| {
            Error::config(format!("failed to read {}: {err}", path.display()))
        })?;
        let config: Self = serde_json::from_str(&content).map_err(|err| {
            Error::config(format!("failed to parse {}: {err}", path.display()))
        })?;
        tracing::debug!(event = "config.load", path = %path.display(), "Loaded settings file");
        Ok(config)
    }

    /// Overlay `other` on top of `self`; fields set in `other` win.
    pub fn merge(&mut self, other: Self) {
        if other.microtask_policy.is_some() {
            self.microtask_policy = other.microtask_policy;
        }
        if other.worker_threads.is_some() {
            self.worker_threads = other.worker_threads;
        }
        if other.max_tasks.is_some() {
            self.max_tasks = other.max_tasks;
        }
    }

    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_with(|key| std::env::var(key).ok())
    }

    /// Apply `PHASE_*` overrides read through `lookup`.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(policy) = lookup(ENV_MICROTASK_POLICY) {
            self.microtask_policy = Some(policy);
        }
        if let Some(threads) = lookup(ENV_WORKER_THREADS) {
            self.worker_threads = Some(parse_env_number(ENV_WORKER_THREADS, &threads)?);
        }
        if let Some(max_tasks) = lookup(ENV_MAX_TASKS) {
            self.max_tasks = Some(parse_env_number(ENV_MAX_TASKS, &max_tasks)?);
        }
        Ok(())
    }

    /// Validate and resolve into scheduler options.
    pub fn scheduler_options(&self) -> Result<SchedulerOptions> {
        let defaults = SchedulerOptions::default();

        let microtask_policy = match self.microtask_policy.as_deref() {
            None => defaults.microtask_policy,
            Some(raw) => MicrotaskPolicy::parse(raw).ok_or_else(|| {
                Error::config(format!(
                    "unknown microtask policy {raw:?} (expected \"tick-first\" or \"batch\")"
                ))
            })?,
        };

        let worker_threads = match self.worker_threads {
            None => defaults.worker_threads,
            Some(0) => return Err(Error::config("workerThreads must be at least 1")),
            Some(threads) => threads,
        };

        Ok(SchedulerOptions {
            microtask_policy,
            worker_threads,
            max_tasks: self.max_tasks.or(defaults.max_tasks),
        })
    }
}

fn parse_env_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| Error::config(format!("{key} must be a non-negative integer, got {raw:?}")))
}
