//! CLI argument parsing using Clap.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::config::{Config, ENV_MAX_TASKS, ENV_MICROTASK_POLICY, ENV_WORKER_THREADS};

/// phase - replay event-loop ordering experiments on a deterministic scheduler
#[derive(Parser, Debug)]
#[command(name = "phase")]
#[command(version, about, long_about = None)]
#[command(after_help = "Examples:
  phase list                               Show available scenarios
  phase run phases                         Print the execution order
  phase run microtasks --policy batch      Drain promises before next-ticks
  phase run thread-pool --worker-threads 2 Offload hashing to two threads
  phase run check --format json            Full run report as JSON
")]
pub struct Cli {
    /// Settings file (default: <config dir>/phase/settings.json)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List scenarios
    List,

    /// Run a scenario and print its output
    Run {
        /// Scenario name (see `phase list`)
        scenario: String,

        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,

        #[command(flatten)]
        overrides: SchedulerArgs,
    },

    /// Print the resolved configuration
    Config {
        #[command(flatten)]
        overrides: SchedulerArgs,
    },
}

/// Flags that override settings-file and environment values.
#[derive(clap::Args, Debug, Clone, Default)]
pub struct SchedulerArgs {
    /// Microtask drain policy (tick-first, batch)
    #[arg(long, env = ENV_MICROTASK_POLICY)]
    pub policy: Option<String>,

    /// Worker threads for offloaded work
    #[arg(long, env = ENV_WORKER_THREADS)]
    pub worker_threads: Option<usize>,

    /// Abort a run after this many tasks
    #[arg(long, env = ENV_MAX_TASKS)]
    pub max_tasks: Option<u64>,
}

impl SchedulerArgs {
    #[must_use]
    pub fn to_config(&self) -> Config {
        Config {
            microtask_policy: self.policy.clone(),
            worker_threads: self.worker_threads,
            max_tasks: self.max_tasks,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// One output line per emitted line
    Text,
    /// The full run report
    Json,
}
