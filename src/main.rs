//! phase - run event-loop ordering scenarios on the deterministic scheduler.

#![forbid(unsafe_code)]

use std::io::{self, Write};

use anyhow::Result;
use clap::Parser;
use phase::cli::{self, Commands, OutputFormat, SchedulerArgs};
use phase::config::Config;
use phase::scenarios::{self, SCENARIOS};
use phase::scheduler::{RunReport, SchedulerOptions};
use tracing_subscriber::EnvFilter;

fn main() {
    if let Err(err) = main_impl() {
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}

fn main_impl() -> Result<()> {
    let cli = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Commands::List => {
            list_scenarios()?;
        }
        Commands::Run {
            scenario,
            format,
            overrides,
        } => {
            let options = resolve_options(cli.config.as_deref(), &overrides)?;
            let scenario = scenarios::find(&scenario)?;
            let report = scenario.run(options)?;
            print_report(&report, format)?;
        }
        Commands::Config { overrides } => {
            let options = resolve_options(cli.config.as_deref(), &overrides)?;
            let mut stdout = io::stdout().lock();
            serde_json::to_writer_pretty(&mut stdout, &options)?;
            writeln!(stdout)?;
        }
    }
    Ok(())
}

fn resolve_options(
    path: Option<&std::path::Path>,
    overrides: &SchedulerArgs,
) -> Result<SchedulerOptions> {
    let mut config = Config::load(path)?;
    config.merge(overrides.to_config());
    let options = config.scheduler_options()?;
    tracing::debug!(
        event = "config.resolved",
        policy = options.microtask_policy.as_str(),
        worker_threads = options.worker_threads,
        max_tasks = ?options.max_tasks,
        "Resolved scheduler options"
    );
    Ok(options)
}

fn list_scenarios() -> Result<()> {
    let width = SCENARIOS
        .iter()
        .map(|scenario| scenario.name.len())
        .max()
        .unwrap_or(0);
    let mut stdout = io::stdout().lock();
    for scenario in SCENARIOS {
        writeln!(
            stdout,
            "  {:width$}  {}",
            scenario.name, scenario.description
        )?;
    }
    Ok(())
}

fn print_report(report: &RunReport, format: OutputFormat) -> Result<()> {
    let mut stdout = io::stdout().lock();
    match format {
        OutputFormat::Text => {
            for line in &report.output {
                writeln!(stdout, "{line}")?;
            }
            for failure in &report.failures {
                eprintln!(
                    "Task {} ({}) failed: {}",
                    failure.id, failure.phase, failure.message
                );
            }
        }
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut stdout, report)?;
            writeln!(stdout)?;
        }
    }
    Ok(())
}
