mod cli;
mod config;
mod workload;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use taskweave_scheduler::TaskSystem;

use crate::cli::CliArgs;
use crate::workload::WorkloadPlan;

fn main() -> Result<()> {
    // Logs go to stderr so the JSON report on stdout stays parseable.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args = CliArgs::parse();
    let config = config::load(args.config.as_deref())
        .context("failed to load task system configuration")?;

    let system = TaskSystem::new(config);
    system.start_workers().context("failed to start worker pools")?;

    let plan = WorkloadPlan::from(&args);
    let report = workload::run(&system, &plan)?;
    system.shutdown().context("failed to stop worker pools")?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
