use clap::Parser;

/// Synthetic workload driver for the taskweave task system.
///
/// Submits groups of busy-work tasks, optionally chained and partly
/// cancelled, waits for them, and prints a JSON report.
#[derive(Parser, Debug)]
#[command(name = "taskweave", about = "Drive a synthetic workload through the task system")]
pub struct CliArgs {
    /// Path to a TOML task system config (default: TASKWEAVE_* env vars)
    #[arg(long)]
    pub config: Option<String>,

    /// Number of task groups to submit
    #[arg(long, default_value = "16")]
    pub groups: usize,

    /// Tasks per group
    #[arg(long, default_value = "4")]
    pub tasks_per_group: usize,

    /// Multiplicity of every task (0 or 1 = run once)
    #[arg(long, default_value = "0")]
    pub multiplicity: u32,

    /// Make every group depend on the previous one
    #[arg(long)]
    pub chain: bool,

    /// Busy work per invocation, in microseconds
    #[arg(long, default_value = "200")]
    pub work_us: u64,

    /// Cancel every N-th group right after starting it (0 = never)
    #[arg(long, default_value = "0")]
    pub cancel_every: usize,

    /// Include a scheduler state snapshot taken right after submission
    #[arg(long)]
    pub snapshot: bool,
}
