use std::hint;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info};

use taskweave_scheduler::{
    OnTaskRunning, SchedulerSnapshot, Task, TaskContext, TaskGroupHandle, TaskPriority,
    TaskSystem, WorkerThreadType,
};

use crate::cli::CliArgs;

/// Shape of a synthetic workload.
#[derive(Debug, Clone)]
pub struct WorkloadPlan {
    pub groups: usize,
    pub tasks_per_group: usize,
    pub multiplicity: u32,
    pub chain: bool,
    pub work: Duration,
    /// Cancel every N-th group right after starting it; 0 disables.
    pub cancel_every: usize,
    pub snapshot: bool,
}

impl From<&CliArgs> for WorkloadPlan {
    fn from(args: &CliArgs) -> Self {
        Self {
            groups: args.groups,
            tasks_per_group: args.tasks_per_group,
            multiplicity: args.multiplicity,
            chain: args.chain,
            work: Duration::from_micros(args.work_us),
            cancel_every: args.cancel_every,
            snapshot: args.snapshot,
        }
    }
}

impl WorkloadPlan {
    fn cancels(&self, index: usize) -> bool {
        self.cancel_every > 0 && (index + 1) % self.cancel_every == 0
    }

    /// Invocations submitted, including those that cancellation may remove.
    pub fn invocations_submitted(&self) -> u64 {
        (self.groups * self.tasks_per_group) as u64 * u64::from(self.multiplicity.max(1))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkerCount {
    pub kind: WorkerThreadType,
    pub budget: usize,
    pub allocated: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkloadReport {
    pub groups: usize,
    pub groups_cancelled: usize,
    pub invocations_submitted: u64,
    pub invocations_run: u64,
    pub elapsed_ms: f64,
    pub workers: Vec<WorkerCount>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<SchedulerSnapshot>,
}

/// Spin for `duration`, bailing out once the task was cancelled.
fn busy_work(ctx: &TaskContext<'_>, duration: Duration) {
    let deadline = Instant::now() + duration;
    while Instant::now() < deadline && !ctx.is_cancelled() {
        hint::spin_loop();
    }
}

fn submit_group(
    system: &TaskSystem,
    plan: &WorkloadPlan,
    index: usize,
    previous: Option<TaskGroupHandle>,
    invocations: &Arc<AtomicU64>,
) -> Result<TaskGroupHandle> {
    let group = system.create_group(TaskPriority::ThisFrame);
    for t in 0..plan.tasks_per_group {
        let counter = Arc::clone(invocations);
        let work = plan.work;
        let task = Arc::new(
            Task::new(format!("g{}t{}", index, t), move |ctx: &TaskContext<'_>| {
                busy_work(ctx, work);
                counter.fetch_add(1, Ordering::Relaxed);
            })
            .with_multiplicity(plan.multiplicity),
        );
        system
            .add_task(group, &task)
            .with_context(|| format!("failed to add task to group {}", index))?;
    }
    if let Some(previous) = previous.filter(|_| plan.chain) {
        system
            .add_dependency(group, previous)
            .with_context(|| format!("failed to chain group {}", index))?;
    }
    system
        .start_group(group)
        .with_context(|| format!("failed to start group {}", index))?;
    Ok(group)
}

/// Submit the workload, wait for every group and report what ran.
///
/// Must be called on the system's main thread with workers started, unless
/// every group gets cancelled.
pub fn run(system: &TaskSystem, plan: &WorkloadPlan) -> Result<WorkloadReport> {
    let invocations = Arc::new(AtomicU64::new(0));
    let started = Instant::now();

    let mut groups = Vec::with_capacity(plan.groups);
    let mut groups_cancelled = 0;
    for index in 0..plan.groups {
        let group = submit_group(system, plan, index, groups.last().copied(), &invocations)?;
        if plan.cancels(index) {
            let outcome = system.cancel_group(group, OnTaskRunning::ReturnWithoutBlocking);
            debug!(group = %group, ?outcome, "Cancelled workload group");
            if outcome.is_success() {
                groups_cancelled += 1;
            }
        }
        groups.push(group);
    }

    let snapshot = plan.snapshot.then(|| system.state_snapshot());

    for group in &groups {
        system.wait_for_group(*group);
    }
    let elapsed = started.elapsed();

    let workers = [
        WorkerThreadType::ShortTasks,
        WorkerThreadType::LongTasks,
        WorkerThreadType::FileAccess,
    ]
    .into_iter()
    .map(|kind| WorkerCount {
        kind,
        budget: system.worker_thread_count(kind),
        allocated: system.allocated_worker_thread_count(kind),
    })
    .collect();

    let report = WorkloadReport {
        groups: plan.groups,
        groups_cancelled,
        invocations_submitted: plan.invocations_submitted(),
        invocations_run: invocations.load(Ordering::Relaxed),
        elapsed_ms: elapsed.as_secs_f64() * 1000.0,
        workers,
        snapshot,
    };
    info!(
        groups = report.groups,
        cancelled = report.groups_cancelled,
        invocations = report.invocations_run,
        elapsed_ms = report.elapsed_ms,
        "Workload finished"
    );
    Ok(report)
}
