use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::group::TaskGroupHandle;
use crate::priority::{TaskPriority, WorkerThreadType};
use crate::worker::WorkerState;

/// Per-thread statistics for the last completed frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ThreadUtilization {
    /// Busy time divided by frame time (0.0 - 1.0).
    pub utilization: f64,
    pub tasks_executed: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkerSnapshot {
    pub kind: WorkerThreadType,
    pub index: usize,
    pub state: WorkerState,
    /// Work items executed since the thread started.
    pub tasks_executed: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupSnapshot {
    pub handle: TaskGroupHandle,
    pub priority: TaskPriority,
    pub started: bool,
    pub tasks: Vec<String>,
    pub depends_on: Vec<TaskGroupHandle>,
    pub dependents: Vec<TaskGroupHandle>,
    pub remaining_tasks: u32,
    pub active_dependencies: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueLength {
    pub priority: TaskPriority,
    pub len: usize,
}

/// Point-in-time view of the scheduler, for debugging stalls.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerSnapshot {
    pub taken_at: DateTime<Utc>,
    pub groups: Vec<GroupSnapshot>,
    /// Non-empty lanes only.
    pub queues: Vec<QueueLength>,
    pub workers: Vec<WorkerSnapshot>,
}

impl SchedulerSnapshot {
    pub fn queued_work_items(&self) -> usize {
        self.queues.iter().map(|q| q.len).sum()
    }

    /// Groups that were started but still wait on dependencies.
    pub fn waiting_groups(&self) -> impl Iterator<Item = &GroupSnapshot> {
        self.groups
            .iter()
            .filter(|g| g.started && g.active_dependencies > 0)
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
