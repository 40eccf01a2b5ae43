use std::sync::Arc;
use std::time::Duration;

use crossbeam_utils::Backoff;
use tracing::debug;

use crate::group::TaskGroupHandle;
use crate::priority::WorkerThreadType;
use crate::queue::WorkHint;
use crate::task::Task;
use crate::worker::{WorkerSlot, WorkerState};

use super::TaskSystem;

/// How long a background waiter sleeps when there is nothing it may execute.
pub(super) const WAIT_PARK_TIMEOUT: Duration = Duration::from_millis(1);

/// Marks a worker as blocked for the duration of a wait, so it does not
/// count against its pool's concurrency budget.
struct BlockedGuard {
    slot: Arc<WorkerSlot>,
}

impl Drop for BlockedGuard {
    fn drop(&mut self) {
        self.slot.set_state(WorkerState::Active);
    }
}

impl TaskSystem {
    /// Block until every invocation of `task` finished, executing other work
    /// meanwhile. Returns at once for a task that is not scheduled.
    pub fn wait_for_task(&self, task: &Task) {
        self.wait_until(WorkHint::Task(task), || task.is_finished());
    }

    /// Block until the group finished, executing other work meanwhile
    /// (preferably the group's own). Returns at once for dead handles.
    pub fn wait_for_group(&self, group: TaskGroupHandle) {
        let Some(counters) = self.lock().groups.group_ref(group).map(|g| g.counters) else {
            return;
        };
        self.wait_until(WorkHint::Group(group), || {
            counters.generation() != group.generation()
        });
    }

    /// Block until `condition` holds, executing other work meanwhile. There
    /// is no timeout; put one into the condition if needed.
    pub fn wait_for_condition(&self, condition: impl Fn() -> bool) {
        self.wait_until(WorkHint::Any, condition);
    }

    /// The cooperative wait loop: execute, then park (or yield on the main
    /// thread), then recheck.
    ///
    /// A worker that runs out of work to execute marks itself blocked and
    /// wakes a sibling. If no sibling is idle but work is queued for its
    /// category, another worker is allocated; otherwise every worker of a
    /// pool could end up waiting on work none of them is free to run.
    pub(crate) fn wait_until(&self, hint: WorkHint<'_>, done: impl Fn() -> bool) {
        let kind = self.current_thread_worker_type();
        let range = kind.priority_range();
        let worker = crate::worker::current_worker(self.inner.id);
        let backoff = Backoff::new();
        let mut blocked: Option<BlockedGuard> = None;

        loop {
            let epoch = self.inner.progress.epoch();
            if done() {
                return;
            }
            if self.execute_one(range, hint) {
                blocked = None;
                backoff.reset();
                continue;
            }
            if done() {
                return;
            }

            match (&worker, kind) {
                (_, WorkerThreadType::MainThread) => backoff.snooze(),
                (Some(slot), _) => {
                    if blocked.is_none() {
                        blocked = Some(self.block_worker(slot));
                    }
                    self.inner.progress.wait_since(epoch, WAIT_PARK_TIMEOUT);
                }
                (None, _) => self.inner.progress.wait_since(epoch, WAIT_PARK_TIMEOUT),
            }
        }
    }

    fn block_worker(&self, slot: &Arc<WorkerSlot>) -> BlockedGuard {
        slot.set_state(WorkerState::Blocked);
        let guard = BlockedGuard {
            slot: Arc::clone(slot),
        };
        let Some(pool) = self.pool(slot.kind) else {
            return guard;
        };
        if pool.wake_up(1) == 0 && self.has_work(slot.kind.priority_range()) {
            debug!(
                kind = ?slot.kind,
                allocated = pool.allocated() + 1,
                "all workers busy or blocked, allocating another"
            );
            self.spawn_worker(slot.kind);
        }
        guard
    }
}
