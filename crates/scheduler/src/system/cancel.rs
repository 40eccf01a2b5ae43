use std::sync::Arc;

use tracing::debug;

use crate::error::{CancelOutcome, OnTaskRunning};
use crate::group::TaskGroupHandle;
use crate::task::Task;

use super::TaskSystem;

impl TaskSystem {
    /// Best-effort cancellation of one task.
    ///
    /// Sets the task's cancellation flag, then removes whatever has not run
    /// yet: the task itself if its group was not scheduled, or its queued
    /// work items. Invocations that are already executing are never
    /// interrupted; `on_running` decides whether to wait for them.
    pub fn cancel_task(&self, task: &Task, on_running: OnTaskRunning) -> CancelOutcome {
        if task.is_finished() {
            return CancelOutcome::AlreadyFinished;
        }
        task.request_cancel();

        let removed = {
            let mut state = self.lock();
            if task.is_finished() {
                return CancelOutcome::AlreadyFinished;
            }
            if !task.is_enqueued() {
                if let Some(owner) = task.group() {
                    if let Some(slot) = state.groups.get_mut(owner) {
                        slot.tasks.retain(|t| !std::ptr::eq(Arc::as_ptr(t), task));
                    }
                }
                task.force_finished();
                debug!(task = task.name(), "cancelled task before it was scheduled");
                return CancelOutcome::Removed;
            }
            state.queues.remove_task(task)
        };

        let prevented = !removed.is_empty();
        if prevented {
            debug!(task = task.name(), items = removed.len(), "cancelled queued work items");
            task.finish_runs(removed.len() as u32);
            for item in removed {
                self.complete_work(item.group);
            }
            self.inner.progress.notify();
        }

        if task.is_finished() {
            return if prevented {
                CancelOutcome::Removed
            } else {
                CancelOutcome::RanToCompletion
            };
        }
        match on_running {
            OnTaskRunning::ReturnWithoutBlocking => CancelOutcome::StillRunning,
            OnTaskRunning::WaitTillFinished => {
                self.wait_for_task(task);
                CancelOutcome::RanToCompletion
            }
        }
    }

    /// Cancels every task of a group. A first pass never blocks, so as many
    /// tasks as possible are removed before anything is waited for; with
    /// `WaitTillFinished` a second pass waits for the ones that were running.
    ///
    /// Succeeds only if no task body had to run.
    pub fn cancel_group(&self, group: TaskGroupHandle, on_running: OnTaskRunning) -> CancelOutcome {
        let tasks = match self.lock().groups.get(group) {
            Some(slot) => slot.tasks.clone(),
            None => return CancelOutcome::AlreadyFinished,
        };

        let mut all_finished = true;
        let mut running = Vec::new();
        for task in &tasks {
            let outcome = self.cancel_task(task, OnTaskRunning::ReturnWithoutBlocking);
            all_finished &= outcome == CancelOutcome::AlreadyFinished;
            if !outcome.is_success() {
                running.push(task);
            }
        }

        if running.is_empty() {
            return if all_finished && !tasks.is_empty() {
                CancelOutcome::AlreadyFinished
            } else {
                CancelOutcome::Removed
            };
        }
        debug!(group = %group, running = running.len(), "group cancellation could not prevent every task");
        match on_running {
            OnTaskRunning::ReturnWithoutBlocking => CancelOutcome::StillRunning,
            OnTaskRunning::WaitTillFinished => {
                for task in running {
                    let _ = self.cancel_task(task, OnTaskRunning::WaitTillFinished);
                }
                CancelOutcome::RanToCompletion
            }
        }
    }
}
