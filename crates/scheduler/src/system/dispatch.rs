use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use tracing::{debug, error, trace};

use crate::group::{GroupRef, TaskGroupHandle};
use crate::priority::{PriorityRange, WorkerThreadType};
use crate::queue::{WorkHint, WorkItem};
use crate::worker::{self, WorkerSlot, WorkerState};

use super::core::{Inner, SchedulerState};
use super::TaskSystem;

/// Workers to wake per pooled category, collected under the lock and applied
/// after it is released.
#[derive(Debug, Default)]
pub(crate) struct WakeRequests([usize; 3]);

impl WakeRequests {
    pub fn add(&mut self, kind: WorkerThreadType, count: usize) {
        if let Some(i) = kind.pool_index() {
            self.0[i] = self.0[i].saturating_add(count);
        }
    }
}

impl TaskSystem {
    pub(crate) fn apply_wakes(&self, wakes: &WakeRequests) {
        for (pool, &count) in self.inner.pools.iter().zip(wakes.0.iter()) {
            if count > 0 {
                pool.wake_up(count);
            }
        }
    }

    /// Expands a ready group into work items. An empty group gets a single
    /// pending unit and is returned; the caller completes it outside the lock.
    ///
    /// `front` puts the items at the head of their lane, for groups released
    /// by a finished dependency.
    pub(crate) fn schedule_locked(
        &self,
        state: &mut SchedulerState,
        group: TaskGroupHandle,
        front: bool,
        wakes: &mut WakeRequests,
    ) -> Option<GroupRef> {
        let slot = state.groups.get(group)?;
        let group_ref = GroupRef {
            handle: group,
            counters: Arc::clone(&slot.counters),
        };
        if slot.tasks.is_empty() {
            group_ref.counters.remaining_tasks.store(1, Ordering::Release);
            return Some(group_ref);
        }

        let priority = slot.priority;
        let tasks = slot.tasks.clone();
        // add_task keeps the sum within u32.
        let total = tasks
            .iter()
            .fold(0u32, |total, t| total.saturating_add(t.invocation_count()));
        group_ref
            .counters
            .remaining_tasks
            .store(total, Ordering::Release);

        let mut items = Vec::with_capacity(total as usize);
        for task in &tasks {
            for invocation in 0..task.invocation_count() {
                items.push(WorkItem {
                    task: Arc::clone(task),
                    invocation,
                    group: group_ref.clone(),
                });
            }
            task.mark_enqueued();
        }
        if front {
            // Pushing to the front one by one reverses; keep group order.
            for item in items.into_iter().rev() {
                state.queues.push(priority, item, true);
            }
        } else {
            for item in items {
                state.queues.push(priority, item, false);
            }
        }

        wakes.add(priority.worker_type(), total as usize);
        None
    }

    /// Pops and runs one work item from `range`. False if there was none.
    pub(crate) fn execute_one(&self, range: PriorityRange, hint: WorkHint<'_>) -> bool {
        let item = self.lock().queues.pop(range, hint);
        match item {
            Some(item) => {
                self.run_work_item(item);
                true
            }
            None => false,
        }
    }

    pub(crate) fn has_work(&self, range: PriorityRange) -> bool {
        self.lock().queues.has_work(range)
    }

    fn run_work_item(&self, item: WorkItem) {
        let WorkItem {
            task,
            invocation,
            group,
        } = item;
        trace!(task = task.name(), invocation, group = %group.handle, "executing work item");

        let started = Instant::now();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| task.run(invocation, self)));
        if outcome.is_err() {
            error!(task = task.name(), invocation, "task body panicked");
        }
        if let Some(slot) = self.current_slot() {
            slot.record_execution(started.elapsed());
        }

        task.finish_runs(1);
        self.complete_work(group);
        self.inner.progress.notify();
    }

    /// One unit of a group's work is done. The last unit finishes the group.
    pub(crate) fn complete_work(&self, group: GroupRef) {
        if group
            .counters
            .remaining_tasks
            .fetch_sub(1, Ordering::AcqRel)
            == 1
        {
            self.finish_groups(group);
        }
    }

    /// Finishes a group and, iteratively, every empty dependent that becomes
    /// ready because of it.
    ///
    /// The generation bump comes first: from then on the handle is dead, so
    /// no new dependent can register itself. The dependents that did register
    /// are drained under the lock.
    fn finish_groups(&self, group: GroupRef) {
        let mut pending = vec![group];
        while let Some(group) = pending.pop() {
            group.counters.bump_generation();

            let mut wakes = WakeRequests::default();
            let on_finished = {
                let mut state = self.lock();
                let slot = state.groups.slot_mut(group.handle.index());
                let dependents = std::mem::take(&mut slot.dependents);
                let on_finished = slot.on_finished.take();
                for dependent in dependents {
                    if let Some(ready) = self.dependency_resolved(&mut state, dependent, &mut wakes) {
                        if ready
                            .counters
                            .remaining_tasks
                            .fetch_sub(1, Ordering::AcqRel)
                            == 1
                        {
                            pending.push(ready);
                        }
                    }
                }
                on_finished
            };
            self.apply_wakes(&wakes);

            debug!(group = %group.handle, "task group finished");
            if let Some(callback) = on_finished {
                let handle = group.handle;
                if panic::catch_unwind(AssertUnwindSafe(move || callback(handle))).is_err() {
                    error!(group = %handle, "task group callback panicked");
                }
            }
            self.lock().groups.release(group.handle.index());
            self.inner.progress.notify();
        }
    }

    fn dependency_resolved(
        &self,
        state: &mut SchedulerState,
        dependent: TaskGroupHandle,
        wakes: &mut WakeRequests,
    ) -> Option<GroupRef> {
        let counters = Arc::clone(&state.groups.get(dependent)?.counters);
        if counters.active_dependencies.fetch_sub(1, Ordering::AcqRel) != 1 {
            return None;
        }
        debug!(group = %dependent, "dependencies resolved, scheduling");
        self.schedule_locked(state, dependent, true, wakes)
    }
}

/// Body of every pool thread.
///
/// Holds only a weak reference while parked, so dropping the last
/// [`TaskSystem`] handle lets the thread exit.
pub(crate) fn run_worker(
    weak: Weak<Inner>,
    system_id: usize,
    slot: Arc<WorkerSlot>,
    stop: Arc<AtomicBool>,
) {
    worker::set_current_worker(system_id, Arc::clone(&slot));
    let range = slot.kind.priority_range();
    debug!(kind = ?slot.kind, index = slot.index, "worker started");

    while !stop.load(Ordering::Acquire) {
        let Some(system) = TaskSystem::upgrade(&weak) else {
            break;
        };
        if system.execute_one(range, WorkHint::Any) {
            continue;
        }

        // Going idle first means a producer either sees us as wakeable or
        // we see its work here.
        slot.set_state(WorkerState::Idle);
        if system.has_work(range) {
            slot.set_state(WorkerState::Active);
            continue;
        }
        drop(system);
        slot.park(&stop);
        slot.set_state(WorkerState::Active);
    }

    slot.set_state(WorkerState::Idle);
    worker::clear_current_worker();
    debug!(kind = ?slot.kind, index = slot.index, "worker stopped");
}
