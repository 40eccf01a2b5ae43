use std::sync::Arc;

use tracing::{debug, error};

use crate::error::TaskError;
use crate::group::{GroupRef, TaskGroupHandle};
use crate::priority::TaskPriority;
use crate::task::Task;

use super::core::SchedulerState;
use super::dispatch::WakeRequests;
use super::TaskSystem;

impl TaskSystem {
    /// Allocate an empty group. Fill it with [`Self::add_task`] and
    /// [`Self::add_dependency`], then [`Self::start_group`] it.
    pub fn create_group(&self, priority: TaskPriority) -> TaskGroupHandle {
        self.lock().groups.allocate(priority, None)
    }

    /// Like [`Self::create_group`], with a callback fired once the group
    /// finishes. The callback runs on whichever thread finished the group's
    /// last work item, outside the scheduler lock.
    pub fn create_group_with_callback(
        &self,
        priority: TaskPriority,
        on_finished: impl FnOnce(TaskGroupHandle) + Send + 'static,
    ) -> TaskGroupHandle {
        self.lock()
            .groups
            .allocate(priority, Some(Box::new(on_finished)))
    }

    /// Add a task to a group that was not started yet. The task must not be
    /// in flight from an earlier scheduling cycle.
    pub fn add_task(&self, group: TaskGroupHandle, task: &Arc<Task>) -> Result<(), TaskError> {
        if task.name().is_empty() {
            error!(group = %group, "refusing to add a task without a name");
            return Err(TaskError::UnnamedTask);
        }
        let mut state = self.lock();
        let slot = mutable_group(&mut state, group)?;
        if let Err(e) = task.ensure_not_in_flight() {
            error!(group = %group, "{}", e);
            return Err(e);
        }
        let fits = slot
            .tasks
            .iter()
            .try_fold(task.invocation_count(), |total, t| {
                total.checked_add(t.invocation_count())
            })
            .is_some();
        if !fits {
            let e = TaskError::TooManyInvocations {
                group,
                name: task.name().to_string(),
            };
            error!(group = %group, "{}", e);
            return Err(e);
        }
        task.reset_for_group(group);
        slot.tasks.push(Arc::clone(task));
        Ok(())
    }

    /// `group` will not be scheduled before `depends_on` finished. A
    /// `depends_on` handle that is already dead is accepted and ignored at
    /// start time.
    pub fn add_dependency(
        &self,
        group: TaskGroupHandle,
        depends_on: TaskGroupHandle,
    ) -> Result<(), TaskError> {
        let mut state = self.lock();
        add_dependency_locked(&mut state, group, depends_on)
    }

    /// Registers every edge under one lock acquisition. Each edge is checked
    /// on its own; valid edges are added even if another one fails, and the
    /// first failure is returned.
    pub fn add_dependency_batch(
        &self,
        edges: &[(TaskGroupHandle, TaskGroupHandle)],
    ) -> Result<(), TaskError> {
        let mut state = self.lock();
        let mut first_error = None;
        for &(group, depends_on) in edges {
            if let Err(e) = add_dependency_locked(&mut state, group, depends_on) {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Start a group: it runs as soon as every dependency that is still live
    /// has finished. A group without tasks finishes right here if it has no
    /// pending dependencies.
    pub fn start_group(&self, group: TaskGroupHandle) -> Result<(), TaskError> {
        self.start_group_batch(&[group])
    }

    /// Starts every group under one lock acquisition. Groups are started in
    /// order; a failing handle does not stop the others and the first failure
    /// is returned.
    pub fn start_group_batch(&self, groups: &[TaskGroupHandle]) -> Result<(), TaskError> {
        let mut wakes = WakeRequests::default();
        let mut finished = Vec::new();
        let mut first_error = None;
        {
            let mut state = self.lock();
            for &group in groups {
                match self.start_locked(&mut state, group, &mut wakes) {
                    Ok(Some(empty)) => finished.push(empty),
                    Ok(None) => {}
                    Err(e) => {
                        first_error.get_or_insert(e);
                    }
                }
            }
        }
        self.apply_wakes(&wakes);
        for group in finished {
            self.complete_work(group);
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Shorthand for a one-task group, optionally after `depends_on`.
    pub fn start_single_task(
        &self,
        task: &Arc<Task>,
        priority: TaskPriority,
        depends_on: Option<TaskGroupHandle>,
    ) -> Result<TaskGroupHandle, TaskError> {
        let group = self.create_group(priority);
        let populated = self.add_task(group, task).and_then(|()| match depends_on {
            Some(dependency) => self.add_dependency(group, dependency),
            None => Ok(()),
        });
        if let Err(e) = populated {
            // Still start it so the slot finishes and returns to the pool.
            let _ = self.start_group(group);
            return Err(e);
        }
        self.start_group(group)?;
        Ok(group)
    }

    /// True once the group finished. Dead and never-issued handles count as
    /// finished, and a handle never turns unfinished again.
    pub fn is_group_finished(&self, group: TaskGroupHandle) -> bool {
        !self.lock().groups.is_live(group)
    }

    /// Register-then-count: the group is listed as a dependent of every live
    /// dependency before its pending counter is set, all under the scheduler
    /// lock that completion also takes. Returns the group if it is ready and
    /// empty, so the caller can run its completion outside the lock.
    fn start_locked(
        &self,
        state: &mut SchedulerState,
        group: TaskGroupHandle,
        wakes: &mut WakeRequests,
    ) -> Result<Option<GroupRef>, TaskError> {
        let slot = mutable_group(state, group)?;
        slot.started = true;
        let depends_on = slot.depends_on.clone();
        let counters = Arc::clone(&slot.counters);

        let mut unresolved = 0u32;
        for dependency in depends_on {
            if let Some(dep) = state.groups.get_mut(dependency) {
                dep.dependents.push(group);
                unresolved += 1;
            }
        }

        if unresolved > 0 {
            counters
                .active_dependencies
                .store(unresolved, std::sync::atomic::Ordering::Release);
            debug!(group = %group, unresolved, "task group waiting on dependencies");
            return Ok(None);
        }
        debug!(group = %group, "task group started");
        Ok(self.schedule_locked(state, group, false, wakes))
    }
}

/// A live group that may still be mutated.
fn mutable_group(
    state: &mut SchedulerState,
    group: TaskGroupHandle,
) -> Result<&mut crate::group::TaskGroup, TaskError> {
    let Some(slot) = state.groups.get_mut(group) else {
        error!(group = %group, "task group is not live");
        return Err(TaskError::StaleGroup(group));
    };
    if slot.started {
        error!(group = %group, "task group was already started");
        return Err(TaskError::GroupAlreadyStarted(group));
    }
    Ok(slot)
}

fn add_dependency_locked(
    state: &mut SchedulerState,
    group: TaskGroupHandle,
    depends_on: TaskGroupHandle,
) -> Result<(), TaskError> {
    if group == depends_on {
        error!(group = %group, "task group cannot depend on itself");
        return Err(TaskError::SelfDependency);
    }
    let slot = mutable_group(state, group)?;
    slot.depends_on.push(depends_on);
    Ok(())
}
