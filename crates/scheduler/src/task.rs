use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use tracing::error;

use crate::error::TaskError;
use crate::group::TaskGroupHandle;
use crate::system::TaskSystem;

/// The body of a task. Invoked once per invocation index.
///
/// Implemented for every `Fn(&TaskContext)` closure, so most callers never
/// implement it by hand.
pub trait TaskWork: Send + Sync {
    fn execute(&self, ctx: &TaskContext<'_>);
}

impl<F> TaskWork for F
where
    F: Fn(&TaskContext<'_>) + Send + Sync,
{
    fn execute(&self, ctx: &TaskContext<'_>) {
        self(ctx)
    }
}

/// Fired exactly once per scheduling cycle, after the last invocation (or
/// after the task was cancelled out of a queue). Runs on whichever thread
/// finished the task, not on the submitting thread.
pub type OnTaskFinished = Box<dyn Fn(&Task) + Send + Sync>;

/// What a running invocation can see about itself.
pub struct TaskContext<'a> {
    task: &'a Task,
    invocation: u32,
    system: &'a TaskSystem,
}

impl<'a> TaskContext<'a> {
    /// Index of this invocation, in `0..max(1, multiplicity)`.
    pub fn invocation(&self) -> u32 {
        self.invocation
    }

    pub fn task(&self) -> &Task {
        self.task
    }

    /// Cooperative cancellation: long bodies should poll this and return early.
    pub fn is_cancelled(&self) -> bool {
        self.task.is_cancellation_requested()
    }

    /// The scheduler running this task, for submitting or waiting on follow-up work.
    pub fn system(&self) -> &TaskSystem {
        self.system
    }
}

/// A unit of work, optionally replicated `multiplicity` times.
///
/// Tasks are owned by the caller (usually behind an `Arc`); the scheduler holds
/// a reference for one scheduling cycle. A task can be added to a new group
/// again once it has finished.
pub struct Task {
    name: String,
    work: Box<dyn TaskWork>,
    on_finished: Option<OnTaskFinished>,
    multiplicity: AtomicU32,
    remaining_runs: AtomicU32,
    cancel_requested: AtomicBool,
    enqueued: AtomicBool,
    /// Packed handle of the owning group, 0 when never added.
    group: AtomicU64,
}

impl Task {
    pub fn new(name: impl Into<String>, work: impl TaskWork + 'static) -> Self {
        Self {
            name: name.into(),
            work: Box::new(work),
            on_finished: None,
            multiplicity: AtomicU32::new(0),
            remaining_runs: AtomicU32::new(0),
            cancel_requested: AtomicBool::new(false),
            enqueued: AtomicBool::new(false),
            group: AtomicU64::new(0),
        }
    }

    /// Run `multiplicity` independent invocations. 0 and 1 both mean "once".
    pub fn with_multiplicity(self, multiplicity: u32) -> Self {
        self.multiplicity.store(multiplicity, Ordering::Relaxed);
        self
    }

    pub fn with_on_finished(mut self, callback: impl Fn(&Task) + Send + Sync + 'static) -> Self {
        self.on_finished = Some(Box::new(callback));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn multiplicity(&self) -> u32 {
        self.multiplicity.load(Ordering::Acquire)
    }

    /// Changes the multiplicity for the next scheduling cycle.
    pub fn set_multiplicity(&self, multiplicity: u32) -> Result<(), TaskError> {
        self.ensure_not_in_flight()?;
        self.multiplicity.store(multiplicity, Ordering::Release);
        Ok(())
    }

    /// Number of work items this task expands into: `max(1, multiplicity)`.
    pub fn invocation_count(&self) -> u32 {
        self.multiplicity().max(1)
    }

    pub fn remaining_runs(&self) -> u32 {
        self.remaining_runs.load(Ordering::Acquire)
    }

    /// True when no invocation is pending or running. A task that was never
    /// added to a group counts as finished.
    pub fn is_finished(&self) -> bool {
        self.remaining_runs() == 0
    }

    pub fn is_cancellation_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::Acquire)
    }

    /// True once the owning group pushed this task's work items onto a queue.
    pub fn is_enqueued(&self) -> bool {
        self.enqueued.load(Ordering::Acquire)
    }

    /// The group this task was last added to.
    pub fn group(&self) -> Option<TaskGroupHandle> {
        let handle = TaskGroupHandle::unpack(self.group.load(Ordering::Acquire));
        handle.is_valid().then_some(handle)
    }

    pub(crate) fn ensure_not_in_flight(&self) -> Result<(), TaskError> {
        let remaining = self.remaining_runs();
        if remaining != 0 {
            return Err(TaskError::TaskInFlight {
                name: self.name.clone(),
                remaining,
            });
        }
        Ok(())
    }

    /// Stamps the owning group and arms the counters for a new cycle.
    pub(crate) fn reset_for_group(&self, group: TaskGroupHandle) {
        self.cancel_requested.store(false, Ordering::Release);
        self.enqueued.store(false, Ordering::Release);
        self.group.store(group.pack(), Ordering::Release);
        self.remaining_runs
            .store(self.invocation_count(), Ordering::Release);
    }

    pub(crate) fn mark_enqueued(&self) {
        self.enqueued.store(true, Ordering::Release);
    }

    pub(crate) fn request_cancel(&self) {
        self.cancel_requested.store(true, Ordering::Release);
    }

    /// Marks a task finished that never reached a queue. No callback fires.
    pub(crate) fn force_finished(&self) {
        self.remaining_runs.store(0, Ordering::Release);
    }

    pub(crate) fn run(&self, invocation: u32, system: &TaskSystem) {
        let ctx = TaskContext {
            task: self,
            invocation,
            system,
        };
        self.work.execute(&ctx);
    }

    /// Accounts for `runs` finished (or discarded) invocations. Fires the
    /// completion callback and returns true when the last one is gone.
    pub(crate) fn finish_runs(&self, runs: u32) -> bool {
        if runs == 0 {
            return false;
        }
        let previous = self.remaining_runs.fetch_sub(runs, Ordering::AcqRel);
        debug_assert!(previous >= runs, "task '{}' finished more runs than scheduled", self.name);
        if previous != runs {
            return false;
        }
        if let Some(callback) = &self.on_finished {
            if panic::catch_unwind(AssertUnwindSafe(|| callback(self))).is_err() {
                error!(task = %self.name, "task finished callback panicked");
            }
        }
        true
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("multiplicity", &self.multiplicity())
            .field("remaining_runs", &self.remaining_runs())
            .field("cancel_requested", &self.is_cancellation_requested())
            .field("group", &self.group())
            .finish()
    }
}
