use serde::Serialize;

use crate::group::TaskGroupHandle;

/// Misuse of the scheduling API. These indicate a broken call sequence and are
/// logged at the point of detection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    #[error("task has no name")]
    UnnamedTask,
    #[error("task '{name}' is still in flight ({remaining} runs remaining)")]
    TaskInFlight { name: String, remaining: u32 },
    #[error("task group cannot depend on itself")]
    SelfDependency,
    #[error("task group {0} was already started")]
    GroupAlreadyStarted(TaskGroupHandle),
    #[error("task group {0} is not live (finished or never created)")]
    StaleGroup(TaskGroupHandle),
    #[error("worker pools cannot be reconfigured from a worker thread")]
    CalledFromWorker,
    #[error("adding task '{name}' would push group {group} past u32::MAX invocations")]
    TooManyInvocations { group: TaskGroupHandle, name: String },
    #[error("index range {start} + {count} overflows usize")]
    IndexOverflow { start: usize, count: usize },
}

/// What `cancel_task` / `cancel_group` should do when work is already executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OnTaskRunning {
    /// Block (cooperatively) until the running work is done.
    #[default]
    WaitTillFinished,
    /// Report the running work and return immediately.
    ReturnWithoutBlocking,
}

/// Result of a cancellation request. Not an error: losing the race against a
/// worker that already picked the task up is an expected outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[must_use]
pub enum CancelOutcome {
    /// Nothing left to cancel.
    AlreadyFinished,
    /// Execution was prevented; the work never ran.
    Removed,
    /// The work is executing on another thread and could not be stopped.
    StillRunning,
    /// The work could not be prevented, but it has finished by now.
    RanToCompletion,
}

impl CancelOutcome {
    /// True if no task body ran (or had to run) because of this request.
    pub fn is_success(self) -> bool {
        matches!(self, CancelOutcome::AlreadyFinished | CancelOutcome::Removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_view() {
        assert!(CancelOutcome::AlreadyFinished.is_success());
        assert!(CancelOutcome::Removed.is_success());
        assert!(!CancelOutcome::StillRunning.is_success());
        assert!(!CancelOutcome::RanToCompletion.is_success());
    }

    #[test]
    fn error_messages_name_the_problem() {
        let err = TaskError::TaskInFlight {
            name: "decode".to_string(),
            remaining: 2,
        };
        assert_eq!(err.to_string(), "task 'decode' is still in flight (2 runs remaining)");
        assert_eq!(TaskError::SelfDependency.to_string(), "task group cannot depend on itself");
    }
}
