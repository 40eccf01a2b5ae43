//! Priority-aware, dependency-ordered task scheduler.
//!
//! Work is submitted as [`Task`]s collected into task groups. Groups carry
//! dependency edges to other groups and a [`TaskPriority`] that picks both the
//! queue and the worker category that executes them. See [`TaskSystem`] for the
//! full API.

pub mod error;
pub mod group;
pub mod metrics;
pub mod parallel;
pub mod priority;
mod queue;
pub mod system;
pub mod task;
pub mod worker;

pub use error::{CancelOutcome, OnTaskRunning, TaskError};
pub use group::{OnGroupFinished, TaskGroupHandle};
pub use metrics::{GroupSnapshot, QueueLength, SchedulerSnapshot, ThreadUtilization, WorkerSnapshot};
pub use parallel::ParallelForParams;
pub use priority::{PriorityRange, TaskPriority, WorkerThreadType};
pub use system::TaskSystem;
pub use task::{OnTaskFinished, Task, TaskContext, TaskWork};
pub use worker::WorkerState;

pub use taskweave_core::TaskSystemConfig;
