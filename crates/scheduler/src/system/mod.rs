//! The task system -- owns the group table, the priority queues, and the
//! worker pools, and ties them together.
//!
//! Split into focused submodules:
//! - `core`: TaskSystem handle, construction, worker pool lifecycle, thread roles
//! - `groups`: group creation, population, dependency edges, start
//! - `dispatch`: scheduling, work item execution, completion propagation, worker loop
//! - `wait`: cooperative waiting
//! - `cancel`: best-effort cancellation
//! - `frame`: per-frame main thread work, parallel-for, introspection

mod cancel;
mod core;
mod dispatch;
mod frame;
mod groups;
mod wait;

pub use self::core::TaskSystem;
