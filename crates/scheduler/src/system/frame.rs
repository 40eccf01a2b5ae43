use std::ops::Range;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::{Arc, PoisonError};
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, error, warn};

use crate::error::TaskError;
use crate::metrics::{GroupSnapshot, QueueLength, SchedulerSnapshot, ThreadUtilization, WorkerSnapshot};
use crate::parallel::ParallelForParams;
use crate::priority::{PriorityRange, TaskPriority, WorkerThreadType};
use crate::queue::WorkHint;
use crate::task::{Task, TaskContext};
use crate::worker::WorkerState;

use super::wait::WAIT_PARK_TIMEOUT;
use super::TaskSystem;

/// Over budget, `SomeFrameMainThread` work still gets one task per this many frames.
const STARVED_FRAME_INTERVAL: u64 = 10;
/// Weight of the newest frame in the smoothed frame time.
const FRAME_SMOOTHING: f64 = 0.1;

/// Frame timing state of the main thread.
#[derive(Debug)]
pub(crate) struct FrameClock {
    last_frame: Option<Instant>,
    smoothed_ms: f64,
    frame_index: u64,
    target_ms: f64,
    some_frame_tasks: u32,
}

impl FrameClock {
    pub fn new(target_ms: f64, some_frame_tasks: u32) -> Self {
        Self {
            last_frame: None,
            smoothed_ms: target_ms,
            frame_index: 0,
            target_ms,
            some_frame_tasks,
        }
    }

    /// Closes the current frame. Returns its duration and how many
    /// `SomeFrameMainThread` tasks it may run.
    fn tick(&mut self, now: Instant) -> (Duration, u32) {
        let frame = match self.last_frame.replace(now) {
            Some(previous) => now.duration_since(previous),
            None => Duration::from_secs_f64(self.target_ms / 1000.0),
        };
        let frame_ms = frame.as_secs_f64() * 1000.0;
        self.smoothed_ms += (frame_ms - self.smoothed_ms) * FRAME_SMOOTHING;
        self.frame_index += 1;

        let allowed = if self.smoothed_ms <= self.target_ms {
            self.some_frame_tasks
        } else if self.frame_index % STARVED_FRAME_INTERVAL == 0 {
            1
        } else {
            0
        };
        (frame, allowed)
    }
}

impl TaskSystem {
    /// Per-frame main thread hook.
    ///
    /// Runs all `ThisFrameMainThread` work, moves queued frame work one frame
    /// closer, runs some `SomeFrameMainThread` work if the frame budget
    /// allows, and closes the utilization statistics window.
    ///
    /// On return every started `ThisFrameMainThread` group has finished, and
    /// `EarlyThisFrame..=LateThisFrame` work is finished or running. While a
    /// main thread group still waits on its dependencies, the caller helps
    /// with this frame's short work and otherwise sleeps until workers make
    /// progress. It stops waiting once no worker could make progress anymore.
    pub fn finish_frame_tasks(&self) {
        if !self.is_main_thread() {
            warn!("finish_frame_tasks called from a thread other than the main thread");
            return;
        }

        self.drain_this_frame();

        let moved = self.lock().queues.promote_frame_lanes();
        if moved > 0 {
            debug!(moved, "moved queued frame work one frame sooner");
            if let Some(pool) = self.pool(WorkerThreadType::ShortTasks) {
                pool.wake_up(moved);
            }
        }

        let (frame, allowed) = self
            .inner
            .frame
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .tick(Instant::now());
        let some_frame = PriorityRange::single(TaskPriority::SomeFrameMainThread);
        for _ in 0..allowed {
            if !self.execute_one(some_frame, WorkHint::Any) {
                break;
            }
        }

        self.inner.main_slot.roll_utilization(frame);
        for pool in &self.inner.pools {
            for slot in pool.slots() {
                slot.roll_utilization(frame);
            }
        }
    }

    fn drain_this_frame(&self) {
        let main_lane = PriorityRange::single(TaskPriority::ThisFrameMainThread);
        let short_lanes = PriorityRange::new(TaskPriority::EarlyThisFrame, TaskPriority::LateThisFrame);
        loop {
            let epoch = self.inner.progress.epoch();
            if self.execute_one(main_lane, WorkHint::Any)
                || self.execute_one(short_lanes, WorkHint::Any)
            {
                continue;
            }
            if !self.main_thread_groups_pending() {
                return;
            }
            self.inner.progress.wait_since(epoch, WAIT_PARK_TIMEOUT);
        }
    }

    /// True while a started `ThisFrameMainThread` group is unfinished and
    /// running workers can still move it forward.
    ///
    /// Checked under the scheduler lock: a worker resolves dependencies under
    /// it and only goes idle afterwards, so an active worker seen here is one
    /// whose completion has not been observed yet.
    fn main_thread_groups_pending(&self) -> bool {
        let state = self.lock();
        if state
            .queues
            .has_work(PriorityRange::single(TaskPriority::ThisFrameMainThread))
        {
            return true;
        }
        let pending = state.groups.iter_live().any(|(_, g)| {
            g.started
                && g.priority == TaskPriority::ThisFrameMainThread
                && (g.counters.remaining_tasks.load(Ordering::Acquire) > 0
                    || g.counters.active_dependencies.load(Ordering::Acquire) > 0)
        });
        if !pending || !self.inner.running.load(Ordering::Acquire) {
            return false;
        }
        let pooled_work = WorkerThreadType::POOLED
            .iter()
            .any(|kind| state.queues.has_work(kind.priority_range()));
        pooled_work
            || self.inner.pools.iter().any(|pool| {
                pool.slots()
                    .iter()
                    .any(|slot| slot.state() == WorkerState::Active)
            })
    }

    /// Frame time (ms) the main thread aims for.
    pub fn set_target_frame_time(&self, target_ms: f64) {
        if !(target_ms > 0.0) {
            warn!(target_ms, "ignoring non-positive target frame time");
            return;
        }
        self.inner
            .frame
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .target_ms = target_ms;
        self.inner
            .config
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .target_frame_time_ms = target_ms;
    }

    /// Runs `body` over sub-ranges of `start..start + count` in parallel on
    /// the short task workers and waits for all of them.
    ///
    /// Small inputs (or no running short task workers) run serially on the
    /// caller. Fails with [`TaskError::IndexOverflow`] if the range end does
    /// not fit a `usize`.
    pub fn parallel_for_indexed<F>(
        &self,
        start: usize,
        count: usize,
        body: F,
        name: &str,
        params: ParallelForParams,
    ) -> Result<(), TaskError>
    where
        F: Fn(Range<usize>) + Send + Sync + 'static,
    {
        let Some(end) = start.checked_add(count) else {
            let e = TaskError::IndexOverflow { start, count };
            error!(task = name, "{}", e);
            return Err(e);
        };
        let workers = self.worker_thread_count(WorkerThreadType::ShortTasks);
        let multiplicity = params.determine_multiplicity(count, workers);
        if multiplicity == 0 {
            if count > 0 {
                body(start..end);
            }
            return Ok(());
        }

        let per_invocation = params.items_per_invocation(count, multiplicity);
        let task = Arc::new(
            Task::new(name, move |ctx: &TaskContext<'_>| {
                let first = start + ctx.invocation() as usize * per_invocation;
                let last = (first + per_invocation).min(end);
                if first < last {
                    body(first..last);
                }
            })
            .with_multiplicity(multiplicity),
        );
        self.start_single_task(&task, TaskPriority::EarlyThisFrame, None)?;
        self.wait_for_task(&task);
        Ok(())
    }

    /// Statistics of the last finished frame for one thread. Index 0 of
    /// `MainThread` is the main thread.
    pub fn thread_utilization(
        &self,
        kind: WorkerThreadType,
        index: usize,
    ) -> Option<ThreadUtilization> {
        match self.pool(kind) {
            Some(pool) => pool.slot(index).map(|slot| slot.utilization()),
            None => (index == 0).then(|| self.inner.main_slot.utilization()),
        }
    }

    pub fn state_snapshot(&self) -> SchedulerSnapshot {
        let (groups, queues) = {
            let state = self.lock();
            let groups = state
                .groups
                .iter_live()
                .map(|(handle, g)| GroupSnapshot {
                    handle,
                    priority: g.priority,
                    started: g.started,
                    tasks: g.tasks.iter().map(|t| t.name().to_string()).collect(),
                    depends_on: g.depends_on.clone(),
                    dependents: g.dependents.clone(),
                    remaining_tasks: g.counters.remaining_tasks.load(Ordering::Acquire),
                    active_dependencies: g.counters.active_dependencies.load(Ordering::Acquire),
                })
                .collect();
            let queues = TaskPriority::ALL
                .into_iter()
                .map(|priority| QueueLength {
                    priority,
                    len: state.queues.len(priority),
                })
                .filter(|q| q.len > 0)
                .collect();
            (groups, queues)
        };

        let workers = self
            .inner
            .pools
            .iter()
            .flat_map(|pool| pool.slots())
            .map(|slot| WorkerSnapshot {
                kind: slot.kind,
                index: slot.index,
                state: slot.state(),
                tasks_executed: slot.total_executed(),
            })
            .collect();

        SchedulerSnapshot {
            taken_at: Utc::now(),
            groups,
            queues,
            workers,
        }
    }

    /// Writes [`Self::state_snapshot`] as pretty JSON.
    pub fn write_state_snapshot(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let json = self
            .state_snapshot()
            .to_json_pretty()
            .map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }
}
