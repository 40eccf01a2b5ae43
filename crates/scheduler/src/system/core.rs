use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::thread::{self, ThreadId};
use std::time::Duration;

use tracing::{debug, error, info};

use taskweave_core::TaskSystemConfig;

use crate::error::TaskError;
use crate::group::GroupTable;
use crate::priority::WorkerThreadType;
use crate::queue::PriorityQueues;
use crate::worker::{self, WorkerPool, WorkerSlot};

use super::dispatch;
use super::frame::FrameClock;

static NEXT_SYSTEM_ID: AtomicUsize = AtomicUsize::new(1);

/// Structural scheduler state. Guarded by the one scheduler lock.
pub(crate) struct SchedulerState {
    pub groups: GroupTable,
    pub queues: PriorityQueues,
}

/// Epoch counter bumped whenever work finishes. Waiters that cannot execute
/// anything themselves sleep on it.
pub(crate) struct Progress {
    epoch: Mutex<u64>,
    signal: Condvar,
}

impl Progress {
    fn new() -> Self {
        Self {
            epoch: Mutex::new(0),
            signal: Condvar::new(),
        }
    }

    pub fn epoch(&self) -> u64 {
        *self.epoch.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn notify(&self) {
        let mut epoch = self.epoch.lock().unwrap_or_else(PoisonError::into_inner);
        *epoch = epoch.wrapping_add(1);
        self.signal.notify_all();
    }

    /// Returns once the epoch moved past `seen` or `timeout` passed.
    pub fn wait_since(&self, seen: u64, timeout: Duration) {
        let epoch = self.epoch.lock().unwrap_or_else(PoisonError::into_inner);
        if *epoch != seen {
            return;
        }
        let _ = self
            .signal
            .wait_timeout(epoch, timeout)
            .unwrap_or_else(PoisonError::into_inner);
    }
}

pub(crate) struct Inner {
    pub id: usize,
    pub state: Mutex<SchedulerState>,
    pub pools: [WorkerPool; 3],
    pub running: AtomicBool,
    /// Serializes pool start/stop.
    pub lifecycle: Mutex<()>,
    pub progress: Progress,
    pub main_thread: Mutex<ThreadId>,
    pub main_slot: Arc<WorkerSlot>,
    pub frame: Mutex<FrameClock>,
    pub config: RwLock<TaskSystemConfig>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        // May run on a worker thread, so only signal; never join here.
        for pool in &self.pools {
            drop(pool.stop());
        }
    }
}

/// Handle to a task system. Cheap to clone; every clone drives the same
/// scheduler.
///
/// Workers are not started by [`TaskSystem::new`]: call
/// [`TaskSystem::start_workers`] (or [`TaskSystem::set_worker_thread_count`])
/// before expecting queued work to run on its own. Until then only threads
/// that wait on work execute it.
///
/// Dropping the last handle stops the workers without joining them; call
/// [`TaskSystem::shutdown`] to join.
#[derive(Clone)]
pub struct TaskSystem {
    pub(crate) inner: Arc<Inner>,
}

impl Default for TaskSystem {
    fn default() -> Self {
        Self::new(TaskSystemConfig::default())
    }
}

impl std::fmt::Debug for TaskSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskSystem")
            .field("id", &self.inner.id)
            .field("running", &self.inner.running.load(Ordering::Relaxed))
            .finish()
    }
}

impl TaskSystem {
    /// Create a task system. The calling thread becomes the main thread.
    pub fn new(config: TaskSystemConfig) -> Self {
        let frame = FrameClock::new(config.target_frame_time_ms, config.some_frame_tasks_per_frame);
        let inner = Inner {
            id: NEXT_SYSTEM_ID.fetch_add(1, Ordering::Relaxed),
            state: Mutex::new(SchedulerState {
                groups: GroupTable::new(),
                queues: PriorityQueues::new(),
            }),
            pools: WorkerThreadType::POOLED.map(WorkerPool::new),
            running: AtomicBool::new(false),
            lifecycle: Mutex::new(()),
            progress: Progress::new(),
            main_thread: Mutex::new(thread::current().id()),
            main_slot: Arc::new(WorkerSlot::new(WorkerThreadType::MainThread, 0)),
            frame: Mutex::new(frame),
            config: RwLock::new(config),
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    pub(crate) fn upgrade(weak: &Weak<Inner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn pool(&self, kind: WorkerThreadType) -> Option<&WorkerPool> {
        kind.pool_index().map(|i| &self.inner.pools[i])
    }

    /// Current configuration, including thread counts set at runtime.
    pub fn config(&self) -> TaskSystemConfig {
        self.inner
            .config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    // ── Worker pools ─────────────────────────────────────────────

    /// Spawn the worker pools from the current configuration. Does nothing if
    /// they are already running.
    pub fn start_workers(&self) -> Result<(), TaskError> {
        self.ensure_not_worker("start_workers")?;
        let _lifecycle = self
            .inner
            .lifecycle
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if self.inner.running.load(Ordering::Acquire) {
            return Ok(());
        }
        self.spawn_pools();
        Ok(())
    }

    /// Stop and join the current workers, then restart the pools with the
    /// given short and long task counts (0 = pick from the core count).
    pub fn set_worker_thread_count(
        &self,
        short_task_threads: usize,
        long_task_threads: usize,
    ) -> Result<(), TaskError> {
        self.ensure_not_worker("set_worker_thread_count")?;
        let _lifecycle = self
            .inner
            .lifecycle
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.stop_pools();
        {
            let mut config = self
                .inner
                .config
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            config.short_task_threads = short_task_threads;
            config.long_task_threads = long_task_threads;
        }
        self.spawn_pools();
        Ok(())
    }

    /// Stop all workers and wait for them to exit. Queued work stays queued
    /// and runs once workers are started again.
    pub fn shutdown(&self) -> Result<(), TaskError> {
        self.ensure_not_worker("shutdown")?;
        let _lifecycle = self
            .inner
            .lifecycle
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if self.inner.running.load(Ordering::Acquire) {
            info!("Task system shutdown requested");
            self.stop_pools();
        }
        Ok(())
    }

    /// Concurrency budget of a category. 0 for pools that are not running.
    pub fn worker_thread_count(&self, kind: WorkerThreadType) -> usize {
        match self.pool(kind) {
            Some(pool) => pool.max_active(),
            None => 1,
        }
    }

    /// Threads actually allocated for a category. Exceeds
    /// [`Self::worker_thread_count`] when blocked workers got extra siblings.
    pub fn allocated_worker_thread_count(&self, kind: WorkerThreadType) -> usize {
        match self.pool(kind) {
            Some(pool) => pool.allocated(),
            None => 1,
        }
    }

    fn ensure_not_worker(&self, operation: &str) -> Result<(), TaskError> {
        if let Some(slot) = worker::current_worker(self.inner.id) {
            error!(
                kind = ?slot.kind,
                index = slot.index,
                "{} called from a worker thread",
                operation
            );
            return Err(TaskError::CalledFromWorker);
        }
        Ok(())
    }

    fn spawn_pools(&self) {
        let config = self.config();
        config.log_summary();
        for kind in WorkerThreadType::POOLED {
            let count = match kind {
                WorkerThreadType::ShortTasks => config.resolved_short_task_threads(),
                WorkerThreadType::LongTasks => config.resolved_long_task_threads(),
                _ => config.file_access_threads.max(1),
            };
            if let Some(pool) = self.pool(kind) {
                pool.set_max_active(count);
            }
            for _ in 0..count {
                self.spawn_worker(kind);
            }
            info!("Started {} {:?} workers", count, kind);
        }
        self.inner.running.store(true, Ordering::Release);
    }

    fn stop_pools(&self) {
        let mut handles = Vec::new();
        for pool in &self.inner.pools {
            handles.extend(pool.stop());
        }
        let count = handles.len();
        for handle in handles {
            if handle.join().is_err() {
                error!("worker thread panicked while stopping");
            }
        }
        for pool in &self.inner.pools {
            for handle in pool.clear() {
                if handle.join().is_err() {
                    error!("worker thread panicked while stopping");
                }
            }
        }
        self.inner.running.store(false, Ordering::Release);
        info!("Stopped {} worker threads", count);
    }

    /// Adds one thread to a pool. Used at startup and when a blocked worker
    /// has no idle sibling to hand its share of the budget to.
    pub(crate) fn spawn_worker(&self, kind: WorkerThreadType) -> bool {
        let Some(pool) = self.pool(kind) else {
            return false;
        };
        let Some((slot, stop)) = pool.add_slot() else {
            debug!(kind = ?kind, "pool is stopping, not allocating a worker");
            return false;
        };
        let name = format!("taskweave-{:?}-{}", kind, slot.index);
        let weak = Arc::downgrade(&self.inner);
        let system_id = self.inner.id;
        let thread_slot = Arc::clone(&slot);
        let spawned = thread::Builder::new()
            .name(name)
            .spawn(move || dispatch::run_worker(weak, system_id, thread_slot, stop));
        match spawned {
            Ok(handle) => {
                debug!(kind = ?kind, index = slot.index, "allocated worker thread");
                pool.push_handle(handle);
                true
            }
            Err(e) => {
                error!(kind = ?kind, "failed to spawn worker thread: {}", e);
                // Never runs: keep it out of the wake budget.
                slot.set_state(crate::worker::WorkerState::Blocked);
                false
            }
        }
    }

    // ── Thread roles ─────────────────────────────────────────────

    /// Make the calling thread the main thread.
    pub fn set_main_thread(&self) {
        *self
            .inner
            .main_thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = thread::current().id();
    }

    pub fn is_main_thread(&self) -> bool {
        *self
            .inner
            .main_thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            == thread::current().id()
    }

    /// `MainThread` on the main thread, the pool category on a worker, and
    /// `ShortTasks` on any other thread.
    pub fn current_thread_worker_type(&self) -> WorkerThreadType {
        if self.is_main_thread() {
            return WorkerThreadType::MainThread;
        }
        worker::current_worker(self.inner.id)
            .map(|slot| slot.kind)
            .unwrap_or(WorkerThreadType::ShortTasks)
    }

    /// The statistics slot of the calling thread, if it has one.
    pub(crate) fn current_slot(&self) -> Option<Arc<WorkerSlot>> {
        if self.is_main_thread() {
            return Some(Arc::clone(&self.inner.main_slot));
        }
        worker::current_worker(self.inner.id)
    }
}
