//! Worker thread bookkeeping: per-thread state, wake signals, and the
//! per-category pools that own them.

use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError, RwLock};
use std::thread::JoinHandle;
use std::time::Duration;

use serde::Serialize;

use crate::metrics::ThreadUtilization;
use crate::priority::WorkerThreadType;

/// Upper bound on how long an idle worker sleeps before rechecking its queues.
const IDLE_PARK_TIMEOUT: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(u8)]
pub enum WorkerState {
    /// Parked, waiting for a wake signal.
    Idle = 0,
    /// Looking for or executing work.
    Active = 1,
    /// Inside a cooperative wait with nothing to execute. Does not count
    /// against the pool's concurrency budget.
    Blocked = 2,
}

impl WorkerState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => WorkerState::Idle,
            2 => WorkerState::Blocked,
            _ => WorkerState::Active,
        }
    }
}

/// One worker thread (or the main thread, for statistics).
#[derive(Debug)]
pub(crate) struct WorkerSlot {
    pub kind: WorkerThreadType,
    pub index: usize,
    state: AtomicU8,
    wake: Mutex<bool>,
    signal: Condvar,
    busy_nanos: AtomicU64,
    executed: AtomicU64,
    total_executed: AtomicU64,
    last_utilization: AtomicU64,
    last_executed: AtomicU64,
}

impl WorkerSlot {
    pub fn new(kind: WorkerThreadType, index: usize) -> Self {
        Self {
            kind,
            index,
            state: AtomicU8::new(WorkerState::Active as u8),
            wake: Mutex::new(false),
            signal: Condvar::new(),
            busy_nanos: AtomicU64::new(0),
            executed: AtomicU64::new(0),
            total_executed: AtomicU64::new(0),
            last_utilization: AtomicU64::new(0f64.to_bits()),
            last_executed: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, state: WorkerState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Idle -> Active plus a wake signal. False if the worker was not idle.
    pub fn try_wake(&self) -> bool {
        if self
            .state
            .compare_exchange(
                WorkerState::Idle as u8,
                WorkerState::Active as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return false;
        }
        self.signal_wake();
        true
    }

    /// Unconditional wake, used when stopping the pool.
    pub fn signal_wake(&self) {
        let mut woken = self.wake.lock().unwrap_or_else(PoisonError::into_inner);
        *woken = true;
        self.signal.notify_one();
    }

    /// Sleeps until woken, stopped, or the idle timeout passes.
    pub fn park(&self, stop: &AtomicBool) {
        let mut woken = self.wake.lock().unwrap_or_else(PoisonError::into_inner);
        while !*woken && !stop.load(Ordering::Acquire) {
            let (guard, timeout) = self
                .signal
                .wait_timeout(woken, IDLE_PARK_TIMEOUT)
                .unwrap_or_else(PoisonError::into_inner);
            woken = guard;
            if timeout.timed_out() {
                break;
            }
        }
        *woken = false;
    }

    pub fn record_execution(&self, elapsed: Duration) {
        self.busy_nanos
            .fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
        self.executed.fetch_add(1, Ordering::Relaxed);
        self.total_executed.fetch_add(1, Ordering::Relaxed);
    }

    /// Closes one frame's statistics window.
    pub fn roll_utilization(&self, frame: Duration) {
        let busy = self.busy_nanos.swap(0, Ordering::Relaxed);
        let executed = self.executed.swap(0, Ordering::Relaxed);
        let frame_nanos = frame.as_nanos().max(1) as f64;
        let utilization = (busy as f64 / frame_nanos).min(1.0);
        self.last_utilization
            .store(utilization.to_bits(), Ordering::Relaxed);
        self.last_executed.store(executed, Ordering::Relaxed);
    }

    pub fn utilization(&self) -> ThreadUtilization {
        ThreadUtilization {
            utilization: f64::from_bits(self.last_utilization.load(Ordering::Relaxed)),
            tasks_executed: self.last_executed.load(Ordering::Relaxed),
        }
    }

    pub fn total_executed(&self) -> u64 {
        self.total_executed.load(Ordering::Relaxed)
    }
}

/// Join handles plus the stop flag shared with the threads of one pool run.
#[derive(Default)]
struct PoolRun {
    stop: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
}

/// The workers of one [`WorkerThreadType`].
///
/// `max_active` is the concurrency budget. More threads than that may be
/// allocated: a worker that blocks in a wait with nobody to hand off to
/// gets an extra sibling.
pub(crate) struct WorkerPool {
    pub kind: WorkerThreadType,
    max_active: AtomicUsize,
    slots: RwLock<Vec<Arc<WorkerSlot>>>,
    run: Mutex<PoolRun>,
}

impl WorkerPool {
    pub fn new(kind: WorkerThreadType) -> Self {
        Self {
            kind,
            max_active: AtomicUsize::new(0),
            slots: RwLock::new(Vec::new()),
            run: Mutex::new(PoolRun::default()),
        }
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::Acquire)
    }

    pub fn set_max_active(&self, count: usize) {
        self.max_active.store(count, Ordering::Release);
    }

    pub fn allocated(&self) -> usize {
        self.slots().len()
    }

    pub fn slots(&self) -> Vec<Arc<WorkerSlot>> {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn slot(&self, index: usize) -> Option<Arc<WorkerSlot>> {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(index)
            .cloned()
    }

    /// Registers a new slot and returns it with the stop flag of the current
    /// run. None while the pool is stopping, until [`Self::clear`] ran.
    pub fn add_slot(&self) -> Option<(Arc<WorkerSlot>, Arc<AtomicBool>)> {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        let stop = Arc::clone(&self.run.lock().unwrap_or_else(PoisonError::into_inner).stop);
        if stop.load(Ordering::Acquire) {
            return None;
        }
        let slot = Arc::new(WorkerSlot::new(self.kind, slots.len()));
        slots.push(Arc::clone(&slot));
        Some((slot, stop))
    }

    pub fn push_handle(&self, handle: JoinHandle<()>) {
        self.run
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .handles
            .push(handle);
    }

    /// Threads that may still be woken without exceeding the budget.
    pub fn activatable(&self) -> usize {
        let running = self
            .slots()
            .iter()
            .filter(|s| s.state() == WorkerState::Active)
            .count();
        self.max_active().saturating_sub(running)
    }

    /// Wakes up to `count` idle workers, bounded by [`Self::activatable`].
    /// Returns how many were woken.
    pub fn wake_up(&self, count: usize) -> usize {
        let budget = count.min(self.activatable());
        if budget == 0 {
            return 0;
        }
        let mut woken = 0;
        for slot in self.slots() {
            if woken == budget {
                break;
            }
            if slot.try_wake() {
                woken += 1;
            }
        }
        woken
    }

    /// Signals every thread of the current run to exit. Returns the handles to
    /// join. The run stays stopped, refusing new slots, until [`Self::clear`].
    pub fn stop(&self) -> Vec<JoinHandle<()>> {
        let handles = {
            let mut run = self.run.lock().unwrap_or_else(PoisonError::into_inner);
            run.stop.store(true, Ordering::Release);
            std::mem::take(&mut run.handles)
        };
        for slot in self.slots() {
            slot.signal_wake();
        }
        handles
    }

    /// Forgets the slots of a stopped run and arms a fresh one. Returns the
    /// handles of threads that registered while the run was being stopped.
    pub fn clear(&self) -> Vec<JoinHandle<()>> {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        let stragglers = {
            let mut run = self.run.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *run).handles
        };
        slots.clear();
        self.set_max_active(0);
        stragglers
    }
}

thread_local! {
    /// The worker slot of the current thread, tagged with its task system id.
    static CURRENT_WORKER: RefCell<Option<(usize, Arc<WorkerSlot>)>> = const { RefCell::new(None) };
}

pub(crate) fn set_current_worker(system_id: usize, slot: Arc<WorkerSlot>) {
    CURRENT_WORKER.with(|current| *current.borrow_mut() = Some((system_id, slot)));
}

pub(crate) fn clear_current_worker() {
    CURRENT_WORKER.with(|current| *current.borrow_mut() = None);
}

/// The calling thread's slot, if it is a worker of task system `system_id`.
pub(crate) fn current_worker(system_id: usize) -> Option<Arc<WorkerSlot>> {
    CURRENT_WORKER.with(|current| {
        current
            .borrow()
            .as_ref()
            .filter(|(id, _)| *id == system_id)
            .map(|(_, slot)| Arc::clone(slot))
    })
}
