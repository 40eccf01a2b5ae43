//! Task group storage: a growable arena of reusable slots addressed by
//! generation-checked handles.
//!
//! A slot's generation starts odd and moves in steps of [`GENERATION_STEP`]
//! on allocation and on completion, so it is never zero. A handle is live iff
//! its generation equals the slot's current generation; once a group finishes
//! every handle to it stays dead, even after the slot is reused.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use serde::Serialize;

use crate::priority::TaskPriority;
use crate::task::Task;

pub const GENERATION_STEP: u32 = 2;
const INITIAL_GENERATION: u32 = 1;

/// Callback fired once when a group finishes. Runs on whichever thread
/// completed the group's last work item.
pub type OnGroupFinished = Box<dyn FnOnce(TaskGroupHandle) + Send>;

/// Identifies one task group for one scheduling cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub struct TaskGroupHandle {
    index: u32,
    generation: u32,
}

impl TaskGroupHandle {
    /// A handle that was never issued. Always reports "finished".
    pub const INVALID: TaskGroupHandle = TaskGroupHandle {
        index: 0,
        generation: 0,
    };

    pub(crate) fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// False only for [`TaskGroupHandle::INVALID`]-like handles.
    pub fn is_valid(&self) -> bool {
        self.generation != 0
    }

    pub(crate) fn pack(self) -> u64 {
        ((self.generation as u64) << 32) | self.index as u64
    }

    pub(crate) fn unpack(packed: u64) -> Self {
        Self {
            index: packed as u32,
            generation: (packed >> 32) as u32,
        }
    }
}

impl fmt::Display for TaskGroupHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}@{}", self.index, self.generation)
    }
}

/// The counters that work items touch without taking the scheduler lock.
#[derive(Debug)]
pub(crate) struct GroupCounters {
    pub generation: AtomicU32,
    pub remaining_tasks: AtomicU32,
    pub active_dependencies: AtomicU32,
}

impl GroupCounters {
    fn new() -> Self {
        Self {
            generation: AtomicU32::new(INITIAL_GENERATION),
            remaining_tasks: AtomicU32::new(0),
            active_dependencies: AtomicU32::new(0),
        }
    }

    pub fn generation(&self) -> u32 {
        self.generation.load(Ordering::Acquire)
    }

    /// Marks every outstanding handle to this slot as dead.
    pub fn bump_generation(&self) -> u32 {
        self.generation.fetch_add(GENERATION_STEP, Ordering::AcqRel) + GENERATION_STEP
    }
}

/// A group reference that outlives the scheduler lock: carried by work items.
#[derive(Debug, Clone)]
pub(crate) struct GroupRef {
    pub handle: TaskGroupHandle,
    pub counters: Arc<GroupCounters>,
}

/// One slot of the group table. Structural fields are guarded by the
/// scheduler lock; only `counters` is touched outside of it.
pub(crate) struct TaskGroup {
    pub counters: Arc<GroupCounters>,
    pub priority: TaskPriority,
    pub in_use: bool,
    pub started: bool,
    pub tasks: Vec<Arc<Task>>,
    pub depends_on: Vec<TaskGroupHandle>,
    pub dependents: Vec<TaskGroupHandle>,
    pub on_finished: Option<OnGroupFinished>,
}

impl TaskGroup {
    fn empty() -> Self {
        Self {
            counters: Arc::new(GroupCounters::new()),
            priority: TaskPriority::ThisFrame,
            in_use: false,
            started: false,
            tasks: Vec::new(),
            depends_on: Vec::new(),
            dependents: Vec::new(),
            on_finished: None,
        }
    }
}

#[derive(Default)]
pub(crate) struct GroupTable {
    groups: Vec<TaskGroup>,
}

impl GroupTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims the first free slot (appending one if none is free) and resets it.
    pub fn allocate(
        &mut self,
        priority: TaskPriority,
        on_finished: Option<OnGroupFinished>,
    ) -> TaskGroupHandle {
        let index = match self.groups.iter().position(|g| !g.in_use) {
            Some(index) => index,
            None => {
                self.groups.push(TaskGroup::empty());
                self.groups.len() - 1
            }
        };

        let group = &mut self.groups[index];
        group.priority = priority;
        group.in_use = true;
        group.started = false;
        group.tasks.clear();
        group.depends_on.clear();
        group.dependents.clear();
        group.on_finished = on_finished;
        group.counters.remaining_tasks.store(0, Ordering::Release);
        group.counters.active_dependencies.store(0, Ordering::Release);
        let generation = group.counters.bump_generation();

        TaskGroupHandle::new(index as u32, generation)
    }

    pub fn is_live(&self, handle: TaskGroupHandle) -> bool {
        handle.is_valid()
            && self
                .groups
                .get(handle.index as usize)
                .is_some_and(|g| g.counters.generation() == handle.generation)
    }

    /// The group behind a live handle.
    pub fn get(&self, handle: TaskGroupHandle) -> Option<&TaskGroup> {
        if self.is_live(handle) {
            self.groups.get(handle.index as usize)
        } else {
            None
        }
    }

    pub fn get_mut(&mut self, handle: TaskGroupHandle) -> Option<&mut TaskGroup> {
        if self.is_live(handle) {
            self.groups.get_mut(handle.index as usize)
        } else {
            None
        }
    }

    /// Slot access without the liveness check, for the completion path which
    /// has already invalidated the handle.
    pub fn slot_mut(&mut self, index: u32) -> &mut TaskGroup {
        &mut self.groups[index as usize]
    }

    /// Returns a finished slot to the free pool.
    pub fn release(&mut self, index: u32) {
        let group = &mut self.groups[index as usize];
        group.tasks.clear();
        group.depends_on.clear();
        group.dependents.clear();
        group.on_finished = None;
        group.started = false;
        group.in_use = false;
    }

    pub fn group_ref(&self, handle: TaskGroupHandle) -> Option<GroupRef> {
        self.get(handle).map(|g| GroupRef {
            handle,
            counters: Arc::clone(&g.counters),
        })
    }

    /// Occupied slots with their current handles. Best effort: a group that is
    /// between completion and release still shows up here.
    pub fn iter_live(&self) -> impl Iterator<Item = (TaskGroupHandle, &TaskGroup)> {
        self.groups.iter().enumerate().filter_map(|(i, g)| {
            let handle = TaskGroupHandle::new(i as u32, g.counters.generation());
            g.in_use.then_some((handle, g))
        })
    }

    pub fn capacity(&self) -> usize {
        self.groups.len()
    }
}
