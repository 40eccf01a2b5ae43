use serde::{Deserialize, Serialize};

/// Scheduling lane of a task group. Lower value = served first.
///
/// Every priority maps to exactly one queue and one [`WorkerThreadType`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TaskPriority {
    EarlyThisFrame = 0,
    ThisFrame,
    LateThisFrame,
    EarlyNextFrame,
    NextFrame,
    LateNextFrame,
    In2Frames,
    In3Frames,
    In4Frames,
    In5Frames,
    In6Frames,
    In7Frames,
    In8Frames,
    In9Frames,
    LongRunningHighPriority,
    LongRunning,
    FileAccessHighPriority,
    FileAccess,
    /// Runs on the main thread inside `finish_frame_tasks`, always this frame.
    ThisFrameMainThread,
    /// Runs on the main thread when the frame budget allows.
    SomeFrameMainThread,
}

impl TaskPriority {
    pub const COUNT: usize = 20;

    pub const ALL: [TaskPriority; Self::COUNT] = [
        TaskPriority::EarlyThisFrame,
        TaskPriority::ThisFrame,
        TaskPriority::LateThisFrame,
        TaskPriority::EarlyNextFrame,
        TaskPriority::NextFrame,
        TaskPriority::LateNextFrame,
        TaskPriority::In2Frames,
        TaskPriority::In3Frames,
        TaskPriority::In4Frames,
        TaskPriority::In5Frames,
        TaskPriority::In6Frames,
        TaskPriority::In7Frames,
        TaskPriority::In8Frames,
        TaskPriority::In9Frames,
        TaskPriority::LongRunningHighPriority,
        TaskPriority::LongRunning,
        TaskPriority::FileAccessHighPriority,
        TaskPriority::FileAccess,
        TaskPriority::ThisFrameMainThread,
        TaskPriority::SomeFrameMainThread,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// The worker category allowed to consume this lane.
    pub fn worker_type(self) -> WorkerThreadType {
        match self {
            TaskPriority::LongRunningHighPriority | TaskPriority::LongRunning => {
                WorkerThreadType::LongTasks
            }
            TaskPriority::FileAccessHighPriority | TaskPriority::FileAccess => {
                WorkerThreadType::FileAccess
            }
            TaskPriority::ThisFrameMainThread | TaskPriority::SomeFrameMainThread => {
                WorkerThreadType::MainThread
            }
            _ => WorkerThreadType::ShortTasks,
        }
    }

    pub fn is_main_thread(self) -> bool {
        self.worker_type() == WorkerThreadType::MainThread
    }

    /// The lane this priority's queued work moves into when a frame ends.
    pub fn one_frame_sooner(self) -> Option<TaskPriority> {
        use TaskPriority::*;
        match self {
            EarlyNextFrame => Some(EarlyThisFrame),
            NextFrame => Some(ThisFrame),
            LateNextFrame => Some(LateThisFrame),
            In2Frames => Some(NextFrame),
            In3Frames => Some(In2Frames),
            In4Frames => Some(In3Frames),
            In5Frames => Some(In4Frames),
            In6Frames => Some(In5Frames),
            In7Frames => Some(In6Frames),
            In8Frames => Some(In7Frames),
            In9Frames => Some(In8Frames),
            _ => None,
        }
    }
}

/// Worker thread category. `MainThread` has no pool: the designated main
/// thread services it explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkerThreadType {
    ShortTasks = 0,
    LongTasks,
    FileAccess,
    MainThread,
}

impl WorkerThreadType {
    /// Categories backed by a worker pool.
    pub const POOLED: [WorkerThreadType; 3] = [
        WorkerThreadType::ShortTasks,
        WorkerThreadType::LongTasks,
        WorkerThreadType::FileAccess,
    ];

    /// The contiguous block of priorities this category consumes.
    pub fn priority_range(self) -> PriorityRange {
        match self {
            WorkerThreadType::ShortTasks => {
                PriorityRange::new(TaskPriority::EarlyThisFrame, TaskPriority::In9Frames)
            }
            WorkerThreadType::LongTasks => PriorityRange::new(
                TaskPriority::LongRunningHighPriority,
                TaskPriority::LongRunning,
            ),
            WorkerThreadType::FileAccess => PriorityRange::new(
                TaskPriority::FileAccessHighPriority,
                TaskPriority::FileAccess,
            ),
            WorkerThreadType::MainThread => PriorityRange::new(
                TaskPriority::ThisFrameMainThread,
                TaskPriority::SomeFrameMainThread,
            ),
        }
    }

    pub(crate) fn pool_index(self) -> Option<usize> {
        match self {
            WorkerThreadType::MainThread => None,
            other => Some(other as usize),
        }
    }
}

/// Inclusive range of priorities, walked in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriorityRange {
    pub first: TaskPriority,
    pub last: TaskPriority,
}

impl PriorityRange {
    pub fn new(first: TaskPriority, last: TaskPriority) -> Self {
        debug_assert!(first <= last, "empty priority range {:?}..={:?}", first, last);
        Self { first, last }
    }

    pub fn single(priority: TaskPriority) -> Self {
        Self::new(priority, priority)
    }

    pub fn contains(&self, priority: TaskPriority) -> bool {
        self.first <= priority && priority <= self.last
    }

    pub fn iter(&self) -> impl Iterator<Item = TaskPriority> {
        (self.first.index()..=self.last.index()).filter_map(TaskPriority::from_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_is_in_index_order() {
        for (i, p) in TaskPriority::ALL.iter().enumerate() {
            assert_eq!(p.index(), i);
            assert_eq!(TaskPriority::from_index(i), Some(*p));
        }
        assert_eq!(TaskPriority::from_index(TaskPriority::COUNT), None);
    }

    #[test]
    fn every_priority_belongs_to_its_category_range() {
        for p in TaskPriority::ALL {
            assert!(p.worker_type().priority_range().contains(p), "{:?}", p);
        }
    }

    #[test]
    fn category_ranges_do_not_overlap() {
        let kinds = [
            WorkerThreadType::ShortTasks,
            WorkerThreadType::LongTasks,
            WorkerThreadType::FileAccess,
            WorkerThreadType::MainThread,
        ];
        for p in TaskPriority::ALL {
            let owners = kinds
                .iter()
                .filter(|k| k.priority_range().contains(p))
                .count();
            assert_eq!(owners, 1, "{:?}", p);
        }
    }

    #[test]
    fn frame_promotion_only_moves_short_lanes_forward() {
        for p in TaskPriority::ALL {
            if let Some(target) = p.one_frame_sooner() {
                assert!(target < p);
                assert_eq!(target.worker_type(), WorkerThreadType::ShortTasks);
            }
        }
        assert_eq!(TaskPriority::ThisFrame.one_frame_sooner(), None);
        assert_eq!(TaskPriority::LongRunning.one_frame_sooner(), None);
        assert_eq!(
            TaskPriority::In2Frames.one_frame_sooner(),
            Some(TaskPriority::NextFrame)
        );
    }

    #[test]
    fn range_iterates_inclusively() {
        let range = WorkerThreadType::MainThread.priority_range();
        let lanes: Vec<_> = range.iter().collect();
        assert_eq!(
            lanes,
            vec![TaskPriority::ThisFrameMainThread, TaskPriority::SomeFrameMainThread]
        );
        assert_eq!(WorkerThreadType::ShortTasks.priority_range().iter().count(), 14);
    }
}
