//! One FIFO lane of work items per [`TaskPriority`].

use std::collections::VecDeque;
use std::sync::Arc;

use crate::group::{GroupRef, TaskGroupHandle};
use crate::priority::{PriorityRange, TaskPriority};
use crate::task::Task;

/// One invocation of one task, queued on behalf of its group.
#[derive(Debug, Clone)]
pub(crate) struct WorkItem {
    pub task: Arc<Task>,
    pub invocation: u32,
    pub group: GroupRef,
}

/// Preference used by waiters: serve items that unblock them first.
#[derive(Debug, Clone, Copy)]
pub(crate) enum WorkHint<'a> {
    Any,
    Task(&'a Task),
    Group(TaskGroupHandle),
}

impl WorkHint<'_> {
    fn matches(&self, item: &WorkItem) -> bool {
        match self {
            WorkHint::Any => false,
            WorkHint::Task(task) => std::ptr::eq(Arc::as_ptr(&item.task), *task),
            WorkHint::Group(handle) => item.group.handle == *handle,
        }
    }
}

pub(crate) struct PriorityQueues {
    lanes: Vec<VecDeque<WorkItem>>,
}

impl PriorityQueues {
    pub fn new() -> Self {
        Self {
            lanes: (0..TaskPriority::COUNT).map(|_| VecDeque::new()).collect(),
        }
    }

    /// Appends to the lane, or inserts at its head for chains released by a
    /// finished dependency (relaxes FIFO across groups of the same priority).
    pub fn push(&mut self, priority: TaskPriority, item: WorkItem, front: bool) {
        let lane = &mut self.lanes[priority.index()];
        if front {
            lane.push_front(item);
        } else {
            lane.push_back(item);
        }
    }

    /// Next item from `range`. Items matching `hint` win over everything else
    /// in the range; otherwise the earliest non-empty lane serves its head.
    pub fn pop(&mut self, range: PriorityRange, hint: WorkHint<'_>) -> Option<WorkItem> {
        if !matches!(hint, WorkHint::Any) {
            for priority in range.iter() {
                let lane = &mut self.lanes[priority.index()];
                if let Some(pos) = lane.iter().position(|item| hint.matches(item)) {
                    return lane.remove(pos);
                }
            }
        }
        range
            .iter()
            .find_map(|priority| self.lanes[priority.index()].pop_front())
    }

    /// Pulls every queued invocation of `task` out of all lanes.
    pub fn remove_task(&mut self, task: &Task) -> Vec<WorkItem> {
        let mut removed = Vec::new();
        for lane in &mut self.lanes {
            if lane.iter().all(|item| !std::ptr::eq(Arc::as_ptr(&item.task), task)) {
                continue;
            }
            let (matching, kept): (VecDeque<_>, VecDeque<_>) = lane
                .drain(..)
                .partition(|item| std::ptr::eq(Arc::as_ptr(&item.task), task));
            *lane = kept;
            removed.extend(matching);
        }
        removed
    }

    pub fn has_work(&self, range: PriorityRange) -> bool {
        range.iter().any(|p| !self.lanes[p.index()].is_empty())
    }

    pub fn len(&self, priority: TaskPriority) -> usize {
        self.lanes[priority.index()].len()
    }

    pub fn total_len(&self) -> usize {
        self.lanes.iter().map(VecDeque::len).sum()
    }

    /// Moves queued frame work one frame closer. Lanes are processed from the
    /// earliest source upwards so nothing moves twice. Returns the moved count.
    pub fn promote_frame_lanes(&mut self) -> usize {
        let mut moved = 0;
        for source in TaskPriority::ALL {
            let Some(target) = source.one_frame_sooner() else {
                continue;
            };
            let mut items = std::mem::take(&mut self.lanes[source.index()]);
            moved += items.len();
            self.lanes[target.index()].append(&mut items);
        }
        moved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::GroupTable;
    use crate::task::TaskContext;

    fn task(name: &str) -> Arc<Task> {
        Arc::new(Task::new(name, |_: &TaskContext<'_>| {}))
    }

    fn item(table: &mut GroupTable, task: &Arc<Task>, invocation: u32) -> WorkItem {
        let handle = table.allocate(TaskPriority::ThisFrame, None);
        WorkItem {
            task: Arc::clone(task),
            invocation,
            group: table.group_ref(handle).unwrap(),
        }
    }

    fn short_range() -> PriorityRange {
        PriorityRange::new(TaskPriority::EarlyThisFrame, TaskPriority::In9Frames)
    }

    #[test]
    fn earlier_lanes_drain_first_and_lanes_are_fifo() {
        let mut table = GroupTable::new();
        let mut queues = PriorityQueues::new();
        let (a, b, c) = (task("a"), task("b"), task("c"));
        queues.push(TaskPriority::NextFrame, item(&mut table, &a, 0), false);
        queues.push(TaskPriority::ThisFrame, item(&mut table, &b, 0), false);
        queues.push(TaskPriority::ThisFrame, item(&mut table, &c, 0), false);

        let order: Vec<_> = std::iter::from_fn(|| queues.pop(short_range(), WorkHint::Any))
            .map(|i| i.task.name().to_string())
            .collect();
        assert_eq!(order, vec!["b", "c", "a"]);
    }

    #[test]
    fn front_insertion_jumps_the_lane() {
        let mut table = GroupTable::new();
        let mut queues = PriorityQueues::new();
        let (a, b) = (task("a"), task("b"));
        queues.push(TaskPriority::ThisFrame, item(&mut table, &a, 0), false);
        queues.push(TaskPriority::ThisFrame, item(&mut table, &b, 0), true);

        let first = queues.pop(short_range(), WorkHint::Any).unwrap();
        assert_eq!(first.task.name(), "b");
    }

    #[test]
    fn hint_prefers_awaited_work_across_lanes() {
        let mut table = GroupTable::new();
        let mut queues = PriorityQueues::new();
        let (a, b) = (task("a"), task("b"));
        queues.push(TaskPriority::ThisFrame, item(&mut table, &a, 0), false);
        let awaited = item(&mut table, &b, 0);
        let awaited_group = awaited.group.handle;
        queues.push(TaskPriority::In3Frames, awaited, false);

        let by_task = queues.pop(short_range(), WorkHint::Task(&b)).unwrap();
        assert_eq!(by_task.task.name(), "b");

        queues.push(TaskPriority::In3Frames, item(&mut table, &b, 1), false);
        let other = queues.pop(short_range(), WorkHint::Group(awaited_group)).unwrap();
        assert_eq!(other.task.name(), "a", "no item of that group left, falls back to order");
    }

    #[test]
    fn pop_respects_range() {
        let mut table = GroupTable::new();
        let mut queues = PriorityQueues::new();
        let a = task("a");
        queues.push(TaskPriority::LongRunning, item(&mut table, &a, 0), false);

        assert!(queues.pop(short_range(), WorkHint::Any).is_none());
        assert!(queues
            .pop(PriorityRange::single(TaskPriority::LongRunning), WorkHint::Any)
            .is_some());
    }

    #[test]
    fn remove_task_pulls_every_invocation() {
        let mut table = GroupTable::new();
        let mut queues = PriorityQueues::new();
        let (a, b) = (task("a"), task("b"));
        for i in 0..3 {
            queues.push(TaskPriority::ThisFrame, item(&mut table, &a, i), false);
        }
        queues.push(TaskPriority::ThisFrame, item(&mut table, &b, 0), false);
        queues.push(TaskPriority::NextFrame, item(&mut table, &a, 3), false);

        let removed = queues.remove_task(&a);
        assert_eq!(removed.len(), 4);
        assert_eq!(queues.total_len(), 1);
        assert!(queues.remove_task(&a).is_empty());
    }

    #[test]
    fn promotion_moves_each_item_one_frame() {
        let mut table = GroupTable::new();
        let mut queues = PriorityQueues::new();
        let (a, b, c) = (task("a"), task("b"), task("c"));
        queues.push(TaskPriority::In2Frames, item(&mut table, &a, 0), false);
        queues.push(TaskPriority::NextFrame, item(&mut table, &b, 0), false);
        queues.push(TaskPriority::LongRunning, item(&mut table, &c, 0), false);

        assert_eq!(queues.promote_frame_lanes(), 2);
        assert_eq!(queues.len(TaskPriority::ThisFrame), 1);
        assert_eq!(queues.len(TaskPriority::NextFrame), 1);
        assert_eq!(queues.len(TaskPriority::In2Frames), 0);
        assert_eq!(queues.len(TaskPriority::LongRunning), 1);
        assert!(queues.has_work(short_range()));
    }
}
