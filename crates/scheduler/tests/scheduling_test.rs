//! Integration tests for group scheduling with real worker threads.
//!
//! Covers dependency ordering, multiplicity, stale handles, and the
//! category routing of priorities.

mod common;

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use taskweave_scheduler::{Task, TaskContext, TaskPriority, TaskSystem, WorkerThreadType};

use common::{counting_task, small_system, within_timeout};

#[test]
fn dependent_multiplicity_group_waits_for_its_dependency() {
    let system = small_system(3, 1);
    let log = Arc::new(Mutex::new(Vec::new()));

    let g1 = system.create_group(TaskPriority::ThisFrame);
    let a_log = Arc::clone(&log);
    let a = Arc::new(
        Task::new("a", move |_: &TaskContext<'_>| {
            thread::sleep(Duration::from_millis(20));
            a_log.lock().unwrap().push("a".to_string());
        })
        .with_multiplicity(0),
    );
    system.add_task(g1, &a).unwrap();
    system.start_group(g1).unwrap();

    let g2 = system.create_group(TaskPriority::ThisFrame);
    let b_log = Arc::clone(&log);
    let dependency_done = Arc::new(Mutex::new(Vec::new()));
    let observed = Arc::clone(&dependency_done);
    let b = Arc::new(
        Task::new("b", move |ctx: &TaskContext<'_>| {
            observed
                .lock()
                .unwrap()
                .push(ctx.system().is_group_finished(g1));
            b_log.lock().unwrap().push(format!("b{}", ctx.invocation()));
        })
        .with_multiplicity(3),
    );
    system.add_task(g2, &b).unwrap();
    system.add_dependency(g2, g1).unwrap();
    system.start_group(g2).unwrap();

    thread::sleep(Duration::from_millis(30));
    assert!(log.lock().unwrap().is_empty(), "nothing runs before workers start");

    system.start_workers().unwrap();
    system.wait_for_group(g2);

    let log = log.lock().unwrap().clone();
    assert_eq!(log.len(), 4);
    assert_eq!(log[0], "a");
    let invocations: HashSet<_> = log[1..].iter().cloned().collect();
    assert_eq!(
        invocations,
        ["b0", "b1", "b2"].iter().map(|s| s.to_string()).collect()
    );
    assert_eq!(*dependency_done.lock().unwrap(), vec![true, true, true]);
    assert!(system.is_group_finished(g1));
    assert!(a.is_finished() && b.is_finished());
}

#[test]
fn multiplicity_runs_each_invocation_once_and_fires_callback_last() {
    let system = small_system(4, 1);
    system.start_workers().unwrap();

    let runs = Arc::new(Mutex::new(Vec::new()));
    let callback_saw = Arc::new(AtomicUsize::new(usize::MAX));
    let body_runs = Arc::clone(&runs);
    let callback_runs = Arc::clone(&runs);
    let seen = Arc::clone(&callback_saw);
    let task = Arc::new(
        Task::new("wide", move |ctx: &TaskContext<'_>| {
            body_runs.lock().unwrap().push(ctx.invocation());
        })
        .with_multiplicity(16)
        .with_on_finished(move |_| {
            seen.store(callback_runs.lock().unwrap().len(), Ordering::SeqCst);
        }),
    );

    let group = system
        .start_single_task(&task, TaskPriority::ThisFrame, None)
        .unwrap();
    system.wait_for_group(group);

    let mut invocations = runs.lock().unwrap().clone();
    invocations.sort_unstable();
    assert_eq!(invocations, (0..16).collect::<Vec<_>>());
    assert_eq!(callback_saw.load(Ordering::SeqCst), 16);
}

#[test]
fn diamond_dependencies_respect_every_edge() {
    let system = small_system(4, 1);
    system.start_workers().unwrap();
    let order = Arc::new(Mutex::new(Vec::new()));

    let step = |name: &'static str| {
        let order = Arc::clone(&order);
        Arc::new(Task::new(name, move |_: &TaskContext<'_>| {
            thread::sleep(Duration::from_millis(5));
            order.lock().unwrap().push(name);
        }))
    };

    let top = system.create_group(TaskPriority::ThisFrame);
    let left = system.create_group(TaskPriority::NextFrame);
    let right = system.create_group(TaskPriority::ThisFrame);
    let bottom = system.create_group(TaskPriority::EarlyThisFrame);
    system.add_task(top, &step("top")).unwrap();
    system.add_task(left, &step("left")).unwrap();
    system.add_task(right, &step("right")).unwrap();
    system.add_task(bottom, &step("bottom")).unwrap();
    system
        .add_dependency_batch(&[(left, top), (right, top), (bottom, left), (bottom, right)])
        .unwrap();
    system.start_group_batch(&[bottom, right, left, top]).unwrap();

    system.wait_for_group(bottom);
    let order = order.lock().unwrap().clone();
    assert_eq!(order.len(), 4);
    assert_eq!(order[0], "top");
    assert_eq!(order[3], "bottom");
}

#[test]
fn long_chain_finishes_in_order() {
    let system = small_system(2, 1);
    system.start_workers().unwrap();
    let order = Arc::new(Mutex::new(Vec::new()));

    let mut previous = None;
    let mut groups = Vec::new();
    for i in 0..50 {
        let order = Arc::clone(&order);
        let task = Arc::new(Task::new(format!("link{}", i), move |_: &TaskContext<'_>| {
            order.lock().unwrap().push(i);
        }));
        let group = system
            .start_single_task(&task, TaskPriority::ThisFrame, previous)
            .unwrap();
        previous = Some(group);
        groups.push(group);
    }

    if let Some(last) = previous {
        system.wait_for_group(last);
    }
    assert_eq!(*order.lock().unwrap(), (0..50).collect::<Vec<_>>());
    assert!(groups.iter().all(|g| system.is_group_finished(*g)));
}

#[test]
fn stale_handles_stay_finished_while_slots_are_reused() {
    let system = small_system(2, 1);
    system.start_workers().unwrap();
    let runs = Arc::new(AtomicUsize::new(0));

    let mut finished = Vec::new();
    for round in 0..20 {
        let group = system
            .start_single_task(&counting_task(&format!("r{}", round), &runs), TaskPriority::ThisFrame, None)
            .unwrap();
        system.wait_for_group(group);
        finished.push(group);
        assert!(finished.iter().all(|g| system.is_group_finished(*g)));
    }
    assert_eq!(runs.load(Ordering::SeqCst), 20);
    let distinct: HashSet<_> = finished.iter().collect();
    assert_eq!(distinct.len(), finished.len(), "handles are never reissued");
}

#[test]
fn priorities_run_on_their_worker_category() {
    let system = small_system(2, 1);
    system.start_workers().unwrap();
    let kinds = Arc::new(Mutex::new(Vec::new()));

    let mut groups = Vec::new();
    for priority in [
        TaskPriority::ThisFrame,
        TaskPriority::LongRunning,
        TaskPriority::FileAccessHighPriority,
    ] {
        let kinds = Arc::clone(&kinds);
        let task = Arc::new(Task::new(format!("{:?}", priority), move |ctx: &TaskContext<'_>| {
            let kind = ctx.system().current_thread_worker_type();
            kinds.lock().unwrap().push((priority, kind));
        }));
        groups.push(system.start_single_task(&task, priority, None).unwrap());
    }
    for group in groups {
        system.wait_for_group(group);
    }

    let mut kinds = kinds.lock().unwrap().clone();
    kinds.sort_by_key(|(p, _)| *p);
    assert_eq!(
        kinds,
        vec![
            (TaskPriority::ThisFrame, WorkerThreadType::ShortTasks),
            (TaskPriority::LongRunning, WorkerThreadType::LongTasks),
            (TaskPriority::FileAccessHighPriority, WorkerThreadType::FileAccess),
        ]
    );
}

#[test]
fn group_callbacks_fire_once_from_workers() {
    let system = small_system(3, 1);
    system.start_workers().unwrap();
    let fired = Arc::new(AtomicUsize::new(0));
    let runs = Arc::new(AtomicUsize::new(0));

    let mut groups = Vec::new();
    for g in 0..10 {
        let fired = Arc::clone(&fired);
        let group = system.create_group_with_callback(TaskPriority::LateThisFrame, move |_| {
            fired.fetch_add(1, Ordering::SeqCst);
        });
        for t in 0..5 {
            system
                .add_task(group, &counting_task(&format!("g{}t{}", g, t), &runs))
                .unwrap();
        }
        groups.push(group);
    }
    system.start_group_batch(&groups).unwrap();
    for group in &groups {
        system.wait_for_group(*group);
    }

    assert_eq!(runs.load(Ordering::SeqCst), 50);
    assert_eq!(fired.load(Ordering::SeqCst), 10);
}

#[test]
fn helper_threads_execute_short_work_without_workers() {
    let system = TaskSystem::default();
    let runs = Arc::new(AtomicUsize::new(0));
    let group = system.create_group(TaskPriority::In5Frames);
    for i in 0..8 {
        system
            .add_task(group, &counting_task(&format!("h{}", i), &runs))
            .unwrap();
    }
    system.start_group(group).unwrap();

    let helper = system.clone();
    within_timeout(move || helper.wait_for_group(group));
    assert_eq!(runs.load(Ordering::SeqCst), 8);
}

#[test]
fn panicking_callbacks_do_not_cost_a_worker() {
    let system = small_system(1, 1);
    system.start_workers().unwrap();

    let task = Arc::new(
        Task::new("loud", |_: &TaskContext<'_>| {})
            .with_on_finished(|_: &Task| panic!("task callback failed")),
    );
    let group = system.create_group_with_callback(TaskPriority::LongRunning, |_| {
        panic!("group callback failed")
    });
    system.add_task(group, &task).unwrap();
    system.start_group(group).unwrap();
    let waiter = system.clone();
    within_timeout(move || waiter.wait_for_group(group));
    assert!(task.is_finished());

    let runs = Arc::new(AtomicUsize::new(0));
    let next = system
        .start_single_task(&counting_task("next", &runs), TaskPriority::LongRunning, None)
        .unwrap();
    let waiter = system.clone();
    within_timeout(move || waiter.wait_for_group(next));
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(system.allocated_worker_thread_count(WorkerThreadType::LongTasks), 1);
}
