//! Shared helpers for the scheduler integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use taskweave_scheduler::{Task, TaskContext, TaskSystem, TaskSystemConfig};

pub const TIMEOUT: Duration = Duration::from_secs(10);

/// A task system with small, fixed pools. Workers are not started.
pub fn small_system(short: usize, long: usize) -> TaskSystem {
    TaskSystem::new(TaskSystemConfig {
        short_task_threads: short,
        long_task_threads: long,
        file_access_threads: 1,
        ..Default::default()
    })
}

/// Runs `f` on a helper thread and fails the test if it does not return in time.
pub fn within_timeout<T: Send + 'static>(f: impl FnOnce() -> T + Send + 'static) -> T {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(f());
    });
    rx.recv_timeout(TIMEOUT)
        .expect("operation did not finish in time")
}

/// Polls `condition` until it holds or the timeout passes.
pub fn eventually(condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    condition()
}

pub fn counting_task(name: &str, runs: &Arc<AtomicUsize>) -> Arc<Task> {
    let runs = Arc::clone(runs);
    Arc::new(Task::new(name, move |_: &TaskContext<'_>| {
        runs.fetch_add(1, Ordering::SeqCst);
    }))
}
