//! One-shot awaitable task handles.
//!
//! A task handle moves through three states: pending (queued, no worker
//! has claimed it), running (a worker is executing it) and ready. The
//! waiter needs the distinction at timeout: a pending task was never
//! started and is safe to re-issue, a running one may already have had
//! side effects.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

enum Slot<T> {
    Pending,
    Running,
    Ready(T),
    Taken,
}

struct Shared<T> {
    slot: Mutex<Slot<T>>,
    done: Condvar,
}

/// The waiting half of a task pair.
pub struct TaskFuture<T> {
    shared: Arc<Shared<T>>,
}

/// What the waiter observed at the deadline.
#[derive(Debug)]
pub enum WaitOutcome<T> {
    Ready(T),
    /// `started` is true when a worker had claimed the task; the work
    /// is abandoned, not cancelled, and its result will be dropped.
    TimedOut {
        started: bool,
    },
}

impl<T> TaskFuture<T> {
    /// Block until the task completes or `timeout` elapses.
    pub fn wait_timeout(self, timeout: Duration) -> WaitOutcome<T> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.shared.slot.lock();
        loop {
            if matches!(*slot, Slot::Ready(_)) {
                match std::mem::replace(&mut *slot, Slot::Taken) {
                    Slot::Ready(value) => return WaitOutcome::Ready(value),
                    _ => unreachable!(),
                }
            }
            if Instant::now() >= deadline {
                let started = matches!(*slot, Slot::Running);
                return WaitOutcome::TimedOut { started };
            }
            self.shared.done.wait_until(&mut slot, deadline);
        }
    }
}

/// Split an operation into a runnable closure (for the worker pool) and
/// the future its submitter waits on.
pub fn task_pair<T, F>(op: F) -> (impl FnOnce() + Send + 'static, TaskFuture<T>)
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let shared = Arc::new(Shared {
        slot: Mutex::new(Slot::Pending),
        done: Condvar::new(),
    });
    let future = TaskFuture {
        shared: Arc::clone(&shared),
    };

    let runner = move || {
        *shared.slot.lock() = Slot::Running;
        let value = op();
        *shared.slot.lock() = Slot::Ready(value);
        shared.done.notify_all();
    };

    (runner, future)
}
