//! The request executor: submit an operation to the pool, await with a
//! deadline, or fire-and-forget with a completion handler.

use std::time::Duration;

use crate::pool::ThreadPool;
use crate::task::{task_pair, WaitOutcome};

/// A deadline elapsed before the submitted operation produced a result.
///
/// `started` distinguishes a task no worker ever claimed (safe to
/// retry) from one still in flight (a retry could duplicate side
/// effects).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitTimeout {
    pub started: bool,
}

/// Dispatches backend operations onto a shared worker pool.
pub struct Executor {
    pool: ThreadPool,
}

impl Executor {
    /// Build an executor over a freshly started pool.
    pub fn new(pool_size: usize) -> Self {
        let pool = ThreadPool::new(pool_size);
        pool.initialize();
        Self { pool }
    }

    pub fn pool(&self) -> &ThreadPool {
        &self.pool
    }

    /// Enqueue `op` at high priority and wait up to `timeout` for its
    /// result. On timeout the in-flight work is abandoned; the worker
    /// completes it and the result is dropped.
    pub fn submit_await<T, F>(&self, op: F, timeout: Duration) -> Result<T, WaitTimeout>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (runner, future) = task_pair(op);
        self.pool.submit_prioritized(runner);
        match future.wait_timeout(timeout) {
            WaitOutcome::Ready(value) => Ok(value),
            WaitOutcome::TimedOut { started } => Err(WaitTimeout { started }),
        }
    }

    /// Enqueue `op` at normal priority; `handler` receives its result
    /// on the worker thread.
    pub fn submit_detached<T, F, H>(&self, handler: H, op: F)
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
        H: FnOnce(T) + Send + 'static,
    {
        self.pool.submit(move || handler(op()));
    }
}
