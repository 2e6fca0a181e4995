//! Fixed-size worker pool draining a two-priority task queue.
//!
//! Submission appends to the tail (normal) or the head (prioritized) of
//! one shared queue and wakes a single waiter. Workers dequeue exactly
//! one item per wake and run it outside the queue lock. There is no
//! work stealing and no resizing; on drop the pool raises a sticky stop
//! flag and idle workers exit, discarding whatever is still queued.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Once};
use std::thread::JoinHandle;

type Task = Box<dyn FnOnce() + Send + 'static>;

struct PoolShared {
    queue: Mutex<VecDeque<Task>>,
    available: Condvar,
    stop: AtomicBool,
}

pub struct ThreadPool {
    shared: Arc<PoolShared>,
    pool_size: usize,
    workers: Mutex<Vec<JoinHandle<()>>>,
    started: Once,
}

impl ThreadPool {
    /// Create a pool of `pool_size` workers. No threads start until
    /// [`initialize`](Self::initialize) is called.
    pub fn new(pool_size: usize) -> Self {
        assert!(pool_size > 0, "pool size must be at least 1");
        Self {
            shared: Arc::new(PoolShared {
                queue: Mutex::new(VecDeque::new()),
                available: Condvar::new(),
                stop: AtomicBool::new(false),
            }),
            pool_size,
            workers: Mutex::new(Vec::new()),
            started: Once::new(),
        }
    }

    /// Start the worker threads. Idempotent; only the first call spawns.
    pub fn initialize(&self) {
        self.started.call_once(|| {
            let mut workers = self.workers.lock();
            for i in 0..self.pool_size {
                let shared = Arc::clone(&self.shared);
                let handle = std::thread::Builder::new()
                    .name(format!("bucketfs-worker-{i}"))
                    .spawn(move || worker_loop(shared))
                    .expect("failed to spawn worker thread");
                workers.push(handle);
            }
        });
    }

    /// Enqueue a task at normal priority.
    pub fn submit(&self, f: impl FnOnce() + Send + 'static) {
        self.enqueue(Box::new(f), false);
    }

    /// Enqueue a task at the head of the queue.
    pub fn submit_prioritized(&self, f: impl FnOnce() + Send + 'static) {
        self.enqueue(Box::new(f), true);
    }

    fn enqueue(&self, task: Task, prioritized: bool) {
        {
            let mut queue = self.shared.queue.lock();
            if prioritized {
                queue.push_front(task);
            } else {
                queue.push_back(task);
            }
        }
        self.shared.available.notify_one();
    }

    /// Number of tasks waiting to be picked up.
    pub fn queued(&self) -> usize {
        self.shared.queue.lock().len()
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }
}

fn worker_loop(shared: Arc<PoolShared>) {
    loop {
        let task = {
            let mut queue = shared.queue.lock();
            loop {
                if shared.stop.load(Ordering::Acquire) {
                    return;
                }
                if let Some(task) = queue.pop_front() {
                    break task;
                }
                shared.available.wait(&mut queue);
            }
        };
        task();
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shared.stop.store(true, Ordering::Release);
        self.shared.available.notify_all();
        for handle in self.workers.lock().drain(..) {
            let _ = handle.join();
        }
    }
}
