#![forbid(unsafe_code)]

//! Executors: where validator bodies run and where their results are applied.
//!
//! An [`Executor`] accepts boxed tasks and runs them at some point, on some
//! thread. The crate ships four:
//!
//! | Executor           | Runs the task                                       |
//! |--------------------|-----------------------------------------------------|
//! | [`InlineExecutor`] | immediately, on the caller's thread                 |
//! | [`QueueExecutor`]  | when the owner drains the queue (owning context)   |
//! | [`ThreadExecutor`] | on a fresh named thread                             |
//! | [`WorkerPool`]     | on one of a fixed set of worker threads             |
//!
//! `QueueExecutor` doubles as the deterministic test executor: tasks only run
//! when the test calls [`QueueExecutor::run_one`] or
//! [`QueueExecutor::run_pending`].

use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;

use crate::sync::lock;

/// A unit of work handed to an [`Executor`].
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Something that runs tasks.
pub trait Executor: Send + Sync {
    /// Schedule `task` for execution.
    fn execute(&self, task: Task);
}

impl<F> Executor for F
where
    F: Fn(Task) + Send + Sync,
{
    fn execute(&self, task: Task) {
        self(task);
    }
}

// ---------------------------------------------------------------------------
// InlineExecutor
// ---------------------------------------------------------------------------

/// Runs every task immediately on the calling thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineExecutor;

impl Executor for InlineExecutor {
    fn execute(&self, task: Task) {
        task();
    }
}

// ---------------------------------------------------------------------------
// QueueExecutor
// ---------------------------------------------------------------------------

/// A FIFO of tasks drained explicitly by its owner.
///
/// Cloning creates a new handle to the **same** queue, so a clone can be
/// handed to worker threads while the owning thread drains it.
#[derive(Clone, Default)]
pub struct QueueExecutor {
    queue: Arc<Mutex<VecDeque<Task>>>,
}

impl fmt::Debug for QueueExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueExecutor")
            .field("pending", &self.pending())
            .finish()
    }
}

impl QueueExecutor {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of queued tasks.
    #[must_use]
    pub fn pending(&self) -> usize {
        lock(&self.queue).len()
    }

    /// Whether the queue is empty.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        lock(&self.queue).is_empty()
    }

    /// Run the oldest queued task. Returns `false` if the queue was empty.
    pub fn run_one(&self) -> bool {
        let task = lock(&self.queue).pop_front();
        match task {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }

    /// Run queued tasks until the queue is empty, including tasks enqueued by
    /// the tasks themselves. Returns the number of tasks run.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        while self.run_one() {
            ran += 1;
        }
        ran
    }

    /// Drop every queued task without running it.
    pub fn clear(&self) -> usize {
        let mut queue = lock(&self.queue);
        let dropped = queue.len();
        queue.clear();
        dropped
    }
}

impl Executor for QueueExecutor {
    fn execute(&self, task: Task) {
        lock(&self.queue).push_back(task);
    }
}

// ---------------------------------------------------------------------------
// ThreadExecutor
// ---------------------------------------------------------------------------

/// Spawns a named thread per task.
#[derive(Debug, Clone)]
pub struct ThreadExecutor {
    name: String,
}

impl Default for ThreadExecutor {
    fn default() -> Self {
        Self::new("cval-task")
    }
}

impl ThreadExecutor {
    /// Create an executor whose threads carry `name`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Executor for ThreadExecutor {
    fn execute(&self, task: Task) {
        let spawned = thread::Builder::new().name(self.name.clone()).spawn(task);
        if let Err(err) = spawned {
            tracing::error!(thread = %self.name, error = %err, "failed to spawn task thread");
        }
    }
}

// ---------------------------------------------------------------------------
// WorkerPool
// ---------------------------------------------------------------------------

/// A fixed-size pool of worker threads fed through a channel.
///
/// Dropping the pool closes the channel and joins the workers after they
/// finish the tasks already queued.
pub struct WorkerPool {
    sender: Mutex<Option<mpsc::Sender<Task>>>,
    workers: Vec<thread::JoinHandle<()>>,
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.workers.len())
            .finish()
    }
}

impl WorkerPool {
    /// Spawn `size` workers (at least one) named `{name}-{index}`.
    pub fn new(size: usize, name: &str) -> io::Result<Self> {
        let (sender, receiver) = mpsc::channel::<Task>();
        let receiver = Arc::new(Mutex::new(receiver));
        let size = size.max(1);

        let mut workers = Vec::with_capacity(size);
        for index in 0..size {
            let receiver = Arc::clone(&receiver);
            let handle = thread::Builder::new()
                .name(format!("{name}-{index}"))
                .spawn(move || worker_loop(&receiver))?;
            workers.push(handle);
        }

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            workers,
        })
    }

    /// Number of worker threads.
    #[must_use]
    pub fn size(&self) -> usize {
        self.workers.len()
    }
}

fn worker_loop(receiver: &Mutex<mpsc::Receiver<Task>>) {
    loop {
        let next = lock(receiver).recv();
        let Ok(task) = next else {
            break;
        };
        if catch_unwind(AssertUnwindSafe(task)).is_err() {
            tracing::error!("task panicked on worker thread");
        }
    }
}

impl Executor for WorkerPool {
    fn execute(&self, task: Task) {
        let sender = lock(&self.sender);
        let delivered = sender.as_ref().is_some_and(|tx| tx.send(task).is_ok());
        if !delivered {
            tracing::warn!("worker pool is shut down; task dropped");
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        lock(&self.sender).take();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn inline_runs_immediately() {
        let ran = Arc::new(AtomicUsize::new(0));
        let ran_clone = Arc::clone(&ran);
        InlineExecutor.execute(Box::new(move || {
            ran_clone.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn queue_defers_until_drained() {
        let queue = QueueExecutor::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = Arc::clone(&order);
            queue.execute(Box::new(move || order.lock().unwrap().push(i)));
        }

        assert_eq!(queue.pending(), 3);
        assert!(order.lock().unwrap().is_empty());

        assert!(queue.run_one());
        assert_eq!(*order.lock().unwrap(), vec![0]);

        assert_eq!(queue.run_pending(), 2);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
        assert!(queue.is_idle());
        assert!(!queue.run_one());
    }

    #[test]
    fn queue_runs_tasks_enqueued_while_draining() {
        let queue = QueueExecutor::new();
        let ran = Arc::new(AtomicUsize::new(0));
        let inner_queue = queue.clone();
        let ran_outer = Arc::clone(&ran);
        queue.execute(Box::new(move || {
            ran_outer.fetch_add(1, Ordering::SeqCst);
            let ran_inner = Arc::clone(&ran_outer);
            inner_queue.execute(Box::new(move || {
                ran_inner.fetch_add(1, Ordering::SeqCst);
            }));
        }));

        assert_eq!(queue.run_pending(), 2);
        assert_eq!(ran.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn queue_clear_drops_tasks() {
        let queue = QueueExecutor::new();
        let ran = Arc::new(AtomicUsize::new(0));
        let ran_clone = Arc::clone(&ran);
        queue.execute(Box::new(move || {
            ran_clone.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(queue.clear(), 1);
        assert_eq!(queue.run_pending(), 0);
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn closure_is_an_executor() {
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);
        let exec = move |task: Task| {
            count_clone.fetch_add(1, Ordering::SeqCst);
            task();
        };
        exec.execute(Box::new(|| {}));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn thread_executor_runs_off_thread() {
        let (tx, rx) = mpsc::channel();
        let caller = thread::current().id();
        ThreadExecutor::new("cval-test").execute(Box::new(move || {
            tx.send(thread::current().id()).unwrap();
        }));
        let worker = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_ne!(worker, caller);
    }

    #[test]
    fn worker_pool_runs_all_tasks() {
        let pool = WorkerPool::new(3, "cval-pool").unwrap();
        assert_eq!(pool.size(), 3);
        let (tx, rx) = mpsc::channel();
        for i in 0..20 {
            let tx = tx.clone();
            pool.execute(Box::new(move || tx.send(i).unwrap()));
        }
        drop(tx);

        let mut seen: Vec<i32> = rx.iter().take(20).collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..20).collect::<Vec<_>>());
    }

    fn explode() {
        panic!("boom");
    }

    #[test]
    fn worker_pool_survives_panicking_task() {
        let pool = WorkerPool::new(1, "cval-pool").unwrap();
        pool.execute(Box::new(explode));
        let (tx, rx) = mpsc::channel();
        pool.execute(Box::new(move || tx.send(42).unwrap()));
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 42);
    }

    #[test]
    fn worker_pool_drop_drains_queue() {
        let ran = Arc::new(AtomicUsize::new(0));
        {
            let pool = WorkerPool::new(2, "cval-pool").unwrap();
            for _ in 0..10 {
                let ran = Arc::clone(&ran);
                pool.execute(Box::new(move || {
                    ran.fetch_add(1, Ordering::SeqCst);
                }));
            }
        }
        assert_eq!(ran.load(Ordering::SeqCst), 10);
    }
}
