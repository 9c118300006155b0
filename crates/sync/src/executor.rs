//! General purpose task queue and worker threads, for work that does not
//! touch the replicated world (asset loading and the like).

use std::collections::VecDeque;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};

pub type Task = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ExecutorError {
    #[error("execution queue was aborted")]
    Aborted,
}

#[derive(Default)]
struct State {
    tasks: VecDeque<Task>,
    aborted: bool,
}

/// FIFO of tasks shared between producers and any number of consumers.
#[derive(Default)]
pub struct ExecutionQueue {
    state: Mutex<State>,
    available: Condvar,
}

impl ExecutionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_task(&self, task: impl FnOnce() + Send + 'static) -> Result<(), ExecutorError> {
        let mut state = self.state.lock();
        if state.aborted {
            return Err(ExecutorError::Aborted);
        }
        state.tasks.push_back(Box::new(task));
        self.available.notify_one();
        Ok(())
    }

    /// Blocks until a task is available or the queue is aborted.
    pub fn get_next(&self) -> Result<Task, ExecutorError> {
        let mut state = self.state.lock();
        loop {
            if state.aborted {
                return Err(ExecutorError::Aborted);
            }
            if let Some(task) = state.tasks.pop_front() {
                return Ok(task);
            }
            self.available.wait(&mut state);
        }
    }

    pub fn try_get_next(&self) -> Option<Task> {
        let mut state = self.state.lock();
        if state.aborted {
            return None;
        }
        state.tasks.pop_front()
    }

    /// Runs queued tasks on the calling thread until none are left.
    pub fn run_pending(&self) -> usize {
        let mut count = 0;
        while let Some(task) = self.try_get_next() {
            task();
            count += 1;
        }
        count
    }

    pub fn len(&self) -> usize {
        self.state.lock().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops queued tasks and wakes every waiting consumer with
    /// [`ExecutorError::Aborted`]. Tasks already running finish normally.
    pub fn abort(&self) {
        let mut state = self.state.lock();
        state.aborted = true;
        state.tasks.clear();
        self.available.notify_all();
    }

    pub fn is_aborted(&self) -> bool {
        self.state.lock().aborted
    }
}

/// Worker threads draining one [`ExecutionQueue`]. Dropping the pool aborts
/// the queue and joins the workers.
pub struct ThreadPool {
    queue: Arc<ExecutionQueue>,
    workers: Vec<JoinHandle<()>>,
}

impl ThreadPool {
    pub fn new(name: &str, threads: usize) -> io::Result<Self> {
        let queue = Arc::new(ExecutionQueue::new());
        let mut workers = Vec::with_capacity(threads);
        for index in 0..threads.max(1) {
            let queue = Arc::clone(&queue);
            let handle = thread::Builder::new()
                .name(format!("{name}-{index}"))
                .spawn(move || run_worker(&queue))?;
            workers.push(handle);
        }
        log::debug!("started {} '{name}' workers", workers.len());
        Ok(Self { queue, workers })
    }

    pub fn queue(&self) -> &Arc<ExecutionQueue> {
        &self.queue
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn execute(&self, task: impl FnOnce() + Send + 'static) -> Result<(), ExecutorError> {
        self.queue.add_task(task)
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.queue.abort();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

fn run_worker(queue: &ExecutionQueue) {
    while let Ok(task) = queue.get_next() {
        if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
            log::error!("task panicked on {:?}", thread::current().name());
        }
    }
}
