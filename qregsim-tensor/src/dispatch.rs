//! Single-consumer dispatch queue
//!
//! Gate submissions become closures on a FIFO drained by one background
//! worker, so buffered circuits mutate on exactly one thread. `finish` is a
//! blocking drain barrier; `dump` discards queued work (the in-flight job
//! completes first).

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::JoinHandle;

type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct QueueState {
    jobs: VecDeque<Job>,
    busy: bool,
    shutdown: bool,
}

struct QueueInner {
    state: Mutex<QueueState>,
    /// Signaled when work arrives or shutdown begins
    work_cv: Condvar,
    /// Signaled when the queue drains and the worker goes idle
    idle_cv: Condvar,
}

/// FIFO of closures with a single background consumer
///
/// # Example
/// ```
/// use qregsim_tensor::DispatchQueue;
/// use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
///
/// let queue = DispatchQueue::new();
/// let counter = Arc::new(AtomicUsize::new(0));
/// for _ in 0..4 {
///     let counter = Arc::clone(&counter);
///     queue.dispatch(move || {
///         counter.fetch_add(1, Ordering::SeqCst);
///     });
/// }
/// queue.finish();
/// assert_eq!(counter.load(Ordering::SeqCst), 4);
/// ```
pub struct DispatchQueue {
    inner: Arc<QueueInner>,
    worker: Option<JoinHandle<()>>,
}

impl DispatchQueue {
    /// Start the queue and its worker thread.
    pub fn new() -> Self {
        let inner = Arc::new(QueueInner {
            state: Mutex::new(QueueState::default()),
            work_cv: Condvar::new(),
            idle_cv: Condvar::new(),
        });

        let worker_inner = Arc::clone(&inner);
        let worker = std::thread::Builder::new()
            .name("qregsim-dispatch".into())
            .spawn(move || Self::worker_loop(worker_inner))
            .expect("spawn dispatch worker");

        Self {
            inner,
            worker: Some(worker),
        }
    }

    fn worker_loop(inner: Arc<QueueInner>) {
        loop {
            let job = {
                let mut state = inner.state.lock();
                loop {
                    if let Some(job) = state.jobs.pop_front() {
                        state.busy = true;
                        break job;
                    }
                    if state.shutdown {
                        return;
                    }
                    inner.work_cv.wait(&mut state);
                }
            };

            job();

            let mut state = inner.state.lock();
            state.busy = false;
            if state.jobs.is_empty() {
                inner.idle_cv.notify_all();
            }
        }
    }

    /// Enqueue a job. Submission order is execution order.
    pub fn dispatch<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.inner.state.lock();
        state.jobs.push_back(Box::new(job));
        self.inner.work_cv.notify_one();
    }

    /// Block until every queued job has run and the worker is idle.
    pub fn finish(&self) {
        let mut state = self.inner.state.lock();
        while !state.jobs.is_empty() || state.busy {
            self.inner.idle_cv.wait(&mut state);
        }
    }

    /// Discard queued jobs. The in-flight job, if any, completes.
    pub fn dump(&self) {
        let mut state = self.inner.state.lock();
        state.jobs.clear();
        while state.busy {
            self.inner.idle_cv.wait(&mut state);
        }
    }

    /// True when no job is queued or running.
    pub fn is_finished(&self) -> bool {
        let state = self.inner.state.lock();
        state.jobs.is_empty() && !state.busy
    }
}

impl Default for DispatchQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for DispatchQueue {
    fn drop(&mut self) {
        {
            let mut state = self.inner.state.lock();
            state.shutdown = true;
            self.inner.work_cv.notify_all();
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
