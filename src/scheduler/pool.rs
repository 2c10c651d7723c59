//! Bounded worker thread pool.
//!
//! # Responsibilities
//! - Run WORKER stages on dedicated OS threads (they may block)
//! - Bound the number of queued jobs and reject beyond it
//! - Keep a worker alive across a panicking job
//!
//! # Design Decisions
//! - One shared queue; idle workers take turns on the receiver
//! - `queue_len == 0` selects an unbounded queue
//! - Submission never blocks the I/O thread (`try_send`)

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tokio::sync::mpsc;

/// A unit of work for a worker thread.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PoolError {
    #[error("worker queue is full")]
    Saturated,

    #[error("worker pool is shut down")]
    ShutDown,
}

enum JobSender {
    Bounded(mpsc::Sender<Job>),
    Unbounded(mpsc::UnboundedSender<Job>),
}

enum JobReceiver {
    Bounded(mpsc::Receiver<Job>),
    Unbounded(mpsc::UnboundedReceiver<Job>),
}

impl JobReceiver {
    fn blocking_recv(&mut self) -> Option<Job> {
        match self {
            JobReceiver::Bounded(rx) => rx.blocking_recv(),
            JobReceiver::Unbounded(rx) => rx.blocking_recv(),
        }
    }
}

/// Fixed set of worker threads behind one job queue.
pub struct WorkerPool {
    sender: RwLock<Option<JobSender>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    size: usize,
    queue_len: usize,
}

impl WorkerPool {
    /// Spawn `size` workers. With `size == 0` no threads are started and
    /// callers are expected to run jobs inline.
    pub fn new(size: usize, queue_len: usize) -> std::io::Result<Self> {
        let (sender, receiver) = if queue_len == 0 {
            let (tx, rx) = mpsc::unbounded_channel();
            (JobSender::Unbounded(tx), JobReceiver::Unbounded(rx))
        } else {
            let (tx, rx) = mpsc::channel(queue_len);
            (JobSender::Bounded(tx), JobReceiver::Bounded(rx))
        };
        let receiver = Arc::new(Mutex::new(receiver));

        let mut workers = Vec::with_capacity(size);
        for idx in 0..size {
            let receiver = Arc::clone(&receiver);
            let handle = std::thread::Builder::new()
                .name(format!("supernode-worker-{idx}"))
                .spawn(move || worker_loop(idx, receiver))?;
            workers.push(handle);
        }

        tracing::info!(workers = size, queue_len, "Worker pool started");
        Ok(Self {
            sender: RwLock::new(Some(sender)),
            workers: Mutex::new(workers),
            size,
            queue_len,
        })
    }

    /// No threads: WORKER stages run on the caller.
    pub fn is_inline(&self) -> bool {
        self.size == 0
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn queue_len(&self) -> usize {
        self.queue_len
    }

    /// Enqueue `job`, failing fast when the queue is full.
    pub fn submit(&self, job: Job) -> Result<(), PoolError> {
        let guard = self.sender.read();
        match guard.as_ref() {
            Some(JobSender::Bounded(tx)) => tx.try_send(job).map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => PoolError::Saturated,
                mpsc::error::TrySendError::Closed(_) => PoolError::ShutDown,
            }),
            Some(JobSender::Unbounded(tx)) => tx.send(job).map_err(|_| PoolError::ShutDown),
            None => Err(PoolError::ShutDown),
        }
    }

    /// Close the queue and wait for workers to finish the jobs already queued.
    pub fn shutdown(&self) {
        self.sender.write().take();
        let workers: Vec<_> = self.workers.lock().drain(..).collect();
        let count = workers.len();
        for handle in workers {
            if handle.join().is_err() {
                tracing::error!("Worker thread terminated abnormally");
            }
        }
        if count > 0 {
            tracing::info!(workers = count, "Worker pool stopped");
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("size", &self.size)
            .field("queue_len", &self.queue_len)
            .finish()
    }
}

fn worker_loop(idx: usize, receiver: Arc<Mutex<JobReceiver>>) {
    loop {
        // Only the idle worker holding the lock waits on the channel.
        let job = receiver.lock().blocking_recv();
        let Some(job) = job else {
            tracing::debug!(worker = idx, "Job queue closed, worker exiting");
            return;
        };
        if catch_unwind(AssertUnwindSafe(job)).is_err() {
            tracing::error!(worker = idx, "Job panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc as std_mpsc;
    use std::time::Duration;

    #[test]
    fn runs_jobs_on_worker_threads() {
        let pool = WorkerPool::new(2, 8).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = std_mpsc::channel();
        for _ in 0..8 {
            let counter = Arc::clone(&counter);
            let tx = tx.clone();
            pool.submit(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                let name = std::thread::current().name().map(str::to_string);
                tx.send(name).unwrap();
            }))
            .unwrap();
        }
        for _ in 0..8 {
            let name = rx.recv_timeout(Duration::from_secs(5)).unwrap();
            assert!(name.unwrap().starts_with("supernode-worker-"));
        }
        pool.shutdown();
        assert_eq!(counter.load(Ordering::SeqCst), 8);
    }

    #[test]
    fn full_queue_rejects() {
        let pool = WorkerPool::new(1, 1).unwrap();
        let (started_tx, started_rx) = std_mpsc::channel();
        let (release_tx, release_rx) = std_mpsc::channel::<()>();

        pool.submit(Box::new(move || {
            started_tx.send(()).unwrap();
            let _ = release_rx.recv();
        }))
        .unwrap();
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        pool.submit(Box::new(|| {})).unwrap();
        assert_eq!(pool.submit(Box::new(|| {})), Err(PoolError::Saturated));

        release_tx.send(()).unwrap();
        pool.shutdown();
        assert_eq!(pool.submit(Box::new(|| {})), Err(PoolError::ShutDown));
    }

    #[test]
    fn panicking_job_does_not_kill_worker() {
        let pool = WorkerPool::new(1, 0).unwrap();
        pool.submit(Box::new(|| panic!("boom"))).unwrap();
        let (tx, rx) = std_mpsc::channel();
        pool.submit(Box::new(move || tx.send(7).unwrap())).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 7);
        pool.shutdown();
    }
}
