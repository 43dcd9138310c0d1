//! Fixed-size worker pool for background compaction.
//!
//! Jobs are boxed closures delivered over a `crossbeam` channel; each
//! worker loops until the channel disconnects. Dropping the pool closes
//! the channel and joins every worker, so queued jobs always run to
//! completion before the pool disappears.

use std::{
    sync::{Arc, OnceLock},
    thread::{self, JoinHandle},
};

use crossbeam::channel::{Sender, unbounded};
use tracing::{debug, error};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A fixed set of worker threads draining one shared job queue.
pub struct ThreadPool {
    tx: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl ThreadPool {
    /// Spawn `num_threads` workers (at least one).
    pub fn new(num_threads: usize) -> Self {
        let num_threads = num_threads.max(1);
        let (tx, rx) = unbounded::<Job>();

        let workers = (0..num_threads)
            .map(|id| {
                let rx = rx.clone();
                thread::Builder::new()
                    .name(format!("plfsio-worker-{id}"))
                    .spawn(move || {
                        while let Ok(job) = rx.recv() {
                            job();
                        }
                    })
                    .expect("failed to spawn worker thread")
            })
            .collect();

        debug!(num_threads, "worker pool started");
        Self {
            tx: Some(tx),
            workers,
        }
    }

    /// Enqueue a job for execution on some worker.
    pub fn execute(&self, job: impl FnOnce() + Send + 'static) {
        if let Some(tx) = &self.tx
            && tx.send(Box::new(job)).is_err()
        {
            error!("worker pool channel disconnected; job dropped");
        }
    }

    /// Number of worker threads.
    pub fn num_threads(&self) -> usize {
        self.workers.len()
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        // Closing the channel lets each worker drain and exit.
        drop(self.tx.take());
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                error!("worker thread panicked during pool shutdown");
            }
        }
    }
}

impl std::fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadPool")
            .field("num_threads", &self.workers.len())
            .finish()
    }
}

/// The process-wide fallback pool.
///
/// Created on first use with one worker per available core. Writers only
/// reach for it when `allow_env_threads` is set and no explicit
/// `compaction_pool` was configured.
pub fn default_pool() -> &'static Arc<ThreadPool> {
    static POOL: OnceLock<Arc<ThreadPool>> = OnceLock::new();
    POOL.get_or_init(|| {
        let threads = thread::available_parallelism().map_or(1, |n| n.get());
        Arc::new(ThreadPool::new(threads))
    })
}
