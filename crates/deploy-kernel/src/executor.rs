//! Executors that drive signal batches
//!
//! Signals are completed off the notifying thread so that a framework event thread never
//! re-enters lifecycle code it is itself holding locks for.

use crate::config::SignalConfig;
use crossbeam::channel::{self, Sender};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::JoinHandle;

/// Unit of work handed to an executor
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Runs jobs, possibly on other threads
pub trait SignalExecutor: Send + Sync {
    fn execute(&self, job: Job);

    /// Stop accepting work and wait for queued jobs to finish
    fn shutdown(&self) {}
}

/// Runs every job on the calling thread
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineExecutor;

impl SignalExecutor for InlineExecutor {
    fn execute(&self, job: Job) {
        job();
    }
}

/// Fixed pool of worker threads fed through a channel
///
/// Jobs submitted after shutdown run on the calling thread so queued signals are never
/// lost.
pub struct ThreadPoolExecutor {
    sender: Mutex<Option<Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl ThreadPoolExecutor {
    /// Start `threads` workers; at least one is always started
    ///
    /// # Errors
    /// Returns error if a worker thread cannot be spawned
    pub fn new(threads: usize) -> std::io::Result<Self> {
        let (sender, receiver) = channel::unbounded::<Job>();
        let mut workers = Vec::with_capacity(threads.max(1));
        for index in 0..threads.max(1) {
            let receiver = receiver.clone();
            let handle = std::thread::Builder::new()
                .name(format!("signal-worker-{index}"))
                .spawn(move || {
                    for job in &receiver {
                        job();
                    }
                })?;
            workers.push(handle);
        }
        tracing::debug!(threads = workers.len(), "Signal executor started");
        Ok(Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
        })
    }

    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.sender.lock().is_none()
    }
}

impl SignalExecutor for ThreadPoolExecutor {
    fn execute(&self, job: Job) {
        let rejected = {
            let sender = self.sender.lock();
            match sender.as_ref() {
                Some(sender) => sender.send(job).err().map(|error| error.into_inner()),
                None => Some(job),
            }
        };
        if let Some(job) = rejected {
            tracing::debug!("Signal executor shut down; running job inline");
            job();
        }
    }

    fn shutdown(&self) {
        drop(self.sender.lock().take());
        let workers: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        let current = std::thread::current().id();
        for worker in workers {
            if worker.thread().id() == current {
                continue;
            }
            if worker.join().is_err() {
                tracing::error!("Signal worker panicked");
            }
        }
    }
}

impl Drop for ThreadPoolExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for ThreadPoolExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadPoolExecutor")
            .field("workers", &self.workers.lock().len())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

/// Executor matching `config`: inline for zero threads, a worker pool otherwise
///
/// Falls back to inline execution if the pool cannot be started.
#[must_use]
pub fn executor_from_config(config: &SignalConfig) -> Arc<dyn SignalExecutor> {
    if config.threads == 0 {
        return Arc::new(InlineExecutor);
    }
    match ThreadPoolExecutor::new(config.threads) {
        Ok(pool) => Arc::new(pool),
        Err(error) => {
            tracing::warn!(error = %error, "Cannot start signal workers; driving signals inline");
            Arc::new(InlineExecutor)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn inline_runs_immediately() {
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = ran.clone();
        InlineExecutor.execute(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn pool_runs_all_jobs_before_shutdown_returns() {
        let pool = ThreadPoolExecutor::new(3).unwrap();
        let ran = Arc::new(AtomicUsize::new(0));
        for _ in 0..50 {
            let counter = ran.clone();
            pool.execute(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        }
        pool.shutdown();
        assert_eq!(ran.load(Ordering::SeqCst), 50);
        assert!(pool.is_shutdown());
    }

    #[test]
    fn jobs_after_shutdown_run_inline() {
        let pool = ThreadPoolExecutor::new(1).unwrap();
        pool.shutdown();
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = ran.clone();
        pool.execute(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn zero_threads_is_inline() {
        let executor = executor_from_config(&SignalConfig { threads: 0 });
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = ran.clone();
        executor.execute(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }
}
