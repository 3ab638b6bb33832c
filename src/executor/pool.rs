//! Fixed-size worker pool
//!
//! A pool owns `worker_count` named OS threads pulling boxed jobs from one
//! shared queue. Jobs block their worker for as long as they need (a job
//! may wait on its run decision indefinitely), which is why these are
//! threads and not async tasks.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::error::{Error, Result};

use super::panic_message;

type PoolJob = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Default)]
struct PoolCounters {
    queued: AtomicUsize,
    active: AtomicUsize,
    completed: AtomicU64,
}

/// Bounded set of worker threads serving one destination
pub struct WorkerPool {
    name: String,
    worker_count: usize,
    sender: Mutex<Option<mpsc::UnboundedSender<PoolJob>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    counters: Arc<PoolCounters>,
}

impl WorkerPool {
    /// Create a pool and start its workers
    pub fn new(name: impl Into<String>, worker_count: usize) -> Result<Arc<Self>> {
        let name = name.into();
        let worker_count = worker_count.max(1);
        let (tx, rx) = mpsc::unbounded_channel::<PoolJob>();
        let rx = Arc::new(Mutex::new(rx));
        let counters = Arc::new(PoolCounters::default());

        let mut workers = Vec::with_capacity(worker_count);
        for index in 0..worker_count {
            let rx = rx.clone();
            let counters = counters.clone();
            let thread_name = format!("{}-{}", name, index);
            let handle = thread::Builder::new()
                .name(thread_name.clone())
                .spawn(move || worker_loop(&thread_name, &rx, &counters))
                .map_err(|source| Error::PoolSpawn {
                    pool: name.clone(),
                    source,
                })?;
            workers.push(handle);
        }

        info!(pool = %name, workers = worker_count, "Worker pool started");

        Ok(Arc::new(Self {
            name,
            worker_count,
            sender: Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
            counters,
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Jobs waiting for a free worker
    pub fn queued(&self) -> usize {
        self.counters.queued.load(Ordering::SeqCst)
    }

    /// Jobs currently executing
    pub fn active(&self) -> usize {
        self.counters.active.load(Ordering::SeqCst)
    }

    /// Jobs finished since the pool started
    pub fn completed(&self) -> u64 {
        self.counters.completed.load(Ordering::SeqCst)
    }

    pub fn is_shut_down(&self) -> bool {
        self.sender.lock().is_none()
    }

    /// Queue a job for execution
    pub fn execute<F>(&self, job: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let sender = self.sender.lock();
        let Some(tx) = sender.as_ref() else {
            return Err(Error::PoolShutDown { pool: self.name.clone() });
        };

        self.counters.queued.fetch_add(1, Ordering::SeqCst);
        tx.send(Box::new(job)).map_err(|_| {
            self.counters.queued.fetch_sub(1, Ordering::SeqCst);
            Error::PoolShutDown { pool: self.name.clone() }
        })
    }

    /// Stop accepting jobs
    ///
    /// Already queued jobs still run; workers exit once the queue drains.
    /// Returns `false` if the pool was already shut down.
    pub fn shutdown(&self) -> bool {
        let was_open = self.sender.lock().take().is_some();
        if was_open {
            info!(
                pool = %self.name,
                queued = self.queued(),
                active = self.active(),
                "Worker pool shutting down"
            );
        }
        was_open
    }

    /// Wait for all workers to exit
    ///
    /// Call after [`shutdown`](Self::shutdown). The calling thread is
    /// skipped if it is one of this pool's workers.
    pub fn join(&self) {
        let handles: Vec<_> = self.workers.lock().drain(..).collect();
        let current = thread::current().id();
        for handle in handles {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                error!(pool = %self.name, "Worker thread panicked");
            }
        }
        debug!(pool = %self.name, "Worker pool joined");
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.name)
            .field("worker_count", &self.worker_count)
            .field("queued", &self.queued())
            .field("active", &self.active())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

fn worker_loop(
    thread_name: &str,
    rx: &Mutex<mpsc::UnboundedReceiver<PoolJob>>,
    counters: &PoolCounters,
) {
    debug!(worker = %thread_name, "Worker started");
    loop {
        let job = rx.lock().blocking_recv();
        let Some(job) = job else {
            break;
        };

        counters.queued.fetch_sub(1, Ordering::SeqCst);
        counters.active.fetch_add(1, Ordering::SeqCst);

        // A panicking job must not take the worker down with it
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
            error!(
                worker = %thread_name,
                panic = %panic_message(payload.as_ref()),
                "Job panicked on worker"
            );
        }

        counters.active.fetch_sub(1, Ordering::SeqCst);
        counters.completed.fetch_add(1, Ordering::SeqCst);
    }
    debug!(worker = %thread_name, "Worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc as std_mpsc;
    use std::time::Duration;

    #[test]
    fn test_pool_runs_jobs() {
        let pool = WorkerPool::new("test-pool", 2).unwrap();
        let (tx, rx) = std_mpsc::channel();

        for i in 0..5 {
            let tx = tx.clone();
            pool.execute(move || tx.send(i).unwrap()).unwrap();
        }

        let mut seen: Vec<i32> = (0..5).map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap()).collect();
        seen.sort();
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_workers_are_named_after_pool() {
        let pool = WorkerPool::new("remote-server-x", 1).unwrap();
        let (tx, rx) = std_mpsc::channel();

        pool.execute(move || tx.send(thread::current().name().map(String::from)).unwrap())
            .unwrap();

        let name = rx.recv_timeout(Duration::from_secs(5)).unwrap().unwrap();
        assert_eq!(name, "remote-server-x-0");
    }

    #[test]
    fn test_shutdown_rejects_new_jobs_and_drains_queue() {
        let pool = WorkerPool::new("drain", 1).unwrap();
        let (tx, rx) = std_mpsc::channel();

        for i in 0..3 {
            let tx = tx.clone();
            pool.execute(move || {
                thread::sleep(Duration::from_millis(5));
                tx.send(i).unwrap();
            })
            .unwrap();
        }

        assert!(pool.shutdown());
        assert!(!pool.shutdown());
        assert!(pool.is_shut_down());
        assert!(matches!(pool.execute(|| {}), Err(Error::PoolShutDown { .. })));

        pool.join();
        assert_eq!(rx.try_iter().count(), 3);
        assert_eq!(pool.completed(), 3);
    }

    #[test]
    fn test_panicking_job_does_not_kill_worker() {
        let pool = WorkerPool::new("panics", 1).unwrap();
        let (tx, rx) = std_mpsc::channel();

        pool.execute(|| panic!("boom")).unwrap();
        pool.execute(move || tx.send("still alive").unwrap()).unwrap();

        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "still alive");
    }

    #[test]
    fn test_zero_workers_is_clamped_to_one() {
        let pool = WorkerPool::new("clamped", 0).unwrap();
        assert_eq!(pool.worker_count(), 1);
    }
}
