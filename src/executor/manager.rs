//! Worker pool manager
//!
//! Multiplexes execution jobs onto one process-wide local pool and one pool
//! per remote destination. Destination pools are created lazily on first
//! submit and torn down once the last configuration referencing them has
//! been cleaned up.
//!
//! Lock order: the destination table lock is always taken before a
//! destination's active-set lock, never the other way round.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::ExecutionSettings;
use crate::error::Result;
use crate::types::{RemoteDestination, TaskConfiguration};

use super::job::ExecutionJob;
use super::pool::WorkerPool;

/// Pool and active configurations of one remote destination
struct DestinationEntry {
    pool: Arc<WorkerPool>,
    /// Reference count per configuration value
    active: Mutex<HashMap<TaskConfiguration, usize>>,
}

impl DestinationEntry {
    fn new(pool: Arc<WorkerPool>) -> Self {
        Self {
            pool,
            active: Mutex::new(HashMap::new()),
        }
    }

    fn register(&self, config: &TaskConfiguration) {
        *self.active.lock().entry(config.clone()).or_insert(0) += 1;
    }

    /// Drop one reference; returns whether the set is now empty
    fn release(&self, config: &TaskConfiguration) -> bool {
        let mut active = self.active.lock();
        match active.get_mut(config) {
            Some(count) if *count > 1 => *count -= 1,
            Some(_) => {
                active.remove(config);
            }
            None => debug!(config = %config.name, "Configuration not active on destination"),
        }
        active.is_empty()
    }
}

/// Routes jobs to the local pool or a per-destination pool
pub struct WorkerPoolManager {
    local: Arc<WorkerPool>,
    remote_workers: usize,
    prefix: String,
    destinations: Mutex<HashMap<RemoteDestination, Arc<DestinationEntry>>>,
    /// Pools shut down by `shut_down`, joined by `await_termination`
    retired: Mutex<Vec<Arc<WorkerPool>>>,
    shut_down: AtomicBool,
}

impl WorkerPoolManager {
    /// Create the manager and start the local pool
    pub fn new(settings: &ExecutionSettings) -> Result<Self> {
        let local_workers = settings.effective_local_workers();
        let local = WorkerPool::new(format!("{}-local", settings.thread_name_prefix), local_workers)?;

        info!(
            local_workers,
            remote_workers_per_destination = settings.remote_workers_per_destination,
            "Worker pool manager ready"
        );

        Ok(Self {
            local,
            remote_workers: settings.remote_workers_per_destination.max(1),
            prefix: settings.thread_name_prefix.clone(),
            destinations: Mutex::new(HashMap::new()),
            retired: Mutex::new(Vec::new()),
            shut_down: AtomicBool::new(false),
        })
    }

    /// Schedule a job on the pool its configuration targets
    ///
    /// Registers `config` as active on its destination. Returns `false` if
    /// the manager is shut down or the job could not be scheduled; in that
    /// case nothing stays registered and no `clean_up` is owed.
    pub fn submit(&self, config: &TaskConfiguration, job: Arc<ExecutionJob>) -> bool {
        if self.is_shut_down() {
            debug!(config = %config.name, "Manager shut down, ignoring submit");
            return false;
        }

        let pool = match config.remote_destination() {
            None => self.local.clone(),
            Some(destination) => match self.register(destination, config) {
                Some(pool) => pool,
                None => return false,
            },
        };

        match pool.execute(move || job.run()) {
            Ok(()) => {
                debug!(config = %config.name, pool = %pool.name(), "Job submitted");
                true
            }
            Err(e) => {
                warn!(config = %config.name, pool = %pool.name(), error = %e, "Job could not be scheduled");
                if let Some(destination) = config.remote_destination() {
                    self.release(destination, config);
                }
                false
            }
        }
    }

    /// Release a configuration after its job fully completed
    ///
    /// Shuts the destination pool down when its active set empties. No-op
    /// for local configurations and after shutdown.
    pub fn clean_up(&self, config: &TaskConfiguration) {
        if self.is_shut_down() {
            return;
        }
        if let Some(destination) = config.remote_destination() {
            self.release(destination, config);
        }
    }

    /// Shut every pool down
    ///
    /// Terminal: later `submit` and `clean_up` calls are no-ops. Queued jobs
    /// still drain; use [`await_termination`](Self::await_termination) to
    /// wait for them.
    pub fn shut_down(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }

        let entries: Vec<_> = self.destinations.lock().drain().collect();
        let mut retired = self.retired.lock();
        for (destination, entry) in entries {
            if entry.pool.shutdown() {
                debug!(destination = %destination, "Destination pool shut down");
            }
            retired.push(entry.pool.clone());
        }
        drop(retired);

        self.local.shutdown();
        info!("Worker pool manager shut down");
    }

    /// Wait for every pool's workers to exit
    ///
    /// Only meaningful after [`shut_down`](Self::shut_down); returns `false`
    /// without waiting otherwise.
    pub fn await_termination(&self) -> bool {
        if !self.is_shut_down() {
            warn!("await_termination called before shut_down");
            return false;
        }

        let retired: Vec<_> = self.retired.lock().drain(..).collect();
        for pool in retired {
            pool.join();
        }
        self.local.join();
        true
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// The shared local pool
    pub fn local_pool(&self) -> Arc<WorkerPool> {
        self.local.clone()
    }

    /// The pool a configuration would currently be routed to
    ///
    /// `None` for a remote destination with no live pool.
    pub fn pool_for(&self, config: &TaskConfiguration) -> Option<Arc<WorkerPool>> {
        match config.remote_destination() {
            None => Some(self.local.clone()),
            Some(destination) => self
                .destinations
                .lock()
                .get(destination)
                .map(|entry| entry.pool.clone()),
        }
    }

    /// Number of remote destinations with a live pool
    pub fn destination_count(&self) -> usize {
        self.destinations.lock().len()
    }

    /// Shut-down pools still waiting to be joined
    pub fn retired_count(&self) -> usize {
        self.retired.lock().len()
    }

    /// Configurations currently active on a destination
    pub fn active_configurations(&self, destination: &RemoteDestination) -> Vec<TaskConfiguration> {
        let entry = self.destinations.lock().get(destination).cloned();
        entry
            .map(|entry| entry.active.lock().keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Look up or create the destination's pool and register `config` on it
    fn register(&self, destination: &RemoteDestination, config: &TaskConfiguration) -> Option<Arc<WorkerPool>> {
        let mut table = self.destinations.lock();

        // shut_down drains the table under this lock; re-check so a racing
        // submit cannot resurrect a pool
        if self.is_shut_down() {
            return None;
        }

        let entry = match table.get(destination) {
            Some(entry) => entry.clone(),
            None => {
                let name = format!("{}-remote-{}", self.prefix, destination);
                let pool = match WorkerPool::new(name, self.remote_workers) {
                    Ok(pool) => pool,
                    Err(e) => {
                        error!(destination = %destination, error = %e, "Failed to create destination pool");
                        return None;
                    }
                };
                info!(destination = %destination, workers = self.remote_workers, "Destination pool created");
                let entry = Arc::new(DestinationEntry::new(pool));
                table.insert(destination.clone(), entry.clone());
                entry
            }
        };

        entry.register(config);
        Some(entry.pool.clone())
    }

    fn release(&self, destination: &RemoteDestination, config: &TaskConfiguration) {
        let Some(entry) = self.destinations.lock().get(destination).cloned() else {
            debug!(destination = %destination, "No pool for destination, nothing to clean up");
            return;
        };

        if !entry.release(config) {
            return;
        }

        let mut table = self.destinations.lock();
        let still_current = table
            .get(destination)
            .map(|current| Arc::ptr_eq(current, &entry))
            .unwrap_or(false);

        // A submit may have re-registered between the release and here
        if still_current && entry.active.lock().is_empty() {
            table.remove(destination);
            drop(table);

            if entry.pool.shutdown() {
                info!(destination = %destination, "Destination pool released");
            }
            // A worker releasing its own pool skips itself
            entry.pool.join();
        }
    }
}

impl Drop for WorkerPoolManager {
    fn drop(&mut self) {
        self.shut_down();
    }
}

impl std::fmt::Debug for WorkerPoolManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPoolManager")
            .field("local", &self.local)
            .field("destinations", &self.destination_count())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}
