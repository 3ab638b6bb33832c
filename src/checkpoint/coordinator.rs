//! Checkpoint coordinator
//!
//! Hosts of one distributed task checkpoint independently: each persists
//! its payload for the task's current simulated time, then records itself
//! in the quorum table. The host completing the set marks the time point
//! valid in the store. Nothing here returns an error to the caller; store
//! trouble degrades to "no resilience available".

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::CheckpointSettings;
use crate::error::Error;
use crate::types::{HostIndex, SimTime, TaskId};

use super::quorum::{QuorumTable, Tally};
use super::store::{CheckpointEntry, CheckpointStore, StoreCapabilities};

/// Looks up a task's current simulated time
pub trait TaskClock: Send + Sync {
    fn simulated_time(&self, task: &TaskId) -> Option<SimTime>;
}

/// What happened to one checkpoint submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// No task id, or the task's clock is unknown
    MissingContext,
    /// No usable store is configured
    StorageUnavailable,
    /// The payload could not be persisted; not counted
    WriteFailed,
    /// Persisted; waiting for other hosts
    Pending { reported: usize, required: usize },
    /// Persisted; this submission completed the quorum and the time point is valid
    Validated,
    /// Quorum reached but the store refused to mark the point valid;
    /// the next submission at the same time retries
    ValidationFailed,
    /// Persisted; the point (or a later one) was already validated
    AlreadyValidated,
}

impl SubmitOutcome {
    /// Whether the payload reached the store
    pub fn is_persisted(&self) -> bool {
        matches!(
            self,
            SubmitOutcome::Pending { .. }
                | SubmitOutcome::Validated
                | SubmitOutcome::ValidationFailed
                | SubmitOutcome::AlreadyValidated
        )
    }
}

/// Records checkpoint submissions and validates time points on quorum
pub struct CheckpointCoordinator {
    owner_id: String,
    clock: Arc<dyn TaskClock>,
    storage: RwLock<Option<Arc<dyn CheckpointStore>>>,
    ready: AtomicBool,
    quorum: Mutex<QuorumTable>,
}

impl CheckpointCoordinator {
    /// Create a coordinator with no store attached
    pub fn new(owner_id: impl Into<String>, clock: Arc<dyn TaskClock>, max_pending_per_task: usize) -> Self {
        Self {
            owner_id: owner_id.into(),
            clock,
            storage: RwLock::new(None),
            ready: AtomicBool::new(false),
            quorum: Mutex::new(QuorumTable::new(max_pending_per_task)),
        }
    }

    pub fn from_settings(settings: &CheckpointSettings, clock: Arc<dyn TaskClock>) -> Self {
        Self::new(settings.effective_owner_id(), clock, settings.max_pending_per_task)
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    /// Whether a store is open and usable
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Attach and open a store
    ///
    /// A store lacking a required capability, or failing to open, leaves
    /// the coordinator not ready. Any previously attached store is closed.
    pub fn set_data_storage(&self, store: Arc<dyn CheckpointStore>) -> bool {
        self.shut_down();

        let missing = store.capabilities().missing(&StoreCapabilities::REQUIRED);
        if !missing.is_empty() {
            let err = Error::StorageIncompatible {
                store: store.name().to_string(),
                missing: missing.join(", "),
            };
            warn!(error = %err, "Checkpoint storage rejected, continuing without resilience");
            return false;
        }

        if let Err(e) = store.open(&self.owner_id) {
            warn!(
                store = %store.name(),
                error = %e,
                "Checkpoint storage unavailable, continuing without resilience"
            );
            return false;
        }

        info!(store = %store.name(), owner = %self.owner_id, "Checkpoint storage ready");
        *self.storage.write() = Some(store);
        self.ready.store(true, Ordering::SeqCst);
        true
    }

    /// Persist one host's checkpoint and validate the time point on quorum
    pub fn submit_checkpoint(
        &self,
        task_id: &TaskId,
        host: HostIndex,
        total_hosts: usize,
        payload: &[u8],
    ) -> SubmitOutcome {
        if task_id.is_empty() {
            warn!(error = %Error::MissingContext("task id".into()), "Checkpoint submission rejected");
            return SubmitOutcome::MissingContext;
        }
        let Some(time) = self.clock.simulated_time(task_id) else {
            warn!(
                task_id = %task_id,
                error = %Error::MissingContext(format!("simulated time of {}", task_id)),
                "Checkpoint submission rejected"
            );
            return SubmitOutcome::MissingContext;
        };
        let Some(store) = self.store() else {
            debug!(task_id = %task_id, "No checkpoint storage, submission dropped");
            return SubmitOutcome::StorageUnavailable;
        };

        if let Err(e) = store.write(&self.owner_id, task_id, time, host, payload) {
            warn!(task_id = %task_id, time = %time, host, error = %e, "Checkpoint write failed");
            return SubmitOutcome::WriteFailed;
        }

        let tally = self.quorum.lock().record(task_id, time, host, total_hosts);
        match tally {
            Tally::Pending { reported, required } => {
                debug!(task_id = %task_id, time = %time, host, reported, required, "Checkpoint recorded");
                SubmitOutcome::Pending { reported, required }
            }
            Tally::Stale => {
                debug!(task_id = %task_id, time = %time, host, "Checkpoint at or before validated time");
                SubmitOutcome::AlreadyValidated
            }
            Tally::Reached => {
                if self.validate_checkpoint(task_id, time) {
                    self.quorum.lock().commit(task_id, time);
                    info!(task_id = %task_id, time = %time, hosts = total_hosts, "Checkpoint validated");
                    SubmitOutcome::Validated
                } else {
                    // Left re-countable; the next submission at this time retries
                    self.quorum.lock().reopen(task_id, time);
                    info!(task_id = %task_id, time = %time, "Checkpoint could not be validated");
                    SubmitOutcome::ValidationFailed
                }
            }
        }
    }

    /// Whether the task has a valid checkpoint in the store
    pub fn has_checkpoint(&self, task_id: &TaskId) -> bool {
        self.get_checkpoints(task_id)
            .is_some_and(|entries| !entries.is_empty())
    }

    /// Entries of the task's latest valid checkpoint, ordered by host
    pub fn get_checkpoints(&self, task_id: &TaskId) -> Option<Vec<CheckpointEntry>> {
        if task_id.is_empty() {
            warn!(error = %Error::MissingContext("task id".into()), "Checkpoint lookup rejected");
            return None;
        }
        let store = self.store()?;

        match store.read_last_checkpoint(&self.owner_id, task_id) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(task_id = %task_id, error = %e, "Reading checkpoint failed");
                None
            }
        }
    }

    /// Mark a time point valid in the store
    pub fn validate_checkpoint(&self, task_id: &TaskId, time: SimTime) -> bool {
        let Some(store) = self.store() else {
            warn!(task_id = %task_id, time = %time, "Cannot validate checkpoint without storage");
            return false;
        };

        match store.mark_valid(&self.owner_id, task_id, time) {
            Ok(valid) => valid,
            Err(e) => {
                warn!(task_id = %task_id, time = %time, error = %e, "Marking checkpoint valid failed");
                false
            }
        }
    }

    /// Hosts that reported a still-pending time point
    pub fn pending_hosts(&self, task_id: &TaskId, time: SimTime) -> Vec<HostIndex> {
        self.quorum.lock().pending_hosts(task_id, time)
    }

    /// Drop quorum bookkeeping of a finished task
    pub fn forget_task(&self, task_id: &TaskId) {
        if self.quorum.lock().forget(task_id) {
            debug!(task_id = %task_id, "Checkpoint bookkeeping dropped");
        }
    }

    /// Close the store, if one is open
    pub fn shut_down(&self) {
        self.ready.store(false, Ordering::SeqCst);
        let Some(store) = self.storage.write().take() else {
            return;
        };
        match store.close() {
            Ok(()) => debug!(store = %store.name(), "Checkpoint storage closed"),
            Err(e) => warn!(store = %store.name(), error = %e, "Closing checkpoint storage failed"),
        }
    }

    fn store(&self) -> Option<Arc<dyn CheckpointStore>> {
        if !self.is_ready() {
            return None;
        }
        self.storage.read().clone()
    }
}

impl std::fmt::Debug for CheckpointCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckpointCoordinator")
            .field("owner_id", &self.owner_id)
            .field("ready", &self.is_ready())
            .finish()
    }
}
