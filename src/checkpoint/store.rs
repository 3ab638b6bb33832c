//! Checkpoint storage contract and the in-memory store

use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::types::{HostIndex, SimTime, TaskId};

// ─────────────────────────────────────────────────────────────────
// Capabilities
// ─────────────────────────────────────────────────────────────────

/// Operations a store supports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreCapabilities {
    pub write: bool,
    pub read_last: bool,
    pub mark_valid: bool,
    /// Survives a process restart
    pub durable: bool,
}

impl StoreCapabilities {
    /// What the checkpoint coordinator needs; durability is optional
    pub const REQUIRED: StoreCapabilities = StoreCapabilities {
        write: true,
        read_last: true,
        mark_valid: true,
        durable: false,
    };

    pub const fn all() -> Self {
        Self {
            write: true,
            read_last: true,
            mark_valid: true,
            durable: true,
        }
    }

    /// Names of the required capabilities this set lacks
    pub fn missing(&self, required: &StoreCapabilities) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if required.write && !self.write {
            missing.push("write");
        }
        if required.read_last && !self.read_last {
            missing.push("read_last");
        }
        if required.mark_valid && !self.mark_valid {
            missing.push("mark_valid");
        }
        if required.durable && !self.durable {
            missing.push("durable");
        }
        missing
    }

    pub fn satisfies(&self, required: &StoreCapabilities) -> bool {
        self.missing(required).is_empty()
    }
}

// ─────────────────────────────────────────────────────────────────
// Store Trait
// ─────────────────────────────────────────────────────────────────

/// One host's stored checkpoint for one time point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointEntry {
    pub task_id: TaskId,
    pub time: SimTime,
    pub host: HostIndex,
    pub payload: Vec<u8>,
}

/// Persistent backing service for checkpoints
///
/// Writes are idempotent per (owner, task, time, host): resubmitting
/// replaces the previous payload.
pub trait CheckpointStore: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    fn capabilities(&self) -> StoreCapabilities;

    /// Open the store, creating its schema if needed
    fn open(&self, owner: &str) -> Result<()>;

    fn write(&self, owner: &str, task: &TaskId, time: SimTime, host: HostIndex, payload: &[u8]) -> Result<()>;

    /// Entries of the latest valid time point, ordered by host index
    ///
    /// `None` if the task has no valid checkpoint.
    fn read_last_checkpoint(&self, owner: &str, task: &TaskId) -> Result<Option<Vec<CheckpointEntry>>>;

    /// Mark a time point valid; `false` if nothing was stored for it
    fn mark_valid(&self, owner: &str, task: &TaskId, time: SimTime) -> Result<bool>;

    fn close(&self) -> Result<()>;
}

// ─────────────────────────────────────────────────────────────────
// Memory Store
// ─────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct TimePoint {
    hosts: BTreeMap<HostIndex, Vec<u8>>,
    valid: bool,
}

#[derive(Debug, Default)]
struct MemoryState {
    open: bool,
    tasks: HashMap<(String, TaskId), BTreeMap<SimTime, TimePoint>>,
}

/// Process-local store; contents are lost on exit
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    state: Mutex<MemoryState>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries across all tasks
    pub fn entry_count(&self) -> usize {
        self.state
            .lock()
            .tasks
            .values()
            .flat_map(|times| times.values())
            .map(|point| point.hosts.len())
            .sum()
    }

    fn ensure_open(state: &MemoryState) -> Result<()> {
        if state.open {
            Ok(())
        } else {
            Err(Error::StorageUnavailable("memory store is not open".to_string()))
        }
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn name(&self) -> &str {
        "memory"
    }

    fn capabilities(&self) -> StoreCapabilities {
        StoreCapabilities {
            durable: false,
            ..StoreCapabilities::all()
        }
    }

    fn open(&self, owner: &str) -> Result<()> {
        self.state.lock().open = true;
        debug!(owner = %owner, "Memory checkpoint store opened");
        Ok(())
    }

    fn write(&self, owner: &str, task: &TaskId, time: SimTime, host: HostIndex, payload: &[u8]) -> Result<()> {
        let mut state = self.state.lock();
        Self::ensure_open(&state)?;
        state
            .tasks
            .entry((owner.to_string(), task.clone()))
            .or_default()
            .entry(time)
            .or_default()
            .hosts
            .insert(host, payload.to_vec());
        Ok(())
    }

    fn read_last_checkpoint(&self, owner: &str, task: &TaskId) -> Result<Option<Vec<CheckpointEntry>>> {
        let state = self.state.lock();
        Self::ensure_open(&state)?;

        let Some(times) = state.tasks.get(&(owner.to_string(), task.clone())) else {
            return Ok(None);
        };
        let last = times.iter().rev().find(|(_, point)| point.valid);

        Ok(last.map(|(time, point)| {
            point
                .hosts
                .iter()
                .map(|(host, payload)| CheckpointEntry {
                    task_id: task.clone(),
                    time: *time,
                    host: *host,
                    payload: payload.clone(),
                })
                .collect()
        }))
    }

    fn mark_valid(&self, owner: &str, task: &TaskId, time: SimTime) -> Result<bool> {
        let mut state = self.state.lock();
        Self::ensure_open(&state)?;

        let point = state
            .tasks
            .get_mut(&(owner.to_string(), task.clone()))
            .and_then(|times| times.get_mut(&time));
        match point {
            Some(point) if !point.hosts.is_empty() => {
                point.valid = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn close(&self) -> Result<()> {
        self.state.lock().open = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_capabilities() {
        let caps = StoreCapabilities {
            mark_valid: false,
            ..StoreCapabilities::all()
        };
        assert_eq!(caps.missing(&StoreCapabilities::REQUIRED), vec!["mark_valid"]);
        assert!(!caps.satisfies(&StoreCapabilities::REQUIRED));
        assert!(MemoryCheckpointStore::new()
            .capabilities()
            .satisfies(&StoreCapabilities::REQUIRED));
    }

    #[test]
    fn test_closed_store_rejects_operations() {
        let store = MemoryCheckpointStore::new();
        let task = TaskId::new("t");
        let err = store.write("o", &task, SimTime::new(1.0), 1, b"x").unwrap_err();
        assert!(matches!(err, Error::StorageUnavailable(_)));
    }

    #[test]
    fn test_read_last_returns_latest_valid_time() {
        let store = MemoryCheckpointStore::new();
        store.open("owner").unwrap();
        let task = TaskId::new("t");

        store.write("owner", &task, SimTime::new(1.0), 2, b"b1").unwrap();
        store.write("owner", &task, SimTime::new(1.0), 1, b"a1").unwrap();
        store.write("owner", &task, SimTime::new(2.0), 1, b"a2").unwrap();
        assert_eq!(store.read_last_checkpoint("owner", &task).unwrap(), None);

        assert!(store.mark_valid("owner", &task, SimTime::new(1.0)).unwrap());
        let entries = store.read_last_checkpoint("owner", &task).unwrap().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].host, 1);
        assert_eq!(entries[0].payload, b"a1");
        assert_eq!(entries[1].host, 2);

        // 2.0 is newer but not valid
        assert_eq!(entries[0].time, SimTime::new(1.0));
    }

    #[test]
    fn test_writes_are_idempotent() {
        let store = MemoryCheckpointStore::new();
        store.open("owner").unwrap();
        let task = TaskId::new("t");

        store.write("owner", &task, SimTime::new(1.0), 1, b"same").unwrap();
        store.write("owner", &task, SimTime::new(1.0), 1, b"same").unwrap();
        assert_eq!(store.entry_count(), 1);
    }

    #[test]
    fn test_mark_valid_without_entries_is_false() {
        let store = MemoryCheckpointStore::new();
        store.open("owner").unwrap();
        assert!(!store.mark_valid("owner", &TaskId::new("t"), SimTime::new(3.0)).unwrap());
    }

    #[test]
    fn test_owners_are_isolated() {
        let store = MemoryCheckpointStore::new();
        store.open("a").unwrap();
        let task = TaskId::new("t");
        store.write("a", &task, SimTime::new(1.0), 1, b"x").unwrap();
        store.mark_valid("a", &task, SimTime::new(1.0)).unwrap();

        assert!(store.read_last_checkpoint("b", &task).unwrap().is_none());
    }
}
