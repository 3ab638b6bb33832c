//! Checkpointing for distributed computation tasks
//!
//! - [`CheckpointStore`]: the persistent backing service contract
//! - [`MemoryCheckpointStore`] and [`FileCheckpointStore`]: built-in stores
//! - [`QuorumTable`]: transient per-(task, time) host bookkeeping
//! - [`CheckpointCoordinator`]: submission, quorum detection and validation

mod coordinator;
mod file_store;
mod quorum;
mod store;

pub use coordinator::*;
pub use file_store::*;
pub use quorum::*;
pub use store::*;

use std::sync::Arc;

use crate::config::{CheckpointBackend, SimexecConfig};

/// Build the store selected by the configuration
///
/// `None` when checkpointing is disabled.
pub fn store_from_config(config: &SimexecConfig) -> Option<Arc<dyn CheckpointStore>> {
    if !config.checkpoint.enabled {
        return None;
    }
    let store: Arc<dyn CheckpointStore> = match config.checkpoint.backend {
        CheckpointBackend::Memory => Arc::new(MemoryCheckpointStore::new()),
        CheckpointBackend::File => Arc::new(FileCheckpointStore::new(config.checkpoint_dir())),
    };
    Some(store)
}
