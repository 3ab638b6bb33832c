//! Runner side of execution
//!
//! Loads batches, creates and submits jobs, and collects their reports.
//! Also carries the built-in demo workload used by the `run` command.

mod batch;
mod batch_runner;
mod demo;

pub use batch::*;
pub use batch_runner::*;
pub use demo::*;

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::info;

use crate::checkpoint::{self, CheckpointCoordinator};
use crate::config::SimexecConfig;
use crate::error::Result;
use crate::executor::WorkerPoolManager;

/// A runner wired to the demo workload
pub struct DemoSetup {
    pub runner: BatchRunner,
    pub reports: mpsc::UnboundedReceiver<JobReport>,
    pub controller: Arc<AutoStartController>,
    pub registry: Arc<TaskRegistry>,
}

/// Assemble pools, checkpointing and the demo collaborators from config
pub fn demo_runner(config: &SimexecConfig) -> Result<DemoSetup> {
    let manager = Arc::new(WorkerPoolManager::new(&config.execution)?);
    let registry = Arc::new(TaskRegistry::new());

    let checkpoints = checkpoint::store_from_config(config).map(|store| {
        let coordinator = Arc::new(CheckpointCoordinator::from_settings(
            &config.checkpoint,
            registry.clone(),
        ));
        coordinator.set_data_storage(store);
        coordinator
    });
    if checkpoints.is_none() {
        info!("Checkpointing disabled");
    }

    let controller = Arc::new(AutoStartController::new());
    let (runner, reports) = BatchRunner::new(RunnerParts {
        manager,
        factory: Arc::new(DemoTaskFactory::new(registry.clone(), checkpoints.clone())),
        controller: controller.clone(),
        remote: Some(Arc::new(LoopbackRemote::new(registry.clone()))),
        registry: Some(registry.clone()),
        checkpoints,
    });

    Ok(DemoSetup {
        runner,
        reports,
        controller,
        registry,
    })
}
