//! Collaborator traits for execution jobs
//!
//! Everything a job talks to is injected through these traits so tests can
//! substitute fakes: the task factory, the execution controller deciding
//! whether an initialized task may start, the runner's completion listener,
//! and the remote control channel used to stop tasks on remote servers.

use std::sync::Arc;

use crate::error::Result;
use crate::types::{RemoteDestination, RunInformation, SimTime, TaskConfiguration, TaskId};

use super::ExecutionJob;

/// A runnable computation task produced from a configuration
pub trait ComputationTask: Send + Sync {
    /// External id of the task
    fn id(&self) -> TaskId;

    /// Run the task to completion, blocking the calling worker
    fn run(&self) -> Result<()>;

    /// Ask the task's processor to halt
    ///
    /// Cooperative: how quickly `run` returns afterwards is up to the task.
    fn stop(&self);

    /// Current simulated time of the task
    fn simulated_time(&self) -> SimTime;
}

/// Builds runnable tasks from configurations
pub trait TaskFactory: Send + Sync {
    fn create(&self, config: &TaskConfiguration) -> Result<Arc<dyn ComputationTask>>;
}

/// External decision point for freshly initialized jobs
///
/// Receives every job once its initialization finished (successfully or
/// not) and answers through [`ExecutionJob::set_run_computation_task`],
/// either from inside this call or later from any thread.
pub trait ExecutionController: Send + Sync {
    fn initialization_finished(&self, job: &Arc<ExecutionJob>, info: &RunInformation);
}

/// Receives the terminal run information of each job, exactly once
pub trait JobListener: Send + Sync {
    fn job_finished(&self, config: &TaskConfiguration, info: RunInformation);
}

/// Control channel to remote execution servers
pub trait RemoteControl: Send + Sync {
    /// Stop a task running on a remote server
    fn stop(&self, destination: &RemoteDestination, task_id: &TaskId) -> Result<()>;
}
