//! Built-in demo workload
//!
//! Lets the binary exercise the whole pipeline without a real simulation
//! backend: a stepping task that checkpoints on behalf of every host it
//! emulates, a registry serving as the task clock, a loopback "remote"
//! control and a controller that starts everything it is offered.
//!
//! Recognized parameters of the `demo` model:
//!
//! | key                | default | meaning                                    |
//! |--------------------|---------|--------------------------------------------|
//! | `steps`            | 10      | number of simulation steps                 |
//! | `dt`               | 1.0     | simulated time advanced per step           |
//! | `step_ms`          | 10      | wall-clock delay per step                  |
//! | `hosts`            | 1       | hosts contributing to each checkpoint      |
//! | `checkpoint_every` | 0       | steps between checkpoints (0 = never)      |
//! | `growth`           | 0.5     | logistic growth rate of the state value    |
//! | `fail_at_step`     | unset   | fail deliberately at this step             |

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::checkpoint::{CheckpointCoordinator, SubmitOutcome, TaskClock};
use crate::error::{Error, Result};
use crate::executor::{ComputationTask, ExecutionController, ExecutionJob, RemoteControl, TaskFactory};
use crate::types::{HostIndex, RemoteDestination, RunInformation, SimTime, TaskConfiguration, TaskId};

/// Model name served by [`DemoTaskFactory`]
pub const DEMO_MODEL: &str = "demo";

// ─────────────────────────────────────────────────────────────────
// Demo Task
// ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct DemoParams {
    steps: u64,
    dt: f64,
    step_delay: Duration,
    hosts: u32,
    checkpoint_every: u64,
    growth: f64,
    fail_at_step: Option<u64>,
}

impl DemoParams {
    fn from_config(config: &TaskConfiguration) -> Result<Self> {
        let params = Self {
            steps: param(config, "steps", 10)?,
            dt: param(config, "dt", 1.0)?,
            step_delay: Duration::from_millis(param(config, "step_ms", 10)?),
            hosts: param(config, "hosts", 1)?,
            checkpoint_every: param(config, "checkpoint_every", 0)?,
            growth: param(config, "growth", 0.5)?,
            fail_at_step: config
                .parameters
                .get("fail_at_step")
                .map(|_| param(config, "fail_at_step", 0))
                .transpose()?,
        };

        if params.hosts == 0 {
            return Err(Error::task_setup(&config.name, "hosts must be at least 1"));
        }
        if !(params.dt.is_finite() && params.dt > 0.0) {
            return Err(Error::task_setup(&config.name, "dt must be a positive number"));
        }
        Ok(params)
    }
}

/// Parameter `key`, or `default` when absent; present but unparsable is an error
fn param<T: FromStr>(config: &TaskConfiguration, key: &str, default: T) -> Result<T> {
    match config.parameters.get(key) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| Error::task_setup(&config.name, format!("invalid value '{}' for parameter '{}'", raw, key))),
    }
}

/// State persisted in every checkpoint payload
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DemoState {
    pub step: u64,
    pub time: f64,
    pub value: f64,
    pub host: HostIndex,
}

/// Stepping task with logistic-growth state
pub struct DemoTask {
    id: TaskId,
    params: DemoParams,
    /// Bits of the current `SimTime`
    time: AtomicU64,
    start_step: u64,
    start_value: f64,
    stopped: AtomicBool,
    checkpoints: Option<Arc<CheckpointCoordinator>>,
}

impl DemoTask {
    fn new(
        id: TaskId,
        params: DemoParams,
        resume: Option<DemoState>,
        checkpoints: Option<Arc<CheckpointCoordinator>>,
    ) -> Self {
        let (start_step, time, start_value) = match resume {
            Some(state) => (state.step, state.time, state.value),
            None => (0, 0.0, 1.0),
        };
        Self {
            id,
            params,
            time: AtomicU64::new(SimTime::new(time).value().to_bits()),
            start_step,
            start_value,
            stopped: AtomicBool::new(false),
            checkpoints,
        }
    }

    /// Step the task resumes after (0 for a fresh start)
    pub fn start_step(&self) -> u64 {
        self.start_step
    }

    fn checkpoint(&self, step: u64, value: f64) {
        let Some(coordinator) = &self.checkpoints else {
            return;
        };
        let time = self.simulated_time().value();

        for host in 1..=self.params.hosts {
            let state = DemoState { step, time, value, host };
            let payload = match serde_json::to_vec(&state) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(task_id = %self.id, error = %e, "Failed to encode checkpoint");
                    return;
                }
            };
            let outcome = coordinator.submit_checkpoint(&self.id, host, self.params.hosts as usize, &payload);
            if outcome == SubmitOutcome::StorageUnavailable {
                // No store, no point asking for the other hosts
                return;
            }
        }
    }
}

impl ComputationTask for DemoTask {
    fn id(&self) -> TaskId {
        self.id.clone()
    }

    fn run(&self) -> Result<()> {
        let mut value = self.start_value;
        for step in (self.start_step + 1)..=self.params.steps {
            if self.stopped.load(Ordering::SeqCst) {
                return Err(Error::Cancelled {
                    task_id: self.id.to_string(),
                });
            }
            if !self.params.step_delay.is_zero() {
                std::thread::sleep(self.params.step_delay);
            }

            value += self.params.growth * value * (1.0 - value / 100.0) * self.params.dt;
            let time = self.simulated_time().value() + self.params.dt;
            self.time.store(SimTime::new(time).value().to_bits(), Ordering::SeqCst);

            if self.params.fail_at_step == Some(step) {
                return Err(Error::ExecutionFailed {
                    task_id: Some(self.id.to_string()),
                    message: format!("deliberate failure at step {}", step),
                });
            }
            if self.params.checkpoint_every > 0 && step % self.params.checkpoint_every == 0 {
                self.checkpoint(step, value);
            }
        }

        debug!(task_id = %self.id, value, time = %self.simulated_time(), "Demo task finished");
        Ok(())
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    fn simulated_time(&self) -> SimTime {
        SimTime::new(f64::from_bits(self.time.load(Ordering::SeqCst)))
    }
}

// ─────────────────────────────────────────────────────────────────
// Task Registry
// ─────────────────────────────────────────────────────────────────

/// Live tasks by id; answers simulated-time lookups for checkpointing
#[derive(Default)]
pub struct TaskRegistry {
    tasks: RwLock<HashMap<TaskId, Arc<dyn ComputationTask>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a live task; `false` if one with the same id is already live
    pub fn try_register(&self, task: Arc<dyn ComputationTask>) -> bool {
        match self.tasks.write().entry(task.id()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(task);
                true
            }
        }
    }

    pub fn unregister(&self, id: &TaskId) -> Option<Arc<dyn ComputationTask>> {
        self.tasks.write().remove(id)
    }

    pub fn get(&self, id: &TaskId) -> Option<Arc<dyn ComputationTask>> {
        self.tasks.read().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.tasks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.read().is_empty()
    }
}

impl TaskClock for TaskRegistry {
    fn simulated_time(&self, task: &TaskId) -> Option<SimTime> {
        self.get(task).map(|t| t.simulated_time())
    }
}

// ─────────────────────────────────────────────────────────────────
// Task Factory
// ─────────────────────────────────────────────────────────────────

/// Builds [`DemoTask`]s, resuming from the last valid checkpoint
pub struct DemoTaskFactory {
    registry: Arc<TaskRegistry>,
    checkpoints: Option<Arc<CheckpointCoordinator>>,
}

impl DemoTaskFactory {
    pub fn new(registry: Arc<TaskRegistry>, checkpoints: Option<Arc<CheckpointCoordinator>>) -> Self {
        Self { registry, checkpoints }
    }

    fn resume_state(&self, id: &TaskId) -> Option<DemoState> {
        let entries = self.checkpoints.as_ref()?.get_checkpoints(id)?;
        let first = entries.first()?;
        match serde_json::from_slice::<DemoState>(&first.payload) {
            Ok(state) => Some(state),
            Err(e) => {
                warn!(task_id = %id, error = %e, "Ignoring unreadable checkpoint payload");
                None
            }
        }
    }
}

impl TaskFactory for DemoTaskFactory {
    fn create(&self, config: &TaskConfiguration) -> Result<Arc<dyn ComputationTask>> {
        if config.model != DEMO_MODEL {
            return Err(Error::task_setup(
                &config.name,
                format!("unknown model '{}'", config.model),
            ));
        }
        let params = DemoParams::from_config(config)?;

        // Deterministic id so a rerun finds the previous run's checkpoints
        let id = TaskId::new(config.name.clone());
        let resume = self.resume_state(&id).filter(|state| state.step < params.steps);
        if let Some(state) = &resume {
            info!(task_id = %id, step = state.step, time = state.time, "Resuming from checkpoint");
        }

        let task: Arc<dyn ComputationTask> =
            Arc::new(DemoTask::new(id.clone(), params, resume, self.checkpoints.clone()));
        if !self.registry.try_register(task.clone()) {
            return Err(Error::task_setup(&config.name, format!("task '{}' is already running", id)));
        }
        Ok(task)
    }
}

// ─────────────────────────────────────────────────────────────────
// Loopback Remote Control
// ─────────────────────────────────────────────────────────────────

/// Remote control for destinations emulated in this process
pub struct LoopbackRemote {
    registry: Arc<TaskRegistry>,
}

impl LoopbackRemote {
    pub fn new(registry: Arc<TaskRegistry>) -> Self {
        Self { registry }
    }
}

impl RemoteControl for LoopbackRemote {
    fn stop(&self, destination: &RemoteDestination, task_id: &TaskId) -> Result<()> {
        let task = self
            .registry
            .get(task_id)
            .ok_or_else(|| Error::remote_control(destination, format!("no task '{}' on server", task_id)))?;
        debug!(destination = %destination, task_id = %task_id, "Stopping task on loopback server");
        task.stop();
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────
// Execution Controller
// ─────────────────────────────────────────────────────────────────

/// Starts every successfully initialized job until told to stop
#[derive(Debug, Default)]
pub struct AutoStartController {
    rejecting: AtomicBool,
}

impl AutoStartController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decline all later decisions
    pub fn reject_all(&self) {
        self.rejecting.store(true, Ordering::SeqCst);
    }
}

impl ExecutionController for AutoStartController {
    fn initialization_finished(&self, job: &Arc<ExecutionJob>, info: &RunInformation) {
        if info.is_terminal() {
            debug!(
                config = %job.config().name,
                outcome = %info.outcome,
                "Initialization ended without a runnable task"
            );
            return;
        }
        job.set_run_computation_task(!self.rejecting.load(Ordering::SeqCst));
    }
}
