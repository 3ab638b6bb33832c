//! Execution job
//!
//! Drives one task configuration through its lifecycle:
//!
//! ```text
//! Created -> Initializing -> AwaitingDecision -> Running   -> Completed
//!                                             \-> Cancelled -/
//! ```
//!
//! Every path ends in `Completed` with exactly one [`RunInformation`]
//! handed to the job listener. Failures are logged and folded into that
//! record; nothing propagates to the worker thread hosting the job.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::types::{RunInformation, TaskConfiguration};

use super::gate::{DecisionGate, GateWake};
use super::panic_message;
use super::traits::{ComputationTask, ExecutionController, JobListener, RemoteControl, TaskFactory};

// ─────────────────────────────────────────────────────────────────
// Job State
// ─────────────────────────────────────────────────────────────────

/// Lifecycle state of an execution job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Created, not yet picked up by a worker
    Created,
    /// Turning the configuration into a task
    Initializing,
    /// Waiting for the controller's start/cancel decision
    AwaitingDecision,
    /// Task is executing
    Running,
    /// Execution skipped by decision or cancellation
    Cancelled,
    /// Terminal; run information has been reported
    Completed,
}

impl Default for JobState {
    fn default() -> Self {
        JobState::Created
    }
}

// ─────────────────────────────────────────────────────────────────
// Job Context
// ─────────────────────────────────────────────────────────────────

/// Collaborators shared by all jobs of one runner
#[derive(Clone)]
pub struct JobContext {
    pub factory: Arc<dyn TaskFactory>,
    pub controller: Arc<dyn ExecutionController>,
    pub listener: Arc<dyn JobListener>,
    pub remote: Option<Arc<dyn RemoteControl>>,
}

impl JobContext {
    pub fn new(
        factory: Arc<dyn TaskFactory>,
        controller: Arc<dyn ExecutionController>,
        listener: Arc<dyn JobListener>,
    ) -> Self {
        Self {
            factory,
            controller,
            listener,
            remote: None,
        }
    }

    pub fn with_remote(mut self, remote: Arc<dyn RemoteControl>) -> Self {
        self.remote = Some(remote);
        self
    }
}

// ─────────────────────────────────────────────────────────────────
// Execution Job
// ─────────────────────────────────────────────────────────────────

#[derive(Default)]
struct JobInner {
    state: JobState,
    task: Option<Arc<dyn ComputationTask>>,
    info: Option<RunInformation>,
}

/// One execution attempt of a task configuration
pub struct ExecutionJob {
    config: TaskConfiguration,
    context: JobContext,
    /// Monotone: never unset once set
    cancelled: AtomicBool,
    started: AtomicBool,
    gate: DecisionGate,
    inner: Mutex<JobInner>,
}

impl ExecutionJob {
    /// Create a job for a configuration
    pub fn new(config: TaskConfiguration, context: JobContext) -> Arc<Self> {
        Arc::new(Self {
            config,
            context,
            cancelled: AtomicBool::new(false),
            started: AtomicBool::new(false),
            gate: DecisionGate::new(),
            inner: Mutex::new(JobInner::default()),
        })
    }

    /// The configuration this job executes
    pub fn config(&self) -> &TaskConfiguration {
        &self.config
    }

    /// Current lifecycle state
    pub fn state(&self) -> JobState {
        self.inner.lock().state
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Snapshot of the run information, once initialization produced one
    pub fn run_information(&self) -> Option<RunInformation> {
        self.inner.lock().info.clone()
    }

    /// The initialized task, if any
    pub fn task(&self) -> Option<Arc<dyn ComputationTask>> {
        self.inner.lock().task.clone()
    }

    /// Cancel the job
    ///
    /// Idempotent. Stops the task remotely (best effort) or locally if it
    /// was initialized, and releases a pending decision wait with
    /// "do not run".
    pub fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            debug!(config = %self.config.name, "Job already cancelled");
            return;
        }
        info!(config = %self.config.name, destination = %self.config.destination, "Cancelling job");

        if let Some(task) = self.task() {
            match self.config.remote_destination() {
                Some(destination) => match &self.context.remote {
                    Some(remote) => {
                        let task_id = task.id();
                        if let Err(e) = remote.stop(destination, &task_id) {
                            warn!(
                                task_id = %task_id,
                                destination = %destination,
                                error = %e,
                                "Remote stop failed"
                            );
                        }
                    }
                    None => warn!(
                        destination = %destination,
                        "No remote control configured, cannot stop remote task"
                    ),
                },
                None => task.stop(),
            }
        }

        self.gate.decide(false);
    }

    /// Deliver the controller's decision
    ///
    /// Safe before or after the job reaches its wait point. Only the first
    /// decision counts.
    pub fn set_run_computation_task(&self, proceed: bool) {
        if !self.gate.decide(proceed) {
            warn!(
                config = %self.config.name,
                proceed,
                "Run decision already recorded, ignoring"
            );
        } else {
            debug!(config = %self.config.name, proceed, "Run decision recorded");
        }
    }

    /// Wake a job waiting for its decision without deciding
    ///
    /// The job continues with whatever decision is recorded by then, which
    /// defaults to not running.
    pub fn interrupt(&self) {
        self.gate.interrupt();
    }

    /// Run the job's lifecycle; invoked by a pool worker
    ///
    /// A job runs at most once; later invocations are ignored.
    pub fn run(self: &Arc<Self>) {
        if self.started.swap(true, Ordering::SeqCst) {
            warn!(config = %self.config.name, "Job already ran, ignoring second run");
            return;
        }

        let result = panic::catch_unwind(AssertUnwindSafe(|| self.execute()));
        if let Err(payload) = result {
            let message = panic_message(payload.as_ref());
            error!(config = %self.config.name, panic = %message, "Job panicked");
            let mut inner = self.inner.lock();
            match inner.info.as_mut() {
                Some(info) if !info.is_terminal() => info.mark_failed(format!("panicked: {}", message)),
                Some(_) => {}
                None => {
                    inner.info = Some(RunInformation::generic_failure(
                        &self.config,
                        format!("panicked: {}", message),
                    ))
                }
            }
        }

        self.report();
    }

    fn execute(self: &Arc<Self>) {
        self.set_state(JobState::Initializing);

        let info = if self.is_cancelled() {
            info!(config = %self.config.name, "Job cancelled before initialization");
            RunInformation::cancelled_before_start(&self.config)
        } else {
            self.initialize()
        };
        let runnable = !info.is_terminal();

        {
            let mut inner = self.inner.lock();
            inner.info = Some(info.clone());
            inner.state = JobState::AwaitingDecision;
        }

        // The controller must hear about every initialization, failed ones included
        self.context.controller.initialization_finished(self, &info);

        if !runnable {
            return;
        }

        if self.await_decision() && !self.is_cancelled() {
            self.run_task();
        } else {
            info!(config = %self.config.name, "Job will not run");
            let mut inner = self.inner.lock();
            inner.state = JobState::Cancelled;
            if let Some(info) = inner.info.as_mut() {
                info.mark_cancelled("execution not started");
            }
        }
    }

    fn initialize(&self) -> RunInformation {
        let start = Instant::now();
        match self.context.factory.create(&self.config) {
            Ok(task) => {
                let task_id = task.id();
                let setup_ms = start.elapsed().as_millis() as u64;
                let mut info = RunInformation::initialized(&self.config, task_id.clone(), setup_ms);

                self.inner.lock().task = Some(task);
                if self.is_cancelled() {
                    info.mark_cancelled("cancelled during initialization");
                }

                info!(
                    config = %self.config.name,
                    task_id = %task_id,
                    setup_ms,
                    "Task initialized"
                );
                info
            }
            Err(e) => {
                error!(config = %self.config.name, error = %e, "Task initialization failed");
                RunInformation::setup_failed(&self.config, e.to_string())
            }
        }
    }

    fn await_decision(&self) -> bool {
        match self.gate.wait() {
            GateWake::Decided(proceed) => proceed,
            GateWake::Interrupted => {
                let proceed = self.gate.decision().unwrap_or(false);
                warn!(
                    config = %self.config.name,
                    proceed,
                    "Decision wait interrupted, continuing with current decision"
                );
                proceed
            }
        }
    }

    fn run_task(&self) {
        let task = {
            let mut inner = self.inner.lock();
            inner.state = JobState::Running;
            if let Some(info) = inner.info.as_mut() {
                info.mark_started();
            }
            inner.task.clone()
        };
        let Some(task) = task else {
            let mut inner = self.inner.lock();
            if let Some(info) = inner.info.as_mut() {
                info.mark_failed("no task handle to run");
            }
            return;
        };

        info!(config = %self.config.name, task_id = %task.id(), "Task started");
        let result = task.run();

        let mut inner = self.inner.lock();
        let Some(info) = inner.info.as_mut() else {
            return;
        };
        match result {
            _ if self.is_cancelled() => info.mark_cancelled("cancelled during execution"),
            Ok(()) => info.mark_succeeded(),
            Err(e) => {
                error!(config = %self.config.name, task_id = %task.id(), error = %e, "Task failed");
                info.mark_failed(e.to_string());
            }
        }
    }

    fn set_state(&self, state: JobState) {
        self.inner.lock().state = state;
    }

    /// Hand the terminal run information to the listener
    fn report(&self) {
        let info = {
            let mut inner = self.inner.lock();
            inner.state = JobState::Completed;
            let info = match inner.info.take() {
                Some(info) if info.is_terminal() => info,
                Some(mut info) => {
                    info.mark_failed("job ended without a terminal outcome");
                    info
                }
                None => RunInformation::generic_failure(&self.config, "job produced no run information"),
            };
            inner.info = Some(info.clone());
            info
        };

        info!(
            config = %self.config.name,
            outcome = %info.outcome,
            run_ms = info.run_time_ms(),
            "Job finished"
        );

        let listener = self.context.listener.clone();
        let config = &self.config;
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| listener.job_finished(config, info))) {
            error!(
                config = %self.config.name,
                panic = %panic_message(payload.as_ref()),
                "Job listener panicked"
            );
        }
    }
}

impl std::fmt::Debug for ExecutionJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionJob")
            .field("config", &self.config.name)
            .field("state", &self.state())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────
