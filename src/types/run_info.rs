//! Run information records
//!
//! Created when a job finishes initializing its task, finalized when the job
//! completes, then handed to the runner exactly once.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Destination, TaskConfiguration, TaskId};

/// How a run ended (or that it has not ended yet)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Initialized, not yet finished
    Pending,
    /// Task ran to completion
    Succeeded,
    /// Setup or execution failed
    Failed,
    /// Cancelled before or during execution
    Cancelled,
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Pending => write!(f, "pending"),
            RunOutcome::Succeeded => write!(f, "succeeded"),
            RunOutcome::Failed => write!(f, "failed"),
            RunOutcome::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Result record of one execution attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunInformation {
    /// Id of the initialized task (absent if setup never produced one)
    pub task_id: Option<TaskId>,

    /// Name of the configuration this run belongs to
    pub configuration: String,

    /// Where the run executed
    pub destination: Destination,

    /// Current outcome
    pub outcome: RunOutcome,

    /// Failure or cancellation reason
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// When the record was created
    pub created_at: DateTime<Utc>,

    /// When execution started
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    /// When the run reached a terminal outcome
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,

    /// Time spent turning the configuration into a task
    pub setup_time_ms: u64,
}

impl RunInformation {
    fn base(config: &TaskConfiguration, task_id: Option<TaskId>) -> Self {
        Self {
            task_id,
            configuration: config.name.clone(),
            destination: config.destination.clone(),
            outcome: RunOutcome::Pending,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            setup_time_ms: 0,
        }
    }

    /// Record for a successfully initialized task
    pub fn initialized(config: &TaskConfiguration, task_id: TaskId, setup_time_ms: u64) -> Self {
        Self {
            setup_time_ms,
            ..Self::base(config, Some(task_id))
        }
    }

    /// Record for a task whose setup failed
    pub fn setup_failed(config: &TaskConfiguration, error: impl Into<String>) -> Self {
        let mut info = Self::base(config, None);
        info.finish(RunOutcome::Failed, Some(error.into()));
        info
    }

    /// Record for a job cancelled before it produced a task
    pub fn cancelled_before_start(config: &TaskConfiguration) -> Self {
        let mut info = Self::base(config, None);
        info.finish(RunOutcome::Cancelled, Some("cancelled before initialization".into()));
        info
    }

    /// Generic failure used when a job ends without any record
    pub fn generic_failure(config: &TaskConfiguration, reason: impl Into<String>) -> Self {
        let mut info = Self::base(config, None);
        info.finish(RunOutcome::Failed, Some(reason.into()));
        info
    }

    /// Whether the run succeeded
    pub fn success(&self) -> bool {
        self.outcome == RunOutcome::Succeeded
    }

    /// Whether the outcome is final
    pub fn is_terminal(&self) -> bool {
        self.outcome != RunOutcome::Pending
    }

    pub fn mark_started(&mut self) {
        self.started_at = Some(Utc::now());
    }

    pub fn mark_succeeded(&mut self) {
        self.finish(RunOutcome::Succeeded, None);
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.finish(RunOutcome::Failed, Some(error.into()));
    }

    pub fn mark_cancelled(&mut self, reason: impl Into<String>) {
        self.finish(RunOutcome::Cancelled, Some(reason.into()));
    }

    fn finish(&mut self, outcome: RunOutcome, error: Option<String>) {
        self.outcome = outcome;
        self.error = error;
        self.finished_at = Some(Utc::now());
    }

    /// Execution time in milliseconds (0 if never started)
    pub fn run_time_ms(&self) -> u64 {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => (end - start).num_milliseconds().max(0) as u64,
            _ => 0,
        }
    }
}
