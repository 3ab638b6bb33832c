//! Batch runner
//!
//! Creates one execution job per configuration, submits it to the pool
//! manager and forwards terminal reports over a channel. The listener
//! releases the job's destination before forwarding, so every report the
//! caller sees already has its cleanup done.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::checkpoint::CheckpointCoordinator;
use crate::executor::{
    ExecutionController, ExecutionJob, JobContext, JobListener, JobState, RemoteControl, TaskFactory,
    WorkerPoolManager,
};
use crate::types::{RunInformation, TaskConfiguration};

use super::batch::JobReport;
use super::demo::TaskRegistry;

/// Collaborators a runner is assembled from
pub struct RunnerParts {
    pub manager: Arc<WorkerPoolManager>,
    pub factory: Arc<dyn TaskFactory>,
    pub controller: Arc<dyn ExecutionController>,
    pub remote: Option<Arc<dyn RemoteControl>>,
    /// Live tasks to unregister when their job finishes
    pub registry: Option<Arc<TaskRegistry>>,
    pub checkpoints: Option<Arc<CheckpointCoordinator>>,
}

// ─────────────────────────────────────────────────────────────────
// Completion Listener
// ─────────────────────────────────────────────────────────────────

/// Cleans up after each job and forwards its report
struct RunnerListener {
    manager: Arc<WorkerPoolManager>,
    registry: Option<Arc<TaskRegistry>>,
    checkpoints: Option<Arc<CheckpointCoordinator>>,
    reports: mpsc::UnboundedSender<JobReport>,
}

impl JobListener for RunnerListener {
    fn job_finished(&self, config: &TaskConfiguration, info: RunInformation) {
        self.manager.clean_up(config);

        if let Some(task_id) = &info.task_id {
            if let Some(registry) = &self.registry {
                registry.unregister(task_id);
            }
            if let Some(checkpoints) = &self.checkpoints {
                checkpoints.forget_task(task_id);
            }
        }

        let report = JobReport {
            config: config.clone(),
            info,
        };
        if self.reports.send(report).is_err() {
            debug!(config = %config.name, "Report receiver gone, dropping report");
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Batch Runner
// ─────────────────────────────────────────────────────────────────

/// Submits jobs and hands their terminal reports to the caller
pub struct BatchRunner {
    manager: Arc<WorkerPoolManager>,
    context: JobContext,
    /// Jobs that may not have completed yet; completed ones are pruned lazily
    jobs: Mutex<Vec<Arc<ExecutionJob>>>,
    reports: mpsc::UnboundedSender<JobReport>,
    checkpoints: Option<Arc<CheckpointCoordinator>>,
}

impl BatchRunner {
    /// Create a runner and the receiver of its job reports
    ///
    /// Exactly one report arrives per submitted configuration, in
    /// completion order.
    pub fn new(parts: RunnerParts) -> (Self, mpsc::UnboundedReceiver<JobReport>) {
        let (tx, rx) = mpsc::unbounded_channel();

        let listener = Arc::new(RunnerListener {
            manager: parts.manager.clone(),
            registry: parts.registry,
            checkpoints: parts.checkpoints.clone(),
            reports: tx.clone(),
        });
        let mut context = JobContext::new(parts.factory, parts.controller, listener);
        if let Some(remote) = parts.remote {
            context = context.with_remote(remote);
        }

        (
            Self {
                manager: parts.manager,
                context,
                jobs: Mutex::new(Vec::new()),
                reports: tx,
                checkpoints: parts.checkpoints,
            },
            rx,
        )
    }

    /// Create and schedule a job for `config`
    ///
    /// A configuration that cannot be scheduled is reported as failed right
    /// away, keeping the one-report-per-submission contract.
    pub fn submit(&self, config: TaskConfiguration) -> bool {
        let job = ExecutionJob::new(config.clone(), self.context.clone());
        {
            let mut jobs = self.jobs.lock();
            jobs.retain(|j| j.state() != JobState::Completed);
            jobs.push(job.clone());
        }

        if self.manager.submit(&config, job) {
            return true;
        }

        warn!(config = %config.name, "Job not scheduled");
        let info = RunInformation::generic_failure(&config, "job could not be scheduled");
        if self.reports.send(JobReport { config, info }).is_err() {
            debug!("Report receiver gone, dropping report");
        }
        false
    }

    /// Submit every configuration; returns how many were scheduled
    pub fn submit_all(&self, configs: impl IntoIterator<Item = TaskConfiguration>) -> usize {
        let scheduled = configs.into_iter().filter(|c| self.submit(c.clone())).count();
        info!(scheduled, "Batch submitted");
        scheduled
    }

    /// Cancel every job not yet completed
    ///
    /// Returns how many jobs were newly cancelled.
    pub fn cancel_all(&self) -> usize {
        let jobs: Vec<_> = {
            let mut jobs = self.jobs.lock();
            jobs.retain(|j| j.state() != JobState::Completed);
            jobs.clone()
        };
        let mut cancelled = 0;
        for job in jobs {
            if job.state() != JobState::Completed && !job.is_cancelled() {
                job.cancel();
                cancelled += 1;
            }
        }
        info!(cancelled, "Cancellation requested for outstanding jobs");
        cancelled
    }

    /// Jobs not yet completed
    pub fn job_count(&self) -> usize {
        self.jobs
            .lock()
            .iter()
            .filter(|j| j.state() != JobState::Completed)
            .count()
    }

    pub fn manager(&self) -> &Arc<WorkerPoolManager> {
        &self.manager
    }

    pub fn checkpoints(&self) -> Option<&Arc<CheckpointCoordinator>> {
        self.checkpoints.as_ref()
    }

    /// Stop the pools and close checkpoint storage
    pub fn shut_down(&self) {
        self.manager.shut_down();
        if let Some(checkpoints) = &self.checkpoints {
            checkpoints.shut_down();
        }
    }
}

impl std::fmt::Debug for BatchRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchRunner")
            .field("manager", &self.manager)
            .field("jobs", &self.job_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExecutionSettings;
    use crate::runner::demo::{AutoStartController, DemoTaskFactory, DEMO_MODEL};
    use crate::types::{Destination, RunOutcome};

    fn parts(registry: Arc<TaskRegistry>) -> RunnerParts {
        let settings = ExecutionSettings {
            local_workers: 2,
            remote_workers_per_destination: 1,
            thread_name_prefix: "runner-test".to_string(),
        };
        RunnerParts {
            manager: Arc::new(WorkerPoolManager::new(&settings).unwrap()),
            factory: Arc::new(DemoTaskFactory::new(registry.clone(), None)),
            controller: Arc::new(AutoStartController::new()),
            remote: None,
            registry: Some(registry),
            checkpoints: None,
        }
    }

    fn demo(name: &str) -> TaskConfiguration {
        TaskConfiguration::new(name, DEMO_MODEL)
            .with_parameter("steps", 3)
            .with_parameter("step_ms", 0)
    }

    #[tokio::test]
    async fn test_reports_arrive_after_cleanup() {
        let registry = Arc::new(TaskRegistry::new());
        let (runner, mut rx) = BatchRunner::new(parts(registry.clone()));

        let remote = demo("remote-B").with_destination(Destination::remote("server-x"));
        assert_eq!(runner.submit_all(vec![demo("local-A"), remote]), 2);

        let mut outcomes = Vec::new();
        for _ in 0..2 {
            outcomes.push(rx.recv().await.unwrap().info.outcome);
        }
        assert!(outcomes.iter().all(|o| *o == RunOutcome::Succeeded));
        assert_eq!(runner.manager().destination_count(), 0);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_unschedulable_job_is_reported() {
        let (runner, mut rx) = BatchRunner::new(parts(Arc::new(TaskRegistry::new())));
        runner.shut_down();

        assert!(!runner.submit(demo("late")));
        let report = rx.recv().await.unwrap();
        assert_eq!(report.info.outcome, RunOutcome::Failed);
    }

    #[tokio::test]
    async fn test_cancel_all_skips_completed_jobs() {
        let (runner, mut rx) = BatchRunner::new(parts(Arc::new(TaskRegistry::new())));

        assert_eq!(runner.submit_all((0..5).map(|i| demo(&format!("done-{}", i)))), 5);
        for _ in 0..5 {
            rx.recv().await.unwrap();
        }

        assert_eq!(runner.job_count(), 0);
        assert_eq!(runner.cancel_all(), 0);
        assert!(runner.jobs.lock().is_empty());
    }

    #[tokio::test]
    async fn test_finished_jobs_are_not_retained() {
        let (runner, mut rx) = BatchRunner::new(parts(Arc::new(TaskRegistry::new())));

        for round in 0..20 {
            assert!(runner.submit(demo(&format!("cycle-{}", round))));
            rx.recv().await.unwrap();
        }
        assert!(runner.submit(demo("last")));

        assert_eq!(runner.jobs.lock().len(), 1);
        rx.recv().await.unwrap();
    }
}
