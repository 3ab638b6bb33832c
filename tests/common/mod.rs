//! Common test utilities and fixtures
//!
//! Fakes for every collaborator trait plus fixture paths.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use simexec::checkpoint::{CheckpointEntry, CheckpointStore, MemoryCheckpointStore, StoreCapabilities, TaskClock};
use simexec::config::ExecutionSettings;
use simexec::error::{Error, Result};
use simexec::executor::{
    ComputationTask, ExecutionController, ExecutionJob, JobContext, JobListener, RemoteControl, TaskFactory,
    WorkerPoolManager,
};
use simexec::types::{HostIndex, RemoteDestination, RunInformation, SimTime, TaskConfiguration, TaskId};

// ─────────────────────────────────────────────────────────────────
// Fixtures
// ─────────────────────────────────────────────────────────────────

pub fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests").join("fixtures")
}

pub fn fixture_path(name: &str) -> PathBuf {
    fixtures_dir().join(name)
}

pub fn settings(local: usize, remote: usize) -> ExecutionSettings {
    ExecutionSettings {
        local_workers: local,
        remote_workers_per_destination: remote,
        thread_name_prefix: "it".to_string(),
    }
}

// ─────────────────────────────────────────────────────────────────
// Tasks
// ─────────────────────────────────────────────────────────────────

/// How a fake task behaves when run
#[derive(Debug, Clone)]
pub enum Behavior {
    Succeed,
    Fail(String),
    /// Block until `stop` is called
    BlockUntilStopped,
}

pub struct FakeTask {
    id: TaskId,
    behavior: Behavior,
    stopped: Mutex<bool>,
    stop_signal: Condvar,
}

impl FakeTask {
    pub fn new(id: impl Into<String>, behavior: Behavior) -> Self {
        Self {
            id: TaskId::new(id),
            behavior,
            stopped: Mutex::new(false),
            stop_signal: Condvar::new(),
        }
    }

    pub fn was_stopped(&self) -> bool {
        *self.stopped.lock()
    }
}

impl ComputationTask for FakeTask {
    fn id(&self) -> TaskId {
        self.id.clone()
    }

    fn run(&self) -> Result<()> {
        match &self.behavior {
            Behavior::Succeed => Ok(()),
            Behavior::Fail(message) => Err(Error::execution_failed(message.clone())),
            Behavior::BlockUntilStopped => {
                let mut stopped = self.stopped.lock();
                while !*stopped {
                    self.stop_signal.wait(&mut stopped);
                }
                Err(Error::Cancelled {
                    task_id: self.id.to_string(),
                })
            }
        }
    }

    fn stop(&self) {
        *self.stopped.lock() = true;
        self.stop_signal.notify_all();
    }

    fn simulated_time(&self) -> SimTime {
        SimTime::ZERO
    }
}

/// Factory producing [`FakeTask`]s, remembering every task it built
pub struct FakeFactory {
    behavior: Behavior,
    fail_setup: bool,
    created: AtomicUsize,
    tasks: Mutex<Vec<Arc<FakeTask>>>,
}

impl FakeFactory {
    pub fn new(behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            fail_setup: false,
            created: AtomicUsize::new(0),
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn failing_setup() -> Arc<Self> {
        Arc::new(Self {
            behavior: Behavior::Succeed,
            fail_setup: true,
            created: AtomicUsize::new(0),
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn tasks(&self) -> Vec<Arc<FakeTask>> {
        self.tasks.lock().clone()
    }
}

impl TaskFactory for FakeFactory {
    fn create(&self, config: &TaskConfiguration) -> Result<Arc<dyn ComputationTask>> {
        let n = self.created.fetch_add(1, Ordering::SeqCst);
        if self.fail_setup {
            return Err(Error::task_setup(&config.name, "model could not be loaded"));
        }
        let task = Arc::new(FakeTask::new(format!("{}#{}", config.name, n), self.behavior.clone()));
        self.tasks.lock().push(task.clone());
        Ok(task)
    }
}

// ─────────────────────────────────────────────────────────────────
// Controller
// ─────────────────────────────────────────────────────────────────

/// Controller that decides immediately, or holds jobs for the test to decide
pub struct ScriptedController {
    decision: Option<bool>,
    notified: AtomicUsize,
    held: Mutex<Vec<Arc<ExecutionJob>>>,
}

impl ScriptedController {
    pub fn deciding(proceed: bool) -> Arc<Self> {
        Arc::new(Self {
            decision: Some(proceed),
            notified: AtomicUsize::new(0),
            held: Mutex::new(Vec::new()),
        })
    }

    pub fn deferred() -> Arc<Self> {
        Arc::new(Self {
            decision: None,
            notified: AtomicUsize::new(0),
            held: Mutex::new(Vec::new()),
        })
    }

    pub fn notified(&self) -> usize {
        self.notified.load(Ordering::SeqCst)
    }

    pub fn held(&self) -> Vec<Arc<ExecutionJob>> {
        self.held.lock().clone()
    }

    /// Wait until `n` jobs have been held
    pub fn wait_for_held(&self, n: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.held.lock().len() >= n {
                return true;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        false
    }
}

impl ExecutionController for ScriptedController {
    fn initialization_finished(&self, job: &Arc<ExecutionJob>, _info: &RunInformation) {
        self.notified.fetch_add(1, Ordering::SeqCst);
        match self.decision {
            Some(proceed) => job.set_run_computation_task(proceed),
            None => self.held.lock().push(job.clone()),
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Listener
// ─────────────────────────────────────────────────────────────────

/// Collects reports and optionally releases the job's destination
pub struct CollectingListener {
    manager: Option<Arc<WorkerPoolManager>>,
    reports: Mutex<Vec<(TaskConfiguration, RunInformation)>>,
    arrived: Condvar,
}

impl CollectingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            manager: None,
            reports: Mutex::new(Vec::new()),
            arrived: Condvar::new(),
        })
    }

    pub fn cleaning_up(manager: Arc<WorkerPoolManager>) -> Arc<Self> {
        Arc::new(Self {
            manager: Some(manager),
            reports: Mutex::new(Vec::new()),
            arrived: Condvar::new(),
        })
    }

    pub fn reports(&self) -> Vec<(TaskConfiguration, RunInformation)> {
        self.reports.lock().clone()
    }

    /// Wait until at least `n` reports arrived
    pub fn wait_for(&self, n: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut reports = self.reports.lock();
        while reports.len() < n {
            if self.arrived.wait_until(&mut reports, deadline).timed_out() {
                return reports.len() >= n;
            }
        }
        true
    }
}

impl JobListener for CollectingListener {
    fn job_finished(&self, config: &TaskConfiguration, info: RunInformation) {
        if let Some(manager) = &self.manager {
            manager.clean_up(config);
        }
        self.reports.lock().push((config.clone(), info));
        self.arrived.notify_all();
    }
}

// ─────────────────────────────────────────────────────────────────
// Remote Control
// ─────────────────────────────────────────────────────────────────

/// Records remote stop requests; optionally fails them
#[derive(Default)]
pub struct RecordingRemote {
    fail: AtomicBool,
    stops: Mutex<Vec<(RemoteDestination, TaskId)>>,
}

impl RecordingRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        let remote = Self::default();
        remote.fail.store(true, Ordering::SeqCst);
        Arc::new(remote)
    }

    pub fn stops(&self) -> Vec<(RemoteDestination, TaskId)> {
        self.stops.lock().clone()
    }
}

impl RemoteControl for RecordingRemote {
    fn stop(&self, destination: &RemoteDestination, task_id: &TaskId) -> Result<()> {
        self.stops.lock().push((destination.clone(), task_id.clone()));
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::remote_control(destination, "connection refused"));
        }
        Ok(())
    }
}

pub fn context(
    factory: Arc<dyn TaskFactory>,
    controller: Arc<dyn ExecutionController>,
    listener: Arc<dyn JobListener>,
) -> JobContext {
    JobContext::new(factory, controller, listener)
}

// ─────────────────────────────────────────────────────────────────
// Checkpointing
// ─────────────────────────────────────────────────────────────────

/// Clock with simulated times set by the test
#[derive(Default)]
pub struct ManualClock {
    times: Mutex<HashMap<TaskId, SimTime>>,
}

impl ManualClock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set(&self, task: &TaskId, time: f64) {
        self.times.lock().insert(task.clone(), SimTime::new(time));
    }
}

impl TaskClock for ManualClock {
    fn simulated_time(&self, task: &TaskId) -> Option<SimTime> {
        self.times.lock().get(task).copied()
    }
}

/// Memory store counting calls, with switchable failures
#[derive(Default)]
pub struct CountingStore {
    inner: MemoryCheckpointStore,
    pub writes: AtomicUsize,
    pub validations: AtomicUsize,
    pub closes: AtomicUsize,
    pub fail_open: AtomicBool,
    pub fail_writes: AtomicBool,
    /// Number of upcoming `mark_valid` calls that error
    pub failing_validations: AtomicUsize,
}

impl CountingStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn validations(&self) -> usize {
        self.validations.load(Ordering::SeqCst)
    }
}

impl CheckpointStore for CountingStore {
    fn name(&self) -> &str {
        "counting"
    }

    fn capabilities(&self) -> StoreCapabilities {
        self.inner.capabilities()
    }

    fn open(&self, owner: &str) -> Result<()> {
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(Error::storage_open("connection refused"));
        }
        self.inner.open(owner)
    }

    fn write(&self, owner: &str, task: &TaskId, time: SimTime, host: HostIndex, payload: &[u8]) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::StorageUnavailable("disk full".to_string()));
        }
        self.inner.write(owner, task, time, host, payload)
    }

    fn read_last_checkpoint(&self, owner: &str, task: &TaskId) -> Result<Option<Vec<CheckpointEntry>>> {
        self.inner.read_last_checkpoint(owner, task)
    }

    fn mark_valid(&self, owner: &str, task: &TaskId, time: SimTime) -> Result<bool> {
        self.validations.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failing_validations
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(Error::StorageUnavailable("lock timeout".to_string()));
        }
        self.inner.mark_valid(owner, task, time)
    }

    fn close(&self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.inner.close()
    }
}
