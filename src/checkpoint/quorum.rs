//! Checkpoint quorum bookkeeping
//!
//! Tracks which hosts reported a checkpoint for each (task, time) point.
//! The table is transient: the store holds the durable truth, so losing it
//! only delays quorum detection.
//!
//! A point that reaches quorum moves to "validating" so exactly one caller
//! marks it valid. The caller then either commits or reopens it.
//!
//! Eviction rules:
//! - committing `t` drops the task's points up to `t` and raises the
//!   task's validated watermark to `t`
//! - reopening `t` makes its hosts pending again, so the next submission
//!   retries the validation
//! - submissions at or below the watermark are not counted
//! - at most `max_pending_per_task` points stay pending per task; the oldest
//!   goes first

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::debug;

use crate::types::{HostIndex, SimTime, TaskId};

/// Result of recording one host's submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tally {
    /// Still waiting for other hosts
    Pending { reported: usize, required: usize },
    /// This submission completed the quorum; commit or reopen the point
    Reached,
    /// The point is at or below the validated watermark
    Stale,
}

#[derive(Debug, Default)]
struct TaskQuorum {
    pending: BTreeMap<SimTime, BTreeSet<HostIndex>>,
    /// Points that reached quorum and are being marked valid
    validating: BTreeMap<SimTime, BTreeSet<HostIndex>>,
    watermark: Option<SimTime>,
}

/// Per-task, per-time sets of reported hosts
#[derive(Debug)]
pub struct QuorumTable {
    max_pending_per_task: usize,
    tasks: HashMap<TaskId, TaskQuorum>,
}

impl QuorumTable {
    pub fn new(max_pending_per_task: usize) -> Self {
        Self {
            max_pending_per_task: max_pending_per_task.max(1),
            tasks: HashMap::new(),
        }
    }

    /// Record that `host` reported `time` for `task`
    ///
    /// A total host count of 0 or 1 reaches quorum on the first report.
    pub fn record(&mut self, task: &TaskId, time: SimTime, host: HostIndex, total_hosts: usize) -> Tally {
        let entry = self.tasks.entry(task.clone()).or_default();

        if entry.watermark.is_some_and(|mark| time <= mark) {
            return Tally::Stale;
        }

        if let Some(hosts) = entry.validating.get_mut(&time) {
            hosts.insert(host);
            return Tally::Pending {
                reported: hosts.len(),
                required: total_hosts,
            };
        }

        let hosts = entry.pending.entry(time).or_default();
        hosts.insert(host);
        let reported = hosts.len();

        if total_hosts <= 1 || reported >= total_hosts {
            if let Some(hosts) = entry.pending.remove(&time) {
                entry.validating.insert(time, hosts);
            }
            return Tally::Reached;
        }

        if entry.pending.len() > self.max_pending_per_task {
            let oldest = entry.pending.keys().copied().find(|t| *t != time);
            if let Some(oldest) = oldest {
                entry.pending.remove(&oldest);
                debug!(task_id = %task, time = %oldest, "Evicted oldest pending checkpoint point");
            }
        }

        Tally::Pending {
            reported,
            required: total_hosts,
        }
    }

    /// Record that a point which reached quorum was marked valid
    pub fn commit(&mut self, task: &TaskId, time: SimTime) {
        let Some(entry) = self.tasks.get_mut(task) else {
            return;
        };
        entry.validating.remove(&time);

        let mark = entry.watermark.map_or(time, |mark| mark.max(time));
        entry.watermark = Some(mark);

        let before = entry.pending.len();
        entry.pending.retain(|t, _| *t > mark);
        entry.validating.retain(|t, _| *t > mark);
        let evicted = before - entry.pending.len();
        if evicted > 0 {
            debug!(task_id = %task, time = %mark, evicted, "Dropped superseded checkpoint points");
        }
    }

    /// Return a point that failed validation to the pending set
    ///
    /// Its hosts count again, so the next submission at `time` completes
    /// the quorum once more.
    pub fn reopen(&mut self, task: &TaskId, time: SimTime) {
        let Some(entry) = self.tasks.get_mut(task) else {
            return;
        };
        let Some(hosts) = entry.validating.remove(&time) else {
            return;
        };
        if entry.watermark.is_some_and(|mark| time <= mark) {
            return;
        }
        entry.pending.entry(time).or_default().extend(hosts);
        debug!(task_id = %task, time = %time, "Checkpoint point reopened after failed validation");
    }

    /// Hosts that reported a still-pending point
    pub fn pending_hosts(&self, task: &TaskId, time: SimTime) -> Vec<HostIndex> {
        self.tasks
            .get(task)
            .and_then(|entry| entry.pending.get(&time))
            .map(|hosts| hosts.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Pending time points of a task, oldest first
    pub fn pending_times(&self, task: &TaskId) -> Vec<SimTime> {
        self.tasks
            .get(task)
            .map(|entry| entry.pending.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Latest time point that reached quorum
    pub fn watermark(&self, task: &TaskId) -> Option<SimTime> {
        self.tasks.get(task).and_then(|entry| entry.watermark)
    }

    /// Drop all bookkeeping for a task; returns whether any existed
    pub fn forget(&mut self, task: &TaskId) -> bool {
        self.tasks.remove(task).is_some()
    }

    /// Number of tasks with bookkeeping
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(v: f64) -> SimTime {
        SimTime::new(v)
    }

    #[test]
    fn test_quorum_reached_once_all_hosts_report() {
        let mut table = QuorumTable::new(8);
        let task = TaskId::new("t");

        assert_eq!(
            table.record(&task, t(5.0), 1, 2),
            Tally::Pending { reported: 1, required: 2 }
        );
        assert_eq!(table.pending_hosts(&task, t(5.0)), vec![1]);
        assert_eq!(table.record(&task, t(5.0), 2, 2), Tally::Reached);
        assert!(table.pending_hosts(&task, t(5.0)).is_empty());
    }

    #[test]
    fn test_duplicate_host_is_counted_once() {
        let mut table = QuorumTable::new(8);
        let task = TaskId::new("t");

        table.record(&task, t(1.0), 1, 3);
        assert_eq!(
            table.record(&task, t(1.0), 1, 3),
            Tally::Pending { reported: 1, required: 3 }
        );
    }

    #[test]
    fn test_single_host_reaches_quorum_immediately() {
        let mut table = QuorumTable::new(8);
        let task = TaskId::new("t");
        assert_eq!(table.record(&task, t(1.0), 1, 1), Tally::Reached);
        assert_eq!(table.record(&task, t(2.0), 1, 0), Tally::Reached);
    }

    #[test]
    fn test_resubmission_after_quorum_is_stale() {
        let mut table = QuorumTable::new(8);
        let task = TaskId::new("t");

        table.record(&task, t(5.0), 1, 2);
        assert_eq!(table.record(&task, t(5.0), 2, 2), Tally::Reached);
        table.commit(&task, t(5.0));
        assert_eq!(table.record(&task, t(5.0), 2, 2), Tally::Stale);
        assert_eq!(table.record(&task, t(4.0), 1, 2), Tally::Stale);
        assert_eq!(table.watermark(&task), Some(t(5.0)));
    }

    #[test]
    fn test_quorum_drops_older_pending_points() {
        let mut table = QuorumTable::new(8);
        let task = TaskId::new("t");

        table.record(&task, t(1.0), 1, 2);
        table.record(&task, t(2.0), 1, 2);
        table.record(&task, t(4.0), 1, 2);
        table.record(&task, t(3.0), 1, 2);
        table.record(&task, t(3.0), 2, 2);
        assert_eq!(table.pending_times(&task).len(), 3);

        table.commit(&task, t(3.0));
        assert_eq!(table.pending_times(&task), vec![t(4.0)]);
    }

    #[test]
    fn test_point_being_validated_is_claimed_once() {
        let mut table = QuorumTable::new(8);
        let task = TaskId::new("t");

        table.record(&task, t(5.0), 1, 2);
        assert_eq!(table.record(&task, t(5.0), 2, 2), Tally::Reached);
        assert_eq!(
            table.record(&task, t(5.0), 2, 2),
            Tally::Pending { reported: 2, required: 2 }
        );
        assert!(table.pending_hosts(&task, t(5.0)).is_empty());
        assert_eq!(table.watermark(&task), None);
    }

    #[test]
    fn test_reopened_point_reaches_quorum_again() {
        let mut table = QuorumTable::new(8);
        let task = TaskId::new("t");

        table.record(&task, t(5.0), 1, 2);
        assert_eq!(table.record(&task, t(5.0), 2, 2), Tally::Reached);
        table.reopen(&task, t(5.0));

        assert_eq!(table.pending_hosts(&task, t(5.0)), vec![1, 2]);
        assert_eq!(table.record(&task, t(5.0), 1, 2), Tally::Reached);
        table.commit(&task, t(5.0));
        assert_eq!(table.watermark(&task), Some(t(5.0)));
        assert!(table.pending_times(&task).is_empty());
    }

    #[test]
    fn test_commit_keeps_highest_watermark() {
        let mut table = QuorumTable::new(8);
        let task = TaskId::new("t");

        table.record(&task, t(2.0), 1, 1);
        table.record(&task, t(3.0), 1, 1);
        table.commit(&task, t(3.0));
        table.commit(&task, t(2.0));

        assert_eq!(table.watermark(&task), Some(t(3.0)));
    }

    #[test]
    fn test_pending_limit_evicts_oldest() {
        let mut table = QuorumTable::new(2);
        let task = TaskId::new("t");

        table.record(&task, t(1.0), 1, 2);
        table.record(&task, t(2.0), 1, 2);
        table.record(&task, t(3.0), 1, 2);

        assert_eq!(table.pending_times(&task), vec![t(2.0), t(3.0)]);
    }

    #[test]
    fn test_pending_limit_never_evicts_current_point() {
        let mut table = QuorumTable::new(1);
        let task = TaskId::new("t");

        table.record(&task, t(2.0), 1, 2);
        table.record(&task, t(1.0), 1, 2);

        assert_eq!(table.pending_times(&task), vec![t(1.0)]);
    }

    #[test]
    fn test_forget_drops_task() {
        let mut table = QuorumTable::new(8);
        let task = TaskId::new("t");
        table.record(&task, t(1.0), 1, 2);

        assert!(table.forget(&task));
        assert!(!table.forget(&task));
        assert_eq!(table.task_count(), 0);
    }
}
