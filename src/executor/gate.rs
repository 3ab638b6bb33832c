//! One-shot decision gate
//!
//! The execution controller's start/cancel decision is recorded under the
//! same mutex the waiting job checks before sleeping on the condvar, so a
//! decision delivered before the job reaches the wait point is never lost.

use parking_lot::{Condvar, Mutex};

/// Why a wait on the gate returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateWake {
    /// The decision was recorded (`true` = proceed)
    Decided(bool),
    /// Woken without a decision
    Interrupted,
}

#[derive(Debug, Default)]
struct GateState {
    decision: Option<bool>,
    interrupted: bool,
}

/// Single-resolve gate a job blocks on until its run decision arrives
#[derive(Debug, Default)]
pub struct DecisionGate {
    state: Mutex<GateState>,
    cond: Condvar,
}

impl DecisionGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the decision and release any waiter
    ///
    /// Only the first decision counts; returns `false` if one was already
    /// recorded.
    pub fn decide(&self, proceed: bool) -> bool {
        let mut state = self.state.lock();
        if state.decision.is_some() {
            return false;
        }
        state.decision = Some(proceed);
        self.cond.notify_all();
        true
    }

    /// Wake the waiter without recording a decision
    pub fn interrupt(&self) {
        let mut state = self.state.lock();
        state.interrupted = true;
        self.cond.notify_all();
    }

    /// Block until a decision is recorded or the gate is interrupted
    ///
    /// Returns immediately if the decision already exists. An interruption
    /// is consumed by the wait it wakes.
    pub fn wait(&self) -> GateWake {
        let mut state = self.state.lock();
        loop {
            if let Some(proceed) = state.decision {
                return GateWake::Decided(proceed);
            }
            if state.interrupted {
                state.interrupted = false;
                return GateWake::Interrupted;
            }
            self.cond.wait(&mut state);
        }
    }

    /// The recorded decision, if any
    pub fn decision(&self) -> Option<bool> {
        self.state.lock().decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_decision_before_wait_is_not_lost() {
        let gate = DecisionGate::new();
        assert!(gate.decide(true));
        assert_eq!(gate.wait(), GateWake::Decided(true));
    }

    #[test]
    fn test_decision_after_wait_releases_waiter() {
        let gate = Arc::new(DecisionGate::new());
        let waiter = {
            let gate = gate.clone();
            thread::spawn(move || gate.wait())
        };
        thread::sleep(Duration::from_millis(20));
        gate.decide(false);
        assert_eq!(waiter.join().unwrap(), GateWake::Decided(false));
    }

    #[test]
    fn test_only_first_decision_counts() {
        let gate = DecisionGate::new();
        assert!(gate.decide(false));
        assert!(!gate.decide(true));
        assert_eq!(gate.decision(), Some(false));
    }

    #[test]
    fn test_interrupt_wakes_without_decision() {
        let gate = Arc::new(DecisionGate::new());
        let waiter = {
            let gate = gate.clone();
            thread::spawn(move || gate.wait())
        };
        thread::sleep(Duration::from_millis(20));
        gate.interrupt();
        assert_eq!(waiter.join().unwrap(), GateWake::Interrupted);
        assert_eq!(gate.decision(), None);
    }
}
