//! Shared run state of one motor

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::state::{RunState, RunStateTally};

struct Inner {
    state: RunState,
    stop_requested: bool,
}

/// Thread-safe view of a motor's run state
///
/// The motor thread drives its own transitions; any other thread may ask it
/// to stop. Every change is mirrored into the activity's tally while the
/// handle lock is held, so tally and motor never disagree.
pub struct MotorHandle {
    slot: usize,
    inner: Mutex<Inner>,
    tally: Arc<RunStateTally>,
}

impl MotorHandle {
    /// Register a new motor in `tally` as `Uninitialized`
    pub fn new(slot: usize, tally: Arc<RunStateTally>) -> Arc<Self> {
        tally.add(RunState::Uninitialized);
        Arc::new(Self {
            slot,
            inner: Mutex::new(Inner {
                state: RunState::Uninitialized,
                stop_requested: false,
            }),
            tally,
        })
    }

    /// Motor slot within its activity
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Current state
    pub fn state(&self) -> RunState {
        self.inner.lock().state
    }

    /// Whether the motor may dispatch more cycles
    pub fn is_running(&self) -> bool {
        self.state() == RunState::Running
    }

    /// Move to `to`, rejecting illegal transitions without side effects
    pub fn transition(&self, to: RunState) -> Result<()> {
        let mut inner = self.inner.lock();
        self.apply(&mut inner, to)
    }

    /// Leave `Starting`, honouring a stop that arrived during startup
    ///
    /// Returns `true` if the motor is now `Running`.
    pub(crate) fn enter_running(&self) -> Result<bool> {
        let mut inner = self.inner.lock();
        if inner.stop_requested {
            self.apply(&mut inner, RunState::Stopping)?;
            return Ok(false);
        }
        self.apply(&mut inner, RunState::Running)?;
        Ok(true)
    }

    /// Settle after the run loop: `Running -> Finished`, `Stopping -> Stopped`
    pub(crate) fn settle(&self) -> Result<RunState> {
        let mut inner = self.inner.lock();
        let to = match inner.state {
            RunState::Running => RunState::Finished,
            RunState::Stopping => RunState::Stopped,
            from => {
                return Err(Error::IllegalTransition {
                    from,
                    to: RunState::Finished,
                })
            }
        };
        self.apply(&mut inner, to)?;
        Ok(to)
    }

    /// Mark the motor `Errored` if it has not already settled
    pub(crate) fn fail(&self) {
        let mut inner = self.inner.lock();
        if inner.state.can_transition_to(RunState::Errored) {
            // Legal by the check above.
            let _ = self.apply(&mut inner, RunState::Errored);
        }
    }

    /// Ask the motor to stop dispatching
    ///
    /// A running or starting motor moves to `Stopping` at once; one that has
    /// not started yet stops as soon as it does. Returns `false` if the motor
    /// had already settled.
    pub fn request_stop(&self) -> bool {
        let mut inner = self.inner.lock();
        inner.stop_requested = true;
        match inner.state {
            RunState::Starting | RunState::Running => {
                let _ = self.apply(&mut inner, RunState::Stopping);
                true
            }
            RunState::Uninitialized | RunState::Stopping => true,
            _ => false,
        }
    }

    fn apply(&self, inner: &mut Inner, to: RunState) -> Result<()> {
        let from = inner.state;
        if !from.can_transition_to(to) {
            return Err(Error::IllegalTransition { from, to });
        }
        self.tally.change(from, to)?;
        inner.state = to;
        tracing::debug!(motor = self.slot, from = %from, to = %to, "motor state changed");
        Ok(())
    }
}

impl Drop for MotorHandle {
    fn drop(&mut self) {
        let state = self.inner.get_mut().state;
        let _ = self.tally.remove(state);
    }
}

impl std::fmt::Debug for MotorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MotorHandle")
            .field("slot", &self.slot)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registers_in_tally() {
        let tally = Arc::new(RunStateTally::new());
        let handle = MotorHandle::new(0, Arc::clone(&tally));
        assert_eq!(tally.snapshot().count(RunState::Uninitialized), 1);

        handle.transition(RunState::Starting).unwrap();
        assert_eq!(tally.snapshot().count(RunState::Starting), 1);
        assert_eq!(tally.snapshot().count(RunState::Uninitialized), 0);

        drop(handle);
        assert_eq!(tally.snapshot().total(), 0);
    }

    #[test]
    fn test_illegal_transition_leaves_state() {
        let tally = Arc::new(RunStateTally::new());
        let handle = MotorHandle::new(0, Arc::clone(&tally));
        assert!(handle.transition(RunState::Running).is_err());
        assert_eq!(handle.state(), RunState::Uninitialized);
        assert_eq!(tally.snapshot().count(RunState::Uninitialized), 1);
    }

    #[test]
    fn test_stop_before_start() {
        let tally = Arc::new(RunStateTally::new());
        let handle = MotorHandle::new(0, tally);
        assert!(handle.request_stop());

        handle.transition(RunState::Starting).unwrap();
        assert!(!handle.enter_running().unwrap());
        assert_eq!(handle.state(), RunState::Stopping);
        assert_eq!(handle.settle().unwrap(), RunState::Stopped);
    }

    #[test]
    fn test_stop_while_running() {
        let tally = Arc::new(RunStateTally::new());
        let handle = MotorHandle::new(0, Arc::clone(&tally));
        handle.transition(RunState::Starting).unwrap();
        assert!(handle.enter_running().unwrap());

        assert!(handle.request_stop());
        assert!(!handle.is_running());
        assert_eq!(tally.snapshot().count(RunState::Stopping), 1);
        assert_eq!(handle.settle().unwrap(), RunState::Stopped);
        assert!(!handle.request_stop());
    }

    #[test]
    fn test_fail_after_settle_is_ignored() {
        let tally = Arc::new(RunStateTally::new());
        let handle = MotorHandle::new(0, tally);
        handle.transition(RunState::Starting).unwrap();
        handle.enter_running().unwrap();
        handle.settle().unwrap();
        handle.fail();
        assert_eq!(handle.state(), RunState::Finished);
    }
}
