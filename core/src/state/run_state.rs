//! Run state of a single motor

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of one motor thread
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Constructed, not yet started
    Uninitialized,
    /// Thread is up and preparing its action
    Starting,
    /// Dispatching cycles
    Running,
    /// Stop requested; no new cycles will be dispatched
    Stopping,
    /// Input was exhausted and all ops drained
    Finished,
    /// Stopped on request
    Stopped,
    /// Unwound by a loop-level error
    Errored,
}

impl RunState {
    /// All states, in tally slot order
    pub const ALL: [RunState; 7] = [
        RunState::Uninitialized,
        RunState::Starting,
        RunState::Running,
        RunState::Stopping,
        RunState::Finished,
        RunState::Stopped,
        RunState::Errored,
    ];

    /// Number of distinct states
    pub const COUNT: usize = Self::ALL.len();

    /// Slot of this state in a tally array
    pub(crate) fn index(self) -> usize {
        self as usize
    }

    /// Short display code, used in compact status lines
    pub fn code(self) -> &'static str {
        match self {
            RunState::Uninitialized => "i-",
            RunState::Starting => "s>",
            RunState::Running => "R>",
            RunState::Stopping => "s<",
            RunState::Finished => "F.",
            RunState::Stopped => "_.",
            RunState::Errored => "E!",
        }
    }

    /// Whether a motor may move from this state to `target`
    pub fn can_transition_to(self, target: RunState) -> bool {
        use RunState::*;
        match self {
            Uninitialized => matches!(target, Starting | Errored),
            Starting => matches!(target, Running | Finished | Stopping | Errored),
            Running => matches!(target, Stopping | Finished | Errored),
            Stopping => matches!(target, Stopped | Errored),
            Finished => matches!(target, Running | Starting),
            Stopped => matches!(target, Starting),
            Errored => false,
        }
    }

    /// Whether the motor has left its run loop for good (until restarted)
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunState::Finished | RunState::Stopped | RunState::Errored
        )
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
