//! Error types for cycle-bench-core

use crate::ops::OpPhase;
use crate::state::RunState;
use thiserror::Error;

/// Core error type
///
/// These are loop-level failures: anything returned as `Err(Error)` from a
/// motor unwinds it to [`RunState::Errored`]. Per-cycle failures travel as
/// [`crate::OpError`] and never reach this type unless an action reports them
/// as fatal.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// A required builder field was not supplied
    #[error("missing configuration: {0}")]
    MissingConfig(&'static str),

    /// A run-state transition outside the legal table was attempted
    #[error("illegal run state transition: {from} -> {to}")]
    IllegalTransition {
        /// State the motor was in
        from: RunState,
        /// State that was requested
        to: RunState,
    },

    /// A tracked op was moved out of phase order
    #[error("illegal op transition on cycle {cycle}: {from:?} -> {to:?}")]
    IllegalOpTransition {
        /// Cycle of the op
        cycle: u64,
        /// Phase the op was in
        from: OpPhase,
        /// Phase that was requested
        to: OpPhase,
    },

    /// The run-state tally would have gone negative
    #[error("run state tally underflow for {0}")]
    TallyUnderflow(RunState),

    /// An action reported a failure it cannot recover from
    #[error("action failed on cycle {cycle}: {message}")]
    Action {
        /// Cycle being processed when the action failed
        cycle: u64,
        /// Failure description
        message: String,
    },

    /// Motor thread could not be spawned or panicked
    #[error("motor error: {0}")]
    Motor(String),

    /// Activity-level failure
    #[error("activity error: {0}")]
    Activity(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Configuration error from any displayable cause
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Missing builder field
    pub fn missing_config(field: &'static str) -> Self {
        Self::MissingConfig(field)
    }

    /// Activity-level failure
    pub fn activity(message: impl Into<String>) -> Self {
        Self::Activity(message.into())
    }

    /// Motor-level failure
    pub fn motor(message: impl Into<String>) -> Self {
        Self::Motor(message.into())
    }
}

impl From<crate::config::ConfigError> for Error {
    fn from(err: crate::config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_illegal_transition_message() {
        let err = Error::IllegalTransition {
            from: RunState::Stopped,
            to: RunState::Running,
        };
        let msg = err.to_string();
        assert!(msg.contains("Stopped"));
        assert!(msg.contains("Running"));
    }

    #[test]
    fn test_missing_config_message() {
        assert!(Error::missing_config("input").to_string().contains("input"));
    }
}
