//! Operation-level failures and their classification
//!
//! Driver failures and "successful but wrong" results both arrive here as an
//! [`OpError`]. An [`ErrorHandler`] decides whether the op is retried, what
//! result code it reports, and whether the whole activity must stop.

use std::sync::Arc;
use std::time::Duration;

use crate::config::ConfigError;
use crate::metrics::MetricsRegistry;

/// Failure of a single cycle's operation
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OpError {
    /// Error raised by the external driver
    #[error("{kind}: {message}")]
    Driver {
        /// Driver-specific error class
        kind: String,
        /// Error message
        message: String,
    },

    /// A conditional write reported success without being applied
    #[error("conditional update was not applied for cycle {cycle}")]
    NotApplied {
        /// Affected cycle
        cycle: u64,
    },

    /// A result unexpectedly carried more pages
    #[error("unexpected result continuation for cycle {cycle}: {detail}")]
    UnexpectedContinuation {
        /// Affected cycle
        cycle: u64,
        /// What was left over
        detail: String,
    },

    /// The driver gave up waiting
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// The op was dropped before reaching a terminal phase
    #[error("operation was abandoned before completion")]
    Abandoned,
}

impl OpError {
    /// Driver error of class `kind`
    pub fn driver(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Driver {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Name used for error handler matching and per-error counters
    pub fn name(&self) -> &str {
        match self {
            OpError::Driver { kind, .. } => kind,
            OpError::NotApplied { .. } => "NotApplied",
            OpError::UnexpectedContinuation { .. } => "UnexpectedContinuation",
            OpError::Timeout(_) => "Timeout",
            OpError::Abandoned => "Abandoned",
        }
    }
}

/// What the caller should do after a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseAction {
    /// Keep running the activity
    Continue,
    /// Stop the whole activity
    Stop,
}

/// Classification of one failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorDetail {
    /// Whether another attempt may succeed
    pub retryable: bool,
    /// Activity-level response
    pub response: ResponseAction,
    /// Result code reported for the cycle if it ends here
    pub result_code: i32,
}

impl ErrorDetail {
    /// Non-retryable, keep going, code 1
    pub const FAILED: ErrorDetail = ErrorDetail {
        retryable: false,
        response: ResponseAction::Continue,
        result_code: 1,
    };

    /// Whether the activity must stop
    pub fn is_stop(&self) -> bool {
        self.response == ResponseAction::Stop
    }
}

/// Classifies op failures
pub trait ErrorHandler: Send + Sync {
    /// Decide how `error` on `cycle` is handled
    fn classify(&self, cycle: u64, error: &OpError) -> ErrorDetail;
}

#[derive(Debug, Clone, Default, PartialEq)]
struct Verbs {
    retry: bool,
    stop: bool,
    warn: bool,
    count: bool,
    ignore: bool,
    code: Option<i32>,
}

impl Verbs {
    fn parse(list: &str) -> Result<Self, ConfigError> {
        let mut verbs = Verbs::default();
        for verb in list.split(',').map(str::trim).filter(|v| !v.is_empty()) {
            match verb {
                "retry" => verbs.retry = true,
                "stop" => verbs.stop = true,
                "warn" => verbs.warn = true,
                "count" => verbs.count = true,
                "ignore" => verbs.ignore = true,
                other => {
                    let code = other.parse::<i32>().map_err(|_| {
                        ConfigError::InvalidErrorSpec(format!("unknown verb '{other}'"))
                    })?;
                    verbs.code = Some(code);
                }
            }
        }
        Ok(verbs)
    }
}

/// Error handler configured by a verb list
///
/// Spec syntax is either a plain verb list applied to every error
/// (`"retry,warn,count"`) or `;`-separated `name=verbs` rules where `*`
/// matches anything (`"NotApplied=stop;*=retry,warn"`). Verbs:
///
/// - `retry`: the failure is retryable
/// - `stop`: the activity stops when the op fails for good
/// - `warn`: log each failure at warn level
/// - `count`: count into `errors.<name>`
/// - `ignore`: report result code 0 and never stop
/// - an integer: result code for the failed cycle (default 1)
pub struct VerbErrorHandler {
    rules: Vec<(String, Verbs)>,
    registry: Option<Arc<MetricsRegistry>>,
}

impl VerbErrorHandler {
    /// Parse handler rules
    pub fn parse(spec: &str) -> Result<Self, ConfigError> {
        let mut rules = Vec::new();
        for rule in spec.split(';').map(str::trim).filter(|r| !r.is_empty()) {
            let (name, verbs) = match rule.split_once('=') {
                Some((name, verbs)) => (name.trim().to_string(), verbs),
                None => ("*".to_string(), rule),
            };
            if name.is_empty() {
                return Err(ConfigError::InvalidErrorSpec(format!(
                    "empty error name in '{rule}'"
                )));
            }
            rules.push((name, Verbs::parse(verbs)?));
        }
        if rules.is_empty() {
            return Err(ConfigError::InvalidErrorSpec(
                "at least one rule is required".into(),
            ));
        }
        Ok(Self {
            rules,
            registry: None,
        })
    }

    /// Count errors into `registry`
    pub fn with_registry(mut self, registry: Arc<MetricsRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    fn verbs_for(&self, name: &str) -> Option<&Verbs> {
        self.rules
            .iter()
            .find(|(rule, _)| rule == name || rule == "*")
            .map(|(_, verbs)| verbs)
    }
}

impl ErrorHandler for VerbErrorHandler {
    fn classify(&self, cycle: u64, error: &OpError) -> ErrorDetail {
        let name = error.name();
        let Some(verbs) = self.verbs_for(name) else {
            return ErrorDetail::FAILED;
        };

        if verbs.warn {
            tracing::warn!(cycle, error = %error, "operation failed");
        }
        if verbs.count {
            if let Some(registry) = &self.registry {
                registry.error_counter(name).increment();
            }
        }
        if verbs.ignore {
            return ErrorDetail {
                retryable: verbs.retry,
                response: ResponseAction::Continue,
                result_code: 0,
            };
        }
        ErrorDetail {
            retryable: verbs.retry,
            response: if verbs.stop {
                ResponseAction::Stop
            } else {
                ResponseAction::Continue
            },
            result_code: verbs.code.unwrap_or(1),
        }
    }
}

impl std::fmt::Debug for VerbErrorHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerbErrorHandler")
            .field("rules", &self.rules.iter().map(|(n, _)| n).collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_verb_list() {
        let handler = VerbErrorHandler::parse("retry,warn,count").unwrap();
        let detail = handler.classify(7, &OpError::driver("Overloaded", "busy"));
        assert!(detail.retryable);
        assert_eq!(detail.response, ResponseAction::Continue);
        assert_eq!(detail.result_code, 1);
    }

    #[test]
    fn test_named_rules_first_match_wins() {
        let handler = VerbErrorHandler::parse("NotApplied=stop,5;*=retry").unwrap();

        let detail = handler.classify(1, &OpError::NotApplied { cycle: 1 });
        assert!(!detail.retryable);
        assert!(detail.is_stop());
        assert_eq!(detail.result_code, 5);

        let detail = handler.classify(1, &OpError::Timeout(Duration::from_secs(1)));
        assert!(detail.retryable);
        assert!(!detail.is_stop());
    }

    #[test]
    fn test_unmatched_error_fails_without_retry() {
        let handler = VerbErrorHandler::parse("Timeout=retry").unwrap();
        let detail = handler.classify(0, &OpError::driver("Syntax", "bad"));
        assert_eq!(detail, ErrorDetail::FAILED);
    }

    #[test]
    fn test_ignore_reports_success_code() {
        let handler = VerbErrorHandler::parse("ignore,stop").unwrap();
        let detail = handler.classify(0, &OpError::Abandoned);
        assert_eq!(detail.result_code, 0);
        assert!(!detail.is_stop());
    }

    #[test]
    fn test_count_uses_registry() {
        let registry = Arc::new(MetricsRegistry::new());
        let handler = VerbErrorHandler::parse("count")
            .unwrap()
            .with_registry(Arc::clone(&registry));
        handler.classify(0, &OpError::driver("Unavailable", "x"));
        handler.classify(1, &OpError::driver("Unavailable", "y"));
        assert_eq!(registry.counter("errors.Unavailable").count(), 2);
    }

    #[test]
    fn test_invalid_specs() {
        assert!(VerbErrorHandler::parse("").is_err());
        assert!(VerbErrorHandler::parse("retry,explode").is_err());
        assert!(VerbErrorHandler::parse("=retry").is_err());
    }

    #[test]
    fn test_op_error_names() {
        assert_eq!(OpError::driver("WriteTimeout", "x").name(), "WriteTimeout");
        assert_eq!(OpError::NotApplied { cycle: 0 }.name(), "NotApplied");
        assert_eq!(OpError::Abandoned.name(), "Abandoned");
    }
}
