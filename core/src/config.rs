//! Activity configuration types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Activity configuration
///
/// Defines how many motors run, how cycles are batched into strides, how fast
/// they may be dispatched, and how async ops are bounded and retried.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivityConfig {
    /// Name used for thread names and log fields
    pub alias: String,

    /// Number of motor threads
    pub threads: usize,

    /// Cycles pulled from the input per stride
    pub stride: usize,

    /// Cycle interval to run
    pub cycles: CycleRange,

    /// Per-cycle rate limit
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cyclerate: Option<RateSpec>,

    /// Per-stride rate limit
    #[serde(skip_serializing_if = "Option::is_none")]
    pub striderate: Option<RateSpec>,

    /// Maximum in-flight async ops per motor
    pub max_pending: usize,

    /// Attempts per op, including the first
    pub max_tries: u32,

    /// Error handler rules, see [`crate::VerbErrorHandler`]
    pub errors: String,

    /// How long a finishing or stopping motor waits for in-flight ops
    pub drain_timeout_ms: u64,

    /// Length of one backpressure wait slice
    pub backpressure_slice_ms: u64,
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self {
            alias: "activity".to_string(),
            threads: 1,
            stride: 1,
            cycles: CycleRange::new(0, 1),
            cyclerate: None,
            striderate: None,
            max_pending: 100,
            max_tries: 10,
            errors: "retry,warn,count".to_string(),
            drain_timeout_ms: 60_000,
            backpressure_slice_ms: 10_000,
        }
    }
}

impl ActivityConfig {
    /// Create a config with the given alias
    pub fn new(alias: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            ..Default::default()
        }
    }

    /// Set the number of motor threads
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// Set the stride size
    pub fn with_stride(mut self, stride: usize) -> Self {
        self.stride = stride;
        self
    }

    /// Set the cycle interval
    pub fn with_cycles(mut self, cycles: CycleRange) -> Self {
        self.cycles = cycles;
        self
    }

    /// Set the per-cycle rate limit
    pub fn with_cyclerate(mut self, rate: RateSpec) -> Self {
        self.cyclerate = Some(rate);
        self
    }

    /// Set the per-stride rate limit
    pub fn with_striderate(mut self, rate: RateSpec) -> Self {
        self.striderate = Some(rate);
        self
    }

    /// Set the async in-flight bound
    pub fn with_max_pending(mut self, max_pending: usize) -> Self {
        self.max_pending = max_pending;
        self
    }

    /// Set the per-op attempt budget
    pub fn with_max_tries(mut self, max_tries: u32) -> Self {
        self.max_tries = max_tries;
        self
    }

    /// Set the error handler rules
    pub fn with_errors(mut self, errors: impl Into<String>) -> Self {
        self.errors = errors.into();
        self
    }

    /// Set the drain timeout
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the backpressure wait slice
    pub fn with_backpressure_slice(mut self, slice: Duration) -> Self {
        self.backpressure_slice_ms = slice.as_millis() as u64;
        self
    }

    /// Drain timeout as a duration
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    /// Backpressure slice as a duration
    pub fn backpressure_slice(&self) -> Duration {
        Duration::from_millis(self.backpressure_slice_ms)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.threads == 0 {
            return Err(ConfigError::InvalidThreads(
                "threads must be at least 1".into(),
            ));
        }
        if self.stride == 0 {
            return Err(ConfigError::InvalidStride("stride must be at least 1".into()));
        }
        if self.cycles.is_empty() {
            return Err(ConfigError::InvalidCycles(format!(
                "cycle range {} is empty",
                self.cycles
            )));
        }
        for rate in [&self.cyclerate, &self.striderate].into_iter().flatten() {
            rate.validate()?;
        }
        if self.max_pending == 0 {
            return Err(ConfigError::InvalidMaxPending(
                "max_pending must be at least 1".into(),
            ));
        }
        if self.max_tries == 0 {
            return Err(ConfigError::InvalidMaxTries(
                "max_tries must be at least 1".into(),
            ));
        }
        if self.backpressure_slice_ms == 0 {
            return Err(ConfigError::InvalidTimeout(
                "backpressure_slice_ms must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Half-open interval of cycle numbers, `start..end`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CycleRange {
    /// First cycle
    pub start: u64,
    /// One past the last cycle
    pub end: u64,
}

impl CycleRange {
    /// Create a range
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    /// Number of cycles in the range
    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    /// Whether the range holds no cycles
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Display for CycleRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

impl FromStr for CycleRange {
    type Err = ConfigError;

    /// `"N"` means `0..N`; `"A..B"` is taken literally
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse = |v: &str| {
            v.trim()
                .parse::<u64>()
                .map_err(|e| ConfigError::InvalidCycles(format!("'{s}': {e}")))
        };
        match s.split_once("..") {
            Some((start, end)) => Ok(Self::new(parse(start)?, parse(end)?)),
            None => Ok(Self::new(0, parse(s)?)),
        }
    }
}

impl TryFrom<String> for CycleRange {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CycleRange> for String {
    fn from(range: CycleRange) -> Self {
        range.to_string()
    }
}

/// Target rate for a limiter
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RateSpec {
    /// Operations per second
    pub ops_per_sec: f64,
    /// Ops that may be released back-to-back after idling
    pub burst: u32,
}

impl RateSpec {
    /// Rate with no burst headroom
    pub fn new(ops_per_sec: f64) -> Self {
        Self {
            ops_per_sec,
            burst: 1,
        }
    }

    /// Set the burst size
    pub fn with_burst(mut self, burst: u32) -> Self {
        self.burst = burst;
        self
    }

    /// Time between two permits
    ///
    /// Fails unless the period is a representable, non-zero `Duration`.
    pub fn period(&self) -> Result<Duration, ConfigError> {
        if !(self.ops_per_sec.is_finite() && self.ops_per_sec > 0.0) {
            return Err(ConfigError::InvalidRateLimit(
                "rate limit must be positive".into(),
            ));
        }
        let period = Duration::try_from_secs_f64(1.0 / self.ops_per_sec).map_err(|_| {
            ConfigError::InvalidRateLimit(format!("rate {} is too low", self.ops_per_sec))
        })?;
        if period.is_zero() {
            return Err(ConfigError::InvalidRateLimit(format!(
                "rate {} exceeds one op per nanosecond",
                self.ops_per_sec
            )));
        }
        Ok(period)
    }

    /// Validate the rate
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.period()?;
        if self.burst == 0 {
            return Err(ConfigError::InvalidRateLimit(
                "burst must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

impl fmt::Display for RateSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.burst == 1 {
            write!(f, "{}", self.ops_per_sec)
        } else {
            write!(f, "{},{}", self.ops_per_sec, self.burst)
        }
    }
}

impl FromStr for RateSpec {
    type Err = ConfigError;

    /// `"100"` or `"100,5"` (rate, burst)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = |e: String| ConfigError::InvalidRateLimit(format!("'{s}': {e}"));
        let (rate, burst) = match s.split_once(',') {
            Some((rate, burst)) => (
                rate,
                burst.trim().parse::<u32>().map_err(|e| bad(e.to_string()))?,
            ),
            None => (s, 1),
        };
        let spec = Self {
            ops_per_sec: rate.trim().parse().map_err(|e: std::num::ParseFloatError| {
                bad(e.to_string())
            })?,
            burst,
        };
        spec.validate()?;
        Ok(spec)
    }
}

impl TryFrom<String> for RateSpec {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RateSpec> for String {
    fn from(rate: RateSpec) -> Self {
        rate.to_string()
    }
}

/// Configuration validation errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Invalid thread count
    #[error("Invalid threads: {0}")]
    InvalidThreads(String),

    /// Invalid stride
    #[error("Invalid stride: {0}")]
    InvalidStride(String),

    /// Invalid cycle range
    #[error("Invalid cycles: {0}")]
    InvalidCycles(String),

    /// Invalid rate limit
    #[error("Invalid rate limit: {0}")]
    InvalidRateLimit(String),

    /// Invalid in-flight bound
    #[error("Invalid max_pending: {0}")]
    InvalidMaxPending(String),

    /// Invalid attempt budget
    #[error("Invalid max_tries: {0}")]
    InvalidMaxTries(String),

    /// Invalid timeout
    #[error("Invalid timeout: {0}")]
    InvalidTimeout(String),

    /// Invalid error handler rules
    #[error("Invalid error handler rules: {0}")]
    InvalidErrorSpec(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ActivityConfig::default();
        assert_eq!(config.threads, 1);
        assert_eq!(config.max_pending, 100);
        assert_eq!(config.drain_timeout(), Duration::from_secs(60));
        assert_eq!(config.backpressure_slice(), Duration::from_secs(10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder_pattern() {
        let config = ActivityConfig::new("writes")
            .with_threads(8)
            .with_stride(10)
            .with_cycles(CycleRange::new(0, 1000))
            .with_cyclerate(RateSpec::new(500.0))
            .with_max_tries(3);

        assert_eq!(config.alias, "writes");
        assert_eq!(config.threads, 8);
        assert_eq!(config.cycles.len(), 1000);
        assert_eq!(config.cyclerate, Some(RateSpec::new(500.0)));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_failures() {
        assert!(ActivityConfig::default().with_threads(0).validate().is_err());
        assert!(ActivityConfig::default().with_stride(0).validate().is_err());
        assert!(ActivityConfig::default()
            .with_cycles(CycleRange::new(5, 5))
            .validate()
            .is_err());
        assert!(ActivityConfig::default()
            .with_max_pending(0)
            .validate()
            .is_err());
        assert!(ActivityConfig::default().with_max_tries(0).validate().is_err());
        assert!(ActivityConfig::default()
            .with_cyclerate(RateSpec::new(-1.0))
            .validate()
            .is_err());
    }

    #[test]
    fn test_cycle_range_parse() {
        assert_eq!("10".parse::<CycleRange>().unwrap(), CycleRange::new(0, 10));
        assert_eq!(
            "5..20".parse::<CycleRange>().unwrap(),
            CycleRange::new(5, 20)
        );
        assert!("x..3".parse::<CycleRange>().is_err());
    }

    #[test]
    fn test_rate_spec_parse() {
        assert_eq!("100".parse::<RateSpec>().unwrap(), RateSpec::new(100.0));
        assert_eq!(
            "2.5,4".parse::<RateSpec>().unwrap(),
            RateSpec::new(2.5).with_burst(4)
        );
        assert!("0".parse::<RateSpec>().is_err());
        assert!("10,0".parse::<RateSpec>().is_err());
    }

    #[test]
    fn test_rate_spec_period_bounds() {
        assert_eq!(RateSpec::new(4.0).period().unwrap(), Duration::from_millis(250));
        assert_eq!(RateSpec::new(0.5).period().unwrap(), Duration::from_secs(2));

        // Period overflows `Duration`.
        assert!(matches!(
            "1e-20".parse::<RateSpec>(),
            Err(ConfigError::InvalidRateLimit(_))
        ));
        // Period rounds down to zero nanoseconds.
        assert!(matches!(
            "5e9".parse::<RateSpec>(),
            Err(ConfigError::InvalidRateLimit(_))
        ));
        assert!(ActivityConfig::default()
            .with_striderate(RateSpec::new(5e9))
            .validate()
            .is_err());
    }

    #[test]
    fn test_config_json() {
        let json = r#"{"alias":"reads","threads":4,"stride":5,"cycles":"100..200","cyclerate":"50,2"}"#;
        let config: ActivityConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.threads, 4);
        assert_eq!(config.cycles, CycleRange::new(100, 200));
        assert_eq!(config.cyclerate, Some(RateSpec::new(50.0).with_burst(2)));
        assert_eq!(config.max_tries, 10);

        let back = serde_json::to_string(&config).unwrap();
        assert!(back.contains("\"cycles\":\"100..200\""));
        assert!(!back.contains("striderate"));
    }
}
