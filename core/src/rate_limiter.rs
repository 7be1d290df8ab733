//! Rate limiting for stride and cycle dispatch

use std::num::NonZeroU32;
use std::time::{Duration, Instant};

use governor::{clock::DefaultClock, state::InMemoryState, state::NotKeyed, Quota};

use crate::config::{ConfigError, RateSpec};

/// Gate consulted before a stride or cycle is dispatched
///
/// Implementations may block the calling motor thread and must be safe to
/// share between every motor of an activity.
pub trait RateLimiter: Send + Sync {
    /// Block until the next op is allowed
    ///
    /// Returns the delay imposed on the caller. The harness adds it to service
    /// time to report response time.
    fn maybe_wait_for_op(&self) -> Duration;

    /// Configured ops per second, if any
    fn rate(&self) -> Option<f64>;
}

/// Token bucket limiter via the governor crate
///
/// Fractional rates (below one op per second) are honoured exactly by
/// expressing the quota as a replenish period rather than a per-second count.
pub struct TokenRateLimiter {
    limiter: governor::RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    spec: RateSpec,
}

impl TokenRateLimiter {
    /// Create a limiter for `spec`
    ///
    /// Fails when the rate or burst is out of range.
    ///
    /// # Examples
    /// ```
    /// use cycle_bench_core::{RateLimiter, RateSpec, TokenRateLimiter};
    ///
    /// let limiter = TokenRateLimiter::new(RateSpec::new(100.0)).unwrap();
    /// assert_eq!(limiter.rate(), Some(100.0));
    ///
    /// assert!(TokenRateLimiter::new(RateSpec::new(0.0)).is_err());
    /// ```
    pub fn new(spec: RateSpec) -> Result<Self, ConfigError> {
        let period = spec.period()?;
        let burst = NonZeroU32::new(spec.burst).ok_or_else(|| {
            ConfigError::InvalidRateLimit("burst must be at least 1".into())
        })?;
        let quota = Quota::with_period(period)
            .ok_or_else(|| ConfigError::InvalidRateLimit(format!("zero period for {spec}")))?
            .allow_burst(burst);
        Ok(Self {
            limiter: governor::RateLimiter::direct(quota),
            spec,
        })
    }

    /// Try to take a permit without waiting
    pub fn try_acquire(&self) -> bool {
        self.limiter.check().is_ok()
    }

    /// The spec this limiter was built from
    pub fn spec(&self) -> RateSpec {
        self.spec
    }
}

impl RateLimiter for TokenRateLimiter {
    fn maybe_wait_for_op(&self) -> Duration {
        if self.limiter.check().is_ok() {
            return Duration::ZERO;
        }
        let started = Instant::now();
        futures::executor::block_on(self.limiter.until_ready());
        started.elapsed()
    }

    fn rate(&self) -> Option<f64> {
        Some(self.spec.ops_per_sec)
    }
}

impl std::fmt::Debug for TokenRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenRateLimiter")
            .field("ops_per_sec", &self.spec.ops_per_sec)
            .field("burst", &self.spec.burst)
            .finish()
    }
}
