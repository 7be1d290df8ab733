//! Builder pattern for Activity construction

use std::sync::Arc;

use crate::action::{Action, AsyncAction};
use crate::config::{ActivityConfig, CycleRange, RateSpec};
use crate::error::{Error, Result};
use crate::error_handler::{ErrorHandler, VerbErrorHandler};
use crate::input::{AtomicInput, Input};
use crate::metrics::{ActivityMetrics, MetricsRegistry};
use crate::motor::{MotorBuilder, MotorHandle};
use crate::ops::OpContext;
use crate::output::{NullOutput, Output};
use crate::rate_limiter::{RateLimiter, TokenRateLimiter};
use crate::state::RunStateTally;

use super::executor::{Activity, ActivityShared, FatalStop};
use super::ActivityController;

type ActionFactory = Box<dyn Fn(usize) -> Action + Send + Sync>;

/// Builder for creating an Activity with proper configuration
///
/// # Example
///
/// ```ignore
/// let activity = ActivityBuilder::new()
///     .threads(4)
///     .stride(10)
///     .cycles(CycleRange::new(0, 10_000))
///     .cyclerate(Some(RateSpec::new(1_000.0)))
///     .action(|_slot| Action::sync_fn(|_cycle| Ok(0)))
///     .build()?;
/// ```
pub struct ActivityBuilder {
    config: ActivityConfig,
    action: Option<ActionFactory>,
    input: Option<Arc<dyn Input>>,
    output: Option<Arc<dyn Output>>,
    error_handler: Option<Arc<dyn ErrorHandler>>,
    registry: Option<Arc<MetricsRegistry>>,
}

impl ActivityBuilder {
    /// Create a new activity builder with default configuration
    pub fn new() -> Self {
        Self {
            config: ActivityConfig::default(),
            action: None,
            input: None,
            output: None,
            error_handler: None,
            registry: None,
        }
    }

    /// Set the full activity configuration
    pub fn config(mut self, config: ActivityConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the number of motor threads
    pub fn threads(mut self, threads: usize) -> Self {
        self.config.threads = threads;
        self
    }

    /// Set the stride size
    pub fn stride(mut self, stride: usize) -> Self {
        self.config.stride = stride;
        self
    }

    /// Set the cycle interval
    pub fn cycles(mut self, cycles: CycleRange) -> Self {
        self.config.cycles = cycles;
        self
    }

    /// Set the per-cycle rate limit
    pub fn cyclerate(mut self, rate: Option<RateSpec>) -> Self {
        self.config.cyclerate = rate;
        self
    }

    /// Set the per-stride rate limit
    pub fn striderate(mut self, rate: Option<RateSpec>) -> Self {
        self.config.striderate = rate;
        self
    }

    /// Set the error handler rules
    pub fn errors(mut self, errors: impl Into<String>) -> Self {
        self.config.errors = errors.into();
        self
    }

    /// Set the per-motor action factory, called once per motor slot
    pub fn action<F>(mut self, factory: F) -> Self
    where
        F: Fn(usize) -> Action + Send + Sync + 'static,
    {
        self.action = Some(Box::new(factory));
        self
    }

    /// Share one async action across every motor
    pub fn async_action<A: AsyncAction>(self, action: Arc<A>) -> Self {
        self.action(move |_slot| Action::shared(Arc::clone(&action)))
    }

    /// Set the input (defaults to the configured cycle range)
    pub fn input(mut self, input: Arc<dyn Input>) -> Self {
        self.input = Some(input);
        self
    }

    /// Set the stride output (defaults to discarding)
    pub fn output(mut self, output: Arc<dyn Output>) -> Self {
        self.output = Some(output);
        self
    }

    /// Set the error handler (defaults to one parsed from the errors rules)
    pub fn error_handler(mut self, handler: Arc<dyn ErrorHandler>) -> Self {
        self.error_handler = Some(handler);
        self
    }

    /// Set the metrics registry
    pub fn registry(mut self, registry: Arc<MetricsRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Build the activity and its motors
    ///
    /// # Errors
    ///
    /// Returns an error if no action is set, or if configuration
    /// validation fails.
    pub fn build(self) -> Result<Activity> {
        let action = self
            .action
            .ok_or_else(|| Error::missing_config("action"))?;
        self.config.validate()?;
        let config = self.config;

        let registry = self
            .registry
            .unwrap_or_else(|| Arc::new(MetricsRegistry::new()));
        let metrics = Arc::new(ActivityMetrics::new(Arc::clone(&registry)));
        let error_handler: Arc<dyn ErrorHandler> = match self.error_handler {
            Some(handler) => handler,
            None => Arc::new(VerbErrorHandler::parse(&config.errors)?.with_registry(registry)),
        };
        let input = self
            .input
            .unwrap_or_else(|| Arc::new(AtomicInput::new(config.cycles)));
        let output = self.output.unwrap_or_else(|| Arc::new(NullOutput));
        let stride_limiter = limiter(config.striderate)?;
        let cycle_limiter = limiter(config.cyclerate)?;

        let tally = Arc::new(RunStateTally::new());
        let handles: Vec<_> = (0..config.threads)
            .map(|slot| MotorHandle::new(slot, Arc::clone(&tally)))
            .collect();
        let shared = Arc::new(ActivityShared::new(
            config.alias.clone(),
            tally,
            handles.clone(),
        ));
        let controller: Arc<dyn ActivityController> = Arc::new(FatalStop::new(Arc::clone(&shared)));

        let motors = handles
            .into_iter()
            .enumerate()
            .map(|(slot, handle)| {
                MotorBuilder::new(slot)
                    .input(Arc::clone(&input))
                    .action(action(slot))
                    .output(Arc::clone(&output))
                    .context(OpContext::new(
                        Arc::clone(&metrics),
                        Arc::clone(&error_handler),
                        Arc::clone(&controller),
                        config.max_tries,
                    ))
                    .handle(handle)
                    .stride(config.stride)
                    .max_pending(config.max_pending)
                    .backpressure_slice(config.backpressure_slice())
                    .drain_timeout(config.drain_timeout())
                    .stride_limiter(stride_limiter.clone())
                    .cycle_limiter(cycle_limiter.clone())
                    .build()
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Activity::new(config, shared, metrics, motors))
    }
}

impl Default for ActivityBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn limiter(spec: Option<RateSpec>) -> Result<Option<Arc<dyn RateLimiter>>> {
    let Some(spec) = spec else {
        return Ok(None);
    };
    let limiter = TokenRateLimiter::new(spec)?;
    Ok(Some(Arc::new(limiter) as Arc<dyn RateLimiter>))
}
