//! Instrumentation handles and snapshots
//!
//! The harness only needs `time()`/`update()`/`increment()` semantics. Handles
//! are handed out by name from a [`MetricsRegistry`]; asking twice for the same
//! name yields the same shared handle, so motor threads and driver completion
//! threads record into one place.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Latency percentiles (all values in milliseconds)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq)]
pub struct LatencyPercentiles {
    /// Minimum value
    pub min: f64,
    /// 50th percentile (median)
    pub p50: f64,
    /// 75th percentile
    pub p75: f64,
    /// 90th percentile
    pub p90: f64,
    /// 95th percentile
    pub p95: f64,
    /// 99th percentile
    pub p99: f64,
    /// Maximum value
    pub max: f64,
    /// Mean value
    pub mean: f64,
    /// Standard deviation
    pub stddev: f64,
}

impl LatencyPercentiles {
    fn from_micros(h: &hdrhistogram::Histogram<u64>) -> Self {
        if h.is_empty() {
            return Self::default();
        }
        let ms = |v: u64| v as f64 / 1000.0;
        Self {
            min: ms(h.min()),
            p50: ms(h.value_at_quantile(0.50)),
            p75: ms(h.value_at_quantile(0.75)),
            p90: ms(h.value_at_quantile(0.90)),
            p95: ms(h.value_at_quantile(0.95)),
            p99: ms(h.value_at_quantile(0.99)),
            max: ms(h.max()),
            mean: h.mean() / 1000.0,
            stddev: h.stdev() / 1000.0,
        }
    }
}

/// Duration recorder backed by an HdrHistogram
///
/// Microsecond precision, max 1 hour.
pub struct Timer {
    histogram: Mutex<hdrhistogram::Histogram<u64>>,
}

impl Timer {
    /// Create an empty timer
    pub fn new() -> Self {
        let histogram = hdrhistogram::Histogram::new_with_bounds(1, 3_600_000_000, 3)
            .expect("static histogram bounds are valid");
        Self {
            histogram: Mutex::new(histogram),
        }
    }

    /// Start timing; the sample is recorded when the context is stopped
    pub fn time(&self) -> TimerContext<'_> {
        TimerContext {
            timer: self,
            started: Instant::now(),
        }
    }

    /// Record one duration
    pub fn update(&self, duration: Duration) {
        let micros = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);
        self.histogram.lock().saturating_record(micros);
    }

    /// Number of recorded samples
    pub fn count(&self) -> u64 {
        self.histogram.lock().len()
    }

    /// Percentiles over every recorded sample
    pub fn percentiles(&self) -> LatencyPercentiles {
        LatencyPercentiles::from_micros(&self.histogram.lock())
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

/// In-flight timing started by [`Timer::time`]
pub struct TimerContext<'a> {
    timer: &'a Timer,
    started: Instant,
}

impl TimerContext<'_> {
    /// Record the elapsed time and return it
    pub fn stop(self) -> Duration {
        let elapsed = self.started.elapsed();
        self.timer.update(elapsed);
        elapsed
    }
}

/// Distribution of plain integer values
pub struct Histogram {
    histogram: Mutex<hdrhistogram::Histogram<u64>>,
}

impl Histogram {
    /// Create an empty, auto-resizing histogram
    pub fn new() -> Self {
        let histogram =
            hdrhistogram::Histogram::new(3).expect("three significant figures is valid");
        Self {
            histogram: Mutex::new(histogram),
        }
    }

    /// Record one value
    pub fn update(&self, value: u64) {
        self.histogram.lock().saturating_record(value);
    }

    /// Number of recorded values
    pub fn count(&self) -> u64 {
        self.histogram.lock().len()
    }

    /// Largest recorded value, 0 when empty
    pub fn max(&self) -> u64 {
        let h = self.histogram.lock();
        if h.is_empty() {
            0
        } else {
            h.max()
        }
    }

    /// How many recorded values equal `value`
    pub fn count_at(&self, value: u64) -> u64 {
        self.histogram.lock().count_at(value)
    }

    fn summary(&self) -> HistogramSummary {
        let h = self.histogram.lock();
        if h.is_empty() {
            return HistogramSummary::default();
        }
        HistogramSummary {
            count: h.len(),
            min: h.min(),
            max: h.max(),
            mean: h.mean(),
            p50: h.value_at_quantile(0.50),
            p99: h.value_at_quantile(0.99),
        }
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

/// Monotonic counter
#[derive(Default)]
pub struct Counter(AtomicU64);

impl Counter {
    /// Create a zeroed counter
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one
    pub fn increment(&self) {
        self.add(1);
    }

    /// Add `n`
    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    /// Current value
    pub fn count(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Default)]
struct Handles {
    timers: BTreeMap<String, Arc<Timer>>,
    histograms: BTreeMap<String, Arc<Histogram>>,
    counters: BTreeMap<String, Arc<Counter>>,
}

/// Named metric handles for one activity
#[derive(Default)]
pub struct MetricsRegistry {
    handles: Mutex<Handles>,
}

impl MetricsRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Timer named `name`, created on first use
    pub fn timer(&self, name: &str) -> Arc<Timer> {
        let mut handles = self.handles.lock();
        Arc::clone(handles.timers.entry(name.to_string()).or_default())
    }

    /// Histogram named `name`, created on first use
    pub fn histogram(&self, name: &str) -> Arc<Histogram> {
        let mut handles = self.handles.lock();
        Arc::clone(handles.histograms.entry(name.to_string()).or_default())
    }

    /// Counter named `name`, created on first use
    pub fn counter(&self, name: &str) -> Arc<Counter> {
        let mut handles = self.handles.lock();
        Arc::clone(handles.counters.entry(name.to_string()).or_default())
    }

    /// Counter for errors named `name`, kept under `errors.<name>`
    pub fn error_counter(&self, name: &str) -> Arc<Counter> {
        self.counter(&format!("errors.{name}"))
    }

    /// Copy every metric's current values
    pub fn snapshot(&self) -> MetricsSnapshot {
        let handles = self.handles.lock();
        MetricsSnapshot {
            timers: handles
                .timers
                .iter()
                .map(|(name, t)| {
                    (
                        name.clone(),
                        TimerSummary {
                            count: t.count(),
                            latency_ms: t.percentiles(),
                        },
                    )
                })
                .collect(),
            histograms: handles
                .histograms
                .iter()
                .map(|(name, h)| (name.clone(), h.summary()))
                .collect(),
            counters: handles
                .counters
                .iter()
                .map(|(name, c)| (name.clone(), c.count()))
                .collect(),
        }
    }
}

impl std::fmt::Debug for MetricsRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let handles = self.handles.lock();
        f.debug_struct("MetricsRegistry")
            .field("timers", &handles.timers.len())
            .field("histograms", &handles.histograms.len())
            .field("counters", &handles.counters.len())
            .finish()
    }
}

/// Serializable copy of a timer
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimerSummary {
    /// Samples recorded
    pub count: u64,
    /// Percentiles in milliseconds
    pub latency_ms: LatencyPercentiles,
}

/// Serializable copy of a histogram
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistogramSummary {
    /// Values recorded
    pub count: u64,
    /// Smallest value
    pub min: u64,
    /// Largest value
    pub max: u64,
    /// Mean value
    pub mean: f64,
    /// Median
    pub p50: u64,
    /// 99th percentile
    pub p99: u64,
}

/// Serializable copy of a whole registry
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Timers by name
    pub timers: BTreeMap<String, TimerSummary>,
    /// Histograms by name
    pub histograms: BTreeMap<String, HistogramSummary>,
    /// Counters by name
    pub counters: BTreeMap<String, u64>,
}

impl MetricsSnapshot {
    /// Counter value, 0 when absent
    pub fn counter(&self, name: &str) -> u64 {
        self.counters.get(name).copied().unwrap_or(0)
    }
}

/// The handles the harness itself records into
pub struct ActivityMetrics {
    registry: Arc<MetricsRegistry>,
    /// Binding / filtering / transformation of an async op
    pub bind: Arc<Timer>,
    /// Hand-off of an async op to the driver
    pub execute: Arc<Timer>,
    /// Service time of every non-skipped terminal op
    pub result: Arc<Timer>,
    /// Service time of successful ops only
    pub result_success: Arc<Timer>,
    /// Per-cycle service time (start to terminal)
    pub cycle_service: Arc<Timer>,
    /// Per-cycle response time (service time plus rate-limiter delay)
    pub cycle_response: Arc<Timer>,
    /// Per-stride service time
    pub stride_service: Arc<Timer>,
    /// Per-stride response time
    pub stride_response: Arc<Timer>,
    /// Time blocked on the cycle rate limiter
    pub cycle_ratelimit: Arc<Timer>,
    /// Time blocked on the stride rate limiter
    pub stride_ratelimit: Arc<Timer>,
    /// Attempts per terminal op
    pub tries: Arc<Histogram>,
    /// Backpressure wait slices spent on a full op tracker
    pub op_tracker_blocked: Arc<Counter>,
    /// Every attempt, first try and retries alike
    pub attempts: Arc<Counter>,
    /// Terminal successes
    pub succeeded: Arc<Counter>,
    /// Terminal failures
    pub failed: Arc<Counter>,
    /// Ops skipped before execution
    pub skipped: Arc<Counter>,
    /// Retries scheduled
    pub retries: Arc<Counter>,
    /// Failures the error handler chose to report as success
    pub ignored: Arc<Counter>,
}

impl ActivityMetrics {
    /// Look up (or create) the harness handles in `registry`
    pub fn new(registry: Arc<MetricsRegistry>) -> Self {
        Self {
            bind: registry.timer("bind"),
            execute: registry.timer("execute"),
            result: registry.timer("result"),
            result_success: registry.timer("result_success"),
            cycle_service: registry.timer("cycle_service"),
            cycle_response: registry.timer("cycle_response"),
            stride_service: registry.timer("stride_service"),
            stride_response: registry.timer("stride_response"),
            cycle_ratelimit: registry.timer("cycle_ratelimit"),
            stride_ratelimit: registry.timer("stride_ratelimit"),
            tries: registry.histogram("tries"),
            op_tracker_blocked: registry.counter("op_tracker_blocked"),
            attempts: registry.counter("attempts"),
            succeeded: registry.counter("succeeded"),
            failed: registry.counter("failed"),
            skipped: registry.counter("skipped"),
            retries: registry.counter("retries"),
            ignored: registry.counter("ignored"),
            registry,
        }
    }

    /// Standalone metrics with a private registry
    pub fn detached() -> Self {
        Self::new(Arc::new(MetricsRegistry::new()))
    }

    /// Registry these handles live in
    pub fn registry(&self) -> &Arc<MetricsRegistry> {
        &self.registry
    }
}

impl std::fmt::Debug for ActivityMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivityMetrics")
            .field("succeeded", &self.succeeded.count())
            .field("failed", &self.failed.count())
            .field("skipped", &self.skipped.count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_returns_shared_handles() {
        let registry = MetricsRegistry::new();
        registry.counter("x").increment();
        registry.counter("x").add(2);
        assert_eq!(registry.counter("x").count(), 3);
    }

    #[test]
    fn test_timer_percentiles() {
        let timer = Timer::new();
        for i in 1..=100 {
            timer.update(Duration::from_millis(i));
        }

        let p = timer.percentiles();
        assert_eq!(timer.count(), 100);
        assert!((p.min - 1.0).abs() < 0.1);
        assert!((p.max - 100.0).abs() < 0.1);
        assert!((p.p50 - 50.0).abs() < 1.0);
    }

    #[test]
    fn test_timer_context_records() {
        let timer = Timer::new();
        let ctx = timer.time();
        std::thread::sleep(Duration::from_millis(5));
        let elapsed = ctx.stop();
        assert!(elapsed >= Duration::from_millis(5));
        assert_eq!(timer.count(), 1);
    }

    #[test]
    fn test_empty_timer() {
        let timer = Timer::new();
        assert_eq!(timer.percentiles(), LatencyPercentiles::default());
    }

    #[test]
    fn test_histogram_counts() {
        let h = Histogram::new();
        h.update(1);
        h.update(3);
        h.update(3);
        assert_eq!(h.count(), 3);
        assert_eq!(h.max(), 3);
        assert_eq!(h.count_at(3), 2);
    }

    #[test]
    fn test_snapshot_contains_activity_metrics() {
        let metrics = ActivityMetrics::detached();
        metrics.succeeded.add(4);
        metrics.registry().error_counter("Timeout").increment();
        metrics.tries.update(2);

        let snap = metrics.registry().snapshot();
        assert_eq!(snap.counter("succeeded"), 4);
        assert_eq!(snap.counter("errors.Timeout"), 1);
        assert_eq!(snap.histograms["tries"].max, 2);
        assert!(snap.timers.contains_key("result_success"));

        let json = serde_json::to_string(&snap).unwrap();
        assert!(json.contains("\"succeeded\":4"));
    }
}
