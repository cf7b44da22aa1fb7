use prometheus::{CounterVec, Gauge, Histogram, HistogramOpts, Opts, Registry};
use std::sync::Arc;

use crate::limiter::{AcquireOutcome, LimiterStats};

/// Metrics collector for the admission controller
#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,

    // Admission metrics
    acquire_outcomes: CounterVec,
    acquire_wait_seconds: Histogram,

    // Limiter state snapshots
    window_rotations: Gauge,
    queue_depth: Gauge,
    permits_available: Gauge,
}

impl Metrics {
    /// Create a new metrics instance
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let acquire_outcomes = CounterVec::new(
            Opts::new(
                "throttle_acquire_outcomes",
                "Number of admission attempts by outcome",
            ),
            &["outcome"],
        )?;

        let acquire_wait_seconds = Histogram::with_opts(HistogramOpts::new(
            "throttle_acquire_wait_seconds",
            "Time callers spent inside acquire, including queued waits",
        ))?;

        let window_rotations = Gauge::new(
            "throttle_window_rotations",
            "Window transitions performed since startup",
        )?;

        let queue_depth = Gauge::new(
            "throttle_queue_depth",
            "Callers currently parked in the wait queue",
        )?;

        let permits_available = Gauge::new(
            "throttle_permits_available",
            "Permits still grantable in the current window",
        )?;

        // Register all metrics
        registry.register(Box::new(acquire_outcomes.clone()))?;
        registry.register(Box::new(acquire_wait_seconds.clone()))?;
        registry.register(Box::new(window_rotations.clone()))?;
        registry.register(Box::new(queue_depth.clone()))?;
        registry.register(Box::new(permits_available.clone()))?;

        Ok(Self {
            registry,
            acquire_outcomes,
            acquire_wait_seconds,
            window_rotations,
            queue_depth,
            permits_available,
        })
    }

    /// Get the Prometheus registry for this metrics instance
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Record the outcome of one admission attempt
    pub fn record_outcome(&self, outcome: AcquireOutcome) {
        self.acquire_outcomes
            .with_label_values(&[outcome.as_str()])
            .inc();
    }

    /// Create a timer measuring how long an acquire call takes
    pub fn start_acquire_timer(&self) -> prometheus::HistogramTimer {
        self.acquire_wait_seconds.start_timer()
    }

    /// Refresh the state gauges from a limiter snapshot
    pub fn observe_limiter(&self, stats: &LimiterStats) {
        self.window_rotations.set(stats.rotations as f64);
        self.queue_depth.set(stats.queued as f64);
        self.permits_available.set(stats.available_permits as f64);
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new().expect("Failed to create default metrics")
    }
}
