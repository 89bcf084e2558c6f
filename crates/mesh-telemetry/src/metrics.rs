//! Prometheus metrics for the event mesh.
//!
//! All metrics follow the naming convention: `mesh_bus_<metric>_<unit>`
//!
//! ## Metric Types
//!
//! - **Counter**: Monotonically increasing value (e.g., messages_published_total)
//! - **Gauge**: Value that can go up or down (e.g., deliveries_in_flight)
//! - **Histogram**: Distribution of values (e.g., handler_duration_seconds)

use lazy_static::lazy_static;
use prometheus::{
    exponential_buckets, CounterVec, Encoder, Gauge, Histogram, HistogramOpts, HistogramVec,
    Opts, Registry, TextEncoder,
};
use std::sync::Arc;

use crate::TelemetryError;

lazy_static! {
    /// Global metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    // =========================================================================
    // PUBLISH PATH
    // =========================================================================

    /// Envelopes written to the transport
    pub static ref MESSAGES_PUBLISHED: CounterVec = CounterVec::new(
        Opts::new("mesh_bus_messages_published_total", "Envelopes written to the transport"),
        &["message_type", "channel"]
    ).expect("metric creation failed");

    /// Publish attempts that returned an error to the caller
    pub static ref PUBLISH_FAILURES: CounterVec = CounterVec::new(
        Opts::new("mesh_bus_publish_failures_total", "Publish attempts that failed"),
        &["reason"]  // reason: unregistered_type/serialization/transport/invalid_channel
    ).expect("metric creation failed");

    /// Encoded envelope size
    pub static ref ENCODED_MESSAGE_BYTES: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "mesh_bus_encoded_message_bytes",
            "Size of encoded envelopes in bytes"
        ).buckets(exponential_buckets(64.0, 4.0, 10).unwrap())
    ).expect("metric creation failed");

    // =========================================================================
    // DISPATCH PATH
    // =========================================================================

    /// Raw deliveries handed over by the transport
    pub static ref MESSAGES_RECEIVED: CounterVec = CounterVec::new(
        Opts::new("mesh_bus_messages_received_total", "Raw deliveries received from the transport"),
        &["channel"]
    ).expect("metric creation failed");

    /// Deliveries dropped without a successful handler run
    pub static ref MESSAGES_DROPPED: CounterVec = CounterVec::new(
        Opts::new("mesh_bus_messages_dropped_total", "Deliveries dropped by the dispatcher"),
        &["reason"]  // reason: malformed/unhandled/poison/retries_exhausted/intake_full/duplicate/shutdown
    ).expect("metric creation failed");

    /// Handler invocations by outcome
    pub static ref HANDLER_INVOCATIONS: CounterVec = CounterVec::new(
        Opts::new("mesh_bus_handler_invocations_total", "Handler invocations"),
        &["message_type", "outcome"]  // outcome: success/failure/timeout/panic
    ).expect("metric creation failed");

    /// Handler retries scheduled
    pub static ref HANDLER_RETRIES: CounterVec = CounterVec::new(
        Opts::new("mesh_bus_handler_retries_total", "Handler retries after a failed attempt"),
        &["message_type"]
    ).expect("metric creation failed");

    /// Handler attempt duration
    pub static ref HANDLER_DURATION: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "mesh_bus_handler_duration_seconds",
            "Time spent in a single handler attempt"
        ).buckets(exponential_buckets(0.0001, 2.0, 16).unwrap()),
        &["message_type"]
    ).expect("metric creation failed");

    /// Deliveries currently being processed
    pub static ref DELIVERIES_IN_FLIGHT: Gauge = Gauge::new(
        "mesh_bus_deliveries_in_flight",
        "Deliveries currently holding a worker permit"
    ).expect("metric creation failed");
}

/// Handle to the registered metrics
pub struct MetricsHandle {
    _registry: Arc<Registry>,
}

/// Register all metrics with the global registry.
///
/// Safe to call more than once; already registered collectors are skipped.
pub fn register_metrics() -> Result<MetricsHandle, TelemetryError> {
    let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
        // Publish
        Box::new(MESSAGES_PUBLISHED.clone()),
        Box::new(PUBLISH_FAILURES.clone()),
        Box::new(ENCODED_MESSAGE_BYTES.clone()),
        // Dispatch
        Box::new(MESSAGES_RECEIVED.clone()),
        Box::new(MESSAGES_DROPPED.clone()),
        Box::new(HANDLER_INVOCATIONS.clone()),
        Box::new(HANDLER_RETRIES.clone()),
        Box::new(HANDLER_DURATION.clone()),
        Box::new(DELIVERIES_IN_FLIGHT.clone()),
    ];

    for metric in metrics {
        match REGISTRY.register(metric) {
            Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
            Err(e) => return Err(TelemetryError::MetricsInit(e.to_string())),
        }
    }

    Ok(MetricsHandle {
        _registry: Arc::new(REGISTRY.clone()),
    })
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}

/// Timer guard for automatic histogram observation.
pub struct HistogramTimer {
    histogram: Histogram,
    start: std::time::Instant,
}

impl HistogramTimer {
    /// Start a new timer for the given histogram.
    pub fn new(histogram: &Histogram) -> Self {
        Self {
            histogram: histogram.clone(),
            start: std::time::Instant::now(),
        }
    }
}

impl Drop for HistogramTimer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        self.histogram.observe(duration);
    }
}

/// Start timing for a histogram. Observation happens on drop.
#[macro_export]
macro_rules! time_histogram {
    ($histogram:expr) => {
        $crate::metrics::HistogramTimer::new(&$histogram)
    };
}
