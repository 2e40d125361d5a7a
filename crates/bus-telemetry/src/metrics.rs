//! Prometheus metrics for the event bus.
//!
//! All metrics follow the naming convention: `eventbus_<metric>_<unit>`
//!
//! ## Metric Types
//!
//! - **Counter**: Monotonically increasing value (e.g., messages_published_total)
//! - **Gauge**: Value that can go up or down (e.g., deliveries_in_flight)
//! - **Histogram**: Distribution of values (e.g., handler_duration_seconds)

use lazy_static::lazy_static;
use prometheus::{
    exponential_buckets, CounterVec, Encoder, Gauge, HistogramOpts, HistogramVec, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;

use crate::TelemetryError;

lazy_static! {
    /// Global metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    // =========================================================================
    // PUBLISH METRICS
    // =========================================================================

    /// Messages accepted by the broker
    pub static ref MESSAGES_PUBLISHED: CounterVec = CounterVec::new(
        Opts::new("eventbus_messages_published_total", "Messages accepted by the broker"),
        &["topic", "event_type"]
    ).expect("metric creation failed");

    /// Publish calls that failed (provisioning or transport)
    pub static ref PUBLISH_FAILURES: CounterVec = CounterVec::new(
        Opts::new("eventbus_publish_failures_total", "Publish calls that failed"),
        &["topic"]
    ).expect("metric creation failed");

    // =========================================================================
    // DELIVERY METRICS
    // =========================================================================

    /// Delivered messages by outcome, one outcome per delivery
    pub static ref DELIVERIES: CounterVec = CounterVec::new(
        Opts::new("eventbus_deliveries_total", "Delivered messages by outcome"),
        &["subscription", "outcome"]  // outcome: ack/nack/malformed/filtered
    ).expect("metric creation failed");

    /// Handler execution time
    pub static ref HANDLER_DURATION: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "eventbus_handler_duration_seconds",
            "Time spent inside consumer handlers"
        ).buckets(exponential_buckets(0.0005, 2.0, 16).expect("valid buckets")),
        &["subscription"]
    ).expect("metric creation failed");

    /// Handlers currently running
    pub static ref DELIVERIES_IN_FLIGHT: Gauge = Gauge::new(
        "eventbus_deliveries_in_flight",
        "Number of handler invocations currently running"
    ).expect("metric creation failed");

    // =========================================================================
    // PROVISIONING METRICS
    // =========================================================================

    /// Resources created by this process
    pub static ref RESOURCES_PROVISIONED: CounterVec = CounterVec::new(
        Opts::new("eventbus_resources_provisioned_total", "Topics and subscriptions created on demand"),
        &["kind"]  // kind: topic/subscription
    ).expect("metric creation failed");
}

/// Delivery outcome label values.
pub mod outcome {
    pub const ACK: &str = "ack";
    pub const NACK: &str = "nack";
    pub const MALFORMED: &str = "malformed";
    pub const FILTERED: &str = "filtered";
}

/// Handle to the registered metrics
pub struct MetricsHandle {
    registry: Arc<Registry>,
}

impl MetricsHandle {
    /// The registry the bus metrics live in.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

/// Register all metrics with the global registry. Safe to call more than once.
pub fn register_metrics() -> Result<MetricsHandle, TelemetryError> {
    let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(MESSAGES_PUBLISHED.clone()),
        Box::new(PUBLISH_FAILURES.clone()),
        Box::new(DELIVERIES.clone()),
        Box::new(HANDLER_DURATION.clone()),
        Box::new(DELIVERIES_IN_FLIGHT.clone()),
        Box::new(RESOURCES_PROVISIONED.clone()),
    ];

    for metric in metrics {
        match REGISTRY.register(metric) {
            Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
            Err(e) => return Err(TelemetryError::MetricsInit(e.to_string())),
        }
    }

    Ok(MetricsHandle {
        registry: Arc::new(REGISTRY.clone()),
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

/// Timer guard that observes a labelled histogram on drop.
pub struct HistogramTimer {
    histogram: prometheus::Histogram,
    start: std::time::Instant,
}

impl HistogramTimer {
    /// Start a new timer for one label set of `histogram`.
    pub fn new(histogram: &HistogramVec, labels: &[&str]) -> Self {
        Self {
            histogram: histogram.with_label_values(labels),
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
