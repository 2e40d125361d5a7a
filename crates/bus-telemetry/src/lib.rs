//! # Bus Telemetry
//!
//! Logging and metrics for services built on the event bus.
//!
//! ## Components
//!
//! - **Logging**: `tracing-subscriber` with an `EnvFilter`, pretty console
//!   output in development and JSON lines in containers
//! - **Metrics**: Prometheus collectors for publish, delivery and
//!   provisioning activity
//!
//! ## Usage
//!
//! ```rust,ignore
//! use bus_telemetry::{TelemetryConfig, init_telemetry};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = TelemetryConfig::from_env();
//!     let _guard = init_telemetry(config).expect("Failed to init telemetry");
//!
//!     // Bus activity is now logged and counted
//! }
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `SERVICE_NAME` | `unknown-service` | Service name in the startup log |
//! | `BUS_LOG_LEVEL` | `info` | Log filter directive (falls back to `RUST_LOG`) |
//! | `BUS_JSON_LOGS` | container-dependent | Emit JSON lines |
//! | `BUS_CONSOLE_OUTPUT` | `true` | Write logs to stdout |

mod config;
mod logging;
pub mod metrics;

pub use config::TelemetryConfig;
pub use logging::StructuredLogger;
pub use metrics::{
    encode_metrics, register_metrics, HistogramTimer, MetricsHandle, DELIVERIES,
    DELIVERIES_IN_FLIGHT, HANDLER_DURATION, MESSAGES_PUBLISHED, PUBLISH_FAILURES,
    RESOURCES_PROVISIONED,
};

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to initialize logging: {0}")]
    LoggingInit(String),

    #[error("Failed to initialize Prometheus metrics: {0}")]
    MetricsInit(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Initialize metrics and the global log subscriber.
///
/// Returns a guard that must be held for the lifetime of the application.
pub fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    // Metrics first, they do not depend on the subscriber
    let metrics = register_metrics()?;
    let logger = logging::init_logging(&config)?;

    Ok(TelemetryGuard {
        metrics,
        _logger: logger,
    })
}

/// Guard that keeps telemetry active.
pub struct TelemetryGuard {
    metrics: MetricsHandle,
    _logger: StructuredLogger,
}

impl TelemetryGuard {
    /// Metrics handle for exposing a scrape endpoint.
    pub fn metrics(&self) -> &MetricsHandle {
        &self.metrics
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        tracing::info!("Shutting down telemetry");
    }
}
