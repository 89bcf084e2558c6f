//! # Mesh Telemetry
//!
//! Observability for services on the event mesh.
//!
//! ## Components
//!
//! - **Logs**: `tracing` with a pretty or JSON console layer
//! - **Traces**: OpenTelemetry export over OTLP, optional
//! - **Metrics**: Prometheus counters and histograms for the broker
//! - **Propagation**: W3C `traceparent` carried in message header metadata
//!
//! ## Usage
//!
//! ```rust,ignore
//! use mesh_telemetry::{init_telemetry, TelemetryConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = TelemetryConfig::from_env();
//!     let _guard = init_telemetry(config).await.expect("Failed to init telemetry");
//!
//!     // Publish and dispatch here
//! }
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `OTEL_EXPORTER_OTLP_ENDPOINT` | unset | OTLP collector endpoint |
//! | `OTEL_SERVICE_NAME` | `event-mesh` | Service name in traces |
//! | `MESH_LOG_LEVEL` | `info` | Log level filter |
//! | `MESH_JSON_LOGS` | `false` | JSON console output |

mod config;
mod context;
pub mod metrics;
mod tracing_setup;

pub use config::TelemetryConfig;
pub use context::{PropagatedContext, TraceContext, TRACEPARENT_KEY};
pub use metrics::{encode_metrics, register_metrics, HistogramTimer, MetricsHandle};
pub use tracing_setup::TracingGuard;

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to initialize tracing: {0}")]
    TracerInit(String),

    #[error("Failed to initialize Prometheus metrics: {0}")]
    MetricsInit(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Initialize logging, tracing and metrics.
///
/// Returns a guard that must be held for the lifetime of the application.
/// When dropped, it flushes pending spans.
pub async fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    if config.service_name.trim().is_empty() {
        return Err(TelemetryError::Config("service name is empty".to_string()));
    }

    // Metrics first (synchronous)
    let metrics_handle = register_metrics()?;

    let tracing_guard = tracing_setup::init_tracing(&config).await?;

    Ok(TelemetryGuard {
        _tracing: tracing_guard,
        _metrics: metrics_handle,
    })
}

/// Guard that keeps telemetry active. Drop to flush and shutdown.
pub struct TelemetryGuard {
    _tracing: TracingGuard,
    _metrics: MetricsHandle,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        tracing::info!("Shutting down telemetry...");
    }
}
