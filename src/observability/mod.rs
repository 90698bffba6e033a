//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Every request handler:
//!     → instrument.rs (one span, one counter increment, one histogram observation)
//!         → tracing.rs (span export to the collector, OTLP/gRPC, batched)
//!         → metrics.rs (aggregated in-process, flushed by a periodic reader)
//!
//! Any component:
//!     → audit.rs (append to local log file, always)
//!         → index.rs (bounded queue → worker → search index, best effort)
//!
//! Process diagnostics:
//!     → logging.rs (tracing-subscriber: env filter, fmt, OpenTelemetry bridge)
//! ```
//!
//! # Design Decisions
//! - Trace and meter providers are fatal at startup; no partial telemetry mode
//! - Recording a metric never waits on an export cycle
//! - The search index is the only sink allowed to fail silently

pub mod audit;
pub mod index;
pub mod instrument;
pub mod logging;
pub mod metrics;
pub mod tracing;

use opentelemetry::metrics::MetricsError;
use opentelemetry::trace::TraceError;

pub use audit::{DualSinkLogger, LogLevel};
pub use instrument::{instrument, RequestMeta};
pub use metrics::{RequestInstruments, RequestRecorder};

/// Flushes and closes one telemetry provider. Runs at most once.
pub type ShutdownFn = Box<dyn FnOnce() -> Result<(), TelemetryError> + Send + Sync>;

/// Fatal errors raised while constructing or tearing down telemetry.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("invalid resource descriptor: {0}")]
    Resource(String),

    #[error("failed to build trace exporter: {0}")]
    TraceExporter(#[source] TraceError),

    #[error("failed to build metric exporter: {0}")]
    MetricExporter(#[source] MetricsError),

    #[error("failed to create instrument {name}: {source}")]
    Instrument {
        name: &'static str,
        #[source]
        source: MetricsError,
    },

    #[error("failed to flush telemetry: {0}")]
    Flush(String),

    #[error("failed to open log file {path}: {source}")]
    LogFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to build search index client: {0}")]
    IndexClient(String),

    #[error("failed to install diagnostic subscriber: {0}")]
    Subscriber(String),
}

/// `service.name` resource shared by the trace and meter providers.
pub(crate) fn service_resource(service_name: &str) -> Result<opentelemetry_sdk::Resource, TelemetryError> {
    let name = service_name.trim();
    if name.is_empty() {
        return Err(TelemetryError::Resource("service name must not be empty".into()));
    }
    Ok(opentelemetry_sdk::Resource::new(vec![opentelemetry::KeyValue::new(
        "service.name",
        name.to_string(),
    )]))
}
