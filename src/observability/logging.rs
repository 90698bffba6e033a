//! Structured diagnostic logging.
//!
//! # Responsibilities
//! - Initialize the global `tracing` subscriber once at startup
//! - Bridge request spans to the trace provider
//!
//! # Design Decisions
//! - `RUST_LOG` wins over the configured level, for the fmt output only
//! - The OpenTelemetry bridge has its own fixed filter: request spans and
//!   INFO-or-louder events are exported whatever the diagnostic level is
//! - JSON format for production, pretty format for development

use tracing::{Level, Metadata, Subscriber};
use tracing_subscriber::filter::filter_fn;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::{LogFormat, TelemetryConfig};
use crate::observability::tracing::TraceProvider;
use crate::observability::TelemetryError;

/// Field declared by every `request_span!`.
const REQUEST_SPAN_MARKER: &str = "otel.kind";

/// Filter used when `RUST_LOG` is unset.
pub fn default_filter(level: &str) -> String {
    format!("categories_service={level},tower_http={level},{level}", level = level)
}

fn diagnostic_filter(level: &str) -> Result<EnvFilter, TelemetryError> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter(level)))
        .map_err(|e| TelemetryError::Subscriber(e.to_string()))
}

/// Whether a span or event is handed to the trace exporter.
///
/// Spans pass only when they are request spans; the diagnostic
/// `tower_http` span and any other library span stay local.
pub fn exported(meta: &Metadata<'_>) -> bool {
    if meta.is_span() {
        meta.fields().field(REQUEST_SPAN_MARKER).is_some()
    } else {
        *meta.level() <= Level::INFO
    }
}

/// Wrap an exporting layer in the fixed [`exported`] filter.
pub fn export_layer<S, L>(layer: L) -> impl Layer<S> + Send + Sync + 'static
where
    S: Subscriber + for<'a> LookupSpan<'a> + 'static,
    L: Layer<S> + Send + Sync + 'static,
{
    layer.with_filter(filter_fn(exported))
}

/// Install the global subscriber: filtered fmt layer plus the OpenTelemetry bridge.
pub fn init_subscriber(config: &TelemetryConfig, traces: &TraceProvider) -> Result<(), TelemetryError> {
    let filter = diagnostic_filter(&config.log_level)?;

    let fmt_layer = match config.log_format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .boxed(),
        LogFormat::Pretty => tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_line_number(true)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(fmt_layer.with_filter(filter))
        .with(export_layer(traces.layer()))
        .try_init()
        .map_err(|e| TelemetryError::Subscriber(e.to_string()))
}
