//! Trace provider.
//!
//! # Responsibilities
//! - Build the OTLP/gRPC span exporter and batch processor
//! - Register the provider and the W3C propagator as process-wide defaults
//! - Hand out the tracer used by the `tracing` → OpenTelemetry bridge
//!
//! # Design Decisions
//! - Construction failure aborts startup; there is no partial-trace mode
//! - Spans are exported in batches on the Tokio runtime, off the request path

use std::time::Duration;

use opentelemetry::global;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::{runtime, trace as sdktrace};
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::registry::LookupSpan;

use crate::config::TelemetryConfig;
use crate::observability::{service_resource, ShutdownFn, TelemetryError};

/// Process-wide tracer with its shutdown hook.
pub struct TraceProvider {
    tracer: sdktrace::Tracer,
}

impl TraceProvider {
    /// Build the exporter and install the batch pipeline.
    ///
    /// Returns the provider handle and the function that flushes and closes
    /// the export channel. The caller owns running it exactly once.
    pub fn init(config: &TelemetryConfig) -> Result<(Self, ShutdownFn), TelemetryError> {
        let resource = service_resource(&config.service_name)?;
        let endpoint = config.collector_url();

        global::set_text_map_propagator(TraceContextPropagator::new());

        let exporter = opentelemetry_otlp::new_exporter()
            .tonic()
            .with_endpoint(endpoint.clone())
            .with_timeout(Duration::from_secs(config.export_timeout_secs));

        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(exporter)
            .with_trace_config(sdktrace::config().with_resource(resource))
            .install_batch(runtime::Tokio)
            .map_err(TelemetryError::TraceExporter)?;

        tracing::info!(
            service = %config.service_name,
            endpoint = %endpoint,
            "Trace provider initialized"
        );

        let flush_tracer = tracer.clone();
        let shutdown: ShutdownFn = Box::new(move || {
            let mut failures = Vec::new();
            if let Some(provider) = flush_tracer.provider() {
                for result in provider.force_flush() {
                    if let Err(e) = result {
                        failures.push(e.to_string());
                    }
                }
            }
            global::shutdown_tracer_provider();
            if failures.is_empty() {
                Ok(())
            } else {
                Err(TelemetryError::Flush(failures.join("; ")))
            }
        });

        Ok((Self { tracer }, shutdown))
    }

    /// Tracer handle for starting spans directly through the OpenTelemetry API.
    pub fn tracer(&self) -> sdktrace::Tracer {
        self.tracer.clone()
    }

    /// Layer bridging `tracing` spans to this provider.
    pub fn layer<S>(&self) -> OpenTelemetryLayer<S, sdktrace::Tracer>
    where
        S: tracing::Subscriber + for<'span> LookupSpan<'span>,
    {
        tracing_opentelemetry::layer().with_tracer(self.tracer.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_service_name_is_fatal() {
        let config = TelemetryConfig {
            service_name: " ".into(),
            ..TelemetryConfig::default()
        };
        let err = TraceProvider::init(&config).err().unwrap();
        assert!(matches!(err, TelemetryError::Resource(_)));
    }
}
