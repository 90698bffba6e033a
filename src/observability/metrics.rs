//! Metrics collection and export.
//!
//! # Responsibilities
//! - Build the meter provider with a periodic OTLP reader
//! - Create the two request instruments once, under the service's meter
//! - Record one data point per completed request
//!
//! # Metrics
//! - `http_requests_total` (counter): completed requests by `http.path`, `http.status`
//! - `http_request_duration_seconds` (histogram): latency in seconds, same labels
//! - `log_index_dropped_total` (counter): audit entries that never reached the
//!   search index, by `reason`
//!
//! # Design Decisions
//! - Recording aggregates in-process; the reader exports on its own interval
//! - Instruments are shared by every request and never recreated
//! - Names and labels are fixed; dashboards and alerts match on them

use std::time::Duration;

use opentelemetry::metrics::{Counter, Histogram, Meter, MeterProvider as _, Unit};
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::runtime;

use crate::config::TelemetryConfig;
use crate::observability::{service_resource, ShutdownFn, TelemetryError};

pub const REQUESTS_TOTAL: &str = "http_requests_total";
pub const REQUEST_DURATION_SECONDS: &str = "http_request_duration_seconds";

pub const LOG_INDEX_DROPPED_TOTAL: &str = "log_index_dropped_total";

pub const LABEL_PATH: &str = "http.path";
pub const LABEL_STATUS: &str = "http.status";
pub const LABEL_REASON: &str = "reason";

/// Sink for per-request measurements.
///
/// Implementations must be safe to call concurrently without external locking.
pub trait RequestRecorder: Send + Sync {
    /// Record one completed request: a counter increment and a duration observation.
    fn record(&self, path: &str, status: u16, elapsed: Duration);
}

/// The process-wide request counter and duration histogram.
#[derive(Clone)]
pub struct RequestInstruments {
    meter: Meter,
    count: Counter<u64>,
    duration: Histogram<f64>,
}

impl RequestInstruments {
    /// Build the periodic-reader pipeline and create both instruments.
    ///
    /// The returned shutdown function forces a final flush before closing.
    pub fn init(config: &TelemetryConfig) -> Result<(Self, ShutdownFn), TelemetryError> {
        let resource = service_resource(&config.service_name)?;
        let endpoint = config.collector_url();

        let exporter = opentelemetry_otlp::new_exporter()
            .tonic()
            .with_endpoint(endpoint.clone())
            .with_timeout(Duration::from_secs(config.export_timeout_secs));

        let provider = opentelemetry_otlp::new_pipeline()
            .metrics(runtime::Tokio)
            .with_exporter(exporter)
            .with_resource(resource)
            .with_period(Duration::from_secs(config.metric_interval_secs))
            .build()
            .map_err(TelemetryError::MetricExporter)?;

        global::set_meter_provider(provider.clone());

        let meter = provider.meter(config.service_name.clone());
        let instruments = Self::from_meter(&meter)?;

        tracing::info!(
            service = %config.service_name,
            endpoint = %endpoint,
            interval_secs = config.metric_interval_secs,
            "Meter provider initialized"
        );

        let shutdown: ShutdownFn = Box::new(move || {
            provider
                .force_flush()
                .map_err(|e| TelemetryError::Flush(e.to_string()))?;
            provider
                .shutdown()
                .map_err(|e| TelemetryError::Flush(e.to_string()))
        });

        Ok((instruments, shutdown))
    }

    /// Create the request instruments on an existing meter.
    pub fn from_meter(meter: &Meter) -> Result<Self, TelemetryError> {
        let count = meter
            .u64_counter(REQUESTS_TOTAL)
            .with_description("Total number of HTTP requests")
            .try_init()
            .map_err(|source| TelemetryError::Instrument { name: REQUESTS_TOTAL, source })?;

        let duration = meter
            .f64_histogram(REQUEST_DURATION_SECONDS)
            .with_description("Duration of HTTP requests in seconds")
            .with_unit(Unit::new("s"))
            .try_init()
            .map_err(|source| TelemetryError::Instrument {
                name: REQUEST_DURATION_SECONDS,
                source,
            })?;

        Ok(Self {
            meter: meter.clone(),
            count,
            duration,
        })
    }

    /// The service meter the instruments were created on.
    pub fn meter(&self) -> &Meter {
        &self.meter
    }
}

impl RequestRecorder for RequestInstruments {
    fn record(&self, path: &str, status: u16, elapsed: Duration) {
        let labels = request_labels(path, status);
        self.count.add(1, &labels);
        self.duration.record(elapsed.as_secs_f64(), &labels);
    }
}

/// Counter of audit entries dropped on their way to the search index.
pub fn index_drop_counter(meter: &Meter) -> Result<Counter<u64>, TelemetryError> {
    meter
        .u64_counter(LOG_INDEX_DROPPED_TOTAL)
        .with_description("Audit log entries that never reached the search index")
        .try_init()
        .map_err(|source| TelemetryError::Instrument {
            name: LOG_INDEX_DROPPED_TOTAL,
            source,
        })
}

/// Label set shared by the counter and the histogram.
pub fn request_labels(path: &str, status: u16) -> [KeyValue; 2] {
    [
        KeyValue::new(LABEL_PATH, path.to_string()),
        KeyValue::new(LABEL_STATUS, i64::from(status)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry::metrics::noop::NoopMeterProvider;
    use opentelemetry::Value;

    #[test]
    fn test_request_labels() {
        let labels = request_labels("/categories", 201);
        assert_eq!(labels[0].key.as_str(), "http.path");
        assert_eq!(labels[0].value, Value::from("/categories".to_string()));
        assert_eq!(labels[1].key.as_str(), "http.status");
        assert_eq!(labels[1].value, Value::I64(201));
    }

    #[test]
    fn test_instruments_on_noop_meter() {
        let meter = NoopMeterProvider::new().meter("test");
        let instruments = RequestInstruments::from_meter(&meter).unwrap();
        instruments.record("/categories", 200, Duration::from_millis(3));
    }

    #[test]
    fn test_exported_request_metrics() {
        let capture = testing::MetricsCapture::new();
        let instruments = RequestInstruments::from_meter(&capture.meter()).unwrap();

        instruments.record("/categories", 201, Duration::from_millis(4));
        instruments.record("/categories", 201, Duration::from_millis(6));
        instruments.record("/categories/{id}", 404, Duration::from_millis(1));

        let created = vec![
            ("http.path".to_string(), "/categories".to_string()),
            ("http.status".to_string(), "201".to_string()),
        ];
        let missing = vec![
            ("http.path".to_string(), "/categories/{id}".to_string()),
            ("http.status".to_string(), "404".to_string()),
        ];

        let counts = capture.sums(REQUESTS_TOTAL);
        assert_eq!(counts.len(), 2);
        assert_eq!(testing::point(&counts, &created), Some(2));
        assert_eq!(testing::point(&counts, &missing), Some(1));

        let histogram = capture.histogram(REQUEST_DURATION_SECONDS);
        assert_eq!(histogram.unit, "s");
        let (count, sum) = testing::point(&histogram.points, &created).unwrap();
        assert_eq!(count, 2);
        assert!((sum - 0.010).abs() < 1e-9);
        assert_eq!(testing::point(&histogram.points, &missing).map(|(c, _)| c), Some(1));
    }
}
