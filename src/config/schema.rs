//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the service.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the categories service.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// HTTP listener settings.
    pub server: ServerConfig,

    /// Trace and metric export settings.
    pub telemetry: TelemetryConfig,

    /// Dual-sink audit log settings.
    pub audit_log: AuditLogConfig,
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:3000").
    pub bind_address: String,

    /// Handler time budget in seconds; slower requests get 408.
    pub request_timeout_secs: u64,

    /// Largest accepted request body; larger ones get 413.
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3000".to_string(),
            request_timeout_secs: 30,
            max_body_bytes: 2 * 1024 * 1024,
        }
    }
}

/// Format of the diagnostic log written to stdout.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Telemetry export configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Service name attached as `service.name` to every span and metric.
    pub service_name: String,

    /// Collector address, `host:port` or a full URL.
    pub collector_endpoint: String,

    /// Plaintext gRPC channel to the collector. When false, TLS is used.
    pub insecure: bool,

    /// Exporter request timeout in seconds.
    pub export_timeout_secs: u64,

    /// Interval of the periodic metric reader in seconds.
    pub metric_interval_secs: u64,

    /// Diagnostic log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Diagnostic log format.
    pub log_format: LogFormat,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "categories-service".to_string(),
            collector_endpoint: "otel-collector:4317".to_string(),
            insecure: true,
            export_timeout_secs: 10,
            metric_interval_secs: 60,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
        }
    }
}

impl TelemetryConfig {
    /// Collector endpoint as a URL the gRPC exporter accepts.
    ///
    /// A bare `host:port` gets an `http://` or `https://` scheme depending on
    /// [`TelemetryConfig::insecure`].
    pub fn collector_url(&self) -> String {
        let endpoint = self.collector_endpoint.trim();
        if endpoint.contains("://") {
            return endpoint.to_string();
        }
        let scheme = if self.insecure { "http" } else { "https" };
        format!("{}://{}", scheme, endpoint)
    }
}

/// Dual-sink audit log configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuditLogConfig {
    /// Path of the local append-only log file.
    pub path: String,

    /// Remote search index, the best-effort second sink.
    pub index: IndexConfig,
}

impl Default for AuditLogConfig {
    fn default() -> Self {
        Self {
            path: "app.log".to_string(),
            index: IndexConfig::default(),
        }
    }
}

/// Search index sink configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Submit log documents to the index.
    pub enabled: bool,

    /// Base URL of the search index.
    pub url: String,

    /// Index that receives log documents.
    pub index: String,

    /// Per-document HTTP timeout in milliseconds.
    pub timeout_ms: u64,

    /// Capacity of the dispatch queue between callers and the index worker.
    pub queue_capacity: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: "http://elasticsearch:9200".to_string(),
            index: "app-logs".to_string(),
            timeout_ms: 2000,
            queue_capacity: 1024,
        }
    }
}
