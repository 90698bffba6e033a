//! Configuration validation.
//!
//! Serde handles syntax; this module checks values that would only fail
//! later, at exporter or listener construction. Every error is reported,
//! not just the first.

use std::fmt;
use std::net::SocketAddr;

use url::Url;

use crate::config::schema::AppConfig;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a configuration, returning every error found.
pub fn validate_config(config: &AppConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.server.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "server.bind_address",
            format!("'{}' is not a socket address", config.server.bind_address),
        ));
    }
    if config.server.request_timeout_secs == 0 {
        errors.push(ValidationError::new("server.request_timeout_secs", "must be greater than 0"));
    }
    if config.server.max_body_bytes == 0 {
        errors.push(ValidationError::new("server.max_body_bytes", "must be greater than 0"));
    }

    let telemetry = &config.telemetry;
    if telemetry.service_name.trim().is_empty() {
        errors.push(ValidationError::new("telemetry.service_name", "must not be empty"));
    }
    if !is_collector_endpoint(&telemetry.collector_endpoint) {
        errors.push(ValidationError::new(
            "telemetry.collector_endpoint",
            format!("'{}' is neither host:port nor a URL", telemetry.collector_endpoint),
        ));
    }
    if telemetry.export_timeout_secs == 0 {
        errors.push(ValidationError::new("telemetry.export_timeout_secs", "must be greater than 0"));
    }
    if telemetry.metric_interval_secs == 0 {
        errors.push(ValidationError::new("telemetry.metric_interval_secs", "must be greater than 0"));
    }

    let audit = &config.audit_log;
    if audit.path.trim().is_empty() {
        errors.push(ValidationError::new("audit_log.path", "must not be empty"));
    }
    if audit.index.enabled {
        if Url::parse(&audit.index.url).is_err() {
            errors.push(ValidationError::new(
                "audit_log.index.url",
                format!("'{}' is not a URL", audit.index.url),
            ));
        }
        if audit.index.index.trim().is_empty() || audit.index.index.contains('/') {
            errors.push(ValidationError::new("audit_log.index.index", "must be a non-empty index name"));
        }
        if audit.index.timeout_ms == 0 {
            errors.push(ValidationError::new("audit_log.index.timeout_ms", "must be greater than 0"));
        }
        if audit.index.queue_capacity == 0 {
            errors.push(ValidationError::new("audit_log.index.queue_capacity", "must be greater than 0"));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn is_collector_endpoint(endpoint: &str) -> bool {
    let endpoint = endpoint.trim();
    if endpoint.contains("://") {
        return Url::parse(endpoint).map(|u| u.host().is_some()).unwrap_or(false);
    }
    match endpoint.rsplit_once(':') {
        Some((host, port)) => !host.is_empty() && port.parse::<u16>().is_ok(),
        None => false,
    }
}
