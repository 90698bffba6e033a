//! Configuration loading from disk and environment.

use std::fs;
use std::path::Path;

use crate::config::schema::AppConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Env { key: &'static str, value: String },
    Validation(Vec<ValidationError>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Env { key, value } => {
                write!(f, "Invalid value '{}' for environment variable {}", value, key)
            }
            ConfigError::Validation(errors) => {
                write!(f, "Validation failed: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 { write!(f, ", ")?; }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Load configuration from an optional TOML file, apply environment
/// overrides and validate the result.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let mut config = match path {
        Some(path) => {
            let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
            toml::from_str(&content).map_err(ConfigError::Parse)?
        }
        None => AppConfig::default(),
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Overlay telemetry-relevant environment variables on top of `config`.
///
/// `lookup` abstracts the environment so callers can supply a fixed map.
pub fn apply_env_overrides<F>(config: &mut AppConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = lookup("OTEL_EXPORTER_OTLP_ENDPOINT") {
        config.telemetry.collector_endpoint = v;
    }
    if let Some(v) = lookup("OTEL_SERVICE_NAME") {
        config.telemetry.service_name = v;
    }
    if let Some(v) = lookup("OTEL_EXPORTER_OTLP_INSECURE") {
        config.telemetry.insecure = parse_bool("OTEL_EXPORTER_OTLP_INSECURE", v)?;
    }
    if let Some(v) = lookup("APP_LOG_PATH") {
        config.audit_log.path = v;
    }
    if let Some(v) = lookup("ELASTICSEARCH_URL") {
        config.audit_log.index.url = v;
    }
    if let Some(v) = lookup("APP_LOG_INDEX_ENABLED") {
        config.audit_log.index.enabled = parse_bool("APP_LOG_INDEX_ENABLED", v)?;
    }
    if let Some(v) = lookup("BIND_ADDRESS") {
        config.server.bind_address = v;
    }
    Ok(())
}

fn parse_bool(key: &'static str, value: String) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        _ => Err(ConfigError::Env { key, value }),
    }
}
