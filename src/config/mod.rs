//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML, optional)
//!     → loader.rs (parse & deserialize)
//!     → environment overrides (OTEL_*, APP_LOG_*, ELASTICSEARCH_URL)
//!     → validation.rs (semantic checks)
//!     → AppConfig (validated, immutable)
//! ```
//!
//! # Design Decisions
//! - Config is read once at startup; telemetry singletons are never rebuilt
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::AppConfig;
pub use schema::AuditLogConfig;
pub use schema::IndexConfig;
pub use schema::LogFormat;
pub use schema::ServerConfig;
pub use schema::TelemetryConfig;
