//! Categories service library.
//!
//! A small CRUD API whose real weight is its observability layer: per-request
//! spans, request count and duration metrics exported over OTLP, and an audit
//! log written locally and indexed into a search store on a best-effort basis.

pub mod categories;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;

pub use config::AppConfig;
pub use http::{AppState, HttpServer};
pub use lifecycle::{Application, Shutdown};
