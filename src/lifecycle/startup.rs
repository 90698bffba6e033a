//! Startup orchestration.
//!
//! # Order
//! ```text
//! trace provider → meter provider → diagnostic subscriber
//!     → audit log (file + index worker) → store → listener
//! ```
//!
//! Any failure aborts startup. Providers already built are shut down in
//! reverse order when the [`TelemetryGuard`] drops.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;

use crate::categories::MemoryStore;
use crate::config::{AppConfig, ConfigError};
use crate::http::{AppState, HttpServer};
use crate::lifecycle::{signals, Shutdown};
use crate::observability::logging::init_subscriber;
use crate::observability::tracing::TraceProvider;
use crate::observability::{DualSinkLogger, LogLevel, RequestInstruments, ShutdownFn, TelemetryError};

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Telemetry(#[from] TelemetryError),

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),
}

/// Owns provider shutdown hooks and runs each exactly once, newest first.
#[derive(Default)]
pub struct TelemetryGuard {
    hooks: Vec<(&'static str, ShutdownFn)>,
}

impl TelemetryGuard {
    pub fn push(&mut self, name: &'static str, hook: ShutdownFn) {
        self.hooks.push((name, hook));
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Run all hooks now, in reverse registration order.
    pub fn shutdown(mut self) {
        self.release();
    }

    fn release(&mut self) {
        while let Some((name, hook)) = self.hooks.pop() {
            match hook() {
                Ok(()) => tracing::info!(provider = name, "Telemetry provider shut down"),
                Err(e) => tracing::error!(provider = name, error = %e, "Telemetry provider shutdown failed"),
            }
        }
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        self.release();
    }
}

/// A fully started service, ready to accept traffic.
pub struct Application {
    server: HttpServer,
    listener: TcpListener,
    log: Arc<DualSinkLogger>,
    guard: TelemetryGuard,
    shutdown: Shutdown,
}

impl Application {
    /// Initialize every subsystem in dependency order.
    pub async fn start(config: AppConfig) -> Result<Self, StartupError> {
        let mut guard = TelemetryGuard::default();

        let (traces, trace_shutdown) = TraceProvider::init(&config.telemetry)?;
        guard.push("traces", trace_shutdown);

        let (instruments, meter_shutdown) = RequestInstruments::init(&config.telemetry)?;
        guard.push("metrics", meter_shutdown);

        init_subscriber(&config.telemetry, &traces)?;
        tracing::info!(
            service = %config.telemetry.service_name,
            collector = %config.telemetry.collector_url(),
            "Telemetry initialized"
        );

        let log = Arc::new(DualSinkLogger::open_metered(&config.audit_log, instruments.meter())?);

        let state = AppState {
            store: Arc::new(MemoryStore::new()),
            metrics: Arc::new(instruments),
            log: log.clone(),
            body_limit: config.server.max_body_bytes,
        };

        let listener = TcpListener::bind(&config.server.bind_address)
            .await
            .map_err(|source| StartupError::Bind {
                address: config.server.bind_address.clone(),
                source,
            })?;

        log.log(
            LogLevel::Info,
            format!("{} started on {}", config.telemetry.service_name, config.server.bind_address),
        );

        Ok(Self {
            server: HttpServer::new(&config.server, state),
            listener,
            log,
            guard,
            shutdown: Shutdown::new(),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Handle to stop the application from outside.
    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Serve until a shutdown signal, then release everything in reverse order.
    pub async fn run(self) -> Result<(), StartupError> {
        let Self {
            server,
            listener,
            log,
            guard,
            shutdown,
        } = self;

        signals::spawn_signal_listener(&shutdown);
        let served = server.run(listener, shutdown.subscribe()).await;

        log.log(LogLevel::Info, "service stopping");
        log.close().await;
        guard.shutdown();

        served.map_err(StartupError::Serve)
    }
}
