//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum Router with all handlers
//! - Wire up middleware (request ID, diagnostic tracing, request deadline)
//! - Bind the server to a listener and serve until shutdown

use std::sync::Arc;
use std::time::Duration;

use axum::{Extension, Router};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::{
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::categories::{self, CategoryStore};
use crate::config::ServerConfig;
use crate::http::request::{UuidRequestId, X_REQUEST_ID};
use crate::observability::instrument::RequestDeadline;
use crate::observability::{DualSinkLogger, RequestRecorder};

/// Application context injected into handlers.
///
/// Built once at startup; every handler reaches shared state only
/// through it.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn CategoryStore>,
    pub metrics: Arc<dyn RequestRecorder>,
    pub log: Arc<DualSinkLogger>,
    /// Largest request body a handler will buffer.
    pub body_limit: usize,
}

/// HTTP server for the categories API.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration.
    pub fn new(config: &ServerConfig, state: AppState) -> Self {
        Self {
            router: Self::build_router(config, state),
        }
    }

    /// Build the Axum router with all middleware layers.
    ///
    /// The deadline is handed to the handlers rather than enforced by a
    /// layer, so timed-out requests are still measured.
    pub fn build_router(config: &ServerConfig, state: AppState) -> Router {
        categories::routes()
            .with_state(state)
            .layer(Extension(RequestDeadline(Duration::from_secs(config.request_timeout_secs))))
            .layer(PropagateRequestIdLayer::new(X_REQUEST_ID))
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::new(X_REQUEST_ID, UuidRequestId))
    }

    /// The router, for serving on a custom transport or for tests.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Run the server, accepting connections on the given listener until
    /// `shutdown` fires, then drain in-flight requests.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            "HTTP server starting"
        );

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("HTTP server draining");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}
