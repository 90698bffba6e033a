//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::Path;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use dashmap::DashMap;
use tokio::net::TcpListener;
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Id, Record};
use tracing::Subscriber;
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

use categories_service::categories::{Category, CategoryStore, MemoryStore, StoreError};
use categories_service::config::{AuditLogConfig, IndexConfig, ServerConfig};
use categories_service::observability::{DualSinkLogger, RequestRecorder};
use categories_service::{AppState, HttpServer};

/// A unique log file path under the temp dir.
pub fn temp_log_path() -> PathBuf {
    std::env::temp_dir().join(format!("categories-it-{}.log", uuid::Uuid::new_v4()))
}

pub fn read_lines(path: &PathBuf) -> Vec<String> {
    std::fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

pub fn local_only_config(path: &PathBuf) -> AuditLogConfig {
    AuditLogConfig {
        path: path.display().to_string(),
        index: IndexConfig {
            enabled: false,
            ..IndexConfig::default()
        },
    }
}

pub fn indexed_config(path: &PathBuf, index_url: String) -> AuditLogConfig {
    AuditLogConfig {
        path: path.display().to_string(),
        index: IndexConfig {
            enabled: true,
            url: index_url,
            index: "app-logs".into(),
            timeout_ms: 500,
            queue_capacity: 64,
        },
    }
}

/// An address nothing listens on.
pub async fn unreachable_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

/// A search index stand-in recording every document it receives.
pub struct MockIndex {
    pub addr: SocketAddr,
    pub docs: Arc<Mutex<Vec<(String, serde_json::Value)>>>,
}

impl MockIndex {
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn received(&self) -> Vec<(String, serde_json::Value)> {
        self.docs.lock().unwrap().clone()
    }
}

/// Start a programmable mock index on an ephemeral port.
///
/// `respond` decides the status code of each `POST /{index}/_doc`.
pub async fn start_mock_index<F, Fut>(respond: F) -> MockIndex
where
    F: Fn() -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = u16> + Send + 'static,
{
    let docs = Arc::new(Mutex::new(Vec::new()));
    let captured = docs.clone();

    let app = Router::new().route(
        "/{index}/_doc",
        post(move |Path(index): Path<String>, Json(doc): Json<serde_json::Value>| {
            let captured = captured.clone();
            let respond = respond.clone();
            async move {
                captured.lock().unwrap().push((index, doc));
                let status = respond().await;
                StatusCode::from_u16(status).unwrap()
            }
        }),
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    MockIndex { addr, docs }
}

/// Start a mock index that always answers with `status`.
pub async fn start_fixed_index(status: u16) -> MockIndex {
    start_mock_index(move || async move { status }).await
}

/// Start a mock index that answers only after `delay`.
pub async fn start_slow_index(delay: Duration) -> MockIndex {
    start_mock_index(move || async move {
        tokio::time::sleep(delay).await;
        201
    })
    .await
}

/// In-memory request recorder: one entry per label pair.
#[derive(Default)]
pub struct MemoryRecorder {
    series: DashMap<(String, u16), Vec<Duration>>,
}

impl MemoryRecorder {
    /// Counter value for one label pair.
    pub fn count(&self, path: &str, status: u16) -> usize {
        self.series
            .get(&(path.to_string(), status))
            .map(|r| r.len())
            .unwrap_or(0)
    }

    /// Histogram observations for one label pair.
    pub fn observations(&self, path: &str, status: u16) -> Vec<Duration> {
        self.series
            .get(&(path.to_string(), status))
            .map(|r| r.value().clone())
            .unwrap_or_default()
    }

    /// Counter total across every label pair.
    pub fn total(&self) -> usize {
        self.series.iter().map(|r| r.value().len()).sum()
    }

    pub fn label_pairs(&self) -> Vec<(String, u16)> {
        let mut pairs: Vec<_> = self.series.iter().map(|r| r.key().clone()).collect();
        pairs.sort();
        pairs
    }
}

impl RequestRecorder for MemoryRecorder {
    fn record(&self, path: &str, status: u16, elapsed: Duration) {
        self.series
            .entry((path.to_string(), status))
            .or_default()
            .push(elapsed);
    }
}

/// A store whose backend is down.
pub struct FailingStore;

impl CategoryStore for FailingStore {
    fn list(&self) -> Result<Vec<Category>, StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }
    fn get(&self, _id: u64) -> Result<Option<Category>, StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }
    fn create(&self, _name: String) -> Result<Category, StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }
    fn update(&self, _id: u64, _name: String) -> Result<Option<Category>, StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }
    fn delete(&self, _id: u64) -> Result<bool, StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }
}

/// Everything a router test needs to inspect afterwards.
pub struct TestApp {
    pub router: Router,
    pub recorder: Arc<MemoryRecorder>,
    pub log: Arc<DualSinkLogger>,
    pub log_path: PathBuf,
}

pub fn test_app_with_store(store: Arc<dyn CategoryStore>) -> TestApp {
    let log_path = temp_log_path();
    let log = Arc::new(DualSinkLogger::open(&local_only_config(&log_path)).unwrap());
    let recorder = Arc::new(MemoryRecorder::default());
    let state = AppState {
        store,
        metrics: recorder.clone(),
        log: log.clone(),
        body_limit: ServerConfig::default().max_body_bytes,
    };
    TestApp {
        router: HttpServer::build_router(&ServerConfig::default(), state),
        recorder,
        log,
        log_path,
    }
}

pub fn test_app() -> TestApp {
    test_app_with_store(Arc::new(MemoryStore::new()))
}

/// A span as seen when it closed.
#[derive(Debug, Clone)]
pub struct ClosedSpan {
    pub name: String,
    pub fields: HashMap<String, String>,
}

#[derive(Default)]
struct LedgerState {
    opened: Vec<String>,
    closed: Vec<ClosedSpan>,
}

/// Fake tracer: a layer counting span starts and ends and keeping the
/// fields recorded on each span.
#[derive(Clone, Default)]
pub struct SpanLedger {
    state: Arc<Mutex<LedgerState>>,
}

impl SpanLedger {
    pub fn opened(&self, name: &str) -> usize {
        self.state.lock().unwrap().opened.iter().filter(|n| *n == name).count()
    }

    pub fn closed(&self, name: &str) -> Vec<ClosedSpan> {
        self.state
            .lock()
            .unwrap()
            .closed
            .iter()
            .filter(|s| s.name == name)
            .cloned()
            .collect()
    }

    /// The only closed span named `name`; panics on zero or several.
    pub fn single(&self, name: &str) -> ClosedSpan {
        let closed = self.closed(name);
        assert_eq!(closed.len(), 1, "expected exactly one closed {} span", name);
        closed.into_iter().next().unwrap()
    }
}

#[derive(Default)]
struct SpanFields(HashMap<String, String>);

struct FieldVisitor<'a>(&'a mut HashMap<String, String>);

impl Visit for FieldVisitor<'_> {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.0.insert(field.name().to_string(), value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.0.insert(field.name().to_string(), format!("{:?}", value));
    }
}

impl<S> Layer<S> for SpanLedger
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        let mut fields = SpanFields::default();
        attrs.record(&mut FieldVisitor(&mut fields.0));
        if let Some(span) = ctx.span(id) {
            span.extensions_mut().insert(fields);
        }
        self.state
            .lock()
            .unwrap()
            .opened
            .push(attrs.metadata().name().to_string());
    }

    fn on_record(&self, id: &Id, values: &Record<'_>, ctx: Context<'_, S>) {
        if let Some(span) = ctx.span(id) {
            let mut extensions = span.extensions_mut();
            if let Some(fields) = extensions.get_mut::<SpanFields>() {
                values.record(&mut FieldVisitor(&mut fields.0));
            }
        }
    }

    fn on_close(&self, id: Id, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(&id) else {
            return;
        };
        let fields = span
            .extensions()
            .get::<SpanFields>()
            .map(|f| f.0.clone())
            .unwrap_or_default();
        self.state.lock().unwrap().closed.push(ClosedSpan {
            name: span.name().to_string(),
            fields,
        });
    }
}

/// Install `ledger` as this thread's subscriber for the guard's lifetime.
pub fn install_ledger(ledger: &SpanLedger) -> tracing::subscriber::DefaultGuard {
    use tracing_subscriber::layer::SubscriberExt;
    tracing::subscriber::set_default(tracing_subscriber::registry().with(ledger.clone()))
}
