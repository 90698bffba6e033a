//! Search index sink.
//!
//! # Responsibilities
//! - Post audit documents to `{url}/{index}/_doc`
//! - Classify every attempt as delivered or dropped, with the reason
//! - Drain the dispatch queue on a background task, off the request path
//!
//! # Design Decisions
//! - Best effort: no retries, failures become a local `[ERROR]` line
//! - Every attempt is bounded by the client timeout
//! - During the final drain, the first unreachable response drops the rest

use std::fmt;
use std::panic::Location;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use opentelemetry::metrics::noop::NoopMeterProvider;
use opentelemetry::metrics::{Counter, Meter, MeterProvider as _};
use opentelemetry::KeyValue;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use tokio::sync::{broadcast, mpsc};
use url::Url;

use crate::config::IndexConfig;
use crate::observability::audit::{LocalLog, LogDocument, LogLevel};
use crate::observability::metrics::{index_drop_counter, LABEL_REASON, LOG_INDEX_DROPPED_TOTAL};
use crate::observability::TelemetryError;

/// Why an entry did not reach the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// The dispatch queue was at capacity.
    QueueFull,
    /// Transport failure, timeout, or a non-success status from the index.
    SinkUnavailable(String),
    /// The document could not be encoded, or the index rejected it as invalid.
    MalformedPayload(String),
}

impl DropReason {
    /// Value of the `reason` label on the dropped-entries counter.
    pub fn label(&self) -> &'static str {
        match self {
            DropReason::QueueFull => "queue_full",
            DropReason::SinkUnavailable(_) => "sink_unavailable",
            DropReason::MalformedPayload(_) => "malformed_payload",
        }
    }
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::QueueFull => write!(f, "dispatch queue full"),
            DropReason::SinkUnavailable(e) => write!(f, "sink unavailable: {}", e),
            DropReason::MalformedPayload(e) => write!(f, "malformed payload: {}", e),
        }
    }
}

/// Result of one submission attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexOutcome {
    Delivered,
    Dropped(DropReason),
}

/// Delivery counters, shared between the logger and its worker.
///
/// Drops are also exported as `log_index_dropped_total` on the meter the
/// stats were built with.
#[derive(Debug)]
pub struct IndexStats {
    pub delivered: AtomicU64,
    pub unavailable: AtomicU64,
    pub malformed: AtomicU64,
    pub queue_full: AtomicU64,
    drops: Counter<u64>,
}

impl IndexStats {
    pub fn new(meter: &Meter) -> Result<Self, TelemetryError> {
        Ok(Self {
            delivered: AtomicU64::new(0),
            unavailable: AtomicU64::new(0),
            malformed: AtomicU64::new(0),
            queue_full: AtomicU64::new(0),
            drops: index_drop_counter(meter)?,
        })
    }

    pub fn dropped(&self) -> u64 {
        self.unavailable.load(Ordering::Relaxed)
            + self.malformed.load(Ordering::Relaxed)
            + self.queue_full.load(Ordering::Relaxed)
    }

    pub(crate) fn count(&self, outcome: &IndexOutcome) {
        match outcome {
            IndexOutcome::Delivered => {
                self.delivered.fetch_add(1, Ordering::Relaxed);
            }
            IndexOutcome::Dropped(reason) => self.record_drops(reason, 1),
        }
    }

    pub(crate) fn record_drops(&self, reason: &DropReason, n: u64) {
        let counter = match reason {
            DropReason::QueueFull => &self.queue_full,
            DropReason::SinkUnavailable(_) => &self.unavailable,
            DropReason::MalformedPayload(_) => &self.malformed,
        };
        counter.fetch_add(n, Ordering::Relaxed);
        self.drops.add(n, &[KeyValue::new(LABEL_REASON, reason.label())]);
    }
}

impl Default for IndexStats {
    /// Counters only; the drop metric goes to a no-op meter.
    fn default() -> Self {
        let meter = NoopMeterProvider::new().meter("noop");
        Self {
            delivered: AtomicU64::new(0),
            unavailable: AtomicU64::new(0),
            malformed: AtomicU64::new(0),
            queue_full: AtomicU64::new(0),
            drops: meter.u64_counter(LOG_INDEX_DROPPED_TOTAL).init(),
        }
    }
}

/// HTTP client for the document endpoint of one index.
#[derive(Clone)]
pub struct IndexClient {
    http: reqwest::Client,
    endpoint: Url,
}

impl IndexClient {
    pub fn new(config: &IndexConfig) -> Result<Self, TelemetryError> {
        let endpoint = document_endpoint(&config.url, &config.index)?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| TelemetryError::IndexClient(e.to_string()))?;
        Ok(Self { http, endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Submit one document. Never returns an error; the outcome says why not.
    pub async fn submit(&self, doc: &LogDocument) -> IndexOutcome {
        let body = match serde_json::to_vec(doc) {
            Ok(body) => body,
            Err(e) => return IndexOutcome::Dropped(DropReason::MalformedPayload(e.to_string())),
        };

        let result = self
            .http
            .post(self.endpoint.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await;

        match result {
            Ok(response) => classify_status(response.status()),
            Err(e) => IndexOutcome::Dropped(DropReason::SinkUnavailable(e.to_string())),
        }
    }
}

fn classify_status(status: StatusCode) -> IndexOutcome {
    if status.is_success() {
        IndexOutcome::Delivered
    } else if status == StatusCode::BAD_REQUEST {
        IndexOutcome::Dropped(DropReason::MalformedPayload(format!("index rejected document: {}", status)))
    } else {
        IndexOutcome::Dropped(DropReason::SinkUnavailable(format!("index responded {}", status)))
    }
}

/// `{base}/{index}/_doc`, keeping any path prefix of `base`.
pub fn document_endpoint(base: &str, index: &str) -> Result<Url, TelemetryError> {
    let mut url = Url::parse(base).map_err(|e| TelemetryError::IndexClient(format!("{}: {}", base, e)))?;
    if url.cannot_be_a_base() {
        return Err(TelemetryError::IndexClient(format!("{}: not a base URL", base)));
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url.join(&format!("{}/_doc", index))
        .map_err(|e| TelemetryError::IndexClient(e.to_string()))
}

/// Background task moving queued documents to the index.
pub struct IndexWorker {
    client: IndexClient,
    queue: mpsc::Receiver<LogDocument>,
    local: Arc<LocalLog>,
    stats: Arc<IndexStats>,
}

impl IndexWorker {
    pub fn new(
        client: IndexClient,
        queue: mpsc::Receiver<LogDocument>,
        local: Arc<LocalLog>,
        stats: Arc<IndexStats>,
    ) -> Self {
        Self {
            client,
            queue,
            local,
            stats,
        }
    }

    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        tracing::debug!(endpoint = %self.client.endpoint(), "Index worker starting");

        loop {
            tokio::select! {
                doc = self.queue.recv() => match doc {
                    Some(doc) => {
                        self.deliver(&doc).await;
                    }
                    None => break,
                },
                _ = shutdown.recv() => {
                    tracing::debug!("Index worker received shutdown signal, draining queue");
                    break;
                }
            }
        }

        self.drain().await;
        tracing::debug!("Index worker stopped");
    }

    async fn drain(&mut self) {
        self.queue.close();
        while let Some(doc) = self.queue.recv().await {
            if let IndexOutcome::Dropped(DropReason::SinkUnavailable(_)) = self.deliver(&doc).await {
                let mut abandoned = 0u64;
                while self.queue.recv().await.is_some() {
                    abandoned += 1;
                }
                if abandoned > 0 {
                    self.stats.record_drops(
                        &DropReason::SinkUnavailable("abandoned at shutdown".into()),
                        abandoned,
                    );
                    self.local.append_now(
                        LogLevel::Error,
                        &format!("dropped {} queued log documents at shutdown: index unavailable", abandoned),
                        Location::caller(),
                    );
                }
                break;
            }
        }
    }

    async fn deliver(&self, doc: &LogDocument) -> IndexOutcome {
        let outcome = self.client.submit(doc).await;
        self.stats.count(&outcome);
        if let IndexOutcome::Dropped(reason) = &outcome {
            self.local.append_now(
                LogLevel::Error,
                &format!("failed to index log to search index: {}", reason),
                Location::caller(),
            );
        }
        outcome
    }
}
