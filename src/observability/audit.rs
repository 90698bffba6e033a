//! Dual-sink audit logging.
//!
//! # Responsibilities
//! - Append one line per entry to the local log file (the durable record)
//! - Hand the same entry to the search index worker, best effort
//!
//! # Design Decisions
//! - The local append always happens, and happens before any index attempt
//! - `log` never fails and never waits on the network; a full queue drops
//! - Writes are serialized through a mutex so lines never interleave

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::panic::Location;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{SecondsFormat, Utc};
use opentelemetry::metrics::Meter;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

use crate::config::AuditLogConfig;
use crate::lifecycle::Shutdown;
use crate::observability::index::{DropReason, IndexClient, IndexStats, IndexWorker};
use crate::observability::TelemetryError;

/// Prefix of every local log line.
pub const LINE_PREFIX: &str = "APP_LOG";

/// Severity of an audit entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// Document submitted to the search index.
#[derive(Debug, Clone, Serialize)]
pub struct LogDocument {
    pub level: LogLevel,
    pub message: String,
    /// RFC3339, UTC.
    pub timestamp: String,
}

/// What happened to the index half of a `log` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// The index sink is disabled.
    LocalOnly,
    /// Handed to the index worker.
    Queued,
    /// Not handed to the index worker.
    Dropped(DropReason),
}

/// Result of one `log` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogReceipt {
    /// The local line was written.
    pub appended: bool,
    pub dispatch: Dispatch,
}

/// The local append-only destination.
pub struct LocalLog {
    file: Mutex<File>,
}

impl LocalLog {
    /// Open (or create) the file in append mode.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, TelemetryError> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|source| TelemetryError::LogFile {
                path: path.display().to_string(),
                source,
            })?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }

    /// Append a single formatted line.
    pub fn append(
        &self,
        level: LogLevel,
        message: &str,
        timestamp: &str,
        location: &Location<'_>,
    ) -> std::io::Result<()> {
        let line = format_line(level, message, timestamp, location);
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        file.write_all(line.as_bytes())
    }

    /// Append a line stamped with the current time, reporting write failures
    /// to the diagnostic log instead of the caller.
    pub(crate) fn append_now(&self, level: LogLevel, message: &str, location: &Location<'_>) -> bool {
        match self.append(level, message, &now_rfc3339(), location) {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(error = %e, "Failed to append to local log");
                false
            }
        }
    }
}

/// `APP_LOG <timestamp> <file>:<line>: [LEVEL] message\n`
pub fn format_line(level: LogLevel, message: &str, timestamp: &str, location: &Location<'_>) -> String {
    let file = Path::new(location.file())
        .file_name()
        .and_then(|f| f.to_str())
        .unwrap_or_else(|| location.file());
    let message = message.replace('\r', "\\r").replace('\n', "\\n");
    format!(
        "{} {} {}:{}: [{}] {}\n",
        LINE_PREFIX,
        timestamp,
        file,
        location.line(),
        level,
        message
    )
}

pub(crate) fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// The process-wide audit logger: local file plus optional search index.
pub struct DualSinkLogger {
    local: Arc<LocalLog>,
    queue: Option<mpsc::Sender<LogDocument>>,
    stats: Arc<IndexStats>,
    stop: Shutdown,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl DualSinkLogger {
    /// Open the local log and, when enabled, spawn the index worker.
    ///
    /// Drops are counted in [`IndexStats`] only. Use [`open_metered`] to also
    /// export them.
    ///
    /// [`open_metered`]: DualSinkLogger::open_metered
    pub fn open(config: &AuditLogConfig) -> Result<Self, TelemetryError> {
        Self::open_with_stats(config, IndexStats::default())
    }

    /// Like [`open`](DualSinkLogger::open), exporting index drops on `meter`.
    pub fn open_metered(config: &AuditLogConfig, meter: &Meter) -> Result<Self, TelemetryError> {
        Self::open_with_stats(config, IndexStats::new(meter)?)
    }

    /// An unusable index configuration is fatal here; an unreachable index
    /// is not, since nothing is sent until the first entry.
    fn open_with_stats(config: &AuditLogConfig, stats: IndexStats) -> Result<Self, TelemetryError> {
        let local = Arc::new(LocalLog::open(&config.path)?);
        let stats = Arc::new(stats);
        let stop = Shutdown::new();

        let (queue, worker) = if config.index.enabled {
            let client = IndexClient::new(&config.index)?;
            let runtime = Handle::try_current().map_err(|e| {
                TelemetryError::IndexClient(format!("index worker needs a Tokio runtime: {}", e))
            })?;
            let (tx, rx) = mpsc::channel(config.index.queue_capacity);
            let worker = IndexWorker::new(client, rx, local.clone(), stats.clone());
            let handle = runtime.spawn(worker.run(stop.subscribe()));
            tracing::info!(
                path = %config.path,
                index = %config.index.index,
                url = %config.index.url,
                "Audit log opened with search index sink"
            );
            (Some(tx), Some(handle))
        } else {
            tracing::info!(path = %config.path, "Audit log opened, search index disabled");
            (None, None)
        };

        Ok(Self {
            local,
            queue,
            stats,
            stop,
            worker: Mutex::new(worker),
        })
    }

    /// Record one entry. Never fails and never blocks on the index.
    #[track_caller]
    pub fn log(&self, level: LogLevel, message: impl Into<String>) -> LogReceipt {
        let location = Location::caller();
        let message = message.into();
        let timestamp = now_rfc3339();

        let appended = match self.local.append(level, &message, &timestamp, location) {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(error = %e, "Failed to append to local log");
                false
            }
        };

        let dispatch = match &self.queue {
            None => Dispatch::LocalOnly,
            Some(queue) => {
                let doc = LogDocument {
                    level,
                    message,
                    timestamp,
                };
                let reason = match queue.try_send(doc) {
                    Ok(()) => None,
                    Err(TrySendError::Full(_)) => Some(DropReason::QueueFull),
                    Err(TrySendError::Closed(_)) => {
                        Some(DropReason::SinkUnavailable("index worker stopped".into()))
                    }
                };
                match reason {
                    None => Dispatch::Queued,
                    Some(reason) => {
                        self.stats.record_drops(&reason, 1);
                        if matches!(reason, DropReason::SinkUnavailable(_)) {
                            self.local.append_now(
                                LogLevel::Error,
                                &format!("failed to index log to search index: {}", reason),
                                location,
                            );
                        }
                        Dispatch::Dropped(reason)
                    }
                }
            }
        };

        LogReceipt { appended, dispatch }
    }

    /// Delivery counters of the index sink.
    pub fn stats(&self) -> &IndexStats {
        &self.stats
    }

    /// Total entries that never reached the index.
    pub fn dropped(&self) -> u64 {
        self.stats.dropped()
    }

    /// Stop the index worker after it drains the queue. Idempotent.
    pub async fn close(&self) {
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            self.stop.trigger();
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Index worker terminated abnormally");
            }
        }
    }
}
