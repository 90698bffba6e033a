//! Per-request instrumentation.
//!
//! Every handler body runs inside [`instrument`], which owns the request span,
//! measures elapsed time and records exactly one counter increment and one
//! histogram observation, labeled with the status actually sent.
//!
//! The span is a `tracing` span exported through the OpenTelemetry bridge.
//! It ends when its last handle drops, so it ends exactly once on every exit
//! path, including a dropped (cancelled) handler future.
//!
//! The request deadline is enforced here as well, so a timed-out request is
//! answered with 408 and measured like any other.

use std::convert::Infallible;
use std::fmt::Display;
use std::future::Future;
use std::time::{Duration, Instant};

use axum::extract::{FromRequestParts, MatchedPath};
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use opentelemetry::propagation::Extractor;
use opentelemetry::trace::TraceContextExt;
use opentelemetry::{global, Context};
use tracing::{Instrument, Span};
use tracing_opentelemetry::OpenTelemetrySpanExt;

use crate::observability::metrics::RequestRecorder;

/// Open a request span with the fields [`instrument`] records into.
///
/// Extra fields (e.g. `category.id = %id`) go after the name.
#[macro_export]
macro_rules! request_span {
    ($name:literal $(, $($fields:tt)+)?) => {
        ::tracing::info_span!(
            $name,
            $($($fields)+,)?
            otel.kind = "server",
            otel.status_code = ::tracing::field::Empty,
            error = ::tracing::field::Empty
        )
    };
}

/// Time budget of one request, installed as a request extension by the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestDeadline(pub Duration);

/// Request attributes the wrapper needs, extracted before the handler runs.
#[derive(Debug, Clone)]
pub struct RequestMeta {
    /// Matched route template, or the raw path when no route matched.
    pub path: String,
    /// Remote trace context propagated by the caller, if any.
    pub parent: Context,
    /// Handler time budget; `None` runs unbounded.
    pub deadline: Option<Duration>,
}

impl RequestMeta {
    pub fn new(path: impl Into<String>, headers: &HeaderMap) -> Self {
        let parent = global::get_text_map_propagator(|p| p.extract(&HeaderExtractor(headers)));
        Self {
            path: path.into(),
            parent,
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

impl<S> FromRequestParts<S> for RequestMeta
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let path = parts
            .extensions
            .get::<MatchedPath>()
            .map(|m| m.as_str().to_string())
            .unwrap_or_else(|| parts.uri.path().to_string());
        let meta = Self::new(path, &parts.headers);
        Ok(match parts.extensions.get::<RequestDeadline>() {
            Some(RequestDeadline(deadline)) => meta.with_deadline(*deadline),
            None => meta,
        })
    }
}

struct HeaderExtractor<'a>(&'a HeaderMap);

impl Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(|k| k.as_str()).collect()
    }
}

/// Run `handler` inside `span`, then record the outcome.
///
/// The status used for both metrics is the one of the response returned
/// here. Errors are rendered with their own `IntoResponse` and recorded on
/// the span before it ends. A handler still running at the deadline is
/// dropped and answered with 408.
pub async fn instrument<F, E>(
    recorder: &dyn RequestRecorder,
    meta: &RequestMeta,
    span: Span,
    handler: F,
) -> Response
where
    F: Future<Output = Result<Response, E>>,
    E: IntoResponse + Display,
{
    if meta.parent.span().span_context().is_valid() {
        span.set_parent(meta.parent.clone());
    }

    let started = Instant::now();
    let handler = handler.instrument(span.clone());
    let outcome = match meta.deadline {
        Some(deadline) => tokio::time::timeout(deadline, handler).await.ok(),
        None => Some(handler.await),
    };

    let response = match outcome {
        Some(Ok(response)) => response,
        Some(Err(err)) => {
            record_error(&span, &err);
            err.into_response()
        }
        None => {
            let message = format!("request timed out after {}ms", started.elapsed().as_millis());
            record_error(&span, &message);
            (
                StatusCode::REQUEST_TIMEOUT,
                Json(serde_json::json!({ "error": message })),
            )
                .into_response()
        }
    };

    let status = response.status().as_u16();
    recorder.record(&meta.path, status, started.elapsed());

    span.in_scope(|| {
        tracing::debug!(path = %meta.path, status, "request completed");
    });
    drop(span);

    response
}

fn record_error(span: &Span, err: &dyn Display) {
    span.record("otel.status_code", "ERROR");
    span.record("error", tracing::field::display(err));
    span.in_scope(|| {
        tracing::warn!(error = %err, "request failed");
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorded(Mutex<Vec<(String, u16, Duration)>>);

    impl RequestRecorder for Recorded {
        fn record(&self, path: &str, status: u16, elapsed: Duration) {
            self.0.lock().unwrap().push((path.to_string(), status, elapsed));
        }
    }

    #[derive(Debug)]
    struct Teapot;

    impl Display for Teapot {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "short and stout")
        }
    }

    impl IntoResponse for Teapot {
        fn into_response(self) -> Response {
            StatusCode::IM_A_TEAPOT.into_response()
        }
    }

    #[tokio::test]
    async fn test_error_status_is_recorded() {
        let recorder = Recorded::default();
        let meta = RequestMeta::new("/brew", &HeaderMap::new());

        let response = instrument(&recorder, &meta, request_span!("Brew"), async {
            Err::<Response, _>(Teapot)
        })
        .await;

        assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);
        let recorded = recorder.0.lock().unwrap();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].0, "/brew");
        assert_eq!(recorded[0].1, 418);
    }

    #[tokio::test]
    async fn test_success_status_is_recorded() {
        let recorder = Recorded::default();
        let meta = RequestMeta::new("/brew", &HeaderMap::new());

        let response = instrument(&recorder, &meta, request_span!("Brew", cups = 2), async {
            Ok::<_, Teapot>(StatusCode::ACCEPTED.into_response())
        })
        .await;

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(recorder.0.lock().unwrap()[0].1, 202);
    }

    #[tokio::test]
    async fn test_deadline_answers_408() {
        let recorder = Recorded::default();
        let meta = RequestMeta::new("/brew", &HeaderMap::new()).with_deadline(Duration::from_millis(20));

        let response = instrument(&recorder, &meta, request_span!("Brew"), async {
            std::future::pending::<()>().await;
            Ok::<Response, Teapot>(StatusCode::OK.into_response())
        })
        .await;

        assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
        let recorded = recorder.0.lock().unwrap();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].1, 408);
        assert!(recorded[0].2 >= Duration::from_millis(20));
    }

    #[tokio::test]
    async fn test_handler_within_deadline_is_untouched() {
        let recorder = Recorded::default();
        let meta = RequestMeta::new("/brew", &HeaderMap::new()).with_deadline(Duration::from_secs(5));

        let response = instrument(&recorder, &meta, request_span!("Brew"), async {
            Ok::<_, Teapot>(StatusCode::CREATED.into_response())
        })
        .await;

        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(recorder.0.lock().unwrap()[0].1, 201);
    }

    #[tokio::test]
    async fn test_extractor_reads_deadline_extension() {
        let request = axum::http::Request::builder()
            .uri("/brew?strong=1")
            .extension(RequestDeadline(Duration::from_secs(3)))
            .body(())
            .unwrap();
        let (mut parts, _) = request.into_parts();

        let meta = RequestMeta::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(meta.path, "/brew");
        assert_eq!(meta.deadline, Some(Duration::from_secs(3)));
    }

    #[test]
    fn test_header_extractor() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "traceparent",
            HeaderValue::from_static("00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01"),
        );
        let extractor = HeaderExtractor(&headers);
        assert_eq!(
            extractor.get("traceparent"),
            Some("00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01")
        );
        assert_eq!(extractor.keys(), vec!["traceparent"]);
    }
}
