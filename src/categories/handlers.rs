//! Category CRUD handlers.
//!
//! Each handler opens its span, runs its body through
//! [`instrument`](crate::observability::instrument) and leaves all telemetry
//! to it. Mutations and storage failures go to the audit log.

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use http_body_util::LengthLimitError;

use crate::categories::model::{Category, CategoryInput};
use crate::categories::store::StoreError;
use crate::http::response::ApiError;
use crate::http::server::AppState;
use crate::observability::{instrument, LogLevel, RequestMeta};
use crate::request_span;

const NOT_FOUND: &str = "Category not found";

pub async fn list_categories(State(state): State<AppState>, meta: RequestMeta) -> Response {
    let span = request_span!("GetCategories");
    instrument(state.metrics.as_ref(), &meta, span, async {
        let categories = state
            .store
            .list()
            .map_err(|e| storage_failure(&state, "list categories", e))?;
        Ok::<_, ApiError>(Json(categories).into_response())
    })
    .await
}

pub async fn get_category(
    State(state): State<AppState>,
    Path(id): Path<String>,
    meta: RequestMeta,
) -> Response {
    let span = request_span!("GetCategory", category.id = %id);
    instrument(state.metrics.as_ref(), &meta, span, async {
        let category = find(&state, &id)?;
        Ok::<_, ApiError>(Json(category).into_response())
    })
    .await
}

pub async fn create_category(State(state): State<AppState>, meta: RequestMeta, body: Body) -> Response {
    let span = request_span!("CreateCategory");
    instrument(state.metrics.as_ref(), &meta, span, async {
        let input = read_input(body, state.body_limit).await?;
        let category = state
            .store
            .create(input.name)
            .map_err(|e| storage_failure(&state, "create category", e))?;

        state
            .log
            .log(LogLevel::Info, format!("category {} created: {}", category.id, category.name));
        Ok::<_, ApiError>((StatusCode::CREATED, Json(category)).into_response())
    })
    .await
}

pub async fn update_category(
    State(state): State<AppState>,
    Path(id): Path<String>,
    meta: RequestMeta,
    body: Body,
) -> Response {
    let span = request_span!("UpdateCategory", category.id = %id);
    instrument(state.metrics.as_ref(), &meta, span, async {
        let existing = find(&state, &id)?;
        let input = read_input(body, state.body_limit).await?;
        let category = state
            .store
            .update(existing.id, input.name)
            .map_err(|e| storage_failure(&state, "update category", e))?
            .ok_or(ApiError::NotFound(NOT_FOUND))?;

        state
            .log
            .log(LogLevel::Info, format!("category {} renamed to {}", category.id, category.name));
        Ok::<_, ApiError>(Json(category).into_response())
    })
    .await
}

pub async fn delete_category(
    State(state): State<AppState>,
    Path(id): Path<String>,
    meta: RequestMeta,
) -> Response {
    let span = request_span!("DeleteCategory", category.id = %id);
    instrument(state.metrics.as_ref(), &meta, span, async {
        let existing = find(&state, &id)?;
        let removed = state
            .store
            .delete(existing.id)
            .map_err(|e| storage_failure(&state, "delete category", e))?;
        if !removed {
            return Err(ApiError::NotFound(NOT_FOUND));
        }

        state.log.log(LogLevel::Info, format!("category {} deleted", existing.id));
        Ok::<_, ApiError>(StatusCode::NO_CONTENT.into_response())
    })
    .await
}

/// Ids that are not unsigned integers cannot exist, so they are not found.
fn find(state: &AppState, id: &str) -> Result<Category, ApiError> {
    let id: u64 = id.parse().map_err(|_| ApiError::NotFound(NOT_FOUND))?;
    state
        .store
        .get(id)
        .map_err(|e| storage_failure(state, "load category", e))?
        .ok_or(ApiError::NotFound(NOT_FOUND))
}

/// Buffer and decode the body inside the instrumented scope, so oversized
/// and malformed bodies are traced and counted too.
async fn read_input(body: Body, limit: usize) -> Result<CategoryInput, ApiError> {
    let bytes = axum::body::to_bytes(body, limit).await.map_err(|e| {
        let source = e.into_inner();
        if source.downcast_ref::<LengthLimitError>().is_some() {
            ApiError::PayloadTooLarge(limit)
        } else {
            ApiError::BadRequest(format!("failed to read request body: {}", source))
        }
    })?;
    serde_json::from_slice(&bytes).map_err(|e| ApiError::BadRequest(e.to_string()))
}

#[track_caller]
fn storage_failure(state: &AppState, action: &str, err: StoreError) -> ApiError {
    state.log.log(LogLevel::Error, format!("failed to {}: {}", action, err));
    ApiError::Storage(err)
}
