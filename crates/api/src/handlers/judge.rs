//! Handlers for the `/judge` resource.
//!
//! Each handler is a thin adapter over [`JudgeService`]; engine errors are
//! mapped to HTTP by [`AppError`](crate::error::AppError).
//!
//! [`JudgeService`]: triage_worker::service::JudgeService

use std::collections::BTreeMap;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::AppResult;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Request / response bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct EnqueueParams {
    #[serde(default)]
    pub dry_run: bool,
    pub model: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BulkStatusRequest {
    #[serde(default)]
    pub thread_ids: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct StateParams {
    pub model: Option<String>,
}

/// `{ "items": [...] }` listing envelope.
#[derive(Debug, Serialize)]
pub struct ItemsResponse<T: Serialize> {
    pub items: Vec<T>,
}

#[derive(Debug, Serialize)]
pub struct StateResponse {
    pub state: BTreeMap<String, Option<String>>,
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub status: &'static str,
}

// ---------------------------------------------------------------------------
// Enqueue
// ---------------------------------------------------------------------------

/// POST /judge/{thread_id}?dry_run=&model=
///
/// Queue a thread for judging. Returns 202; the body reports the job's
/// status, which may be an already active job or `skipped`.
pub async fn enqueue(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
    Query(params): Query<EnqueueParams>,
) -> AppResult<impl IntoResponse> {
    let model = params.model.as_deref().filter(|m| !m.is_empty());
    let response = state
        .service
        .enqueue(&thread_id, params.dry_run, model)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(response)))
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// GET /judge/status/{thread_id}
pub async fn status(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    Ok(Json(state.service.status(&thread_id).await?))
}

/// POST /judge/status/bulk
///
/// Statuses for up to 200 threads, in request order. Larger batches are
/// rejected with 413.
pub async fn status_bulk(
    State(state): State<AppState>,
    Json(input): Json<BulkStatusRequest>,
) -> AppResult<impl IntoResponse> {
    let items = state.service.status_bulk(&input.thread_ids).await?;
    Ok(Json(ItemsResponse { items }))
}

/// GET /judge/metrics/{thread_id}
///
/// Stage timings of the last run; `{}` when none were recorded.
pub async fn metrics(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    Ok(Json(state.service.metrics(&thread_id).await?))
}

/// GET /judge/active
pub async fn active(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let items = state.service.active().await?;
    Ok(Json(ItemsResponse { items }))
}

/// GET /judge/state?model=
///
/// Raw quota state for one model, or every quota key when `model` is absent.
pub async fn quota_state(
    State(state): State<AppState>,
    Query(params): Query<StateParams>,
) -> AppResult<impl IntoResponse> {
    let model = params.model.as_deref().filter(|m| !m.is_empty());
    let state = state.service.quota_state(model).await?;
    Ok(Json(StateResponse { state }))
}

// ---------------------------------------------------------------------------
// Cancel
// ---------------------------------------------------------------------------

/// POST /judge/cancel/{thread_id}
///
/// Reports `idle`, the unchanged terminal status, or `cancelled`. Waits at
/// most the cancel grace period for a live process.
pub async fn cancel(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let outcome = state.service.cancel(&thread_id).await?;
    Ok(Json(CancelResponse {
        status: outcome.status(),
    }))
}
