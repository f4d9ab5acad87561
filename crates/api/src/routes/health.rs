use axum::extract::State;
use axum::{routing::get, Json, Router};
use serde::Serialize;
use triage_db::repositories::JobRepo;

use crate::state::AppState;

/// Health check response payload.
#[derive(Serialize)]
pub struct HealthResponse {
    /// `ok`, or `degraded` when the database cannot be queried.
    pub status: &'static str,
    /// Crate version from Cargo.toml.
    pub version: &'static str,
    pub db_healthy: bool,
    /// Jobs currently `starting` or `running`; absent when the database is down.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inflight: Option<i64>,
    /// Admission ceiling the dispatcher enforces.
    pub max_inflight: usize,
}

/// GET /health -- database reachability and judge load.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let pool = state.service.pool();
    let inflight = match triage_db::health_check(pool).await {
        Ok(()) => JobRepo::count_inflight(pool).await.ok(),
        Err(e) => {
            tracing::warn!(error = %e, "Health check could not reach the database");
            None
        }
    };
    let db_healthy = inflight.is_some();

    Json(HealthResponse {
        status: if db_healthy { "ok" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        db_healthy,
        inflight,
        max_inflight: state.service.config().max_inflight,
    })
}

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
