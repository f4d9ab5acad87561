use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use triage_core::error::CoreError;
use triage_worker::error::EngineError;

/// Application-level error type for HTTP handlers.
///
/// Wraps [`EngineError`] and [`CoreError`] and implements [`IntoResponse`]
/// to produce consistent JSON error responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// An error returned by the judge engine.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// A domain-level error from `triage_core`.
    #[error(transparent)]
    Core(#[from] CoreError),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Engine(engine) => classify_engine_error(engine),
            AppError::Core(core) => classify_core_error(core),
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}

fn classify_engine_error(err: &EngineError) -> (StatusCode, &'static str, String) {
    match err {
        EngineError::UnsupportedModel(_) => {
            (StatusCode::BAD_REQUEST, "UNSUPPORTED_MODEL", err.to_string())
        }
        EngineError::TooManyIds { .. } => {
            (StatusCode::PAYLOAD_TOO_LARGE, "TOO_MANY_IDS", err.to_string())
        }
        EngineError::Core(core) => classify_core_error(core),
        EngineError::Database(db) => classify_sqlx_error(db),
    }
}

fn classify_core_error(err: &CoreError) -> (StatusCode, &'static str, String) {
    match err {
        CoreError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
        CoreError::Config(msg) | CoreError::Internal(msg) => {
            tracing::error!(error = %msg, "Internal core error");
            internal()
        }
    }
}

/// `RowNotFound` maps to 404; everything else is a sanitized 500.
fn classify_sqlx_error(err: &sqlx::Error) -> (StatusCode, &'static str, String) {
    match err {
        sqlx::Error::RowNotFound => (
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            "Resource not found".to_string(),
        ),
        other => {
            tracing::error!(error = %other, "Database error");
            internal()
        }
    }
}

fn internal() -> (StatusCode, &'static str, String) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "INTERNAL_ERROR",
        "An internal error occurred".to_string(),
    )
}
