//! Error types of the orchestration engine.

use triage_core::error::CoreError;

/// Errors returned by [`JudgeService`](crate::service::JudgeService) to its
/// callers. Worker failures never surface here; they end up in the job row.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Unsupported model '{0}'")]
    UnsupportedModel(String),

    #[error("Too many thread ids: {count} (max {max})")]
    TooManyIds { count: usize, max: usize },

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Failure to start or supervise a judge execution.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("judge command is empty")]
    EmptyCommand,

    #[error("failed to spawn judge process: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("failed waiting for judge process: {0}")]
    Wait(#[source] std::io::Error),
}

/// Anything that aborts a worker before it can write a regular outcome.
/// Rendered into the job's error column as `Judge job crashed: ...`.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error(transparent)]
    Run(#[from] RunError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}
