//! Judge job rows.

use serde::Serialize;
use sqlx::FromRow;
use triage_core::types::{ThreadId, Timestamp};

use super::status::JobStatus;

/// A row from the `judge_jobs` table. One row per thread.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Job {
    pub thread_id: ThreadId,
    pub status: JobStatus,
    /// Run the judge but do not persist the judgment.
    pub dry_run: bool,
    pub model: String,
    /// Set only on terminal failure (or skip reason).
    pub error: Option<String>,
    pub started_at: Option<Timestamp>,
    pub finished_at: Option<Timestamp>,
    pub updated_at: Timestamp,
}

/// Parameters of an enqueue request after model resolution.
#[derive(Debug, Clone)]
pub struct NewJob<'a> {
    pub thread_id: &'a str,
    pub dry_run: bool,
    pub model: &'a str,
}
