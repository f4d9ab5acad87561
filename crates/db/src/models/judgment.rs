//! Persisted judge results.

use serde::Serialize;
use sqlx::FromRow;
use triage_core::types::{ThreadId, Timestamp};

/// A row from the `judge_judgments` table.
///
/// `evidence` and `duplicates` hold JSON array text.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Judgment {
    pub thread_id: ThreadId,
    pub summary: Option<String>,
    pub status_guess: Option<String>,
    pub confidence: Option<String>,
    pub evidence: String,
    pub duplicates: String,
    pub model: Option<String>,
    pub created_at: Timestamp,
}
