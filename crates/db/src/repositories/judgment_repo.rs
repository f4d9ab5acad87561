//! Repository for the `judge_judgments` table.

use chrono::Utc;
use serde_json::Value;
use sqlx::SqliteExecutor;
use triage_core::judge_output::JudgeOutput;

use super::job_repo::placeholders;
use crate::models::judgment::Judgment;
use crate::DbPool;

const COLUMNS: &str =
    "thread_id, summary, status_guess, confidence, evidence, duplicates, model, created_at";

/// Persisted judge results, keyed by thread.
pub struct JudgmentRepo;

impl JudgmentRepo {
    /// Store a judgment for `thread_id`, replacing any earlier one.
    ///
    /// The row is keyed by the job's thread id, never by the id the judge
    /// echoed back in its output.
    pub async fn upsert(
        pool: &DbPool,
        thread_id: &str,
        output: &JudgeOutput,
        model: &str,
    ) -> Result<Judgment, sqlx::Error> {
        Self::upsert_with(pool, thread_id, output, model).await
    }

    /// [`Self::upsert`] on any executor, e.g. an open transaction.
    pub(crate) async fn upsert_with<'e, E>(
        executor: E,
        thread_id: &str,
        output: &JudgeOutput,
        model: &str,
    ) -> Result<Judgment, sqlx::Error>
    where
        E: SqliteExecutor<'e>,
    {
        let evidence = Value::Array(output.evidence.clone()).to_string();
        let duplicates = Value::Array(output.duplicate_candidates.clone()).to_string();
        let query = format!(
            "INSERT INTO judge_judgments ({COLUMNS}) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8) \
             ON CONFLICT(thread_id) DO UPDATE SET \
                 summary = excluded.summary, \
                 status_guess = excluded.status_guess, \
                 confidence = excluded.confidence, \
                 evidence = excluded.evidence, \
                 duplicates = excluded.duplicates, \
                 model = excluded.model, \
                 created_at = excluded.created_at \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Judgment>(&query)
            .bind(thread_id)
            .bind(output.summary.as_deref())
            .bind(output.status_guess.as_deref())
            .bind(output.confidence.as_deref())
            .bind(evidence)
            .bind(duplicates)
            .bind(model)
            .bind(Utc::now())
            .fetch_one(executor)
            .await
    }

    pub async fn find(pool: &DbPool, thread_id: &str) -> Result<Option<Judgment>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM judge_judgments WHERE thread_id = ?1");
        sqlx::query_as::<_, Judgment>(&query)
            .bind(thread_id)
            .fetch_optional(pool)
            .await
    }

    pub async fn exists(pool: &DbPool, thread_id: &str) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM judge_judgments WHERE thread_id = ?1)",
        )
        .bind(thread_id)
        .fetch_one(pool)
        .await
    }

    /// The subset of `thread_ids` that have a stored judgment.
    pub async fn existing_ids(
        pool: &DbPool,
        thread_ids: &[String],
    ) -> Result<Vec<String>, sqlx::Error> {
        if thread_ids.is_empty() {
            return Ok(Vec::new());
        }
        let query = format!(
            "SELECT thread_id FROM judge_judgments WHERE thread_id IN ({})",
            placeholders(thread_ids.len())
        );
        let mut q = sqlx::query_scalar::<_, String>(&query);
        for id in thread_ids {
            q = q.bind(id);
        }
        q.fetch_all(pool).await
    }
}
