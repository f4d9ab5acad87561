//! Repository for the `judge_job_metrics` table.

use chrono::Utc;
use serde_json::{Map, Value};

use crate::DbPool;

/// Stage timings of the most recent run, one row per thread.
pub struct JobMetricsRepo;

impl JobMetricsRepo {
    /// Insert or replace the timings for a thread, keeping `created_at`.
    pub async fn upsert(
        pool: &DbPool,
        thread_id: &str,
        timings: &Map<String, Value>,
    ) -> Result<(), sqlx::Error> {
        let now = Utc::now();
        let json = Value::Object(timings.clone()).to_string();
        sqlx::query(
            "INSERT INTO judge_job_metrics (thread_id, timings_json, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?3) \
             ON CONFLICT(thread_id) DO UPDATE SET \
                 timings_json = excluded.timings_json, \
                 updated_at = excluded.updated_at",
        )
        .bind(thread_id)
        .bind(json)
        .bind(now)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Timings for a thread, or `None` if it never ran.
    ///
    /// A row whose JSON no longer parses as an object reads as empty.
    pub async fn find(
        pool: &DbPool,
        thread_id: &str,
    ) -> Result<Option<Map<String, Value>>, sqlx::Error> {
        let raw = sqlx::query_scalar::<_, String>(
            "SELECT timings_json FROM judge_job_metrics WHERE thread_id = ?1",
        )
        .bind(thread_id)
        .fetch_optional(pool)
        .await?;

        Ok(raw.map(|text| match serde_json::from_str::<Value>(&text) {
            Ok(Value::Object(map)) => map,
            _ => {
                tracing::warn!(thread_id, "Discarding malformed judge timings");
                Map::new()
            }
        }))
    }
}
