//! Repository for the advisory `judge_state` key/value table.
//!
//! Nothing in the engine reads these keys back to make decisions; they are
//! published for operators and clients deciding when to retry.

use chrono::Utc;

use super::job_repo::placeholders;
use crate::models::state::StateEntry;
use crate::DbPool;

pub struct QuotaStateRepo;

impl QuotaStateRepo {
    /// Set a key, overwriting the previous value.
    pub async fn set(pool: &DbPool, key: &str, value: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO judge_state (key, value, updated_at) VALUES (?1, ?2, ?3) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now())
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Delete the given keys. Returns the number of rows removed.
    pub async fn delete_keys(pool: &DbPool, keys: &[&str]) -> Result<u64, sqlx::Error> {
        if keys.is_empty() {
            return Ok(0);
        }
        let query = format!(
            "DELETE FROM judge_state WHERE key IN ({})",
            placeholders(keys.len())
        );
        let mut q = sqlx::query(&query);
        for key in keys {
            q = q.bind(*key);
        }
        Ok(q.execute(pool).await?.rows_affected())
    }

    /// All keys starting with `prefix`, ordered by key.
    pub async fn list_prefixed(pool: &DbPool, prefix: &str) -> Result<Vec<StateEntry>, sqlx::Error> {
        sqlx::query_as::<_, StateEntry>(
            "SELECT key, value FROM judge_state WHERE substr(key, 1, length(?1)) = ?1 ORDER BY key",
        )
        .bind(prefix)
        .fetch_all(pool)
        .await
    }

    /// The stored entries for exactly these keys, ordered by key.
    pub async fn list_keys(pool: &DbPool, keys: &[&str]) -> Result<Vec<StateEntry>, sqlx::Error> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let query = format!(
            "SELECT key, value FROM judge_state WHERE key IN ({}) ORDER BY key",
            placeholders(keys.len())
        );
        let mut q = sqlx::query_as::<_, StateEntry>(&query);
        for key in keys {
            q = q.bind(*key);
        }
        q.fetch_all(pool).await
    }
}
