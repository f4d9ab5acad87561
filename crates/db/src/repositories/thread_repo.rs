//! Read-only access to crawler-owned forum tables.

use crate::DbPool;

pub struct ThreadRepo;

impl ThreadRepo {
    /// Number of stored posts for a thread.
    pub async fn post_count(pool: &DbPool, thread_id: &str) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM posts WHERE thread_id = ?1")
            .bind(thread_id)
            .fetch_one(pool)
            .await
    }
}
