//! Shared helpers for repository integration tests.

#![allow(dead_code)]

use tempfile::TempDir;
use triage_db::DbPool;

/// A migrated database in a throwaway directory.
///
/// Keep the struct alive for the duration of the test; dropping it removes
/// the database file.
pub struct TestDb {
    pub pool: DbPool,
    _dir: TempDir,
}

pub async fn test_db() -> TestDb {
    let dir = tempfile::tempdir().expect("create temp dir");
    let url = format!("sqlite://{}", dir.path().join("judge.sqlite").display());
    let pool = triage_db::create_pool(&url).await.expect("open pool");
    triage_db::run_migrations(&pool).await.expect("run migrations");
    TestDb { pool, _dir: dir }
}

/// Insert `count` posts for a thread.
pub async fn seed_posts(pool: &DbPool, thread_id: &str, count: usize) {
    sqlx::query("INSERT OR IGNORE INTO threads (thread_id, title) VALUES (?1, ?2)")
        .bind(thread_id)
        .bind(format!("Thread {thread_id}"))
        .execute(pool)
        .await
        .expect("insert thread");

    for i in 0..count {
        sqlx::query(
            "INSERT INTO posts (post_id, thread_id, body_text, is_first) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(format!("{thread_id}-{i}"))
        .bind(thread_id)
        .bind(format!("post {i}"))
        .bind(i == 0)
        .execute(pool)
        .await
        .expect("insert post");
    }
}
