//! Shared helpers for engine integration tests.

#![allow(dead_code)]

use std::path::PathBuf;
use std::time::Duration;

use tempfile::TempDir;
use triage_db::DbPool;
use triage_worker::config::{EngineConfig, JudgeMode};
use triage_worker::error::RunError;
use triage_worker::registry::{ProcessControl, Signal};
use triage_worker::runner::{JudgeExecution, JudgeRunner, RunOutput, RunRequest};
use triage_worker::service::JudgeService;

// ---------------------------------------------------------------------------
// Database
// ---------------------------------------------------------------------------

/// A migrated database in a throwaway directory.
pub struct TestDb {
    pub pool: DbPool,
    pub dir: TempDir,
}

impl TestDb {
    /// Empty directory for judge error reports.
    pub fn report_dir(&self) -> PathBuf {
        let dir = self.dir.path().join("reports");
        std::fs::create_dir_all(&dir).expect("create report dir");
        dir
    }
}

pub async fn test_db() -> TestDb {
    let dir = tempfile::tempdir().expect("create temp dir");
    let url = format!("sqlite://{}", dir.path().join("judge.sqlite").display());
    let pool = triage_db::create_pool(&url).await.expect("open pool");
    triage_db::run_migrations(&pool).await.expect("run migrations");
    TestDb { pool, dir }
}

/// Insert a thread with `count` posts.
pub async fn seed_posts(pool: &DbPool, thread_id: &str, count: usize) {
    sqlx::query("INSERT OR IGNORE INTO threads (thread_id, title) VALUES (?1, ?2)")
        .bind(thread_id)
        .bind(format!("Thread {thread_id}"))
        .execute(pool)
        .await
        .expect("insert thread");

    for i in 0..count {
        sqlx::query("INSERT INTO posts (post_id, thread_id, body_text) VALUES (?1, ?2, ?3)")
            .bind(format!("{thread_id}-{i}"))
            .bind(thread_id)
            .bind(format!("post {i}"))
            .execute(pool)
            .await
            .expect("insert post");
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Mock-mode configuration with fast polling and a private report dir.
pub fn mock_config(db: &TestDb, sleep: Duration) -> EngineConfig {
    EngineConfig {
        mode: JudgeMode::Mock,
        mock_sleep: sleep,
        mock_jitter: Duration::ZERO,
        poll_interval: Duration::from_millis(50),
        cancel_grace: Duration::from_secs(1),
        report_dir: db.report_dir(),
        ..EngineConfig::default()
    }
}

// ---------------------------------------------------------------------------
// Scripted runner
// ---------------------------------------------------------------------------

/// Runner that returns a fixed output after a delay, honouring signals.
#[derive(Debug, Clone)]
pub struct ScriptedRunner {
    output: RunOutput,
    delay: Duration,
}

impl ScriptedRunner {
    pub fn exits(code: i32, stdout: &str, stderr: &str) -> Self {
        Self {
            output: RunOutput {
                exit_code: Some(code),
                stdout: stdout.to_string(),
                stderr: stderr.to_string(),
            },
            delay: Duration::from_millis(10),
        }
    }

    pub fn succeeds(stdout: &str) -> Self {
        Self::exits(0, stdout, "")
    }
}

#[derive(Debug)]
pub struct ScriptedExecution {
    output: RunOutput,
    delay: Duration,
}

impl JudgeRunner for ScriptedRunner {
    type Execution = ScriptedExecution;

    async fn spawn(&self, _request: &RunRequest) -> Result<ScriptedExecution, RunError> {
        Ok(ScriptedExecution {
            output: self.output.clone(),
            delay: self.delay,
        })
    }
}

impl JudgeExecution for ScriptedExecution {
    fn pid(&self) -> Option<u32> {
        None
    }

    async fn wait(self, mut control: ProcessControl) -> Result<RunOutput, RunError> {
        tokio::select! {
            _ = tokio::time::sleep(self.delay) => Ok(self.output),
            Some(signal) = control.recv() => Ok(RunOutput {
                exit_code: Some(if signal == Signal::Kill { 137 } else { 143 }),
                stdout: String::new(),
                stderr: String::new(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Polling
// ---------------------------------------------------------------------------

/// Wait until the thread reports `expected`, panicking after 10 seconds.
pub async fn wait_for_status(service: &JudgeService, thread_id: &str, expected: &str) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let status = service.status(thread_id).await.expect("status").status;
        if status == expected {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "thread {thread_id} stuck in '{status}', expected '{expected}'"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
