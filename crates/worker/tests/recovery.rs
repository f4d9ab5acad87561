//! Cancellation and orphan recovery.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use triage_db::models::job::NewJob;
use triage_db::models::status::JobStatus;
use triage_db::repositories::{JobRepo, JudgmentRepo};
use triage_worker::cancel::CancelOutcome;
use triage_worker::reaper::{OrphanReaper, ORPHANED_ERROR};
use triage_worker::registry::{ProcessHandle, ProcessRegistry};
use triage_worker::Engine;

use common::{mock_config, seed_posts, test_db, wait_for_status};

/// Put a job straight into `starting`, bypassing the dispatcher.
async fn claim(pool: &triage_db::DbPool, thread_id: &str) {
    let job = NewJob {
        thread_id,
        dry_run: false,
        model: "auto",
    };
    JobRepo::enqueue(pool, &job).await.unwrap().unwrap();
    let claimed = JobRepo::claim_next(pool).await.unwrap().unwrap();
    assert_eq!(claimed.thread_id, thread_id);
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cancel_unknown_thread_is_idle() {
    let db = test_db().await;
    let engine = Engine::from_config(db.pool.clone(), mock_config(&db, Duration::ZERO)).unwrap();

    assert_eq!(engine.service.cancel("nope").await.unwrap(), CancelOutcome::Idle);
}

#[tokio::test]
async fn cancel_terminal_job_leaves_it_unchanged() {
    let db = test_db().await;
    seed_posts(&db.pool, "42", 1).await;
    let engine = Engine::from_config(db.pool.clone(), mock_config(&db, Duration::ZERO)).unwrap();

    engine.service.enqueue("42", false, None).await.unwrap();
    engine.dispatcher.run_cycle().await.unwrap();
    wait_for_status(&engine.service, "42", "done").await;

    let outcome = engine.service.cancel("42").await.unwrap();
    assert_eq!(outcome, CancelOutcome::Unchanged(JobStatus::Done));
    assert_eq!(outcome.status(), "done");
    assert_eq!(engine.service.status("42").await.unwrap().status, "done");
}

#[tokio::test]
async fn cancel_queued_job_prevents_dispatch() {
    let db = test_db().await;
    seed_posts(&db.pool, "42", 1).await;
    let engine = Engine::from_config(db.pool.clone(), mock_config(&db, Duration::ZERO)).unwrap();

    engine.service.enqueue("42", false, None).await.unwrap();
    assert_eq!(engine.service.cancel("42").await.unwrap(), CancelOutcome::Cancelled);

    assert_eq!(engine.dispatcher.run_cycle().await.unwrap(), 0);
    let status = engine.service.status("42").await.unwrap();
    assert_eq!(status.status, "cancelled");
    assert!(status.finished_at.is_some());
}

#[tokio::test]
async fn cancel_running_mock_job_stops_it() {
    let db = test_db().await;
    seed_posts(&db.pool, "42", 1).await;
    let engine = Engine::from_config(db.pool.clone(), mock_config(&db, Duration::from_secs(30))).unwrap();

    engine.service.enqueue("42", false, None).await.unwrap();
    engine.dispatcher.run_cycle().await.unwrap();
    wait_for_status(&engine.service, "42", "running").await;

    let started = tokio::time::Instant::now();
    assert_eq!(engine.service.cancel("42").await.unwrap(), CancelOutcome::Cancelled);
    assert!(started.elapsed() < Duration::from_secs(5));

    for _ in 0..100 {
        if engine.registry.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(engine.registry.is_empty());
    assert_eq!(engine.service.status("42").await.unwrap().status, "cancelled");
    assert!(!JudgmentRepo::exists(&db.pool, "42").await.unwrap());

    // A fresh enqueue after cancellation starts over.
    let again = engine.service.enqueue("42", false, None).await.unwrap();
    assert_eq!(again.status, JobStatus::Queued);
    engine.service.cancel("42").await.unwrap();
}

#[cfg(unix)]
#[tokio::test]
async fn cancel_terminates_real_process() {
    use triage_worker::config::JudgeMode;

    let db = test_db().await;
    seed_posts(&db.pool, "42", 1).await;
    let mut config = mock_config(&db, Duration::ZERO);
    config.mode = JudgeMode::Process;
    config.command = vec!["sh".into(), "-c".into(), "exec sleep 30".into()];
    let engine = Engine::from_config(db.pool.clone(), config).unwrap();

    engine.service.enqueue("42", false, None).await.unwrap();
    engine.dispatcher.run_cycle().await.unwrap();
    wait_for_status(&engine.service, "42", "running").await;
    for _ in 0..100 {
        if !engine.registry.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let handle = engine.registry.get("42").expect("process registered");
    assert!(handle.pid().is_some());

    assert_eq!(engine.service.cancel("42").await.unwrap(), CancelOutcome::Cancelled);
    assert!(handle.wait_exit(Duration::from_secs(5)).await);
    assert_eq!(engine.service.status("42").await.unwrap().status, "cancelled");
}

// ---------------------------------------------------------------------------
// Orphan reaper
// ---------------------------------------------------------------------------

#[tokio::test]
async fn reaper_requeues_claims_and_fails_executions() {
    let db = test_db().await;
    claim(&db.pool, "claimed").await;
    claim(&db.pool, "started").await;
    assert!(JobRepo::mark_running(&db.pool, "started").await.unwrap());

    let reaper = OrphanReaper::new(db.pool.clone(), Arc::new(ProcessRegistry::new()), Duration::ZERO);
    let report = reaper.reap(Utc::now()).await.unwrap();
    assert_eq!(report.requeued, ["claimed"]);
    assert_eq!(report.failed, ["started"]);

    let claimed = JobRepo::find(&db.pool, "claimed").await.unwrap().unwrap();
    assert_eq!(claimed.status, JobStatus::Queued);
    let started = JobRepo::find(&db.pool, "started").await.unwrap().unwrap();
    assert_eq!(started.status, JobStatus::Error);
    assert_eq!(started.error.as_deref(), Some(ORPHANED_ERROR));
    assert!(started.finished_at.is_some());

    assert!(reaper.reap(Utc::now()).await.unwrap().is_empty());
}

#[tokio::test]
async fn reaper_skips_registered_and_young_jobs() {
    let db = test_db().await;
    claim(&db.pool, "live").await;
    claim(&db.pool, "young").await;

    let registry = Arc::new(ProcessRegistry::new());
    let (handle, _control) = ProcessHandle::new(None);
    let _guard = registry.register("live", handle);

    let eager = OrphanReaper::new(db.pool.clone(), Arc::clone(&registry), Duration::ZERO);
    let report = eager.reap(Utc::now()).await.unwrap();
    assert_eq!(report.requeued, ["young"]);
    assert!(report.failed.is_empty());

    let reclaimed = JobRepo::claim_next(&db.pool).await.unwrap().unwrap();
    assert_eq!(reclaimed.thread_id, "young");
    let patient = OrphanReaper::new(db.pool.clone(), registry, Duration::from_secs(600));
    assert!(patient.reap(Utc::now()).await.unwrap().is_empty());
    assert_eq!(
        JobRepo::find_status(&db.pool, "young").await.unwrap(),
        Some(JobStatus::Starting)
    );
    assert_eq!(
        JobRepo::find_status(&db.pool, "live").await.unwrap(),
        Some(JobStatus::Starting)
    );
}
