//! Integration tests for the judge job state machine in `JobRepo`.
//!
//! Exercises guarded transitions against a real SQLite file:
//! - Enqueue idempotency while a job is active
//! - Atomic claims under contention
//! - Terminal statuses rejecting further engine transitions
//! - Orphan recovery transitions

mod common;

use triage_core::judge_output::JudgeOutput;
use triage_db::models::job::NewJob;
use triage_db::models::status::JobStatus;
use triage_db::repositories::{JobRepo, JudgmentRepo, ThreadRepo};

fn new_job(thread_id: &str) -> NewJob<'_> {
    NewJob {
        thread_id,
        dry_run: false,
        model: "auto",
    }
}

// ---------------------------------------------------------------------------
// Enqueue
// ---------------------------------------------------------------------------

#[tokio::test]
async fn enqueue_creates_queued_row() {
    let db = common::test_db().await;

    let job = JobRepo::enqueue(&db.pool, &new_job("42")).await.unwrap().unwrap();

    assert_eq!(job.thread_id, "42");
    assert_eq!(job.status, JobStatus::Queued);
    assert_eq!(job.model, "auto");
    assert!(job.error.is_none());
    assert!(job.started_at.is_none());
    assert!(job.finished_at.is_none());
}

#[tokio::test]
async fn enqueue_is_idempotent_while_active() {
    let db = common::test_db().await;
    JobRepo::enqueue(&db.pool, &new_job("42")).await.unwrap().unwrap();

    let again = JobRepo::enqueue(&db.pool, &new_job("42")).await.unwrap();
    assert!(again.is_none(), "queued job must not be re-created");

    JobRepo::claim_next(&db.pool).await.unwrap().unwrap();
    let during_start = JobRepo::enqueue(&db.pool, &new_job("42")).await.unwrap();
    assert!(during_start.is_none(), "starting counts as active");

    assert!(JobRepo::mark_running(&db.pool, "42").await.unwrap());
    let during_run = JobRepo::enqueue(&db.pool, &new_job("42")).await.unwrap();
    assert!(during_run.is_none(), "running counts as active");
}

#[tokio::test]
async fn enqueue_restarts_terminal_job() {
    let db = common::test_db().await;
    JobRepo::enqueue(&db.pool, &new_job("42")).await.unwrap();
    JobRepo::claim_next(&db.pool).await.unwrap();
    JobRepo::mark_running(&db.pool, "42").await.unwrap();
    JobRepo::fail(&db.pool, "42", "boom").await.unwrap();

    let job = NewJob {
        thread_id: "42",
        dry_run: true,
        model: "flash",
    };
    let restarted = JobRepo::enqueue(&db.pool, &job).await.unwrap().unwrap();

    assert_eq!(restarted.status, JobStatus::Queued);
    assert!(restarted.dry_run);
    assert_eq!(restarted.model, "flash");
    assert!(restarted.error.is_none());
    assert!(restarted.started_at.is_none());
    assert!(restarted.finished_at.is_none());
}

#[tokio::test]
async fn skipped_job_is_terminal_with_reason() {
    let db = common::test_db().await;

    let job = JobRepo::mark_skipped(&db.pool, &new_job("7"), "no posts for thread")
        .await
        .unwrap()
        .unwrap();

    assert_eq!(job.status, JobStatus::Skipped);
    assert_eq!(job.error.as_deref(), Some("no posts for thread"));
    assert!(job.finished_at.is_some());
    assert!(JobRepo::claim_next(&db.pool).await.unwrap().is_none());
}

// ---------------------------------------------------------------------------
// Claiming
// ---------------------------------------------------------------------------

#[tokio::test]
async fn claim_takes_oldest_queued_first() {
    let db = common::test_db().await;
    for id in ["1", "2", "3"] {
        JobRepo::enqueue(&db.pool, &new_job(id)).await.unwrap();
    }

    let first = JobRepo::claim_next(&db.pool).await.unwrap().unwrap();
    let second = JobRepo::claim_next(&db.pool).await.unwrap().unwrap();

    assert_eq!(first.thread_id, "1");
    assert_eq!(first.status, JobStatus::Starting);
    assert_eq!(second.thread_id, "2");
    assert_eq!(JobRepo::count_inflight(&db.pool).await.unwrap(), 2);
}

#[tokio::test]
async fn concurrent_claims_of_one_job_have_one_winner() {
    let db = common::test_db().await;
    JobRepo::enqueue(&db.pool, &new_job("42")).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let pool = db.pool.clone();
        handles.push(tokio::spawn(async move { JobRepo::claim_next(&pool).await }));
    }

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap().unwrap().is_some() {
            winners += 1;
        }
    }

    assert_eq!(winners, 1);
    assert_eq!(
        JobRepo::find_status(&db.pool, "42").await.unwrap(),
        Some(JobStatus::Starting)
    );
}

#[tokio::test]
async fn claim_on_empty_queue_returns_none() {
    let db = common::test_db().await;
    assert!(JobRepo::claim_next(&db.pool).await.unwrap().is_none());
}

// ---------------------------------------------------------------------------
// Guarded transitions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn full_success_path() {
    let db = common::test_db().await;
    JobRepo::enqueue(&db.pool, &new_job("42")).await.unwrap();
    JobRepo::claim_next(&db.pool).await.unwrap();

    assert!(JobRepo::mark_running(&db.pool, "42").await.unwrap());
    assert!(JobRepo::complete(&db.pool, "42").await.unwrap());

    let job = JobRepo::find(&db.pool, "42").await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Done);
    assert!(job.started_at.is_some());
    assert!(job.finished_at.is_some());
    assert_eq!(JobRepo::count_inflight(&db.pool).await.unwrap(), 0);
}

#[tokio::test]
async fn cancelled_job_ignores_late_worker_writes() {
    let db = common::test_db().await;
    JobRepo::enqueue(&db.pool, &new_job("42")).await.unwrap();
    JobRepo::claim_next(&db.pool).await.unwrap();
    JobRepo::mark_running(&db.pool, "42").await.unwrap();

    assert!(JobRepo::cancel(&db.pool, "42").await.unwrap());
    assert!(!JobRepo::complete(&db.pool, "42").await.unwrap());
    assert!(!JobRepo::fail(&db.pool, "42", "late").await.unwrap());
    assert!(!JobRepo::cancel(&db.pool, "42").await.unwrap());

    let job = JobRepo::find(&db.pool, "42").await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Cancelled);
    assert!(job.error.is_none());
}

#[tokio::test]
async fn completion_stores_judgment_only_when_guard_holds() {
    let db = common::test_db().await;
    let output = JudgeOutput {
        summary: Some("Fixed in 2.1".to_string()),
        status_guess: Some("fixed".to_string()),
        ..JudgeOutput::default()
    };
    for id in ["done", "gone"] {
        JobRepo::enqueue(&db.pool, &new_job(id)).await.unwrap();
        JobRepo::claim_next(&db.pool).await.unwrap();
        JobRepo::mark_running(&db.pool, id).await.unwrap();
    }
    JobRepo::cancel(&db.pool, "gone").await.unwrap();

    assert!(JobRepo::complete_with_judgment(&db.pool, "done", Some((&output, "pro")))
        .await
        .unwrap());
    assert!(!JobRepo::complete_with_judgment(&db.pool, "gone", Some((&output, "pro")))
        .await
        .unwrap());

    let stored = JudgmentRepo::find(&db.pool, "done").await.unwrap().unwrap();
    assert_eq!(stored.status_guess.as_deref(), Some("fixed"));
    assert_eq!(stored.model.as_deref(), Some("pro"));
    assert!(JudgmentRepo::find(&db.pool, "gone").await.unwrap().is_none());

    let gone = JobRepo::find(&db.pool, "gone").await.unwrap().unwrap();
    assert_eq!(gone.status, JobStatus::Cancelled);
}

#[tokio::test]
async fn mark_running_requires_starting() {
    let db = common::test_db().await;
    JobRepo::enqueue(&db.pool, &new_job("42")).await.unwrap();

    assert!(!JobRepo::mark_running(&db.pool, "42").await.unwrap());
    assert!(!JobRepo::complete(&db.pool, "42").await.unwrap());
}

#[tokio::test]
async fn orphan_transitions_are_status_specific() {
    let db = common::test_db().await;
    JobRepo::enqueue(&db.pool, &new_job("a")).await.unwrap();
    JobRepo::enqueue(&db.pool, &new_job("b")).await.unwrap();
    JobRepo::claim_next(&db.pool).await.unwrap();
    JobRepo::claim_next(&db.pool).await.unwrap();
    JobRepo::mark_running(&db.pool, "b").await.unwrap();

    // Each recovery only applies to its own source status.
    assert!(!JobRepo::fail_orphaned(&db.pool, "a", "orphan").await.unwrap());
    assert!(!JobRepo::requeue_orphaned(&db.pool, "b").await.unwrap());

    assert!(JobRepo::requeue_orphaned(&db.pool, "a").await.unwrap());
    assert!(JobRepo::fail_orphaned(&db.pool, "b", "orphan").await.unwrap());

    let a = JobRepo::find(&db.pool, "a").await.unwrap().unwrap();
    let b = JobRepo::find(&db.pool, "b").await.unwrap().unwrap();
    assert_eq!(a.status, JobStatus::Queued);
    assert_eq!(b.status, JobStatus::Error);
    assert_eq!(b.error.as_deref(), Some("orphan"));
}

// ---------------------------------------------------------------------------
// Listings
// ---------------------------------------------------------------------------

#[tokio::test]
async fn active_listing_excludes_starting_and_terminal() {
    let db = common::test_db().await;
    for id in ["q", "s", "r", "d"] {
        JobRepo::enqueue(&db.pool, &new_job(id)).await.unwrap();
    }
    let claimed: Vec<String> = {
        let mut ids = Vec::new();
        for _ in 0..4 {
            ids.push(JobRepo::claim_next(&db.pool).await.unwrap().unwrap().thread_id);
        }
        ids
    };
    assert_eq!(claimed, ["q", "s", "r", "d"]);

    JobRepo::requeue_orphaned(&db.pool, "q").await.unwrap();
    JobRepo::mark_running(&db.pool, "r").await.unwrap();
    JobRepo::mark_running(&db.pool, "d").await.unwrap();
    JobRepo::complete(&db.pool, "d").await.unwrap();

    let active = JobRepo::list_active(&db.pool).await.unwrap();
    let mut ids: Vec<&str> = active.iter().map(|j| j.thread_id.as_str()).collect();
    ids.sort_unstable();
    assert_eq!(ids, ["q", "r"]);

    let inflight = JobRepo::list_inflight(&db.pool).await.unwrap();
    let mut ids: Vec<&str> = inflight.iter().map(|j| j.thread_id.as_str()).collect();
    ids.sort_unstable();
    assert_eq!(ids, ["r", "s"]);
}

#[tokio::test]
async fn find_many_returns_only_known_jobs() {
    let db = common::test_db().await;
    JobRepo::enqueue(&db.pool, &new_job("1")).await.unwrap();
    JobRepo::enqueue(&db.pool, &new_job("2")).await.unwrap();

    let ids = vec!["1".to_string(), "2".to_string(), "3".to_string()];
    let jobs = JobRepo::find_many(&db.pool, &ids).await.unwrap();

    assert_eq!(jobs.len(), 2);
    assert!(JobRepo::find_many(&db.pool, &[]).await.unwrap().is_empty());
}

#[tokio::test]
async fn post_count_reads_crawler_posts() {
    let db = common::test_db().await;
    common::seed_posts(&db.pool, "42", 3).await;

    assert_eq!(ThreadRepo::post_count(&db.pool, "42").await.unwrap(), 3);
    assert_eq!(ThreadRepo::post_count(&db.pool, "7").await.unwrap(), 0);
}
