//! Repository for the `judge_jobs` table.
//!
//! Every status change is a conditional UPDATE guarded on the statuses the
//! job may legally leave from, so concurrent writers (dispatcher, workers,
//! orphan reaper, cancellation) can race without a shared lock: the loser
//! simply observes zero affected rows. Engine writers never move a row out
//! of a terminal status; only an explicit re-enqueue resets one.

use chrono::Utc;
use sqlx::SqliteExecutor;
use triage_core::judge_output::JudgeOutput;
use triage_core::types::Timestamp;

use crate::models::job::{Job, NewJob};
use crate::models::status::{
    JobStatus, ACTIVE_STATUSES, INFLIGHT_STATUSES, LISTED_ACTIVE_STATUSES,
};
use super::judgment_repo::JudgmentRepo;
use crate::DbPool;

/// Column list for `judge_jobs` queries.
const COLUMNS: &str =
    "thread_id, status, dry_run, model, error, started_at, finished_at, updated_at";

/// Provides state-machine operations for judge jobs.
pub struct JobRepo;

/// Side effects applied together with a guarded status change.
struct Transition<'a> {
    to: JobStatus,
    error: Option<&'a str>,
    set_started: bool,
    set_finished: bool,
}

impl JobRepo {
    const DONE: Transition<'static> = Transition {
        to: JobStatus::Done,
        error: None,
        set_started: false,
        set_finished: true,
    };

    // -----------------------------------------------------------------------
    // Creation
    // -----------------------------------------------------------------------

    /// Queue a job, creating the row or restarting a terminal one.
    ///
    /// Returns `None` without touching the row when the job is already
    /// queued, starting or running, so repeated enqueues never produce a
    /// second worker.
    pub async fn enqueue(pool: &DbPool, job: &NewJob<'_>) -> Result<Option<Job>, sqlx::Error> {
        Self::upsert_fresh(pool, job, JobStatus::Queued, None).await
    }

    /// Record an enqueue that was short-circuited because the thread has
    /// nothing to judge. Same idempotency rule as [`JobRepo::enqueue`].
    pub async fn mark_skipped(
        pool: &DbPool,
        job: &NewJob<'_>,
        reason: &str,
    ) -> Result<Option<Job>, sqlx::Error> {
        Self::upsert_fresh(pool, job, JobStatus::Skipped, Some(reason)).await
    }

    async fn upsert_fresh(
        pool: &DbPool,
        job: &NewJob<'_>,
        status: JobStatus,
        error: Option<&str>,
    ) -> Result<Option<Job>, sqlx::Error> {
        let now = Utc::now();
        let finished_at = status.is_terminal().then_some(now);
        let query = format!(
            "INSERT INTO judge_jobs \
                 (thread_id, status, dry_run, model, error, started_at, finished_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, NULL, ?6, ?7) \
             ON CONFLICT(thread_id) DO UPDATE SET \
                 status = excluded.status, \
                 dry_run = excluded.dry_run, \
                 model = excluded.model, \
                 error = excluded.error, \
                 started_at = NULL, \
                 finished_at = excluded.finished_at, \
                 updated_at = excluded.updated_at \
             WHERE judge_jobs.status NOT IN (?8, ?9, ?10) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(job.thread_id)
            .bind(status)
            .bind(job.dry_run)
            .bind(job.model)
            .bind(error)
            .bind(finished_at)
            .bind(now)
            .bind(ACTIVE_STATUSES[0])
            .bind(ACTIVE_STATUSES[1])
            .bind(ACTIVE_STATUSES[2])
            .fetch_optional(pool)
            .await
    }

    // -----------------------------------------------------------------------
    // Dispatch
    // -----------------------------------------------------------------------

    /// Number of jobs counted against the inflight ceiling.
    pub async fn count_inflight(pool: &DbPool) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM judge_jobs WHERE status IN (?1, ?2)")
            .bind(INFLIGHT_STATUSES[0])
            .bind(INFLIGHT_STATUSES[1])
            .fetch_one(pool)
            .await
    }

    /// Claim the oldest queued job (`queued -> starting`).
    ///
    /// A single conditional UPDATE: when two claimers race for the same
    /// row, exactly one gets it back and the other gets `None`.
    pub async fn claim_next(pool: &DbPool) -> Result<Option<Job>, sqlx::Error> {
        let query = format!(
            "UPDATE judge_jobs \
             SET status = ?1, updated_at = ?2 \
             WHERE thread_id = ( \
                 SELECT thread_id FROM judge_jobs \
                 WHERE status = ?3 \
                 ORDER BY updated_at ASC, rowid ASC \
                 LIMIT 1 \
             ) \
               AND status = ?3 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(JobStatus::Starting)
            .bind(Utc::now())
            .bind(JobStatus::Queued)
            .fetch_optional(pool)
            .await
    }

    // -----------------------------------------------------------------------
    // Worker transitions
    // -----------------------------------------------------------------------

    /// `starting -> running`, recording `started_at`.
    ///
    /// Returns `false` when the claim was cancelled or reclaimed meanwhile.
    pub async fn mark_running(pool: &DbPool, thread_id: &str) -> Result<bool, sqlx::Error> {
        let to = Transition {
            to: JobStatus::Running,
            error: None,
            set_started: true,
            set_finished: false,
        };
        Self::transition(pool, thread_id, &[JobStatus::Starting], to).await
    }

    /// `running -> done`.
    pub async fn complete(pool: &DbPool, thread_id: &str) -> Result<bool, sqlx::Error> {
        Self::transition(pool, thread_id, &[JobStatus::Running], Self::DONE).await
    }

    /// `running -> done`, storing `judgment` (output and model) in the same
    /// transaction. When the guard fails nothing is written, so a job that
    /// was cancelled meanwhile never gains a judgment.
    pub async fn complete_with_judgment(
        pool: &DbPool,
        thread_id: &str,
        judgment: Option<(&JudgeOutput, &str)>,
    ) -> Result<bool, sqlx::Error> {
        let mut tx = pool.begin().await?;

        if !Self::transition(&mut *tx, thread_id, &[JobStatus::Running], Self::DONE).await? {
            return Ok(false);
        }
        if let Some((output, model)) = judgment {
            JudgmentRepo::upsert_with(&mut *tx, thread_id, output, model).await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    /// `starting | running -> error` with a diagnostic message.
    pub async fn fail(pool: &DbPool, thread_id: &str, error: &str) -> Result<bool, sqlx::Error> {
        let to = Transition {
            to: JobStatus::Error,
            error: Some(error),
            set_started: false,
            set_finished: true,
        };
        Self::transition(pool, thread_id, &INFLIGHT_STATUSES, to).await
    }

    // -----------------------------------------------------------------------
    // Cancellation and orphan recovery
    // -----------------------------------------------------------------------

    /// Any non-terminal status `-> cancelled`.
    pub async fn cancel(pool: &DbPool, thread_id: &str) -> Result<bool, sqlx::Error> {
        let to = Transition {
            to: JobStatus::Cancelled,
            error: None,
            set_started: false,
            set_finished: true,
        };
        Self::transition(pool, thread_id, &ACTIVE_STATUSES, to).await
    }

    /// Orphaned claim: `starting -> queued`.
    pub async fn requeue_orphaned(pool: &DbPool, thread_id: &str) -> Result<bool, sqlx::Error> {
        let to = Transition {
            to: JobStatus::Queued,
            error: None,
            set_started: false,
            set_finished: false,
        };
        Self::transition(pool, thread_id, &[JobStatus::Starting], to).await
    }

    /// Orphaned execution: `running -> error`.
    pub async fn fail_orphaned(
        pool: &DbPool,
        thread_id: &str,
        error: &str,
    ) -> Result<bool, sqlx::Error> {
        let to = Transition {
            to: JobStatus::Error,
            error: Some(error),
            set_started: false,
            set_finished: true,
        };
        Self::transition(pool, thread_id, &[JobStatus::Running], to).await
    }

    async fn transition<'e, E>(
        executor: E,
        thread_id: &str,
        from: &[JobStatus],
        change: Transition<'_>,
    ) -> Result<bool, sqlx::Error>
    where
        E: SqliteExecutor<'e>,
    {
        debug_assert!(from.iter().all(|s| s.can_transition_to(change.to)));

        let now: Timestamp = Utc::now();
        let mut sets = String::from("status = ?, error = ?, updated_at = ?");
        if change.set_started {
            sets.push_str(", started_at = ?");
        }
        if change.set_finished {
            sets.push_str(", finished_at = ?");
        }
        let query = format!(
            "UPDATE judge_jobs SET {sets} WHERE thread_id = ? AND status IN ({})",
            placeholders(from.len())
        );

        let mut q = sqlx::query(&query)
            .bind(change.to)
            .bind(change.error)
            .bind(now);
        if change.set_started {
            q = q.bind(now);
        }
        if change.set_finished {
            q = q.bind(now);
        }
        q = q.bind(thread_id);
        for status in from {
            q = q.bind(*status);
        }

        let result = q.execute(executor).await?;
        Ok(result.rows_affected() > 0)
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Find the job for a thread.
    pub async fn find(pool: &DbPool, thread_id: &str) -> Result<Option<Job>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM judge_jobs WHERE thread_id = ?1");
        sqlx::query_as::<_, Job>(&query)
            .bind(thread_id)
            .fetch_optional(pool)
            .await
    }

    /// Current status of a thread's job, if any.
    pub async fn find_status(
        pool: &DbPool,
        thread_id: &str,
    ) -> Result<Option<JobStatus>, sqlx::Error> {
        sqlx::query_scalar::<_, JobStatus>("SELECT status FROM judge_jobs WHERE thread_id = ?1")
            .bind(thread_id)
            .fetch_optional(pool)
            .await
    }

    /// Jobs for the given threads, in no particular order.
    pub async fn find_many(pool: &DbPool, thread_ids: &[String]) -> Result<Vec<Job>, sqlx::Error> {
        if thread_ids.is_empty() {
            return Ok(Vec::new());
        }
        let query = format!(
            "SELECT {COLUMNS} FROM judge_jobs WHERE thread_id IN ({})",
            placeholders(thread_ids.len())
        );
        let mut q = sqlx::query_as::<_, Job>(&query);
        for id in thread_ids {
            q = q.bind(id);
        }
        q.fetch_all(pool).await
    }

    /// Jobs in `starting` or `running`, the orphan reaper's candidates.
    pub async fn list_inflight(pool: &DbPool) -> Result<Vec<Job>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM judge_jobs WHERE status IN (?1, ?2) ORDER BY updated_at ASC"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(INFLIGHT_STATUSES[0])
            .bind(INFLIGHT_STATUSES[1])
            .fetch_all(pool)
            .await
    }

    /// Queued and running jobs, most recently updated first.
    pub async fn list_active(pool: &DbPool) -> Result<Vec<Job>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM judge_jobs WHERE status IN (?1, ?2) ORDER BY updated_at DESC"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(LISTED_ACTIVE_STATUSES[0])
            .bind(LISTED_ACTIVE_STATUSES[1])
            .fetch_all(pool)
            .await
    }
}

/// `?, ?, ?` with `n` placeholders.
pub(crate) fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}
