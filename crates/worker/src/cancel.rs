//! Cooperative-for-status, forceful-for-process cancellation.

use std::sync::Arc;
use std::time::Duration;

use triage_db::models::status::JobStatus;
use triage_db::repositories::JobRepo;
use triage_db::DbPool;

use crate::registry::{ProcessRegistry, Signal};
use crate::service::STATUS_IDLE;

/// Result of a cancellation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// No job exists for the thread.
    Idle,
    /// The job was already terminal; its status is returned unchanged.
    Unchanged(JobStatus),
    /// The job is now `cancelled`.
    Cancelled,
}

impl CancelOutcome {
    /// Status reported to the caller.
    pub fn status(self) -> &'static str {
        match self {
            Self::Idle => STATUS_IDLE,
            Self::Unchanged(status) => status.as_str(),
            Self::Cancelled => JobStatus::Cancelled.as_str(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CancelController {
    pool: DbPool,
    registry: Arc<ProcessRegistry>,
    grace: Duration,
}

impl CancelController {
    pub fn new(pool: DbPool, registry: Arc<ProcessRegistry>, grace: Duration) -> Self {
        Self {
            pool,
            registry,
            grace,
        }
    }

    /// Cancel the job for `thread_id`.
    ///
    /// The row is marked `cancelled` before the process is touched, so the
    /// owning worker sees the cancellation when its wait returns. A live
    /// process gets SIGTERM and, after the grace period, SIGKILL; the caller
    /// is never held longer than the grace period.
    pub async fn cancel(&self, thread_id: &str) -> Result<CancelOutcome, sqlx::Error> {
        let Some(status) = JobRepo::find_status(&self.pool, thread_id).await? else {
            return Ok(CancelOutcome::Idle);
        };
        if status.is_terminal() {
            return Ok(CancelOutcome::Unchanged(status));
        }

        if !JobRepo::cancel(&self.pool, thread_id).await? {
            // Lost the race against a terminal write.
            return Ok(match JobRepo::find_status(&self.pool, thread_id).await? {
                Some(current) => CancelOutcome::Unchanged(current),
                None => CancelOutcome::Idle,
            });
        }
        tracing::info!(thread_id, previous = %status, "Judge job cancelled");

        if let Some(handle) = self.registry.get(thread_id) {
            handle.signal(Signal::Terminate);
            if !handle.wait_exit(self.grace).await {
                tracing::warn!(
                    thread_id,
                    pid = handle.pid(),
                    grace_ms = self.grace.as_millis() as u64,
                    "Judge process ignored SIGTERM; killing",
                );
                handle.signal(Signal::Kill);
            }
        }

        Ok(CancelOutcome::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_statuses() {
        assert_eq!(CancelOutcome::Idle.status(), "idle");
        assert_eq!(CancelOutcome::Unchanged(JobStatus::Done).status(), "done");
        assert_eq!(CancelOutcome::Cancelled.status(), "cancelled");
    }
}
