//! Orphan recovery for inflight jobs without a live execution.
//!
//! Registry membership is process-local, so after a restart every durable
//! `starting`/`running` row is an orphan. Stuck claims are requeued since
//! nothing ran yet; stuck executions are failed because their partial
//! effects are unknown.

use std::sync::Arc;
use std::time::Duration;

use triage_core::types::{ThreadId, Timestamp};
use triage_db::models::status::JobStatus;
use triage_db::repositories::JobRepo;
use triage_db::DbPool;

use crate::registry::ProcessRegistry;

/// Error stored on a `running` job reclaimed by the reaper.
pub const ORPHANED_ERROR: &str = "Judge job orphaned; no active process";

/// Jobs changed by one reaper pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReapReport {
    pub requeued: Vec<ThreadId>,
    pub failed: Vec<ThreadId>,
}

impl ReapReport {
    pub fn is_empty(&self) -> bool {
        self.requeued.is_empty() && self.failed.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct OrphanReaper {
    pool: DbPool,
    registry: Arc<ProcessRegistry>,
    stuck_after: chrono::Duration,
}

impl OrphanReaper {
    pub fn new(pool: DbPool, registry: Arc<ProcessRegistry>, stuck_after: Duration) -> Self {
        Self {
            pool,
            registry,
            stuck_after: chrono::Duration::from_std(stuck_after).unwrap_or(chrono::Duration::MAX),
        }
    }

    /// Reclaim every inflight job that has no registered execution and has
    /// been stuck for at least the threshold as of `now`.
    ///
    /// A `starting` job's age counts from its last update (the claim); a
    /// `running` job's from when it started.
    pub async fn reap(&self, now: Timestamp) -> Result<ReapReport, sqlx::Error> {
        let mut report = ReapReport::default();

        for job in JobRepo::list_inflight(&self.pool).await? {
            if self.registry.contains(&job.thread_id) {
                continue;
            }

            match job.status {
                JobStatus::Starting => {
                    if now - job.updated_at < self.stuck_after {
                        continue;
                    }
                    if JobRepo::requeue_orphaned(&self.pool, &job.thread_id).await? {
                        tracing::warn!(thread_id = %job.thread_id, "Requeued orphaned claim");
                        report.requeued.push(job.thread_id);
                    }
                }
                JobStatus::Running => {
                    let since = job.started_at.unwrap_or(job.updated_at);
                    if now - since < self.stuck_after {
                        continue;
                    }
                    if JobRepo::fail_orphaned(&self.pool, &job.thread_id, ORPHANED_ERROR).await? {
                        tracing::warn!(thread_id = %job.thread_id, "Failed orphaned judge job");
                        report.failed.push(job.thread_id);
                    }
                }
                _ => {}
            }
        }

        Ok(report)
    }
}
