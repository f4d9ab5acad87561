//! Background judge dispatcher.
//!
//! A single long-lived task that, every `poll_interval` (or sooner when an
//! enqueue wakes it), reclaims orphans and then claims queued jobs until the
//! inflight ceiling is reached, launching one worker task per claim.
//!
//! The ceiling is advisory: the count and the claim are separate
//! statements, so a slight transient overshoot is possible and corrects
//! itself because no claim happens while over capacity.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use triage_db::repositories::JobRepo;
use triage_db::DbPool;

use crate::reaper::OrphanReaper;
use crate::runner::JudgeRunner;
use crate::worker::JudgeWorker;

/// Floor for the tick period; `tokio::time::interval` rejects zero.
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Background job dispatcher.
pub struct JobDispatcher<R> {
    pool: DbPool,
    worker: JudgeWorker<R>,
    reaper: OrphanReaper,
    max_inflight: usize,
    poll_interval: Duration,
    wake: Arc<Notify>,
}

impl<R: JudgeRunner> JobDispatcher<R> {
    pub fn new(
        pool: DbPool,
        worker: JudgeWorker<R>,
        reaper: OrphanReaper,
        max_inflight: usize,
        poll_interval: Duration,
        wake: Arc<Notify>,
    ) -> Self {
        Self {
            pool,
            worker,
            reaper,
            max_inflight,
            poll_interval: poll_interval.max(MIN_POLL_INTERVAL),
            wake,
        }
    }

    /// Run the dispatcher loop until the cancellation token is triggered.
    ///
    /// A failed cycle is logged and retried on the next tick; the loop
    /// itself never ends on an error.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!(
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            max_inflight = self.max_inflight,
            "Judge dispatcher started",
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Judge dispatcher shutting down");
                    break;
                }
                _ = ticker.tick() => {}
                _ = self.wake.notified() => {}
            }

            if let Err(e) = self.run_cycle().await {
                tracing::error!(error = %e, "Dispatch cycle failed");
            }
        }
    }

    /// One dispatch cycle. Returns the number of workers launched.
    pub async fn run_cycle(&self) -> Result<usize, sqlx::Error> {
        let reaped = self.reaper.reap(Utc::now()).await?;
        if !reaped.is_empty() {
            tracing::info!(
                requeued = reaped.requeued.len(),
                failed = reaped.failed.len(),
                "Reclaimed orphaned judge jobs",
            );
        }

        let mut launched = 0;
        loop {
            let inflight = JobRepo::count_inflight(&self.pool).await?;
            if inflight >= self.max_inflight as i64 {
                tracing::debug!(inflight, max_inflight = self.max_inflight, "At capacity");
                break;
            }

            let Some(job) = JobRepo::claim_next(&self.pool).await? else {
                break;
            };
            tracing::info!(
                thread_id = %job.thread_id,
                model = %job.model,
                dry_run = job.dry_run,
                inflight,
                "Judge job claimed",
            );

            let worker = self.worker.clone();
            tokio::spawn(async move {
                worker.run(job).await;
            });
            launched += 1;
        }

        Ok(launched)
    }
}
