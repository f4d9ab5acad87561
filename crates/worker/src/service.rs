//! Operations offered to collaborators (the HTTP layer, tools, tests).
//!
//! Each call is a handful of short store statements; the only call that
//! may wait is [`JudgeService::cancel`], bounded by the cancel grace period.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::Notify;
use triage_core::error::CoreError;
use triage_core::quota::QuotaKeys;
use triage_core::types::{ThreadId, Timestamp};
use triage_db::models::job::{Job, NewJob};
use triage_db::models::status::JobStatus;
use triage_db::repositories::{
    JobMetricsRepo, JobRepo, JudgmentRepo, QuotaStateRepo, ThreadRepo,
};
use triage_db::DbPool;

use crate::cancel::{CancelController, CancelOutcome};
use crate::config::{EngineConfig, DEFAULT_MODEL};
use crate::error::EngineError;

/// Status reported for a thread with neither a job nor a judgment.
pub const STATUS_IDLE: &str = "idle";

/// Upper bound on ids per bulk status request.
pub const MAX_BULK_IDS: usize = 200;

/// `queued_reason` when the ceiling was already reached at enqueue time.
pub const QUEUED_REASON_CAPACITY: &str = "capacity";

/// `reason` of a skipped enqueue.
pub const SKIP_REASON_NO_POSTS: &str = "no_posts";

/// Error stored on a skipped job.
pub const SKIP_ERROR_NO_POSTS: &str = "no posts for thread";

/// Prefix shared by every quota state key.
const QUOTA_KEY_PREFIX: &str = "quota_";

// ---------------------------------------------------------------------------
// Views
// ---------------------------------------------------------------------------

/// Answer to an enqueue request.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct EnqueueResponse {
    pub thread_id: ThreadId,
    pub status: JobStatus,
    pub model: String,
    pub max_inflight: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queued_reason: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
}

/// Status of one thread's judging.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StatusView {
    pub thread_id: ThreadId,
    /// A [`JobStatus`] string, or [`STATUS_IDLE`].
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<Timestamp>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<Timestamp>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<Timestamp>,
}

impl StatusView {
    fn bare(thread_id: &str, status: &'static str) -> Self {
        Self {
            thread_id: thread_id.to_string(),
            status,
            error: None,
            started_at: None,
            finished_at: None,
            updated_at: None,
        }
    }
}

impl From<Job> for StatusView {
    fn from(job: Job) -> Self {
        Self {
            thread_id: job.thread_id,
            status: job.status.as_str(),
            error: job.error,
            started_at: job.started_at,
            finished_at: job.finished_at,
            updated_at: Some(job.updated_at),
        }
    }
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

/// Facade over the job store, quota state and cancellation controller.
#[derive(Clone)]
pub struct JudgeService {
    pool: DbPool,
    config: Arc<EngineConfig>,
    wake: Arc<Notify>,
    canceller: CancelController,
}

impl JudgeService {
    pub fn new(
        pool: DbPool,
        config: Arc<EngineConfig>,
        wake: Arc<Notify>,
        canceller: CancelController,
    ) -> Self {
        Self {
            pool,
            config,
            wake,
            canceller,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Queue a thread for judging.
    ///
    /// Idempotent while a job is queued, starting or running: the existing
    /// job's status is returned and nothing is written. A thread without
    /// posts is recorded as `skipped` and never reaches a worker.
    pub async fn enqueue(
        &self,
        thread_id: &str,
        dry_run: bool,
        model: Option<&str>,
    ) -> Result<EnqueueResponse, EngineError> {
        if thread_id.trim().is_empty() {
            return Err(CoreError::Validation("thread_id must not be empty".into()).into());
        }
        let model = model.unwrap_or(DEFAULT_MODEL);
        if !self.config.is_allowed_model(model) {
            return Err(EngineError::UnsupportedModel(model.to_string()));
        }

        if let Some(existing) = JobRepo::find(&self.pool, thread_id).await? {
            if existing.status.is_active() {
                return Ok(self.existing_response(existing));
            }
        }

        let new_job = NewJob {
            thread_id,
            dry_run,
            model,
        };

        if ThreadRepo::post_count(&self.pool, thread_id).await? == 0 {
            return match JobRepo::mark_skipped(&self.pool, &new_job, SKIP_ERROR_NO_POSTS).await? {
                Some(job) => {
                    tracing::info!(thread_id, "Thread has no posts; judge job skipped");
                    Ok(EnqueueResponse {
                        reason: Some(SKIP_REASON_NO_POSTS),
                        ..self.response(job)
                    })
                }
                None => self.raced_response(thread_id).await,
            };
        }

        let inflight = JobRepo::count_inflight(&self.pool).await?;
        match JobRepo::enqueue(&self.pool, &new_job).await? {
            Some(job) => {
                tracing::info!(thread_id, model, dry_run, inflight, "Judge job queued");
                self.wake.notify_one();
                let at_capacity = inflight >= self.config.max_inflight as i64;
                Ok(EnqueueResponse {
                    queued_reason: at_capacity.then_some(QUEUED_REASON_CAPACITY),
                    ..self.response(job)
                })
            }
            None => self.raced_response(thread_id).await,
        }
    }

    /// Status of one thread: its job, else `done` if a judgment exists,
    /// else `idle`.
    pub async fn status(&self, thread_id: &str) -> Result<StatusView, EngineError> {
        if let Some(job) = JobRepo::find(&self.pool, thread_id).await? {
            return Ok(job.into());
        }
        if JudgmentRepo::exists(&self.pool, thread_id).await? {
            return Ok(StatusView::bare(thread_id, JobStatus::Done.as_str()));
        }
        Ok(StatusView::bare(thread_id, STATUS_IDLE))
    }

    /// Batched [`status`](Self::status), answered in request order.
    pub async fn status_bulk(&self, thread_ids: &[String]) -> Result<Vec<StatusView>, EngineError> {
        if thread_ids.len() > MAX_BULK_IDS {
            return Err(EngineError::TooManyIds {
                count: thread_ids.len(),
                max: MAX_BULK_IDS,
            });
        }
        if thread_ids.is_empty() {
            return Ok(Vec::new());
        }

        let jobs: HashMap<ThreadId, Job> = JobRepo::find_many(&self.pool, thread_ids)
            .await?
            .into_iter()
            .map(|job| (job.thread_id.clone(), job))
            .collect();

        let missing: Vec<String> = thread_ids
            .iter()
            .filter(|id| !jobs.contains_key(*id))
            .cloned()
            .collect();
        let judged: HashSet<String> = JudgmentRepo::existing_ids(&self.pool, &missing)
            .await?
            .into_iter()
            .collect();

        Ok(thread_ids
            .iter()
            .map(|id| match jobs.get(id) {
                Some(job) => job.clone().into(),
                None if judged.contains(id) => StatusView::bare(id, JobStatus::Done.as_str()),
                None => StatusView::bare(id, STATUS_IDLE),
            })
            .collect())
    }

    /// Stage timings of the last run, empty if the thread never ran.
    pub async fn metrics(&self, thread_id: &str) -> Result<Map<String, Value>, EngineError> {
        Ok(JobMetricsRepo::find(&self.pool, thread_id)
            .await?
            .unwrap_or_default())
    }

    /// Queued and running jobs, most recently updated first.
    pub async fn active(&self) -> Result<Vec<StatusView>, EngineError> {
        Ok(JobRepo::list_active(&self.pool)
            .await?
            .into_iter()
            .map(StatusView::from)
            .collect())
    }

    /// Raw quota state entries, for one model or all of them.
    pub async fn quota_state(
        &self,
        model: Option<&str>,
    ) -> Result<BTreeMap<String, Option<String>>, EngineError> {
        let entries = match model {
            Some(model) => {
                let keys = QuotaKeys::for_model(model);
                QuotaStateRepo::list_keys(&self.pool, &keys.all()).await?
            }
            None => QuotaStateRepo::list_prefixed(&self.pool, QUOTA_KEY_PREFIX).await?,
        };
        Ok(entries.into_iter().map(|e| (e.key, e.value)).collect())
    }

    /// Cancel a thread's job; see [`CancelController::cancel`].
    pub async fn cancel(&self, thread_id: &str) -> Result<CancelOutcome, EngineError> {
        Ok(self.canceller.cancel(thread_id).await?)
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn response(&self, job: Job) -> EnqueueResponse {
        EnqueueResponse {
            thread_id: job.thread_id,
            status: job.status,
            model: job.model,
            max_inflight: self.config.max_inflight,
            queued_reason: None,
            reason: None,
        }
    }

    fn existing_response(&self, job: Job) -> EnqueueResponse {
        tracing::debug!(thread_id = %job.thread_id, status = %job.status, "Judge job already active");
        self.response(job)
    }

    /// A concurrent enqueue activated the job between our read and write.
    async fn raced_response(&self, thread_id: &str) -> Result<EnqueueResponse, EngineError> {
        match JobRepo::find(&self.pool, thread_id).await? {
            Some(job) => Ok(self.existing_response(job)),
            None => Err(CoreError::Internal(format!(
                "judge job for thread {thread_id} vanished during enqueue"
            ))
            .into()),
        }
    }
}
