//! Execution of a single claimed judge job.
//!
//! A worker owns its job from `starting` until it writes a terminal status,
//! and owns the job's registry entry for the lifetime of the execution. It
//! never leaves the job non-terminal on its own account: every failure,
//! including database and spawn errors, ends in `error`. Status writes are
//! guarded, so a concurrent cancellation always wins over a late result.

use std::sync::Arc;
use std::time::Instant;

use serde_json::{Map, Value};
use triage_core::judge_output::{self, ParsedOutput};
use triage_core::quota;
use triage_core::types::truncate_chars;
use triage_db::models::job::Job;
use triage_db::models::status::JobStatus;
use triage_db::repositories::{JobMetricsRepo, JobRepo};
use triage_db::DbPool;

use crate::error::WorkerError;
use crate::quota::QuotaTracker;
use crate::registry::{ProcessHandle, ProcessRegistry, Signal};
use crate::runner::{JudgeExecution, JudgeRunner, RunOutput, RunRequest};

/// Bound on raw failure detail before summarising.
const MAX_DETAIL_CHARS: usize = 2000;

/// Bound on the stdout excerpt quoted when no JSON could be parsed.
const MAX_UNPARSED_CHARS: usize = 1000;

/// How a worker run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// Judged and marked `done`.
    Done,
    /// Marked `error`.
    Failed,
    /// Cancelled before or during execution; the row was left `cancelled`.
    Cancelled,
    /// The claim was gone by the time the worker started.
    Abandoned,
}

/// Runs claimed jobs with a [`JudgeRunner`].
pub struct JudgeWorker<R> {
    pool: DbPool,
    runner: Arc<R>,
    registry: Arc<ProcessRegistry>,
    quota: QuotaTracker,
}

impl<R> Clone for JudgeWorker<R> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            runner: Arc::clone(&self.runner),
            registry: Arc::clone(&self.registry),
            quota: self.quota.clone(),
        }
    }
}

impl<R: JudgeRunner> JudgeWorker<R> {
    pub fn new(
        pool: DbPool,
        runner: Arc<R>,
        registry: Arc<ProcessRegistry>,
        quota: QuotaTracker,
    ) -> Self {
        Self {
            pool,
            runner,
            registry,
            quota,
        }
    }

    /// Execute a job previously claimed into `starting`.
    pub async fn run(&self, job: Job) -> JobOutcome {
        let started = Instant::now();
        let outcome = match self.execute(&job, started).await {
            Ok(outcome) => outcome,
            Err(e) => self.fail_crashed(&job, &e).await,
        };

        tracing::info!(
            thread_id = %job.thread_id,
            model = %job.model,
            ?outcome,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Judge job finished",
        );
        outcome
    }

    async fn execute(&self, job: &Job, started: Instant) -> Result<JobOutcome, WorkerError> {
        let thread_id = job.thread_id.as_str();

        // Check-before-work: a cancelled or reclaimed job is no longer `starting`.
        if !JobRepo::mark_running(&self.pool, thread_id).await? {
            tracing::info!(thread_id, "Job no longer claimed; not starting judge");
            return Ok(JobOutcome::Abandoned);
        }

        let request = RunRequest {
            thread_id: job.thread_id.clone(),
            model: job.model.clone(),
        };
        let execution = self.runner.spawn(&request).await?;
        let spawn_s = started.elapsed().as_secs_f64();

        let (handle, control) = ProcessHandle::new(execution.pid());
        let registration = self.registry.register(thread_id, handle.clone());
        tracing::info!(thread_id, pid = execution.pid(), "Judge running");

        // A cancellation that landed between `mark_running` and registration
        // found nothing to signal; deliver it now.
        if JobRepo::find_status(&self.pool, thread_id).await? == Some(JobStatus::Cancelled) {
            handle.signal(Signal::Terminate);
        }

        let result = execution.wait(control).await;
        drop(registration);
        let output = result?;
        let process_s = started.elapsed().as_secs_f64();

        if JobRepo::find_status(&self.pool, thread_id).await? == Some(JobStatus::Cancelled) {
            tracing::info!(thread_id, "Judge cancelled while running");
            return Ok(JobOutcome::Cancelled);
        }

        let mut timings = Map::new();
        timings.insert("spawn_s".into(), round_secs(spawn_s));
        timings.insert("process_s".into(), round_secs(process_s));

        if !output.success() {
            JobMetricsRepo::upsert(&self.pool, thread_id, &timings).await?;
            return self.fail_with_detail(job, &failure_detail(&output)).await;
        }

        let parsed = match judge_output::parse(&output.stdout) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!(thread_id, error = %e, "Judge output not parseable");
                JobMetricsRepo::upsert(&self.pool, thread_id, &timings).await?;
                let detail = format!(
                    "No JSON returned. Output: {}",
                    truncate_chars(output.stdout.trim(), MAX_UNPARSED_CHARS)
                );
                return self.fail_with_detail(job, &detail).await;
            }
        };

        self.finish(job, parsed, timings).await
    }

    async fn finish(
        &self,
        job: &Job,
        parsed: ParsedOutput,
        mut timings: Map<String, Value>,
    ) -> Result<JobOutcome, WorkerError> {
        let thread_id = job.thread_id.as_str();
        tracing::debug!(thread_id, strategy = parsed.strategy.as_str(), "Judge output parsed");

        for (stage, secs) in &parsed.output.timings {
            timings.insert(stage.clone(), secs.clone());
        }
        JobMetricsRepo::upsert(&self.pool, thread_id, &timings).await?;

        let judgment = (!job.dry_run).then_some((&parsed.output, job.model.as_str()));
        if !JobRepo::complete_with_judgment(&self.pool, thread_id, judgment).await? {
            tracing::info!(thread_id, "Job left running before completion; keeping its status");
            return Ok(JobOutcome::Cancelled);
        }

        if let Err(e) = self.quota.clear(&job.model).await {
            tracing::error!(model = %job.model, error = %e, "Failed to clear quota state");
        }
        Ok(JobOutcome::Done)
    }

    /// Classify `detail`, record quota exhaustion if it applies, and mark
    /// the job `error` with the summarised message.
    async fn fail_with_detail(&self, job: &Job, detail: &str) -> Result<JobOutcome, WorkerError> {
        self.note_quota(&job.model, detail).await;

        let message = quota::summarize_error(detail);
        if JobRepo::fail(&self.pool, &job.thread_id, &message).await? {
            tracing::warn!(thread_id = %job.thread_id, error = %message, "Judge job failed");
            Ok(JobOutcome::Failed)
        } else {
            Ok(JobOutcome::Cancelled)
        }
    }

    /// Last-resort handler: turn an unexpected error into `error`.
    async fn fail_crashed(&self, job: &Job, err: &WorkerError) -> JobOutcome {
        let detail = format!("Judge job crashed: {err}");
        tracing::error!(thread_id = %job.thread_id, error = %err, "Judge job crashed");
        self.note_quota(&job.model, &detail).await;

        match JobRepo::fail(&self.pool, &job.thread_id, &quota::summarize_error(&detail)).await {
            Ok(true) => JobOutcome::Failed,
            Ok(false) => JobOutcome::Cancelled,
            Err(e) => {
                // The reaper will fail the row once it is stuck.
                tracing::error!(thread_id = %job.thread_id, error = %e, "Failed to record crash");
                JobOutcome::Failed
            }
        }
    }

    async fn note_quota(&self, model: &str, detail: &str) {
        if !quota::is_quota_error(detail) {
            return;
        }
        if let Err(e) = self.quota.record_exhaustion(model, detail).await {
            tracing::error!(model, error = %e, "Failed to record quota exhaustion");
        }
    }
}

/// Failure detail of a nonzero exit: stderr, else stdout, else a fixed text.
fn failure_detail(output: &RunOutput) -> String {
    let stderr = output.stderr.trim();
    let stdout = output.stdout.trim();
    let detail = if !stderr.is_empty() {
        stderr
    } else if !stdout.is_empty() {
        stdout
    } else {
        "judge process failed"
    };
    truncate_chars(detail, MAX_DETAIL_CHARS).to_string()
}

fn round_secs(secs: f64) -> Value {
    Value::from((secs * 1e6).round() / 1e6)
}
