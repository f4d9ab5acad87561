//! Judge job orchestration engine.
//!
//! Wires together the components that share one [`ProcessRegistry`]:
//! the [`JobDispatcher`] (admission + orphan recovery), the per-job
//! [`JudgeWorker`], the [`CancelController`], and the [`JudgeService`]
//! facade used by collaborators.
//!
//! [`ProcessRegistry`]: registry::ProcessRegistry
//! [`JobDispatcher`]: dispatcher::JobDispatcher
//! [`JudgeWorker`]: worker::JudgeWorker
//! [`CancelController`]: cancel::CancelController
//! [`JudgeService`]: service::JudgeService

use std::sync::Arc;

use tokio::sync::Notify;
use triage_core::error::CoreError;
use triage_db::DbPool;

pub mod cancel;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod quota;
pub mod reaper;
pub mod registry;
pub mod runner;
pub mod service;
pub mod worker;

use cancel::CancelController;
use config::EngineConfig;
use dispatcher::JobDispatcher;
use quota::QuotaTracker;
use reaper::OrphanReaper;
use registry::ProcessRegistry;
use runner::{AnyRunner, JudgeRunner};
use service::JudgeService;
use worker::JudgeWorker;

/// A fully wired engine instance.
pub struct Engine<R> {
    pub service: JudgeService,
    pub dispatcher: JobDispatcher<R>,
    pub registry: Arc<ProcessRegistry>,
}

impl Engine<AnyRunner> {
    /// Build an engine whose runner is selected by `config.mode`.
    pub fn from_config(pool: DbPool, config: EngineConfig) -> Result<Self, CoreError> {
        let runner = AnyRunner::from_config(&config)
            .map_err(|e| CoreError::Config(format!("JUDGE_COMMAND: {e}")))?;
        Ok(Self::with_runner(pool, config, runner))
    }
}

impl<R: JudgeRunner> Engine<R> {
    /// Build an engine around an explicit runner.
    pub fn with_runner(pool: DbPool, config: EngineConfig, runner: R) -> Self {
        let config = Arc::new(config);
        let registry = Arc::new(ProcessRegistry::new());
        let wake = Arc::new(Notify::new());

        let quota = QuotaTracker::new(pool.clone(), config.report_dir.clone());
        let worker = JudgeWorker::new(pool.clone(), Arc::new(runner), Arc::clone(&registry), quota);
        let reaper = OrphanReaper::new(pool.clone(), Arc::clone(&registry), config.stuck_after);
        let dispatcher = JobDispatcher::new(
            pool.clone(),
            worker,
            reaper,
            config.max_inflight,
            config.poll_interval,
            Arc::clone(&wake),
        );

        let canceller = CancelController::new(pool.clone(), Arc::clone(&registry), config.cancel_grace);
        let service = JudgeService::new(pool, config, wake, canceller);

        Self {
            service,
            dispatcher,
            registry,
        }
    }
}
