//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async methods that
//! accept `&DbPool` as the first argument. Every method is one short
//! statement; no transaction outlives a call.

pub mod job_metrics_repo;
pub mod job_repo;
pub mod judgment_repo;
pub mod quota_state_repo;
pub mod thread_repo;

pub use job_metrics_repo::JobMetricsRepo;
pub use job_repo::JobRepo;
pub use judgment_repo::JudgmentRepo;
pub use quota_state_repo::QuotaStateRepo;
pub use thread_repo::ThreadRepo;
