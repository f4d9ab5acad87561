//! Judge job status and its state machine.
//!
//! Stored as lowercase TEXT in `judge_jobs.status`; the strings must match
//! the CHECK constraint in `20261019000002_create_judge_tables.sql`.
//!
//! ```text
//! (enqueue) -> queued -> starting -> running -> done | error | cancelled
//!     |          |          |
//!     v          |          +-> error | cancelled | queued (orphan)
//!  skipped       +-> cancelled
//! ```

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

/// Lifecycle status of a judge job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Starting,
    Running,
    Done,
    Error,
    Cancelled,
    Skipped,
}

/// Statuses counted against the inflight ceiling.
pub const INFLIGHT_STATUSES: [JobStatus; 2] = [JobStatus::Starting, JobStatus::Running];

/// Statuses reported by the active-jobs listing.
pub const LISTED_ACTIVE_STATUSES: [JobStatus; 2] = [JobStatus::Queued, JobStatus::Running];

/// Statuses for which a re-enqueue is answered idempotently.
pub const ACTIVE_STATUSES: [JobStatus; 3] =
    [JobStatus::Queued, JobStatus::Starting, JobStatus::Running];

impl JobStatus {
    pub const ALL: [JobStatus; 7] = [
        JobStatus::Queued,
        JobStatus::Starting,
        JobStatus::Running,
        JobStatus::Done,
        JobStatus::Error,
        JobStatus::Cancelled,
        JobStatus::Skipped,
    ];

    /// The TEXT value stored in the database.
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Starting => "starting",
            JobStatus::Running => "running",
            JobStatus::Done => "done",
            JobStatus::Error => "error",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Skipped => "skipped",
        }
    }

    /// Terminal statuses never change again through the engine.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Done | JobStatus::Error | JobStatus::Cancelled | JobStatus::Skipped
        )
    }

    pub fn is_active(self) -> bool {
        ACTIVE_STATUSES.contains(&self)
    }

    /// Whether the engine may move a job from `self` to `next`.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        match (self, next) {
            (Queued, Starting) => true,
            (Starting, Running) => true,
            (Running, Done) => true,
            (Starting | Running, Error) => true,
            (Queued | Starting | Running, Cancelled) => true,
            // Orphan reclamation of a claim whose worker never started.
            (Starting, Queued) => true,
            _ => false,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownStatus(pub String);

impl fmt::Display for UnknownStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown job status '{}'", self.0)
    }
}

impl std::error::Error for UnknownStatus {}

impl FromStr for JobStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}
