//! Durable per-model quota exhaustion state.
//!
//! Recorded when a job fails with quota vocabulary, cleared by the next
//! success on the same model. The state is advisory: clients read it to
//! avoid futile retries, the dispatcher never consults it.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::Utc;
use serde_json::Value;
use triage_core::quota::{self, QuotaKeys};
use triage_core::types::{format_utc_seconds, Timestamp};
use triage_db::repositories::QuotaStateRepo;
use triage_db::DbPool;

/// Reports older than this are assumed to belong to an earlier failure.
const REPORT_FRESHNESS: Duration = Duration::from_secs(180);

/// File name shape of the judge CLI's error reports.
const REPORT_PREFIX: &str = "gemini-client-error-";
const REPORT_SUFFIX: &str = ".json";

#[derive(Debug, Clone)]
pub struct QuotaTracker {
    pool: DbPool,
    report_dir: PathBuf,
}

impl QuotaTracker {
    pub fn new(pool: DbPool, report_dir: PathBuf) -> Self {
        Self { pool, report_dir }
    }

    /// Record a quota exhaustion for `model`, estimating the reset time
    /// from `detail` or, failing that, from a recent error report.
    ///
    /// Returns the estimated reset time, if one was found.
    pub async fn record_exhaustion(
        &self,
        model: &str,
        detail: &str,
    ) -> Result<Option<Timestamp>, sqlx::Error> {
        let now = Utc::now();
        let reset_at = match quota::parse_reset_after(detail, now) {
            Some(reset_at) => Some(reset_at),
            None => self.reset_from_report(detail, now).await,
        };

        let keys = QuotaKeys::for_model(model);
        QuotaStateRepo::set(&self.pool, &keys.exhausted_at, &format_utc_seconds(now)).await?;
        QuotaStateRepo::set(&self.pool, &keys.message, &quota::summarize_error(detail)).await?;
        match reset_at {
            Some(reset_at) => {
                QuotaStateRepo::set(&self.pool, &keys.reset_at, &format_utc_seconds(reset_at))
                    .await?;
            }
            // An estimate from an earlier exhaustion no longer applies.
            None => {
                QuotaStateRepo::delete_keys(&self.pool, &[keys.reset_at.as_str()]).await?;
            }
        }

        tracing::warn!(
            model,
            reset_at = reset_at.map(format_utc_seconds).as_deref(),
            "Judge quota exhausted",
        );
        Ok(reset_at)
    }

    /// Forget any recorded exhaustion for `model`.
    pub async fn clear(&self, model: &str) -> Result<(), sqlx::Error> {
        let keys = QuotaKeys::for_model(model);
        let removed = QuotaStateRepo::delete_keys(&self.pool, &keys.all()).await?;
        if removed > 0 {
            tracing::info!(model, "Judge quota state cleared");
        }
        Ok(())
    }

    async fn reset_from_report(&self, detail: &str, now: Timestamp) -> Option<Timestamp> {
        let path = match quota::report_path_in(detail) {
            Some(explicit) if tokio::fs::try_exists(explicit).await.unwrap_or(false) => {
                PathBuf::from(explicit)
            }
            _ => newest_report(&self.report_dir).await?,
        };

        let text = tokio::fs::read_to_string(&path).await.ok()?;
        let report: Value = serde_json::from_str(&text).ok()?;
        let message = quota::report_message(&report)?;
        let reset_at = quota::parse_reset_after(message, now);

        tracing::debug!(
            path = %path.display(),
            found = reset_at.is_some(),
            "Read judge error report",
        );
        reset_at
    }
}

/// Most recently modified error report in `dir`, if it is fresh.
async fn newest_report(dir: &Path) -> Option<PathBuf> {
    let mut entries = tokio::fs::read_dir(dir).await.ok()?;
    let mut newest: Option<(SystemTime, PathBuf)> = None;

    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if !name.starts_with(REPORT_PREFIX) || !name.ends_with(REPORT_SUFFIX) {
            continue;
        }
        let Ok(modified) = entry.metadata().await.and_then(|m| m.modified()) else {
            continue;
        };
        if newest.as_ref().map_or(true, |(best, _)| modified > *best) {
            newest = Some((modified, entry.path()));
        }
    }

    let (modified, path) = newest?;
    let age = SystemTime::now().duration_since(modified).unwrap_or_default();
    (age <= REPORT_FRESHNESS).then_some(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn newest_report_ignores_other_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("unrelated.json"), "{}").unwrap();
        assert!(newest_report(dir.path()).await.is_none());

        std::fs::write(dir.path().join("gemini-client-error-1.json"), "{}").unwrap();
        let found = newest_report(dir.path()).await.unwrap();
        assert!(found.ends_with("gemini-client-error-1.json"));
    }

    #[tokio::test]
    async fn missing_directory_yields_none() {
        assert!(newest_report(Path::new("/nonexistent/report/dir")).await.is_none());
    }
}
