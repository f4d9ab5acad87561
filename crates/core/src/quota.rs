//! Quota exhaustion classification from judge failure text.
//!
//! The judge process reports quota problems only as free text on stderr
//! (or inside a JSON error report it writes to a temp directory). This
//! module holds the pure text handling: keyword classification, the
//! client-facing error summary, and parsing of `reset after 1h5m30s`
//! phrases into an absolute reset time.

use std::sync::LazyLock;

use chrono::Timelike;
use regex::Regex;
use serde_json::Value;

use crate::types::{truncate_chars, Timestamp};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Lower-cased fragments that mark a failure as quota exhaustion.
pub const QUOTA_MARKERS: [&str; 5] = [
    "quota",
    "exhausted your capacity",
    "terminalquotaerror",
    "rate limit",
    "resource_exhausted",
];

/// Client-facing message stored for quota failures.
pub const QUOTA_SUMMARY: &str = "Judge quota exhausted; try later";

/// Client-facing message stored for timeouts.
pub const TIMEOUT_SUMMARY: &str = "Judge timed out; try later";

/// Client-facing message stored when the launcher shell itself broke.
pub const SHELL_SUMMARY: &str = "Judge prompt shell error";

/// Maximum length of any other stored error message.
pub const MAX_SUMMARY_CHARS: usize = 500;

/// Prefix of the per-model state key holding the exhaustion timestamp.
pub const KEY_EXHAUSTED_AT: &str = "quota_exhausted_at";

/// Prefix of the per-model state key holding the human-readable message.
pub const KEY_EXHAUSTED_MESSAGE: &str = "quota_exhausted_message";

/// Prefix of the per-model state key holding the estimated reset time.
pub const KEY_RESET_AT: &str = "quota_reset_at";

static RESET_AFTER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)reset after\s+((?:\d+h)?(?:\d+m)?(?:\d+s)?)").expect("valid regex")
});

static DURATION_PART_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)([hms])").expect("valid regex"));

static REPORT_PATH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Full report available at:\s*(/\S+\.json)").expect("valid regex")
});

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Whether the failure text describes quota or rate-limit exhaustion.
pub fn is_quota_error(detail: &str) -> bool {
    let text = detail.to_lowercase();
    QUOTA_MARKERS.iter().any(|marker| text.contains(marker))
}

/// Reduce raw failure text to the bounded message stored on the job row.
pub fn summarize_error(detail: &str) -> String {
    let text = detail.to_lowercase();
    if is_quota_error(detail) {
        return QUOTA_SUMMARY.to_string();
    }
    if text.contains("timed out") || text.contains("timeout") {
        return TIMEOUT_SUMMARY.to_string();
    }
    if text.contains("unexpected eof") && text.contains("bash") {
        return SHELL_SUMMARY.to_string();
    }
    truncate_chars(detail, MAX_SUMMARY_CHARS).to_string()
}

// ---------------------------------------------------------------------------
// Reset estimation
// ---------------------------------------------------------------------------

/// Parse a `reset after <Nh><Nm><Ns>` phrase into seconds.
///
/// Every component is optional but at least one must be present and the
/// total must be positive.
pub fn parse_reset_after_secs(detail: &str) -> Option<i64> {
    let captures = RESET_AFTER_RE.captures(detail)?;
    let token = captures.get(1)?.as_str();

    let mut total: i64 = 0;
    for part in DURATION_PART_RE.captures_iter(token) {
        let value: i64 = part[1].parse().ok()?;
        let unit = match &part[2] {
            "h" => 3600,
            "m" => 60,
            _ => 1,
        };
        total = total.checked_add(value.checked_mul(unit)?)?;
    }

    (total > 0).then_some(total)
}

/// Absolute reset time (second precision) for a `reset after ...` phrase.
pub fn parse_reset_after(detail: &str, now: Timestamp) -> Option<Timestamp> {
    let secs = parse_reset_after_secs(detail)?;
    let now = now.with_nanosecond(0).unwrap_or(now);
    Some(now + chrono::Duration::seconds(secs))
}

/// Path of an error report explicitly referenced in the failure text.
pub fn report_path_in(detail: &str) -> Option<&str> {
    REPORT_PATH_RE
        .captures(detail)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// Extract the human-readable message from a judge error report.
///
/// Accepted shapes: `{"message": "..."}`, `{"message": {"message": "..."}}`,
/// `{"error": {"message": "..."}}` and `{"error": "..."}`.
pub fn report_message(report: &Value) -> Option<&str> {
    let obj = report.as_object()?;

    match obj.get("message") {
        Some(Value::String(msg)) => return Some(msg.as_str()),
        Some(Value::Object(inner)) => {
            if let Some(Value::String(msg)) = inner.get("message") {
                return Some(msg.as_str());
            }
        }
        _ => {}
    }

    match obj.get("error") {
        Some(Value::Object(inner)) => inner.get("message").and_then(Value::as_str),
        Some(Value::String(msg)) => Some(msg.as_str()),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// State keys
// ---------------------------------------------------------------------------

/// The three state keys recorded for one model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaKeys {
    pub exhausted_at: String,
    pub message: String,
    pub reset_at: String,
}

impl QuotaKeys {
    pub fn for_model(model: &str) -> Self {
        Self {
            exhausted_at: format!("{KEY_EXHAUSTED_AT}:{model}"),
            message: format!("{KEY_EXHAUSTED_MESSAGE}:{model}"),
            reset_at: format!("{KEY_RESET_AT}:{model}"),
        }
    }

    pub fn all(&self) -> [&str; 3] {
        [&self.exhausted_at, &self.message, &self.reset_at]
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn fixed_now() -> Timestamp {
        chrono::Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn quota_markers_are_case_insensitive() {
        assert!(is_quota_error("TerminalQuotaError: daily limit"));
        assert!(is_quota_error("You have exhausted your capacity on this model"));
        assert!(is_quota_error("rate limited, reset after 1h5m"));
        assert!(!is_quota_error("connection refused"));
        assert!(!is_quota_error(""));
    }

    #[test]
    fn summary_prefers_quota_over_timeout() {
        assert_eq!(summarize_error("quota exceeded (timeout)"), QUOTA_SUMMARY);
        assert_eq!(summarize_error("request timed out"), TIMEOUT_SUMMARY);
        assert_eq!(
            summarize_error("bash: -c: line 1: unexpected EOF while looking for `'"),
            SHELL_SUMMARY
        );
    }

    #[test]
    fn summary_truncates_other_errors() {
        let long = "x".repeat(900);
        assert_eq!(summarize_error(&long).chars().count(), MAX_SUMMARY_CHARS);
        assert_eq!(summarize_error("boom"), "boom");
    }

    #[test]
    fn reset_after_hours_and_minutes() {
        let reset = parse_reset_after("rate limited, reset after 1h5m", fixed_now()).unwrap();
        assert_eq!((reset - fixed_now()).num_seconds(), 3900);
    }

    #[test]
    fn reset_after_drops_subsecond_precision() {
        let now = fixed_now() + chrono::Duration::milliseconds(420);
        let reset = parse_reset_after("Quota: reset after 30s.", now).unwrap();
        assert_eq!(reset, fixed_now() + chrono::Duration::seconds(30));
    }

    #[test]
    fn reset_after_all_components() {
        assert_eq!(parse_reset_after_secs("RESET AFTER 2h3m4s"), Some(7384));
        assert_eq!(parse_reset_after_secs("reset after 45m"), Some(2700));
    }

    #[test]
    fn reset_after_missing_or_zero() {
        assert_eq!(parse_reset_after_secs("quota exhausted"), None);
        assert_eq!(parse_reset_after_secs("reset after soon"), None);
        assert_eq!(parse_reset_after_secs("reset after 0s"), None);
    }

    #[test]
    fn explicit_report_path() {
        let detail = "Error. Full report available at: /tmp/gemini-client-error-1.json\n";
        assert_eq!(report_path_in(detail), Some("/tmp/gemini-client-error-1.json"));
        assert_eq!(report_path_in("no report"), None);
    }

    #[test]
    fn report_message_shapes() {
        assert_eq!(report_message(&json!({"message": "a"})), Some("a"));
        assert_eq!(report_message(&json!({"message": {"message": "b"}})), Some("b"));
        assert_eq!(report_message(&json!({"error": {"message": "c"}})), Some("c"));
        assert_eq!(report_message(&json!({"error": "d"})), Some("d"));
        assert_eq!(report_message(&json!({"error": 42})), None);
        assert_eq!(report_message(&json!(["message"])), None);
    }

    #[test]
    fn quota_keys_are_scoped_by_model() {
        let keys = QuotaKeys::for_model("flash");
        assert_eq!(keys.exhausted_at, "quota_exhausted_at:flash");
        assert_eq!(keys.message, "quota_exhausted_message:flash");
        assert_eq!(keys.reset_at, "quota_reset_at:flash");
        assert_eq!(keys.all().len(), 3);
    }
}
