/// Forum thread identifiers are opaque strings (numeric in practice).
pub type ThreadId = String;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Format a timestamp at second precision with a `Z` suffix
/// (`2026-01-31T08:15:00Z`), the shape used for quota state values.
pub fn format_utc_seconds(ts: Timestamp) -> String {
    ts.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Truncate `text` to at most `max_chars` characters without splitting a
/// UTF-8 code point.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
