//! Parser for the judge process's standard output.
//!
//! The judge is expected to print exactly one JSON object, but language
//! model output is not always well formed. [`parse`] tries the following
//! strategies in order and reports which one succeeded:
//!
//! 1. **Direct** -- the whole trimmed output is a JSON object.
//! 2. **Code fence** -- the body of the first Markdown fence
//!    (```` ```json ... ``` ```` or a bare ```` ``` ````) is a JSON object.
//! 3. **Embedded object** -- the greedy `{ ... }` span (first `{` to last
//!    `}`) is a JSON object.
//! 4. **Truncated object** -- starting at the first `{`, an unterminated
//!    string is closed and open `[`/`{` are closed in reverse order. If that
//!    is still invalid, the text is cut back to each of the last 64 commas
//!    in turn (dropping the incomplete member) and closed again.
//! 5. **Field rescue** -- when the text contains `{` and a quoted
//!    `"status_guess"` string, the string fields `summary`, `status_guess`,
//!    `confidence` and `thread_id` are recovered individually.
//!
//! Anything else is a [`ParseError`]. Field extraction is lenient: fields
//! with an unexpected type are ignored rather than failing the parse.

use std::collections::VecDeque;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

/// Maximum number of cut-back attempts when repairing a truncated object.
const MAX_REPAIR_ATTEMPTS: usize = 64;

/// String fields recovered by the field-rescue strategy.
const RESCUE_FIELDS: [&str; 4] = ["summary", "status_guess", "confidence", "thread_id"];

static CODE_FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[A-Za-z]*[ \t]*\r?\n?(.*?)```").expect("valid regex")
});

static EMBEDDED_OBJECT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\{.*\}").expect("valid regex"));

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Structured triage judgment emitted by the judge process.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JudgeOutput {
    /// Thread id echoed by the judge; callers should trust the job id instead.
    pub thread_id: Option<String>,
    pub summary: Option<String>,
    pub status_guess: Option<String>,
    pub confidence: Option<String>,
    pub evidence: Vec<Value>,
    pub duplicate_candidates: Vec<Value>,
    /// Stage timings (seconds) reported by the judge itself.
    pub timings: Map<String, Value>,
}

/// Which strategy recovered the object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStrategy {
    Direct,
    CodeFence,
    EmbeddedObject,
    TruncatedObject,
    FieldRescue,
}

impl ParseStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::CodeFence => "code_fence",
            Self::EmbeddedObject => "embedded_object",
            Self::TruncatedObject => "truncated_object",
            Self::FieldRescue => "field_rescue",
        }
    }
}

/// A successfully parsed judge output.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedOutput {
    pub output: JudgeOutput,
    pub strategy: ParseStrategy,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("judge produced no output")]
    Empty,

    #[error("no JSON object found in judge output")]
    NoObject,
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Parse judge stdout into a [`JudgeOutput`].
pub fn parse(stdout: &str) -> Result<ParsedOutput, ParseError> {
    let text = stdout.trim();
    if text.is_empty() {
        return Err(ParseError::Empty);
    }

    let attempts: [(ParseStrategy, fn(&str) -> Option<Map<String, Value>>); 5] = [
        (ParseStrategy::Direct, parse_object),
        (ParseStrategy::CodeFence, from_code_fence),
        (ParseStrategy::EmbeddedObject, from_embedded_object),
        (ParseStrategy::TruncatedObject, from_truncated_object),
        (ParseStrategy::FieldRescue, rescue_fields),
    ];

    attempts
        .into_iter()
        .find_map(|(strategy, attempt)| {
            attempt(text).map(|obj| ParsedOutput {
                output: JudgeOutput::from_object(&obj),
                strategy,
            })
        })
        .ok_or(ParseError::NoObject)
}

impl JudgeOutput {
    /// Build from a JSON object, ignoring fields with unexpected types.
    pub fn from_object(obj: &Map<String, Value>) -> Self {
        let string_field = |key: &str| match obj.get(key) {
            Some(Value::String(s)) => Some(s.clone()),
            _ => None,
        };
        let scalar_field = |key: &str| match obj.get(key) {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        };
        let list_field = |key: &str| match obj.get(key) {
            Some(Value::Array(items)) => items.clone(),
            _ => Vec::new(),
        };

        Self {
            thread_id: scalar_field("thread_id"),
            summary: string_field("summary"),
            status_guess: string_field("status_guess"),
            confidence: scalar_field("confidence"),
            evidence: list_field("evidence"),
            duplicate_candidates: list_field("duplicate_candidates"),
            timings: match obj.get("timings") {
                Some(Value::Object(map)) => map.clone(),
                _ => Map::new(),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------------

fn parse_object(text: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(text.trim()) {
        Ok(Value::Object(obj)) => Some(obj),
        _ => None,
    }
}

fn from_code_fence(text: &str) -> Option<Map<String, Value>> {
    let body = CODE_FENCE_RE.captures(text)?.get(1)?.as_str();
    parse_object(body)
}

fn from_embedded_object(text: &str) -> Option<Map<String, Value>> {
    let span = EMBEDDED_OBJECT_RE.find(text)?.as_str();
    parse_object(span)
}

fn from_truncated_object(text: &str) -> Option<Map<String, Value>> {
    let start = text.find('{')?;
    let fragment = &text[start..];

    let mut scan = BracketScan::default();
    // Only the most recent commas are ever tried.
    let mut cut_points: VecDeque<usize> = VecDeque::with_capacity(MAX_REPAIR_ATTEMPTS);

    for (idx, ch) in fragment.char_indices() {
        match scan.feed(ch) {
            ScanEvent::Mismatch => return None,
            ScanEvent::Closed => return parse_object(&fragment[..=idx]),
            ScanEvent::Comma => {
                if cut_points.len() == MAX_REPAIR_ATTEMPTS {
                    cut_points.pop_front();
                }
                cut_points.push_back(idx);
            }
            ScanEvent::Other => {}
        }
    }

    let mut candidate = fragment.to_string();
    if scan.in_string {
        if scan.escaped {
            candidate.pop();
        }
        candidate.push('"');
    }
    if let Some(obj) = close_and_parse(&candidate, &scan.stack) {
        return Some(obj);
    }

    cut_points.iter().rev().find_map(|&idx| {
        let body = &fragment[..idx];
        close_and_parse(body, &open_closers(body))
    })
}

/// Closers still pending at the end of `body`, innermost last.
fn open_closers(body: &str) -> Vec<char> {
    let mut scan = BracketScan::default();
    for ch in body.chars() {
        scan.feed(ch);
    }
    scan.stack
}

/// Incremental bracket matcher that skips over JSON strings.
#[derive(Default)]
struct BracketScan {
    /// Closers for the currently open brackets.
    stack: Vec<char>,
    in_string: bool,
    escaped: bool,
}

enum ScanEvent {
    /// A comma outside any string.
    Comma,
    /// The outermost bracket was closed.
    Closed,
    /// A closer that does not match the open bracket.
    Mismatch,
    Other,
}

impl BracketScan {
    fn feed(&mut self, ch: char) -> ScanEvent {
        if self.in_string {
            if self.escaped {
                self.escaped = false;
            } else if ch == '\\' {
                self.escaped = true;
            } else if ch == '"' {
                self.in_string = false;
            }
            return ScanEvent::Other;
        }
        match ch {
            '"' => self.in_string = true,
            '{' => self.stack.push('}'),
            '[' => self.stack.push(']'),
            '}' | ']' => {
                if self.stack.pop() != Some(ch) {
                    return ScanEvent::Mismatch;
                }
                if self.stack.is_empty() {
                    return ScanEvent::Closed;
                }
            }
            ',' => return ScanEvent::Comma,
            _ => {}
        }
        ScanEvent::Other
    }
}

fn close_and_parse(body: &str, open: &[char]) -> Option<Map<String, Value>> {
    let mut text = body.trim_end().trim_end_matches([',', ':']).to_string();
    text.extend(open.iter().rev());
    parse_object(&text)
}

fn rescue_fields(text: &str) -> Option<Map<String, Value>> {
    if !text.contains('{') {
        return None;
    }

    let mut obj = Map::new();
    for field in RESCUE_FIELDS {
        if let Some(value) = rescue_string_field(text, field) {
            obj.insert(field.to_string(), Value::String(value));
        }
    }

    obj.contains_key("status_guess").then_some(obj)
}

fn rescue_string_field(text: &str, field: &str) -> Option<String> {
    let pattern = format!(r#""{}"\s*:\s*"((?:[^"\\]|\\.)*)""#, regex::escape(field));
    let re = Regex::new(&pattern).ok()?;
    let raw = re.captures(text)?.get(1)?.as_str();
    Some(serde_json::from_str::<String>(&format!("\"{raw}\"")).unwrap_or_else(|_| raw.to_string()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
