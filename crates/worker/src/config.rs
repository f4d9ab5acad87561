//! Engine configuration loaded from environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use triage_core::error::CoreError;

/// Model selector used when a request names none.
pub const DEFAULT_MODEL: &str = "auto";

/// Built-in allow-list of model selectors.
pub const DEFAULT_ALLOWED_MODELS: [&str; 9] = [
    "auto",
    "pro",
    "flash",
    "flash-lite",
    "gemini-3-pro-preview",
    "gemini-3-flash-preview",
    "gemini-2.5-pro",
    "gemini-2.5-flash",
    "gemini-2.5-flash-lite",
];

/// How jobs are executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JudgeMode {
    /// Spawn the external judge command.
    Process,
    /// Simulate latency and emit a canned judgment.
    Mock,
}

impl FromStr for JudgeMode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "process" => Ok(Self::Process),
            "mock" => Ok(Self::Mock),
            other => Err(CoreError::Config(format!(
                "JUDGE_MODE must be 'process' or 'mock', got '{other}'"
            ))),
        }
    }
}

/// Orchestration engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Admission ceiling on `starting` + `running` jobs.
    pub max_inflight: usize,
    pub poll_interval: Duration,
    /// Age after which an inflight job without a live process is an orphan.
    pub stuck_after: Duration,
    pub allowed_models: Vec<String>,
    pub mode: JudgeMode,
    pub mock_sleep: Duration,
    pub mock_jitter: Duration,
    /// Program followed by its leading arguments.
    pub command: Vec<String>,
    /// Environment variable carrying the model selector to the judge.
    pub model_env: String,
    pub max_posts: u32,
    /// Wait between SIGTERM and SIGKILL when cancelling.
    pub cancel_grace: Duration,
    /// Directory scanned for judge error reports.
    pub report_dir: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_inflight: 8,
            poll_interval: Duration::from_secs(1),
            stuck_after: Duration::from_secs(600),
            allowed_models: DEFAULT_ALLOWED_MODELS.iter().map(|m| m.to_string()).collect(),
            mode: JudgeMode::Process,
            mock_sleep: Duration::from_secs(2),
            mock_jitter: Duration::ZERO,
            command: vec!["python3".into(), "scripts/llm_judge.py".into()],
            model_env: "GEMINI_MODEL".into(),
            max_posts: 11,
            cancel_grace: Duration::from_secs(2),
            report_dir: std::env::temp_dir(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from the process environment.
    ///
    /// | Env Var                   | Default                        |
    /// |---------------------------|--------------------------------|
    /// | `JUDGE_MAX_INFLIGHT`      | `8`                            |
    /// | `JUDGE_QUEUE_POLL_SECS`   | `1.0`                          |
    /// | `JUDGE_STUCK_SECS`        | `600`                          |
    /// | `JUDGE_ALLOWED_MODELS`    | built-in list                  |
    /// | `JUDGE_MODE`              | `process`                      |
    /// | `JUDGE_SLEEP_SECS`        | `2.0`                          |
    /// | `JUDGE_SLEEP_JITTER_SECS` | `0`                            |
    /// | `JUDGE_COMMAND`           | `python3 scripts/llm_judge.py` |
    /// | `JUDGE_MODEL_ENV`         | `GEMINI_MODEL`                 |
    /// | `JUDGE_MAX_POSTS`         | `11`                           |
    /// | `JUDGE_CANCEL_GRACE_SECS` | `2`                            |
    /// | `JUDGE_REPORT_DIR`        | system temp dir                |
    ///
    /// `JUDGE_COMMAND` is split on whitespace; quoting is not supported, so
    /// an argument containing spaces needs a wrapper script.
    pub fn from_env() -> Result<Self, CoreError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup. Unset or blank
    /// keys take their default.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, CoreError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let max_inflight = match get("JUDGE_MAX_INFLIGHT") {
            Some(v) => parse_number::<usize>("JUDGE_MAX_INFLIGHT", &v)?,
            None => defaults.max_inflight,
        };
        if max_inflight == 0 {
            return Err(CoreError::Config(
                "JUDGE_MAX_INFLIGHT must be at least 1".into(),
            ));
        }

        let allowed_models = match get("JUDGE_ALLOWED_MODELS") {
            Some(v) => v
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            None => defaults.allowed_models,
        };

        let command = match get("JUDGE_COMMAND") {
            Some(v) => v.split_whitespace().map(str::to_string).collect(),
            None => defaults.command,
        };

        let poll_interval = seconds(&get, "JUDGE_QUEUE_POLL_SECS", defaults.poll_interval)?;
        if poll_interval.is_zero() {
            return Err(CoreError::Config(
                "JUDGE_QUEUE_POLL_SECS must be greater than 0".into(),
            ));
        }

        Ok(Self {
            max_inflight,
            poll_interval,
            stuck_after: seconds(&get, "JUDGE_STUCK_SECS", defaults.stuck_after)?,
            allowed_models,
            mode: match get("JUDGE_MODE") {
                Some(v) => v.parse()?,
                None => defaults.mode,
            },
            mock_sleep: seconds(&get, "JUDGE_SLEEP_SECS", defaults.mock_sleep)?,
            mock_jitter: seconds(&get, "JUDGE_SLEEP_JITTER_SECS", defaults.mock_jitter)?,
            command,
            model_env: get("JUDGE_MODEL_ENV").unwrap_or(defaults.model_env),
            max_posts: match get("JUDGE_MAX_POSTS") {
                Some(v) => parse_number("JUDGE_MAX_POSTS", &v)?,
                None => defaults.max_posts,
            },
            cancel_grace: seconds(&get, "JUDGE_CANCEL_GRACE_SECS", defaults.cancel_grace)?,
            report_dir: get("JUDGE_REPORT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.report_dir),
        })
    }

    pub fn is_allowed_model(&self, model: &str) -> bool {
        self.allowed_models.iter().any(|m| m == model)
    }
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T, CoreError> {
    value
        .trim()
        .parse()
        .map_err(|_| CoreError::Config(format!("{key} must be a number, got '{value}'")))
}

/// Parse a non-negative (possibly fractional) number of seconds.
fn seconds<G>(get: &G, key: &str, default: Duration) -> Result<Duration, CoreError>
where
    G: Fn(&str) -> Option<String>,
{
    let Some(raw) = get(key) else {
        return Ok(default);
    };
    let secs: f64 = parse_number(key, &raw)?;
    Duration::try_from_secs_f64(secs)
        .map_err(|_| CoreError::Config(format!("{key} must be a non-negative duration, got '{raw}'")))
}
