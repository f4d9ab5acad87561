//! Judge runners: how a job's analysis is actually executed.
//!
//! [`JudgeRunner::spawn`] starts an execution and returns as soon as it is
//! live, so the worker can register it before blocking on
//! [`JudgeExecution::wait`]. The wait honours [`Signal`]s delivered through
//! the registry.

use std::future::Future;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use rand::Rng;
use serde_json::json;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use triage_core::types::ThreadId;

use crate::config::{EngineConfig, JudgeMode};
use crate::error::RunError;
use crate::registry::{ProcessControl, Signal};

/// Maximum stdout or stderr size captured per stream (4 MiB).
const MAX_OUTPUT_BYTES: u64 = 4 * 1024 * 1024;

/// How long to keep reading pipes after the process exited. Grandchildren
/// that inherited the pipes must not hold the worker forever.
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Conventional exit codes of a process killed by SIGTERM / SIGKILL.
const EXIT_TERMINATED: i32 = 143;
const EXIT_KILLED: i32 = 137;

/// What to judge.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub thread_id: ThreadId,
    pub model: String,
}

/// Captured result of a finished execution.
#[derive(Debug, Clone, Default)]
pub struct RunOutput {
    /// `None` when the process was ended by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl RunOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// A started execution.
pub trait JudgeExecution: Send + 'static {
    /// OS process id, when there is a real process.
    fn pid(&self) -> Option<u32>;

    /// Run to completion, reacting to signals received on `control`.
    fn wait(
        self,
        control: ProcessControl,
    ) -> impl Future<Output = Result<RunOutput, RunError>> + Send;
}

/// Starts executions for jobs.
pub trait JudgeRunner: Send + Sync + 'static {
    type Execution: JudgeExecution;

    fn spawn(
        &self,
        request: &RunRequest,
    ) -> impl Future<Output = Result<Self::Execution, RunError>> + Send;
}

// ---------------------------------------------------------------------------
// External process
// ---------------------------------------------------------------------------

/// Runs the external judge command:
/// `<command...> --thread-id <id> --max-posts <n> --json-only`, with the
/// model selector exported in `model_env`.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    program: String,
    args: Vec<String>,
    model_env: String,
    max_posts: u32,
}

impl ProcessRunner {
    pub fn new(command: &[String], model_env: &str, max_posts: u32) -> Result<Self, RunError> {
        let (program, args) = command.split_first().ok_or(RunError::EmptyCommand)?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            model_env: model_env.to_string(),
            max_posts,
        })
    }
}

impl JudgeRunner for ProcessRunner {
    type Execution = ProcessExecution;

    async fn spawn(&self, request: &RunRequest) -> Result<ProcessExecution, RunError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg("--thread-id")
            .arg(&request.thread_id)
            .arg("--max-posts")
            .arg(self.max_posts.to_string())
            .arg("--json-only")
            .env(&self.model_env, &request.model)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(RunError::Spawn)?;

        // Drain both pipes from the start so a chatty process never blocks
        // on a full pipe buffer.
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let stdout_task = tokio::spawn(async move { read_stream(stdout).await });
        let stderr_task = tokio::spawn(async move { read_stream(stderr).await });

        tracing::debug!(
            thread_id = %request.thread_id,
            pid = child.id(),
            program = %self.program,
            "Judge process spawned",
        );

        Ok(ProcessExecution {
            child,
            stdout_task,
            stderr_task,
        })
    }
}

/// A live child process.
#[derive(Debug)]
pub struct ProcessExecution {
    child: Child,
    stdout_task: JoinHandle<Vec<u8>>,
    stderr_task: JoinHandle<Vec<u8>>,
}

impl ProcessExecution {
    fn deliver(&mut self, signal: Signal) {
        let result = match signal {
            Signal::Terminate => terminate(&mut self.child),
            Signal::Kill => self.child.start_kill(),
        };
        if let Err(e) = result {
            tracing::warn!(error = %e, ?signal, pid = self.child.id(), "Failed to signal judge process");
        }
    }
}

impl JudgeExecution for ProcessExecution {
    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    async fn wait(mut self, mut control: ProcessControl) -> Result<RunOutput, RunError> {
        let status: ExitStatus = loop {
            tokio::select! {
                status = self.child.wait() => break status.map_err(RunError::Wait)?,
                Some(signal) = control.recv() => self.deliver(signal),
            }
        };

        let stdout = drain(self.stdout_task).await;
        let stderr = drain(self.stderr_task).await;

        Ok(RunOutput {
            exit_code: status.code(),
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
        })
    }
}

/// Ask the child to exit with SIGTERM.
#[cfg(unix)]
fn terminate(child: &mut Child) -> std::io::Result<()> {
    let Some(pid) = child.id() else {
        // Already reaped.
        return Ok(());
    };
    // Safety: plain signal delivery to a pid we spawned and have not reaped.
    let ret = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    if ret == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn terminate(child: &mut Child) -> std::io::Result<()> {
    child.start_kill()
}

/// Read an entire output stream into a byte buffer, capped at [`MAX_OUTPUT_BYTES`].
async fn read_stream<R: AsyncRead + Unpin>(handle: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut h) = handle {
        let _ = (&mut h).take(MAX_OUTPUT_BYTES).read_to_end(&mut buf).await;
    }
    buf
}

async fn drain(task: JoinHandle<Vec<u8>>) -> Vec<u8> {
    match tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, task).await {
        Ok(Ok(bytes)) => bytes,
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "Judge output reader failed");
            Vec::new()
        }
        Err(_) => {
            tracing::warn!("Judge output still open after exit; discarding");
            Vec::new()
        }
    }
}

// ---------------------------------------------------------------------------
// Mock
// ---------------------------------------------------------------------------

/// Simulated judge: sleeps, then prints a canned low-confidence judgment.
#[derive(Debug, Clone)]
pub struct MockRunner {
    sleep: Duration,
    jitter: Duration,
}

impl MockRunner {
    pub fn new(sleep: Duration, jitter: Duration) -> Self {
        Self { sleep, jitter }
    }
}

impl JudgeRunner for MockRunner {
    type Execution = MockExecution;

    async fn spawn(&self, request: &RunRequest) -> Result<MockExecution, RunError> {
        let mut delay = self.sleep;
        if !self.jitter.is_zero() {
            let extra = rand::rng().random_range(0.0..self.jitter.as_secs_f64());
            delay += Duration::from_secs_f64(extra);
        }
        Ok(MockExecution {
            thread_id: request.thread_id.clone(),
            delay,
        })
    }
}

#[derive(Debug)]
pub struct MockExecution {
    thread_id: ThreadId,
    delay: Duration,
}

impl MockExecution {
    fn canned_output(&self) -> String {
        json!({
            "thread_id": self.thread_id,
            "summary": format!("Mock summary for {}.", self.thread_id),
            "status_guess": "open",
            "confidence": "low",
            "evidence": [],
            "duplicate_candidates": [],
            "timings": { "mock_sleep_s": self.delay.as_secs_f64() },
        })
        .to_string()
    }
}

impl JudgeExecution for MockExecution {
    fn pid(&self) -> Option<u32> {
        None
    }

    async fn wait(self, mut control: ProcessControl) -> Result<RunOutput, RunError> {
        let sleep = tokio::time::sleep(self.delay);
        tokio::pin!(sleep);

        tokio::select! {
            _ = &mut sleep => Ok(RunOutput {
                exit_code: Some(0),
                stdout: self.canned_output(),
                stderr: String::new(),
            }),
            Some(signal) = control.recv() => {
                let exit_code = match signal {
                    Signal::Terminate => EXIT_TERMINATED,
                    Signal::Kill => EXIT_KILLED,
                };
                Ok(RunOutput {
                    exit_code: Some(exit_code),
                    stdout: String::new(),
                    stderr: "mock judge interrupted".into(),
                })
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Runtime selection
// ---------------------------------------------------------------------------

/// Runner chosen by [`JudgeMode`] at startup.
#[derive(Debug, Clone)]
pub enum AnyRunner {
    Process(ProcessRunner),
    Mock(MockRunner),
}

impl AnyRunner {
    pub fn from_config(config: &EngineConfig) -> Result<Self, RunError> {
        Ok(match config.mode {
            JudgeMode::Process => Self::Process(ProcessRunner::new(
                &config.command,
                &config.model_env,
                config.max_posts,
            )?),
            JudgeMode::Mock => Self::Mock(MockRunner::new(config.mock_sleep, config.mock_jitter)),
        })
    }
}

#[derive(Debug)]
pub enum AnyExecution {
    Process(ProcessExecution),
    Mock(MockExecution),
}

impl JudgeRunner for AnyRunner {
    type Execution = AnyExecution;

    async fn spawn(&self, request: &RunRequest) -> Result<AnyExecution, RunError> {
        match self {
            Self::Process(runner) => runner.spawn(request).await.map(AnyExecution::Process),
            Self::Mock(runner) => runner.spawn(request).await.map(AnyExecution::Mock),
        }
    }
}

impl JudgeExecution for AnyExecution {
    fn pid(&self) -> Option<u32> {
        match self {
            Self::Process(execution) => execution.pid(),
            Self::Mock(execution) => execution.pid(),
        }
    }

    async fn wait(self, control: ProcessControl) -> Result<RunOutput, RunError> {
        match self {
            Self::Process(execution) => execution.wait(control).await,
            Self::Mock(execution) => execution.wait(control).await,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
