//! Executor: runs a validated [`SequenceNode`] as real processes.
//!
//! Pipelines run one at a time, honouring `&&`, `||` and `;`. Stages within a
//! pipeline run concurrently, joined by OS pipes. A single deadline covers
//! the whole call. Timeout and cancellation end the run with exit codes 124
//! and 130 and are reported in the [`ExecResult`], not as errors.

mod collector;
mod pipeline;
mod signal;

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::ExecutionError;
use crate::parse::{Connector, SequenceNode};
use collector::Captured;
use pipeline::{PipelineOutcome, run_pipeline};

/// Exit code reported when the deadline expires.
pub const EXIT_TIMEOUT: i32 = 124;
/// Exit code reported when the run is cancelled.
pub const EXIT_CANCELLED: i32 = 130;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_KILL_GRACE: Duration = Duration::from_millis(500);
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 1024 * 1024;

/// Deadline used when `timeout` is too large to add to the current instant.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365);

/// Per-call executor settings.
#[derive(Debug, Clone)]
pub struct ExecOptions {
    /// Working directory of every spawned process; redirection paths resolve here too.
    pub cwd: PathBuf,
    /// Wall-clock budget for the whole call, across every pipeline.
    pub timeout: Duration,
    /// External cancellation. `None` means the run can only time out.
    pub abort: Option<CancellationToken>,
    /// Captured bytes kept per stream; the rest is drained and dropped.
    pub max_output_bytes: usize,
    /// Time between SIGTERM and SIGKILL when a run is interrupted.
    pub kill_grace: Duration,
}

impl ExecOptions {
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        Self {
            cwd: cwd.into(),
            timeout: DEFAULT_TIMEOUT,
            abort: None,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            kill_grace: DEFAULT_KILL_GRACE,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_abort(mut self, token: CancellationToken) -> Self {
        self.abort = Some(token);
        self
    }

    pub fn with_max_output_bytes(mut self, limit: usize) -> Self {
        self.max_output_bytes = limit;
        self
    }

    pub fn with_kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }
}

/// Outcome of one `execute` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecResult {
    pub stdout: String,
    pub stderr: String,
    /// Exit code of the last pipeline that ran, or 124 / 130 when interrupted.
    pub code: i32,
    /// Signal that ended the run or killed the last stage, e.g. `"SIGTERM"`.
    pub signal: Option<String>,
    /// Whether any captured output was dropped at the byte limit, or left
    /// unread because a stream stayed open after the pipeline ended.
    pub truncated: bool,
}

/// Why a run stopped before its commands finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Interrupt {
    Timeout,
    Cancelled,
}

impl Interrupt {
    fn code(self) -> i32 {
        match self {
            Interrupt::Timeout => EXIT_TIMEOUT,
            Interrupt::Cancelled => EXIT_CANCELLED,
        }
    }

    fn signal(self) -> &'static str {
        match self {
            Interrupt::Timeout => "SIGTERM",
            Interrupt::Cancelled => "SIGINT",
        }
    }
}

impl fmt::Display for Interrupt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Interrupt::Timeout => f.write_str("timed out"),
            Interrupt::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Captured output of the whole call, with one byte budget per stream.
#[derive(Debug)]
pub(crate) struct OutputBuffer {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    limit: usize,
    truncated: bool,
}

impl OutputBuffer {
    fn new(limit: usize) -> Self {
        Self {
            stdout: Vec::new(),
            stderr: Vec::new(),
            limit,
            truncated: false,
        }
    }

    fn stdout_room(&self) -> usize {
        self.limit.saturating_sub(self.stdout.len())
    }

    fn stderr_room(&self) -> usize {
        self.limit.saturating_sub(self.stderr.len())
    }

    fn push_stdout(&mut self, captured: Captured) {
        self.truncated |= captured.is_incomplete();
        self.stdout.extend_from_slice(&captured.bytes);
    }

    fn push_stderr(&mut self, captured: Captured) {
        self.truncated |= captured.is_incomplete();
        self.stderr.extend_from_slice(&captured.bytes);
    }

    /// Append a message of our own to stderr, still within the budget.
    fn note_stderr(&mut self, message: &str) {
        let bytes = message.as_bytes();
        let keep = self.stderr_room().min(bytes.len());
        self.truncated |= keep < bytes.len();
        self.stderr.extend_from_slice(&bytes[..keep]);
    }

    fn finish(self, code: i32, signal: Option<String>) -> ExecResult {
        ExecResult {
            stdout: String::from_utf8_lossy(&self.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&self.stderr).into_owned(),
            code,
            signal,
            truncated: self.truncated,
        }
    }
}

/// Run a validated AST.
///
/// Only OS-level failures (a program that cannot be spawned, a pipe that
/// cannot be created) are errors. A non-zero exit, a timeout or a
/// cancellation all come back as an [`ExecResult`].
pub async fn execute(ast: &SequenceNode, opts: &ExecOptions) -> Result<ExecResult, ExecutionError> {
    let now = Instant::now();
    let deadline = now
        .checked_add(opts.timeout)
        .unwrap_or_else(|| now + FAR_FUTURE);
    let abort = opts.abort.clone().unwrap_or_default();
    let mut output = OutputBuffer::new(opts.max_output_bytes);

    let mut code = 0;
    let mut signal = None;
    for (index, pipeline) in ast.items.iter().enumerate() {
        if index > 0 {
            let connector = ast.connectors.get(index - 1).copied().unwrap_or(Connector::Semi);
            if !connector.should_run(code) {
                log::debug!("skipping pipeline {index} after '{}' (code {code})", connector.as_str());
                continue;
            }
        }

        match run_pipeline(pipeline, opts, deadline, &abort, &mut output).await? {
            PipelineOutcome::Exited { code: c, signal: s } => {
                code = c;
                signal = s;
            }
            PipelineOutcome::Interrupted(interrupt) => {
                log::warn!("run {interrupt} at pipeline {index} of {}", ast.items.len());
                return Ok(output.finish(interrupt.code(), Some(interrupt.signal().to_string())));
            }
        }
    }

    Ok(output.finish(code, signal))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::{parse, tokenize};

    fn ast(input: &str) -> SequenceNode {
        let tokens = tokenize(input, None).unwrap();
        parse(&tokens, None).unwrap()
    }

    fn opts() -> ExecOptions {
        ExecOptions::new(std::env::temp_dir()).with_timeout(Duration::from_secs(10))
    }

    async fn exec(input: &str) -> ExecResult {
        execute(&ast(input), &opts()).await.unwrap()
    }

    #[tokio::test]
    async fn pipe_echo_into_cat() {
        let result = exec("echo hi | cat").await;
        assert_eq!(result.stdout, "hi\n");
        assert_eq!(result.code, 0);
        assert_eq!(result.signal, None);
        assert!(!result.truncated);
    }

    #[tokio::test]
    async fn and_short_circuits() {
        let result = exec("false && echo ran").await;
        assert_eq!(result.stdout, "");
        assert_eq!(result.code, 1);
    }

    #[tokio::test]
    async fn or_runs_on_failure() {
        let result = exec("false || echo ran").await;
        assert_eq!(result.stdout, "ran\n");
        assert_eq!(result.code, 0);

        let result = exec("true || echo ran").await;
        assert_eq!(result.stdout, "");
    }

    #[tokio::test]
    async fn semicolon_always_runs() {
        let result = exec("false ; echo ran").await;
        assert_eq!(result.stdout, "ran\n");
        assert_eq!(result.code, 0);
    }

    #[tokio::test]
    async fn skipped_item_carries_code_forward() {
        let result = exec("false && echo a || echo b").await;
        assert_eq!(result.stdout, "b\n");
        assert_eq!(result.code, 0);
    }

    #[tokio::test]
    async fn pipeline_code_is_last_stage() {
        assert_eq!(exec("true | false").await.code, 1);
        assert_eq!(exec("false | true").await.code, 0);
    }

    #[tokio::test]
    async fn early_exit_consumer_ends_infinite_producer() {
        let result = exec("yes | head -n 2").await;
        assert_eq!(result.stdout, "y\ny\n");
        assert_eq!(result.code, 0);
    }

    #[tokio::test]
    async fn slow_producer_does_not_hold_up_finished_consumer() {
        let started = std::time::Instant::now();
        let result = exec("sleep 3 | echo hi && echo next").await;
        assert_eq!(result.stdout, "hi\nnext\n");
        assert_eq!(result.code, 0);
        assert!(!result.truncated);
        assert!(started.elapsed() < Duration::from_secs(2), "{:?}", started.elapsed());
    }

    #[tokio::test]
    async fn output_held_open_by_grandchild_is_kept() {
        let result = exec("sh -c 'echo start; sleep 4 &'").await;
        assert_eq!(result.code, 0);
        assert_eq!(result.stdout, "start\n");
        assert!(result.truncated);
    }

    #[test]
    fn cut_short_capture_marks_truncated() {
        let mut output = OutputBuffer::new(100);
        output.push_stdout(Captured {
            bytes: b"partial".to_vec(),
            dropped: 0,
            cut_short: true,
        });
        let result = output.finish(0, None);
        assert_eq!(result.stdout, "partial");
        assert!(result.truncated);
    }

    #[tokio::test]
    async fn nonzero_exit_is_not_an_error() {
        let result = exec("ls /nonexistent-cc-safeshell-dir").await;
        assert_ne!(result.code, 0);
        assert!(!result.stderr.is_empty());
    }

    #[tokio::test]
    async fn timeout_reports_124_sigterm() {
        let opts = ExecOptions::new(std::env::temp_dir()).with_timeout(Duration::from_millis(50));
        let start = std::time::Instant::now();
        let result = execute(&ast("sleep 5"), &opts).await.unwrap();
        assert_eq!(result.code, EXIT_TIMEOUT);
        assert_eq!(result.signal.as_deref(), Some("SIGTERM"));
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn timeout_is_shared_across_pipelines() {
        let opts = ExecOptions::new(std::env::temp_dir()).with_timeout(Duration::from_millis(300));
        let start = std::time::Instant::now();
        let result = execute(&ast("sleep 0.2 ; sleep 0.2 ; echo late"), &opts)
            .await
            .unwrap();
        assert_eq!(result.code, EXIT_TIMEOUT);
        assert_eq!(result.stdout, "");
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn cancellation_reports_130_sigint() {
        let token = CancellationToken::new();
        let opts = opts().with_abort(token.clone());
        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            token.cancel();
        });
        let start = std::time::Instant::now();
        let result = execute(&ast("sleep 5 && echo never"), &opts).await.unwrap();
        canceller.await.unwrap();
        assert_eq!(result.code, EXIT_CANCELLED);
        assert_eq!(result.signal.as_deref(), Some("SIGINT"));
        assert_eq!(result.stdout, "");
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn interrupted_run_keeps_earlier_output() {
        let opts = ExecOptions::new(std::env::temp_dir()).with_timeout(Duration::from_millis(200));
        let result = execute(&ast("echo before ; sleep 5"), &opts).await.unwrap();
        assert_eq!(result.code, EXIT_TIMEOUT);
        assert_eq!(result.stdout, "before\n");
    }

    #[tokio::test]
    async fn output_capped_at_limit() {
        let opts = opts().with_max_output_bytes(10);
        let result = execute(&ast("seq 1 400"), &opts).await.unwrap();
        assert_eq!(result.stdout, "1\n2\n3\n4\n5\n");
        assert_eq!(result.code, 0);
        assert!(result.truncated);
    }

    #[tokio::test]
    async fn output_budget_spans_pipelines() {
        let opts = opts().with_max_output_bytes(6);
        let result = execute(&ast("echo abcd ; echo efgh"), &opts).await.unwrap();
        assert_eq!(result.stdout, "abcd\ne");
        assert!(result.truncated);
    }

    #[tokio::test]
    async fn spawn_failure_is_an_error() {
        let err = execute(&ast("cc-safeshell-no-such-program"), &opts())
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::Spawn { .. }));
        assert!(err.to_string().contains("cc-safeshell-no-such-program"));
    }

    #[tokio::test]
    async fn redirections_in_tempdir() {
        let dir = tempfile::tempdir().unwrap();
        let opts = ExecOptions::new(dir.path()).with_timeout(Duration::from_secs(10));

        let result = execute(&ast("echo one > out.txt"), &opts).await.unwrap();
        assert_eq!(result.stdout, "");
        execute(&ast("echo two >> out.txt"), &opts).await.unwrap();
        let written = std::fs::read_to_string(dir.path().join("out.txt")).unwrap();
        assert_eq!(written, "one\ntwo\n");

        let result = execute(&ast("cat < out.txt | wc -l"), &opts).await.unwrap();
        assert_eq!(result.stdout.trim(), "2");

        execute(&ast("echo three > out.txt"), &opts).await.unwrap();
        let written = std::fs::read_to_string(dir.path().join("out.txt")).unwrap();
        assert_eq!(written, "three\n");
    }

    #[tokio::test]
    async fn stderr_redirections() {
        let dir = tempfile::tempdir().unwrap();
        let opts = ExecOptions::new(dir.path()).with_timeout(Duration::from_secs(10));

        let result = execute(&ast("ls missing-entry 2>&1"), &opts).await.unwrap();
        assert!(result.stdout.contains("missing-entry"));
        assert_eq!(result.stderr, "");

        let result = execute(&ast("ls missing-entry 2> err.txt"), &opts).await.unwrap();
        assert_eq!(result.stderr, "");
        let written = std::fs::read_to_string(dir.path().join("err.txt")).unwrap();
        assert!(written.contains("missing-entry"));
    }

    #[tokio::test]
    async fn missing_input_file_fails_pipeline_only() {
        let dir = tempfile::tempdir().unwrap();
        let opts = ExecOptions::new(dir.path()).with_timeout(Duration::from_secs(10));
        let result = execute(&ast("cat < absent.txt || echo fallback"), &opts)
            .await
            .unwrap();
        assert_eq!(result.stdout, "fallback\n");
        assert!(result.stderr.contains("absent.txt"));
        assert_eq!(result.code, 0);
    }

    #[test]
    fn interrupt_codes() {
        assert_eq!(Interrupt::Timeout.code(), 124);
        assert_eq!(Interrupt::Cancelled.code(), 130);
        assert_eq!(Interrupt::Timeout.signal(), "SIGTERM");
        assert_eq!(Interrupt::Cancelled.signal(), "SIGINT");
    }
}
