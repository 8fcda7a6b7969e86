//! One pipeline: spawn every stage, wire the pipes, race the exit against
//! the deadline and the abort token.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::collector::Collector;
use super::signal::{exit_code, kill_all, terminate_all};
use super::{ExecOptions, Interrupt, OutputBuffer};
use crate::error::ExecutionError;
use crate::parse::{CommandNode, FileRedirect, PipelineNode};

/// How long to wait for collectors after the pipeline has ended.
const IO_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum PipelineOutcome {
    Exited { code: i32, signal: Option<String> },
    Interrupted(Interrupt),
}

/// Files opened for the pipeline's edge redirections.
#[derive(Debug, Default)]
struct RedirectFiles {
    stdin: Option<File>,
    stdout: Option<File>,
    stderr: Option<File>,
}

impl RedirectFiles {
    /// `<` applies to the first stage, `>`/`2>` to the last one.
    fn open(first: &CommandNode, last: &CommandNode, cwd: &Path) -> Result<Self, (String, io::Error)> {
        let stdin = match &first.redirs.stdin_file {
            Some(path) => Some(File::open(cwd.join(path)).map_err(|e| (path.clone(), e))?),
            None => None,
        };
        let stdout = open_output(last.redirs.stdout_file.as_ref(), cwd)?;
        let stderr = open_output(last.redirs.stderr_file.as_ref(), cwd)?;
        Ok(Self { stdin, stdout, stderr })
    }
}

fn open_output(redirect: Option<&FileRedirect>, cwd: &Path) -> Result<Option<File>, (String, io::Error)> {
    let Some(redirect) = redirect else {
        return Ok(None);
    };
    let mut options = OpenOptions::new();
    options.write(true).create(true);
    if redirect.append {
        options.append(true);
    } else {
        options.truncate(true);
    }
    options
        .open(cwd.join(&redirect.path))
        .map(Some)
        .map_err(|e| (redirect.path.clone(), e))
}

/// Write ends handed to the stages. The parent drops its copies once every
/// stage is spawned so the collectors see EOF.
struct CaptureWriters {
    stdout: io::PipeWriter,
    stderr: io::PipeWriter,
}

struct StageStdio {
    stdin: Stdio,
    stdout: Stdio,
    stderr: Stdio,
}

pub(crate) async fn run_pipeline(
    pipeline: &PipelineNode,
    opts: &ExecOptions,
    deadline: Instant,
    abort: &CancellationToken,
    output: &mut OutputBuffer,
) -> Result<PipelineOutcome, ExecutionError> {
    if abort.is_cancelled() {
        return Ok(PipelineOutcome::Interrupted(Interrupt::Cancelled));
    }
    if Instant::now() >= deadline {
        return Ok(PipelineOutcome::Interrupted(Interrupt::Timeout));
    }
    let (Some(first), Some(last)) = (pipeline.commands.first(), pipeline.commands.last()) else {
        return Ok(PipelineOutcome::Exited { code: 0, signal: None });
    };

    let mut files = match RedirectFiles::open(first, last, &opts.cwd) {
        Ok(files) => files,
        Err((path, e)) => {
            log::warn!("redirection failed for {}: {path}: {e}", last.program());
            output.note_stderr(&format!("cc-safeshell: {path}: {e}\n"));
            return Ok(PipelineOutcome::Exited { code: 1, signal: None });
        }
    };

    let pipe_error = |source| ExecutionError::Pipe {
        command: last.display(),
        source,
    };
    let (out_reader, out_writer) = io::pipe().map_err(pipe_error)?;
    let (err_reader, err_writer) = io::pipe().map_err(pipe_error)?;
    let out_collector = Collector::spawn(out_reader, output.stdout_room()).map_err(pipe_error)?;
    let err_collector = Collector::spawn(err_reader, output.stderr_room()).map_err(pipe_error)?;
    let writers = CaptureWriters {
        stdout: out_writer,
        stderr: err_writer,
    };

    let children = spawn_stages(pipeline, opts, &mut files, writers).await;
    drop(files);
    let mut children = match children {
        Ok(children) => children,
        Err(e) => {
            out_collector.abort();
            err_collector.abort();
            return Err(e);
        }
    };

    let Some(last_child) = children.last_mut() else {
        return Ok(PipelineOutcome::Exited { code: 0, signal: None });
    };
    // The pipeline ends when its last stage does; upstream stages that are
    // still running are terminated rather than waited for.
    enum Race {
        Exited(io::Result<ExitStatus>),
        Interrupted(Interrupt),
    }
    let race = tokio::select! {
        result = last_child.wait() => Race::Exited(result),
        () = tokio::time::sleep_until(deadline) => Race::Interrupted(Interrupt::Timeout),
        () = abort.cancelled() => Race::Interrupted(Interrupt::Cancelled),
    };

    let outcome = match race {
        Race::Exited(Ok(status)) => {
            let upstream = children.len() - 1;
            terminate_all(&mut children[..upstream], opts.kill_grace).await;
            let (code, signal) = exit_code(status);
            log::info!(
                "pipeline finished: {} stage(s), exit {code}",
                pipeline.commands.len()
            );
            Ok(PipelineOutcome::Exited { code, signal })
        }
        Race::Exited(Err(source)) => {
            kill_all(&mut children).await;
            Err(ExecutionError::Wait {
                command: last.display(),
                source,
            })
        }
        Race::Interrupted(interrupt) => {
            log::warn!("{interrupt}: terminating {} process(es)", children.len());
            terminate_all(&mut children, opts.kill_grace).await;
            Ok(PipelineOutcome::Interrupted(interrupt))
        }
    };

    output.push_stdout(out_collector.finish(IO_DRAIN_TIMEOUT).await);
    output.push_stderr(err_collector.finish(IO_DRAIN_TIMEOUT).await);
    outcome
}

/// Spawn every stage in order. On failure the stages already running are
/// killed before the error is returned.
async fn spawn_stages(
    pipeline: &PipelineNode,
    opts: &ExecOptions,
    files: &mut RedirectFiles,
    writers: CaptureWriters,
) -> Result<Vec<Child>, ExecutionError> {
    let count = pipeline.commands.len();
    let mut children = Vec::with_capacity(count);
    let mut next_stdin = files.stdin.take().map(Stdio::from);

    for (index, command) in pipeline.commands.iter().enumerate() {
        let is_last = index + 1 == count;
        let stdin = next_stdin.take().unwrap_or_else(Stdio::null);
        let stdio = match stage_stdio(command, is_last, stdin, files, &writers) {
            Ok((stdio, downstream)) => {
                next_stdin = downstream;
                stdio
            }
            Err(source) => {
                kill_all(&mut children).await;
                return Err(ExecutionError::Pipe {
                    command: command.display(),
                    source,
                });
            }
        };

        match spawn_stage(command, &opts.cwd, stdio) {
            Ok(child) => {
                log::debug!("spawned {} (pid {:?})", command.display(), child.id());
                children.push(child);
            }
            Err(source) => {
                log::warn!("spawn failed for {}: {source}", command.program());
                kill_all(&mut children).await;
                return Err(ExecutionError::Spawn {
                    command: command.program().to_string(),
                    source,
                });
            }
        }
    }

    Ok(children)
}

/// stdio for one stage, plus the read end feeding the next stage.
fn stage_stdio(
    command: &CommandNode,
    is_last: bool,
    stdin: Stdio,
    files: &RedirectFiles,
    writers: &CaptureWriters,
) -> io::Result<(StageStdio, Option<Stdio>)> {
    if !is_last {
        let (reader, writer) = io::pipe()?;
        // `2>&1` on an inner stage feeds its stderr to the next stage too.
        let stderr = if command.redirs.merge_stderr_to_stdout {
            writer.try_clone()?
        } else {
            writers.stderr.try_clone()?
        };
        let stdio = StageStdio {
            stdin,
            stdout: writer.into(),
            stderr: stderr.into(),
        };
        return Ok((stdio, Some(reader.into())));
    }

    let stdout = match &files.stdout {
        Some(file) => Stdio::from(file.try_clone()?),
        None => Stdio::from(writers.stdout.try_clone()?),
    };
    let stderr = if let Some(file) = &files.stderr {
        Stdio::from(file.try_clone()?)
    } else if command.redirs.merge_stderr_to_stdout {
        match &files.stdout {
            Some(file) => Stdio::from(file.try_clone()?),
            None => Stdio::from(writers.stdout.try_clone()?),
        }
    } else {
        Stdio::from(writers.stderr.try_clone()?)
    };
    Ok((StageStdio { stdin, stdout, stderr }, None))
}

/// argv goes straight to the OS; no shell is involved.
fn spawn_stage(command: &CommandNode, cwd: &Path, stdio: StageStdio) -> io::Result<Child> {
    let mut cmd = Command::new(command.program());
    cmd.args(command.args())
        .current_dir(cwd)
        .stdin(stdio.stdin)
        .stdout(stdio.stdout)
        .stderr(stdio.stderr)
        .kill_on_drop(true);
    cmd.spawn()
}
