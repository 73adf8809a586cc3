//! Child-process execution under an absolute deadline.

use std::process::ExitStatus;
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::LLMError;
use crate::stream::EventSender;
use crate::types::ToolStreamEvent;

/// How long output pipes may stay open once the child itself has exited.
const IO_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Starts `command`, mapping a launch failure to a configuration error.
pub(crate) fn spawn(
    provider: &'static str,
    program: &str,
    command: &mut Command,
) -> Result<Child, LLMError> {
    command.spawn().map_err(|err| LLMError::InvalidConfig {
        field: format!("{provider}.program"),
        reason: format!("failed to spawn `{program}`: {err}"),
    })
}

/// Runs the child to completion and returns its trimmed standard output.
///
/// The deadline covers the child's own exit; the child and its process group are killed
/// when it elapses. Pipes that descendants keep open after the exit are drained for at
/// most [`IO_DRAIN_TIMEOUT`].
pub(crate) async fn run_to_completion(
    provider: &'static str,
    mut child: Child,
    deadline: Duration,
) -> Result<String, LLMError> {
    let group = child.id();
    let stdout = take_pipe(provider, child.stdout.take(), "stdout")?;
    let stderr = take_pipe(provider, child.stderr.take(), "stderr")?;
    let stdout_task = tokio::spawn(read_all(stdout));
    let stderr_task = tokio::spawn(read_all(stderr));

    let status = match tokio::time::timeout(deadline, child.wait()).await {
        Err(_) => {
            terminate(provider, &mut child, group).await;
            stdout_task.abort();
            stderr_task.abort();
            tracing::warn!(provider, ?deadline, "child process timed out");
            return Err(LLMError::Timeout {
                provider,
                after: deadline,
            });
        }
        Ok(Err(err)) => {
            terminate(provider, &mut child, group).await;
            stdout_task.abort();
            stderr_task.abort();
            return Err(pipe_error(provider, err));
        }
        Ok(Ok(status)) => status,
    };

    let stdout = drain(provider, group, stdout_task).await?;
    let stderr = drain(provider, group, stderr_task).await?;

    let stdout = String::from_utf8_lossy(&stdout);
    if !status.success() {
        return Err(exit_error(provider, status, &String::from_utf8_lossy(&stderr), &stdout));
    }
    Ok(stdout.trim().to_string())
}

enum Step {
    Line(std::io::Result<usize>),
    Exited(std::io::Result<ExitStatus>),
}

/// Reads the next line, racing it against the child's exit until that has been seen.
///
/// `read_until` keeps partially read bytes in `line`, so losing the race drops nothing.
async fn next_step<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    line: &mut Vec<u8>,
    child: &mut Child,
    exited: bool,
) -> Step {
    if exited {
        return Step::Line(reader.read_until(b'\n', line).await);
    }
    tokio::select! {
        read = reader.read_until(b'\n', line) => Step::Line(read),
        status = child.wait() => Step::Exited(status),
    }
}

/// Forwards standard output line by line, then reports exit status as the terminal event.
///
/// Cancellation kills the child's process group and emits nothing further.
pub(crate) async fn stream_lines<E>(
    provider: &'static str,
    mut child: Child,
    deadline: Duration,
    sender: EventSender<E>,
) where
    E: From<ToolStreamEvent> + Send,
{
    let deadline_at = Instant::now() + deadline;
    let group = child.id();
    let stdout = match take_pipe(provider, child.stdout.take(), "stdout") {
        Ok(stdout) => stdout,
        Err(err) => {
            terminate(provider, &mut child, group).await;
            sender.finish(ToolStreamEvent::failed(err).into()).await;
            return;
        }
    };
    let stderr_task = child
        .stderr
        .take()
        .map(|stderr| tokio::spawn(read_all(stderr)));

    let mut reader = BufReader::new(stdout);
    let mut full_text = String::new();
    let mut line = Vec::new();
    let mut status = None;
    // 子进程退出后只再等待管道一小段时间
    let mut drain_at: Option<Instant> = None;
    let mut group_killed = false;
    loop {
        let until = drain_at.unwrap_or(deadline_at);
        let step = sender
            .guard(tokio::time::timeout_at(
                until,
                next_step(&mut reader, &mut line, &mut child, status.is_some()),
            ))
            .await;
        let step = match step {
            Err(_) => {
                terminate(provider, &mut child, group).await;
                tracing::debug!(provider, "stream cancelled by caller");
                return;
            }
            Ok(Err(_)) if status.is_some() => {
                if group_killed {
                    break;
                }
                tracing::debug!(provider, "stdout held open after exit, killing process group");
                kill_process_group(provider, group);
                group_killed = true;
                drain_at = Some(Instant::now() + IO_DRAIN_TIMEOUT);
                continue;
            }
            Ok(Err(_)) => {
                terminate(provider, &mut child, group).await;
                tracing::warn!(provider, ?deadline, "child process timed out");
                let err = LLMError::Timeout {
                    provider,
                    after: deadline,
                };
                sender.finish(ToolStreamEvent::failed(err).into()).await;
                return;
            }
            Ok(Ok(step)) => step,
        };

        match step {
            Step::Exited(Ok(exited)) => {
                status = Some(exited);
                drain_at = Some(Instant::now() + IO_DRAIN_TIMEOUT);
            }
            Step::Exited(Err(err)) | Step::Line(Err(err)) => {
                terminate(provider, &mut child, group).await;
                sender
                    .finish(ToolStreamEvent::failed(pipe_error(provider, err)).into())
                    .await;
                return;
            }
            Step::Line(Ok(0)) => break,
            Step::Line(Ok(_)) => {
                let text = String::from_utf8_lossy(&line).into_owned();
                line.clear();
                full_text.push_str(&text);
                if sender.send(ToolStreamEvent::delta(text).into()).await.is_err() {
                    terminate(provider, &mut child, group).await;
                    tracing::debug!(provider, "stream cancelled by caller");
                    return;
                }
            }
        }
    }
    drop(reader);

    let status = match status {
        Some(status) => status,
        None => {
            let waited = sender
                .guard(tokio::time::timeout_at(deadline_at, child.wait()))
                .await;
            match waited {
                Err(_) => {
                    terminate(provider, &mut child, group).await;
                    return;
                }
                Ok(Err(_)) => {
                    terminate(provider, &mut child, group).await;
                    tracing::warn!(provider, ?deadline, "child process timed out");
                    let err = LLMError::Timeout {
                        provider,
                        after: deadline,
                    };
                    sender.finish(ToolStreamEvent::failed(err).into()).await;
                    return;
                }
                Ok(Ok(Err(err))) => {
                    sender
                        .finish(ToolStreamEvent::failed(pipe_error(provider, err)).into())
                        .await;
                    return;
                }
                Ok(Ok(Ok(status))) => status,
            }
        }
    };

    let terminal = if status.success() {
        if let Some(task) = stderr_task {
            task.abort();
        }
        ToolStreamEvent::finished(full_text.trim().to_string(), Vec::new())
    } else {
        let stderr = match stderr_task {
            Some(task) => drain(provider, group, task).await.unwrap_or_default(),
            None => Vec::new(),
        };
        ToolStreamEvent::failed(exit_error(
            provider,
            status,
            &String::from_utf8_lossy(&stderr),
            &full_text,
        ))
    };
    sender.finish(terminal.into()).await;
}

fn take_pipe<T>(provider: &'static str, pipe: Option<T>, name: &str) -> Result<T, LLMError> {
    pipe.ok_or_else(|| LLMError::Process {
        provider,
        code: None,
        message: format!("child {name} was not captured"),
    })
}

async fn read_all<R: AsyncRead + Unpin>(mut reader: R) -> std::io::Result<Vec<u8>> {
    let mut buffer = Vec::new();
    reader.read_to_end(&mut buffer).await?;
    Ok(buffer)
}

/// Collects a pipe reader once the child has exited.
///
/// When a descendant keeps the pipe open past [`IO_DRAIN_TIMEOUT`], the process group is
/// killed so the reader reaches end of file with whatever was already written.
async fn drain(
    provider: &'static str,
    group: Option<u32>,
    mut task: JoinHandle<std::io::Result<Vec<u8>>>,
) -> Result<Vec<u8>, LLMError> {
    let joined = match tokio::time::timeout(IO_DRAIN_TIMEOUT, &mut task).await {
        Ok(joined) => joined,
        Err(_) => {
            tracing::debug!(provider, "output pipe held open after exit, killing process group");
            kill_process_group(provider, group);
            match tokio::time::timeout(IO_DRAIN_TIMEOUT, &mut task).await {
                Ok(joined) => joined,
                Err(_) => {
                    task.abort();
                    return Ok(Vec::new());
                }
            }
        }
    };
    match joined {
        Ok(read) => read.map_err(|err| pipe_error(provider, err)),
        Err(err) => Err(pipe_error(provider, std::io::Error::other(err))),
    }
}

/// Kills the process group and the child, then reaps the child so no zombie outlives the call.
async fn terminate(provider: &'static str, child: &mut Child, group: Option<u32>) {
    kill_process_group(provider, group);
    if let Err(err) = child.kill().await {
        tracing::debug!(provider, error = %err, "failed to kill child process");
    }
}

/// The child leads its own group, so its pid doubles as the group id.
#[cfg(unix)]
fn kill_process_group(provider: &'static str, group: Option<u32>) {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Some(Ok(pgid)) = group.map(i32::try_from) else {
        return;
    };
    match killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(err) => tracing::debug!(provider, error = %err, "failed to kill process group"),
    }
}

#[cfg(not(unix))]
fn kill_process_group(_provider: &'static str, _group: Option<u32>) {}

fn pipe_error(provider: &'static str, err: std::io::Error) -> LLMError {
    LLMError::Process {
        provider,
        code: None,
        message: format!("failed to read child output: {err}"),
    }
}

/// Diagnostic output is stderr, or stdout when the child wrote nothing to stderr.
fn exit_error(provider: &'static str, status: ExitStatus, stderr: &str, stdout: &str) -> LLMError {
    let message = if stderr.trim().is_empty() {
        stdout.trim()
    } else {
        stderr.trim()
    };
    tracing::error!(provider, code = ?status.code(), "child process failed");
    LLMError::Process {
        provider,
        code: status.code(),
        message: message.to_string(),
    }
}
