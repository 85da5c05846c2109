//! External process execution.
//!
//! Hidden runs capture stdout/stderr line by line into the log. Visible runs
//! are launched as their own session with inherited output; on Windows this
//! goes through `cmd.exe /c start /wait`, and environment overrides are set on
//! the launcher so the visible program inherits them. Cancelling a visible run
//! stops the wait and kills the launcher, but the window it opened may keep
//! running.
//!
//! Output readers get [`OUTPUT_DRAIN_GRACE`] after the process exits. A
//! background child that inherited the pipes can keep them open for longer;
//! its remaining output is dropped.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::SchedulerError;

/// Captured lines kept per stream; older lines are only logged.
pub const OUTPUT_TAIL_LINES: usize = 200;

/// Longest captured line in bytes; the remainder of a longer line is dropped.
pub const MAX_LINE_BYTES: usize = 8 * 1024;

/// How long output readers may run after the process has exited.
pub const OUTPUT_DRAIN_GRACE: Duration = Duration::from_secs(2);

type OutputTail = Arc<Mutex<VecDeque<String>>>;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Fully resolved external process invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessCommand {
    /// Program or script path.
    pub command: String,
    /// Raw argument string.
    pub arguments: String,
    /// Working directory; empty means the current directory.
    pub working_directory: PathBuf,
    /// Launch visibly instead of capturing output.
    pub show_window: bool,
    /// Environment overrides.
    pub environment: HashMap<String, String>,
}

/// Result of a process run that reached exit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutcome {
    /// Exit code, `-1` when the process was terminated by a signal.
    pub exit_code: i32,
    /// Wall time from spawn to exit.
    pub duration: Duration,
    /// Tail of captured stdout (hidden runs only).
    pub stdout: Vec<String>,
    /// Tail of captured stderr (hidden runs only).
    pub stderr: Vec<String>,
}

impl ProcessOutcome {
    /// Whether the process exited with code 0.
    #[must_use]
    pub const fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Short diagnostic: the last stderr line, else the last stdout line.
    #[must_use]
    pub fn summary(&self) -> Option<String> {
        self.stderr.last().or_else(|| self.stdout.last()).cloned()
    }

    /// Convert a non-zero exit into [`SchedulerError::NonZeroExit`].
    ///
    /// # Errors
    ///
    /// Returns the exit code as an error when it is not 0.
    pub fn into_result(self) -> Result<Self, SchedulerError> {
        if self.success() {
            Ok(self)
        } else {
            Err(SchedulerError::NonZeroExit {
                code: self.exit_code,
            })
        }
    }
}

/// Runs one external command to completion. Never retries.
#[derive(Debug, Clone, Default)]
pub struct ProcessExecutor;

impl ProcessExecutor {
    /// Create an executor.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Spawn `command` and wait for it to exit.
    ///
    /// # Errors
    ///
    /// * [`SchedulerError::MissingCommand`] before spawning when the command is blank.
    /// * [`SchedulerError::ProcessLaunch`] when the process cannot be started.
    /// * [`SchedulerError::Cancelled`] when `cancel` fires before exit.
    pub async fn run(
        &self,
        job_name: &str,
        command: &ProcessCommand,
        cancel: &CancellationToken,
    ) -> Result<ProcessOutcome, SchedulerError> {
        if command.command.trim().is_empty() {
            return Err(SchedulerError::MissingCommand);
        }

        let working_directory = if command.working_directory.as_os_str().is_empty() {
            std::env::current_dir().unwrap_or_default()
        } else {
            command.working_directory.clone()
        };

        let mut cmd = if command.show_window {
            visible_command(command, &working_directory)
        } else {
            hidden_command(command, &working_directory)
        };

        tracing::info!(
            job = job_name,
            "running external process: {} {} (wd={})",
            command.command,
            command.arguments,
            working_directory.display()
        );

        let started = Instant::now();
        let mut child = cmd.spawn().map_err(|source| SchedulerError::ProcessLaunch {
            command: command.command.clone(),
            source,
        })?;

        let stdout = OutputTail::default();
        let stderr = OutputTail::default();
        let mut readers: Vec<JoinHandle<()>> = Vec::with_capacity(2);
        if let Some(out) = child.stdout.take() {
            let tail = Arc::clone(&stdout);
            readers.push(tokio::spawn(collect_lines(out, job_name.to_string(), false, tail)));
        }
        if let Some(err) = child.stderr.take() {
            let tail = Arc::clone(&stderr);
            readers.push(tokio::spawn(collect_lines(err, job_name.to_string(), true, tail)));
        }

        let waited = tokio::select! {
            status = child.wait() => status,
            () = cancel.cancelled() => {
                tracing::warn!(job = job_name, "cancelling external process {}", command.command);
                if let Err(e) = child.start_kill() {
                    tracing::warn!(job = job_name, "failed to kill external process: {}", e);
                }
                for reader in &readers {
                    reader.abort();
                }
                return Err(SchedulerError::Cancelled);
            }
        };
        let status = waited.map_err(|source| SchedulerError::ProcessLaunch {
            command: command.command.clone(),
            source,
        })?;
        let duration = started.elapsed();

        let drain = async {
            for reader in &mut readers {
                if let Err(e) = reader.await {
                    tracing::debug!(job = job_name, "output reader ended abnormally: {}", e);
                }
            }
        };
        tokio::select! {
            () = drain => {}
            () = cancel.cancelled() => {
                tracing::warn!(job = job_name, "cancelled while draining output of {}", command.command);
            }
            () = tokio::time::sleep(OUTPUT_DRAIN_GRACE) => {
                tracing::warn!(
                    job = job_name,
                    "output of {} still open {}ms after exit, a background process may hold it",
                    command.command,
                    OUTPUT_DRAIN_GRACE.as_millis()
                );
            }
        }
        for reader in &readers {
            reader.abort();
        }
        let stdout: Vec<String> = stdout.lock().drain(..).collect();
        let stderr: Vec<String> = stderr.lock().drain(..).collect();

        let exit_code = status.code().unwrap_or(-1);
        tracing::debug!(
            job = job_name,
            "external process exited with {} after {}ms",
            exit_code,
            duration.as_millis()
        );
        Ok(ProcessOutcome {
            exit_code,
            duration,
            stdout,
            stderr,
        })
    }
}

fn hidden_command(command: &ProcessCommand, working_directory: &Path) -> Command {
    let mut cmd = Command::new(&command.command);
    push_arguments(&mut cmd, &command.arguments);
    cmd.current_dir(working_directory)
        .envs(&command.environment)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(windows)]
    cmd.creation_flags(CREATE_NO_WINDOW);
    cmd
}

/// `cmd.exe /c` line of a visible run. Environment overrides are not spelled
/// out here; the window inherits them from the launcher.
#[cfg_attr(not(windows), allow(dead_code))]
fn visible_command_line(command: &ProcessCommand, working_directory: &Path) -> String {
    let title = Path::new(&command.command)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut line = format!(
        "start \"{}\" /D \"{}\" /wait \"{}\"",
        title,
        working_directory.display(),
        command.command
    );
    if !command.arguments.trim().is_empty() {
        line.push(' ');
        line.push_str(&command.arguments);
    }
    line
}

#[cfg(windows)]
fn visible_command(command: &ProcessCommand, working_directory: &Path) -> Command {
    let mut cmd = Command::new("cmd.exe");
    cmd.raw_arg("/c")
        .raw_arg(visible_command_line(command, working_directory))
        .current_dir(working_directory)
        .envs(&command.environment)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    cmd
}

#[cfg(not(windows))]
fn visible_command(command: &ProcessCommand, working_directory: &Path) -> Command {
    let mut cmd = Command::new(&command.command);
    push_arguments(&mut cmd, &command.arguments);
    cmd.current_dir(working_directory)
        .envs(&command.environment)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit());
    cmd
}

#[cfg(windows)]
fn push_arguments(cmd: &mut Command, arguments: &str) {
    if !arguments.trim().is_empty() {
        cmd.raw_arg(arguments);
    }
}

#[cfg(not(windows))]
fn push_arguments(cmd: &mut Command, arguments: &str) {
    cmd.args(split_arguments(arguments));
}

/// Split a raw argument string the way a shell would for simple quoting:
/// whitespace separates, single and double quotes group, backslash escapes the
/// next character outside single quotes.
#[must_use]
pub fn split_arguments(raw: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_arg = false;
    let mut quote: Option<char> = None;
    let mut chars = raw.chars();

    while let Some(c) = chars.next() {
        match (quote, c) {
            (Some('\''), '\'') | (Some('"'), '"') => quote = None,
            (Some('\''), _) => current.push(c),
            (_, '\\') => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
                in_arg = true;
            }
            (Some(_), _) => current.push(c),
            (None, '\'' | '"') => {
                quote = Some(c);
                in_arg = true;
            }
            (None, c) if c.is_whitespace() => {
                if in_arg {
                    args.push(std::mem::take(&mut current));
                    in_arg = false;
                }
            }
            (None, _) => {
                current.push(c);
                in_arg = true;
            }
        }
    }
    if in_arg {
        args.push(current);
    }
    args
}

async fn collect_lines<R>(reader: R, job: String, is_stderr: bool, tail: OutputTail)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        match read_capped_line(&mut reader, &mut buf).await {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => {
                tracing::debug!(job = %job, "output stream failed: {}", e);
                break;
            }
        }
        let decoded = String::from_utf8_lossy(&buf);
        let line = decoded.trim_end_matches('\r');
        if line.is_empty() {
            continue;
        }
        if is_stderr {
            tracing::warn!(job = %job, "stderr: {}", line);
        } else {
            tracing::info!(job = %job, "stdout: {}", line);
        }
        {
            let mut tail = tail.lock();
            if tail.len() == OUTPUT_TAIL_LINES {
                tail.pop_front();
            }
            tail.push_back(line.to_string());
        }
    }
}

/// Read one `\n`-terminated line into `line`, keeping at most
/// [`MAX_LINE_BYTES`]. Returns `false` at end of stream.
async fn read_capped_line<R>(reader: &mut R, line: &mut Vec<u8>) -> std::io::Result<bool>
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    line.clear();
    let mut read_any = false;
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(read_any);
        }
        read_any = true;
        let (chunk, complete) = match available.iter().position(|&b| b == b'\n') {
            Some(end) => (&available[..end], true),
            None => (available, false),
        };
        let room = MAX_LINE_BYTES.saturating_sub(line.len());
        line.extend_from_slice(&chunk[..chunk.len().min(room)]);
        let consumed = chunk.len() + usize::from(complete);
        reader.consume(consumed);
        if complete {
            return Ok(true);
        }
    }
}
