//! Child process supervision.
//!
//! Two flavours of child exist here. Long-running children (the compose
//! process) are spawned with [`ChildProcess::spawn`]: their stderr is piped
//! and drained continuously so the child can never block on a full pipe,
//! and the captured text feeds the error raised on a non-zero exit.
//! One-shot commands (docker CLI calls) go through [`run_capture`], which
//! returns stdout and kills the child if the caller loses interest, making
//! every CLI call cancellable by dropping its future.

use std::io;
use std::path::Path;
use std::process::Stdio;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::debug;

/// Substituted when a failed child produced no stderr at all.
const UNKNOWN_ERROR: &str = "Unknown error";

/// Errors from spawning, signalling or reaping child processes.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The executable could not be started.
    #[error("Failed to spawn '{command}': {source}")]
    Spawn { command: String, source: io::Error },

    /// The child exited with a non-zero status.
    ///
    /// Carries whatever the child wrote to stderr, so the failure is
    /// diagnosable from the error alone.
    #[error("Command '{command}' failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    /// Waiting on the child failed at the OS level.
    #[error("Failed to wait for '{command}': {source}")]
    Wait { command: String, source: io::Error },

    /// Delivering a signal to the child failed.
    #[error("Failed to signal '{command}': {source}")]
    Signal {
        command: String,
        source: nix::errno::Errno,
    },
}

/// A supervised long-running child process.
///
/// Stderr is drained into a buffer from the moment of spawn. Stdout is
/// inherited, so the child's regular output interleaves with the
/// supervisor's own logs. Exactly one of [`wait`](Self::wait) (to
/// completion) or [`shutdown`](Self::shutdown) must reap the child.
pub struct ChildProcess {
    child: Child,
    command: String,
    stderr_task: Option<JoinHandle<String>>,
}

impl ChildProcess {
    /// Spawns `program` with `args` in `cwd`.
    pub fn spawn(program: &str, args: &[&str], cwd: &Path) -> Result<Self, ProcessError> {
        let command = command_line(program, args);
        debug!(command = %command, "Spawning child process");

        let mut child = Command::new(program)
            .args(args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ProcessError::Spawn {
                command: command.clone(),
                source,
            })?;

        // Drain stderr for the child's whole lifetime.
        let stderr_task = child.stderr.take().map(|mut stderr| {
            tokio::spawn(async move {
                let mut buffer = String::new();
                let _ = stderr.read_to_string(&mut buffer).await;
                buffer
            })
        });

        Ok(Self {
            child,
            command,
            stderr_task,
        })
    }

    /// The joined command line, for log and error messages.
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Waits for the child to exit.
    ///
    /// Cancel-safe: dropping the future leaves the child running and a
    /// later call resumes waiting. A non-zero exit yields
    /// [`ProcessError::CommandFailed`] carrying the captured stderr.
    pub async fn wait(&mut self) -> Result<(), ProcessError> {
        let status = self
            .child
            .wait()
            .await
            .map_err(|source| ProcessError::Wait {
                command: self.command.clone(),
                source,
            })?;

        if status.success() {
            return Ok(());
        }

        let stderr = match self.stderr_task.take() {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };
        let stderr = if stderr.trim().is_empty() {
            UNKNOWN_ERROR.to_string()
        } else {
            stderr.trim_end().to_string()
        };
        Err(ProcessError::CommandFailed {
            command: self.command.clone(),
            stderr,
        })
    }

    /// Sends SIGTERM and waits for the child to exit.
    ///
    /// The child's own termination handling decides how long this takes;
    /// for a compose process that includes stopping its containers.
    pub async fn shutdown(mut self) -> Result<(), ProcessError> {
        if let Some(pid) = self.child.id() {
            debug!(command = %self.command, pid, "Terminating child process");
            kill(Pid::from_raw(pid as i32), Signal::SIGTERM).map_err(|source| {
                ProcessError::Signal {
                    command: self.command.clone(),
                    source,
                }
            })?;
        }
        match self.wait().await {
            Ok(()) => Ok(()),
            // A SIGTERM death is the expected outcome of a shutdown.
            Err(ProcessError::CommandFailed { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// Runs a one-shot command and returns its stdout.
///
/// Stdout and stderr are both piped; a non-zero exit produces
/// [`ProcessError::CommandFailed`] with the captured stderr. The child is
/// killed if the returned future is dropped, which is what makes callers'
/// `select!` races abort the underlying CLI call.
pub async fn run_capture(
    program: &str,
    args: &[&str],
    cwd: &Path,
) -> Result<String, ProcessError> {
    let command = command_line(program, args);
    debug!(command = %command, "Running command");

    let output = Command::new(program)
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|source| ProcessError::Spawn {
            command: command.clone(),
            source,
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stderr = if stderr.trim().is_empty() {
            UNKNOWN_ERROR.to_string()
        } else {
            stderr.trim_end().to_string()
        };
        return Err(ProcessError::CommandFailed { command, stderr });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn command_line(program: &str, args: &[&str]) -> String {
    let mut line = String::from(program);
    for arg in args {
        line.push(' ');
        line.push_str(arg);
    }
    line
}
