//! Runs one job's shell command as a supervised child process.
//!
//! Spawns into a fresh process group so a timeout-kill reaches descendants
//! too (spec.md §9, "Executor as process-group owner" — load-bearing, many
//! commands spawn children that outlive a plain kill).

use std::os::unix::process::ExitStatusExt;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::Command;

use crate::job::Job;

/// The outcome of one execution attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionOutcome {
    pub success: bool,
    /// Captured stdout, then stderr, concatenated.
    pub output: String,
    pub error: Option<String>,
}

/// Runs job commands via the system shell, with timeout and process-group kill.
#[derive(Debug, Clone, Copy)]
pub struct Executor {
    default_timeout_secs: i64,
}

impl Executor {
    pub fn new(default_timeout_secs: i64) -> Self {
        Self {
            default_timeout_secs,
        }
    }

    /// Execute `job.command` via `sh -c`. Never panics or propagates an
    /// error to the caller — host/spawn failures are folded into the
    /// returned [`ExecutionOutcome`].
    #[tracing::instrument(skip(self, job), fields(job_id = %job.id))]
    pub async fn execute(&self, job: &Job) -> ExecutionOutcome {
        let timeout_secs = job.timeout.unwrap_or(self.default_timeout_secs).max(1) as u64;
        let timeout = Duration::from_secs(timeout_secs);

        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg(&job.command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0); // new process group, so a timeout kill reaches children

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(err) => {
                tracing::warn!(job_id = %job.id, error = %err, "failed to spawn job command");
                return ExecutionOutcome {
                    success: false,
                    output: String::new(),
                    error: Some(err.to_string()),
                };
            }
        };

        let pid = child.id();

        let mut stdout_pipe = child.stdout.take();
        let mut stderr_pipe = child.stderr.take();

        // Both pipes must be drained concurrently, not one after the other:
        // a child that fills one pipe's OS buffer before the parent starts
        // reading the other would otherwise block on a write forever.
        let run = async {
            let stdout_fut = async {
                let mut buf = String::new();
                if let Some(pipe) = stdout_pipe.as_mut() {
                    let _ = pipe.read_to_string(&mut buf).await;
                }
                buf
            };
            let stderr_fut = async {
                let mut buf = String::new();
                if let Some(pipe) = stderr_pipe.as_mut() {
                    let _ = pipe.read_to_string(&mut buf).await;
                }
                buf
            };
            let (stdout, stderr) = tokio::join!(stdout_fut, stderr_fut);
            let status = child.wait().await;
            (status, stdout, stderr)
        };

        match tokio::time::timeout(timeout, run).await {
            Ok((status, stdout, stderr)) => {
                let output = format!("{stdout}{stderr}");
                match status {
                    Ok(status) => {
                        if status.success() {
                            ExecutionOutcome {
                                success: true,
                                output,
                                error: None,
                            }
                        } else {
                            let error = if stderr.trim().is_empty() {
                                let code = status
                                    .code()
                                    .map(|c| c.to_string())
                                    .unwrap_or_else(|| format!("signal {}", status.signal().unwrap_or(-1)));
                                format!("Command failed with exit code {code}")
                            } else {
                                stderr.clone()
                            };
                            ExecutionOutcome {
                                success: false,
                                output,
                                error: Some(error),
                            }
                        }
                    }
                    Err(err) => ExecutionOutcome {
                        success: false,
                        output,
                        error: Some(err.to_string()),
                    },
                }
            }
            Err(_) => {
                // Timed out: kill the whole process group, not just the child.
                if let Some(pid) = pid {
                    kill_process_group(pid as i32);
                }
                let _ = child.kill().await;
                let _ = child.wait().await;
                tracing::warn!(job_id = %job.id, timeout_secs, "job timed out");
                ExecutionOutcome {
                    success: false,
                    output: String::new(),
                    error: Some(format!("Job timed out after {timeout_secs} seconds")),
                }
            }
        }
    }
}

/// Send SIGKILL to the negative pid, i.e. the whole process group.
fn kill_process_group(pid: i32) {
    // Safety: killing a process group we just created with `process_group(0)`.
    unsafe {
        libc::kill(-pid, libc::SIGKILL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::Job;

    fn job_with(command: &str) -> Job {
        Job::new("test", command, 3, 0, None, None)
    }

    #[tokio::test]
    async fn successful_command_reports_success() {
        let executor = Executor::new(30);
        let outcome = executor.execute(&job_with("echo hi")).await;
        assert!(outcome.success);
        assert!(outcome.output.contains("hi"));
        assert!(outcome.error.is_none());
    }

    #[tokio::test]
    async fn nonzero_exit_with_stderr_uses_stderr_as_error() {
        let executor = Executor::new(30);
        let outcome = executor
            .execute(&job_with("echo oops 1>&2; exit 1"))
            .await;
        assert!(!outcome.success);
        assert_eq!(outcome.error.as_deref(), Some("oops\n"));
    }

    #[tokio::test]
    async fn nonzero_exit_without_stderr_synthesizes_message() {
        let executor = Executor::new(30);
        let outcome = executor.execute(&job_with("exit 7")).await;
        assert!(!outcome.success);
        assert_eq!(
            outcome.error.as_deref(),
            Some("Command failed with exit code 7")
        );
    }

    #[tokio::test]
    async fn timeout_kills_process_and_reports_message() {
        let executor = Executor::new(30);
        let mut job = job_with("sleep 5");
        job.timeout = Some(1);
        let start = std::time::Instant::now();
        let outcome = executor.execute(&job).await;
        assert!(!outcome.success);
        assert_eq!(
            outcome.error.as_deref(),
            Some("Job timed out after 1 seconds")
        );
        assert!(start.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn large_combined_output_on_both_streams_does_not_deadlock() {
        // Writes well past a typical 64KiB pipe buffer to stdout *and*
        // stderr before exiting; a sequential stdout-then-stderr drain would
        // block the child on a full stderr pipe while the parent is still
        // waiting for stdout to reach EOF, turning this into a spurious
        // timeout instead of a success.
        let executor = Executor::new(5);
        let mut job = job_with(
            "yes out | head -c 200000 >&1 & yes err | head -c 200000 >&2 & wait",
        );
        job.timeout = Some(5);
        let outcome = executor.execute(&job).await;
        assert!(outcome.success);
        assert!(outcome.output.len() > 300_000);
    }
}
