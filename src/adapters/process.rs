//! Spawn-and-wait process runner for sidecar bridges.

use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::ports::{ProcessOutput, ProcessRunner, ProcessSpec, TIMEOUT_EXIT_CODE};

/// Grace period between SIGTERM and SIGKILL on timeout.
const TERMINATE_GRACE: Duration = Duration::from_secs(2);

/// [`ProcessRunner`] on `tokio::process`. Children are killed, not
/// abandoned, when they outlive their timeout.
#[derive(Debug, Clone)]
pub struct TokioProcessRunner {
    terminate_grace: Duration,
}

impl Default for TokioProcessRunner {
    fn default() -> Self {
        Self {
            terminate_grace: TERMINATE_GRACE,
        }
    }
}

impl TokioProcessRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_terminate_grace(mut self, grace: Duration) -> Self {
        self.terminate_grace = grace;
        self
    }

    async fn terminate(&self, child: &mut Child, command: &str) {
        if let Some(pid) = child.id().and_then(|id| i32::try_from(id).ok()) {
            if let Err(e) = signal::kill(Pid::from_raw(pid), Signal::SIGTERM) {
                debug!(command, pid, error = %e, "SIGTERM failed");
            }
            if tokio::time::timeout(self.terminate_grace, child.wait())
                .await
                .is_ok()
            {
                return;
            }
        }
        // kill() also reaps the child.
        if let Err(e) = child.kill().await {
            warn!(command, error = %e, "failed to kill timed out process");
        }
    }
}

fn spawn_reader<R>(reader: Option<R>) -> JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut reader) = reader {
            let _ = reader.read_to_end(&mut buf).await;
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn spawn_writer(mut stdin: ChildStdin, input: String, command: String) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = stdin.write_all(input.as_bytes()).await {
            // The child may exit before reading its input.
            debug!(command = %command, error = %e, "failed to write stdin");
        }
    })
}

/// Exit code with signal terminations reported shell-style as `128 + signo`.
fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| status.signal().map(|signo| 128 + signo))
        .unwrap_or(-1)
}

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(&self, spec: ProcessSpec) -> DomainResult<ProcessOutput> {
        let mut cmd = Command::new(&spec.command);
        cmd.args(&spec.args)
            .envs(&spec.env)
            .stdin(if spec.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &spec.cwd {
            cmd.current_dir(cwd);
        }

        let mut child = cmd.spawn().map_err(|e| {
            DomainError::ExecutionFailed(format!("failed to spawn {}: {e}", spec.command))
        })?;

        let stdout = spawn_reader(child.stdout.take());
        let stderr = spawn_reader(child.stderr.take());
        // Input is fed alongside the wait so a child that never drains
        // stdin still runs into the timeout.
        let stdin_writer = match (spec.stdin.clone(), child.stdin.take()) {
            (Some(input), Some(stdin)) => Some(spawn_writer(stdin, input, spec.command.clone())),
            _ => None,
        };

        let waited = tokio::time::timeout(spec.timeout, child.wait()).await;
        if let Some(writer) = &stdin_writer {
            // Closes the pipe if the write is still blocked.
            writer.abort();
        }
        let (exit_code, timed_out) = match waited {
            Ok(Ok(status)) => (exit_code(status), false),
            Ok(Err(e)) => {
                return Err(DomainError::ExecutionFailed(format!(
                    "failed waiting for {}: {e}",
                    spec.command
                )))
            }
            Err(_) => {
                warn!(
                    command = %spec.command,
                    timeout_ms = u64::try_from(spec.timeout.as_millis()).unwrap_or(u64::MAX),
                    "process timed out, terminating"
                );
                self.terminate(&mut child, &spec.command).await;
                (TIMEOUT_EXIT_CODE, true)
            }
        };

        let (stdout, mut stderr) = if timed_out {
            // Grandchildren may still hold the pipes open.
            let grace = self.terminate_grace;
            (
                tokio::time::timeout(grace, stdout).await.ok().and_then(Result::ok).unwrap_or_default(),
                tokio::time::timeout(grace, stderr).await.ok().and_then(Result::ok).unwrap_or_default(),
            )
        } else {
            (stdout.await.unwrap_or_default(), stderr.await.unwrap_or_default())
        };
        if timed_out {
            if !stderr.is_empty() && !stderr.ends_with('\n') {
                stderr.push('\n');
            }
            stderr.push_str("process timeout");
        }

        Ok(ProcessOutput {
            exit_code,
            stdout,
            stderr,
            timed_out,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn sh(script: &str, timeout: Duration) -> ProcessSpec {
        ProcessSpec {
            command: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            env: BTreeMap::new(),
            cwd: None,
            stdin: None,
            timeout,
        }
    }

    #[tokio::test]
    async fn test_captures_output_and_exit_code() {
        let output = TokioProcessRunner::new()
            .run(sh("echo out; echo err >&2; exit 3", Duration::from_secs(5)))
            .await
            .unwrap();
        assert_eq!(output.exit_code, 3);
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
        assert!(!output.timed_out);
    }

    #[tokio::test]
    async fn test_pipes_stdin_and_env() {
        let mut spec = sh("read line; echo \"$line-$SUFFIX\"", Duration::from_secs(5));
        spec.stdin = Some("hello\n".to_string());
        spec.env.insert("SUFFIX".to_string(), "world".to_string());
        let output = TokioProcessRunner::new().run(spec).await.unwrap();
        assert!(output.success());
        assert_eq!(output.stdout.trim(), "hello-world");
    }

    #[tokio::test]
    async fn test_timeout_kills_child() {
        let runner = TokioProcessRunner::new().with_terminate_grace(Duration::from_millis(200));
        let started = std::time::Instant::now();
        let output = runner
            .run(sh("exec sleep 30", Duration::from_millis(100)))
            .await
            .unwrap();
        assert!(output.timed_out);
        assert_eq!(output.exit_code, TIMEOUT_EXIT_CODE);
        assert!(output.stderr.contains("timeout"));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_timeout_applies_when_child_ignores_stdin() {
        let runner = TokioProcessRunner::new().with_terminate_grace(Duration::from_millis(200));
        let mut spec = sh("exec sleep 30", Duration::from_millis(200));
        // Well past any pipe buffer.
        spec.stdin = Some("x".repeat(1 << 20));

        let output = tokio::time::timeout(Duration::from_secs(5), runner.run(spec))
            .await
            .expect("run should return once the timeout fires")
            .unwrap();
        assert!(output.timed_out);
        assert_eq!(output.exit_code, TIMEOUT_EXIT_CODE);
    }

    #[tokio::test]
    async fn test_large_stdin_is_fully_delivered() {
        let mut spec = sh("wc -c", Duration::from_secs(5));
        spec.stdin = Some("y".repeat(1 << 20));
        let output = TokioProcessRunner::new().run(spec).await.unwrap();
        assert!(output.success());
        assert_eq!(output.stdout.trim(), (1 << 20).to_string());
    }

    #[tokio::test]
    async fn test_missing_command_is_error() {
        let mut spec = sh("true", Duration::from_secs(1));
        spec.command = "/nonexistent/labexec-bridge".to_string();
        let err = TokioProcessRunner::new().run(spec).await.unwrap_err();
        assert_eq!(err.code(), "EXECUTION_FAILED");
    }
}
