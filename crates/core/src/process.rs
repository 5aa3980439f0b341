//! Shared subprocess execution.
//!
//! [`run_command`] is the single place where short-lived external tools
//! (git, gource in log mode, ffmpeg, ffprobe) are spawned, drained, and
//! bounded by a timeout. The long-running renderer/encoder pair is
//! supervised separately in [`crate::render`].

use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

/// Maximum stdout or stderr size captured per stream (10 MiB).
const MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("I/O error waiting for {program}: {source}")]
    Wait {
        program: String,
        source: std::io::Error,
    },

    #[error("{program} timed out after {elapsed_ms} ms")]
    Timeout { program: String, elapsed_ms: u64 },
}

/// Captured result of a finished process.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Display name of the program a command will run.
pub fn program_name(cmd: &Command) -> String {
    cmd.as_std().get_program().to_string_lossy().into_owned()
}

/// Spawn `cmd`, capture stdout/stderr, and enforce `timeout`.
///
/// Stdin is closed. A child still running at the deadline is killed.
pub async fn run_command(
    cmd: &mut Command,
    timeout: Duration,
) -> Result<CommandOutput, ProcessError> {
    let program = program_name(cmd);
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let start = Instant::now();
    let mut child = cmd.spawn().map_err(|source| ProcessError::Spawn {
        program: program.clone(),
        source,
    })?;

    // Drain both pipes concurrently so a chatty child cannot block on a
    // full pipe buffer while we wait on it.
    let stdout_handle = child.stdout.take();
    let stderr_handle = child.stderr.take();
    let stdout_task = tokio::spawn(async move { read_stream(stdout_handle).await });
    let stderr_task = tokio::spawn(async move { read_stream(stderr_handle).await });

    match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) => {
            let stdout_bytes = stdout_task.await.unwrap_or_default();
            let stderr_bytes = stderr_task.await.unwrap_or_default();
            let output = CommandOutput {
                stdout: String::from_utf8_lossy(&stdout_bytes).into_owned(),
                stderr: String::from_utf8_lossy(&stderr_bytes).into_owned(),
                exit_code: status.code(),
                duration_ms: start.elapsed().as_millis() as u64,
            };
            tracing::debug!(
                program = %program,
                exit_code = ?output.exit_code,
                elapsed_ms = output.duration_ms,
                "Process finished",
            );
            Ok(output)
        }
        Ok(Err(source)) => Err(ProcessError::Wait { program, source }),
        Err(_elapsed) => {
            // `child` drops here; kill_on_drop terminates it.
            Err(ProcessError::Timeout {
                program,
                elapsed_ms: start.elapsed().as_millis() as u64,
            })
        }
    }
}

/// Read an entire output stream into a byte buffer, capped at [`MAX_OUTPUT_BYTES`].
async fn read_stream<R: AsyncRead + Unpin>(handle: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut h) = handle {
        let _ = (&mut h)
            .take(MAX_OUTPUT_BYTES as u64)
            .read_to_end(&mut buf)
            .await;
    }
    buf
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[tokio::test]
    async fn captures_stdout_and_exit_code() {
        let out = run_command(&mut sh("echo hello; echo oops >&2; exit 3"), Duration::from_secs(5))
            .await
            .expect("run");
        assert_eq!(out.stdout.trim(), "hello");
        assert_eq!(out.stderr.trim(), "oops");
        assert_eq!(out.exit_code, Some(3));
        assert!(!out.success());
    }

    #[tokio::test]
    async fn timeout_kills_child() {
        let err = run_command(&mut sh("sleep 10"), Duration::from_millis(100))
            .await
            .unwrap_err();
        assert_matches!(err, ProcessError::Timeout { .. });
    }

    #[tokio::test]
    async fn missing_program_is_spawn_error() {
        let mut cmd = Command::new("/nonexistent/commitreel-tool");
        let err = run_command(&mut cmd, Duration::from_secs(1)).await.unwrap_err();
        assert_matches!(err, ProcessError::Spawn { .. });
    }
}
