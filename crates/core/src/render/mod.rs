//! Video render orchestration.
//!
//! Gource writes raw PPM frames into a named pipe and ffmpeg encodes them
//! as they arrive, so no frame ever touches the disk. Both processes run
//! concurrently; the orchestrator waits on the encoder in bounded slices so
//! it can notice cancellation, a dead renderer, or the overall deadline.

pub mod fifo;

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

use crate::executables::{Tool, ToolError, ToolPaths};
use crate::files::move_file;
use crate::render_options::{RenderOptionSet, VideoSize};

use self::fifo::FramePipe;

/// Output frame rate of both renderer and encoder.
pub const FRAMERATE: u32 = 60;

/// Fixed renderer flags applied to every build.
pub const BASE_RENDER_ARGS: &[&str] = &[
    "--stop-at-end",
    "--key",
    "--hide",
    "filenames,progress",
    "--highlight-users",
    "--user-scale",
    "3",
    "--dir-name-depth",
    "4",
    "--bloom-multiplier",
    "0.5",
    "--disable-input",
    "--no-vsync",
];

/// Most of a process log kept for diagnostics and storage.
const MAX_LOG_BYTES: u64 = 256 * 1024;

/// Grace period between SIGTERM and SIGKILL.
const TERMINATE_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("unsupported video size: {0}")]
    UnsupportedSize(String),

    #[error("render failed: {message}")]
    Failed { message: String, stderr: String },

    #[error("render timed out after {elapsed_secs} s")]
    Timeout { elapsed_secs: u64 },

    /// Stopped on request. Not a failure.
    #[error("build aborted")]
    Aborted,

    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

/// Polled by the orchestrator between encoder waits.
pub trait CancellationProbe: Send + Sync {
    fn is_cancelled(&self) -> bool;
}

impl CancellationProbe for CancellationToken {
    fn is_cancelled(&self) -> bool {
        CancellationToken::is_cancelled(self)
    }
}

impl<F> CancellationProbe for F
where
    F: Fn() -> bool + Send + Sync,
{
    fn is_cancelled(&self) -> bool {
        self()
    }
}

// ---------------------------------------------------------------------------
// Request / settings
// ---------------------------------------------------------------------------

/// Inputs for one render.
#[derive(Debug, Clone, Copy)]
pub struct RenderRequest<'a> {
    pub log_text: &'a str,
    /// `WIDTHxHEIGHT`, validated against [`VideoSize`].
    pub video_size: &'a str,
    pub avatars_dir: Option<&'a Path>,
    pub captions_path: Option<&'a Path>,
    pub logo_path: Option<&'a Path>,
    pub background_path: Option<&'a Path>,
    pub options: &'a RenderOptionSet,
}

#[derive(Debug, Clone, Copy)]
pub struct RenderSettings {
    /// Hard limit for the whole render (default 4 hours).
    pub timeout: Duration,
    /// Interval between cancellation/deadline checks (default 5 s).
    pub poll_interval: Duration,
    /// How long to let the renderer start before checking it is alive.
    pub startup_grace: Duration,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(4 * 60 * 60),
            poll_interval: Duration::from_secs(5),
            startup_grace: Duration::from_secs(2),
        }
    }
}

/// A finished render.
#[derive(Debug, Clone)]
pub struct RenderOutput {
    pub video_path: PathBuf,
    /// Renderer stdout.
    pub stdout: String,
    /// Renderer then encoder stderr.
    pub stderr: String,
    pub elapsed: Duration,
}

// ---------------------------------------------------------------------------
// Command lines
// ---------------------------------------------------------------------------

/// Renderer arguments (excluding the program itself).
pub fn renderer_args(
    request: &RenderRequest<'_>,
    size: VideoSize,
    log_path: &Path,
    frames: &Path,
) -> Vec<OsString> {
    let mut args: Vec<OsString> = BASE_RENDER_ARGS.iter().map(OsString::from).collect();
    args.extend(request.options.to_args().into_iter().map(OsString::from));

    let paths = [
        ("--caption-file", request.captions_path),
        ("--user-image-dir", request.avatars_dir),
        ("--logo", request.logo_path),
        ("--background-image", request.background_path),
    ];
    for (flag, path) in paths {
        if let Some(path) = path {
            args.push(flag.into());
            args.push(path.into());
        }
    }

    args.push(format!("-{size}").into());
    args.push("--output-ppm-stream".into());
    args.push(frames.into());
    args.push("--output-framerate".into());
    args.push(FRAMERATE.to_string().into());
    args.push(log_path.into());
    args
}

/// Encoder arguments. `yuv420p` keeps the output playable in browsers
/// that reject ffmpeg's default 4:4:4 chroma for PPM input.
pub fn encoder_args(frames: &Path, output: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = ["-y", "-r"].iter().map(OsString::from).collect();
    args.push(FRAMERATE.to_string().into());
    args.extend(["-f", "image2pipe", "-vcodec", "ppm", "-i"].iter().map(OsString::from));
    args.push(frames.into());
    args.extend(
        ["-vcodec", "libx264", "-pix_fmt", "yuv420p", "-crf", "23"]
            .iter()
            .map(OsString::from),
    );
    args.push(output.into());
    args
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct Renderer {
    tools: Arc<ToolPaths>,
    settings: RenderSettings,
}

impl Renderer {
    pub fn new(tools: Arc<ToolPaths>, settings: RenderSettings) -> Self {
        Self { tools, settings }
    }

    /// Render `request` into `output`.
    ///
    /// Returns [`RenderError::Aborted`] when `probe` reports cancellation;
    /// both processes are terminated first.
    pub async fn render(
        &self,
        request: &RenderRequest<'_>,
        output: &Path,
        probe: &dyn CancellationProbe,
    ) -> Result<RenderOutput, RenderError> {
        let size: VideoSize = request
            .video_size
            .parse()
            .map_err(|_| RenderError::UnsupportedSize(request.video_size.to_string()))?;

        let workdir = tempfile::Builder::new().prefix("commitreel_").tempdir()?;
        let dir = workdir.path();
        let log_path = dir.join("gource.log");
        tokio::fs::write(&log_path, request.log_text).await?;
        let pipe = FramePipe::create(dir.join("output.ppm"))?;
        let encoded = dir.join("output.mp4");

        let logs = ProcessLogs::new(dir);
        let start = Instant::now();

        let mut renderer = self
            .renderer_command(request, size, &log_path, pipe.writer_path(), &logs)?
            .spawn()?;
        tracing::info!(video_size = %size, pid = ?renderer.id(), "Renderer started");

        // A renderer that dies at startup never opens the pipe, and the
        // encoder would block on it forever.
        tokio::time::sleep(self.settings.startup_grace).await;
        if let Some(status) = renderer.try_wait()? {
            let stderr = logs.renderer_stderr().await;
            return Err(RenderError::Failed {
                message: format!("renderer exited at startup ({status})"),
                stderr,
            });
        }

        let mut encoder = self.encoder_command(pipe.reader_path(), &encoded, &logs)?.spawn()?;
        tracing::info!(pid = ?encoder.id(), "Encoder started");

        let status = match self
            .supervise(&mut renderer, &mut encoder, start, probe, &logs)
            .await
        {
            Ok(status) => status,
            Err(e) => {
                terminate(&mut encoder, "encoder").await;
                terminate(&mut renderer, "renderer").await;
                return Err(e);
            }
        };

        if !status.success() {
            terminate(&mut renderer, "renderer").await;
            let stderr = format!(
                "{}\n{}",
                logs.renderer_stderr().await,
                logs.encoder_stderr().await
            );
            return Err(RenderError::Failed {
                message: format!("encoder failed ({status})"),
                stderr,
            });
        }

        // The encoder saw EOF, so the renderer is finishing or done.
        let renderer_status =
            match tokio::time::timeout(TERMINATE_GRACE, renderer.wait()).await {
                Ok(status) => Some(status?),
                Err(_) => {
                    terminate(&mut renderer, "renderer").await;
                    None
                }
            };
        if let Some(status) = renderer_status.filter(|s| !s.success()) {
            return Err(RenderError::Failed {
                message: format!("renderer failed ({status})"),
                stderr: logs.renderer_stderr().await,
            });
        }

        move_file(&encoded, output).await?;
        let elapsed = start.elapsed();
        tracing::info!(elapsed_ms = elapsed.as_millis() as u64, "Render complete");

        Ok(RenderOutput {
            video_path: output.to_path_buf(),
            stdout: logs.renderer_stdout().await,
            stderr: format!(
                "{}\n{}",
                logs.renderer_stderr().await,
                logs.encoder_stderr().await
            ),
            elapsed,
        })
    }

    /// Wait for the encoder, checking cancellation, deadline, and renderer
    /// health every poll interval.
    async fn supervise(
        &self,
        renderer: &mut Child,
        encoder: &mut Child,
        start: Instant,
        probe: &dyn CancellationProbe,
        logs: &ProcessLogs,
    ) -> Result<ExitStatus, RenderError> {
        loop {
            tokio::select! {
                status = encoder.wait() => return Ok(status?),
                _ = tokio::time::sleep(self.settings.poll_interval) => {}
            }

            if probe.is_cancelled() {
                tracing::info!(elapsed_ms = start.elapsed().as_millis() as u64, "Render cancelled");
                return Err(RenderError::Aborted);
            }

            let elapsed = start.elapsed();
            if elapsed >= self.settings.timeout {
                return Err(RenderError::Timeout {
                    elapsed_secs: elapsed.as_secs(),
                });
            }

            if let Some(status) = renderer.try_wait()? {
                if !status.success() {
                    return Err(RenderError::Failed {
                        message: format!("renderer failed ({status})"),
                        stderr: logs.renderer_stderr().await,
                    });
                }
            }
        }
    }

    fn renderer_command(
        &self,
        request: &RenderRequest<'_>,
        size: VideoSize,
        log_path: &Path,
        frames: &Path,
        logs: &ProcessLogs,
    ) -> Result<Command, RenderError> {
        let gource = self.tools.resolve(Tool::Gource)?;
        let mut cmd = if self.tools.use_xvfb() {
            let mut cmd = self.tools.command(Tool::XvfbRun)?;
            cmd.arg("-a")
                .arg("-s")
                .arg(format!("-screen 0 {size}x24"))
                .arg(gource);
            cmd
        } else {
            Command::new(gource)
        };
        cmd.args(renderer_args(request, size, log_path, frames))
            .stdin(Stdio::null())
            .stdout(logs.renderer_stdout_file()?)
            .stderr(logs.renderer_stderr_file()?)
            .process_group(0)
            .kill_on_drop(true);
        Ok(cmd)
    }

    /// Encoder output goes to files: nothing drains a pipe during a long
    /// encode, and a full pipe buffer would stall ffmpeg.
    fn encoder_command(
        &self,
        frames: &Path,
        output: &Path,
        logs: &ProcessLogs,
    ) -> Result<Command, RenderError> {
        let mut cmd = self.tools.command(Tool::Ffmpeg)?;
        cmd.args(encoder_args(frames, output))
            .stdin(Stdio::null())
            .stdout(logs.encoder_stdout_file()?)
            .stderr(logs.encoder_stderr_file()?)
            .process_group(0)
            .kill_on_drop(true);
        Ok(cmd)
    }
}

/// SIGTERM to the child's process group, then SIGKILL if the group
/// outlives the grace period. xvfb-run leaves Xvfb and gource behind
/// when only the wrapper is signalled.
async fn terminate(child: &mut Child, name: &'static str) {
    if let Ok(Some(_)) = child.try_wait() {
        return;
    }
    let Some(pid) = child.id() else {
        return;
    };
    // Spawned with process_group(0): the leader's pid is the group id.
    let group = Pid::from_raw(pid as i32);
    if let Err(e) = killpg(group, Signal::SIGTERM) {
        tracing::debug!(process = name, error = %e, "SIGTERM failed");
    }
    if tokio::time::timeout(TERMINATE_GRACE, child.wait()).await.is_err() {
        tracing::warn!(process = name, "Process ignored SIGTERM, killing");
        if let Err(e) = killpg(group, Signal::SIGKILL) {
            tracing::debug!(process = name, error = %e, "SIGKILL failed");
        }
        if let Err(e) = child.kill().await {
            tracing::warn!(process = name, error = %e, "Failed to kill process");
        }
    } else {
        // Leader exited on SIGTERM; clear helpers that ignored it.
        let _ = killpg(group, Signal::SIGKILL);
    }
}

// ---------------------------------------------------------------------------
// Process log files
// ---------------------------------------------------------------------------

struct ProcessLogs {
    dir: PathBuf,
}

impl ProcessLogs {
    fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    fn file(&self, name: &str) -> std::io::Result<std::fs::File> {
        std::fs::File::create(self.dir.join(name))
    }

    fn renderer_stdout_file(&self) -> std::io::Result<std::fs::File> {
        self.file("gource.stdout")
    }

    fn renderer_stderr_file(&self) -> std::io::Result<std::fs::File> {
        self.file("gource.stderr")
    }

    fn encoder_stdout_file(&self) -> std::io::Result<std::fs::File> {
        self.file("ffmpeg.stdout")
    }

    fn encoder_stderr_file(&self) -> std::io::Result<std::fs::File> {
        self.file("ffmpeg.stderr")
    }

    async fn renderer_stdout(&self) -> String {
        read_tail(&self.dir.join("gource.stdout")).await
    }

    async fn renderer_stderr(&self) -> String {
        read_tail(&self.dir.join("gource.stderr")).await
    }

    async fn encoder_stderr(&self) -> String {
        read_tail(&self.dir.join("ffmpeg.stderr")).await
    }
}

/// The last [`MAX_LOG_BYTES`] of a log file, or an empty string.
async fn read_tail(path: &Path) -> String {
    let Ok(mut file) = tokio::fs::File::open(path).await else {
        return String::new();
    };
    let len = file.metadata().await.map(|m| m.len()).unwrap_or(0);
    if len > MAX_LOG_BYTES {
        if file
            .seek(std::io::SeekFrom::Start(len - MAX_LOG_BYTES))
            .await
            .is_err()
        {
            return String::new();
        }
    }
    let mut buf = Vec::new();
    let _ = file.read_to_end(&mut buf).await;
    String::from_utf8_lossy(&buf).into_owned()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
