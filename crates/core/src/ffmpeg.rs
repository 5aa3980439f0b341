//! FFmpeg/FFprobe post-processing.
//!
//! Audio mixing and stripping, duration probing, still-frame extraction,
//! and image rescaling for finished videos. Every ffmpeg invocation works
//! inside its own scratch directory and moves the result out before the
//! directory is dropped.

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use serde::Deserialize;
use tempfile::TempDir;

use crate::executables::{Tool, ToolError, ToolPaths};
use crate::files::move_file;
use crate::process::{run_command, ProcessError};

/// Fade-out applied to looped background audio, in seconds.
pub const AUDIO_FADE_SECS: f64 = 2.0;

/// Default ffmpeg timeout (10 minutes).
pub const DEFAULT_FFMPEG_TIMEOUT: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, thiserror::Error)]
pub enum FfmpegError {
    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error("ffprobe/ffmpeg execution failed (exit code {exit_code:?}): {stderr}")]
    ExecutionFailed {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("failed to parse ffprobe output: {0}")]
    ParseError(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("file not found: {0}")]
    NotFound(String),

    #[error("audio file must be MP3 format: {0}")]
    UnsupportedAudio(String),

    #[error("invalid thumbnail offset: {0}")]
    InvalidOffset(String),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
}

// ---------------------------------------------------------------------------
// ffprobe JSON output structures
// ---------------------------------------------------------------------------

/// ffprobe output for `-print_format json -show_format -show_streams`.
#[derive(Debug, Deserialize)]
pub struct FfprobeOutput {
    #[serde(default)]
    pub streams: Vec<FfprobeStream>,
    pub format: FfprobeFormat,
}

#[derive(Debug, Deserialize)]
pub struct FfprobeStream {
    pub codec_type: Option<String>,
    pub duration: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct FfprobeFormat {
    pub duration: Option<String>,
}

/// Duration in seconds, from the container or else the first video stream.
pub fn parse_duration(probe: &FfprobeOutput) -> Option<f64> {
    let from_format = probe.format.duration.as_deref().and_then(|d| d.parse().ok());
    from_format.or_else(|| {
        probe
            .streams
            .iter()
            .find(|s| s.codec_type.as_deref() == Some("video"))
            .and_then(|s| s.duration.as_deref())
            .and_then(|d| d.parse().ok())
    })
}

// ---------------------------------------------------------------------------
// Thumbnail offsets
// ---------------------------------------------------------------------------

/// Where to grab a still frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FrameAt {
    /// Seconds from the start; negative counts back from the end.
    Seconds(f64),
    /// Position as 0-100% of the duration.
    Percent(f64),
}

/// Whole-second offset into a video of `duration` seconds.
pub fn resolve_offset(at: FrameAt, duration: f64) -> Result<u64, FfmpegError> {
    let secs = match at {
        FrameAt::Seconds(secs) => {
            if secs.abs() > duration {
                return Err(FfmpegError::InvalidOffset(format!(
                    "{secs} s exceeds video duration of {duration} s"
                )));
            }
            if secs < 0.0 {
                duration + secs
            } else {
                secs
            }
        }
        FrameAt::Percent(pct) => {
            if !(0.0..=100.0).contains(&pct) {
                return Err(FfmpegError::InvalidOffset(format!(
                    "percent must be between 0-100, got {pct}"
                )));
            }
            duration * pct / 100.0
        }
    };
    Ok(secs.max(0.0).floor() as u64)
}

// ---------------------------------------------------------------------------
// MediaTools
// ---------------------------------------------------------------------------

/// ffmpeg/ffprobe runner bound to a tool configuration.
#[derive(Clone)]
pub struct MediaTools {
    tools: Arc<ToolPaths>,
    timeout: Duration,
}

impl MediaTools {
    pub fn new(tools: Arc<ToolPaths>, timeout: Duration) -> Self {
        Self { tools, timeout }
    }

    /// Run `ffprobe` on a file and return the parsed JSON output.
    pub async fn probe(&self, path: &Path) -> Result<FfprobeOutput, FfmpegError> {
        ensure_exists(path)?;
        let mut cmd = self.tools.command(Tool::Ffprobe)?;
        cmd.args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(path);
        let output = run_command(&mut cmd, self.timeout).await?;
        if !output.success() {
            return Err(FfmpegError::ExecutionFailed {
                exit_code: output.exit_code,
                stderr: output.stderr,
            });
        }
        serde_json::from_str::<FfprobeOutput>(&output.stdout)
            .map_err(|e| FfmpegError::ParseError(format!("{e}: {}", output.stdout)))
    }

    /// Container duration in seconds.
    pub async fn get_duration(&self, path: &Path) -> Result<f64, FfmpegError> {
        let probe = self.probe(path).await?;
        parse_duration(&probe)
            .ok_or_else(|| FfmpegError::ParseError(format!("no duration for {}", path.display())))
    }

    /// Replace the audio track of `video` with `audio` (MP3 only), looped
    /// to cover the video when `loop_audio` is set, cut to the video's
    /// length, and faded out over [`AUDIO_FADE_SECS`].
    pub async fn mix_audio(
        &self,
        video: &Path,
        audio: &Path,
        loop_audio: bool,
        output: &Path,
    ) -> Result<PathBuf, FfmpegError> {
        ensure_exists(video)?;
        ensure_exists(audio)?;
        let is_mp3 = audio
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("mp3"));
        if !is_mp3 {
            return Err(FfmpegError::UnsupportedAudio(audio.display().to_string()));
        }

        let workdir = scratch_dir()?;
        let looped = workdir.path().join("output_1a.mp4");
        let faded = workdir.path().join("output_1b.mp4");

        let mut cmd = self.tools.command(Tool::Ffmpeg)?;
        cmd.arg("-i").arg(video);
        if loop_audio {
            cmd.args(["-stream_loop", "-1"]);
        }
        cmd.arg("-i")
            .arg(audio)
            .args(["-shortest", "-map", "0:v:0", "-map", "1:a:0", "-c:v", "copy", "-y"])
            .arg(&looped);
        self.run_ffmpeg(cmd).await?;

        let filter = format!(
            "aevalsrc=0:d={AUDIO_FADE_SECS:.1} [a_silence]; [0:a:0] [a_silence] acrossfade=d={AUDIO_FADE_SECS:.1} [a_out]"
        );
        let mut cmd = self.tools.command(Tool::Ffmpeg)?;
        cmd.arg("-i")
            .arg(&looped)
            .arg("-filter_complex")
            .arg(filter)
            .args(["-map", "0:v:0", "-map", "[a_out]", "-c:v", "copy", "-y"])
            .arg(&faded);
        self.run_ffmpeg(cmd).await?;

        move_file(&faded, output).await?;
        Ok(output.to_path_buf())
    }

    /// Remux `video` without any audio stream. The video stream is copied.
    pub async fn strip_audio(&self, video: &Path, output: &Path) -> Result<PathBuf, FfmpegError> {
        ensure_exists(video)?;
        let workdir = scratch_dir()?;
        let stripped = workdir.path().join("output_noaudio.mp4");

        let mut cmd = self.tools.command(Tool::Ffmpeg)?;
        cmd.arg("-i")
            .arg(video)
            .args(["-c:v", "copy", "-an", "-y"])
            .arg(&stripped);
        self.run_ffmpeg(cmd).await?;

        move_file(&stripped, output).await?;
        Ok(output.to_path_buf())
    }

    /// Extract one JPEG frame scaled to `width`, preserving aspect ratio.
    pub async fn get_thumbnail(
        &self,
        video: &Path,
        width: u32,
        at: FrameAt,
    ) -> Result<Vec<u8>, FfmpegError> {
        let duration = self.get_duration(video).await?;
        let secs = resolve_offset(at, duration)?;

        let workdir = scratch_dir()?;
        let thumb = workdir.path().join("thumb.jpg");
        let mut cmd = self.tools.command(Tool::Ffmpeg)?;
        cmd.arg("-i")
            .arg(video)
            .args(["-ss", &secs.to_string()])
            .args(["-vf", &format!("scale={width}:-1")])
            .args(["-vframes", "1", "-y"])
            .arg(&thumb);
        self.run_ffmpeg(cmd).await?;

        Ok(tokio::fs::read(&thumb).await?)
    }

    async fn run_ffmpeg(&self, mut cmd: tokio::process::Command) -> Result<(), FfmpegError> {
        let output = run_command(&mut cmd, self.timeout).await?;
        if !output.success() {
            return Err(FfmpegError::ExecutionFailed {
                exit_code: output.exit_code,
                stderr: output.stderr,
            });
        }
        Ok(())
    }
}

fn ensure_exists(path: &Path) -> Result<(), FfmpegError> {
    if path.is_file() {
        Ok(())
    } else {
        Err(FfmpegError::NotFound(path.display().to_string()))
    }
}

fn scratch_dir() -> Result<TempDir, FfmpegError> {
    Ok(tempfile::Builder::new().prefix("commitreel_").tempdir()?)
}

// ---------------------------------------------------------------------------
// Images
// ---------------------------------------------------------------------------

/// Target geometry for [`resize_image`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resize {
    /// Scale to this width, keeping the aspect ratio.
    Width(u32),
    /// Stretch to exactly this size.
    Exact(u32, u32),
}

/// Resize encoded image bytes, re-encoding in `format` (or the source
/// format when `None`).
pub fn resize_image(
    bytes: &[u8],
    resize: Resize,
    format: Option<ImageFormat>,
) -> Result<Vec<u8>, FfmpegError> {
    let format = match format {
        Some(format) => format,
        None => image::guess_format(bytes)?,
    };
    let img = image::load_from_memory(bytes)?;
    let (width, height) = match resize {
        Resize::Width(width) => {
            let height = (img.height() as f64 * width as f64 / img.width().max(1) as f64) as u32;
            (width.max(1), height.max(1))
        }
        Resize::Exact(width, height) => (width, height),
    };
    let resized = img.resize_exact(width, height, FilterType::Lanczos3);
    encode(resized, format)
}

/// Aspect-preserving JPEG rescale of an image file.
pub fn rescale_image(path: &Path, width: u32) -> Result<Vec<u8>, FfmpegError> {
    let bytes = std::fs::read(path)?;
    resize_image(&bytes, Resize::Width(width), Some(ImageFormat::Jpeg))
}

fn encode(img: DynamicImage, format: ImageFormat) -> Result<Vec<u8>, FfmpegError> {
    let img = if format == ImageFormat::Jpeg {
        DynamicImage::ImageRgb8(img.to_rgb8())
    } else {
        img
    };
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, format)?;
    Ok(buf.into_inner())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::os::unix::fs::PermissionsExt;

    use assert_matches::assert_matches;
    use image::{GenericImageView, RgbaImage};

    use super::*;

    fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write script");
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).expect("chmod");
        path
    }

    /// ffmpeg stand-in: logs its argv and writes the last argument.
    const FAKE_FFMPEG: &str = r#"
echo "$@" >> "$(dirname "$0")/ffmpeg.args"
for last; do :; done
printf 'frame' > "$last"
"#;

    const FAKE_FFPROBE: &str = r#"echo '{"streams":[],"format":{"duration":"42.5"}}'"#;

    fn media(dir: &Path) -> MediaTools {
        let tools = ToolPaths::new()
            .with_override(Tool::Ffmpeg, write_script(dir, "ffmpeg", FAKE_FFMPEG))
            .with_override(Tool::Ffprobe, write_script(dir, "ffprobe", FAKE_FFPROBE));
        MediaTools::new(Arc::new(tools), Duration::from_secs(10))
    }

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgba8(RgbaImage::new(width, height));
        encode(img, ImageFormat::Png).unwrap()
    }

    #[test]
    fn offsets_from_seconds() {
        assert_eq!(resolve_offset(FrameAt::Seconds(3.7), 10.0).unwrap(), 3);
        assert_eq!(resolve_offset(FrameAt::Seconds(-1.0), 10.5).unwrap(), 9);
        assert_matches!(
            resolve_offset(FrameAt::Seconds(-11.0), 10.0),
            Err(FfmpegError::InvalidOffset(_))
        );
        assert_matches!(
            resolve_offset(FrameAt::Seconds(20.0), 10.0),
            Err(FfmpegError::InvalidOffset(_))
        );
    }

    #[test]
    fn offsets_from_percent() {
        assert_eq!(resolve_offset(FrameAt::Percent(0.0), 80.0).unwrap(), 0);
        assert_eq!(resolve_offset(FrameAt::Percent(50.0), 80.0).unwrap(), 40);
        assert_eq!(resolve_offset(FrameAt::Percent(100.0), 80.0).unwrap(), 80);
        assert_matches!(
            resolve_offset(FrameAt::Percent(101.0), 80.0),
            Err(FfmpegError::InvalidOffset(_))
        );
    }

    #[test]
    fn duration_falls_back_to_video_stream() {
        let probe: FfprobeOutput = serde_json::from_str(
            r#"{"streams":[{"codec_type":"audio","duration":"9.0"},{"codec_type":"video","duration":"12.0"}],"format":{}}"#,
        )
        .unwrap();
        assert_eq!(parse_duration(&probe), Some(12.0));
    }

    #[test]
    fn resize_by_width_keeps_aspect() {
        let out = resize_image(&png_bytes(400, 200), Resize::Width(100), None).unwrap();
        let img = image::load_from_memory(&out).unwrap();
        assert_eq!(img.dimensions(), (100, 50));
        assert_eq!(image::guess_format(&out).unwrap(), ImageFormat::Png);
    }

    #[test]
    fn resize_exact_and_jpeg_reencode() {
        let out = resize_image(&png_bytes(10, 10), Resize::Exact(64, 36), Some(ImageFormat::Jpeg))
            .unwrap();
        assert_eq!(image::guess_format(&out).unwrap(), ImageFormat::Jpeg);
        assert_eq!(image::load_from_memory(&out).unwrap().dimensions(), (64, 36));
    }

    #[tokio::test]
    async fn mix_audio_rejects_non_mp3() {
        let tmp = tempfile::tempdir().unwrap();
        let video = tmp.path().join("v.mp4");
        let audio = tmp.path().join("a.wav");
        std::fs::write(&video, b"v").unwrap();
        std::fs::write(&audio, b"a").unwrap();
        assert_matches!(
            media(tmp.path()).mix_audio(&video, &audio, true, &tmp.path().join("o.mp4")).await,
            Err(FfmpegError::UnsupportedAudio(_))
        );
    }

    #[tokio::test]
    async fn mix_audio_loops_and_fades() {
        let tmp = tempfile::tempdir().unwrap();
        let video = tmp.path().join("v.mp4");
        let audio = tmp.path().join("a.MP3");
        std::fs::write(&video, b"v").unwrap();
        std::fs::write(&audio, b"a").unwrap();
        let output = tmp.path().join("final/video.mp4");

        let result = media(tmp.path())
            .mix_audio(&video, &audio, true, &output)
            .await
            .expect("mix");

        assert_eq!(result, output);
        assert!(output.is_file());
        let args = std::fs::read_to_string(tmp.path().join("ffmpeg.args")).unwrap();
        let calls: Vec<&str> = args.lines().collect();
        assert_eq!(calls.len(), 2);
        assert!(calls[0].contains("-stream_loop -1"));
        assert!(calls[0].contains("-shortest"));
        assert!(calls[1].contains("acrossfade=d=2.0"));
    }

    #[tokio::test]
    async fn strip_audio_copies_video_stream() {
        let tmp = tempfile::tempdir().unwrap();
        let video = tmp.path().join("v.mp4");
        std::fs::write(&video, b"v").unwrap();
        let output = tmp.path().join("out.mp4");

        media(tmp.path()).strip_audio(&video, &output).await.expect("strip");

        let args = std::fs::read_to_string(tmp.path().join("ffmpeg.args")).unwrap();
        assert!(args.contains("-c:v copy -an"));
        assert!(output.is_file());
    }

    #[tokio::test]
    async fn thumbnail_seeks_relative_to_end() {
        let tmp = tempfile::tempdir().unwrap();
        let video = tmp.path().join("v.mp4");
        std::fs::write(&video, b"v").unwrap();

        let bytes = media(tmp.path())
            .get_thumbnail(&video, 1280, FrameAt::Seconds(-1.0))
            .await
            .expect("thumbnail");

        assert_eq!(bytes, b"frame");
        let args = std::fs::read_to_string(tmp.path().join("ffmpeg.args")).unwrap();
        assert!(args.contains("-ss 41"));
        assert!(args.contains("scale=1280:-1"));
    }

    #[tokio::test]
    async fn ffmpeg_failure_carries_stderr() {
        let tmp = tempfile::tempdir().unwrap();
        let tools = ToolPaths::new().with_override(
            Tool::Ffmpeg,
            write_script(tmp.path(), "ffmpeg", "echo 'Invalid data' >&2; exit 1"),
        );
        let media = MediaTools::new(Arc::new(tools), Duration::from_secs(10));
        let video = tmp.path().join("v.mp4");
        std::fs::write(&video, b"v").unwrap();
        assert_matches!(
            media.strip_audio(&video, &tmp.path().join("o.mp4")).await,
            Err(FfmpegError::ExecutionFailed { exit_code: Some(1), .. })
        );
    }
}
