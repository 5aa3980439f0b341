//! External tool resolution.
//!
//! [`ToolPaths`] is built once at startup and shared (behind an `Arc`) by
//! every component that spawns git, gource, ffmpeg, ffprobe, or xvfb-run.
//! Configured overrides win unconditionally; everything else is looked up
//! on `PATH`. Version queries are memoized per instance.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};
use std::time::Duration;

use regex::Regex;
use serde::Serialize;
use tokio::process::Command;

use crate::process::{run_command, ProcessError};

const VERSION_TIMEOUT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// Tools
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tool {
    Git,
    Gource,
    Ffmpeg,
    Ffprobe,
    XvfbRun,
}

impl Tool {
    pub const ALL: [Tool; 5] = [
        Self::Git,
        Self::Gource,
        Self::Ffmpeg,
        Self::Ffprobe,
        Self::XvfbRun,
    ];

    /// Command name searched on `PATH`.
    pub fn command_name(self) -> &'static str {
        match self {
            Self::Git => "git",
            Self::Gource => "gource",
            Self::Ffmpeg => "ffmpeg",
            Self::Ffprobe => "ffprobe",
            Self::XvfbRun => "xvfb-run",
        }
    }

    /// Environment variable holding an override path.
    pub fn env_var(self) -> &'static str {
        match self {
            Self::Git => "GIT_PATH",
            Self::Gource => "GOURCE_PATH",
            Self::Ffmpeg => "FFMPEG_PATH",
            Self::Ffprobe => "FFPROBE_PATH",
            Self::XvfbRun => "XVFB_RUN_PATH",
        }
    }

    fn version_args(self) -> Option<&'static [&'static str]> {
        match self {
            Self::Git => Some(&["--version"]),
            Self::Gource => Some(&["--help"]),
            Self::Ffmpeg | Self::Ffprobe => Some(&["-version"]),
            Self::XvfbRun => None,
        }
    }

    fn version_regex(self) -> Option<&'static Regex> {
        static GIT: OnceLock<Regex> = OnceLock::new();
        static GOURCE: OnceLock<Regex> = OnceLock::new();
        static FFMPEG: OnceLock<Regex> = OnceLock::new();
        static FFPROBE: OnceLock<Regex> = OnceLock::new();

        let (cell, pattern) = match self {
            Self::Git => (&GIT, r"git version (\d+(?:\.\d+)*)"),
            Self::Gource => (&GOURCE, r"Gource v(\d+(?:\.\d+)*)"),
            Self::Ffmpeg => (&FFMPEG, r"ffmpeg version n?(\d+(?:\.\d+)*)"),
            Self::Ffprobe => (&FFPROBE, r"ffprobe version n?(\d+(?:\.\d+)*)"),
            Self::XvfbRun => return None,
        };
        Some(cell.get_or_init(|| Regex::new(pattern).expect("valid version regex")))
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.command_name())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("executable path for '{0}' not found")]
    NotFound(Tool),

    #[error("{0} does not report a version")]
    NoVersion(Tool),

    #[error("could not parse {tool} version from output: {output}")]
    VersionParse { tool: Tool, output: String },

    #[error(transparent)]
    Process(#[from] ProcessError),
}

/// A parsed tool version, e.g. `2.43.0` -> `[2, 43, 0]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolVersion {
    pub raw: String,
    pub parts: Vec<u32>,
}

impl ToolVersion {
    pub fn parse(tool: Tool, output: &str) -> Result<Self, ToolError> {
        let regex = tool.version_regex().ok_or(ToolError::NoVersion(tool))?;
        let raw = regex
            .captures(output)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| ToolError::VersionParse {
                tool,
                output: output.lines().next().unwrap_or_default().to_string(),
            })?;
        let parts = raw.split('.').filter_map(|p| p.parse().ok()).collect();
        Ok(Self { raw, parts })
    }
}

// ---------------------------------------------------------------------------
// ToolPaths
// ---------------------------------------------------------------------------

/// Resolved tool locations plus the headless-rendering toggle.
#[derive(Debug, Default)]
pub struct ToolPaths {
    overrides: HashMap<Tool, PathBuf>,
    use_xvfb: bool,
    versions: Mutex<HashMap<Tool, ToolVersion>>,
}

impl ToolPaths {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load overrides from environment variables.
    ///
    /// | Env Var          | Default           |
    /// |------------------|-------------------|
    /// | `GIT_PATH`       | `git` on `PATH`   |
    /// | `GOURCE_PATH`    | `gource` on `PATH`|
    /// | `FFMPEG_PATH`    | `ffmpeg` on `PATH`|
    /// | `FFPROBE_PATH`   | `ffprobe` on `PATH`|
    /// | `XVFB_RUN_PATH`  | `xvfb-run` on `PATH`|
    /// | `USE_XVFB`       | `false`           |
    pub fn from_env() -> Self {
        let mut paths = Self::new();
        for tool in Tool::ALL {
            if let Some(path) = std::env::var_os(tool.env_var()).filter(|v| !v.is_empty()) {
                paths.overrides.insert(tool, PathBuf::from(path));
            }
        }
        paths.use_xvfb = std::env::var("USE_XVFB")
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
            .unwrap_or(false);
        paths
    }

    pub fn with_override(mut self, tool: Tool, path: impl Into<PathBuf>) -> Self {
        self.overrides.insert(tool, path.into());
        self
    }

    pub fn with_xvfb(mut self, use_xvfb: bool) -> Self {
        self.use_xvfb = use_xvfb;
        self
    }

    /// Wrap the renderer in `xvfb-run` for headless hosts.
    pub fn use_xvfb(&self) -> bool {
        self.use_xvfb
    }

    /// Path for `tool`. Overrides are returned as-is without checking that
    /// they exist.
    pub fn resolve(&self, tool: Tool) -> Result<PathBuf, ToolError> {
        if let Some(path) = self.overrides.get(&tool) {
            return Ok(path.clone());
        }
        which::which(tool.command_name()).map_err(|_| ToolError::NotFound(tool))
    }

    /// A fresh [`Command`] for `tool`.
    pub fn command(&self, tool: Tool) -> Result<Command, ToolError> {
        Ok(Command::new(self.resolve(tool)?))
    }

    /// Query and parse the tool's version, once per instance.
    pub async fn version(&self, tool: Tool) -> Result<ToolVersion, ToolError> {
        if let Some(cached) = self.cached_version(tool) {
            return Ok(cached);
        }
        let args = tool.version_args().ok_or(ToolError::NoVersion(tool))?;
        let mut cmd = self.command(tool)?;
        cmd.args(args);
        let output = run_command(&mut cmd, VERSION_TIMEOUT).await?;
        // gource prints its banner on stdout; some builds use stderr.
        let text = format!("{}\n{}", output.stdout, output.stderr);
        let version = ToolVersion::parse(tool, &text)?;

        tracing::debug!(tool = %tool, version = %version.raw, "Resolved tool version");
        self.versions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(tool, version.clone());
        Ok(version)
    }

    fn cached_version(&self, tool: Tool) -> Option<ToolVersion> {
        self.versions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&tool)
            .cloned()
    }
}
