//! Build pipeline domain logic.
//!
//! Everything here is free of database access: commit-log parsing and
//! analysis, duration estimation, render options, captions, avatar
//! precedence, the build status machine, and the wrappers around the
//! external tools (git, gource, ffmpeg/ffprobe, xvfb-run).

pub mod avatars;
pub mod build_status;
pub mod captions;
pub mod error;
pub mod estimation;
pub mod executables;
pub mod ffmpeg;
pub mod files;
pub mod gource_log;
pub mod process;
pub mod render;
pub mod render_options;
pub mod types;
pub mod vcs;
