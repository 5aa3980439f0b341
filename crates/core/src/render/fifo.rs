//! Named-pipe frame channel between the renderer and the encoder.
//!
//! The renderer is pointed at [`FramePipe::writer_path`] and the encoder
//! at [`FramePipe::reader_path`]. On Unix both are the same FIFO node; the
//! split keeps the orchestrator independent of that detail.

use std::path::{Path, PathBuf};

use nix::sys::stat::Mode;
use nix::unistd::mkfifo;

/// A FIFO created inside a scratch directory. The node is removed along
/// with the directory.
#[derive(Debug)]
pub struct FramePipe {
    path: PathBuf,
}

impl FramePipe {
    /// Create the FIFO at `path` with owner-only permissions.
    pub fn create(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        mkfifo(&path, Mode::S_IRWXU).map_err(std::io::Error::from)?;
        Ok(Self { path })
    }

    pub fn writer_path(&self) -> &Path {
        &self.path
    }

    pub fn reader_path(&self) -> &Path {
        &self.path
    }
}
