//! Path-addressable blob storage.
//!
//! The renderer and encoder need real file paths, so every store must be
//! able to hand out [`BlobStore::path_of`] for a key. Keys are relative,
//! `/`-separated paths; see [`keys`] for the layout.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum BlobError {
    #[error("invalid blob key '{0}'")]
    InvalidKey(String),

    #[error("blob '{0}' not found")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Write `bytes` under `key`, replacing any existing blob. Returns the
    /// key for storing on a record.
    async fn save(&self, key: &str, bytes: &[u8]) -> Result<String, BlobError>;

    /// Move a finished file into the store under `key`.
    async fn save_file(&self, key: &str, source: &Path) -> Result<String, BlobError>;

    async fn read(&self, key: &str) -> Result<Vec<u8>, BlobError>;

    /// Remove a blob. Missing blobs are not an error.
    async fn delete(&self, key: &str) -> Result<(), BlobError>;

    /// Size in bytes.
    async fn size(&self, key: &str) -> Result<u64, BlobError>;

    /// Local filesystem path of a blob.
    fn path_of(&self, key: &str) -> Result<PathBuf, BlobError>;

    async fn read_to_string(&self, key: &str) -> Result<String, BlobError> {
        let bytes = self.read(key).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Copy one blob to another key.
    async fn copy(&self, from: &str, to: &str) -> Result<String, BlobError> {
        let bytes = self.read(from).await?;
        self.save(to, &bytes).await
    }
}

// ---------------------------------------------------------------------------
// Key layout
// ---------------------------------------------------------------------------

pub mod keys {
    use commitreel_core::types::DbId;

    pub fn project_log(project_id: DbId) -> String {
        format!("projects/{project_id}/gource.log")
    }

    pub fn build_log(build_id: DbId) -> String {
        format!("builds/{build_id}/gource.log")
    }

    pub fn build_captions(build_id: DbId) -> String {
        format!("builds/{build_id}/captions.txt")
    }

    pub fn build_video(build_id: DbId) -> String {
        format!("builds/{build_id}/video.mp4")
    }

    pub fn build_screenshot(build_id: DbId) -> String {
        format!("builds/{build_id}/screenshot.jpg")
    }

    pub fn build_thumbnail(build_id: DbId) -> String {
        format!("builds/{build_id}/thumb.jpg")
    }

    pub fn build_stdout(build_id: DbId) -> String {
        format!("builds/{build_id}/stdout.log")
    }

    pub fn build_stderr(build_id: DbId) -> String {
        format!("builds/{build_id}/stderr.log")
    }

    /// Snapshot of a project attachment, keeping the source file name.
    pub fn build_attachment(build_id: DbId, kind: &str, source_key: &str) -> String {
        let file_name = source_key.rsplit('/').next().unwrap_or(source_key);
        format!("builds/{build_id}/{kind}/{file_name}")
    }
}

// ---------------------------------------------------------------------------
// Local filesystem store
// ---------------------------------------------------------------------------

/// Blob store rooted at a local directory (`MEDIA_ROOT`).
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn prepare(&self, key: &str) -> Result<PathBuf, BlobError> {
        let path = self.path_of(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(path)
    }
}

/// Only plain relative components are accepted, so a key can never
/// escape the root.
fn validate_key(key: &str) -> Result<&Path, BlobError> {
    let path = Path::new(key);
    let valid = !key.is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    if valid {
        Ok(path)
    } else {
        Err(BlobError::InvalidKey(key.to_string()))
    }
}

fn not_found(key: &str, e: std::io::Error) -> BlobError {
    if e.kind() == std::io::ErrorKind::NotFound {
        BlobError::NotFound(key.to_string())
    } else {
        BlobError::Io(e)
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn save(&self, key: &str, bytes: &[u8]) -> Result<String, BlobError> {
        let path = self.prepare(key).await?;
        tokio::fs::write(&path, bytes).await?;
        Ok(key.to_string())
    }

    async fn save_file(&self, key: &str, source: &Path) -> Result<String, BlobError> {
        let path = self.prepare(key).await?;
        commitreel_core::files::move_file(source, &path).await?;
        Ok(key.to_string())
    }

    async fn read(&self, key: &str) -> Result<Vec<u8>, BlobError> {
        let path = self.path_of(key)?;
        tokio::fs::read(&path).await.map_err(|e| not_found(key, e))
    }

    async fn delete(&self, key: &str) -> Result<(), BlobError> {
        let path = self.path_of(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(BlobError::Io(e)),
        }
    }

    async fn size(&self, key: &str) -> Result<u64, BlobError> {
        let path = self.path_of(key)?;
        let meta = tokio::fs::metadata(&path).await.map_err(|e| not_found(key, e))?;
        Ok(meta.len())
    }

    fn path_of(&self, key: &str) -> Result<PathBuf, BlobError> {
        Ok(self.root.join(validate_key(key)?))
    }
}
