//! Filesystem helpers shared by the render and post-processing steps.

use std::path::Path;

/// Move `from` to `to`, falling back to copy + remove when the two paths
/// live on different filesystems (scratch dirs are often on tmpfs).
pub async fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    if let Some(parent) = to.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    match tokio::fs::rename(from, to).await {
        Ok(()) => Ok(()),
        Err(e) if e.raw_os_error() == Some(nix::libc::EXDEV) => {
            tokio::fs::copy(from, to).await?;
            tokio::fs::remove_file(from).await
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn moves_into_new_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("a.mp4");
        tokio::fs::write(&src, b"video").await.unwrap();
        let dst = tmp.path().join("out/nested/b.mp4");

        move_file(&src, &dst).await.unwrap();

        assert!(!src.exists());
        assert_eq!(tokio::fs::read(&dst).await.unwrap(), b"video");
    }
}
