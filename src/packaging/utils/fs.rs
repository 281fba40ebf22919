//! File system helpers for staging.
//!
//! Every helper creates missing parent directories and reports failures with
//! the offending path attached.

use crate::packaging::error::{ErrorExt, Result};
use std::path::Path;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use walkdir::WalkDir;

/// Executable permission bits for staged binaries and scripts.
pub const MODE_EXECUTABLE: u32 = 0o755;

/// Permission bits for ordinary staged files.
pub const MODE_REGULAR: u32 = 0o644;

/// Owner-only permission bits for secrets.
pub const MODE_SECRET: u32 = 0o600;

/// Creates the directory path, including parents.
pub async fn create_dir_all(path: &Path) -> Result<()> {
    fs::create_dir_all(path)
        .await
        .fs_context("creating directory", path)
}

/// Writes `contents` to `path` with the given Unix permission bits.
///
/// The file is created with `mode` from the start, so a secret is never
/// readable by others even briefly. On Windows the mode is ignored.
pub async fn write_file(path: &Path, contents: impl AsRef<[u8]>, mode: u32) -> Result<()> {
    if let Some(parent) = path.parent() {
        create_dir_all(parent).await?;
    }

    let mut options = fs::OpenOptions::new();
    options.create(true).write(true).truncate(true);
    #[cfg(unix)]
    options.mode(mode);
    #[cfg(not(unix))]
    let _ = mode;

    let mut file = options.open(path).await.fs_context("creating file", path)?;
    file.write_all(contents.as_ref())
        .await
        .fs_context("writing file", path)?;
    file.flush().await.fs_context("flushing file", path)?;
    drop(file);

    // An existing file keeps its old mode through `open`, so set it explicitly.
    set_mode(path, mode).await
}

/// Copies a file, creating the destination directory and applying `mode`.
pub async fn copy_file(from: &Path, to: &Path, mode: u32) -> Result<()> {
    if let Some(parent) = to.parent() {
        create_dir_all(parent).await?;
    }
    fs::copy(from, to).await.fs_context("copying file", from)?;
    set_mode(to, mode).await
}

/// Applies Unix permission bits. No-op elsewhere.
pub async fn set_mode(path: &Path, mode: u32) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
            .await
            .fs_context("setting permissions", path)?;
    }
    #[cfg(not(unix))]
    let _ = (path, mode);
    Ok(())
}

/// Total size in bytes and number of regular files under `dir`.
pub async fn tree_stats(dir: &Path) -> Result<(u64, u64)> {
    let dir = dir.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let mut bytes = 0u64;
        let mut files = 0u64;
        for entry in WalkDir::new(&dir) {
            let entry = entry?;
            if entry.file_type().is_file() {
                bytes += entry.metadata()?.len();
                files += 1;
            }
        }
        Ok((bytes, files))
    })
    .await
    .map_err(|e| crate::packaging::Error::GenericError(format!("Join error: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_file_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a/b/c.txt");
        write_file(&path, "hello", MODE_REGULAR).await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn write_file_applies_mode_to_existing_files() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secret.txt");
        std::fs::write(&path, "old").unwrap();
        write_file(&path, "new", MODE_SECRET).await.unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn tree_stats_counts_files() {
        let dir = tempfile::tempdir().unwrap();
        write_file(&dir.path().join("x"), "12345", MODE_REGULAR).await.unwrap();
        write_file(&dir.path().join("d/y"), "123", MODE_REGULAR).await.unwrap();
        assert_eq!(tree_stats(dir.path()).await.unwrap(), (8, 2));
    }
}
