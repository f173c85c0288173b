//! Filesystem operations
//!
//! Writes that other readers may observe go through a temporary sibling file
//! and a rename, so a reader never sees a partially written file.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

/// Sibling path used while `path` is being written
fn staging_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!(".{}.tmp", std::process::id()));
    path.with_file_name(name)
}

/// Write `content` to `path` atomically, creating parent directories
pub async fn write_atomic(path: &Path, content: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let staging = staging_path(path);
    if let Err(e) = tokio::fs::write(&staging, content).await {
        let _ = tokio::fs::remove_file(&staging).await;
        return Err(e);
    }
    tokio::fs::rename(&staging, path).await
}

/// Move `from` to `to`, falling back to copy-and-delete across filesystems
pub async fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    if let Some(parent) = to.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    if tokio::fs::rename(from, to).await.is_ok() {
        return Ok(());
    }
    let staging = staging_path(to);
    tokio::fs::copy(from, &staging).await?;
    tokio::fs::rename(&staging, to).await?;
    tokio::fs::remove_file(from).await
}

/// Remove a directory and all its contents; a missing directory is not an error
pub async fn remove_dir_all(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_dir_all(path).await {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// Total size in bytes and number of files under `path`
pub fn dir_stats(path: &Path) -> (u64, usize) {
    WalkDir::new(path)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .fold((0, 0), |(size, count), entry| {
            let len = entry.metadata().map(|m| m.len()).unwrap_or(0);
            (size + len, count + 1)
        })
}

/// Format a byte count for display
pub fn format_size(size_bytes: u64) -> String {
    #[allow(clippy::cast_precision_loss)]
    let size = size_bytes as f64;
    if size_bytes < 1024 {
        format!("{size_bytes} bytes")
    } else if size_bytes < 1024 * 1024 {
        format!("{:.1} KB", size / 1024.0)
    } else if size_bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", size / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", size / (1024.0 * 1024.0 * 1024.0))
    }
}
