use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::error::ArchiveError;

/// Write bytes to `path` via a sibling temp file and a rename.
///
/// The temp file lives in the same directory so the rename stays on one
/// filesystem. Readers see either the old or the new content, never a torn file.
pub async fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp_path = path.with_file_name(format!(".{file_name}.{}.tmp", std::process::id()));

    tokio::fs::write(&tmp_path, data).await?;
    if let Err(e) = tokio::fs::rename(&tmp_path, path).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(e);
    }
    Ok(())
}

/// Create `dir` (and parents) if it does not exist yet.
pub async fn ensure_dir(dir: &Path) -> Result<(), ArchiveError> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| ArchiveError::io(dir, e))
}

/// List the entries currently present in `dir`.
pub async fn snapshot_dir(dir: &Path) -> Result<BTreeSet<PathBuf>, ArchiveError> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| ArchiveError::io(dir, e))?;

    let mut paths = BTreeSet::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| ArchiveError::io(dir, e))?
    {
        paths.insert(entry.path());
    }
    Ok(paths)
}

/// Suffix gallery-dl gives a file while it is still being written. It stays
/// behind when a download dies halfway.
pub const PARTIAL_SUFFIX: &str = "part";

/// Whether `path` is an unfinished download.
#[must_use]
pub fn is_partial_download(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == PARTIAL_SUFFIX)
}

/// Completed entries present in `after` but not in `before`, sorted.
///
/// Unfinished downloads are left out; see [`new_partial_entries`].
#[must_use]
pub fn new_entries(before: &BTreeSet<PathBuf>, after: &BTreeSet<PathBuf>) -> Vec<PathBuf> {
    after
        .difference(before)
        .filter(|path| !is_partial_download(path))
        .cloned()
        .collect()
}

/// Unfinished downloads present in `after` but not in `before`, sorted.
#[must_use]
pub fn new_partial_entries(before: &BTreeSet<PathBuf>, after: &BTreeSet<PathBuf>) -> Vec<PathBuf> {
    after
        .difference(before)
        .filter(|path| is_partial_download(path))
        .cloned()
        .collect()
}
