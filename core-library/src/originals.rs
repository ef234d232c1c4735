//! Enumeration of the raw directory.

use std::path::Path;
use tracing::debug;

use crate::error::{LibraryError, Result};
use crate::models::{FileKind, PhotoFile};

/// Every original in `raw_dir`, sorted by name without the size prefix.
///
/// The raw directory is flat. Meta records, temp files and names that do
/// not follow the `<size>-<name>` scheme are skipped.
pub async fn list_originals(raw_dir: &Path) -> Result<Vec<PhotoFile>> {
    let mut entries = tokio::fs::read_dir(raw_dir)
        .await
        .map_err(|e| LibraryError::io(raw_dir, e))?;

    let mut files = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| LibraryError::io(raw_dir, e))?
    {
        let path = entry.path();
        if FileKind::from_path(&path).is_none() {
            continue;
        }
        match PhotoFile::from_path(&path) {
            Ok(file) => files.push(file),
            Err(_) => debug!(path = %path.display(), "skipping unrecognized file"),
        }
    }

    files.sort_by(|a, b| a.name().cmp(b.name()));
    Ok(files)
}
