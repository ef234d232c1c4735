//! Garbage collection of converted outputs and orphaned profiles.

use core_library::{MetaStore, PhotoFile};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument};
use walkdir::WalkDir;

use crate::error::{Result, SyncError};

/// Clears `conv` on records that are deleted or rated `min_rating` or lower
/// (a negative `min_rating` spares every non-deleted record),
/// then lists files nothing refers to anymore:
/// - outputs under `converted_root` not named by a surviving `conv` key;
/// - `.pp3` files under `collection_root` not named by a surviving profile
///   list.
///
/// Nothing is removed; see [`do_cleanup`].
#[instrument(skip(store, files, converted_root, collection_root))]
pub async fn cleanup(
    store: &MetaStore,
    files: &[PhotoFile],
    converted_root: &Path,
    collection_root: &Path,
    min_rating: i64,
) -> Result<Vec<PathBuf>> {
    let mut converted: HashSet<String> = HashSet::new();
    let mut profiles: HashSet<String> = HashSet::new();

    for file in files {
        let mut record = store.load(file).await?;
        if (record.deleted || i64::from(record.rating) <= min_rating) && !record.conv.is_empty() {
            debug!(file = %file.name(), outputs = record.conv.len(), "dropping conversions");
            record.conv.clear();
            store.save(file, &record).await?;
        }
        if record.deleted {
            continue;
        }
        converted.extend(record.conv.keys().cloned());
        profiles.extend(record.pp3.iter().cloned());
    }

    let mut unused = Vec::new();
    for (path, rel) in walk_files(converted_root).await? {
        if !converted.contains(&rel) {
            unused.push(path);
        }
    }
    for (path, rel) in walk_files(collection_root).await? {
        let is_profile = path
            .extension()
            .map(|e| e.eq_ignore_ascii_case("pp3"))
            .unwrap_or(false);
        if is_profile && !profiles.contains(&rel) {
            unused.push(path);
        }
    }

    info!(unused = unused.len(), "cleanup scan done");
    Ok(unused)
}

/// Removes `paths`, then prunes empty directories below both roots. The
/// roots themselves are kept.
#[instrument(skip_all, fields(paths = paths.len()))]
pub async fn do_cleanup(
    paths: &[PathBuf],
    converted_root: &Path,
    collection_root: &Path,
) -> Result<()> {
    for path in paths {
        tokio::fs::remove_file(path)
            .await
            .map_err(|e| SyncError::io(path, e))?;
    }

    let mut pruned = 0;
    for root in [converted_root, collection_root] {
        pruned += prune_empty_dirs(root).await?;
    }
    info!(removed = paths.len(), pruned, "cleanup done");
    Ok(())
}

/// Regular files below `root` with their `/`-joined path relative to it.
/// Symlinks are not followed and not listed.
async fn walk_files(root: &Path) -> Result<Vec<(PathBuf, String)>> {
    let root = root.to_path_buf();
    tokio::task::spawn_blocking(move || -> Result<Vec<(PathBuf, String)>> {
        let mut found = Vec::new();
        if !root.exists() {
            return Ok(found);
        }
        for entry in WalkDir::new(&root).follow_links(false) {
            let entry = entry.map_err(|e| {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.clone());
                SyncError::io(path, e.into())
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(rel) = entry.path().strip_prefix(&root) else {
                continue;
            };
            let rel = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            found.push((entry.into_path(), rel));
        }
        Ok(found)
    })
    .await
    .map_err(|e| SyncError::Worker(e.to_string()))?
}

/// Removes every directory below `root` that holds no files, deepest
/// first. Returns how many were removed.
async fn prune_empty_dirs(root: &Path) -> Result<usize> {
    let root = root.to_path_buf();
    tokio::task::spawn_blocking(move || -> Result<usize> {
        if !root.exists() {
            return Ok(0);
        }
        let mut removed = 0;
        let walker = WalkDir::new(&root)
            .follow_links(false)
            .min_depth(1)
            .contents_first(true);
        for entry in walker {
            let entry = entry.map_err(|e| {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.clone());
                SyncError::io(path, e.into())
            })?;
            if !entry.file_type().is_dir() {
                continue;
            }
            let mut children =
                std::fs::read_dir(entry.path()).map_err(|e| SyncError::io(entry.path(), e))?;
            if children.next().is_some() {
                continue;
            }
            std::fs::remove_dir(entry.path()).map_err(|e| SyncError::io(entry.path(), e))?;
            removed += 1;
        }
        Ok(removed)
    })
    .await
    .map_err(|e| SyncError::Worker(e.to_string()))?
}
