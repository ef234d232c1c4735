//! LinkIndex: the collection tree of symlinks into the raw directory.
//!
//! The index is built by walking the collection root once and is cached
//! until [`LinkIndex::invalidate`] is called. Building it also collects
//! garbage: links whose target is gone, or whose record is marked deleted,
//! are removed from disk.

use chrono::Local;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;

use crate::error::{LibraryError, Result};
use crate::meta_store::load_meta;
use crate::models::{FileKind, MetaRecord, PhotoFile};

/// One symlink found under the collection root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkInfo {
    pub dir: PathBuf,
    pub name: String,
    /// Absolute, symlink-free path of the original
    pub target: PathBuf,
    pub file: PhotoFile,
}

impl LinkInfo {
    pub fn path(&self) -> PathBuf {
        self.dir.join(&self.name)
    }
}

pub struct LinkIndex {
    root: PathBuf,
    cache: RwLock<HashMap<PathBuf, Arc<Vec<LinkInfo>>>>,
    cancel: CancellationToken,
}

impl LinkIndex {
    pub fn new(collection_root: impl Into<PathBuf>) -> Self {
        Self::with_cancellation(collection_root, CancellationToken::new())
    }

    /// A scan observes `cancel` between directory entries.
    pub fn with_cancellation(
        collection_root: impl Into<PathBuf>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            root: collection_root.into(),
            cache: RwLock::new(HashMap::new()),
            cancel,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Drops every cached scan.
    pub async fn invalidate(&self) {
        self.cache.write().await.clear();
        debug!("link index invalidated");
    }

    /// All links under the collection root.
    pub async fn all(&self) -> Result<Arc<Vec<LinkInfo>>> {
        self.scan(&self.root).await
    }

    /// Links under `dir`, scanning on first use.
    pub async fn scan(&self, dir: &Path) -> Result<Arc<Vec<LinkInfo>>> {
        if let Some(links) = self.cache.read().await.get(dir) {
            return Ok(links.clone());
        }

        let mut cache = self.cache.write().await;
        if let Some(links) = cache.get(dir) {
            return Ok(links.clone());
        }

        let links = Arc::new(self.build(dir).await?);
        cache.insert(dir.to_path_buf(), links.clone());
        Ok(links)
    }

    /// Collection paths of every link to `file`.
    pub async fn links_for(&self, file: &PhotoFile) -> Result<Vec<PathBuf>> {
        let path = file.path();
        let target = tokio::fs::canonicalize(&path)
            .await
            .map_err(|e| LibraryError::io(&path, e))?;

        Ok(self
            .all()
            .await?
            .iter()
            .filter(|l| l.target == target)
            .map(LinkInfo::path)
            .collect())
    }

    #[instrument(skip(self, dir), fields(dir = %dir.display()))]
    async fn build(&self, dir: &Path) -> Result<Vec<LinkInfo>> {
        let candidates = self.walk(dir).await?;

        let mut links = Vec::with_capacity(candidates.len());
        let mut removed = 0usize;
        for path in candidates {
            if self.cancel.is_cancelled() {
                return Err(LibraryError::Cancelled);
            }

            let target = match tokio::fs::canonicalize(&path).await {
                Ok(target) => target,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    debug!(link = %path.display(), "removing dangling link");
                    remove_link(&path).await?;
                    removed += 1;
                    continue;
                }
                Err(e) => return Err(LibraryError::io(&path, e)),
            };

            let file = match PhotoFile::from_path(&target) {
                Ok(file) => file,
                Err(_) => {
                    warn!(
                        link = %path.display(),
                        target = %target.display(),
                        "link target is not a catalog file"
                    );
                    continue;
                }
            };

            match load_meta(&file.meta_path()).await {
                Ok(record) if record.deleted => {
                    debug!(link = %path.display(), "removing link to deleted photo");
                    remove_link(&path).await?;
                    removed += 1;
                    continue;
                }
                Ok(_) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }

            let name = path.file_name().and_then(|n| n.to_str());
            let (Some(parent), Some(name)) = (path.parent(), name) else {
                continue;
            };
            links.push(LinkInfo {
                dir: parent.to_path_buf(),
                name: name.to_string(),
                target,
                file,
            });
        }

        info!(links = links.len(), removed, "link index built");
        Ok(links)
    }

    /// Symlinks with a photo or video extension under `dir`.
    async fn walk(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let dir = dir.to_path_buf();
        let cancel = self.cancel.clone();

        tokio::task::spawn_blocking(move || -> Result<Vec<PathBuf>> {
            let mut found = Vec::new();
            if !dir.exists() {
                return Ok(found);
            }

            for entry in WalkDir::new(&dir).follow_links(false) {
                if cancel.is_cancelled() {
                    return Err(LibraryError::Cancelled);
                }
                let entry = entry.map_err(|e| {
                    let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| dir.clone());
                    LibraryError::io(path, e.into())
                })?;
                if !entry.path_is_symlink() {
                    continue;
                }
                if FileKind::from_path(entry.path()).is_some() {
                    found.push(entry.into_path());
                }
            }
            Ok(found)
        })
        .await
        .map_err(|e| LibraryError::Link(format!("collection scan task failed: {}", e)))?
    }

    /// Creates the collection link for `file` unless it already has one or
    /// is deleted. Returns the new link.
    ///
    /// The cache is not updated; callers invalidate around batches of links.
    #[instrument(skip(self, file, record), fields(file = %file.name()))]
    pub async fn link(&self, file: &PhotoFile, record: &MetaRecord) -> Result<Option<PathBuf>> {
        if record.deleted || !self.links_for(file).await?.is_empty() {
            return Ok(None);
        }

        let original = file.path();
        let real = tokio::fs::canonicalize(&original)
            .await
            .map_err(|e| LibraryError::io(&original, e))?;

        let dest = nice_path(&self.root, file, record);
        let (Some(parent), Some(name)) = (dest.parent(), dest.file_name()) else {
            return Err(LibraryError::Link(format!("invalid link path {}", dest.display())));
        };
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| LibraryError::io(parent, e))?;
        let link_dir = tokio::fs::canonicalize(parent)
            .await
            .map_err(|e| LibraryError::io(parent, e))?;

        let relative = relative_path(&link_dir, &real).ok_or_else(|| {
            LibraryError::Link(format!(
                "refusing to make a non-relative symlink from {} to {}; \
                 keep the raw and collection directories on the same filesystem",
                link_dir.display(),
                real.display()
            ))
        })?;

        let link = link_dir.join(name);
        debug!(target = %relative.display(), link = %link.display(), "linking");
        symlink(&relative, &link).await?;
        Ok(Some(link))
    }
}

impl std::fmt::Debug for LinkIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkIndex")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

async fn remove_link(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(LibraryError::io(path, e)),
    }
}

#[cfg(unix)]
async fn symlink(target: &Path, link: &Path) -> Result<()> {
    tokio::fs::symlink(target, link)
        .await
        .map_err(|e| LibraryError::io(link, e))
}

#[cfg(windows)]
async fn symlink(target: &Path, link: &Path) -> Result<()> {
    tokio::fs::symlink_file(target, link)
        .await
        .map_err(|e| LibraryError::io(link, e))
}

/// `<root>/<YYYY>/<MM-DD Weekday>/misc/<YYYY-MM-DD-HH-MM>--<name>`, in local time.
pub fn nice_path(root: &Path, file: &PhotoFile, record: &MetaRecord) -> PathBuf {
    let created = record.created_time().with_timezone(&Local);
    root.join(created.format("%Y").to_string())
        .join(created.format("%m-%d %a").to_string())
        .join("misc")
        .join(format!("{}--{}", created.format("%Y-%m-%d-%H-%M"), file.name()))
}

/// Path of `to` relative to the directory `from`. Both must be absolute.
/// Returns `None` when they share no root.
pub fn relative_path(from: &Path, to: &Path) -> Option<PathBuf> {
    let from: Vec<Component> = from.components().collect();
    let to: Vec<Component> = to.components().collect();

    match (from.first(), to.first()) {
        (Some(a), Some(b)) if a == b => {}
        _ => return None,
    }

    let common = from.iter().zip(to.iter()).take_while(|(a, b)| a == b).count();

    let mut relative = PathBuf::new();
    for _ in common..from.len() {
        relative.push("..");
    }
    for component in &to[common..] {
        relative.push(component.as_os_str());
    }
    Some(relative)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_relative_path() {
        assert_eq!(
            relative_path(
                Path::new("/p/collection/2021/07-14 Wed/misc"),
                Path::new("/p/raw/a.NEF")
            ),
            Some(PathBuf::from("../../../../raw/a.NEF"))
        );
        assert_eq!(
            relative_path(Path::new("/p/raw"), Path::new("/p/raw/a.NEF")),
            Some(PathBuf::from("a.NEF"))
        );
        assert_eq!(relative_path(Path::new("rel"), Path::new("/abs")), None);
    }

    #[test]
    fn test_nice_path() {
        let local = Local.with_ymd_and_hms(2021, 7, 14, 10, 30, 0).unwrap();
        let record = MetaRecord {
            created: local.timestamp(),
            ..Default::default()
        };
        let file = PhotoFile::new("/raw", 10, "DSC_0042.NEF");

        assert_eq!(
            nice_path(Path::new("/col"), &file, &record),
            PathBuf::from("/col/2021/07-14 Wed/misc/2021-07-14-10-30--DSC_0042.NEF")
        );
    }
}
