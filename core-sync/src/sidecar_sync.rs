//! # Sidecar Sync
//!
//! Reconciles a photo's meta record with the `.pp3` profiles next to each of
//! its collection links.
//!
//! ## Authority
//!
//! Modification time decides which side wins:
//! - A profile strictly newer than the meta record is authoritative. Its
//!   rank, trash flag and keywords are copied into the record, and the
//!   record is then pushed back out to every profile that differs.
//! - Otherwise the record is authoritative and is pushed to every profile
//!   that differs from it. Ties go to the record.
//!
//! Among several newer profiles the latest wins; equal times fall back to
//! path order, so the choice does not depend on directory scan order.
//!
//! Every file written during one sync gets the same modification time, so
//! a second sync finds nothing newer than the record and writes nothing.

use bridge_traits::Clock;
use core_library::{pp3_path, LinkIndex, MetaRecord, MetaStore, PhotoFile, Pp3, Tags};
use filetime::FileTime;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, instrument};

use crate::error::{Result, SyncError};

pub struct SidecarSync {
    links: Arc<LinkIndex>,
    store: MetaStore,
    clock: Arc<dyn Clock>,
}

/// What a sync did to one photo.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncOutcome {
    /// Profile that overrode the record, if any
    pub pulled_from: Option<PathBuf>,
    /// Profiles rewritten from the record
    pub pushed_to: Vec<PathBuf>,
    /// Whether the tracked profile list changed
    pub pp3_list_changed: bool,
}

impl SyncOutcome {
    pub fn is_noop(&self) -> bool {
        self.pulled_from.is_none() && self.pushed_to.is_empty() && !self.pp3_list_changed
    }
}

impl SidecarSync {
    pub fn new(links: Arc<LinkIndex>, store: MetaStore, clock: Arc<dyn Clock>) -> Self {
        Self {
            links,
            store,
            clock,
        }
    }

    /// Reconciles `file`'s record with its profiles. Photos without links,
    /// and videos, are left alone.
    #[instrument(skip(self, file), fields(file = %file.name()))]
    pub async fn sync(&self, file: &PhotoFile) -> Result<SyncOutcome> {
        let mut outcome = SyncOutcome::default();
        if !file.supports_sidecars() {
            return Ok(outcome);
        }

        let links = self.links.links_for(file).await?;
        if links.is_empty() {
            return Ok(outcome);
        }

        // A record created here must not outrank existing profiles.
        let meta_path = file.meta_path();
        let meta_mtime = modified(&meta_path)
            .await?
            .unwrap_or_else(|| FileTime::from_unix_time(0, 0));
        let mut record = self.store.ensure(file).await?;

        let mut profiles = Vec::with_capacity(links.len());
        for link in &links {
            let path = pp3_path(link);
            let mtime = modified(&path).await?;
            profiles.push((mtime, path));
        }
        profiles.sort();

        let now = FileTime::from_system_time(SystemTime::from(self.clock.now()));
        let mut touched: Vec<PathBuf> = Vec::new();

        let authority = profiles
            .iter()
            .rev()
            .find(|(mtime, _)| matches!(mtime, Some(m) if *m > meta_mtime))
            .map(|(_, path)| path.clone());

        if let Some(source) = &authority {
            let pp3 = Pp3::load(source).await?;
            pull(&pp3, &mut record);
            self.store.save(file, &record).await?;
            debug!(
                profile = %source.display(),
                rating = record.rating,
                "record updated from profile"
            );

            touched.push(meta_path.clone());
            touched.push(source.clone());
            outcome.pulled_from = Some(source.clone());
        }

        // The authority is included: it may lack keys the record carries.
        for (mtime, path) in &profiles {
            if push(path, mtime.is_some(), &record).await? {
                if !touched.contains(path) {
                    touched.push(path.clone());
                }
                outcome.pushed_to.push(path.clone());
            }
        }

        let stamp = if touched.is_empty() {
            meta_mtime
        } else {
            if !touched.contains(&meta_path) {
                touched.push(meta_path.clone());
            }
            for path in &touched {
                set_mtime(path, now)?;
            }
            now
        };

        let tracked = self.tracked_profiles(&profiles)?;
        if tracked != record.pp3 {
            record.pp3 = tracked;
            self.store.save(file, &record).await?;
            set_mtime(&meta_path, stamp)?;
            outcome.pp3_list_changed = true;
        }

        if !outcome.is_noop() {
            debug!(
                pulled = outcome.pulled_from.is_some(),
                pushed = outcome.pushed_to.len(),
                "profiles reconciled"
            );
        }
        Ok(outcome)
    }

    /// Profile paths relative to the collection root, sorted.
    fn tracked_profiles(&self, profiles: &[(Option<FileTime>, PathBuf)]) -> Result<Vec<String>> {
        let root = self.links.root();
        let mut tracked = profiles
            .iter()
            .map(|(_, path)| {
                path.strip_prefix(root)
                    .map(|rel| rel.to_string_lossy().into_owned())
                    .map_err(|_| {
                        SyncError::Library(core_library::LibraryError::Link(format!(
                            "{} is outside the collection",
                            path.display()
                        )))
                    })
            })
            .collect::<Result<Vec<_>>>()?;
        tracked.sort();
        Ok(tracked)
    }
}

/// Copies the curation state of `pp3` into `record`.
fn pull(pp3: &Pp3, record: &mut MetaRecord) {
    if pp3.has("General", "Rank") {
        record.set_rating(pp3.rank());
    }
    if pp3.has("General", "InTrash") {
        record.deleted = pp3.trashed();
    }
    if let Some(keywords) = pp3.keywords() {
        record.tags = Tags(keywords).unique();
    }
}

/// Writes the record's curation state into the profile at `path`, creating
/// it from the stub when missing. Returns whether the file was written.
async fn push(path: &Path, exists: bool, record: &MetaRecord) -> Result<bool> {
    let before = if exists {
        Some(Pp3::load(path).await?)
    } else {
        None
    };

    let mut pp3 = before.clone().unwrap_or_else(|| Pp3::stub(path));
    pp3.set_rank(record.rating);
    pp3.set_trashed(record.deleted);
    pp3.set_keywords(&record.tags.unique().0);

    if before.as_ref() == Some(&pp3) {
        return Ok(false);
    }
    pp3.save().await?;
    Ok(true)
}

async fn modified(path: &Path) -> Result<Option<FileTime>> {
    match tokio::fs::metadata(path).await {
        Ok(meta) => Ok(Some(FileTime::from_last_modification_time(&meta))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(SyncError::io(path, e)),
    }
}

fn set_mtime(path: &Path, time: FileTime) -> Result<()> {
    filetime::set_file_times(path, time, time).map_err(|e| SyncError::io(path, e))
}
