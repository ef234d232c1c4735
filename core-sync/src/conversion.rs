//! # Conversion Cache
//!
//! Decides which JPEG outputs of a photo are out of date and regenerates
//! them.
//!
//! ## Cache keys
//!
//! Every link with an edited sidecar yields one output per requested size at
//! `<converted>/<link dir>/<size>/<link stem>.jpg`. The path relative to the
//! converted root keys an entry in the record's `conv` map, holding the
//! digest of the size and the sidecar's edit parameters. An output is reused
//! only when its key is present, the digest matches and the file exists.
//!
//! Keys that the current links and sizes no longer produce are stale: the
//! next [`ConversionCache::apply`] deletes their files and entries.
//!
//! ## Failure
//!
//! The converter writes to a temp file that is renamed over the output once
//! conversion and EXIF correction both succeed. The entry for an output is
//! only replaced after that rename, so a failure leaves the previous output
//! and its entry as they were.
//!
//! ## Finished outputs
//!
//! [`ConversionCache::fixup_timezones`] and [`ConversionCache::apply_location`]
//! rerun the EXIF correction on outputs that already exist, without
//! converting again. Previews are developed from a stub profile next to the
//! original and are not part of the cache.

use bridge_traits::{BridgeError, ConversionJob, Converter, ExifRewriter, Recipe};
use chrono::{DateTime, Utc};
use core_library::{Converted, LinkIndex, MetaRecord, MetaStore, PhotoFile, Pp3, Sidecar};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::error::{Result, SyncError};

/// Longest edge of generated previews.
pub const PREVIEW_SIZE: u32 = 1920;

/// `<original>.preview`
pub fn preview_path(file: &PhotoFile) -> PathBuf {
    with_suffix(&file.path(), ".preview")
}

pub struct ConversionCache {
    links: Arc<LinkIndex>,
    store: MetaStore,
    converter: Arc<dyn Converter>,
    exif: Arc<dyn ExifRewriter>,
    converted_root: PathBuf,
}

/// One output that has to be (re)generated.
#[derive(Debug, Clone)]
struct Pending {
    key: String,
    link: PathBuf,
    sidecar: Sidecar,
    size: u32,
    hash: String,
}

/// Cache decisions for one photo.
#[derive(Debug, Default)]
struct Plan {
    pending: Vec<Pending>,
    stale: Vec<String>,
}

impl Plan {
    fn is_empty(&self) -> bool {
        self.pending.is_empty() && self.stale.is_empty()
    }
}

impl ConversionCache {
    pub fn new(
        links: Arc<LinkIndex>,
        store: MetaStore,
        converter: Arc<dyn Converter>,
        exif: Arc<dyn ExifRewriter>,
        converted_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            links,
            store,
            converter,
            exif,
            converted_root: converted_root.into(),
        }
    }

    pub fn converted_root(&self) -> &Path {
        &self.converted_root
    }

    /// Whether [`apply`](Self::apply) would convert or prune anything.
    /// Touches nothing on disk.
    pub async fn check_needed(&self, file: &PhotoFile, sizes: &[u32]) -> Result<bool> {
        let sizes = normalize_sizes(sizes)?;
        if !file.supports_sidecars() {
            return Ok(false);
        }
        let record = match self.store.load(file).await {
            Ok(record) => record,
            Err(e) if e.is_not_found() => MetaRecord::default(),
            Err(e) => return Err(e.into()),
        };
        let plan = self.plan(file, &record, &sizes).await?;
        Ok(!plan.is_empty())
    }

    /// Regenerates out-of-date outputs of `file` and prunes stale ones.
    /// Returns whether the record changed.
    #[instrument(skip(self, file, sizes), fields(file = %file.name()))]
    pub async fn apply(&self, file: &PhotoFile, sizes: &[u32]) -> Result<bool> {
        let sizes = normalize_sizes(sizes)?;
        if !file.supports_sidecars() {
            return Ok(false);
        }
        let mut record = self.store.ensure(file).await?;
        let plan = self.plan(file, &record, &sizes).await?;
        if plan.is_empty() {
            return Ok(false);
        }

        for key in &plan.stale {
            let output = self.converted_root.join(key);
            debug!(output = %output.display(), "removing stale output");
            remove_if_exists(&output).await?;
            record.conv.remove(key);
        }

        for pending in &plan.pending {
            if let Err(e) = self.convert(file, &record, pending).await {
                // Outputs finished so far stay recorded.
                if let Err(save_err) = self.store.save(file, &record).await {
                    warn!(error = %save_err, "could not record finished outputs");
                }
                return Err(e);
            }
            record.conv.insert(
                pending.key.clone(),
                Converted {
                    hash: pending.hash.clone(),
                    size: pending.size,
                },
            );
        }

        self.store.save(file, &record).await?;
        info!(
            converted = plan.pending.len(),
            pruned = plan.stale.len(),
            "conversion cache updated"
        );
        Ok(true)
    }

    /// Reruns the timezone correction on every recorded output present on
    /// disk. Returns how many were rewritten.
    #[instrument(skip(self, file, record), fields(file = %file.name()))]
    pub async fn fixup_timezones(&self, file: &PhotoFile, record: &MetaRecord) -> Result<usize> {
        let created = record.created_time();
        let mut rewritten = 0;
        for output in self.existing_outputs(record).await? {
            self.exif
                .rewrite_timezone(&output, created)
                .await
                .map_err(|source| SyncError::Conversion {
                    path: output.clone(),
                    source,
                })?;
            rewritten += 1;
        }
        debug!(rewritten, "timezones fixed");
        Ok(rewritten)
    }

    /// Stamps the record's location into every recorded output present on
    /// disk. Returns how many were rewritten.
    #[instrument(skip(self, file, record), fields(file = %file.name()))]
    pub async fn apply_location(&self, file: &PhotoFile, record: &MetaRecord) -> Result<usize> {
        let Some((lat, lng)) = record.lat_lng() else {
            return Ok(0);
        };
        let created = record.created_time();
        let mut rewritten = 0;
        for output in self.existing_outputs(record).await? {
            self.exif
                .rewrite_gps(&output, created, lat, lng)
                .await
                .map_err(|source| SyncError::Conversion {
                    path: output.clone(),
                    source,
                })?;
            rewritten += 1;
        }
        debug!(rewritten, "locations stamped");
        Ok(rewritten)
    }

    async fn existing_outputs(&self, record: &MetaRecord) -> Result<Vec<PathBuf>> {
        let mut outputs = Vec::with_capacity(record.conv.len());
        for key in record.conv.keys() {
            let output = self.converted_root.join(key);
            if exists(&output).await? {
                outputs.push(output);
            } else {
                debug!(output = %output.display(), "recorded output missing");
            }
        }
        Ok(outputs)
    }

    pub async fn has_preview(&self, file: &PhotoFile) -> Result<bool> {
        exists(&preview_path(file)).await
    }

    /// Develops `file` with a stub profile into [`preview_path`].
    #[instrument(skip(self, file), fields(file = %file.name()))]
    pub async fn make_preview(&self, file: &PhotoFile) -> Result<()> {
        if !file.supports_sidecars() {
            return Err(SyncError::PreviewNotPossible(file.name().to_string()));
        }

        let output = preview_path(file);
        let tmp_jpg = with_suffix(&output, ".tmp.jpg");
        let tmp_profile = with_suffix(&output, ".tmp.pp3");

        let mut profile = Pp3::stub(&tmp_profile);
        profile.resize_longest(PREVIEW_SIZE);
        profile.save().await?;

        let job = ConversionJob {
            input: file.path(),
            output: tmp_jpg.clone(),
            recipe: Recipe::Pp3 {
                profile: tmp_profile.clone(),
            },
            size: PREVIEW_SIZE,
            created: DateTime::<Utc>::default(),
            lat_lng: None,
        };

        let result = async {
            self.converter.convert(&job).await?;
            tokio::fs::rename(&tmp_jpg, &output).await?;
            Ok::<_, BridgeError>(())
        }
        .await;

        let _ = tokio::fs::remove_file(&tmp_profile).await;
        if let Err(source) = result {
            let _ = tokio::fs::remove_file(&tmp_jpg).await;
            return Err(SyncError::Conversion {
                path: output,
                source,
            });
        }
        debug!(preview = %output.display(), "preview written");
        Ok(())
    }

    async fn plan(&self, file: &PhotoFile, record: &MetaRecord, sizes: &[u32]) -> Result<Plan> {
        let mut plan = Plan::default();
        let mut current = BTreeSet::new();

        for link in self.links.links_for(file).await? {
            let Some(sidecar) = Sidecar::for_conversion(&link).await? else {
                continue;
            };

            for &size in sizes {
                let key = self.output_key(&link, size)?;
                let hash = digest(size, &sidecar);
                current.insert(key.clone());

                let cached = record.conv.get(&key).map(|c| c.hash == hash).unwrap_or(false);
                if cached && exists(&self.converted_root.join(&key)).await? {
                    continue;
                }

                plan.pending.push(Pending {
                    key,
                    link: link.clone(),
                    sidecar: sidecar.clone(),
                    size,
                    hash,
                });
            }
        }

        plan.stale = record
            .conv
            .keys()
            .filter(|key| !current.contains(*key))
            .cloned()
            .collect();
        Ok(plan)
    }

    /// `<link dir>/<size>/<link stem>.jpg`, relative to the converted root.
    fn output_key(&self, link: &Path, size: u32) -> Result<String> {
        let rel = link.strip_prefix(self.links.root()).map_err(|_| {
            SyncError::Library(core_library::LibraryError::Link(format!(
                "{} is outside the collection",
                link.display()
            )))
        })?;
        let stem = rel
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| {
                SyncError::Library(core_library::LibraryError::Link(format!(
                    "link {} has no usable name",
                    link.display()
                )))
            })?;

        let mut parts: Vec<String> = rel
            .parent()
            .map(|dir| {
                dir.components()
                    .filter_map(|c| match c {
                        Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default();
        parts.push(size.to_string());
        parts.push(format!("{}.jpg", stem));
        Ok(parts.join("/"))
    }

    async fn convert(&self, file: &PhotoFile, record: &MetaRecord, pending: &Pending) -> Result<()> {
        let output = self.converted_root.join(&pending.key);
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| SyncError::io(parent, e))?;
        }

        let tmp_jpg = with_suffix(&output, ".tmp.jpg");
        let tmp_profile = with_suffix(&output, ".tmp.pp3");

        let recipe = match &pending.sidecar {
            Sidecar::Pp3(pp3) => {
                let mut pp3 = pp3.clone();
                pp3.resize_longest(pending.size);
                pp3.save_to(&tmp_profile).await?;
                Recipe::Pp3 {
                    profile: tmp_profile.clone(),
                }
            }
            Sidecar::Script(script) => Recipe::Script {
                script: script.path().to_path_buf(),
            },
        };

        let created = record.created_time();
        let job = ConversionJob {
            input: pending.link.clone(),
            output: tmp_jpg.clone(),
            recipe,
            size: pending.size,
            created,
            lat_lng: record.lat_lng(),
        };

        debug!(output = %output.display(), size = pending.size, "converting");
        let result = async {
            self.converter.convert(&job).await?;
            self.exif.rewrite_timezone(&tmp_jpg, created).await?;
            if let Some((lat, lng)) = job.lat_lng {
                self.exif.rewrite_gps(&tmp_jpg, created, lat, lng).await?;
            }
            tokio::fs::rename(&tmp_jpg, &output).await?;
            Ok::<_, BridgeError>(())
        }
        .await;

        let _ = tokio::fs::remove_file(&tmp_profile).await;
        if let Err(source) = result {
            let _ = tokio::fs::remove_file(&tmp_jpg).await;
            warn!(
                file = %file.name(),
                output = %output.display(),
                error = %source,
                "conversion failed"
            );
            return Err(SyncError::Conversion {
                path: output,
                source,
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for ConversionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversionCache")
            .field("converted_root", &self.converted_root)
            .finish_non_exhaustive()
    }
}

/// Hex sha256 of the size and the sidecar's edit parameters.
pub fn digest(size: u32, sidecar: &Sidecar) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{}\n", size).as_bytes());
    sidecar.feed_hash(&mut hasher);
    hex::encode(hasher.finalize())
}

/// Deduplicated, sorted, non-empty size list.
fn normalize_sizes(sizes: &[u32]) -> Result<Vec<u32>> {
    let sizes: Vec<u32> = sizes
        .iter()
        .copied()
        .filter(|&s| s > 0)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    if sizes.is_empty() {
        return Err(SyncError::NoSizes);
    }
    Ok(sizes)
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

async fn exists(path: &Path) -> Result<bool> {
    match tokio::fs::metadata(path).await {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(SyncError::io(path, e)),
    }
}

async fn remove_if_exists(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(SyncError::io(path, e)),
    }
}

/// Output keys of `record` restricted to `sizes`, for callers that act on
/// finished conversions.
pub fn outputs_for_sizes<'a>(
    record: &'a MetaRecord,
    sizes: &'a [u32],
) -> impl Iterator<Item = (&'a String, &'a Converted)> + 'a {
    record
        .conv
        .iter()
        .filter(move |(_, conv)| sizes.contains(&conv.size))
}
