//! Domain models for the photo catalog
//!
//! [`MetaRecord`] is the catalog's own state for one original file.
//! [`PhotoFile`] names an original inside the raw directory.

use bridge_traits::CameraInfo;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{LibraryError, Result};

// =============================================================================
// Tags
// =============================================================================

/// Keyword list of a photo. Deduplicated and sorted when saved.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tags(pub Vec<String>);

impl Tags {
    pub fn new<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(tags.into_iter().map(Into::into).collect())
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.0.iter().any(|t| t == tag)
    }

    pub fn contains_all(&self, tags: &[String]) -> bool {
        tags.iter().all(|t| self.contains(t))
    }

    /// Sorted, deduplicated copy.
    pub fn unique(&self) -> Tags {
        let set: BTreeSet<&String> = self.0.iter().collect();
        Tags(set.into_iter().cloned().collect())
    }

    pub fn extend<I: IntoIterator<Item = String>>(&mut self, tags: I) {
        self.0.extend(tags);
    }

    /// Removes every occurrence of `tags`. Returns whether anything was removed.
    pub fn remove_all(&mut self, tags: &[String]) -> bool {
        let before = self.0.len();
        self.0.retain(|t| !tags.contains(t));
        self.0.len() != before
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.0.iter()
    }
}

impl fmt::Display for Tags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined = self
            .0
            .iter()
            .map(|t| format!("+{}", t))
            .collect::<Vec<_>>()
            .join(" ");
        f.write_str(&joined)
    }
}

// =============================================================================
// Location / Converted
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lng: f64,
    pub name: String,
    pub address: String,
}

/// One conversion cache entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Converted {
    /// Digest of the (size, sidecar) inputs that produced the output
    pub hash: String,
    /// Longest edge in pixels
    pub size: u32,
}

// =============================================================================
// MetaRecord
// =============================================================================

/// Persisted state of one original file (`<file>.meta`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetaRecord {
    pub checksum: String,
    pub size: u64,
    /// Name the camera gave the file
    pub real_filename: String,
    /// Name inside the raw directory, size prefix included
    pub base_filename: String,
    /// Capture time, unix seconds
    pub created: i64,

    pub deleted: bool,
    /// 0..=5
    pub rating: u8,

    /// Conversion cache keyed by output path relative to the converted root
    pub conv: BTreeMap<String, Converted>,

    pub tags: Tags,
    pub location: Option<Location>,
    pub camera_info: Option<CameraInfo>,

    /// Sidecars contributing to this record, relative to the collection root
    pub pp3: Vec<String>,
}

impl MetaRecord {
    pub fn new(size: u64, real_filename: impl Into<String>, base_filename: impl Into<String>) -> Self {
        Self {
            size,
            real_filename: real_filename.into(),
            base_filename: base_filename.into(),
            ..Default::default()
        }
    }

    pub fn created_time(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.created, 0)
            .single()
            .unwrap_or_default()
    }

    /// Ratings above five are clamped.
    pub fn set_rating(&mut self, rating: i64) {
        self.rating = rating.clamp(0, 5) as u8;
    }

    pub fn lat_lng(&self) -> Option<(f64, f64)> {
        self.location.as_ref().map(|l| (l.lat, l.lng))
    }
}

// =============================================================================
// PhotoFile
// =============================================================================

const RAW_EXTENSIONS: &[&str] = &[
    "arw", "cr2", "cr3", "crw", "dng", "erf", "kdc", "mef", "mos", "mrw", "nef", "nrw", "orf",
    "pef", "raf", "raw", "rw2", "rwl", "sr2", "srf", "srw", "x3f",
];
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "tif", "tiff", "heic", "webp"];
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "avi", "mkv", "mts", "m2ts", "m4v", "3gp"];

/// Media class of an original, decided by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Raw,
    Image,
    Video,
}

impl FileKind {
    pub fn from_path(path: &Path) -> Option<FileKind> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        let ext = ext.as_str();
        if RAW_EXTENSIONS.contains(&ext) {
            Some(FileKind::Raw)
        } else if IMAGE_EXTENSIONS.contains(&ext) {
            Some(FileKind::Image)
        } else if VIDEO_EXTENSIONS.contains(&ext) {
            Some(FileKind::Video)
        } else {
            None
        }
    }

    /// Sidecar editing applies to stills only.
    pub fn supports_sidecars(&self) -> bool {
        matches!(self, FileKind::Raw | FileKind::Image)
    }
}

/// An original stored as `<13-digit size>-<name>` in the raw directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PhotoFile {
    dir: PathBuf,
    bytes: u64,
    name: String,
}

impl PhotoFile {
    pub fn new(dir: impl Into<PathBuf>, bytes: u64, name: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            bytes,
            name: name.into(),
        }
    }

    /// Parses `<dir>/<size>-<name>`.
    pub fn from_path(path: &Path) -> Result<Self> {
        let invalid = || LibraryError::InvalidFilename(path.display().to_string());

        let file_name = path.file_name().and_then(|n| n.to_str()).ok_or_else(invalid)?;
        let (bytes, name) = file_name.split_once('-').ok_or_else(invalid)?;
        if bytes.is_empty() || name.is_empty() || !bytes.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let bytes = bytes.parse::<u64>().map_err(|_| invalid())?;
        let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();

        Ok(Self::new(dir, bytes, name))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Name without the size prefix.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn filename(&self) -> String {
        format!("{:013}-{}", self.bytes, self.name)
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(self.filename())
    }

    pub fn meta_path(&self) -> PathBuf {
        let mut path = self.path().into_os_string();
        path.push(".meta");
        PathBuf::from(path)
    }

    pub fn kind(&self) -> Option<FileKind> {
        FileKind::from_path(Path::new(&self.name))
    }

    pub fn supports_sidecars(&self) -> bool {
        self.kind().map(|k| k.supports_sidecars()).unwrap_or(false)
    }
}

impl fmt::Display for PhotoFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path().display())
    }
}
