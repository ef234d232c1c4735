//! Conversion and EXIF Abstractions
//!
//! RAW development and JPEG EXIF surgery are delegated to external tools.
//! The core prepares a [`ConversionJob`], hands it to a [`Converter`], then
//! corrects the resulting JPEG through an [`ExifRewriter`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Edit recipe that drives a conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recipe {
    /// A RawTherapee processing profile, already resized for the target size.
    Pp3 { profile: PathBuf },
    /// A pipeline script whose `.convert` target renders the output.
    Script { script: PathBuf },
}

/// One (sidecar, size) conversion request.
#[derive(Debug, Clone)]
pub struct ConversionJob {
    pub input: PathBuf,
    /// Where the converter must write the JPEG. The core renames it into place.
    pub output: PathBuf,
    pub recipe: Recipe,
    /// Longest edge in pixels.
    pub size: u32,
    pub created: DateTime<Utc>,
    pub lat_lng: Option<(f64, f64)>,
}

/// Runs the external RAW developer.
#[async_trait]
pub trait Converter: Send + Sync {
    async fn convert(&self, job: &ConversionJob) -> Result<()>;
}

/// Rewrites EXIF tags of a finished JPEG in place.
///
/// Implementations must write atomically: a failed rewrite leaves the
/// original JPEG untouched.
#[async_trait]
pub trait ExifRewriter: Send + Sync {
    /// Record the offset between the embedded local timestamp and `created`.
    async fn rewrite_timezone(&self, jpeg: &Path, created: DateTime<Utc>) -> Result<()>;

    /// Stamp GPS coordinates plus the UTC date/time of `created`.
    async fn rewrite_gps(
        &self,
        jpeg: &Path,
        created: DateTime<Utc>,
        lat: f64,
        lng: f64,
    ) -> Result<()>;
}
