//! # Catalog Configuration
//!
//! Settings shared by every catalog operation: the three directory roots,
//! worker limits, upload batching and the external tool locations.
//!
//! ## Overview
//!
//! The configuration is built through [`CatalogConfig::builder()`] and
//! validated fail-fast in [`CatalogConfigBuilder::build`]. Collaborators
//! (converter, EXIF tools, photo service) are not part of the configuration;
//! they are injected separately when the catalog is opened.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::CatalogConfig;
//!
//! let config = CatalogConfig::builder()
//!     .raw_dir("/photos/raw")
//!     .collection_dir("/photos/collection")
//!     .converted_dir("/photos/converted")
//!     .max_workers(4)
//!     .build()?;
//! ```
//!
//! ## Error Handling
//!
//! ```should_panic
//! use core_runtime::config::CatalogConfig;
//!
//! // Missing collection and converted directories
//! let config = CatalogConfig::builder()
//!     .raw_dir("/photos/raw")
//!     .build()
//!     .expect("Should fail - missing directories");
//! ```

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};

/// Default number of concurrent uploads.
pub const DEFAULT_UPLOAD_PARALLEL: usize = 8;

/// Largest batch the photo service accepts in a single commit.
pub const MAX_UPLOAD_BATCH_SIZE: usize = 50;

pub const DEFAULT_RAWTHERAPEE_CLI: &str = "rawtherapee-cli";
pub const DEFAULT_EXIFTOOL: &str = "exiftool";
pub const DEFAULT_PIPELINE_ENGINE: &str = "phodo";
pub const DEFAULT_API_BASE_URL: &str = "https://photoslibrary.googleapis.com";

/// Catalog configuration.
///
/// Use [`CatalogConfigBuilder`] to construct instances.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogConfig {
    /// Root of the original RAW files and their `.meta` records
    pub raw_dir: PathBuf,

    /// Root of the symlink tree the user browses and edits in
    pub collection_dir: PathBuf,

    /// Root of the JPEG conversion cache
    pub converted_dir: PathBuf,

    /// Upper bound on worker tasks for any batch
    pub max_workers: usize,

    /// Concurrent upload-token requests
    pub upload_parallel: usize,

    /// Items per batch commit
    pub upload_batch_size: usize,

    /// RawTherapee command line binary
    pub rawtherapee_cli: PathBuf,

    /// exiftool binary
    pub exiftool: PathBuf,

    /// Script-recipe pipeline engine binary
    pub pipeline_engine: PathBuf,

    /// Base URL of the photo service API
    pub api_base_url: String,
}

impl CatalogConfig {
    /// Creates a new builder for constructing a `CatalogConfig`.
    pub fn builder() -> CatalogConfigBuilder {
        CatalogConfigBuilder::default()
    }

    /// Validates the configuration and returns an error if invalid.
    ///
    /// This checks:
    /// - Directory roots are not empty and pairwise distinct
    /// - Worker and upload limits are greater than zero
    /// - Upload batch size does not exceed the service limit
    pub fn validate(&self) -> Result<()> {
        let roots = [
            ("Raw directory", &self.raw_dir),
            ("Collection directory", &self.collection_dir),
            ("Converted directory", &self.converted_dir),
        ];

        for (name, path) in roots.iter() {
            if path.as_os_str().is_empty() {
                return Err(Error::Config(format!("{} cannot be empty", name)));
            }
        }

        for (i, (name_a, a)) in roots.iter().enumerate() {
            for (name_b, b) in roots.iter().skip(i + 1) {
                if a == b {
                    return Err(Error::Config(format!(
                        "{} and {} must be different paths (both are {})",
                        name_a,
                        name_b.to_lowercase(),
                        a.display()
                    )));
                }
            }
        }

        if self.max_workers == 0 {
            return Err(Error::Config(
                "Max workers must be greater than 0".to_string(),
            ));
        }

        if self.upload_parallel == 0 {
            return Err(Error::Config(
                "Upload parallelism must be greater than 0".to_string(),
            ));
        }

        if self.upload_batch_size == 0 {
            return Err(Error::Config(
                "Upload batch size must be greater than 0".to_string(),
            ));
        }

        if self.upload_batch_size > MAX_UPLOAD_BATCH_SIZE {
            return Err(Error::Config(format!(
                "Upload batch size exceeds the photo service maximum of {} items",
                MAX_UPLOAD_BATCH_SIZE
            )));
        }

        if self.api_base_url.is_empty() {
            return Err(Error::Config("API base URL cannot be empty".to_string()));
        }

        Ok(())
    }

    /// Whether `path` lies inside the collection tree.
    pub fn in_collection(&self, path: &Path) -> bool {
        path.starts_with(&self.collection_dir)
    }
}

/// Worker count the machine offers, falling back to one.
pub fn available_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Builder for constructing [`CatalogConfig`] instances.
#[derive(Debug, Default)]
pub struct CatalogConfigBuilder {
    raw_dir: Option<PathBuf>,
    collection_dir: Option<PathBuf>,
    converted_dir: Option<PathBuf>,
    max_workers: Option<usize>,
    upload_parallel: Option<usize>,
    upload_batch_size: Option<usize>,
    rawtherapee_cli: Option<PathBuf>,
    exiftool: Option<PathBuf>,
    pipeline_engine: Option<PathBuf>,
    api_base_url: Option<String>,
}

impl CatalogConfigBuilder {
    /// Sets the originals root.
    ///
    /// # Examples
    ///
    /// ```
    /// use core_runtime::config::CatalogConfig;
    ///
    /// let builder = CatalogConfig::builder().raw_dir("/photos/raw");
    /// ```
    pub fn raw_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.raw_dir = Some(path.into());
        self
    }

    /// Sets the collection (symlink tree) root.
    pub fn collection_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.collection_dir = Some(path.into());
        self
    }

    /// Sets the conversion cache root.
    pub fn converted_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.converted_dir = Some(path.into());
        self
    }

    /// Caps the number of worker tasks. Defaults to the available parallelism.
    pub fn max_workers(mut self, workers: usize) -> Self {
        self.max_workers = Some(workers);
        self
    }

    pub fn upload_parallel(mut self, parallel: usize) -> Self {
        self.upload_parallel = Some(parallel);
        self
    }

    pub fn upload_batch_size(mut self, size: usize) -> Self {
        self.upload_batch_size = Some(size);
        self
    }

    pub fn rawtherapee_cli<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.rawtherapee_cli = Some(path.into());
        self
    }

    pub fn exiftool<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.exiftool = Some(path.into());
        self
    }

    pub fn pipeline_engine<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.pipeline_engine = Some(path.into());
        self
    }

    /// Overrides the photo service endpoint, mainly for tests.
    pub fn api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = Some(url.into());
        self
    }

    /// Builds the final [`CatalogConfig`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a directory root is missing or the
    /// resulting configuration fails [`CatalogConfig::validate`].
    pub fn build(self) -> Result<CatalogConfig> {
        let raw_dir = self.raw_dir.ok_or_else(|| {
            Error::Config("Raw directory is required. Use .raw_dir() to set it.".to_string())
        })?;

        let collection_dir = self.collection_dir.ok_or_else(|| {
            Error::Config(
                "Collection directory is required. Use .collection_dir() to set it.".to_string(),
            )
        })?;

        let converted_dir = self.converted_dir.ok_or_else(|| {
            Error::Config(
                "Converted directory is required. Use .converted_dir() to set it.".to_string(),
            )
        })?;

        let config = CatalogConfig {
            raw_dir,
            collection_dir,
            converted_dir,
            max_workers: self.max_workers.unwrap_or_else(available_workers),
            upload_parallel: self.upload_parallel.unwrap_or(DEFAULT_UPLOAD_PARALLEL),
            upload_batch_size: self.upload_batch_size.unwrap_or(MAX_UPLOAD_BATCH_SIZE),
            rawtherapee_cli: self
                .rawtherapee_cli
                .unwrap_or_else(|| PathBuf::from(DEFAULT_RAWTHERAPEE_CLI)),
            exiftool: self
                .exiftool
                .unwrap_or_else(|| PathBuf::from(DEFAULT_EXIFTOOL)),
            pipeline_engine: self
                .pipeline_engine
                .unwrap_or_else(|| PathBuf::from(DEFAULT_PIPELINE_ENGINE)),
            api_base_url: self
                .api_base_url
                .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string()),
        };

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_builder() -> CatalogConfigBuilder {
        CatalogConfig::builder()
            .raw_dir("/photos/raw")
            .collection_dir("/photos/collection")
            .converted_dir("/photos/converted")
    }

    #[test]
    fn test_builder_defaults() {
        let config = base_builder().build().unwrap();

        assert_eq!(config.raw_dir, PathBuf::from("/photos/raw"));
        assert_eq!(config.max_workers, available_workers());
        assert_eq!(config.upload_parallel, DEFAULT_UPLOAD_PARALLEL);
        assert_eq!(config.upload_batch_size, 50);
        assert_eq!(config.rawtherapee_cli, PathBuf::from("rawtherapee-cli"));
        assert_eq!(config.exiftool, PathBuf::from("exiftool"));
        assert_eq!(config.pipeline_engine, PathBuf::from("phodo"));
        assert_eq!(config.api_base_url, DEFAULT_API_BASE_URL);
    }

    #[test]
    fn test_builder_requires_raw_dir() {
        let result = CatalogConfig::builder()
            .collection_dir("/c")
            .converted_dir("/v")
            .build();

        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Raw directory is required"));
    }

    #[test]
    fn test_builder_requires_collection_dir() {
        let result = CatalogConfig::builder()
            .raw_dir("/r")
            .converted_dir("/v")
            .build();

        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Collection directory is required"));
    }

    #[test]
    fn test_builder_requires_converted_dir() {
        let result = CatalogConfig::builder()
            .raw_dir("/r")
            .collection_dir("/c")
            .build();

        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Converted directory is required"));
    }

    #[test]
    fn test_roots_must_be_distinct() {
        let result = CatalogConfig::builder()
            .raw_dir("/photos")
            .collection_dir("/photos")
            .converted_dir("/converted")
            .build();

        let err = result.unwrap_err().to_string();
        assert!(err.contains("must be different paths"));
    }

    #[test]
    fn test_zero_workers_rejected() {
        let result = base_builder().max_workers(0).build();
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Max workers must be greater than 0"));
    }

    #[test]
    fn test_upload_batch_size_limit() {
        assert!(base_builder().upload_batch_size(50).build().is_ok());

        let result = base_builder().upload_batch_size(51).build();
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("maximum of 50 items"));

        assert!(base_builder().upload_batch_size(0).build().is_err());
    }

    #[test]
    fn test_zero_upload_parallel_rejected() {
        assert!(base_builder().upload_parallel(0).build().is_err());
    }

    #[test]
    fn test_empty_root_rejected() {
        let result = base_builder().raw_dir("").build();
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Raw directory cannot be empty"));
    }

    #[test]
    fn test_overrides() {
        let config = base_builder()
            .max_workers(3)
            .upload_parallel(2)
            .upload_batch_size(10)
            .rawtherapee_cli("/opt/rt/rawtherapee-cli")
            .exiftool("/usr/local/bin/exiftool")
            .pipeline_engine("/usr/local/bin/phodo")
            .api_base_url("http://127.0.0.1:8080")
            .build()
            .unwrap();

        assert_eq!(config.max_workers, 3);
        assert_eq!(config.upload_parallel, 2);
        assert_eq!(config.upload_batch_size, 10);
        assert_eq!(config.api_base_url, "http://127.0.0.1:8080");
    }

    #[test]
    fn test_in_collection() {
        let config = base_builder().build().unwrap();
        assert!(config.in_collection(Path::new("/photos/collection/2021/a.NEF")));
        assert!(!config.in_collection(Path::new("/photos/raw/a.NEF")));
    }
}
