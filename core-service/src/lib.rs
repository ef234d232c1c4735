//! Catalog service façade and bootstrap helpers.
//!
//! This crate wires host-provided collaborators (tag reader, RAW converter,
//! EXIF rewriter, photo service) into the catalog core and exposes every
//! batch operation on one [`Catalog`] context object. Desktop hosts
//! typically enable the `desktop-shims` feature (which depends on
//! `bridge-desktop` and `provider-google-photos`) so that collaborators not
//! injected explicitly are built from the [`CatalogConfig`].
//!
//! ```ignore
//! use core_runtime::config::CatalogConfig;
//! use core_service::{Catalog, CatalogDependencies};
//!
//! let config = CatalogConfig::builder()
//!     .raw_dir("/photos/raw")
//!     .collection_dir("/photos/collection")
//!     .converted_dir("/photos/converted")
//!     .build()?;
//! let catalog = Catalog::open(config, CatalogDependencies::default())?;
//!
//! let files = catalog.originals().await?;
//! catalog.link(files.clone(), 0).await?;
//! catalog.sync_meta(files.clone(), 0).await?;
//! catalog.convert(files, vec![1920, 3840], 0).await?;
//! ```

pub mod catalog;
mod defaults;
pub mod error;

pub use catalog::Catalog;
pub use error::{CoreError, Result};

use bridge_traits::{
    Clock, Converter, CredentialProvider, ExifRewriter, LocationLookup, PhotoService, SystemClock,
    TagReader,
};
use core_runtime::config::CatalogConfig;
use core_runtime::events::{EventBus, DEFAULT_EVENT_BUFFER_SIZE};
use std::sync::Arc;

/// Collaborators injected by the host. Anything left unset falls back to
/// the desktop defaults when `desktop-shims` is enabled.
#[derive(Clone, Default)]
pub struct CatalogDependencies {
    pub tag_reader: Option<Arc<dyn TagReader>>,
    pub converter: Option<Arc<dyn Converter>>,
    pub exif_rewriter: Option<Arc<dyn ExifRewriter>>,
    pub photo_service: Option<Arc<dyn PhotoService>>,
    /// Used to build the default photo service when none is injected.
    pub credentials: Option<Arc<dyn CredentialProvider>>,
    /// Required by [`Catalog::update_locations`] only.
    pub location_lookup: Option<Arc<dyn LocationLookup>>,
    pub clock: Option<Arc<dyn Clock>>,
    pub event_bus: Option<EventBus>,
}

impl CatalogDependencies {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tag_reader(mut self, tag_reader: Arc<dyn TagReader>) -> Self {
        self.tag_reader = Some(tag_reader);
        self
    }

    pub fn with_converter(mut self, converter: Arc<dyn Converter>) -> Self {
        self.converter = Some(converter);
        self
    }

    pub fn with_exif_rewriter(mut self, exif_rewriter: Arc<dyn ExifRewriter>) -> Self {
        self.exif_rewriter = Some(exif_rewriter);
        self
    }

    pub fn with_photo_service(mut self, photo_service: Arc<dyn PhotoService>) -> Self {
        self.photo_service = Some(photo_service);
        self
    }

    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialProvider>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_location_lookup(mut self, lookup: Arc<dyn LocationLookup>) -> Self {
        self.location_lookup = Some(lookup);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Fills every unset collaborator, failing on the first one that cannot
    /// be provided.
    pub(crate) fn resolve(self, config: &CatalogConfig) -> Result<Collaborators> {
        let tag_reader = match self.tag_reader {
            Some(reader) => reader,
            None => defaults::tag_reader(config)?,
        };
        let converter = match self.converter {
            Some(converter) => converter,
            None => defaults::converter(config)?,
        };
        let exif_rewriter = match self.exif_rewriter {
            Some(rewriter) => rewriter,
            None => defaults::exif_rewriter(config)?,
        };
        let photo_service = match self.photo_service {
            Some(service) => Some(service),
            None => defaults::photo_service(config, self.credentials)?,
        };

        Ok(Collaborators {
            tag_reader,
            converter,
            exif_rewriter,
            photo_service,
            location_lookup: self.location_lookup,
            clock: self
                .clock
                .unwrap_or_else(|| Arc::new(SystemClock) as Arc<dyn Clock>),
            event_bus: self
                .event_bus
                .unwrap_or_else(|| EventBus::new(DEFAULT_EVENT_BUFFER_SIZE)),
        })
    }
}

impl std::fmt::Debug for CatalogDependencies {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogDependencies")
            .field("tag_reader", &self.tag_reader.is_some())
            .field("converter", &self.converter.is_some())
            .field("exif_rewriter", &self.exif_rewriter.is_some())
            .field("photo_service", &self.photo_service.is_some())
            .field("credentials", &self.credentials.is_some())
            .field("location_lookup", &self.location_lookup.is_some())
            .finish_non_exhaustive()
    }
}

/// Resolved collaborator set.
pub(crate) struct Collaborators {
    pub(crate) tag_reader: Arc<dyn TagReader>,
    pub(crate) converter: Arc<dyn Converter>,
    pub(crate) exif_rewriter: Arc<dyn ExifRewriter>,
    pub(crate) photo_service: Option<Arc<dyn PhotoService>>,
    pub(crate) location_lookup: Option<Arc<dyn LocationLookup>>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) event_bus: EventBus,
}
