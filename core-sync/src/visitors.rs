//! Visit-phase logic for each catalog operation.
//!
//! Visitors only read. Anything that writes is returned as an [`Action`].

use async_trait::async_trait;
use bridge_traits::LocationLookup;
use core_library::{LinkIndex, Location, MetaStore, PhotoFile, Sidecar};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::conversion::ConversionCache;
use crate::error::Result;
use crate::scheduler::{Action, ExternalCommand, Visitor};

/// Appends tags to every record missing at least one of them.
pub struct TagsAddVisitor {
    store: MetaStore,
    tags: Vec<String>,
}

impl TagsAddVisitor {
    pub fn new(store: MetaStore, tags: Vec<String>) -> Self {
        Self { store, tags }
    }
}

#[async_trait]
impl Visitor for TagsAddVisitor {
    async fn visit(&self, file: &PhotoFile) -> Result<Option<Action>> {
        let mut record = self.store.load(file).await?;
        if record.tags.contains_all(&self.tags) {
            return Ok(None);
        }
        record.tags.extend(self.tags.iter().cloned());
        Ok(Some(Action::Save {
            file: file.clone(),
            record,
        }))
    }
}

/// Removes tags from every record carrying at least one of them.
pub struct TagsRemoveVisitor {
    store: MetaStore,
    tags: Vec<String>,
}

impl TagsRemoveVisitor {
    pub fn new(store: MetaStore, tags: Vec<String>) -> Self {
        Self { store, tags }
    }
}

#[async_trait]
impl Visitor for TagsRemoveVisitor {
    async fn visit(&self, file: &PhotoFile) -> Result<Option<Action>> {
        let mut record = self.store.load(file).await?;
        if !record.tags.remove_all(&self.tags) {
            return Ok(None);
        }
        Ok(Some(Action::Save {
            file: file.clone(),
            record,
        }))
    }
}

/// Queues one fixed action per file.
pub struct EachFileVisitor {
    make: fn(PhotoFile) -> Action,
}

impl EachFileVisitor {
    pub fn link() -> Self {
        Self { make: Action::Link }
    }

    pub fn sync_sidecars() -> Self {
        Self {
            make: Action::SyncSidecars,
        }
    }

    pub fn rewrite_meta() -> Self {
        Self {
            make: Action::RewriteMeta,
        }
    }
}

#[async_trait]
impl Visitor for EachFileVisitor {
    async fn visit(&self, file: &PhotoFile) -> Result<Option<Action>> {
        Ok(Some((self.make)(file.clone())))
    }
}

/// Queues a conversion for files whose outputs are out of date.
pub struct ConvertVisitor {
    conversions: Arc<ConversionCache>,
    sizes: Vec<u32>,
}

impl ConvertVisitor {
    pub fn new(conversions: Arc<ConversionCache>, sizes: Vec<u32>) -> Self {
        Self { conversions, sizes }
    }
}

#[async_trait]
impl Visitor for ConvertVisitor {
    async fn visit(&self, file: &PhotoFile) -> Result<Option<Action>> {
        if !self.conversions.check_needed(file, &self.sizes).await? {
            return Ok(None);
        }
        Ok(Some(Action::Convert {
            file: file.clone(),
            sizes: self.sizes.clone(),
        }))
    }
}

/// Runs an external command per file.
pub struct ExecVisitor {
    command: ExternalCommand,
}

impl ExecVisitor {
    pub fn new(command: ExternalCommand) -> Self {
        Self { command }
    }
}

#[async_trait]
impl Visitor for ExecVisitor {
    async fn visit(&self, file: &PhotoFile) -> Result<Option<Action>> {
        Ok(Some(Action::RunExternal(self.command.for_file(file))))
    }
}

/// Queues a timezone fixup for records with converted outputs.
pub struct ExifFixupVisitor {
    store: MetaStore,
}

impl ExifFixupVisitor {
    pub fn new(store: MetaStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Visitor for ExifFixupVisitor {
    async fn visit(&self, file: &PhotoFile) -> Result<Option<Action>> {
        let record = self.store.load(file).await?;
        if record.conv.is_empty() {
            return Ok(None);
        }
        Ok(Some(Action::FixupExif(file.clone())))
    }
}

/// Resolves each record's capture time to a place and queues an update
/// when it differs from the stored location.
pub struct LocationVisitor {
    store: MetaStore,
    lookup: Arc<dyn LocationLookup>,
}

impl LocationVisitor {
    pub fn new(store: MetaStore, lookup: Arc<dyn LocationLookup>) -> Self {
        Self { store, lookup }
    }
}

#[async_trait]
impl Visitor for LocationVisitor {
    async fn visit(&self, file: &PhotoFile) -> Result<Option<Action>> {
        let mut record = self.store.load(file).await?;
        let created = record.created_time();
        let Some(place) = self.lookup.place_at(created).await? else {
            debug!(file = %file.name(), %created, "no location found");
            return Ok(None);
        };

        let location = Location {
            lat: place.lat,
            lng: place.lng,
            name: place.name,
            address: place.address,
        };
        if record.location.as_ref() == Some(&location) {
            return Ok(None);
        }
        record.location = Some(location);
        Ok(Some(Action::UpdateLocation {
            file: file.clone(),
            record,
        }))
    }
}

/// Queues a preview for stills that have none.
pub struct PreviewVisitor {
    conversions: Arc<ConversionCache>,
}

impl PreviewVisitor {
    pub fn new(conversions: Arc<ConversionCache>) -> Self {
        Self { conversions }
    }
}

#[async_trait]
impl Visitor for PreviewVisitor {
    async fn visit(&self, file: &PhotoFile) -> Result<Option<Action>> {
        if self.conversions.has_preview(file).await? {
            return Ok(None);
        }
        if !file.supports_sidecars() {
            warn!(file = %file.name(), "no preview possible for this file type");
            return Ok(None);
        }
        Ok(Some(Action::Preview(file.clone())))
    }
}

/// Whether `file` is linked but none of its links carries an edited
/// sidecar. Missing sidecars count as unedited; an unlinked file is not
/// reported.
pub async fn is_unedited(links: &LinkIndex, file: &PhotoFile) -> Result<bool> {
    let links = links.links_for(file).await?;
    if links.is_empty() {
        return Ok(false);
    }
    for link in links {
        if Sidecar::for_conversion(&link).await?.is_some() {
            return Ok(false);
        }
    }
    Ok(true)
}
