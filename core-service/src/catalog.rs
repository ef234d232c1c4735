//! # Catalog
//!
//! The context object every catalog operation runs against. It owns the
//! configuration, the link index, the meta store, the sidecar and
//! conversion engines and the collaborators, and is built once per run.
//!
//! ## Operations
//!
//! | Operation | Scheduler run | Writes |
//! |-----------|---------------|--------|
//! | [`Catalog::link`] | one `Link` per file | collection symlinks, missing records |
//! | [`Catalog::sync_meta`] | one `SyncSidecars` per file | records and profiles |
//! | [`Catalog::rewrite_meta`] | one `RewriteMeta` per file | records |
//! | [`Catalog::convert`] | `Convert` for out-of-date files | converted JPEGs, records |
//! | [`Catalog::tags_add`] / [`Catalog::tags_remove`] | `Save` for changed records | records |
//! | [`Catalog::exec`] | one `RunExternal` per file | whatever the command does |
//! | [`Catalog::fixup_exif`] | `FixupExif` for files with outputs | converted JPEGs |
//! | [`Catalog::update_locations`] | `UpdateLocation` for changed places | records, converted JPEGs |
//! | [`Catalog::previews`] | `Preview` for stills without one | `<original>.preview` |
//!
//! [`Catalog::cleanup`], [`Catalog::unedited`] and [`Catalog::upload`] walk
//! the files directly.
//!
//! ## Cancellation
//!
//! [`Catalog::cancel`] stops running batches at their next queue pull and
//! the upload pipeline at its next task. The token is shared by every
//! operation, so a cancelled catalog stays cancelled.

use bridge_traits::{LocationLookup, MediaItemResult, PhotoService};
use core_library::{list_originals, LinkIndex, MetaStore, PhotoFile};
use core_runtime::config::CatalogConfig;
use core_runtime::events::{CoreEvent, EventBus, UploadEvent};
use core_sync::{
    upload_tasks, CatalogExecutor, ConversionCache, ConvertVisitor, EachFileVisitor,
    ExecVisitor, ExifFixupVisitor, ExternalCommand, LocationVisitor, PreviewVisitor, RunReport,
    SidecarSync, SyncError, TagsAddVisitor, TagsRemoveVisitor, UploadPipeline, Visitor,
    WorkScheduler,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::Receiver;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::error::{CoreError, Result};
use crate::CatalogDependencies;

pub struct Catalog {
    config: CatalogConfig,
    links: Arc<LinkIndex>,
    store: MetaStore,
    conversions: Arc<ConversionCache>,
    executor: Arc<CatalogExecutor>,
    scheduler: WorkScheduler,
    photo_service: Option<Arc<dyn PhotoService>>,
    location_lookup: Option<Arc<dyn LocationLookup>>,
    event_bus: EventBus,
    cancel: CancellationToken,
}

impl Catalog {
    /// Builds the catalog for `config`. Collaborators missing from `deps`
    /// are filled from the desktop defaults when available.
    ///
    /// Nothing on disk is touched.
    pub fn open(config: CatalogConfig, deps: CatalogDependencies) -> Result<Self> {
        config.validate()?;
        let deps = deps.resolve(&config)?;
        let cancel = CancellationToken::new();

        let links = Arc::new(LinkIndex::with_cancellation(
            &config.collection_dir,
            cancel.clone(),
        ));
        let store = MetaStore::new(deps.tag_reader);
        let sidecars = Arc::new(SidecarSync::new(links.clone(), store.clone(), deps.clock));
        let conversions = Arc::new(ConversionCache::new(
            links.clone(),
            store.clone(),
            deps.converter,
            deps.exif_rewriter,
            &config.converted_dir,
        ));
        let executor = Arc::new(CatalogExecutor::new(
            store.clone(),
            links.clone(),
            sidecars,
            conversions.clone(),
        ));
        let scheduler = WorkScheduler::new(config.max_workers)
            .with_event_bus(deps.event_bus.clone())
            .with_cancellation(cancel.clone());

        info!(
            raw = %config.raw_dir.display(),
            collection = %config.collection_dir.display(),
            converted = %config.converted_dir.display(),
            upload = deps.photo_service.is_some(),
            "catalog opened"
        );

        Ok(Self {
            config,
            links,
            store,
            conversions,
            executor,
            scheduler,
            photo_service: deps.photo_service,
            location_lookup: deps.location_lookup,
            event_bus: deps.event_bus,
            cancel,
        })
    }

    pub fn config(&self) -> &CatalogConfig {
        &self.config
    }

    pub fn links(&self) -> &LinkIndex {
        &self.links
    }

    pub fn store(&self) -> &MetaStore {
        &self.store
    }

    pub fn events(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.event_bus.subscribe()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stops running operations and refuses new ones.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Every original in the raw directory.
    pub async fn originals(&self) -> Result<Vec<PhotoFile>> {
        Ok(list_originals(&self.config.raw_dir).await?)
    }

    async fn run(
        &self,
        operation: &str,
        workers: i64,
        files: Vec<PhotoFile>,
        visitor: Arc<dyn Visitor>,
    ) -> Result<RunReport> {
        let report = self
            .scheduler
            .run(operation, workers, files, visitor, self.executor.clone())
            .await?;
        Ok(report)
    }

    // ------------------------------------------------------------------
    // Sidecars and records
    // ------------------------------------------------------------------

    /// Reconciles every file's record with its profiles.
    pub async fn sync_meta(&self, files: Vec<PhotoFile>, workers: i64) -> Result<RunReport> {
        self.run(
            "sync-meta",
            workers,
            files,
            Arc::new(EachFileVisitor::sync_sidecars()),
        )
        .await
    }

    /// Refreshes capture time and camera info from the files' tags.
    pub async fn rewrite_meta(&self, files: Vec<PhotoFile>, workers: i64) -> Result<RunReport> {
        self.run(
            "rewrite-meta",
            workers,
            files,
            Arc::new(EachFileVisitor::rewrite_meta()),
        )
        .await
    }

    pub async fn tags_add(
        &self,
        files: Vec<PhotoFile>,
        tags: Vec<String>,
        workers: i64,
    ) -> Result<RunReport> {
        let visitor = TagsAddVisitor::new(self.store.clone(), tags);
        self.run("tags-add", workers, files, Arc::new(visitor)).await
    }

    pub async fn tags_remove(
        &self,
        files: Vec<PhotoFile>,
        tags: Vec<String>,
        workers: i64,
    ) -> Result<RunReport> {
        let visitor = TagsRemoveVisitor::new(self.store.clone(), tags);
        self.run("tags-remove", workers, files, Arc::new(visitor)).await
    }

    /// Files that have links but no edited sidecar on any of them.
    #[instrument(skip(self, files), fields(files = files.len()))]
    pub async fn unedited(&self, files: &[PhotoFile]) -> Result<Vec<PhotoFile>> {
        let mut unedited = Vec::new();
        for file in files {
            if self.cancel.is_cancelled() {
                return Err(SyncError::Cancelled.into());
            }
            if core_sync::is_unedited(&self.links, file).await? {
                unedited.push(file.clone());
            }
        }
        info!(unedited = unedited.len(), "unedited scan done");
        Ok(unedited)
    }

    // ------------------------------------------------------------------
    // Collection
    // ------------------------------------------------------------------

    /// Links every live file without a collection link.
    pub async fn link(&self, files: Vec<PhotoFile>, workers: i64) -> Result<RunReport> {
        self.links.invalidate().await;
        let result = self
            .run("link", workers, files, Arc::new(EachFileVisitor::link()))
            .await;
        self.links.invalidate().await;
        result
    }

    // ------------------------------------------------------------------
    // Conversions
    // ------------------------------------------------------------------

    /// Whether converting `file` at `sizes` would change anything.
    pub async fn check_convert(&self, file: &PhotoFile, sizes: &[u32]) -> Result<bool> {
        Ok(self.conversions.check_needed(file, sizes).await?)
    }

    pub async fn convert(
        &self,
        files: Vec<PhotoFile>,
        sizes: Vec<u32>,
        workers: i64,
    ) -> Result<RunReport> {
        if sizes.iter().all(|s| *s == 0) {
            return Err(SyncError::NoSizes.into());
        }
        let visitor = ConvertVisitor::new(self.conversions.clone(), sizes);
        self.run("convert", workers, files, Arc::new(visitor)).await
    }

    /// Reruns the timezone correction on every existing output of `files`.
    pub async fn fixup_exif(&self, files: Vec<PhotoFile>, workers: i64) -> Result<RunReport> {
        let visitor = ExifFixupVisitor::new(self.store.clone());
        self.run("fixup-exif", workers, files, Arc::new(visitor)).await
    }

    /// Looks up where each photo was taken, records it and stamps it into
    /// the existing outputs.
    pub async fn update_locations(&self, files: Vec<PhotoFile>, workers: i64) -> Result<RunReport> {
        let lookup = self.location_lookup.clone().ok_or_else(|| {
            CoreError::missing("LocationLookup", "no location history injected")
        })?;
        let visitor = LocationVisitor::new(self.store.clone(), lookup);
        self.run("update-locations", workers, files, Arc::new(visitor))
            .await
    }

    /// Develops a preview for every still that has none.
    pub async fn previews(&self, files: Vec<PhotoFile>, workers: i64) -> Result<RunReport> {
        let visitor = PreviewVisitor::new(self.conversions.clone());
        self.run("previews", workers, files, Arc::new(visitor)).await
    }

    /// Files under the converted and collection roots that no record
    /// refers to. See [`core_sync::cleanup`].
    pub async fn cleanup(&self, files: &[PhotoFile], min_rating: i64) -> Result<Vec<PathBuf>> {
        Ok(core_sync::cleanup(
            &self.store,
            files,
            &self.config.converted_dir,
            &self.config.collection_dir,
            min_rating,
        )
        .await?)
    }

    pub async fn do_cleanup(&self, paths: &[PathBuf]) -> Result<()> {
        core_sync::do_cleanup(
            paths,
            &self.config.converted_dir,
            &self.config.collection_dir,
        )
        .await?;
        self.links.invalidate().await;
        Ok(())
    }

    // ------------------------------------------------------------------
    // External
    // ------------------------------------------------------------------

    /// Runs `command` once per file with `{}` replaced by the file path.
    pub async fn exec(
        &self,
        files: Vec<PhotoFile>,
        command: ExternalCommand,
        workers: i64,
    ) -> Result<RunReport> {
        self.run("exec", workers, files, Arc::new(ExecVisitor::new(command)))
            .await
    }

    /// Uploads every finished conversion of `files` at one of `sizes`.
    #[instrument(skip(self, files, sizes), fields(files = files.len()))]
    pub async fn upload(&self, files: &[PhotoFile], sizes: &[u32]) -> Result<Vec<MediaItemResult>> {
        let service = self.photo_service.clone().ok_or_else(|| {
            CoreError::missing(
                "PhotoService",
                "no photo service injected and no credentials to build one",
            )
        })?;
        if sizes.iter().all(|s| *s == 0) {
            return Err(SyncError::NoSizes.into());
        }

        let mut tasks = Vec::new();
        for file in files {
            let record = self.store.load(file).await?;
            tasks.extend(upload_tasks(
                file,
                &record,
                &self.config.converted_dir,
                sizes,
            ));
        }
        if tasks.is_empty() {
            info!("no files to upload");
            return Ok(Vec::new());
        }

        let pipeline = UploadPipeline::new(service, self.config.upload_parallel)
            .with_batch_size(self.config.upload_batch_size)
            .with_event_bus(self.event_bus.clone())
            .with_cancellation(self.cancel.clone());

        let bus = self.event_bus.clone();
        let results = pipeline
            .batch_upload(tasks, move |uploaded, total| {
                bus.emit(CoreEvent::Upload(UploadEvent::Progress { uploaded, total }))
                    .ok();
            })
            .await?;
        Ok(results)
    }
}

impl std::fmt::Debug for Catalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Catalog")
            .field("config", &self.config)
            .field("upload", &self.photo_service.is_some())
            .finish_non_exhaustive()
    }
}
