//! Integration tests for the catalog context object
//!
//! These tests verify:
//! - Linking creates one dated symlink per original and is repeatable
//! - Sidecar sync creates stub profiles, and edits flip the unedited and convert checks
//! - Conversions land under the converted root and upload with their descriptions
//! - Tag edits, exec and cleanup run against the catalog's own roots
//! - EXIF fixups, location updates and previews only queue work where needed
//! - Missing collaborators and cancellation surface as errors

#![cfg(unix)]

use async_trait::async_trait;
use bridge_traits::{
    error::Result as BridgeResult, ConversionJob, Converter, ExifRewriter, LocationLookup,
    MediaItemResult, NewMediaItem, PhotoService, Place, TagInfo, TagReader,
};
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use core_library::{nice_path, pp3_path, PhotoFile};
use core_runtime::config::CatalogConfig;
use core_runtime::events::{CoreEvent, UploadEvent};
use core_service::{Catalog, CatalogDependencies, CoreError};
use core_sync::{preview_path, ExternalCommand, SyncError};
use mockall::mock;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

mock! {
    Tags {}

    #[async_trait]
    impl TagReader for Tags {
        async fn read_tags(&self, path: &Path) -> BridgeResult<TagInfo>;
    }
}

mock! {
    Exif {}

    #[async_trait]
    impl ExifRewriter for Exif {
        async fn rewrite_timezone(&self, jpeg: &Path, created: DateTime<Utc>) -> BridgeResult<()>;
        async fn rewrite_gps(&self, jpeg: &Path, created: DateTime<Utc>, lat: f64, lng: f64) -> BridgeResult<()>;
    }
}

mock! {
    Service {}

    #[async_trait]
    impl PhotoService for Service {
        async fn create_upload_token(&self, name: &str, mime: &str, body: Bytes) -> BridgeResult<String>;
        async fn commit_batch(&self, items: Vec<NewMediaItem>) -> BridgeResult<Vec<MediaItemResult>>;
    }
}

mock! {
    Timeline {}

    #[async_trait]
    impl LocationLookup for Timeline {
        async fn place_at(&self, at: DateTime<Utc>) -> BridgeResult<Option<Place>>;
    }
}

/// Writes a placeholder JPEG for every job.
#[derive(Default)]
struct RecordingConverter {
    outputs: Mutex<Vec<PathBuf>>,
}

#[async_trait]
impl Converter for RecordingConverter {
    async fn convert(&self, job: &ConversionJob) -> BridgeResult<()> {
        tokio::fs::write(&job.output, b"\xff\xd8jpeg").await?;
        self.outputs.lock().unwrap().push(job.output.clone());
        Ok(())
    }
}

// ============================================================================
// Fixtures
// ============================================================================

const EDIT: &str = "\n[Exposure]\nCompensation=0.5\n";

fn created() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2021, 7, 14, 10, 30, 0).unwrap()
}

fn tag_reader() -> MockTags {
    let mut tags = MockTags::new();
    tags.expect_read_tags().returning(|_| {
        Ok(TagInfo {
            created: Some(created()),
            camera: None,
        })
    });
    tags
}

fn permissive_exif() -> MockExif {
    let mut exif = MockExif::new();
    exif.expect_rewrite_timezone().returning(|_, _| Ok(()));
    exif.expect_rewrite_gps().returning(|_, _, _, _| Ok(()));
    exif
}

struct Fixture {
    _tmp: TempDir,
    raw: PathBuf,
    collection: PathBuf,
    converted: PathBuf,
    converter: Arc<RecordingConverter>,
    catalog: Catalog,
}

impl Fixture {
    fn new() -> Self {
        Self::build(CatalogDependencies::new())
    }

    fn with_service(service: Option<Arc<dyn PhotoService>>) -> Self {
        match service {
            Some(service) => Self::build(CatalogDependencies::new().with_photo_service(service)),
            None => Self::new(),
        }
    }

    fn with_lookup(lookup: Arc<dyn LocationLookup>) -> Self {
        Self::build(CatalogDependencies::new().with_location_lookup(lookup))
    }

    fn build(deps: CatalogDependencies) -> Self {
        let tmp = TempDir::new().unwrap();
        let mut roots = Vec::new();
        for name in ["raw", "collection", "converted"] {
            let dir = tmp.path().join(name);
            std::fs::create_dir_all(&dir).unwrap();
            roots.push(dir.canonicalize().unwrap());
        }
        let (raw, collection, converted) = (roots[0].clone(), roots[1].clone(), roots[2].clone());

        let config = CatalogConfig::builder()
            .raw_dir(&raw)
            .collection_dir(&collection)
            .converted_dir(&converted)
            .max_workers(2)
            .upload_parallel(2)
            .build()
            .unwrap();

        let converter = Arc::new(RecordingConverter::default());
        let deps = deps
            .with_tag_reader(Arc::new(tag_reader()))
            .with_converter(converter.clone())
            .with_exif_rewriter(Arc::new(permissive_exif()));

        Self {
            _tmp: tmp,
            raw,
            collection,
            converted,
            converter,
            catalog: Catalog::open(config, deps).unwrap(),
        }
    }

    fn add_original(&self, name: &str) -> PhotoFile {
        let file = PhotoFile::new(&self.raw, 4, name);
        std::fs::write(file.path(), b"raw!").unwrap();
        file
    }

    /// Links and syncs every original, returning them.
    async fn linked(&self) -> Vec<PhotoFile> {
        let files = self.catalog.originals().await.unwrap();
        self.catalog.link(files.clone(), 0).await.unwrap();
        self.catalog.sync_meta(files.clone(), 0).await.unwrap();
        files
    }

    async fn only_link(&self, file: &PhotoFile) -> PathBuf {
        let links = self.catalog.links().links_for(file).await.unwrap();
        assert_eq!(links.len(), 1);
        links.into_iter().next().unwrap()
    }
}

fn edit_profile(link: &Path) {
    let profile = pp3_path(link);
    let mut text = std::fs::read_to_string(&profile).unwrap();
    text.push_str(EDIT);
    std::fs::write(&profile, text).unwrap();
}

fn accepted(items: Vec<NewMediaItem>) -> Vec<MediaItemResult> {
    items
        .into_iter()
        .map(|item| MediaItemResult {
            media_item_id: Some(format!("id-{}", item.upload_token)),
            upload_token: item.upload_token,
            status_code: 0,
            status_message: "Success".into(),
            file_name: Some(item.file_name),
        })
        .collect()
}

// ============================================================================
// Linking and sidecars
// ============================================================================

#[tokio::test]
async fn test_link_creates_dated_symlink_once() {
    let fx = Fixture::new();
    let file = fx.add_original("DSC_0001.NEF");

    let files = fx.catalog.originals().await.unwrap();
    assert_eq!(files, vec![file.clone()]);

    let report = fx.catalog.link(files.clone(), 0).await.unwrap();
    assert_eq!(report.files, 1);

    let record = fx.catalog.store().load(&file).await.unwrap();
    assert_eq!(record.created_time(), created());
    assert_eq!(record.base_filename, file.filename());

    let expected = nice_path(&fx.collection, &file, &record);
    let meta = std::fs::symlink_metadata(&expected).unwrap();
    assert!(meta.file_type().is_symlink());

    fx.catalog.link(files, 0).await.unwrap();
    assert_eq!(fx.only_link(&file).await, expected);
}

#[tokio::test]
async fn test_sync_creates_stub_profiles_and_unedited_tracks_edits() {
    let fx = Fixture::new();
    let file = fx.add_original("DSC_0001.NEF");
    let files = fx.linked().await;

    let link = fx.only_link(&file).await;
    assert!(pp3_path(&link).exists());
    assert_eq!(fx.catalog.unedited(&files).await.unwrap(), vec![file.clone()]);
    assert!(!fx.catalog.check_convert(&file, &[1920]).await.unwrap());

    edit_profile(&link);

    assert!(fx.catalog.unedited(&files).await.unwrap().is_empty());
    assert!(fx.catalog.check_convert(&file, &[1920]).await.unwrap());
}

#[tokio::test]
async fn test_unlinked_files_are_not_unedited() {
    let fx = Fixture::new();
    fx.add_original("DSC_0001.NEF");
    let files = fx.catalog.originals().await.unwrap();

    assert!(fx.catalog.unedited(&files).await.unwrap().is_empty());
}

// ============================================================================
// Conversion and upload
// ============================================================================

#[tokio::test]
async fn test_convert_then_upload() {
    let mut service = MockService::new();
    service
        .expect_create_upload_token()
        .times(1)
        .returning(|name, mime, body| {
            assert!(name.ends_with(".jpg"));
            assert_eq!(mime, "image/jpeg");
            assert_eq!(&body[..], b"\xff\xd8jpeg");
            Ok("tok-1".to_string())
        });
    service
        .expect_commit_batch()
        .times(1)
        .returning(|items| {
            assert_eq!(items.len(), 1);
            assert!(items[0].description.starts_with("sha512:"));
            assert!(items[0].description.contains("RAW:0000000000004-DSC_0001.NEF"));
            assert!(items[0].description.ends_with("+travel"));
            Ok(accepted(items))
        });

    let fx = Fixture::with_service(Some(Arc::new(service)));
    let file = fx.add_original("DSC_0001.NEF");
    let files = fx.linked().await;
    let link = fx.only_link(&file).await;
    edit_profile(&link);

    fx.catalog
        .tags_add(files.clone(), vec!["travel".into()], 0)
        .await
        .unwrap();

    let report = fx.catalog.convert(files.clone(), vec![1920], 0).await.unwrap();
    assert_eq!(report.actions, 1);
    assert!(!fx.catalog.check_convert(&file, &[1920]).await.unwrap());

    let rel = link.parent().unwrap().strip_prefix(&fx.collection).unwrap();
    let stem = link.file_stem().unwrap().to_string_lossy();
    let key = rel.join("1920").join(format!("{}.jpg", stem));
    let record = fx.catalog.store().load(&file).await.unwrap();
    assert!(record
        .conv
        .contains_key(key.to_string_lossy().as_ref()));
    assert!(fx.converted.join(&key).exists());
    assert_eq!(fx.converter.outputs.lock().unwrap().len(), 1);

    let mut events = fx.catalog.subscribe();
    let results = fx.catalog.upload(&files, &[1920]).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].media_item_id.as_deref(), Some("id-tok-1"));

    let mut progress = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let CoreEvent::Upload(UploadEvent::Progress { uploaded, total }) = event {
            progress.push((uploaded, total));
        }
    }
    assert_eq!(progress, vec![(1, 1)]);
}

#[tokio::test]
async fn test_upload_skips_other_sizes() {
    let mut service = MockService::new();
    service.expect_create_upload_token().times(0);
    service.expect_commit_batch().times(0);

    let fx = Fixture::with_service(Some(Arc::new(service)));
    let file = fx.add_original("DSC_0001.NEF");
    let files = fx.linked().await;
    edit_profile(&fx.only_link(&file).await);
    fx.catalog.convert(files.clone(), vec![1920], 0).await.unwrap();

    let results = fx.catalog.upload(&files, &[3840]).await.unwrap();
    assert!(results.is_empty());
}

#[tokio::test]
async fn test_upload_without_service_is_capability_missing() {
    let fx = Fixture::new();
    let files = vec![fx.add_original("DSC_0001.NEF")];

    match fx.catalog.upload(&files, &[1920]).await {
        Err(CoreError::CapabilityMissing { capability, .. }) => {
            assert_eq!(capability, "PhotoService");
        }
        other => panic!("unexpected result: {:?}", other),
    }
}

#[tokio::test]
async fn test_convert_requires_sizes() {
    let fx = Fixture::new();
    let files = vec![fx.add_original("DSC_0001.NEF")];

    let err = fx.catalog.convert(files, Vec::new(), 0).await.unwrap_err();
    assert!(matches!(err, CoreError::Sync(SyncError::NoSizes)));
}

// ============================================================================
// Tags, exec, cleanup
// ============================================================================

#[tokio::test]
async fn test_tags_add_and_remove() {
    let fx = Fixture::new();
    let file = fx.add_original("DSC_0001.NEF");
    let files = fx.linked().await;

    let report = fx
        .catalog
        .tags_add(files.clone(), vec!["b".into(), "a".into()], 0)
        .await
        .unwrap();
    assert_eq!(report.actions, 1);
    let record = fx.catalog.store().load(&file).await.unwrap();
    assert_eq!(record.tags.0, vec!["a".to_string(), "b".to_string()]);

    let report = fx
        .catalog
        .tags_remove(files.clone(), vec!["a".into(), "zzz".into()], 0)
        .await
        .unwrap();
    assert_eq!(report.actions, 1);
    let record = fx.catalog.store().load(&file).await.unwrap();
    assert_eq!(record.tags.0, vec!["b".to_string()]);

    let report = fx
        .catalog
        .tags_remove(files, vec!["zzz".into()], 0)
        .await
        .unwrap();
    assert_eq!(report.actions, 0);
}

#[tokio::test]
async fn test_exec_substitutes_file_path() {
    let fx = Fixture::new();
    let file = fx.add_original("DSC_0001.NEF");
    let files = fx.catalog.originals().await.unwrap();

    let command = ExternalCommand::new(
        "sh",
        vec!["-c".into(), "touch \"$0.done\"".into(), "{}".into()],
    );
    let report = fx.catalog.exec(files, command, 0).await.unwrap();
    assert_eq!(report.actions, 1);

    let marker = format!("{}.done", file.path().display());
    assert!(Path::new(&marker).exists());
}

#[tokio::test]
async fn test_exec_failure_fails_run() {
    let fx = Fixture::new();
    fx.add_original("DSC_0001.NEF");
    let files = fx.catalog.originals().await.unwrap();

    let command = ExternalCommand::new("sh", vec!["-c".into(), "exit 4".into()]);
    let err = fx.catalog.exec(files, command, 0).await.unwrap_err();
    assert!(matches!(err, CoreError::Sync(SyncError::Bridge(_))));
}

#[tokio::test]
async fn test_cleanup_of_deleted_photo() {
    let fx = Fixture::new();
    let file = fx.add_original("DSC_0001.NEF");
    let files = fx.linked().await;
    edit_profile(&fx.only_link(&file).await);
    fx.catalog.convert(files.clone(), vec![1920], 0).await.unwrap();

    assert!(fx.catalog.cleanup(&files, -1).await.unwrap().is_empty());

    let mut record = fx.catalog.store().load(&file).await.unwrap();
    let output = fx.converted.join(record.conv.keys().next().unwrap());
    record.deleted = true;
    fx.catalog.store().save(&file, &record).await.unwrap();

    let unused = fx.catalog.cleanup(&files, -1).await.unwrap();
    assert!(unused.contains(&output));

    fx.catalog.do_cleanup(&unused).await.unwrap();
    assert!(!output.exists());
    assert!(fx.converted.exists());
    assert!(fx.collection.exists());
    assert!(fx.catalog.store().load(&file).await.unwrap().conv.is_empty());
}

// ============================================================================
// Finished outputs and previews
// ============================================================================

#[tokio::test]
async fn test_fixup_exif_only_queues_converted_files() {
    let fx = Fixture::new();
    let edited = fx.add_original("DSC_0001.NEF");
    fx.add_original("DSC_0002.NEF");
    let files = fx.linked().await;
    edit_profile(&fx.only_link(&edited).await);
    fx.catalog.convert(files.clone(), vec![1920], 0).await.unwrap();

    let report = fx.catalog.fixup_exif(files, 1).await.unwrap();
    assert_eq!(report.files, 2);
    assert_eq!(report.actions, 1);
}

#[tokio::test]
async fn test_update_locations_records_place_once() {
    let mut timeline = MockTimeline::new();
    timeline
        .expect_place_at()
        .withf(|at| *at == created())
        .returning(|_| {
            Ok(Some(Place {
                lat: 51.05,
                lng: 3.72,
                name: "Korenmarkt".into(),
                address: "9000 Gent".into(),
            }))
        });

    let fx = Fixture::with_lookup(Arc::new(timeline));
    let file = fx.add_original("DSC_0001.NEF");
    let files = fx.linked().await;

    let report = fx.catalog.update_locations(files.clone(), 0).await.unwrap();
    assert_eq!(report.actions, 1);
    let location = fx.catalog.store().load(&file).await.unwrap().location.unwrap();
    assert_eq!((location.lat, location.lng), (51.05, 3.72));
    assert_eq!(location.name, "Korenmarkt");

    let report = fx.catalog.update_locations(files, 0).await.unwrap();
    assert_eq!(report.actions, 0);
}

#[tokio::test]
async fn test_update_locations_without_lookup_is_capability_missing() {
    let fx = Fixture::new();
    let files = vec![fx.add_original("DSC_0001.NEF")];

    match fx.catalog.update_locations(files, 0).await {
        Err(CoreError::CapabilityMissing { capability, .. }) => {
            assert_eq!(capability, "LocationLookup");
        }
        other => panic!("unexpected result: {:?}", other),
    }
}

#[tokio::test]
async fn test_previews_for_stills_only() {
    let fx = Fixture::new();
    let still = fx.add_original("DSC_0001.NEF");
    let video = fx.add_original("MOV_0001.mov");
    let files = fx.catalog.originals().await.unwrap();

    let report = fx.catalog.previews(files.clone(), 0).await.unwrap();
    assert_eq!(report.actions, 1);
    assert!(preview_path(&still).exists());
    assert!(!preview_path(&video).exists());

    let report = fx.catalog.previews(files, 0).await.unwrap();
    assert_eq!(report.actions, 0);
    assert_eq!(fx.converter.outputs.lock().unwrap().len(), 1);
}

// ============================================================================
// Cancellation
// ============================================================================

#[tokio::test]
async fn test_cancelled_catalog_refuses_runs() {
    let fx = Fixture::new();
    fx.add_original("DSC_0001.NEF");
    let files = fx.catalog.originals().await.unwrap();

    fx.catalog.cancel();

    let err = fx.catalog.link(files.clone(), 0).await.unwrap_err();
    assert!(err.is_cancelled());
    let err = fx.catalog.unedited(&files).await.unwrap_err();
    assert!(err.is_cancelled());
}
