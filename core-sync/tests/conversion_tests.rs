//! Integration tests for the conversion cache
//!
//! These tests verify:
//! - Edited profiles are converted once per size and then cached
//! - Curation-only changes (rank, trash) do not trigger a reconversion
//! - Edit changes do trigger a reconversion
//! - Shrinking the size list prunes the dropped size and keeps the rest untouched
//! - Outputs are pruned when the sidecar disappears
//! - Edited scripts take precedence over profiles
//! - A failed conversion or EXIF rewrite keeps the previous output and leaves no temp files
//! - The record's location is stamped into new and existing outputs
//! - Timezone fixups only touch outputs present on disk
//! - Previews are developed next to the original from a stub profile

#![cfg(unix)]

use async_trait::async_trait;
use bridge_traits::{
    error::Result as BridgeResult, BridgeError, ConversionJob, Converter, ExifRewriter, Recipe,
    TagInfo, TagReader,
};
use chrono::{DateTime, Utc};
use core_library::{save_meta, Converted, LinkIndex, Location, MetaRecord, MetaStore, PhotoFile};
use core_sync::{preview_path, ConversionCache, SyncError, PREVIEW_SIZE};
use mockall::mock;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

// ============================================================================
// Fakes
// ============================================================================

mock! {
    Exif {}

    #[async_trait]
    impl ExifRewriter for Exif {
        async fn rewrite_timezone(&self, jpeg: &Path, created: DateTime<Utc>) -> BridgeResult<()>;
        async fn rewrite_gps(&self, jpeg: &Path, created: DateTime<Utc>, lat: f64, lng: f64) -> BridgeResult<()>;
    }
}

mock! {
    Tags {}

    #[async_trait]
    impl TagReader for Tags {
        async fn read_tags(&self, path: &Path) -> BridgeResult<TagInfo>;
    }
}

/// Writes a placeholder JPEG for every job and remembers the jobs. While
/// `fail` is set it leaves a partial output behind and errors.
#[derive(Default)]
struct RecordingConverter {
    jobs: Mutex<Vec<ConversionJob>>,
    fail: AtomicBool,
}

impl RecordingConverter {
    fn jobs(&self) -> Vec<ConversionJob> {
        self.jobs.lock().unwrap().clone()
    }
}

#[async_trait]
impl Converter for RecordingConverter {
    async fn convert(&self, job: &ConversionJob) -> BridgeResult<()> {
        if let Recipe::Pp3 { profile } = &job.recipe {
            let text = std::fs::read_to_string(profile)?;
            assert!(text.contains(&format!("Width={}", job.size)));
        }
        if self.fail.load(Ordering::SeqCst) {
            tokio::fs::write(&job.output, b"\xff\xd8").await?;
            return Err(BridgeError::OperationFailed("developer crashed".into()));
        }
        tokio::fs::write(&job.output, b"\xff\xd8jpeg").await?;
        self.jobs.lock().unwrap().push(job.clone());
        Ok(())
    }
}

/// Fails the timezone rewrite while `fail` is set.
#[derive(Default)]
struct FlakyExif {
    fail: AtomicBool,
}

#[async_trait]
impl ExifRewriter for FlakyExif {
    async fn rewrite_timezone(&self, _jpeg: &Path, _created: DateTime<Utc>) -> BridgeResult<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(BridgeError::OperationFailed("impossible timezone correction".into()));
        }
        Ok(())
    }

    async fn rewrite_gps(&self, _jpeg: &Path, _created: DateTime<Utc>, _lat: f64, _lng: f64) -> BridgeResult<()> {
        Ok(())
    }
}

fn permissive_exif() -> MockExif {
    let mut exif = MockExif::new();
    exif.expect_rewrite_timezone().returning(|_, _| Ok(()));
    exif.expect_rewrite_gps().returning(|_, _, _, _| Ok(()));
    exif
}

// ============================================================================
// Fixtures
// ============================================================================

const EDITED: &str = "[General]\nRank=0\nInTrash=false\n\n[Exposure]\nCompensation=0.5\n";
const CREATED: i64 = 1_626_258_600;

struct Catalog {
    _tmp: TempDir,
    raw: PathBuf,
    collection: PathBuf,
    converted: PathBuf,
    converter: Arc<RecordingConverter>,
    cache: ConversionCache,
    store: MetaStore,
}

impl Catalog {
    fn new() -> Self {
        Self::with_tools(
            Arc::new(RecordingConverter::default()),
            Arc::new(permissive_exif()),
        )
    }

    fn with_tools(converter: Arc<RecordingConverter>, exif: Arc<dyn ExifRewriter>) -> Self {
        let tmp = TempDir::new().unwrap();
        let raw = tmp.path().join("raw");
        let collection = tmp.path().join("collection");
        let converted = tmp.path().join("converted");
        for dir in [&raw, &collection, &converted] {
            std::fs::create_dir_all(dir).unwrap();
        }
        let raw = raw.canonicalize().unwrap();
        let collection = collection.canonicalize().unwrap();
        let converted = converted.canonicalize().unwrap();

        let store = MetaStore::new(Arc::new(MockTags::new()));
        let cache = ConversionCache::new(
            Arc::new(LinkIndex::new(&collection)),
            store.clone(),
            converter.clone(),
            exif,
            &converted,
        );

        Self {
            _tmp: tmp,
            raw,
            collection,
            converted,
            converter,
            cache,
            store,
        }
    }

    /// A photo linked at `<collection>/2021/<link name>`.
    async fn linked_photo(&self, name: &str, link_name: &str) -> (PhotoFile, PathBuf) {
        let file = PhotoFile::new(&self.raw, 4, name);
        std::fs::write(file.path(), b"raw!").unwrap();
        let mut record = MetaRecord::new(4, name, file.filename());
        record.created = CREATED;
        save_meta(&file.meta_path(), &record).await.unwrap();

        let link = self.collection.join("2021").join(link_name);
        std::fs::create_dir_all(link.parent().unwrap()).unwrap();
        std::os::unix::fs::symlink(file.path(), &link).unwrap();
        (file, link)
    }

    fn output(&self, key: &str) -> PathBuf {
        self.converted.join(key)
    }

    async fn set_location(&self, file: &PhotoFile, lat: f64, lng: f64) {
        let mut record = self.store.load(file).await.unwrap();
        record.location = Some(Location {
            lat,
            lng,
            name: "Korenmarkt".into(),
            address: "Gent".into(),
        });
        self.store.save(file, &record).await.unwrap();
    }
}

fn leftovers(dir: &Path) -> Vec<String> {
    std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name.contains(".tmp"))
        .collect()
}

fn write_profile(link: &Path, text: &str) {
    std::fs::write(core_library::pp3_path(link), text).unwrap();
}

fn mtime(path: &Path) -> filetime::FileTime {
    filetime::FileTime::from_last_modification_time(&std::fs::metadata(path).unwrap())
}

// ============================================================================
// Cache hits and misses
// ============================================================================

#[tokio::test]
async fn test_edited_profile_is_converted_once() {
    let catalog = Catalog::new();
    let (file, link) = catalog.linked_photo("DSC_0001.NEF", "a--DSC_0001.NEF").await;
    write_profile(&link, EDITED);

    assert!(catalog.cache.check_needed(&file, &[1920, 3840]).await.unwrap());
    assert!(catalog.cache.apply(&file, &[1920, 3840]).await.unwrap());

    let jobs = catalog.converter.jobs();
    assert_eq!(jobs.len(), 2);
    assert!(jobs.iter().all(|j| j.input == link));
    assert!(catalog.output("2021/1920/a--DSC_0001.jpg").exists());
    assert!(catalog.output("2021/3840/a--DSC_0001.jpg").exists());

    let record = catalog.store.load(&file).await.unwrap();
    assert_eq!(record.conv.len(), 2);
    assert_eq!(record.conv["2021/1920/a--DSC_0001.jpg"].size, 1920);

    assert!(!catalog.cache.check_needed(&file, &[1920, 3840]).await.unwrap());
    assert!(!catalog.cache.apply(&file, &[3840, 1920]).await.unwrap());
    assert_eq!(catalog.converter.jobs().len(), 2);
}

#[tokio::test]
async fn test_stub_profile_is_not_converted() {
    let catalog = Catalog::new();
    let (file, link) = catalog.linked_photo("DSC_0001.NEF", "a--DSC_0001.NEF").await;
    write_profile(&link, "[General]\nRank=3\nInTrash=false\n");

    assert!(!catalog.cache.check_needed(&file, &[1920]).await.unwrap());
    assert!(catalog.converter.jobs().is_empty());
}

#[tokio::test]
async fn test_rank_change_keeps_cache_but_edit_change_does_not() {
    let catalog = Catalog::new();
    let (file, link) = catalog.linked_photo("DSC_0001.NEF", "a--DSC_0001.NEF").await;
    write_profile(&link, EDITED);
    catalog.cache.apply(&file, &[1920]).await.unwrap();

    write_profile(&link, &EDITED.replace("Rank=0", "Rank=5"));
    assert!(!catalog.cache.check_needed(&file, &[1920]).await.unwrap());

    write_profile(&link, &EDITED.replace("Compensation=0.5", "Compensation=1"));
    assert!(catalog.cache.check_needed(&file, &[1920]).await.unwrap());
    catalog.cache.apply(&file, &[1920]).await.unwrap();
    assert_eq!(catalog.converter.jobs().len(), 2);
}

#[tokio::test]
async fn test_missing_output_is_regenerated() {
    let catalog = Catalog::new();
    let (file, link) = catalog.linked_photo("DSC_0001.NEF", "a--DSC_0001.NEF").await;
    write_profile(&link, EDITED);
    catalog.cache.apply(&file, &[1920]).await.unwrap();

    std::fs::remove_file(catalog.output("2021/1920/a--DSC_0001.jpg")).unwrap();
    assert!(catalog.cache.check_needed(&file, &[1920]).await.unwrap());
}

#[tokio::test]
async fn test_empty_size_list_is_rejected() {
    let catalog = Catalog::new();
    let (file, _) = catalog.linked_photo("DSC_0001.NEF", "a--DSC_0001.NEF").await;

    assert!(matches!(
        catalog.cache.check_needed(&file, &[]).await,
        Err(SyncError::NoSizes)
    ));
}

// ============================================================================
// Pruning
// ============================================================================

#[tokio::test]
async fn test_shrinking_sizes_prunes_only_dropped_size() {
    let catalog = Catalog::new();
    let (file, link) = catalog.linked_photo("DSC_0001.NEF", "a--DSC_0001.NEF").await;
    write_profile(&link, EDITED);
    catalog.cache.apply(&file, &[1920, 3840]).await.unwrap();

    let kept = catalog.output("2021/1920/a--DSC_0001.jpg");
    let dropped = catalog.output("2021/3840/a--DSC_0001.jpg");
    let kept_mtime = mtime(&kept);

    assert!(catalog.cache.check_needed(&file, &[1920]).await.unwrap());
    assert!(catalog.cache.apply(&file, &[1920]).await.unwrap());

    assert!(!dropped.exists());
    assert_eq!(mtime(&kept), kept_mtime);
    assert_eq!(catalog.converter.jobs().len(), 2);

    let record = catalog.store.load(&file).await.unwrap();
    assert_eq!(
        record.conv.keys().cloned().collect::<Vec<_>>(),
        vec!["2021/1920/a--DSC_0001.jpg".to_string()]
    );
}

#[tokio::test]
async fn test_outputs_pruned_when_sidecar_removed() {
    let catalog = Catalog::new();
    let (file, link) = catalog.linked_photo("DSC_0001.NEF", "a--DSC_0001.NEF").await;
    write_profile(&link, EDITED);
    catalog.cache.apply(&file, &[1920]).await.unwrap();

    std::fs::remove_file(core_library::pp3_path(&link)).unwrap();
    assert!(catalog.cache.apply(&file, &[1920]).await.unwrap());

    assert!(!catalog.output("2021/1920/a--DSC_0001.jpg").exists());
    assert!(catalog.store.load(&file).await.unwrap().conv.is_empty());
}

// ============================================================================
// Scripts
// ============================================================================

#[tokio::test]
async fn test_edited_script_takes_precedence() {
    let catalog = Catalog::new();
    let (file, link) = catalog.linked_photo("DSC_0001.NEF", "a--DSC_0001.NEF").await;
    write_profile(&link, EDITED);
    let script = core_library::script_path(&link);
    std::fs::write(&script, ".convert:\n  exposure 0.5\n").unwrap();

    catalog.cache.apply(&file, &[1920]).await.unwrap();

    let jobs = catalog.converter.jobs();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].recipe, Recipe::Script { script });
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test]
async fn test_failed_conversion_keeps_previous_output() {
    let catalog = Catalog::new();
    let (file, link) = catalog.linked_photo("DSC_0001.NEF", "a--DSC_0001.NEF").await;
    write_profile(&link, EDITED);
    catalog.cache.apply(&file, &[1920]).await.unwrap();

    let key = "2021/1920/a--DSC_0001.jpg";
    let before = catalog.store.load(&file).await.unwrap().conv[key].clone();

    write_profile(&link, &EDITED.replace("Compensation=0.5", "Compensation=1"));
    catalog.converter.fail.store(true, Ordering::SeqCst);
    let err = catalog.cache.apply(&file, &[1920]).await.unwrap_err();
    assert!(matches!(err, SyncError::Conversion { .. }));

    assert_eq!(std::fs::read(catalog.output(key)).unwrap(), b"\xff\xd8jpeg");
    assert_eq!(catalog.store.load(&file).await.unwrap().conv[key], before);
    assert!(leftovers(&catalog.output("2021/1920")).is_empty());
    assert!(catalog.cache.check_needed(&file, &[1920]).await.unwrap());
}

#[tokio::test]
async fn test_failed_exif_rewrite_keeps_previous_output() {
    let exif = Arc::new(FlakyExif::default());
    let catalog = Catalog::with_tools(Arc::new(RecordingConverter::default()), exif.clone());
    let (file, link) = catalog.linked_photo("DSC_0001.NEF", "a--DSC_0001.NEF").await;
    write_profile(&link, EDITED);
    catalog.cache.apply(&file, &[1920]).await.unwrap();

    let key = "2021/1920/a--DSC_0001.jpg";
    let before = catalog.store.load(&file).await.unwrap().conv[key].clone();

    write_profile(&link, &EDITED.replace("Compensation=0.5", "Compensation=1"));
    exif.fail.store(true, Ordering::SeqCst);
    match catalog.cache.apply(&file, &[1920]).await {
        Err(SyncError::Conversion { path, .. }) => assert_eq!(path, catalog.output(key)),
        other => panic!("unexpected result: {:?}", other),
    }

    assert!(catalog.output(key).exists());
    assert_eq!(catalog.store.load(&file).await.unwrap().conv[key], before);
    assert!(leftovers(&catalog.output("2021/1920")).is_empty());
}

// ============================================================================
// Finished outputs
// ============================================================================

#[tokio::test]
async fn test_location_is_stamped_into_outputs() {
    let mut exif = MockExif::new();
    exif.expect_rewrite_timezone().returning(|_, _| Ok(()));
    exif.expect_rewrite_gps()
        .withf(|jpeg, created, lat, lng| {
            jpeg.to_string_lossy().ends_with(".tmp.jpg")
                && created.timestamp() == CREATED
                && *lat == 51.05
                && *lng == 3.72
        })
        .times(1)
        .returning(|_, _, _, _| Ok(()));
    exif.expect_rewrite_gps()
        .withf(|jpeg, _, lat, lng| {
            jpeg.ends_with("2021/1920/a--DSC_0001.jpg") && *lat == 48.86 && *lng == 2.35
        })
        .times(1)
        .returning(|_, _, _, _| Ok(()));

    let catalog = Catalog::with_tools(Arc::new(RecordingConverter::default()), Arc::new(exif));
    let (file, link) = catalog.linked_photo("DSC_0001.NEF", "a--DSC_0001.NEF").await;
    write_profile(&link, EDITED);
    catalog.set_location(&file, 51.05, 3.72).await;

    catalog.cache.apply(&file, &[1920]).await.unwrap();
    assert_eq!(catalog.converter.jobs()[0].lat_lng, Some((51.05, 3.72)));

    catalog.set_location(&file, 48.86, 2.35).await;
    let record = catalog.store.load(&file).await.unwrap();
    assert_eq!(catalog.cache.apply_location(&file, &record).await.unwrap(), 1);
}

#[tokio::test]
async fn test_fixup_skips_missing_outputs() {
    let mut exif = MockExif::new();
    exif.expect_rewrite_timezone()
        .withf(|jpeg, _| jpeg.to_string_lossy().ends_with(".tmp.jpg"))
        .times(1)
        .returning(|_, _| Ok(()));
    exif.expect_rewrite_timezone()
        .withf(|jpeg, created| {
            jpeg.ends_with("2021/1920/a--DSC_0001.jpg") && created.timestamp() == CREATED
        })
        .times(1)
        .returning(|_, _| Ok(()));

    let catalog = Catalog::with_tools(Arc::new(RecordingConverter::default()), Arc::new(exif));
    let (file, link) = catalog.linked_photo("DSC_0001.NEF", "a--DSC_0001.NEF").await;
    write_profile(&link, EDITED);
    catalog.cache.apply(&file, &[1920]).await.unwrap();

    let mut record = catalog.store.load(&file).await.unwrap();
    record.conv.insert(
        "2021/3840/a--DSC_0001.jpg".into(),
        Converted {
            hash: "gone".into(),
            size: 3840,
        },
    );
    assert_eq!(catalog.cache.fixup_timezones(&file, &record).await.unwrap(), 1);
}

// ============================================================================
// Previews
// ============================================================================

#[tokio::test]
async fn test_preview_is_developed_next_to_original() {
    let catalog = Catalog::new();
    let (file, _) = catalog.linked_photo("DSC_0001.NEF", "a--DSC_0001.NEF").await;
    assert!(!catalog.cache.has_preview(&file).await.unwrap());

    catalog.cache.make_preview(&file).await.unwrap();

    let jobs = catalog.converter.jobs();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].input, file.path());
    assert_eq!(jobs[0].size, PREVIEW_SIZE);
    assert!(matches!(jobs[0].recipe, Recipe::Pp3 { .. }));

    assert!(preview_path(&file).exists());
    assert!(catalog.cache.has_preview(&file).await.unwrap());
    assert!(leftovers(&catalog.raw).is_empty());
}

#[tokio::test]
async fn test_preview_not_possible_for_video() {
    let catalog = Catalog::new();
    let (file, _) = catalog.linked_photo("MOV_0001.mov", "a--MOV_0001.mov").await;

    assert!(matches!(
        catalog.cache.make_preview(&file).await,
        Err(SyncError::PreviewNotPossible(_))
    ));
    assert!(catalog.converter.jobs().is_empty());
}
