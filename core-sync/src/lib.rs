//! # Catalog Sync Module
//!
//! Keeps the catalog's records, sidecars and derived files consistent.
//!
//! ## Overview
//!
//! This module drives every batch operation over the originals:
//! - Reconciling `.meta` records with the PP3 profiles next to their links
//! - Converting edited originals into sized JPEGs, skipping up-to-date ones
//! - Running per-file tag edits, link creation and external commands
//! - Refreshing EXIF time and location on finished outputs, and previews
//! - Collecting converted outputs and profiles that nothing refers to
//! - Uploading converted JPEGs to the photo service
//!
//! ## Components
//!
//! - **Work Scheduler** (`scheduler`): Bounded two-phase visit/execute runner with cancellation
//! - **Visitors** (`visitors`): Per-operation visit logic producing deferred actions
//! - **Actions** (`actions`): Executor for queued actions
//! - **Sidecar Sync** (`sidecar_sync`): Newest-wins reconciliation between records and profiles
//! - **Conversion Cache** (`conversion`): Content-addressed conversion of sidecar edits
//! - **Cleanup** (`cleanup`): Garbage collection under the converted and collection roots
//! - **Upload Pipeline** (`upload`): Two-stage token upload and batched commit

pub mod actions;
pub mod cleanup;
pub mod conversion;
pub mod error;
pub mod scheduler;
pub mod sidecar_sync;
pub mod upload;
pub mod visitors;

pub use actions::{run_external, CatalogExecutor};
pub use cleanup::{cleanup, do_cleanup};
pub use conversion::{digest, outputs_for_sizes, preview_path, ConversionCache, PREVIEW_SIZE};
pub use error::{Result, SyncError};
pub use scheduler::{
    worker_count, Action, ActionExecutor, ExternalCommand, RunReport, Visitor, WorkScheduler,
};
pub use sidecar_sync::{SidecarSync, SyncOutcome};
pub use upload::{describe, upload_tasks, UploadPipeline, UploadTask, MAX_BATCH_SIZE};
pub use visitors::{
    is_unedited, ConvertVisitor, EachFileVisitor, ExecVisitor, ExifFixupVisitor, LocationVisitor,
    PreviewVisitor, TagsAddVisitor, TagsRemoveVisitor,
};
