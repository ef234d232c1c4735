//! # Upload Pipeline
//!
//! Uploads converted JPEGs to the photo service in two stages.
//!
//! ## Stages
//!
//! - **A**: `parallel` workers each read a file, obtain an upload token for
//!   it and pass the token on through a bounded channel.
//! - **B**: a single task collects tokens into batches of at most 50 and
//!   commits each batch as soon as it is full, plus the remainder at the end.
//!
//! ## Errors
//!
//! The first error from either stage stops new work from being handed out.
//! Tokens already obtained keep flowing to stage B, which commits them unless
//! it failed itself, in which case it only drains the channel. Neither stage
//! can block forever on the other.

use bridge_traits::{MediaItemResult, NewMediaItem, PhotoService};
use bytes::Bytes;
use core_library::{MetaRecord, PhotoFile};
use core_runtime::events::{CoreEvent, EventBus, UploadEvent};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::conversion::outputs_for_sizes;
use crate::error::{Result, SyncError};

/// Batch limit of the media item commit endpoint.
pub const MAX_BATCH_SIZE: usize = 50;

/// One file to upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTask {
    pub path: PathBuf,
    pub description: String,
}

impl UploadTask {
    pub fn new(path: impl Into<PathBuf>, description: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            description: description.into(),
        }
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// MIME type from the extension; unknown types go up as octet streams.
    pub fn mime(&self) -> &'static str {
        mime_guess::from_path(&self.path)
            .first_raw()
            .unwrap_or("application/octet-stream")
    }
}

/// `sha512:<checksum>\nRAW:<file name>\n+tag +tag`
pub fn describe(file: &PhotoFile, record: &MetaRecord) -> String {
    format!(
        "sha512:{}\nRAW:{}\n{}",
        record.checksum,
        file.filename(),
        record.tags.unique()
    )
}

/// Upload tasks for every finished conversion of `record` at one of `sizes`.
pub fn upload_tasks(
    file: &PhotoFile,
    record: &MetaRecord,
    converted_root: &Path,
    sizes: &[u32],
) -> Vec<UploadTask> {
    let description = describe(file, record);
    outputs_for_sizes(record, sizes)
        .map(|(key, _)| UploadTask::new(converted_root.join(key), description.clone()))
        .collect()
}

struct Staged {
    task: UploadTask,
    token: String,
}

pub struct UploadPipeline {
    service: Arc<dyn PhotoService>,
    parallel: usize,
    batch_size: usize,
    event_bus: Option<EventBus>,
    cancel: CancellationToken,
}

impl UploadPipeline {
    pub fn new(service: Arc<dyn PhotoService>, parallel: usize) -> Self {
        Self {
            service,
            parallel: parallel.max(1),
            batch_size: MAX_BATCH_SIZE,
            event_bus: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Clamped to `1..=50`.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.clamp(1, MAX_BATCH_SIZE);
        self
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Uploads `tasks`, calling `on_progress(uploaded, total)` after each
    /// token. Returns the commit results of every batch.
    #[instrument(skip(self, tasks, on_progress), fields(tasks = tasks.len(), parallel = self.parallel))]
    pub async fn batch_upload<P>(
        &self,
        tasks: Vec<UploadTask>,
        on_progress: P,
    ) -> Result<Vec<MediaItemResult>>
    where
        P: Fn(usize, usize) + Send + Sync + 'static,
    {
        let total = tasks.len();
        if total == 0 {
            return Ok(Vec::new());
        }

        let abort = self.cancel.child_token();
        let first_error: Arc<Mutex<Option<SyncError>>> = Arc::new(Mutex::new(None));
        let uploaded = Arc::new(AtomicUsize::new(0));
        let on_progress = Arc::new(on_progress);

        let (work_tx, work_rx) = mpsc::channel::<UploadTask>(self.parallel);
        let work_rx = Arc::new(Mutex::new(work_rx));
        let (token_tx, token_rx) = mpsc::channel::<Staged>(MAX_BATCH_SIZE);

        let committer = tokio::spawn(commit_stage(
            self.service.clone(),
            token_rx,
            self.batch_size,
            abort.clone(),
            first_error.clone(),
            self.event_bus.clone(),
        ));

        let mut uploaders = JoinSet::new();
        for _ in 0..self.parallel {
            let service = self.service.clone();
            let work_rx = work_rx.clone();
            let token_tx = token_tx.clone();
            let abort = abort.clone();
            let first_error = first_error.clone();
            let uploaded = uploaded.clone();
            let on_progress = on_progress.clone();

            uploaders.spawn(async move {
                loop {
                    let next = {
                        let mut rx = work_rx.lock().await;
                        tokio::select! {
                            biased;
                            _ = abort.cancelled() => None,
                            task = rx.recv() => task,
                        }
                    };
                    let Some(task) = next else { break };

                    let token = match upload_one(service.as_ref(), &task).await {
                        Ok(token) => token,
                        Err(e) => {
                            warn!(path = %task.path.display(), error = %e, "upload failed");
                            first_error.lock().await.get_or_insert(e);
                            abort.cancel();
                            break;
                        }
                    };
                    on_progress(uploaded.fetch_add(1, Ordering::SeqCst) + 1, total);

                    if token_tx.send(Staged { task, token }).await.is_err() {
                        break;
                    }
                }
            });
        }
        drop(token_tx);

        for task in tasks {
            tokio::select! {
                biased;
                _ = abort.cancelled() => break,
                sent = work_tx.send(task) => {
                    if sent.is_err() {
                        break;
                    }
                }
            }
        }
        drop(work_tx);

        while let Some(joined) = uploaders.join_next().await {
            if let Err(e) = joined {
                first_error
                    .lock()
                    .await
                    .get_or_insert(SyncError::Worker(e.to_string()));
            }
        }

        let results = committer
            .await
            .map_err(|e| SyncError::Worker(e.to_string()))?;

        if let Some(e) = first_error.lock().await.take() {
            error!(error = %e, committed = results.len(), "upload stopped");
            return Err(e);
        }
        if self.cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        info!(items = results.len(), "upload finished");
        if let Some(bus) = &self.event_bus {
            bus.emit(CoreEvent::Upload(UploadEvent::Completed {
                items: results.len(),
            }))
            .ok();
        }
        Ok(results)
    }
}

impl std::fmt::Debug for UploadPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadPipeline")
            .field("parallel", &self.parallel)
            .field("batch_size", &self.batch_size)
            .finish_non_exhaustive()
    }
}

async fn upload_one(service: &dyn PhotoService, task: &UploadTask) -> Result<String> {
    let body = tokio::fs::read(&task.path)
        .await
        .map_err(|e| SyncError::io(&task.path, e))?;
    let token = service
        .create_upload_token(&task.file_name(), task.mime(), Bytes::from(body))
        .await?;
    debug!(path = %task.path.display(), "upload token received");
    Ok(token)
}

/// Stage B. Returns the results of every committed batch.
async fn commit_stage(
    service: Arc<dyn PhotoService>,
    mut tokens: mpsc::Receiver<Staged>,
    batch_size: usize,
    abort: CancellationToken,
    first_error: Arc<Mutex<Option<SyncError>>>,
    event_bus: Option<EventBus>,
) -> Vec<MediaItemResult> {
    let mut results = Vec::new();
    let mut batch: Vec<Staged> = Vec::with_capacity(batch_size);
    let mut failed = false;

    while let Some(staged) = tokens.recv().await {
        if failed {
            continue;
        }
        batch.push(staged);
        if batch.len() < batch_size {
            continue;
        }
        if let Err(e) = commit(service.as_ref(), &mut batch, &mut results, &event_bus).await {
            first_error.lock().await.get_or_insert(e);
            abort.cancel();
            failed = true;
        }
    }

    if !failed && !batch.is_empty() {
        if let Err(e) = commit(service.as_ref(), &mut batch, &mut results, &event_bus).await {
            first_error.lock().await.get_or_insert(e);
            abort.cancel();
        }
    }
    results
}

async fn commit(
    service: &dyn PhotoService,
    batch: &mut Vec<Staged>,
    results: &mut Vec<MediaItemResult>,
    event_bus: &Option<EventBus>,
) -> Result<()> {
    let items: Vec<NewMediaItem> = batch
        .drain(..)
        .map(|staged| NewMediaItem {
            upload_token: staged.token,
            file_name: staged.task.file_name(),
            description: staged.task.description,
        })
        .collect();
    let count = items.len();

    let committed = service.commit_batch(items).await?;
    if committed.is_empty() {
        return Err(SyncError::Upload(
            "commit returned no media items".to_string(),
        ));
    }
    let failure = committed
        .iter()
        .find(|r| !r.is_success())
        .map(|r| {
            format!(
                "{}: {} (status {})",
                r.file_name.as_deref().unwrap_or(&r.upload_token),
                r.status_message,
                r.status_code
            )
        });
    results.extend(committed);
    if let Some(message) = failure {
        return Err(SyncError::Upload(message));
    }

    debug!(items = count, "batch committed");
    if let Some(bus) = event_bus {
        bus.emit(CoreEvent::Upload(UploadEvent::BatchCommitted { items: count }))
            .ok();
    }
    Ok(())
}
