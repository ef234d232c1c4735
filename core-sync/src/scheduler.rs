//! # Work Scheduler
//!
//! Bounded two-phase batch runner behind every catalog operation.
//!
//! ## Phases
//!
//! 1. **Visit**: a pool of workers pulls files from a bounded channel and
//!    hands each one to a [`Visitor`]. A visit may return an [`Action`] to
//!    run later, or nothing.
//! 2. **Execute**: a second pool drains the queued actions through an
//!    [`ActionExecutor`].
//!
//! Progress counts every file once: in the visit phase when it produced no
//! action, in the execute phase when its action finished. The reported
//! count never decreases and ends at the file total.
//!
//! ## Failure and cancellation
//!
//! The first error stops the producer and every worker at its next pull;
//! work already started finishes. A failed visit phase skips the execute
//! phase.
//!
//! Cancellation through the scheduler's token also stops the visit phase at
//! the next pull, but the actions already queued are still executed before
//! the run returns [`SyncError::Cancelled`]. A cancellation during the
//! execute phase stops it at the next pull.

use async_trait::async_trait;
use core_library::{MetaRecord, PhotoFile};
use core_runtime::events::{percent, BatchEvent, BatchPhase, CoreEvent, EventBus};
use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use crate::error::{Result, SyncError};

// ============================================================================
// Actions
// ============================================================================

/// A command line run once per file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl ExternalCommand {
    /// Placeholder replaced by the file path in every argument.
    pub const PLACEHOLDER: &'static str = "{}";

    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Substitutes `file`'s path for [`Self::PLACEHOLDER`].
    pub fn for_file(&self, file: &PhotoFile) -> Self {
        let path = file.path().to_string_lossy().into_owned();
        Self {
            program: self.program.clone(),
            args: self
                .args
                .iter()
                .map(|a| a.replace(Self::PLACEHOLDER, &path))
                .collect(),
        }
    }
}

/// Deferred work produced by the visit phase.
#[derive(Debug, Clone)]
pub enum Action {
    /// Write a record.
    Save { file: PhotoFile, record: MetaRecord },
    /// Remove a file.
    Delete(PathBuf),
    /// Run an external command.
    RunExternal(ExternalCommand),
    /// Regenerate conversions at the given sizes.
    Convert { file: PhotoFile, sizes: Vec<u32> },
    /// Create a collection link.
    Link(PhotoFile),
    /// Reconcile a record with its sidecars.
    SyncSidecars(PhotoFile),
    /// Rebuild a record's tag-derived fields.
    RewriteMeta(PhotoFile),
    /// Rerun the timezone correction on existing outputs.
    FixupExif(PhotoFile),
    /// Save a record with a new location and stamp it into existing outputs.
    UpdateLocation { file: PhotoFile, record: MetaRecord },
    /// Develop a preview next to the original.
    Preview(PhotoFile),
}

impl Action {
    pub fn kind(&self) -> &'static str {
        match self {
            Action::Save { .. } => "save",
            Action::Delete(_) => "delete",
            Action::RunExternal(_) => "run-external",
            Action::Convert { .. } => "convert",
            Action::Link(_) => "link",
            Action::SyncSidecars(_) => "sync-sidecars",
            Action::RewriteMeta(_) => "rewrite-meta",
            Action::FixupExif(_) => "fixup-exif",
            Action::UpdateLocation { .. } => "update-location",
            Action::Preview(_) => "preview",
        }
    }
}

/// Phase one: inspects a file and decides what to do with it.
#[async_trait]
pub trait Visitor: Send + Sync {
    async fn visit(&self, file: &PhotoFile) -> Result<Option<Action>>;
}

/// Phase two: carries out one action.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn execute(&self, action: Action) -> Result<()>;
}

// ============================================================================
// Scheduler
// ============================================================================

/// Outcome of a successful run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunReport {
    pub files: usize,
    pub actions: usize,
}

/// Worker count for a run: `requested`, or `available` when below one,
/// capped at `max`. Never zero.
pub fn worker_count(requested: i64, available: usize, max: usize) -> usize {
    let wanted = if requested < 1 {
        available
    } else {
        requested as usize
    };
    wanted.min(max).max(1)
}

pub struct WorkScheduler {
    max_workers: usize,
    event_bus: Option<EventBus>,
    cancel: CancellationToken,
}

impl WorkScheduler {
    pub fn new(max_workers: usize) -> Self {
        Self {
            max_workers: max_workers.max(1),
            event_bus: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Runs `visitor` over `files` with up to `requested` workers (all
    /// available parallelism when below one), then executes the queued
    /// actions.
    #[instrument(skip(self, files, visitor, executor), fields(files = files.len()))]
    pub async fn run(
        &self,
        operation: &str,
        requested: i64,
        files: Vec<PhotoFile>,
        visitor: Arc<dyn Visitor>,
        executor: Arc<dyn ActionExecutor>,
    ) -> Result<RunReport> {
        let available = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let workers = worker_count(requested, available, self.max_workers);
        let total = files.len();
        let progress = Arc::new(Progress::new(total, self.event_bus.clone()));
        let started = Instant::now();

        info!(operation, workers, total, batch_id = %progress.batch_id, "batch started");
        progress.emit(BatchEvent::Started {
            batch_id: progress.batch_id.clone(),
            operation: operation.to_string(),
            total,
        });

        let actions: Arc<Mutex<Vec<Action>>> = Arc::new(Mutex::new(Vec::new()));
        let visit = {
            let actions = actions.clone();
            let progress = progress.clone();
            move |file: PhotoFile| {
                let visitor = visitor.clone();
                let actions = actions.clone();
                let progress = progress.clone();
                async move {
                    match visitor.visit(&file).await? {
                        Some(action) => actions.lock().await.push(action),
                        None => progress.advance(BatchPhase::Visit),
                    }
                    Ok::<(), SyncError>(())
                }
            }
        };

        let cancelled = match pool(workers, files, &self.cancel, visit).await {
            Ok(()) => false,
            Err(SyncError::Cancelled) => true,
            Err(e) => return Err(self.fail(&progress, e)),
        };

        let actions = std::mem::take(&mut *actions.lock().await);
        let queued = actions.len();
        debug!(queued, cancelled, "visit phase done");

        let execute = {
            let progress = progress.clone();
            move |action: Action| {
                let executor = executor.clone();
                let progress = progress.clone();
                async move {
                    executor.execute(action).await?;
                    progress.advance(BatchPhase::Execute);
                    Ok::<(), SyncError>(())
                }
            }
        };

        // Actions queued before a cancellation still run, on a token of their own.
        let drain = if cancelled {
            CancellationToken::new()
        } else {
            self.cancel.clone()
        };
        if let Err(e) = pool(workers, actions, &drain, execute).await {
            return Err(self.fail(&progress, e));
        }
        if cancelled {
            return Err(self.fail(&progress, SyncError::Cancelled));
        }

        let duration = started.elapsed().as_secs_f64();
        info!(
            operation,
            processed = progress.processed(),
            actions = queued,
            duration_secs = duration,
            "batch completed"
        );
        progress.emit(BatchEvent::Completed {
            batch_id: progress.batch_id.clone(),
            processed: progress.processed(),
            actions: queued,
            duration_secs: duration,
        });

        Ok(RunReport {
            files: total,
            actions: queued,
        })
    }

    fn fail(&self, progress: &Progress, err: SyncError) -> SyncError {
        let processed = progress.processed();
        match &err {
            SyncError::Cancelled => {
                info!(processed, "batch cancelled");
                progress.emit(BatchEvent::Cancelled {
                    batch_id: progress.batch_id.clone(),
                    processed,
                });
            }
            other => {
                error!(processed, error = %other, "batch failed");
                progress.emit(BatchEvent::Failed {
                    batch_id: progress.batch_id.clone(),
                    message: other.to_string(),
                    processed,
                });
            }
        }
        err
    }
}

impl std::fmt::Debug for WorkScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkScheduler")
            .field("max_workers", &self.max_workers)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Progress
// ============================================================================

struct Progress {
    batch_id: String,
    total: usize,
    processed: AtomicUsize,
    event_bus: Option<EventBus>,
}

impl Progress {
    fn new(total: usize, event_bus: Option<EventBus>) -> Self {
        Self {
            batch_id: Uuid::new_v4().to_string(),
            total,
            processed: AtomicUsize::new(0),
            event_bus,
        }
    }

    fn processed(&self) -> usize {
        self.processed.load(Ordering::SeqCst)
    }

    fn advance(&self, phase: BatchPhase) {
        let processed = self.processed.fetch_add(1, Ordering::SeqCst) + 1;
        self.emit(BatchEvent::Progress {
            batch_id: self.batch_id.clone(),
            processed,
            total: self.total,
            percent: percent(processed, self.total),
            phase,
        });
    }

    fn emit(&self, event: BatchEvent) {
        if let Some(bus) = &self.event_bus {
            bus.emit(CoreEvent::Batch(event)).ok();
        }
    }
}

// ============================================================================
// Worker pool
// ============================================================================

/// Feeds `items` through a bounded channel to `workers` tasks running
/// `work`. Stops pulling on the first error or on cancellation of `cancel`,
/// and waits for running items before returning.
async fn pool<T, F, Fut>(
    workers: usize,
    items: Vec<T>,
    cancel: &CancellationToken,
    work: F,
) -> Result<()>
where
    T: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let abort = cancel.child_token();
    let (tx, rx) = mpsc::channel::<T>(workers);
    let rx = Arc::new(Mutex::new(rx));
    let work = Arc::new(work);
    let first_error: Arc<Mutex<Option<SyncError>>> = Arc::new(Mutex::new(None));

    let mut set = JoinSet::new();
    for _ in 0..workers {
        let rx = rx.clone();
        let work = work.clone();
        let abort = abort.clone();
        let first_error = first_error.clone();
        set.spawn(async move {
            loop {
                let next = {
                    let mut rx = rx.lock().await;
                    tokio::select! {
                        biased;
                        _ = abort.cancelled() => None,
                        item = rx.recv() => item,
                    }
                };
                let Some(item) = next else { break };

                if let Err(e) = work(item).await {
                    first_error.lock().await.get_or_insert(e);
                    abort.cancel();
                    break;
                }
            }
        });
    }

    for item in items {
        tokio::select! {
            biased;
            _ = abort.cancelled() => break,
            sent = tx.send(item) => {
                if sent.is_err() {
                    break;
                }
            }
        }
    }
    drop(tx);

    while let Some(joined) = set.join_next().await {
        if let Err(e) = joined {
            first_error
                .lock()
                .await
                .get_or_insert(SyncError::Worker(e.to_string()));
        }
    }

    if let Some(e) = first_error.lock().await.take() {
        return Err(e);
    }
    if cancel.is_cancelled() {
        return Err(SyncError::Cancelled);
    }
    Ok(())
}
