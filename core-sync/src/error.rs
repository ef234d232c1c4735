use bridge_traits::error::BridgeError;
use core_library::LibraryError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Library error: {0}")]
    Library(LibraryError),

    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),

    #[error("Conversion to {path} failed: {source}")]
    Conversion {
        path: PathBuf,
        #[source]
        source: BridgeError,
    },

    #[error("Upload failed: {0}")]
    Upload(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Worker task failed: {0}")]
    Worker(String),

    #[error("No output sizes given")]
    NoSizes,

    #[error("No preview possible for {0}")]
    PreviewNotPossible(String),
}

impl From<LibraryError> for SyncError {
    fn from(err: LibraryError) -> Self {
        match err {
            LibraryError::Cancelled => SyncError::Cancelled,
            other => SyncError::Library(other),
        }
    }
}

impl SyncError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SyncError::Library(LibraryError::io(path.into(), source))
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
