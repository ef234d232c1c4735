use bridge_traits::error::BridgeError;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LibraryError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid meta file {path}: {message}")]
    InvalidMeta { path: PathBuf, message: String },

    #[error("Meta version mismatch in {path}: found {found:?}, expected {expected:?}")]
    MetaVersion {
        path: PathBuf,
        found: [u8; 2],
        expected: [u8; 2],
    },

    #[error("Legacy JSON meta {path} could not be parsed: {source}")]
    LegacyJson {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid photo filename: {0}")]
    InvalidFilename(String),

    #[error("Sidecar {path}: {message}")]
    Sidecar { path: PathBuf, message: String },

    #[error("Link error: {0}")]
    Link(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),
}

impl LibraryError {
    pub fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        LibraryError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn sidecar(path: impl AsRef<Path>, message: impl Into<String>) -> Self {
        LibraryError::Sidecar {
            path: path.as_ref().to_path_buf(),
            message: message.into(),
        }
    }

    /// True when the underlying cause is a missing file.
    pub fn is_not_found(&self) -> bool {
        match self {
            LibraryError::Io { source, .. } => source.kind() == io::ErrorKind::NotFound,
            LibraryError::Bridge(BridgeError::Io(source)) => {
                source.kind() == io::ErrorKind::NotFound
            }
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, LibraryError>;
