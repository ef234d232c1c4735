use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Core initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Capability missing: {capability} - {message}")]
    CapabilityMissing { capability: String, message: String },

    #[error("Runtime error: {0}")]
    Runtime(#[from] core_runtime::Error),

    #[error("Sync error: {0}")]
    Sync(#[from] core_sync::SyncError),

    #[error("Library error: {0}")]
    Library(#[from] core_library::LibraryError),

    #[error("Bridge error: {0}")]
    Bridge(#[from] bridge_traits::BridgeError),
}

impl CoreError {
    pub(crate) fn missing(capability: &str, message: impl Into<String>) -> Self {
        CoreError::CapabilityMissing {
            capability: capability.to_string(),
            message: message.into(),
        }
    }

    /// Whether the operation stopped because it was cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CoreError::Sync(core_sync::SyncError::Cancelled))
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
