use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Bridge capability not available: {0}")]
    NotAvailable(String),

    #[error("Bridge operation failed: {0}")]
    OperationFailed(String),

    #[error("{tool} exited with {status}: {stderr}")]
    ExternalTool {
        tool: String,
        status: String,
        stderr: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Build an [`BridgeError::ExternalTool`] from a finished process.
    pub fn external_tool(
        tool: impl Into<String>,
        status: impl std::fmt::Display,
        stderr: &[u8],
    ) -> Self {
        BridgeError::ExternalTool {
            tool: tool.into(),
            status: status.to_string(),
            stderr: String::from_utf8_lossy(stderr).trim().to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
