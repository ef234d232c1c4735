//! Error types for the Google Photos provider

use bridge_traits::error::BridgeError;
use thiserror::Error;

/// Google Photos provider errors
#[derive(Error, Debug)]
pub enum PhotosError {
    /// Authentication failed or token is invalid
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// API request returned an error
    #[error("Google Photos API error (status {status_code}): {message}")]
    ApiError { status_code: u16, message: String },

    /// Failed to parse API response
    #[error("Failed to parse API response: {0}")]
    ParseError(String),

    /// Commit called without items
    #[error("Batch contains no media items")]
    EmptyBatch,

    /// Bridge error
    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

/// Result type for Google Photos operations
pub type Result<T> = std::result::Result<T, PhotosError>;

impl From<PhotosError> for BridgeError {
    fn from(error: PhotosError) -> Self {
        match error {
            PhotosError::Bridge(e) => e,
            other => BridgeError::OperationFailed(other.to_string()),
        }
    }
}
