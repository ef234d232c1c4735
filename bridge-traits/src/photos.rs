//! Remote Photo Service Abstraction
//!
//! Two-step upload protocol: raw bytes are exchanged for an upload token,
//! then tokens are committed in batches as media items.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A media item to create from a previously obtained upload token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMediaItem {
    pub upload_token: String,
    pub file_name: String,
    pub description: String,
}

/// Outcome of one item in a commit call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaItemResult {
    pub upload_token: String,
    /// Zero means success.
    pub status_code: i32,
    pub status_message: String,
    pub media_item_id: Option<String>,
    pub file_name: Option<String>,
}

impl MediaItemResult {
    pub fn is_success(&self) -> bool {
        self.status_code == 0
    }
}

/// Remote photo library client.
///
/// # Example
///
/// ```ignore
/// let token = service.create_upload_token("a.jpg", "image/jpeg", bytes).await?;
/// let results = service.commit_batch(vec![NewMediaItem {
///     upload_token: token,
///     file_name: "a.jpg".into(),
///     description: String::new(),
/// }]).await?;
/// ```
#[async_trait]
pub trait PhotoService: Send + Sync {
    /// Upload raw bytes and return the opaque upload token.
    async fn create_upload_token(&self, name: &str, mime: &str, body: Bytes) -> Result<String>;

    /// Create media items for up to one batch of tokens.
    async fn commit_batch(&self, items: Vec<NewMediaItem>) -> Result<Vec<MediaItemResult>>;
}

/// Supplies bearer tokens. OAuth flows live outside the catalog.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn access_token(&self) -> Result<String>;
}

/// Credential provider backed by a token obtained elsewhere.
#[derive(Clone)]
pub struct StaticCredentialProvider {
    token: String,
}

impl StaticCredentialProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl std::fmt::Debug for StaticCredentialProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticCredentialProvider")
            .field("token", &"[REDACTED]")
            .finish()
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentialProvider {
    async fn access_token(&self) -> Result<String> {
        Ok(self.token.clone())
    }
}
