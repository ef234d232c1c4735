//! Google Photos Library API connector implementation
//!
//! Implements the `PhotoService` trait on top of the host `HttpClient`.

use async_trait::async_trait;
use bridge_traits::error::Result;
use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, RetryPolicy};
use bridge_traits::photos::{CredentialProvider, MediaItemResult, NewMediaItem, PhotoService};
use bytes::Bytes;
use core_runtime::logging::{redact_if_sensitive, strip_path};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::error::PhotosError;
use crate::types::{BatchCreateRequest, BatchCreateResponse, NewMediaItemBody, SimpleMediaItem};

/// Google Photos Library API base URL
pub const PHOTOS_API_BASE: &str = "https://photoslibrary.googleapis.com";

/// Upper bound for one raw upload.
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(300);

/// Upper bound for one batch commit.
const COMMIT_TIMEOUT: Duration = Duration::from_secs(60);

/// Google Photos API connector
///
/// # Example
///
/// ```ignore
/// use provider_google_photos::GooglePhotosConnector;
/// use bridge_traits::PhotoService;
///
/// let connector = GooglePhotosConnector::new(http_client, credentials);
/// let token = connector.create_upload_token("a.jpg", "image/jpeg", bytes).await?;
/// ```
pub struct GooglePhotosConnector {
    http_client: Arc<dyn HttpClient>,
    credentials: Arc<dyn CredentialProvider>,
    base_url: String,
    album_id: Option<String>,
    retry_policy: RetryPolicy,
}

impl GooglePhotosConnector {
    pub fn new(http_client: Arc<dyn HttpClient>, credentials: Arc<dyn CredentialProvider>) -> Self {
        Self {
            http_client,
            credentials,
            base_url: PHOTOS_API_BASE.to_string(),
            album_id: None,
            retry_policy: RetryPolicy::default(),
        }
    }

    /// Overrides the API base URL (no trailing slash).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Adds created items to `album_id`.
    pub fn with_album(mut self, album_id: impl Into<String>) -> Self {
        self.album_id = Some(album_id.into());
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    async fn authorized(&self, request: HttpRequest) -> Result<HttpRequest> {
        let token = self.credentials.access_token().await?;
        debug!(
            authorization = %redact_if_sensitive("authorization", &token),
            url = %request.url,
            "Attaching credentials"
        );
        Ok(request.bearer_token(token))
    }

    /// Sends `request` and maps non-2xx responses to [`PhotosError`].
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let request = self.authorized(request).await?;
        let response = self
            .http_client
            .execute_with_retry(request, self.retry_policy.clone())
            .await?;

        if response.is_success() {
            return Ok(response);
        }

        let message = response.body_text();
        warn!(status = response.status, "Google Photos request failed");
        let error = if response.status == 401 || response.status == 403 {
            PhotosError::AuthenticationFailed(message)
        } else {
            PhotosError::ApiError {
                status_code: response.status,
                message,
            }
        };
        Err(error.into())
    }

    fn convert_results(response: BatchCreateResponse) -> Vec<MediaItemResult> {
        response
            .new_media_item_results
            .into_iter()
            .map(|result| {
                let (media_item_id, file_name) = match result.media_item {
                    Some(item) => (Some(item.id), item.filename),
                    None => (None, None),
                };
                MediaItemResult {
                    upload_token: result.upload_token,
                    status_code: result.status.code,
                    status_message: result.status.message,
                    media_item_id,
                    file_name,
                }
            })
            .collect()
    }
}

#[async_trait]
impl PhotoService for GooglePhotosConnector {
    #[instrument(skip(self, name, body), fields(file = %strip_path(name), bytes = body.len()))]
    async fn create_upload_token(&self, name: &str, mime: &str, body: Bytes) -> Result<String> {
        let request = HttpRequest::new(HttpMethod::Post, format!("{}/v1/uploads", self.base_url))
            .header("Content-Type", "application/octet-stream")
            .header("X-Goog-Upload-Content-Type", mime)
            .header("X-Goog-Upload-File-Name", name)
            .header("X-Goog-Upload-Protocol", "raw")
            .body(body)
            .timeout(UPLOAD_TIMEOUT);

        let response = self.send(request).await?;
        let token = response.body_text();
        if token.is_empty() {
            return Err(PhotosError::ParseError("empty upload token".to_string()).into());
        }

        debug!("Upload token received");
        Ok(token)
    }

    #[instrument(skip(self, items), fields(items = items.len()))]
    async fn commit_batch(&self, items: Vec<NewMediaItem>) -> Result<Vec<MediaItemResult>> {
        if items.is_empty() {
            return Err(PhotosError::EmptyBatch.into());
        }

        let body = BatchCreateRequest {
            album_id: self.album_id.clone(),
            new_media_items: items
                .into_iter()
                .map(|item| NewMediaItemBody {
                    description: item.description,
                    simple_media_item: SimpleMediaItem {
                        upload_token: item.upload_token,
                        file_name: item.file_name,
                    },
                })
                .collect(),
        };

        let request = HttpRequest::new(
            HttpMethod::Post,
            format!("{}/v1/mediaItems:batchCreate", self.base_url),
        )
        .json(&body)?
        .timeout(COMMIT_TIMEOUT);

        let response = self.send(request).await?;
        let parsed: BatchCreateResponse = serde_json::from_slice(&response.body)
            .map_err(|e| PhotosError::ParseError(e.to_string()))?;

        let results = Self::convert_results(parsed);
        info!(created = results.len(), "Media items committed");
        Ok(results)
    }
}
