//! Google Photos Library API request and response types
//!
//! Only the fields the uploader reads or writes are modelled.

use serde::{Deserialize, Serialize};

/// `mediaItems:batchCreate` request body
///
/// See: https://developers.google.com/photos/library/reference/rest/v1/mediaItems/batchCreate
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchCreateRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub album_id: Option<String>,

    pub new_media_items: Vec<NewMediaItemBody>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMediaItemBody {
    pub description: String,
    pub simple_media_item: SimpleMediaItem,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimpleMediaItem {
    pub upload_token: String,
    pub file_name: String,
}

/// `mediaItems:batchCreate` response body
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchCreateResponse {
    #[serde(default)]
    pub new_media_item_results: Vec<NewMediaItemResultBody>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMediaItemResultBody {
    #[serde(default)]
    pub upload_token: String,

    #[serde(default)]
    pub status: Status,

    pub media_item: Option<MediaItemBody>,
}

/// google.rpc.Status. A missing code means success.
#[derive(Debug, Default, Deserialize)]
pub struct Status {
    #[serde(default)]
    pub code: i32,

    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaItemBody {
    pub id: String,

    #[serde(default)]
    pub filename: Option<String>,
}
