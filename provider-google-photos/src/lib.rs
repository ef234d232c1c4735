//! # Google Photos Provider
//!
//! Implements `PhotoService` for the Google Photos Library API v1.
//!
//! ## Overview
//!
//! This module provides:
//! - Raw byte uploads to `/v1/uploads`, returning an upload token
//! - Batched media item creation through `/v1/mediaItems:batchCreate`
//! - Optional album targeting for created items
//! - Bearer tokens from a `CredentialProvider` on every request
//! - Retry with exponential backoff through the host `HttpClient`

pub mod connector;
pub mod error;
pub mod types;

pub use connector::GooglePhotosConnector;
pub use error::{PhotosError, Result};
