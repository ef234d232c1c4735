//! # Host Bridge Traits
//!
//! Collaborator interfaces the catalog core calls but never implements.
//!
//! ## Overview
//!
//! RAW development, EXIF surgery, tag extraction and the remote photo
//! library are all external services. Each one is a trait here, with a
//! desktop implementation in `bridge-desktop` and mocks in tests.
//!
//! ## Traits
//!
//! ### Media tooling
//! - [`Converter`](convert::Converter) - Develop a RAW into a JPEG from an edit recipe
//! - [`ExifRewriter`](convert::ExifRewriter) - Timezone and GPS correction on finished JPEGs
//! - [`TagReader`](tags::TagReader) - Capture time and camera info of an original
//!
//! ### Remote library
//! - [`PhotoService`](photos::PhotoService) - Upload tokens and batched media item commits
//! - [`CredentialProvider`](photos::CredentialProvider) - Opaque bearer tokens
//! - [`LocationLookup`](location::LocationLookup) - Position history by capture time
//! - [`HttpClient`](http::HttpClient) - Transport used by the service client
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//!
//! ## Error Handling
//!
//! All bridge traits use [`BridgeError`](error::BridgeError). External tool
//! failures keep the tool name, its exit status and its stderr.
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync`; the core calls them from many
//! worker tasks at once.

pub mod convert;
pub mod error;
pub mod http;
pub mod location;
pub mod photos;
pub mod tags;
pub mod time;

pub use error::BridgeError;

pub use convert::{ConversionJob, Converter, ExifRewriter, Recipe};
pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, RetryPolicy};
pub use location::{LocationLookup, Place};
pub use photos::{
    CredentialProvider, MediaItemResult, NewMediaItem, PhotoService, StaticCredentialProvider,
};
pub use tags::{CameraInfo, Fraction, TagInfo, TagReader};
pub use time::{Clock, FixedClock, LogLevel, SystemClock};
