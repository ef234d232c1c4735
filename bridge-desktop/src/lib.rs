//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop platforms
//! (macOS, Windows, Linux).
//!
//! ## Overview
//!
//! This crate provides production-ready implementations of the catalog's
//! collaborators on top of the usual desktop tooling:
//! - `HttpClient` using `reqwest`
//! - `Converter` running `rawtherapee-cli` for profile recipes
//! - `Converter` running an external pipeline engine for script recipes
//! - `TagReader` and `ExifRewriter` running `exiftool`
//!
//! Every external tool runs through `tokio::process`. A tool that exits
//! non-zero yields `BridgeError::ExternalTool` with its stderr; a tool that
//! is not installed yields `BridgeError::NotAvailable`.
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{ExiftoolRewriter, PipelineConverter, RawTherapeeConverter};
//!
//! let converter = RawTherapeeConverter::new("rawtherapee-cli")
//!     .with_pipeline(PipelineConverter::new("phodo"));
//! let exif = ExiftoolRewriter::new("exiftool");
//! ```

mod exiftool;
mod http;
mod pipeline;
mod process;
mod rawtherapee;

pub use exiftool::{ExiftoolRewriter, ExiftoolTagReader};
pub use http::ReqwestHttpClient;
pub use pipeline::PipelineConverter;
pub use rawtherapee::RawTherapeeConverter;
