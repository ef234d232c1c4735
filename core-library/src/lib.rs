//! # Photo Library Module
//!
//! Owns the on-disk catalog: originals in the raw directory, their `.meta`
//! records, and the collection tree of symlinks with editor sidecars.
//!
//! ## Overview
//!
//! This module manages:
//! - Photo file naming (`<size>-<name>`) and kinds
//! - The binary meta record format, with read support for older layouts
//! - RawTherapee profiles (`.pp3`) and pipeline scripts (`.pho`)
//! - The link index over the collection directory

pub mod error;
pub mod link_index;
pub mod meta_store;
pub mod models;
pub mod originals;
pub mod pp3;
pub mod script;
pub mod sidecar;

pub use error::{LibraryError, Result};
pub use link_index::{nice_path, relative_path, LinkIndex, LinkInfo};
pub use meta_store::{checksum, load_meta, save_meta, MetaStore};
pub use models::{Converted, FileKind, Location, MetaRecord, PhotoFile, Tags};
pub use originals::list_originals;
pub use pp3::Pp3;
pub use script::ScriptSidecar;
pub use sidecar::{pp3_path, script_path, Sidecar};
