//! Workspace placeholder crate.
//!
//! This crate exists to expose shared feature flags that map to the individual
//! workspace crates (e.g., `core-service`). Host applications can depend on
//! `photos-workspace` and enable `desktop-shims` to get the catalog wired to
//! the desktop tool implementations.

#[cfg(feature = "desktop-shims")]
pub use core_service::*;
