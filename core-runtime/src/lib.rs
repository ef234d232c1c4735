//! # Core Runtime Module
//!
//! Provides foundational runtime infrastructure for the photo catalog:
//! - Logging and tracing infrastructure
//! - Configuration management
//! - Event bus for batch and upload progress
//!
//! ## Overview
//!
//! This crate contains the runtime utilities that every other catalog crate
//! depends on. It fixes the logging conventions, the validated
//! [`CatalogConfig`](config::CatalogConfig) and the progress events that
//! long library-wide passes broadcast.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
