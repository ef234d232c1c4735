//! Location History Abstraction
//!
//! Resolves where the photographer was at a given time, typically from an
//! exported location timeline.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A resolved position with its human readable place.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Place {
    pub lat: f64,
    pub lng: f64,
    pub name: String,
    pub address: String,
}

/// Looks up the position recorded closest to a capture time.
///
/// # Example
///
/// ```ignore
/// if let Some(place) = lookup.place_at(record.created_time()).await? {
///     println!("{} ({}, {})", place.name, place.lat, place.lng);
/// }
/// ```
#[async_trait]
pub trait LocationLookup: Send + Sync {
    /// `None` when the history has nothing near `at`.
    async fn place_at(&self, at: DateTime<Utc>) -> Result<Option<Place>>;
}
