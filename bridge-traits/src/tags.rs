//! Tag Reader Abstraction
//!
//! The catalog never parses EXIF or container metadata itself. A [`TagReader`]
//! reports the capture time and camera details of an original file.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::error::Result;

/// Numerator/denominator pair as stored in EXIF rationals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fraction(pub u32, pub u32);

impl Fraction {
    pub fn is_nil(&self) -> bool {
        self.0 == 0 || self.1 == 0
    }

    pub fn as_f64(&self) -> f64 {
        if self.is_nil() {
            return 0.0;
        }
        self.0 as f64 / self.1 as f64
    }
}

impl fmt::Display for Fraction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == 0 {
            return write!(f, "0");
        }
        if self.1 == 1 {
            return write!(f, "{}", self.0);
        }
        write!(f, "{}/{}", self.0, self.1)
    }
}

/// Camera body, lens and exposure of a capture.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraInfo {
    pub make: String,
    pub model: String,
    pub lens_make: String,
    pub lens_model: String,
    pub aperture: Fraction,
    pub shutter_speed: Fraction,
    pub focal_length: Fraction,
    pub iso: u32,
}

impl CameraInfo {
    /// `Make Model [LensMake LensModel]`, with `[?]` when the lens is unknown.
    pub fn device_string(&self) -> String {
        if self.lens_make.is_empty() && self.lens_model.is_empty() {
            return format!("{} {} [?]", self.make, self.model);
        }
        format!(
            "{} {} [{} {}]",
            self.make, self.model, self.lens_make, self.lens_model
        )
    }

    pub fn exposure_string(&self) -> String {
        let mut items = Vec::with_capacity(4);
        if !self.aperture.is_nil() {
            items.push(format!("f/{:.1}", self.aperture.as_f64()));
        }
        if !self.shutter_speed.is_nil() {
            items.push(format!("{}s", self.shutter_speed));
        }
        if self.iso != 0 {
            items.push(format!("iso{}", self.iso));
        }
        if !self.focal_length.is_nil() {
            items.push(format!("{:.2}mm", self.focal_length.as_f64()));
        }
        items.join(" ")
    }
}

/// What a tag reader extracted from one file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TagInfo {
    /// Capture time, if the file carries one.
    pub created: Option<DateTime<Utc>>,
    pub camera: Option<CameraInfo>,
}

/// Reads capture metadata from an original file.
#[async_trait]
pub trait TagReader: Send + Sync {
    async fn read_tags(&self, path: &Path) -> Result<TagInfo>;
}
