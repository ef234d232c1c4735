//! `exiftool`-backed tag reading and JPEG EXIF rewriting.
//!
//! Tags are read with `exiftool -j -n`, which prints one JSON object per
//! file with numeric values left unformatted. Rewrites use
//! `-overwrite_original`, which writes a temporary copy and renames it over
//! the JPEG, so a failed rewrite leaves the file untouched.

use async_trait::async_trait;
use bridge_traits::error::{BridgeError, Result};
use bridge_traits::{CameraInfo, ExifRewriter, Fraction, TagInfo, TagReader};
use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use serde_json::{Map, Value};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::{debug, instrument};

use crate::process::run_tool;

const EXIF_TIME_FORMAT: &str = "%Y:%m:%d %H:%M:%S";

/// Capture-time tags paired with the tag holding their UTC offset.
const TIME_TAGS: [(&str, &str); 2] = [
    ("DateTimeOriginal", "OffsetTimeOriginal"),
    ("ModifyDate", "OffsetTime"),
];

const CAMERA_TAGS: [&str; 8] = [
    "Make",
    "Model",
    "LensMake",
    "LensModel",
    "FNumber",
    "ExposureTime",
    "ISO",
    "FocalLength",
];

type Fields = Map<String, Value>;

fn parse_fields(json: &[u8]) -> Result<Fields> {
    let mut entries: Vec<Fields> = serde_json::from_slice(json)
        .map_err(|e| BridgeError::OperationFailed(format!("unreadable exiftool output: {}", e)))?;
    Ok(entries.pop().unwrap_or_default())
}

fn text(fields: &Fields, key: &str) -> Option<String> {
    match fields.get(key)? {
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn number(fields: &Fields, key: &str) -> Option<f64> {
    match fields.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn gcd(a: u32, b: u32) -> u32 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

/// Exposure times below a second become `1/n`; everything else is reduced
/// from thousandths.
fn to_fraction(value: f64) -> Fraction {
    if !value.is_finite() || value <= 0.0 {
        return Fraction(0, 1);
    }
    if value < 1.0 {
        let inverse = 1.0 / value;
        if (inverse - inverse.round()).abs() < 1e-3 {
            return Fraction(1, inverse.round() as u32);
        }
    }
    let den = 1000u32;
    let num = (value * f64::from(den)).round() as u32;
    let divisor = gcd(num, den).max(1);
    Fraction(num / divisor, den / divisor)
}

/// Parses an EXIF timestamp. Without a usable offset the time is taken as
/// local time.
fn parse_exif_time(date: &str, offset: Option<&str>) -> Option<DateTime<Utc>> {
    if let Some(offset) = offset.filter(|o| !o.ends_with(':')) {
        let stamped = format!("{} {}", date, offset);
        if let Ok(time) = DateTime::parse_from_str(&stamped, "%Y:%m:%d %H:%M:%S %:z") {
            return Some(time.with_timezone(&Utc));
        }
    }
    let naive = NaiveDateTime::parse_from_str(date, EXIF_TIME_FORMAT).ok()?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|t| t.with_timezone(&Utc))
}

fn tag_info(fields: &Fields) -> TagInfo {
    let created = TIME_TAGS.iter().find_map(|(date_key, offset_key)| {
        let date = text(fields, date_key)?;
        parse_exif_time(&date, text(fields, offset_key).as_deref())
    });

    let make = text(fields, "Make");
    let model = text(fields, "Model");
    let camera = (make.is_some() || model.is_some()).then(|| CameraInfo {
        make: make.unwrap_or_default(),
        model: model.unwrap_or_default(),
        lens_make: text(fields, "LensMake").unwrap_or_default(),
        lens_model: text(fields, "LensModel").unwrap_or_default(),
        aperture: number(fields, "FNumber").map(to_fraction).unwrap_or_default(),
        shutter_speed: number(fields, "ExposureTime").map(to_fraction).unwrap_or_default(),
        focal_length: number(fields, "FocalLength").map(to_fraction).unwrap_or_default(),
        iso: number(fields, "ISO").map(|v| v.round() as u32).unwrap_or(0),
    });

    TagInfo { created, camera }
}

/// `±HH:MM` between the embedded local time and `created`.
fn timezone_offset(local: &str, created: DateTime<Utc>) -> Result<String> {
    let local = NaiveDateTime::parse_from_str(local, EXIF_TIME_FORMAT).map_err(|e| {
        BridgeError::OperationFailed(format!("unreadable EXIF time {:?}: {}", local, e))
    })?;
    let diff = local - created.naive_utc();
    if diff.num_seconds().abs() > 24 * 3600 {
        return Err(BridgeError::OperationFailed(format!(
            "impossible timezone correction of {}s",
            diff.num_seconds()
        )));
    }

    let minutes = diff.num_minutes();
    let sign = if minutes < 0 { '-' } else { '+' };
    let minutes = minutes.abs();
    Ok(format!("{}{:02}:{:02}", sign, minutes / 60, minutes % 60))
}

fn gps_args(created: DateTime<Utc>, lat: f64, lng: f64) -> Vec<String> {
    vec![
        format!("-GPSLatitude={}", lat.abs()),
        format!("-GPSLatitudeRef={}", if lat < 0.0 { "S" } else { "N" }),
        format!("-GPSLongitude={}", lng.abs()),
        format!("-GPSLongitudeRef={}", if lng < 0.0 { "W" } else { "E" }),
        format!("-GPSDateStamp={}", created.format("%Y:%m:%d")),
        format!("-GPSTimeStamp={}", created.format("%H:%M:%S")),
    ]
}

fn with_path(args: Vec<String>, path: &Path) -> Vec<OsString> {
    args.into_iter()
        .map(OsString::from)
        .chain(std::iter::once(path.as_os_str().to_owned()))
        .collect()
}

/// Reads capture time and camera details through exiftool.
#[derive(Debug, Clone)]
pub struct ExiftoolTagReader {
    program: PathBuf,
}

impl ExiftoolTagReader {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl TagReader for ExiftoolTagReader {
    #[instrument(skip(self, path), fields(path = %path.display()))]
    async fn read_tags(&self, path: &Path) -> Result<TagInfo> {
        let mut args = vec!["-j".to_string(), "-n".to_string()];
        for (date_key, offset_key) in TIME_TAGS {
            args.push(format!("-{}", date_key));
            args.push(format!("-{}", offset_key));
        }
        args.extend(CAMERA_TAGS.iter().map(|t| format!("-{}", t)));

        let out = run_tool(&self.program, with_path(args, path)).await?;
        let info = tag_info(&parse_fields(&out)?);
        debug!(created = ?info.created, "tags read");
        Ok(info)
    }
}

/// Corrects timezone and GPS tags of converted JPEGs through exiftool.
#[derive(Debug, Clone)]
pub struct ExiftoolRewriter {
    program: PathBuf,
}

impl ExiftoolRewriter {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    async fn write(&self, jpeg: &Path, tags: Vec<String>) -> Result<()> {
        let mut args = vec!["-overwrite_original".to_string(), "-q".to_string()];
        args.extend(tags);
        run_tool(&self.program, with_path(args, jpeg)).await?;
        Ok(())
    }
}

#[async_trait]
impl ExifRewriter for ExiftoolRewriter {
    #[instrument(skip(self, jpeg), fields(jpeg = %jpeg.display()))]
    async fn rewrite_timezone(&self, jpeg: &Path, created: DateTime<Utc>) -> Result<()> {
        let mut args = vec!["-j".to_string()];
        args.extend(TIME_TAGS.iter().map(|(date_key, _)| format!("-{}", date_key)));
        let fields = parse_fields(&run_tool(&self.program, with_path(args, jpeg)).await?)?;

        let mut tags = Vec::new();
        for (date_key, offset_key) in TIME_TAGS {
            if let Some(local) = text(&fields, date_key) {
                tags.push(format!("-{}={}", offset_key, timezone_offset(&local, created)?));
            }
        }
        if tags.is_empty() {
            debug!("no capture time to correct");
            return Ok(());
        }
        self.write(jpeg, tags).await
    }

    #[instrument(skip(self, jpeg), fields(jpeg = %jpeg.display()))]
    async fn rewrite_gps(
        &self,
        jpeg: &Path,
        created: DateTime<Utc>,
        lat: f64,
        lng: f64,
    ) -> Result<()> {
        self.write(jpeg, gps_args(created, lat, lng)).await
    }
}
