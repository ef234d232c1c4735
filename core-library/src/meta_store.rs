//! MetaStore: persistence of [`MetaRecord`]s.
//!
//! # Format
//!
//! A record file starts with a two byte version tag followed by the record
//! fields in big endian order:
//!
//! | Field          | Encoding                                    |
//! |----------------|---------------------------------------------|
//! | checksum       | str16                                       |
//! | size           | u64 (u32 in version 0)                      |
//! | real/base name | str16, str16                                |
//! | created        | i64 (u32 in version 0)                      |
//! | deleted,rating | u8, u8                                      |
//! | conv           | u32 count, then (str16 key, str16 hash, u32 size) sorted by key |
//! | tags           | u32 count, then str16 each                  |
//! | location       | u8 flag, then f64 lat, f64 lng, str32 name, str32 address |
//! | camera         | u8 flag, then 4 x str16, 3 x (u32, u32), u32 iso |
//! | pp3            | u32 count, then str16 each (absent in version 0) |
//!
//! `strN` is an N-bit length header followed by UTF-8 bytes. Files starting
//! with `{"` are legacy JSON records; they are read but never written.

use bridge_traits::{CameraInfo, Fraction, TagReader};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use sha2::{Digest, Sha512};
use std::collections::{BTreeMap, HashMap};
use std::io::{self, Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::error::{LibraryError, Result};
use crate::models::{Converted, Location, MetaRecord, PhotoFile, Tags};

/// Current on-disk version tag.
pub const META_VERSION: [u8; 2] = [b'M', 1];
/// Narrow-width layout without the sidecar list.
pub const META_VERSION_0: [u8; 2] = [b'M', 0];
const LEGACY_JSON_MAGIC: [u8; 2] = [b'{', b'"'];

// =============================================================================
// Encoding
// =============================================================================

fn write_str16<W: Write>(w: &mut W, value: &str) -> io::Result<()> {
    let len = u16::try_from(value.len()).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("string of {} bytes exceeds a 16-bit length header", value.len()),
        )
    })?;
    w.write_u16::<BigEndian>(len)?;
    w.write_all(value.as_bytes())
}

fn write_str32<W: Write>(w: &mut W, value: &str) -> io::Result<()> {
    let len = u32::try_from(value.len()).map_err(|_| {
        io::Error::new(io::ErrorKind::InvalidInput, "string exceeds a 32-bit length header")
    })?;
    w.write_u32::<BigEndian>(len)?;
    w.write_all(value.as_bytes())
}

fn write_count<W: Write>(w: &mut W, count: usize) -> io::Result<()> {
    let count = u32::try_from(count)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "too many entries"))?;
    w.write_u32::<BigEndian>(count)
}

fn write_fraction<W: Write>(w: &mut W, value: Fraction) -> io::Result<()> {
    w.write_u32::<BigEndian>(value.0)?;
    w.write_u32::<BigEndian>(value.1)
}

fn write_camera<W: Write>(w: &mut W, camera: &CameraInfo) -> io::Result<()> {
    write_str16(w, &camera.make)?;
    write_str16(w, &camera.model)?;
    write_str16(w, &camera.lens_make)?;
    write_str16(w, &camera.lens_model)?;
    write_fraction(w, camera.aperture)?;
    write_fraction(w, camera.shutter_speed)?;
    write_fraction(w, camera.focal_length)?;
    w.write_u32::<BigEndian>(camera.iso)
}

/// Encodes `record` in the current format, version tag included.
///
/// Tags are written as stored; [`save_meta`] normalizes them first.
pub fn encode(record: &MetaRecord) -> io::Result<Vec<u8>> {
    let mut w = Vec::with_capacity(256);
    w.write_all(&META_VERSION)?;

    write_str16(&mut w, &record.checksum)?;
    w.write_u64::<BigEndian>(record.size)?;
    write_str16(&mut w, &record.real_filename)?;
    write_str16(&mut w, &record.base_filename)?;
    w.write_i64::<BigEndian>(record.created)?;
    w.write_u8(record.deleted as u8)?;
    w.write_u8(record.rating)?;

    write_count(&mut w, record.conv.len())?;
    for (key, converted) in &record.conv {
        write_str16(&mut w, key)?;
        write_str16(&mut w, &converted.hash)?;
        w.write_u32::<BigEndian>(converted.size)?;
    }

    write_count(&mut w, record.tags.len())?;
    for tag in record.tags.iter() {
        write_str16(&mut w, tag)?;
    }

    match &record.location {
        Some(location) => {
            w.write_u8(1)?;
            w.write_f64::<BigEndian>(location.lat)?;
            w.write_f64::<BigEndian>(location.lng)?;
            write_str32(&mut w, &location.name)?;
            write_str32(&mut w, &location.address)?;
        }
        None => w.write_u8(0)?,
    }

    match &record.camera_info {
        Some(camera) => {
            w.write_u8(1)?;
            write_camera(&mut w, camera)?;
        }
        None => w.write_u8(0)?,
    }

    write_count(&mut w, record.pp3.len())?;
    for pp3 in &record.pp3 {
        write_str16(&mut w, pp3)?;
    }

    Ok(w)
}

// =============================================================================
// Decoding
// =============================================================================

fn read_str<R: Read>(r: &mut R, len: usize) -> io::Result<String> {
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

fn read_str16<R: Read>(r: &mut R) -> io::Result<String> {
    let len = r.read_u16::<BigEndian>()? as usize;
    read_str(r, len)
}

fn read_str32<R: Read>(r: &mut R) -> io::Result<String> {
    let len = r.read_u32::<BigEndian>()? as usize;
    read_str(r, len)
}

fn read_fraction<R: Read>(r: &mut R) -> io::Result<Fraction> {
    Ok(Fraction(r.read_u32::<BigEndian>()?, r.read_u32::<BigEndian>()?))
}

fn read_camera<R: Read>(r: &mut R) -> io::Result<CameraInfo> {
    Ok(CameraInfo {
        make: read_str16(r)?,
        model: read_str16(r)?,
        lens_make: read_str16(r)?,
        lens_model: read_str16(r)?,
        aperture: read_fraction(r)?,
        shutter_speed: read_fraction(r)?,
        focal_length: read_fraction(r)?,
        iso: r.read_u32::<BigEndian>()?,
    })
}

fn decode_body<R: Read>(r: &mut R, wide: bool) -> io::Result<MetaRecord> {
    let mut record = MetaRecord {
        checksum: read_str16(r)?,
        ..Default::default()
    };
    record.size = if wide {
        r.read_u64::<BigEndian>()?
    } else {
        r.read_u32::<BigEndian>()? as u64
    };
    record.real_filename = read_str16(r)?;
    record.base_filename = read_str16(r)?;
    record.created = if wide {
        r.read_i64::<BigEndian>()?
    } else {
        r.read_u32::<BigEndian>()? as i64
    };
    record.deleted = r.read_u8()? == 1;
    record.rating = r.read_u8()?;

    let count = r.read_u32::<BigEndian>()?;
    for _ in 0..count {
        let key = read_str16(r)?;
        let hash = read_str16(r)?;
        let size = r.read_u32::<BigEndian>()?;
        record.conv.insert(key, Converted { hash, size });
    }

    let count = r.read_u32::<BigEndian>()?;
    for _ in 0..count {
        record.tags.0.push(read_str16(r)?);
    }

    if r.read_u8()? == 1 {
        record.location = Some(Location {
            lat: r.read_f64::<BigEndian>()?,
            lng: r.read_f64::<BigEndian>()?,
            name: read_str32(r)?,
            address: read_str32(r)?,
        });
    }

    if r.read_u8()? == 1 {
        record.camera_info = Some(read_camera(r)?);
    }

    if wide {
        let count = r.read_u32::<BigEndian>()?;
        for _ in 0..count {
            record.pp3.push(read_str16(r)?);
        }
    }

    Ok(record)
}

/// Decodes a record file's contents. `path` is only used in errors.
pub fn decode(data: &[u8], path: &Path) -> Result<MetaRecord> {
    if data.len() < META_VERSION.len() {
        return Err(LibraryError::InvalidMeta {
            path: path.to_path_buf(),
            message: "file too short".to_string(),
        });
    }

    let version = [data[0], data[1]];
    if version == LEGACY_JSON_MAGIC {
        return decode_legacy_json(data, path);
    }

    let wide = match version {
        META_VERSION => true,
        META_VERSION_0 => false,
        found => {
            return Err(LibraryError::MetaVersion {
                path: path.to_path_buf(),
                found,
                expected: META_VERSION,
            })
        }
    };

    let mut cursor = Cursor::new(&data[2..]);
    let record = decode_body(&mut cursor, wide).map_err(|e| LibraryError::InvalidMeta {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    if (cursor.position() as usize) != data.len() - 2 {
        return Err(LibraryError::InvalidMeta {
            path: path.to_path_buf(),
            message: "trailing bytes after record".to_string(),
        });
    }

    Ok(record)
}

// =============================================================================
// Legacy JSON
// =============================================================================

#[derive(Deserialize, Default)]
#[serde(default, rename_all = "PascalCase")]
struct LegacyRecord {
    checksum: String,
    size: u64,
    real_filename: String,
    base_filename: String,
    created: i64,
    deleted: bool,
    rating: u8,
    conv: Option<HashMap<String, LegacyConverted>>,
    tags: Option<Vec<String>>,
    location: Option<LegacyLocation>,
    camera_info: Option<LegacyCamera>,
    #[serde(rename = "PP3")]
    pp3: Option<Vec<String>>,
}

#[derive(Deserialize, Default)]
#[serde(default, rename_all = "PascalCase")]
struct LegacyConverted {
    hash: String,
    size: u32,
}

#[derive(Deserialize, Default)]
#[serde(default, rename_all = "PascalCase")]
struct LegacyLocation {
    lat: f64,
    lng: f64,
    name: String,
    address: String,
}

#[derive(Deserialize, Default)]
#[serde(default, rename_all = "PascalCase")]
struct LegacyDevice {
    make: String,
    model: String,
}

#[derive(Deserialize, Default)]
#[serde(default, rename_all = "PascalCase")]
struct LegacyCamera {
    make: String,
    model: String,
    lens: LegacyDevice,
    aperture: [u32; 2],
    shutter_speed: [u32; 2],
    focal_length: [u32; 2],
    #[serde(rename = "ISO")]
    iso: u32,
}

impl From<LegacyRecord> for MetaRecord {
    fn from(legacy: LegacyRecord) -> Self {
        MetaRecord {
            checksum: legacy.checksum,
            size: legacy.size,
            real_filename: legacy.real_filename,
            base_filename: legacy.base_filename,
            created: legacy.created,
            deleted: legacy.deleted,
            rating: legacy.rating,
            conv: legacy
                .conv
                .unwrap_or_default()
                .into_iter()
                .map(|(k, v)| {
                    (
                        k,
                        Converted {
                            hash: v.hash,
                            size: v.size,
                        },
                    )
                })
                .collect::<BTreeMap<_, _>>(),
            tags: Tags(legacy.tags.unwrap_or_default()),
            location: legacy.location.map(|l| Location {
                lat: l.lat,
                lng: l.lng,
                name: l.name,
                address: l.address,
            }),
            camera_info: legacy.camera_info.map(|c| CameraInfo {
                make: c.make,
                model: c.model,
                lens_make: c.lens.make,
                lens_model: c.lens.model,
                aperture: Fraction(c.aperture[0], c.aperture[1]),
                shutter_speed: Fraction(c.shutter_speed[0], c.shutter_speed[1]),
                focal_length: Fraction(c.focal_length[0], c.focal_length[1]),
                iso: c.iso,
            }),
            pp3: legacy.pp3.unwrap_or_default(),
        }
    }
}

fn decode_legacy_json(data: &[u8], path: &Path) -> Result<MetaRecord> {
    let legacy: LegacyRecord =
        serde_json::from_slice(data).map_err(|source| LibraryError::LegacyJson {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(legacy.into())
}

// =============================================================================
// File access
// =============================================================================

/// Loads the record at `path`. A missing file yields an error for which
/// [`LibraryError::is_not_found`] holds.
pub async fn load_meta(path: &Path) -> Result<MetaRecord> {
    let data = tokio::fs::read(path)
        .await
        .map_err(|e| LibraryError::io(path, e))?;
    decode(&data, path)
}

/// Writes `record` to `<path>.tmp`, then renames it over `path`.
pub async fn save_meta(path: &Path, record: &MetaRecord) -> Result<()> {
    let mut record = record.clone();
    record.tags = record.tags.unique();

    let data = encode(&record).map_err(|e| LibraryError::InvalidMeta {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let tmp = tmp_path(path);
    if let Err(e) = tokio::fs::write(&tmp, &data).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(LibraryError::io(&tmp, e));
    }

    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| LibraryError::io(path, e))
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

/// Hex sha512 of a file's contents.
pub async fn checksum(path: &Path) -> Result<String> {
    use tokio::io::AsyncReadExt;

    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| LibraryError::io(path, e))?;
    let mut hasher = Sha512::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file
            .read(&mut buf)
            .await
            .map_err(|e| LibraryError::io(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

// =============================================================================
// MetaStore
// =============================================================================

/// Record access for [`PhotoFile`]s, creating records from the file's tags
/// when needed.
#[derive(Clone)]
pub struct MetaStore {
    tag_reader: Arc<dyn TagReader>,
}

impl MetaStore {
    pub fn new(tag_reader: Arc<dyn TagReader>) -> Self {
        Self { tag_reader }
    }

    pub async fn load(&self, file: &PhotoFile) -> Result<MetaRecord> {
        load_meta(&file.meta_path()).await
    }

    pub async fn save(&self, file: &PhotoFile, record: &MetaRecord) -> Result<()> {
        save_meta(&file.meta_path(), record).await
    }

    /// Loads the record, or builds and saves a new one when it does not exist.
    pub async fn ensure(&self, file: &PhotoFile) -> Result<MetaRecord> {
        match self.load(file).await {
            Err(e) if e.is_not_found() => self.make(file, None).await,
            other => other,
        }
    }

    /// Refreshes tag-derived fields of the record, creating it first if needed.
    ///
    /// The created time keeps any recorded value unless `date` is given; a
    /// fresh record takes it from the file's tags.
    #[instrument(skip(self, file), fields(file = %file.name()))]
    pub async fn make(&self, file: &PhotoFile, date: Option<DateTime<Utc>>) -> Result<MetaRecord> {
        let mut record = match self.load(file).await {
            Ok(record) => record,
            Err(e) if e.is_not_found() => {
                debug!("creating meta record");
                let mut record = MetaRecord::new(file.bytes(), file.name(), file.filename());
                record.checksum = checksum(&file.path()).await?;
                record
            }
            Err(e) => return Err(e),
        };

        let tags = self.tag_reader.read_tags(&file.path()).await?;

        let created = match date {
            Some(date) => Some(date),
            None if record.created != 0 => None,
            None => tags.created,
        };
        if let Some(created) = created {
            record.created = created.timestamp();
        }

        if let Some(camera) = tags.camera {
            record.camera_info = Some(camera);
        }

        self.save(file, &record).await?;
        Ok(record)
    }
}

impl std::fmt::Debug for MetaStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetaStore").finish_non_exhaustive()
    }
}
