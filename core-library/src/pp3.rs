//! RawTherapee processing profiles (`.pp3`).
//!
//! A profile is an INI file. Section and key order are preserved so a
//! load/save cycle only changes what was set.

use sha2::{Digest, Sha512};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{LibraryError, Result};

/// Sections the catalog writes itself. Anything else comes from the editor.
const STUB_SECTIONS: &[&str] = &["General", "IPTC", "Crop", "Resize", "Version"];

#[derive(Debug, Clone, PartialEq, Eq)]
struct Section {
    name: String,
    entries: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pp3 {
    path: PathBuf,
    sections: Vec<Section>,
}

impl Pp3 {
    /// Parses profile text. `path` is where [`save`](Self::save) writes.
    pub fn parse(path: impl Into<PathBuf>, text: &str) -> Result<Self> {
        let path = path.into();
        let mut sections: Vec<Section> = Vec::new();

        for (n, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }

            if let Some(name) = line.strip_prefix('[') {
                let name = name.strip_suffix(']').ok_or_else(|| {
                    LibraryError::sidecar(&path, format!("unterminated section on line {}", n + 1))
                })?;
                sections.push(Section {
                    name: name.trim().to_string(),
                    entries: Vec::new(),
                });
                continue;
            }

            let (key, value) = line.split_once('=').ok_or_else(|| {
                LibraryError::sidecar(&path, format!("expected key=value on line {}", n + 1))
            })?;
            let section = sections.last_mut().ok_or_else(|| {
                LibraryError::sidecar(&path, format!("key outside a section on line {}", n + 1))
            })?;
            section
                .entries
                .push((key.trim().to_string(), value.trim().to_string()));
        }

        Ok(Self { path, sections })
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| LibraryError::io(path, e))?;
        Self::parse(path, &text)
    }

    /// The profile the catalog writes for a link that has none yet.
    pub fn stub(path: impl Into<PathBuf>) -> Self {
        let mut pp3 = Self {
            path: path.into(),
            sections: Vec::new(),
        };

        pp3.set("Version", "AppVersion", "5.8");
        pp3.set("Version", "Version", "346");

        pp3.set("General", "Rank", "0");
        pp3.set("General", "ColorLabel", "0");
        pp3.set("General", "InTrash", "false");

        pp3.set("Crop", "Enabled", "false");
        pp3.set("Crop", "X", "-1");
        pp3.set("Crop", "Y", "-1");
        pp3.set("Crop", "W", "-1");
        pp3.set("Crop", "H", "-1");
        pp3.set("Crop", "FixedRatio", "false");
        pp3.set("Crop", "Ratio", "As Image");
        pp3.set("Crop", "Guide", "Frame");

        pp3
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.sections
            .iter()
            .find(|s| s.name == section)?
            .entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn has(&self, section: &str, key: &str) -> bool {
        self.get(section, key).is_some()
    }

    pub fn set(&mut self, section: &str, key: &str, value: impl Into<String>) {
        let value = value.into();
        let index = match self.sections.iter().position(|s| s.name == section) {
            Some(index) => index,
            None => {
                self.sections.push(Section {
                    name: section.to_string(),
                    entries: Vec::new(),
                });
                self.sections.len() - 1
            }
        };

        let entries = &mut self.sections[index].entries;
        match entries.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value,
            None => entries.push((key.to_string(), value)),
        }
    }

    fn int(&self, section: &str, key: &str) -> i64 {
        self.get(section, key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }

    pub fn rank(&self) -> i64 {
        self.int("General", "Rank")
    }

    pub fn set_rank(&mut self, rank: u8) {
        self.set("General", "Rank", rank.to_string());
    }

    pub fn trashed(&self) -> bool {
        self.get("General", "InTrash")
            .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
            .unwrap_or(false)
    }

    pub fn set_trashed(&mut self, trashed: bool) {
        self.set("General", "InTrash", trashed.to_string());
    }

    /// IPTC keywords. `None` when the profile carries no keyword entry.
    pub fn keywords(&self) -> Option<Vec<String>> {
        let raw = self.get("IPTC", "Keywords")?;
        Some(
            raw.split(';')
                .map(str::trim)
                .filter(|kw| !kw.is_empty())
                .map(String::from)
                .collect(),
        )
    }

    pub fn set_keywords<S: AsRef<str>>(&mut self, keywords: &[S]) {
        let mut joined = keywords
            .iter()
            .map(|k| k.as_ref())
            .collect::<Vec<_>>()
            .join(";");
        joined.push(';');
        self.set("IPTC", "Keywords", joined);
    }

    /// Configures the Resize section for a longest edge of `size` pixels.
    pub fn resize_longest(&mut self, size: u32) {
        let width = self.int("Crop", "W");
        let height = self.int("Crop", "H");
        let which = if height > width { "2" } else { "1" };
        let size = size.to_string();

        self.set("Resize", "Enabled", "true");
        self.set("Resize", "Scale", "1");
        self.set("Resize", "AppliesTo", "Cropped area");
        self.set("Resize", "Method", "Lanczos");
        self.set("Resize", "DataSpecified", which);
        self.set("Resize", "Width", size.clone());
        self.set("Resize", "Height", size);
        self.set("Resize", "AllowUpscaling", "false");
    }

    /// Whether the profile carries an edit beyond the catalog's stub.
    pub fn is_edited(&self) -> bool {
        let crop_enabled = self
            .get("Crop", "Enabled")
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        crop_enabled
            || self
                .sections
                .iter()
                .any(|s| !s.entries.is_empty() && !STUB_SECTIONS.contains(&s.name.as_str()))
    }

    /// Hex sha512 over the parameters that change the rendered image.
    ///
    /// Rating, trash, color label and version keys are ignored, as are
    /// sections with `Enabled=false`. Exif and IPTC values count only when
    /// `MetaData.Mode` is 1, since otherwise they are not written out.
    pub fn hash(&self) -> String {
        let disabled: Vec<&str> = self
            .sections
            .iter()
            .filter(|s| s.entries.iter().any(|(k, v)| k == "Enabled" && v == "false"))
            .map(|s| s.name.as_str())
            .collect();
        let copy_metadata = self.get("MetaData", "Mode").and_then(|v| v.parse::<i64>().ok()) == Some(1);

        let mut lines: Vec<String> = Vec::new();
        for section in &self.sections {
            let name = section.name.as_str();
            if name == "Version" || disabled.contains(&name) {
                continue;
            }
            if (name == "Exif" || name == "IPTC") && !copy_metadata {
                continue;
            }
            for (key, value) in &section.entries {
                if name == "General" && matches!(key.as_str(), "Rank" | "InTrash" | "ColorLabel") {
                    continue;
                }
                lines.push(format!("{}.{}={}", name, key, value));
            }
        }
        lines.sort();

        hex::encode(Sha512::digest(lines.join("\n").as_bytes()))
    }

    pub async fn save(&self) -> Result<()> {
        self.save_to(&self.path).await
    }

    /// Writes through `<path>.tmp` and a rename.
    pub async fn save_to(&self, path: &Path) -> Result<()> {
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        if let Err(e) = tokio::fs::write(&tmp, self.to_string()).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(LibraryError::io(&tmp, e));
        }
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| LibraryError::io(path, e))
    }
}

impl fmt::Display for Pp3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, section) in self.sections.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            writeln!(f, "[{}]", section.name)?;
            for (key, value) in &section.entries {
                writeln!(f, "{}={}", key, value)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const EDITED: &str = "[Version]\nAppVersion=5.8\nVersion=346\n\n[General]\nRank=3\nColorLabel=0\nInTrash=false\n\n[Exposure]\nAuto=false\nCompensation=0.5\n\n[Crop]\nEnabled=false\nX=-1\n\n[IPTC]\nKeywords=beach;family;\n";

    #[test]
    fn test_parse_and_accessors() {
        let pp3 = Pp3::parse("a.pp3", EDITED).unwrap();
        assert_eq!(pp3.rank(), 3);
        assert!(!pp3.trashed());
        assert_eq!(pp3.get("Exposure", "Compensation"), Some("0.5"));
        assert_eq!(
            pp3.keywords(),
            Some(vec!["beach".to_string(), "family".to_string()])
        );
        assert!(pp3.is_edited());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(Pp3::parse("a.pp3", "[General\nRank=1").is_err());
        assert!(Pp3::parse("a.pp3", "Rank=1").is_err());
        assert!(Pp3::parse("a.pp3", "[General]\nnot a pair").is_err());
    }

    #[test]
    fn test_stub_is_unedited() {
        let mut pp3 = Pp3::stub("a.pp3");
        assert!(!pp3.is_edited());
        assert_eq!(pp3.keywords(), None);

        pp3.set_keywords(&["a", "b"]);
        pp3.set_rank(5);
        pp3.set_trashed(true);
        assert!(!pp3.is_edited());
        assert_eq!(pp3.get("IPTC", "Keywords"), Some("a;b;"));

        pp3.set("Crop", "Enabled", "true");
        assert!(pp3.is_edited());
    }

    #[test]
    fn test_display_round_trip() {
        let pp3 = Pp3::parse("a.pp3", EDITED).unwrap();
        let reparsed = Pp3::parse("a.pp3", &pp3.to_string()).unwrap();
        assert_eq!(reparsed, pp3);
        assert!(pp3.to_string().starts_with("[Version]\nAppVersion=5.8\n"));
    }

    #[test]
    fn test_hash_ignores_curation_keys() {
        let mut a = Pp3::parse("a.pp3", EDITED).unwrap();
        let base = a.hash();

        a.set_rank(1);
        a.set_trashed(true);
        a.set("General", "ColorLabel", "2");
        a.set("Version", "AppVersion", "5.9");
        a.set_keywords(&["other"]);
        assert_eq!(a.hash(), base);

        a.set("Exposure", "Compensation", "0.7");
        assert_ne!(a.hash(), base);
    }

    #[test]
    fn test_hash_ignores_disabled_sections() {
        let mut a = Pp3::parse("a.pp3", EDITED).unwrap();
        let base = a.hash();
        a.set("Crop", "X", "100");
        assert_eq!(a.hash(), base);

        a.set("Crop", "Enabled", "true");
        assert_ne!(a.hash(), base);
    }

    #[test]
    fn test_hash_counts_iptc_when_metadata_copied() {
        let mut a = Pp3::parse("a.pp3", EDITED).unwrap();
        a.set("MetaData", "Mode", "1");
        let base = a.hash();

        a.set_keywords(&["other"]);
        assert_ne!(a.hash(), base);
    }

    #[test]
    fn test_resize_longest() {
        let mut pp3 = Pp3::stub("a.pp3");
        pp3.set("Crop", "W", "2000");
        pp3.set("Crop", "H", "3000");
        pp3.resize_longest(1920);

        assert_eq!(pp3.get("Resize", "DataSpecified"), Some("2"));
        assert_eq!(pp3.get("Resize", "Width"), Some("1920"));
        assert_eq!(pp3.get("Resize", "Height"), Some("1920"));
        assert_eq!(pp3.get("Resize", "Enabled"), Some("true"));

        let mut landscape = Pp3::stub("b.pp3");
        landscape.resize_longest(800);
        assert_eq!(landscape.get("Resize", "DataSpecified"), Some("1"));
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("link.NEF.pp3");

        let mut pp3 = Pp3::stub(&path);
        pp3.set_rank(4);
        pp3.save().await.unwrap();

        let loaded = Pp3::load(&path).await.unwrap();
        assert_eq!(loaded.rank(), 4);
        assert_eq!(loaded, pp3);
    }

    #[tokio::test]
    async fn test_load_missing_is_not_found() {
        let dir = TempDir::new().unwrap();
        let err = Pp3::load(&dir.path().join("none.pp3")).await.unwrap_err();
        assert!(err.is_not_found());
    }
}
