//! Pipeline script sidecars (`.pho`).
//!
//! Scripts are interpreted by the external pipeline engine. The catalog only
//! needs to know whether one renders a `.convert` target and what its
//! content hashes to.

use sha2::{Digest, Sha512};
use std::path::{Path, PathBuf};

use crate::error::{LibraryError, Result};

/// Target the pipeline engine runs when converting.
pub const CONVERT_TARGET: &str = ".convert";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptSidecar {
    path: PathBuf,
    text: String,
}

impl ScriptSidecar {
    pub fn new(path: impl Into<PathBuf>, text: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            text: text.into(),
        }
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| LibraryError::io(path, e))?;
        Ok(Self::new(path, text))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn statements(&self) -> impl Iterator<Item = &str> {
        self.text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
    }

    /// Whether the script defines a `.convert` target.
    pub fn is_edited(&self) -> bool {
        self.statements().any(|l| {
            l.strip_prefix(CONVERT_TARGET)
                .map(|rest| {
                    rest.is_empty()
                        || rest.starts_with(|c: char| c.is_whitespace() || c == '(' || c == ':')
                })
                .unwrap_or(false)
        })
    }

    /// Hex sha512 over the script's statements, ignoring blank lines,
    /// comments and indentation.
    pub fn hash(&self) -> String {
        let mut hasher = Sha512::new();
        for statement in self.statements() {
            hasher.update(statement.as_bytes());
            hasher.update(b"\n");
        }
        hex::encode(hasher.finalize())
    }
}
