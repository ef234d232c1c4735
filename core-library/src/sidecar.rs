//! Editor sidecars attached to collection links.
//!
//! A link `<dir>/<name>` may carry a RawTherapee profile at
//! `<dir>/<name>.pp3` and a pipeline script at `<dir>/<name>.pho`.

use sha2::Digest;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::pp3::Pp3;
use crate::script::ScriptSidecar;

pub const PP3_EXTENSION: &str = "pp3";
pub const SCRIPT_EXTENSION: &str = "pho";

fn with_suffix(link: &Path, extension: &str) -> PathBuf {
    let mut path: OsString = link.as_os_str().to_owned();
    path.push(".");
    path.push(extension);
    PathBuf::from(path)
}

pub fn pp3_path(link: &Path) -> PathBuf {
    with_suffix(link, PP3_EXTENSION)
}

pub fn script_path(link: &Path) -> PathBuf {
    with_suffix(link, SCRIPT_EXTENSION)
}

/// The closed set of sidecar kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sidecar {
    Pp3(Pp3),
    Script(ScriptSidecar),
}

impl Sidecar {
    pub fn path(&self) -> &Path {
        match self {
            Sidecar::Pp3(pp3) => pp3.path(),
            Sidecar::Script(script) => script.path(),
        }
    }

    pub fn is_edited(&self) -> bool {
        match self {
            Sidecar::Pp3(pp3) => pp3.is_edited(),
            Sidecar::Script(script) => script.is_edited(),
        }
    }

    /// Feeds the edit parameters that affect conversion output into `hasher`.
    pub fn feed_hash<D: Digest>(&self, hasher: &mut D) {
        let digest = match self {
            Sidecar::Pp3(pp3) => pp3.hash(),
            Sidecar::Script(script) => script.hash(),
        };
        hasher.update(digest.as_bytes());
    }

    /// Loads the sidecar at `path`, choosing the kind by extension.
    pub async fn load(path: &Path) -> Result<Sidecar> {
        let is_script = path
            .extension()
            .map(|e| e.eq_ignore_ascii_case(SCRIPT_EXTENSION))
            .unwrap_or(false);
        if is_script {
            Ok(Sidecar::Script(ScriptSidecar::load(path).await?))
        } else {
            Ok(Sidecar::Pp3(Pp3::load(path).await?))
        }
    }

    /// The sidecar that drives conversion of `link`, if any.
    ///
    /// Only edited sidecars count. An edited script takes precedence over
    /// the profile.
    pub async fn for_conversion(link: &Path) -> Result<Option<Sidecar>> {
        for path in [script_path(link), pp3_path(link)] {
            match Sidecar::load(&path).await {
                Ok(sidecar) if sidecar.is_edited() => return Ok(Some(sidecar)),
                Ok(_) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }
}
