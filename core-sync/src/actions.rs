//! Execution of queued [`Action`]s against the catalog on disk.

use async_trait::async_trait;
use bridge_traits::BridgeError;
use core_library::{LinkIndex, MetaStore};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use crate::conversion::ConversionCache;
use crate::error::{Result, SyncError};
use crate::scheduler::{Action, ActionExecutor, ExternalCommand};
use crate::sidecar_sync::SidecarSync;

/// Runs every [`Action`] variant.
pub struct CatalogExecutor {
    store: MetaStore,
    links: Arc<LinkIndex>,
    sidecars: Arc<SidecarSync>,
    conversions: Arc<ConversionCache>,
}

impl CatalogExecutor {
    pub fn new(
        store: MetaStore,
        links: Arc<LinkIndex>,
        sidecars: Arc<SidecarSync>,
        conversions: Arc<ConversionCache>,
    ) -> Self {
        Self {
            store,
            links,
            sidecars,
            conversions,
        }
    }
}

#[async_trait]
impl ActionExecutor for CatalogExecutor {
    async fn execute(&self, action: Action) -> Result<()> {
        debug!(action = action.kind(), "executing");
        match action {
            Action::Save { file, record } => self.store.save(&file, &record).await?,
            Action::Delete(path) => delete(&path).await?,
            Action::RunExternal(command) => run_external(&command).await?,
            Action::Convert { file, sizes } => {
                self.conversions.apply(&file, &sizes).await?;
            }
            Action::Link(file) => {
                let record = self.store.ensure(&file).await?;
                if let Some(link) = self.links.link(&file, &record).await? {
                    info!(file = %file.name(), link = %link.display(), "linked");
                }
            }
            Action::SyncSidecars(file) => {
                self.sidecars.sync(&file).await?;
            }
            Action::RewriteMeta(file) => {
                self.store.make(&file, None).await?;
            }
            Action::FixupExif(file) => {
                let record = self.store.load(&file).await?;
                self.conversions.fixup_timezones(&file, &record).await?;
            }
            Action::UpdateLocation { file, record } => {
                self.store.save(&file, &record).await?;
                self.conversions.apply_location(&file, &record).await?;
            }
            Action::Preview(file) => self.conversions.make_preview(&file).await?,
        }
        Ok(())
    }
}

impl std::fmt::Debug for CatalogExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogExecutor").finish_non_exhaustive()
    }
}

async fn delete(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(SyncError::io(path, e)),
    }
}

/// Runs `command`, logging its output. A non-zero exit is an error carrying
/// the command's stderr.
pub async fn run_external(command: &ExternalCommand) -> Result<()> {
    let tool = command.program.display().to_string();
    let output = tokio::process::Command::new(&command.program)
        .args(&command.args)
        .output()
        .await
        .map_err(BridgeError::Io)?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    for line in stdout.lines().filter(|l| !l.is_empty()) {
        info!(tool = %tool, "{}", line);
    }

    if !output.status.success() {
        return Err(BridgeError::external_tool(tool, output.status, &output.stderr).into());
    }
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_external_reports_stderr() {
        let command = ExternalCommand::new(
            "sh",
            vec!["-c".into(), "echo broken >&2; exit 3".into()],
        );
        match run_external(&command).await {
            Err(SyncError::Bridge(BridgeError::ExternalTool { tool, stderr, .. })) => {
                assert_eq!(tool, "sh");
                assert_eq!(stderr, "broken");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_run_external_success() {
        let command = ExternalCommand::new("sh", vec!["-c".into(), "echo ok".into()]);
        run_external(&command).await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_missing_is_ok() {
        let dir = tempfile::TempDir::new().unwrap();
        delete(&dir.path().join("gone.jpg")).await.unwrap();
    }
}
