//! External tool invocation.

use bridge_traits::error::{BridgeError, Result};
use std::ffi::OsStr;
use std::path::Path;
use tokio::process::Command;
use tracing::debug;

/// Runs `program` with `args` and returns its stdout.
///
/// A missing binary is [`BridgeError::NotAvailable`]. A non-zero exit is
/// [`BridgeError::ExternalTool`] carrying the captured stderr.
pub(crate) async fn run_tool<I, S>(program: &Path, args: I) -> Result<Vec<u8>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut command = Command::new(program);
    command.args(args).kill_on_drop(true);
    debug!(tool = %program.display(), command = ?command.as_std(), "running external tool");

    let output = command.output().await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            BridgeError::NotAvailable(format!("{} is not installed", program.display()))
        } else {
            BridgeError::Io(e)
        }
    })?;

    if !output.status.success() {
        return Err(BridgeError::external_tool(
            program.display().to_string(),
            output.status,
            &output.stderr,
        ));
    }
    Ok(output.stdout)
}
