//! Success report for a finished installer.

use super::OutputManager;
use crate::error::Result;
use crate::packaging::{Host, utils::http::sha256_file};
use std::path::{Path, PathBuf};

const ADDING_HOSTS_DOCS: &str = "https://fleetdm.com/docs/using-fleet/adding-hosts";

/// What was reported about the artifact.
#[derive(Debug, Clone)]
pub struct Report {
    /// Absolute artifact path
    pub path: PathBuf,
    /// Hex SHA-256 of the artifact
    pub sha256: String,
}

/// Print where the installer is and how to distribute it, then optionally
/// reveal its folder.
pub async fn report(
    output: &OutputManager,
    artifact: &Path,
    open_folder: bool,
    host: &Host,
) -> Result<Report> {
    let sha256 = sha256_file(artifact).await?;

    output.success(&format!(
        "Success! You generated an osquery installer at {}",
        artifact.display()
    ))?;
    output.indent(&format!("SHA-256: {sha256}"))?;
    output.println("")?;
    output.println("To add this device to Fleet, double-click to open your installer.")?;
    output.println("")?;
    output.println(&format!(
        "To add other devices to Fleet, distribute this installer using Chef, Ansible, Jamf, \
         or Puppet. Learn how: {ADDING_HOSTS_DOCS}"
    ))?;

    if open_folder && let Some(dir) = artifact.parent() {
        output.verbose(&format!("Opening {}", dir.display()))?;
        reveal(dir, host).await;
    }

    Ok(Report {
        path: artifact.to_path_buf(),
        sha256,
    })
}

/// File manager launcher for `host`.
pub fn opener(host: &Host) -> &'static str {
    if host.is_macos() {
        "open"
    } else if host.is_windows() {
        "explorer"
    } else {
        "xdg-open"
    }
}

// Launched without waiting: explorer exits non-zero even on success.
async fn reveal(dir: &Path, host: &Host) {
    let program = opener(host);
    if let Err(e) = tokio::process::Command::new(program).arg(dir).spawn() {
        log::warn!("Failed to open {} with {program}: {e}", dir.display());
    }
}
