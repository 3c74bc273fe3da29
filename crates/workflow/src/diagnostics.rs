//! Diagnostic bundling and scratch-environment lifecycle.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use model::SystemInfo;

/// Marker file left behind when a failed run's scratch dir is preserved.
const PRESERVE_MARKER: &str = ".preserve_for_debug";

/// Capture host details for the bundle.
pub fn system_info() -> SystemInfo {
    SystemInfo {
        os: std::env::consts::OS.to_string(),
        arch: std::env::consts::ARCH.to_string(),
        hostname: std::env::var("HOSTNAME").ok(),
    }
}

/// Report the versions of the external tools the workflow depends on.
pub async fn tool_versions() -> BTreeMap<String, String> {
    let mut versions = BTreeMap::new();
    for tool in ["forge", "slither"] {
        match toolchain::process::tool_version(tool).await {
            Some(version) => {
                versions.insert(tool.to_string(), version);
            }
            None => {
                versions.insert(tool.to_string(), "not installed".to_string());
            }
        }
    }
    versions
}

/// Scoped scratch directory under `.temp_envs/<workflow_id>/`.
///
/// The directory is removed on success and preserved (with a marker file)
/// on failure so diagnostics can point at it.
pub struct TempEnv {
    path: PathBuf,
    preserved: bool,
}

impl TempEnv {
    /// Create the scratch directory for a workflow.
    pub fn create(workspace_dir: &Path, workflow_id: &str) -> std::io::Result<Self> {
        let path = workspace_dir.join(".temp_envs").join(workflow_id);
        std::fs::create_dir_all(&path)?;
        Ok(Self {
            path,
            preserved: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Keep the directory for debugging; drops the cleanup.
    pub fn preserve(&mut self) {
        if self.preserved {
            return;
        }
        self.preserved = true;
        let marker = self.path.join(PRESERVE_MARKER);
        if let Err(e) = std::fs::write(&marker, b"") {
            tracing::warn!(error = %e, "Failed to write preserve marker");
        }
        tracing::info!(path = %self.path.display(), "Preserved scratch environment for debugging");
    }
}

impl Drop for TempEnv {
    fn drop(&mut self) {
        if self.preserved {
            return;
        }
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            tracing::debug!(error = %e, path = %self.path.display(), "Scratch cleanup failed");
        }
    }
}
