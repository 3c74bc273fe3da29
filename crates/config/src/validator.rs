//! Startup validation of the workspace directory tree.
//!
//! Missing directories are created loudly; anything unfixable produces an
//! error plus a shell-ready fix hint, and the caller aborts with the
//! startup-fatal exit code.

use std::path::{Path, PathBuf};

use crate::{ConfigError, ConfigResult};

/// Directories the engine requires under the workspace root.
const REQUIRED_DIRS: &[&str] = &[
    ".workflow_contexts",
    ".temp_envs",
    "logs/escalations",
    "data/ipfs_registries",
];

/// Directories that are useful but not load-bearing.
const OPTIONAL_DIRS: &[&str] = &["artifacts/workflows"];

/// Result of a validation pass.
#[derive(Debug, Clone, Default)]
pub struct DirectoryReport {
    pub created: Vec<PathBuf>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    /// Shell commands that would fix the corresponding errors.
    pub fixes: Vec<String>,
}

impl DirectoryReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    /// Render errors and fix hints into one fatal message.
    pub fn to_failure_message(&self) -> String {
        let mut out = String::new();
        for error in &self.errors {
            out.push_str("  error: ");
            out.push_str(error);
            out.push('\n');
        }
        if !self.fixes.is_empty() {
            out.push_str("  suggested fixes:\n");
            for fix in &self.fixes {
                out.push_str("    ");
                out.push_str(fix);
                out.push('\n');
            }
        }
        out
    }
}

/// Validates and auto-creates the workspace directory tree.
pub struct DirectoryValidator {
    workspace_dir: PathBuf,
}

impl DirectoryValidator {
    pub fn new(workspace_dir: impl Into<PathBuf>) -> Self {
        Self {
            workspace_dir: workspace_dir.into(),
        }
    }

    /// Validate everything, creating missing directories when `auto_create`.
    pub fn validate(&self, auto_create: bool) -> DirectoryReport {
        let mut report = DirectoryReport::default();

        if !self.workspace_dir.exists() {
            if auto_create {
                if let Err(e) = std::fs::create_dir_all(&self.workspace_dir) {
                    report.errors.push(format!(
                        "cannot create workspace directory {}: {e}",
                        self.workspace_dir.display()
                    ));
                    report
                        .fixes
                        .push(format!("mkdir -p {}", self.workspace_dir.display()));
                    return report;
                }
                report.created.push(self.workspace_dir.clone());
            } else {
                report.errors.push(format!(
                    "workspace directory does not exist: {}",
                    self.workspace_dir.display()
                ));
                report
                    .fixes
                    .push(format!("mkdir -p {}", self.workspace_dir.display()));
                return report;
            }
        }

        if !self.workspace_dir.is_dir() {
            report.errors.push(format!(
                "workspace path is not a directory: {}",
                self.workspace_dir.display()
            ));
            report.fixes.push(format!(
                "rm {} && mkdir -p {}",
                self.workspace_dir.display(),
                self.workspace_dir.display()
            ));
            return report;
        }

        for name in REQUIRED_DIRS {
            self.check_dir(&self.workspace_dir.join(name), true, auto_create, &mut report);
        }
        for name in OPTIONAL_DIRS {
            self.check_dir(&self.workspace_dir.join(name), false, auto_create, &mut report);
        }

        if report.is_ok() {
            tracing::info!(
                workspace = %self.workspace_dir.display(),
                created = report.created.len(),
                "Workspace directory tree validated"
            );
        }
        report
    }

    /// Validate or abort: the startup entry point.
    pub fn validate_or_fail(&self) -> ConfigResult<DirectoryReport> {
        let report = self.validate(true);
        if report.is_ok() {
            Ok(report)
        } else {
            Err(ConfigError::Workspace(report.to_failure_message()))
        }
    }

    fn check_dir(&self, path: &Path, required: bool, auto_create: bool, report: &mut DirectoryReport) {
        if path.is_dir() {
            if required && !Self::is_writable(path) {
                report
                    .errors
                    .push(format!("no write permission for {}", path.display()));
                report.fixes.push(format!("chmod +w {}", path.display()));
            }
            return;
        }

        if path.exists() {
            let message = format!("{} exists but is not a directory", path.display());
            if required {
                report.errors.push(message);
                report.fixes.push(format!(
                    "rm {} && mkdir -p {}",
                    path.display(),
                    path.display()
                ));
            } else {
                report.warnings.push(message);
            }
            return;
        }

        if !auto_create {
            if required {
                report
                    .errors
                    .push(format!("required directory missing: {}", path.display()));
                report.fixes.push(format!("mkdir -p {}", path.display()));
            } else {
                report
                    .warnings
                    .push(format!("optional directory missing: {}", path.display()));
            }
            return;
        }

        match std::fs::create_dir_all(path) {
            Ok(()) => {
                tracing::warn!(path = %path.display(), "Created missing directory");
                report.created.push(path.to_path_buf());
            }
            Err(e) => {
                let message = format!("cannot create {}: {e}", path.display());
                if required {
                    report.errors.push(message);
                    report.fixes.push(format!("mkdir -p {}", path.display()));
                } else {
                    report.warnings.push(message);
                }
            }
        }
    }

    /// Probe writability by touching and removing a marker file.
    fn is_writable(path: &Path) -> bool {
        let probe = path.join(".write_probe");
        match std::fs::write(&probe, b"") {
            Ok(()) => {
                let _ = std::fs::remove_file(&probe);
                true
            }
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_creates_required_tree() {
        let dir = tempfile::tempdir().unwrap();
        let validator = DirectoryValidator::new(dir.path());
        let report = validator.validate(true);

        assert!(report.is_ok(), "errors: {:?}", report.errors);
        for name in REQUIRED_DIRS {
            assert!(dir.path().join(name).is_dir(), "missing {name}");
        }
    }

    #[test]
    fn test_missing_without_autocreate_reports_fixes() {
        let dir = tempfile::tempdir().unwrap();
        let validator = DirectoryValidator::new(dir.path());
        let report = validator.validate(false);

        assert!(!report.is_ok());
        assert_eq!(report.errors.len(), REQUIRED_DIRS.len());
        assert!(report.fixes.iter().all(|f| f.starts_with("mkdir -p ")));
    }

    #[test]
    fn test_file_in_place_of_required_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".workflow_contexts"), b"not a dir").unwrap();

        let validator = DirectoryValidator::new(dir.path());
        let report = validator.validate(true);
        assert!(!report.is_ok());
        assert!(report.errors[0].contains("not a directory"));
    }

    #[test]
    fn test_validate_or_fail_message_carries_hints() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".temp_envs"), b"not a dir").unwrap();

        let validator = DirectoryValidator::new(dir.path());
        let err = validator.validate_or_fail().unwrap_err();
        let message = err.to_string();
        assert!(message.contains("suggested fixes"));
    }
}
