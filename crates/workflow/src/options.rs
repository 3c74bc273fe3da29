//! Per-run workflow options.

use config::UploadScope;
use model::RagScope;

/// Options controlling a single workflow run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Target network name; must resolve in the configuration.
    pub network: String,
    /// Submit sources to the explorer after a successful deployment.
    pub auto_verification: bool,
    /// Skip deployment and verification entirely.
    pub test_only: bool,
    /// Deploy even when the audit reports high or critical findings.
    pub allow_insecure: bool,
    /// Artifact-store namespace for the workflow context upload.
    pub upload_scope: UploadScope,
    /// Which registries retrieval may draw context from.
    pub rag_scope: RagScope,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            network: "hyperion".to_string(),
            auto_verification: true,
            test_only: false,
            allow_insecure: false,
            upload_scope: UploadScope::None,
            rag_scope: RagScope::OfficialOnly,
        }
    }
}
