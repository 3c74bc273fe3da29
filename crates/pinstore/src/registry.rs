//! Per-scope CID registries.
//!
//! Each scope owns one registry file under `data/ipfs_registries/`. The
//! registry is a flat map from artifact id to entry, persisted atomically
//! under a per-registry mutex. Entries are only ever added; an upload of
//! identical bytes overwrites its own entry with identical content.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use model::fsutil;

use crate::errors::PinResult;
use crate::scope::{ArtifactKind, Scope};

/// One registered artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub cid: String,
    pub scope: Scope,
    pub artifact_type: ArtifactKind,
    /// SHA-256 of the uploaded bytes, hex-encoded.
    pub content_hash: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_signature: Option<String>,
    /// Present only for community uploads.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploader_id: Option<String>,
    pub ipfs_url: String,
    pub gateway_url: String,
    /// Pin metadata as submitted to the service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// Derive the registry key for an artifact.
pub fn artifact_id(kind: ArtifactKind, content_hash: &str) -> String {
    let prefix: String = content_hash.chars().take(16).collect();
    format!("{kind}-{prefix}")
}

/// A single scope's registry, backed by its own file.
pub struct CidRegistry {
    scope: Scope,
    path: PathBuf,
    entries: Mutex<BTreeMap<String, RegistryEntry>>,
}

impl CidRegistry {
    /// Open the registry for `scope` under the registries directory.
    pub fn open(registry_dir: &Path, scope: Scope) -> Self {
        let path = registry_dir.join(scope.registry_file());
        let entries = match fsutil::read_json_or_default::<BTreeMap<String, RegistryEntry>>(&path) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::error!(scope = %scope, error = %e, "Failed to load CID registry; starting empty");
                BTreeMap::new()
            }
        };
        tracing::debug!(scope = %scope, entries = entries.len(), "Loaded CID registry");
        Self {
            scope,
            path,
            entries: Mutex::new(entries),
        }
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(std::sync::PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, artifact_id: &str) -> Option<RegistryEntry> {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(artifact_id)
            .cloned()
    }

    /// Snapshot of all entries.
    pub fn entries(&self) -> BTreeMap<String, RegistryEntry> {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Insert an entry and persist atomically. The registry is never left
    /// partially updated: the insert is visible on disk only after the
    /// rename completes.
    pub fn insert(&self, id: String, entry: RegistryEntry) -> PinResult<()> {
        debug_assert_eq!(entry.scope, self.scope);
        let mut entries = self.entries.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        entries.insert(id.clone(), entry);
        fsutil::write_json_atomic(&self.path, &*entries)?;
        tracing::debug!(scope = %self.scope, artifact_id = %id, "Registered artifact");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(scope: Scope, hash: &str) -> RegistryEntry {
        RegistryEntry {
            cid: "bafytest".to_string(),
            scope,
            artifact_type: ArtifactKind::Prompt,
            content_hash: hash.to_string(),
            timestamp: Utc::now(),
            workflow_signature: None,
            uploader_id: None,
            ipfs_url: "ipfs://bafytest".to_string(),
            gateway_url: "https://gateway.pinata.cloud/ipfs/bafytest".to_string(),
            metadata: None,
        }
    }

    #[test]
    fn test_artifact_id_uses_hash_prefix() {
        let hash = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";
        assert_eq!(
            artifact_id(ArtifactKind::Prompt, hash),
            "prompt-2cf24dba5fb0a30e"
        );
    }

    #[test]
    fn test_scopes_use_separate_files() {
        let dir = tempfile::tempdir().unwrap();
        let team = CidRegistry::open(dir.path(), Scope::Team);
        let community = CidRegistry::open(dir.path(), Scope::Community);

        team.insert("prompt-aaaa".to_string(), entry(Scope::Team, "aaaa"))
            .unwrap();

        assert_eq!(team.len(), 1);
        assert_eq!(community.len(), 0);
        assert!(dir.path().join("cid-registry-team.json").exists());
        assert!(!dir.path().join("cid-registry-community.json").exists());
    }

    #[test]
    fn test_persistence_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        {
            let registry = CidRegistry::open(dir.path(), Scope::Community);
            registry
                .insert("prompt-bbbb".to_string(), entry(Scope::Community, "bbbb"))
                .unwrap();
        }
        let reopened = CidRegistry::open(dir.path(), Scope::Community);
        let entry = reopened.get("prompt-bbbb").unwrap();
        assert_eq!(entry.content_hash, "bbbb");
        assert_eq!(entry.scope, Scope::Community);
    }
}
