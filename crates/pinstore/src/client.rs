//! Dual-scope pinning client.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::errors::{PinError, PinResult};
use crate::registry::{artifact_id, CidRegistry, RegistryEntry};
use crate::scope::{ArtifactKind, Scope};

/// Default pinning API base.
const PINATA_API_URL: &str = "https://api.pinata.cloud";

/// Default gateway base for retrieval URLs.
const GATEWAY_URL: &str = "https://gateway.pinata.cloud";

/// Upload timeout.
const UPLOAD_TIMEOUT_SECS: u64 = 60;

/// One scope's API key pair.
#[derive(Debug, Clone)]
pub struct PinCredentials {
    pub api_key: String,
    pub api_secret: String,
}

/// Optional upload metadata.
#[derive(Debug, Clone, Default)]
pub struct UploadOptions {
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub keyvalues: BTreeMap<String, String>,
    pub workflow_signature: Option<String>,
    /// Recorded as `uploader_id`, community scope only.
    pub user_id: Option<String>,
}

/// Result of a successful upload.
#[derive(Debug, Clone)]
pub struct UploadReceipt {
    pub cid: String,
    pub scope: Scope,
    pub artifact_id: String,
    pub ipfs_url: String,
    pub gateway_url: String,
    pub registry_entry: RegistryEntry,
}

#[derive(Debug, Serialize)]
struct PinataMetadata {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tags: Vec<String>,
    keyvalues: BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PinataOptions {
    cid_version: u8,
}

#[derive(Debug, Deserialize)]
struct PinataResponse {
    #[serde(rename = "IpfsHash")]
    ipfs_hash: String,
}

/// Client for both artifact scopes.
///
/// Community credentials fall back to team credentials when absent, but
/// registry separation is unconditional, and a failed upload never falls
/// through to the other scope.
pub struct PinClient {
    client: reqwest::Client,
    api_base: String,
    gateway_base: String,
    team: Option<PinCredentials>,
    community: Option<PinCredentials>,
    team_registry: Arc<CidRegistry>,
    community_registry: Arc<CidRegistry>,
}

impl PinClient {
    pub fn new(
        registry_dir: &Path,
        team: Option<PinCredentials>,
        community: Option<PinCredentials>,
    ) -> Self {
        if team.is_none() {
            tracing::warn!("Team pinning credentials not configured; team uploads will fail");
        }
        Self {
            client: reqwest::Client::new(),
            api_base: PINATA_API_URL.to_string(),
            gateway_base: GATEWAY_URL.to_string(),
            team,
            community,
            team_registry: Arc::new(CidRegistry::open(registry_dir, Scope::Team)),
            community_registry: Arc::new(CidRegistry::open(registry_dir, Scope::Community)),
        }
    }

    /// Point at different endpoints, mainly for tests.
    pub fn with_endpoints(mut self, api_base: impl Into<String>, gateway_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self.gateway_base = gateway_base.into();
        self
    }

    pub fn registry(&self, scope: Scope) -> &Arc<CidRegistry> {
        match scope {
            Scope::Team => &self.team_registry,
            Scope::Community => &self.community_registry,
        }
    }

    pub fn gateway_base(&self) -> &str {
        &self.gateway_base
    }

    fn credentials_for(&self, scope: Scope) -> PinResult<&PinCredentials> {
        match scope {
            Scope::Team => self.team.as_ref().ok_or(PinError::NotConfigured { scope }),
            // Community falls back to team credentials; never the reverse.
            Scope::Community => self
                .community
                .as_ref()
                .or(self.team.as_ref())
                .ok_or(PinError::NotConfigured { scope }),
        }
    }

    /// Upload an artifact into a scope's namespace.
    ///
    /// On success the artifact is registered in the scope's registry and the
    /// registry is persisted before the receipt is returned. On failure the
    /// error is terminal for this call; nothing is written.
    pub async fn upload(
        &self,
        content: &str,
        kind: ArtifactKind,
        scope: Scope,
        options: UploadOptions,
    ) -> PinResult<UploadReceipt> {
        let credentials = self.credentials_for(scope)?;

        let content_hash = hex::encode(Sha256::digest(content.as_bytes()));
        let timestamp = Utc::now();

        let mut keyvalues = options.keyvalues.clone();
        keyvalues.insert("scope".to_string(), scope.as_str().to_string());
        keyvalues.insert("artifact_type".to_string(), kind.as_str().to_string());
        keyvalues.insert("content_hash".to_string(), content_hash.clone());
        keyvalues.insert("timestamp".to_string(), timestamp.to_rfc3339());
        if let Some(signature) = &options.workflow_signature {
            keyvalues.insert("workflow_signature".to_string(), signature.clone());
        }
        if scope == Scope::Community {
            if let Some(user_id) = &options.user_id {
                keyvalues.insert("uploader_id".to_string(), user_id.clone());
            }
        }

        let metadata = PinataMetadata {
            name: format!("{kind}-{}", timestamp.to_rfc3339()),
            description: options.description.clone(),
            tags: options.tags.clone(),
            keyvalues,
        };
        let metadata_json = serde_json::to_value(&metadata)
            .map_err(|e| PinError::Request(format!("metadata serialization: {e}")))?;

        let form = Form::new()
            .part(
                "file",
                Part::bytes(content.as_bytes().to_vec()).file_name(format!("{kind}.txt")),
            )
            .text("pinataMetadata", metadata_json.to_string())
            .text(
                "pinataOptions",
                serde_json::to_string(&PinataOptions { cid_version: 1 })
                    .map_err(|e| PinError::Request(e.to_string()))?,
            );

        let response = self
            .client
            .post(format!("{}/pinning/pinFileToIPFS", self.api_base))
            .header("pinata_api_key", &credentials.api_key)
            .header("pinata_secret_api_key", &credentials.api_secret)
            .timeout(Duration::from_secs(UPLOAD_TIMEOUT_SECS))
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    PinError::Timeout(UPLOAD_TIMEOUT_SECS)
                } else {
                    PinError::Request(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(scope = %scope, status = status.as_u16(), "Pinning upload failed");
            return Err(PinError::UploadFailed {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: PinataResponse = response
            .json()
            .await
            .map_err(|e| PinError::Request(format!("failed to parse pin response: {e}")))?;
        let cid = parsed.ipfs_hash;

        let id = artifact_id(kind, &content_hash);
        let entry = RegistryEntry {
            cid: cid.clone(),
            scope,
            artifact_type: kind,
            content_hash,
            timestamp,
            workflow_signature: options.workflow_signature,
            uploader_id: if scope == Scope::Community {
                options.user_id
            } else {
                None
            },
            ipfs_url: format!("ipfs://{cid}"),
            gateway_url: format!("{}/ipfs/{cid}", self.gateway_base),
            metadata: Some(metadata_json),
        };

        self.registry(scope).insert(id.clone(), entry.clone())?;

        tracing::info!(scope = %scope, kind = %kind, cid = %cid, "Uploaded artifact");

        Ok(UploadReceipt {
            cid: entry.cid.clone(),
            scope,
            artifact_id: id,
            ipfs_url: entry.ipfs_url.clone(),
            gateway_url: entry.gateway_url.clone(),
            registry_entry: entry,
        })
    }

    /// Fetch pinned bytes back through the gateway.
    pub async fn fetch(&self, cid: &str) -> PinResult<String> {
        let response = self
            .client
            .get(format!("{}/ipfs/{cid}", self.gateway_base))
            .timeout(Duration::from_secs(UPLOAD_TIMEOUT_SECS))
            .send()
            .await
            .map_err(|e| PinError::GatewayFetch {
                cid: cid.to_string(),
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(PinError::GatewayFetch {
                cid: cid.to_string(),
                reason: format!("status {}", response.status()),
            });
        }

        response.text().await.map_err(|e| PinError::GatewayFetch {
            cid: cid.to_string(),
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_community_falls_back_to_team_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let client = PinClient::new(
            dir.path(),
            Some(PinCredentials {
                api_key: "team-key".to_string(),
                api_secret: "team-secret".to_string(),
            }),
            None,
        );

        let creds = client.credentials_for(Scope::Community).unwrap();
        assert_eq!(creds.api_key, "team-key");
    }

    #[test]
    fn test_team_never_uses_community_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let client = PinClient::new(
            dir.path(),
            None,
            Some(PinCredentials {
                api_key: "community-key".to_string(),
                api_secret: "community-secret".to_string(),
            }),
        );

        assert!(matches!(
            client.credentials_for(Scope::Team),
            Err(PinError::NotConfigured { scope: Scope::Team })
        ));
    }
}
