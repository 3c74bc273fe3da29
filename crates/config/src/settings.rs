//! Configuration types consumed by the workflow engine.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{ConfigError, ConfigResult};

/// One target chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub rpc_url: String,
    pub chain_id: u64,
    pub explorer_url: String,
}

/// API keys for the configured LLM providers. At minimum one must be set
/// or the generation stage fails at its first attempt.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LlmCredentials {
    #[serde(default)]
    pub gemini_api_key: Option<String>,
    #[serde(default)]
    pub openai_api_key: Option<String>,
    /// Override endpoints, mainly for tests.
    #[serde(default)]
    pub gemini_base_url: Option<String>,
    #[serde(default)]
    pub openai_base_url: Option<String>,
}

impl LlmCredentials {
    pub fn any_configured(&self) -> bool {
        self.gemini_api_key.is_some() || self.openai_api_key.is_some()
    }
}

/// Pinning-service credentials. Team is required for uploads; community
/// falls back to team credentials when absent, but registries stay apart.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PinningCredentials {
    #[serde(default)]
    pub team_api_key: Option<String>,
    #[serde(default)]
    pub team_api_secret: Option<String>,
    #[serde(default)]
    pub community_api_key: Option<String>,
    #[serde(default)]
    pub community_api_secret: Option<String>,
    #[serde(default)]
    pub api_base_url: Option<String>,
    #[serde(default)]
    pub gateway_base_url: Option<String>,
}

/// Retry and escalation policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardrailSettings {
    #[serde(default = "default_max_retries")]
    pub max_retries_per_stage: u32,
    #[serde(default = "default_true")]
    pub enable_escalation: bool,
    #[serde(default)]
    pub escalation_webhook_url: Option<String>,
    #[serde(default)]
    pub pause_on_max_retries: bool,
}

fn default_max_retries() -> u32 {
    3
}

fn default_true() -> bool {
    true
}

impl Default for GuardrailSettings {
    fn default() -> Self {
        Self {
            max_retries_per_stage: default_max_retries(),
            enable_escalation: true,
            escalation_webhook_url: None,
            pause_on_max_retries: false,
        }
    }
}

/// Artifact-store namespace to upload workflow artifacts into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UploadScope {
    #[default]
    None,
    Team,
    Community,
}

/// The full recognised configuration mapping. Unknown keys are ignored.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ForgeflowConfig {
    #[serde(default)]
    pub networks: BTreeMap<String, NetworkConfig>,
    #[serde(default)]
    pub llm: LlmCredentials,
    #[serde(default)]
    pub pinning: PinningCredentials,
    #[serde(default)]
    pub guardrails: GuardrailSettings,
    #[serde(default)]
    pub workspace_dir: Option<PathBuf>,
}

impl ForgeflowConfig {
    /// Configuration with the built-in network set, used when no config
    /// file is supplied. Credentials still come from the environment.
    pub fn builtin() -> Self {
        let mut networks = BTreeMap::new();
        networks.insert(
            "hyperion".to_string(),
            NetworkConfig {
                rpc_url: "https://hyperion-testnet.metisdevops.link".to_string(),
                chain_id: 133_717,
                explorer_url: "https://hyperion-testnet-explorer.metisdevops.link".to_string(),
            },
        );
        networks.insert(
            "ethereum".to_string(),
            NetworkConfig {
                rpc_url: "https://eth.llamarpc.com".to_string(),
                chain_id: 1,
                explorer_url: "https://etherscan.io".to_string(),
            },
        );
        networks.insert(
            "polygon".to_string(),
            NetworkConfig {
                rpc_url: "https://polygon-rpc.com".to_string(),
                chain_id: 137,
                explorer_url: "https://polygonscan.com".to_string(),
            },
        );
        networks.insert(
            "arbitrum".to_string(),
            NetworkConfig {
                rpc_url: "https://arb1.arbitrum.io/rpc".to_string(),
                chain_id: 42_161,
                explorer_url: "https://arbiscan.io".to_string(),
            },
        );
        networks.insert(
            "metis".to_string(),
            NetworkConfig {
                rpc_url: "https://andromeda.metis.io/?owner=1088".to_string(),
                chain_id: 1_088,
                explorer_url: "https://explorer.metis.io".to_string(),
            },
        );
        networks.insert(
            "lazai".to_string(),
            NetworkConfig {
                rpc_url: "https://testnet.lazai.network".to_string(),
                chain_id: 133_718,
                explorer_url: "https://testnet-explorer.lazai.network".to_string(),
            },
        );

        let mut config = Self {
            networks,
            ..Default::default()
        };
        config.apply_env_fallbacks();
        config
    }

    /// Load from a JSON file, with environment-variable fallbacks for
    /// credentials (`GEMINI_API_KEY`, `OPENAI_API_KEY`, `PINATA_TEAM_API_KEY`,
    /// `PINATA_TEAM_API_SECRET`, `PINATA_COMMUNITY_API_KEY`,
    /// `PINATA_COMMUNITY_API_SECRET`).
    pub fn from_json_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let mut config: Self = serde_json::from_str(&content)?;
        config.apply_env_fallbacks();
        Ok(config)
    }

    /// Credentials from the environment fill gaps the file leaves.
    pub fn apply_env_fallbacks(&mut self) {
        let env = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());

        if self.llm.gemini_api_key.is_none() {
            self.llm.gemini_api_key = env("GEMINI_API_KEY");
        }
        if self.llm.openai_api_key.is_none() {
            self.llm.openai_api_key = env("OPENAI_API_KEY");
        }
        if self.pinning.team_api_key.is_none() {
            self.pinning.team_api_key = env("PINATA_TEAM_API_KEY");
        }
        if self.pinning.team_api_secret.is_none() {
            self.pinning.team_api_secret = env("PINATA_TEAM_API_SECRET");
        }
        if self.pinning.community_api_key.is_none() {
            self.pinning.community_api_key = env("PINATA_COMMUNITY_API_KEY");
        }
        if self.pinning.community_api_secret.is_none() {
            self.pinning.community_api_secret = env("PINATA_COMMUNITY_API_SECRET");
        }
    }

    /// Resolve a network by name. Exactly one network identity is required
    /// per run; unknown names are rejected with the valid set listed.
    pub fn resolve_network(&self, name: &str) -> ConfigResult<&NetworkConfig> {
        if self.networks.is_empty() {
            return Err(ConfigError::NoNetworks);
        }
        self.networks.get(name).ok_or_else(|| ConfigError::UnknownNetwork {
            name: name.to_string(),
            valid: self.networks.keys().cloned().collect::<Vec<_>>().join(", "),
        })
    }

    /// Workspace root, defaulting to the current directory.
    pub fn workspace_dir(&self) -> PathBuf {
        self.workspace_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_networks() -> ForgeflowConfig {
        let json = serde_json::json!({
            "networks": {
                "hyperion": {
                    "rpc_url": "https://hyperion.metisdevops.link",
                    "chain_id": 133717,
                    "explorer_url": "https://hyperion-testnet-explorer.metisdevops.link"
                },
                "ethereum": {
                    "rpc_url": "https://eth.llamarpc.com",
                    "chain_id": 1,
                    "explorer_url": "https://etherscan.io"
                }
            },
            "some_future_key": {"ignored": true}
        });
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_unknown_keys_ignored() {
        let config = config_with_networks();
        assert_eq!(config.networks.len(), 2);
    }

    #[test]
    fn test_resolve_known_network() {
        let config = config_with_networks();
        let network = config.resolve_network("hyperion").unwrap();
        assert_eq!(network.chain_id, 133717);
    }

    #[test]
    fn test_unknown_network_lists_valid_names() {
        let config = config_with_networks();
        let err = config.resolve_network("moonbase").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("moonbase"));
        assert!(message.contains("hyperion"));
        assert!(message.contains("ethereum"));
    }

    #[test]
    fn test_empty_networks_rejected() {
        let config = ForgeflowConfig::default();
        assert!(matches!(
            config.resolve_network("hyperion"),
            Err(ConfigError::NoNetworks)
        ));
    }

    #[test]
    fn test_guardrail_defaults() {
        let settings = GuardrailSettings::default();
        assert_eq!(settings.max_retries_per_stage, 3);
        assert!(settings.enable_escalation);
        assert!(!settings.pause_on_max_retries);
    }
}
