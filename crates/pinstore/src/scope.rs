//! Scope and artifact classification.

use serde::{Deserialize, Serialize};

/// Upload namespace. Team and community artifacts never share a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// Official, production-vetted artifacts.
    Team,
    /// User-generated, possibly untrusted artifacts.
    Community,
}

impl Scope {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Team => "team",
            Self::Community => "community",
        }
    }

    /// Registry file name for this scope.
    pub fn registry_file(self) -> &'static str {
        match self {
            Self::Team => "cid-registry-team.json",
            Self::Community => "cid-registry-community.json",
        }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What kind of artifact is being stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Contract,
    Prompt,
    Workflow,
    Metadata,
}

impl ArtifactKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Contract => "contract",
            Self::Prompt => "prompt",
            Self::Workflow => "workflow",
            Self::Metadata => "metadata",
        }
    }
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_serde_tags() {
        assert_eq!(serde_json::to_string(&Scope::Team).unwrap(), "\"team\"");
        assert_eq!(
            serde_json::to_string(&Scope::Community).unwrap(),
            "\"community\""
        );
    }

    #[test]
    fn test_registry_files_are_distinct() {
        assert_ne!(Scope::Team.registry_file(), Scope::Community.registry_file());
    }
}
