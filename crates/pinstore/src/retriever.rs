//! Retrieval bridge over the artifact registries.
//!
//! Retrieval scans the team registry (and the community registry only when
//! the scope allows it), scores candidates by keyword overlap against
//! their pin metadata, and fetches the winners through the gateway. The
//! retrieved text becomes generation context. Unavailability is degraded,
//! not fatal.

use std::sync::Arc;

use model::{RagScope, RagStatus};

use crate::client::PinClient;
use crate::registry::RegistryEntry;
use crate::scope::Scope;

/// Retrieved context plus the status recorded into the workflow.
#[derive(Debug, Clone)]
pub struct RetrievedContext {
    pub context: String,
    pub status: RagStatus,
}

impl RetrievedContext {
    fn empty(scope: RagScope) -> Self {
        Self {
            context: String::new(),
            status: RagStatus {
                context_retrieved: false,
                scope,
                sources: Vec::new(),
            },
        }
    }
}

/// Scores and fetches registered artifacts for a query.
pub struct Retriever {
    client: Arc<PinClient>,
}

impl Retriever {
    pub fn new(client: Arc<PinClient>) -> Self {
        Self { client }
    }

    /// Retrieve up to `limit` artifacts relevant to `query`.
    ///
    /// With `RagScope::OfficialOnly`, only team-registered artifacts are
    /// candidates; a community artifact never leaks into official-only
    /// retrieval however well it matches.
    pub async fn retrieve(&self, query: &str, scope: RagScope, limit: usize) -> RetrievedContext {
        let mut candidates: Vec<(f64, String, RegistryEntry)> = Vec::new();

        for (id, entry) in self.client.registry(Scope::Team).entries() {
            let score = relevance(query, &id, &entry);
            if score > 0.0 {
                candidates.push((score, id, entry));
            }
        }
        if scope == RagScope::CommunityAllowed {
            for (id, entry) in self.client.registry(Scope::Community).entries() {
                let score = relevance(query, &id, &entry);
                if score > 0.0 {
                    candidates.push((score, id, entry));
                }
            }
        }

        if candidates.is_empty() {
            tracing::debug!(query, "No matching artifacts for retrieval");
            return RetrievedContext::empty(scope);
        }

        candidates.sort_by(|a, b| b.0.total_cmp(&a.0));
        candidates.truncate(limit);

        let mut sections: Vec<String> = Vec::new();
        let mut sources: Vec<String> = Vec::new();

        for (_, id, entry) in candidates {
            match self.client.fetch(&entry.cid).await {
                Ok(content) => {
                    sections.push(format!("## {id}\n{content}"));
                    sources.push(entry.cid);
                }
                Err(e) => {
                    tracing::warn!(cid = %entry.cid, error = %e, "Gateway fetch failed; skipping artifact");
                }
            }
        }

        if sections.is_empty() {
            return RetrievedContext::empty(scope);
        }

        tracing::info!(sources = sources.len(), "Retrieved artifact context");
        RetrievedContext {
            context: sections.join("\n\n"),
            status: RagStatus {
                context_retrieved: true,
                scope,
                sources,
            },
        }
    }
}

/// Keyword-overlap relevance of an entry for a query.
fn relevance(query: &str, artifact_id: &str, entry: &RegistryEntry) -> f64 {
    let mut haystack = artifact_id.to_lowercase();
    haystack.push(' ');
    haystack.push_str(entry.artifact_type.as_str());
    if let Some(metadata) = &entry.metadata {
        if let Some(name) = metadata.get("name").and_then(|v| v.as_str()) {
            haystack.push(' ');
            haystack.push_str(&name.to_lowercase());
        }
        if let Some(description) = metadata.get("description").and_then(|v| v.as_str()) {
            haystack.push(' ');
            haystack.push_str(&description.to_lowercase());
        }
        if let Some(tags) = metadata.get("tags").and_then(|v| v.as_array()) {
            for tag in tags.iter().filter_map(|t| t.as_str()) {
                haystack.push(' ');
                haystack.push_str(&tag.to_lowercase());
            }
        }
    }

    let keywords: Vec<String> = query
        .to_lowercase()
        .split_whitespace()
        .filter(|w| w.len() > 2)
        .map(str::to_string)
        .collect();
    if keywords.is_empty() {
        return 0.0;
    }

    let hits = keywords.iter().filter(|k| haystack.contains(k.as_str())).count();
    hits as f64 / keywords.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::ArtifactKind;
    use chrono::Utc;

    fn entry_with_tags(tags: &[&str]) -> RegistryEntry {
        RegistryEntry {
            cid: "bafytest".to_string(),
            scope: Scope::Team,
            artifact_type: ArtifactKind::Contract,
            content_hash: "abcd".to_string(),
            timestamp: Utc::now(),
            workflow_signature: None,
            uploader_id: None,
            ipfs_url: "ipfs://bafytest".to_string(),
            gateway_url: "https://gateway.pinata.cloud/ipfs/bafytest".to_string(),
            metadata: Some(serde_json::json!({
                "name": "erc20 template",
                "description": "standard fungible token scaffold",
                "tags": tags,
            })),
        }
    }

    #[test]
    fn test_relevance_counts_keyword_hits() {
        let entry = entry_with_tags(&["erc20", "openzeppelin"]);
        let score = relevance("erc20 token template", "contract-abcd", &entry);
        assert!(score > 0.5, "score was {score}");

        let miss = relevance("lending vault liquidation", "contract-abcd", &entry);
        assert_eq!(miss, 0.0);
    }

    #[test]
    fn test_short_words_ignored() {
        let entry = entry_with_tags(&[]);
        assert_eq!(relevance("a an of", "contract-abcd", &entry), 0.0);
    }
}
