//! Static model catalogue and capacity/cost-aware selection.

use serde::{Deserialize, Serialize};

use crate::errors::{LlmError, LlmResult};

/// Model tiers for cost/performance trade-offs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelTier {
    /// Cheapest, fastest.
    Lite,
    /// Balanced.
    Flash,
    /// Most capable, most expensive.
    Pro,
}

/// One catalogue entry.
#[derive(Debug, Clone, Serialize)]
pub struct ModelSpec {
    pub name: &'static str,
    pub provider: &'static str,
    pub tier: ModelTier,
    /// Maximum input tokens.
    pub input_tokens: u64,
    /// Maximum output tokens.
    pub output_tokens: u64,
    pub cost_per_1k_input: f64,
    pub cost_per_1k_output: f64,
    pub enabled: bool,
    /// Lower is preferred.
    pub priority: u8,
}

/// Gemini tier of the catalogue.
const GEMINI_MODELS: &[ModelSpec] = &[
    ModelSpec {
        name: "gemini-2.5-pro",
        provider: "gemini",
        tier: ModelTier::Pro,
        input_tokens: 240_000_000,
        output_tokens: 30_000_000,
        cost_per_1k_input: 0.001,
        cost_per_1k_output: 0.002,
        enabled: true,
        priority: 3,
    },
    ModelSpec {
        name: "gemini-2.5-flash",
        provider: "gemini",
        tier: ModelTier::Flash,
        input_tokens: 1_000_000_000,
        output_tokens: 120_000_000,
        cost_per_1k_input: 0.0001,
        cost_per_1k_output: 0.0003,
        enabled: true,
        priority: 2,
    },
    ModelSpec {
        name: "gemini-2.5-flash-lite",
        provider: "gemini",
        tier: ModelTier::Lite,
        input_tokens: 3_000_000_000,
        output_tokens: 750_000_000,
        cost_per_1k_input: 0.00005,
        cost_per_1k_output: 0.0001,
        enabled: true,
        priority: 1,
    },
    ModelSpec {
        name: "gemini-2.0-flash",
        provider: "gemini",
        tier: ModelTier::Flash,
        input_tokens: 2_000_000_000,
        output_tokens: 500_000_000,
        cost_per_1k_input: 0.00008,
        cost_per_1k_output: 0.0002,
        enabled: true,
        priority: 2,
    },
    ModelSpec {
        name: "gemini-2.0-flash-lite",
        provider: "gemini",
        tier: ModelTier::Lite,
        input_tokens: 4_000_000_000,
        output_tokens: 1_000_000_000,
        cost_per_1k_input: 0.00004,
        cost_per_1k_output: 0.00008,
        enabled: true,
        priority: 1,
    },
];

/// OpenAI fallback tier.
const OPENAI_MODELS: &[ModelSpec] = &[
    ModelSpec {
        name: "gpt-4o-mini",
        provider: "openai",
        tier: ModelTier::Flash,
        input_tokens: 128_000,
        output_tokens: 16_000,
        cost_per_1k_input: 0.00015,
        cost_per_1k_output: 0.0006,
        enabled: true,
        priority: 4,
    },
    ModelSpec {
        name: "gpt-3.5-turbo",
        provider: "openai",
        tier: ModelTier::Lite,
        input_tokens: 16_385,
        output_tokens: 4_096,
        cost_per_1k_input: 0.0005,
        cost_per_1k_output: 0.0015,
        enabled: true,
        priority: 5,
    },
];

/// The set of models available to this process, filtered by configured
/// providers.
#[derive(Debug, Clone)]
pub struct ModelCatalog {
    models: Vec<ModelSpec>,
}

impl ModelCatalog {
    /// Catalogue restricted to the providers that have credentials.
    pub fn for_providers(gemini_available: bool, openai_available: bool) -> Self {
        let mut models = Vec::new();
        if gemini_available {
            models.extend_from_slice(GEMINI_MODELS);
            tracing::info!(count = GEMINI_MODELS.len(), "Loaded Gemini models");
        }
        if openai_available {
            models.extend_from_slice(OPENAI_MODELS);
            tracing::info!(count = OPENAI_MODELS.len(), "Loaded OpenAI models (fallback)");
        }
        Self { models }
    }

    /// Full catalogue, regardless of credentials. Used by tests and stats.
    pub fn all() -> Self {
        Self::for_providers(true, true)
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.models.iter().map(|m| m.name.to_string()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&ModelSpec> {
        self.models.iter().find(|m| m.name == name)
    }

    pub fn models(&self) -> &[ModelSpec] {
        &self.models
    }
}

/// Result of a selection pass.
#[derive(Debug, Clone)]
pub struct ModelSelection {
    pub spec: ModelSpec,
    pub estimated_cost: f64,
    /// Set when no candidate fits and the largest-capacity model was
    /// returned as a last resort.
    pub may_exceed_limits: bool,
}

/// Capacity- and cost-aware model selection over a catalogue.
#[derive(Debug, Clone)]
pub struct ModelSelector {
    catalog: ModelCatalog,
}

impl ModelSelector {
    pub fn new(catalog: ModelCatalog) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    /// Select the best model for the token estimates.
    ///
    /// Candidates are models whose capacities accommodate both estimates,
    /// ordered by `(priority, cost)` when `prefer_cheap` and
    /// `(priority, -cost)` otherwise. When nothing fits, the model with the
    /// greatest `min(input, output)` capacity is returned flagged.
    pub fn select(
        &self,
        estimated_input_tokens: u64,
        estimated_output_tokens: u64,
        prefer_cheap: bool,
    ) -> LlmResult<ModelSelection> {
        if self.catalog.is_empty() {
            return Err(LlmError::NoModelAvailable);
        }

        let cost_of = |spec: &ModelSpec| {
            (estimated_input_tokens as f64 / 1000.0) * spec.cost_per_1k_input
                + (estimated_output_tokens as f64 / 1000.0) * spec.cost_per_1k_output
        };

        let mut candidates: Vec<&ModelSpec> = self
            .catalog
            .models()
            .iter()
            .filter(|spec| {
                spec.enabled
                    && estimated_input_tokens <= spec.input_tokens
                    && estimated_output_tokens <= spec.output_tokens
            })
            .collect();

        if candidates.is_empty() {
            tracing::warn!(
                input = estimated_input_tokens,
                output = estimated_output_tokens,
                "No model fits the token estimates; falling back to largest capacity"
            );
            let fallback = self
                .catalog
                .models()
                .iter()
                .max_by_key(|spec| spec.input_tokens.min(spec.output_tokens))
                .ok_or(LlmError::NoModelAvailable)?;
            return Ok(ModelSelection {
                spec: fallback.clone(),
                estimated_cost: cost_of(fallback),
                may_exceed_limits: true,
            });
        }

        candidates.sort_by(|a, b| {
            a.priority.cmp(&b.priority).then_with(|| {
                let ca = cost_of(a);
                let cb = cost_of(b);
                if prefer_cheap {
                    ca.total_cmp(&cb)
                } else {
                    cb.total_cmp(&ca)
                }
            })
        });

        let best = candidates[0];
        let selection = ModelSelection {
            spec: best.clone(),
            estimated_cost: cost_of(best),
            may_exceed_limits: false,
        };

        tracing::info!(
            model = best.name,
            tier = ?best.tier,
            cost = selection.estimated_cost,
            "Selected model"
        );

        Ok(selection)
    }
}

/// Estimate the token count of a piece of text.
///
/// Code-like text (anything mentioning pragma/contract/function/solidity)
/// runs about 3 characters per token; prose about 4.
pub fn estimate_tokens(text: &str) -> u64 {
    let lower = text.to_lowercase();
    let code_like = ["pragma", "contract", "function", "solidity"]
        .iter()
        .any(|kw| lower.contains(kw));
    let chars_per_token = if code_like { 3 } else { 4 };
    (text.len() / chars_per_token) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cheapest_lite_wins_for_small_request() {
        let selector = ModelSelector::new(ModelCatalog::all());
        let selection = selector.select(1_000, 2_000, true).unwrap();

        // Priority 1 models are the lite Gemini pair; the 2.0 lite is cheaper.
        assert_eq!(selection.spec.name, "gemini-2.0-flash-lite");
        assert!(!selection.may_exceed_limits);
    }

    #[test]
    fn test_prefer_expensive_flips_cost_order() {
        let selector = ModelSelector::new(ModelCatalog::all());
        let selection = selector.select(1_000, 2_000, false).unwrap();
        assert_eq!(selection.spec.name, "gemini-2.5-flash-lite");
    }

    #[test]
    fn test_fallback_flags_overflow() {
        let selector = ModelSelector::new(ModelCatalog::for_providers(false, true));
        // Larger than every OpenAI capacity.
        let selection = selector.select(10_000_000, 1_000_000, true).unwrap();
        assert!(selection.may_exceed_limits);
        assert_eq!(selection.spec.name, "gpt-4o-mini");
    }

    #[test]
    fn test_empty_catalog_errors() {
        let selector = ModelSelector::new(ModelCatalog::for_providers(false, false));
        assert!(matches!(
            selector.select(100, 100, true),
            Err(LlmError::NoModelAvailable)
        ));
    }

    #[test]
    fn test_token_estimation_heuristic() {
        let prose = "a plain english sentence about nothing in particular";
        assert_eq!(estimate_tokens(prose), (prose.len() / 4) as u64);

        let code = "pragma solidity ^0.8.24; contract T {}";
        assert_eq!(estimate_tokens(code), (code.len() / 3) as u64);
    }
}
