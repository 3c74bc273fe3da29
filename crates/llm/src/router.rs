//! Model routing: selection, invocation, outcome recording, rotation.

use std::sync::Arc;
use std::time::Instant;

use crate::catalog::{estimate_tokens, ModelSelector};
use crate::errors::{LlmError, LlmResult};
use crate::provider::{GenerateOptions, LlmMessage, LlmResponse, Provider};
use crate::tracker::PerformanceTracker;

/// Output-token estimate used when the caller does not cap generation.
const DEFAULT_OUTPUT_ESTIMATE: u64 = 2_000;

/// A routed generation result.
#[derive(Debug, Clone)]
pub struct RoutedResponse {
    pub response: LlmResponse,
    /// The model that actually served the request.
    pub model: String,
    /// The request may have exceeded the model's documented limits.
    pub may_exceed_limits: bool,
}

/// Routes generation requests across providers, weighted by past
/// performance, rotating away from failing models.
///
/// Within one request, candidate models are tried strictly sequentially;
/// there are never concurrent calls for the same stage attempt.
pub struct ModelRouter {
    providers: Vec<Arc<dyn Provider>>,
    selector: ModelSelector,
    tracker: Arc<PerformanceTracker>,
}

impl ModelRouter {
    pub fn new(
        providers: Vec<Arc<dyn Provider>>,
        selector: ModelSelector,
        tracker: Arc<PerformanceTracker>,
    ) -> Self {
        Self {
            providers,
            selector,
            tracker,
        }
    }

    pub fn tracker(&self) -> &Arc<PerformanceTracker> {
        &self.tracker
    }

    /// The configured provider serving a given model, if any.
    fn provider_for(&self, model: &str) -> Option<Arc<dyn Provider>> {
        self.providers
            .iter()
            .find(|p| p.is_configured() && p.supports_model(model))
            .cloned()
    }

    /// Generate text, rotating across candidate models on failure.
    pub async fn generate(
        &self,
        messages: &[LlmMessage],
        options: &GenerateOptions,
    ) -> LlmResult<RoutedResponse> {
        let estimated_input: u64 = messages.iter().map(|m| estimate_tokens(&m.content)).sum();
        let estimated_output = options.max_tokens.map_or(DEFAULT_OUTPUT_ESTIMATE, u64::from);

        let initial = self.selector.select(estimated_input, estimated_output, true)?;

        // Every catalogue model that fits is a rotation candidate, ordered
        // by (priority, cost) so that weighted-score ties resolve toward
        // the cheaper model. The flagged fallback case keeps only the
        // initial pick.
        let candidates: Vec<String> = if initial.may_exceed_limits {
            vec![initial.spec.name.to_string()]
        } else {
            let cost_of = |spec: &crate::catalog::ModelSpec| {
                (estimated_input as f64 / 1000.0) * spec.cost_per_1k_input
                    + (estimated_output as f64 / 1000.0) * spec.cost_per_1k_output
            };
            let mut fitting: Vec<&crate::catalog::ModelSpec> = self
                .selector
                .catalog()
                .models()
                .iter()
                .filter(|spec| {
                    spec.enabled
                        && estimated_input <= spec.input_tokens
                        && estimated_output <= spec.output_tokens
                })
                .collect();
            fitting.sort_by(|a, b| {
                a.priority
                    .cmp(&b.priority)
                    .then_with(|| cost_of(a).total_cmp(&cost_of(b)))
            });
            fitting.iter().map(|spec| spec.name.to_string()).collect()
        };

        // The tracker has the final say on the starting model: it excludes
        // repeat offenders and prefers models that have not been hammered
        // recently.
        let mut current = self
            .tracker
            .rotate(&candidates, &[])
            .unwrap_or_else(|| initial.spec.name.to_string());
        let mut tried: Vec<String> = Vec::new();
        let mut last_error: Option<LlmError> = None;

        loop {
            let Some(provider) = self.provider_for(&current) else {
                tried.push(current.clone());
                last_error = Some(LlmError::NotConfigured(current.clone()));
                match self.next_candidate(&candidates, &tried) {
                    Some(next) => {
                        current = next;
                        continue;
                    }
                    None => break,
                }
            };

            tracing::info!(model = %current, provider = provider.name(), "Dispatching generation");
            let started = Instant::now();

            match provider.generate(&current, messages, options).await {
                Ok(response) => {
                    let elapsed_ms = started.elapsed().as_millis() as f64;
                    self.tracker.record_success(
                        &current,
                        u64::from(response.usage.total_tokens),
                        elapsed_ms,
                    );
                    return Ok(RoutedResponse {
                        response,
                        model: current,
                        may_exceed_limits: initial.may_exceed_limits,
                    });
                }
                Err(e) => {
                    tracing::warn!(model = %current, error = %e, "Generation failed; rotating");
                    self.tracker.record_failure(&current, 0);
                    tried.push(current.clone());
                    last_error = Some(e);
                    match self.next_candidate(&candidates, &tried) {
                        Some(next) => current = next,
                        None => break,
                    }
                }
            }
        }

        Err(LlmError::AllModelsFailed(
            last_error.map_or_else(|| "no candidates".to_string(), |e| e.to_string()),
        ))
    }

    /// Next rotation candidate that has not been tried in this request.
    fn next_candidate(&self, candidates: &[String], tried: &[String]) -> Option<String> {
        let remaining: Vec<String> = candidates
            .iter()
            .filter(|c| !tried.contains(c))
            .cloned()
            .collect();
        if remaining.is_empty() {
            return None;
        }
        self.tracker.rotate(&remaining, &[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ModelCatalog;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::Mutex;

    /// Scripted provider: named models fail, everything else echoes.
    struct ScriptedProvider {
        models: Vec<&'static str>,
        failing: HashSet<String>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedProvider {
        fn new(models: Vec<&'static str>, failing: &[&str]) -> Self {
            Self {
                models,
                failing: failing.iter().map(|s| s.to_string()).collect(),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn api_key_env_var(&self) -> &'static str {
            "SCRIPTED_API_KEY"
        }

        fn is_configured(&self) -> bool {
            true
        }

        fn supported_models(&self) -> Vec<&'static str> {
            self.models.clone()
        }

        async fn generate(
            &self,
            model: &str,
            _messages: &[LlmMessage],
            _options: &GenerateOptions,
        ) -> LlmResult<LlmResponse> {
            self.calls.lock().unwrap().push(model.to_string());
            if self.failing.contains(model) {
                return Err(LlmError::Api {
                    provider: "scripted".to_string(),
                    message: "scripted failure".to_string(),
                });
            }
            Ok(LlmResponse {
                text: "ok".to_string(),
                usage: crate::provider::TokenUsage {
                    input_tokens: 10,
                    output_tokens: 5,
                    total_tokens: 15,
                },
                model: model.to_string(),
                provider: "scripted".to_string(),
            })
        }
    }

    fn gemini_models() -> Vec<&'static str> {
        vec![
            "gemini-2.5-pro",
            "gemini-2.5-flash",
            "gemini-2.5-flash-lite",
            "gemini-2.0-flash",
            "gemini-2.0-flash-lite",
        ]
    }

    #[tokio::test]
    async fn test_rotates_past_failing_model() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = Arc::new(PerformanceTracker::open(dir.path()));
        let provider = Arc::new(ScriptedProvider::new(
            gemini_models(),
            &["gemini-2.0-flash-lite"],
        ));

        let router = ModelRouter::new(
            vec![provider.clone()],
            ModelSelector::new(ModelCatalog::for_providers(true, false)),
            tracker.clone(),
        );

        let messages = vec![LlmMessage::user("write an erc20 token")];
        let routed = router
            .generate(&messages, &GenerateOptions::default())
            .await
            .unwrap();

        // The preferred lite model fails once and a sibling serves the request.
        assert_ne!(routed.model, "gemini-2.0-flash-lite");
        let failed = tracker.performance("gemini-2.0-flash-lite").unwrap();
        assert_eq!(failed.failed_requests, 1);
        let served = tracker.performance(&routed.model).unwrap();
        assert_eq!(served.successful_requests, 1);
    }

    #[tokio::test]
    async fn test_all_models_failing_errors_out() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = Arc::new(PerformanceTracker::open(dir.path()));
        let all = gemini_models();
        let provider = Arc::new(ScriptedProvider::new(all.clone(), &all));

        let router = ModelRouter::new(
            vec![provider],
            ModelSelector::new(ModelCatalog::for_providers(true, false)),
            tracker,
        );

        let messages = vec![LlmMessage::user("write an erc20 token")];
        let err = router
            .generate(&messages, &GenerateOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::AllModelsFailed(_)));
    }

    #[tokio::test]
    async fn test_excluded_model_never_called() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = Arc::new(PerformanceTracker::open(dir.path()));
        // Three consecutive failures recorded beforehand push a model out
        // of rotation entirely.
        for _ in 0..3 {
            tracker.record_failure("gemini-2.0-flash-lite", 0);
        }

        let provider = Arc::new(ScriptedProvider::new(gemini_models(), &[]));
        let router = ModelRouter::new(
            vec![provider.clone()],
            ModelSelector::new(ModelCatalog::for_providers(true, false)),
            tracker.clone(),
        );

        let messages = vec![LlmMessage::user("write an erc20 token")];
        let routed = router
            .generate(&messages, &GenerateOptions::default())
            .await
            .unwrap();

        assert_ne!(routed.model, "gemini-2.0-flash-lite");
        // total_requests unchanged for the excluded model.
        assert_eq!(
            tracker
                .performance("gemini-2.0-flash-lite")
                .unwrap()
                .total_requests,
            3
        );
    }
}
