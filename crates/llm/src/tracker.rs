//! Per-model success tracking and performance-weighted rotation.
//!
//! The tracker is process-wide shared state: one instance, single writer
//! discipline enforced by an internal mutex, persisted atomically to
//! `.workflow_contexts/model_performance.json` on every mutation.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use model::fsutil;

/// Smoothing factor for the response-time moving average.
const RESPONSE_TIME_EMA_ALPHA: f64 = 0.1;

/// Consecutive failures after which a model leaves the rotation.
const CONSECUTIVE_FAILURE_LIMIT: u32 = 3;

/// Performance metrics for a single model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelPerformance {
    pub model_name: String,
    #[serde(default)]
    pub total_requests: u64,
    #[serde(default)]
    pub successful_requests: u64,
    #[serde(default)]
    pub failed_requests: u64,
    #[serde(default)]
    pub total_tokens_used: u64,
    #[serde(default)]
    pub avg_response_time_ms: f64,
    #[serde(default)]
    pub last_used: Option<DateTime<Utc>>,
    #[serde(default)]
    pub consecutive_failures: u32,
    #[serde(default)]
    pub success_rate: f64,
}

impl ModelPerformance {
    fn new(model_name: impl Into<String>) -> Self {
        Self {
            model_name: model_name.into(),
            total_requests: 0,
            successful_requests: 0,
            failed_requests: 0,
            total_tokens_used: 0,
            avg_response_time_ms: 0.0,
            last_used: None,
            consecutive_failures: 0,
            success_rate: 0.0,
        }
    }

    fn update_success(&mut self, tokens_used: u64, response_time_ms: f64) {
        self.total_requests += 1;
        self.successful_requests += 1;
        self.total_tokens_used += tokens_used;
        self.consecutive_failures = 0;
        self.last_used = Some(Utc::now());
        self.success_rate = self.successful_requests as f64 / self.total_requests as f64;

        if self.avg_response_time_ms == 0.0 {
            self.avg_response_time_ms = response_time_ms;
        } else {
            self.avg_response_time_ms = self.avg_response_time_ms
                * (1.0 - RESPONSE_TIME_EMA_ALPHA)
                + response_time_ms * RESPONSE_TIME_EMA_ALPHA;
        }
    }

    fn update_failure(&mut self, tokens_used: u64) {
        self.total_requests += 1;
        self.failed_requests += 1;
        self.total_tokens_used += tokens_used;
        self.consecutive_failures += 1;
        self.last_used = Some(Utc::now());
        self.success_rate = self.successful_requests as f64 / self.total_requests as f64;
    }
}

/// Persisted document layout.
#[derive(Debug, Serialize, Deserialize, Default)]
struct PerformanceFile {
    version: String,
    last_updated: Option<DateTime<Utc>>,
    #[serde(default)]
    models: BTreeMap<String, ModelPerformance>,
}

/// Summary statistics over all tracked models.
#[derive(Debug, Clone, Serialize)]
pub struct TrackerStatistics {
    pub total_models: usize,
    pub total_requests: u64,
    pub total_successful: u64,
    pub overall_success_rate: f64,
    pub models: BTreeMap<String, ModelPerformance>,
}

/// Thread-safe, persistent performance tracker.
pub struct PerformanceTracker {
    path: PathBuf,
    state: Mutex<BTreeMap<String, ModelPerformance>>,
}

impl PerformanceTracker {
    /// Load (or initialise) the tracker backed by
    /// `<contexts_dir>/model_performance.json`.
    pub fn open(contexts_dir: impl Into<PathBuf>) -> Self {
        let path = contexts_dir.into().join("model_performance.json");
        let models = match fsutil::read_json_or_default::<PerformanceFile>(&path) {
            Ok(file) => file.models,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load model performance data; starting fresh");
                BTreeMap::new()
            }
        };
        tracing::debug!(models = models.len(), "Loaded model performance data");
        Self {
            path,
            state: Mutex::new(models),
        }
    }

    /// Record a successful request. Safe to call from any task.
    pub fn record_success(&self, model_name: &str, tokens_used: u64, response_time_ms: f64) {
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        state
            .entry(model_name.to_string())
            .or_insert_with(|| ModelPerformance::new(model_name))
            .update_success(tokens_used, response_time_ms);
        let rate = state[model_name].success_rate;
        Self::persist(&self.path, &state);
        tracing::debug!(model = model_name, success_rate = rate, "Recorded success");
    }

    /// Record a failed request.
    pub fn record_failure(&self, model_name: &str, tokens_used: u64) {
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        state
            .entry(model_name.to_string())
            .or_insert_with(|| ModelPerformance::new(model_name))
            .update_failure(tokens_used);
        let failures = state[model_name].consecutive_failures;
        Self::persist(&self.path, &state);
        tracing::debug!(
            model = model_name,
            consecutive_failures = failures,
            "Recorded failure"
        );
    }

    pub fn performance(&self, model_name: &str) -> Option<ModelPerformance> {
        let state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        state.get(model_name).cloned()
    }

    /// Weighted score for selection; higher is better.
    ///
    /// `0.5·success_rate + 0.3·(1 / (1 + 0.5·consecutive_failures))
    ///  + 0.2·recency`, where recency saturates at 24 hours since last use.
    /// Models never seen before score a flat 1.0.
    pub fn weighted_score(&self, model_name: &str) -> f64 {
        let state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let Some(perf) = state.get(model_name) else {
            return 1.0;
        };

        let success_component = perf.success_rate;
        let failure_penalty = 1.0 / (1.0 + f64::from(perf.consecutive_failures) * 0.5);
        let recency_score = perf.last_used.map_or(1.0, |last| {
            let hours = (Utc::now() - last).num_seconds() as f64 / 3600.0;
            (hours / 24.0).min(1.0).max(0.0)
        });

        success_component * 0.5 + failure_penalty * 0.3 + recency_score * 0.2
    }

    /// Pick the highest-scoring model from the candidates. Ties keep the
    /// caller's ordering.
    pub fn select_best(&self, available_models: &[String]) -> Option<String> {
        let mut best: Option<(&String, f64)> = None;
        for name in available_models {
            let score = self.weighted_score(name);
            match best {
                Some((_, best_score)) if score <= best_score => {}
                _ => best = Some((name, score)),
            }
        }
        let (name, score) = best?;
        tracing::info!(model = %name, score, "Selected model by weighted score");
        Some(name.clone())
    }

    /// Rotate to the next model, excluding the given names and any model
    /// with too many consecutive failures, unless either exclusion would
    /// empty the candidate set.
    pub fn rotate(&self, available_models: &[String], exclude: &[String]) -> Option<String> {
        if available_models.is_empty() {
            return None;
        }

        let mut candidates: Vec<String> = available_models
            .iter()
            .filter(|m| !exclude.contains(m))
            .cloned()
            .collect();
        if candidates.is_empty() {
            candidates = available_models.to_vec();
        }

        let healthy: Vec<String> = {
            let state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            candidates
                .iter()
                .filter(|name| {
                    state
                        .get(name.as_str())
                        .map_or(true, |p| p.consecutive_failures < CONSECUTIVE_FAILURE_LIMIT)
                })
                .cloned()
                .collect()
        };

        let pool = if healthy.is_empty() { candidates } else { healthy };
        self.select_best(&pool)
    }

    pub fn statistics(&self) -> TrackerStatistics {
        let state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let total_requests: u64 = state.values().map(|p| p.total_requests).sum();
        let total_successful: u64 = state.values().map(|p| p.successful_requests).sum();
        TrackerStatistics {
            total_models: state.len(),
            total_requests,
            total_successful,
            overall_success_rate: if total_requests > 0 {
                total_successful as f64 / total_requests as f64
            } else {
                0.0
            },
            models: state.clone(),
        }
    }

    /// Drop tracked data for one model, or everything.
    pub fn reset(&self, model_name: Option<&str>) {
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        match model_name {
            Some(name) => {
                state.remove(name);
            }
            None => state.clear(),
        }
        Self::persist(&self.path, &state);
    }

    fn persist(path: &std::path::Path, state: &BTreeMap<String, ModelPerformance>) {
        let file = PerformanceFile {
            version: "1.0".to_string(),
            last_updated: Some(Utc::now()),
            models: state.clone(),
        };
        if let Err(e) = fsutil::write_json_atomic(path, &file) {
            tracing::warn!(error = %e, "Failed to save model performance data");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> (tempfile::TempDir, PerformanceTracker) {
        let dir = tempfile::tempdir().unwrap();
        let tracker = PerformanceTracker::open(dir.path());
        (dir, tracker)
    }

    #[test]
    fn test_success_rate_maintained() {
        let (_dir, tracker) = tracker();
        tracker.record_success("m1", 100, 500.0);
        tracker.record_success("m1", 100, 700.0);
        tracker.record_failure("m1", 0);

        let perf = tracker.performance("m1").unwrap();
        assert_eq!(perf.total_requests, 3);
        assert_eq!(perf.successful_requests, 2);
        assert!((perf.success_rate - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(perf.consecutive_failures, 1);
    }

    #[test]
    fn test_response_time_uses_ema() {
        let (_dir, tracker) = tracker();
        tracker.record_success("m1", 0, 1000.0);
        tracker.record_success("m1", 0, 2000.0);

        let perf = tracker.performance("m1").unwrap();
        // 1000 * 0.9 + 2000 * 0.1
        assert!((perf.avg_response_time_ms - 1100.0).abs() < 1e-6);
    }

    #[test]
    fn test_success_resets_consecutive_failures() {
        let (_dir, tracker) = tracker();
        tracker.record_failure("m1", 0);
        tracker.record_failure("m1", 0);
        tracker.record_success("m1", 0, 100.0);
        assert_eq!(tracker.performance("m1").unwrap().consecutive_failures, 0);
    }

    #[test]
    fn test_unknown_model_scores_default() {
        let (_dir, tracker) = tracker();
        assert!((tracker.weighted_score("never-seen") - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_rotation_excludes_failing_model() {
        let (_dir, tracker) = tracker();
        for _ in 0..3 {
            tracker.record_failure("bad", 0);
        }
        tracker.record_success("good", 0, 100.0);

        let available = vec!["bad".to_string(), "good".to_string()];
        let selected = tracker.rotate(&available, &[]).unwrap();
        assert_eq!(selected, "good");
    }

    #[test]
    fn test_rotation_falls_back_when_all_excluded() {
        let (_dir, tracker) = tracker();
        for _ in 0..3 {
            tracker.record_failure("only", 0);
        }
        let available = vec!["only".to_string()];
        // The exclusion would empty the set, so the failing model comes back.
        assert_eq!(tracker.rotate(&available, &[]).unwrap(), "only");
    }

    #[test]
    fn test_persistence_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        {
            let tracker = PerformanceTracker::open(dir.path());
            tracker.record_success("m1", 42, 100.0);
        }
        let reopened = PerformanceTracker::open(dir.path());
        let perf = reopened.performance("m1").unwrap();
        assert_eq!(perf.total_tokens_used, 42);
        assert_eq!(perf.total_requests, 1);
    }

    #[test]
    fn test_statistics_aggregate() {
        let (_dir, tracker) = tracker();
        tracker.record_success("m1", 0, 1.0);
        tracker.record_failure("m2", 0);

        let stats = tracker.statistics();
        assert_eq!(stats.total_models, 2);
        assert_eq!(stats.total_requests, 2);
        assert!((stats.overall_success_rate - 0.5).abs() < 1e-9);
    }
}
