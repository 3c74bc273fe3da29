//! Gemini provider implementation.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::errors::{LlmError, LlmResult};
use crate::provider::{GenerateOptions, LlmMessage, LlmResponse, LlmRole, Provider, TokenUsage};

/// Gemini API base endpoint.
const GEMINI_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Request timeout for generation calls.
const REQUEST_TIMEOUT_SECS: u64 = 60;

/// Supported Gemini models.
const SUPPORTED_MODELS: &[&str] = &[
    "gemini-2.5-pro",
    "gemini-2.5-flash",
    "gemini-2.5-flash-lite",
    "gemini-2.0-flash",
    "gemini-2.0-flash-lite",
];

#[derive(Debug, Serialize)]
struct GeminiPart {
    text: String,
}

#[derive(Debug, Serialize)]
struct GeminiContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_sequences: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Deserialize)]
struct GeminiResponsePart {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct GeminiResponseContent {
    #[serde(default)]
    parts: Vec<GeminiResponsePart>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiResponseContent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
    #[serde(default)]
    total_token_count: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorBody {
    message: String,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorResponse {
    error: GeminiErrorBody,
}

/// Gemini provider over the generateContent API.
pub struct GeminiProvider {
    client: Client,
    api_key: Option<String>,
    base_url: String,
}

impl GeminiProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: Some(api_key.into()),
            base_url: GEMINI_API_URL.to_string(),
        }
    }

    pub fn from_env() -> Self {
        Self {
            client: Client::new(),
            api_key: std::env::var("GEMINI_API_KEY").ok(),
            base_url: GEMINI_API_URL.to_string(),
        }
    }

    /// Point at a different endpoint, mainly for tests.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Gemini keeps the system prompt out of the turn list.
    fn convert_messages(messages: &[LlmMessage]) -> (Option<GeminiContent>, Vec<GeminiContent>) {
        let mut system = None;
        let mut contents = Vec::new();

        for msg in messages {
            match msg.role {
                LlmRole::System => {
                    system = Some(GeminiContent {
                        role: None,
                        parts: vec![GeminiPart {
                            text: msg.content.clone(),
                        }],
                    });
                }
                LlmRole::User => contents.push(GeminiContent {
                    role: Some("user".to_string()),
                    parts: vec![GeminiPart {
                        text: msg.content.clone(),
                    }],
                }),
                LlmRole::Assistant => contents.push(GeminiContent {
                    role: Some("model".to_string()),
                    parts: vec![GeminiPart {
                        text: msg.content.clone(),
                    }],
                }),
            }
        }

        (system, contents)
    }
}

#[async_trait]
impl Provider for GeminiProvider {
    fn name(&self) -> &'static str {
        "gemini"
    }

    fn api_key_env_var(&self) -> &'static str {
        "GEMINI_API_KEY"
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    fn supported_models(&self) -> Vec<&'static str> {
        SUPPORTED_MODELS.to_vec()
    }

    async fn generate(
        &self,
        model: &str,
        messages: &[LlmMessage],
        options: &GenerateOptions,
    ) -> LlmResult<LlmResponse> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| LlmError::NotConfigured("gemini".to_string()))?;

        let (system_instruction, contents) = Self::convert_messages(messages);

        let request = GeminiRequest {
            contents,
            system_instruction,
            generation_config: GenerationConfig {
                temperature: options.temperature,
                max_output_tokens: options.max_tokens,
                stop_sequences: options.stop_sequences.clone(),
            },
        };

        let url = format!("{}/models/{model}:generateContent", self.base_url);

        tracing::debug!(model, "Calling Gemini API");

        let response = self
            .client
            .post(&url)
            .query(&[("key", api_key.as_str())])
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout {
                        provider: "gemini".to_string(),
                        seconds: REQUEST_TIMEOUT_SECS,
                    }
                } else {
                    LlmError::Api {
                        provider: "gemini".to_string(),
                        message: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| LlmError::Api {
            provider: "gemini".to_string(),
            message: format!("failed to read response: {e}"),
        })?;

        if !status.is_success() {
            let message = serde_json::from_str::<GeminiErrorResponse>(&body)
                .map(|e| {
                    let status_tag = e.error.status.unwrap_or_default();
                    format!("{status_tag} {}", e.error.message)
                })
                .unwrap_or_else(|_| format!("({status}) {body}"));

            return Err(match status.as_u16() {
                429 => LlmError::RateLimited {
                    provider: "gemini".to_string(),
                    message,
                },
                401 | 403 => LlmError::Auth {
                    provider: "gemini".to_string(),
                    message,
                },
                _ => LlmError::Api {
                    provider: "gemini".to_string(),
                    message,
                },
            });
        }

        let api_response: GeminiResponse =
            serde_json::from_str(&body).map_err(|e| LlmError::Api {
                provider: "gemini".to_string(),
                message: format!("failed to parse response: {e}"),
            })?;

        let text = api_response
            .candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|c| {
                c.parts
                    .iter()
                    .map(|p| p.text.as_str())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        let usage = api_response.usage_metadata.map_or_else(TokenUsage::default, |u| TokenUsage {
            input_tokens: u.prompt_token_count,
            output_tokens: u.candidates_token_count,
            total_tokens: u.total_token_count,
        });

        Ok(LlmResponse {
            text,
            usage,
            model: model.to_string(),
            provider: "gemini".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_message_split_out() {
        let messages = vec![
            LlmMessage::system("be precise"),
            LlmMessage::user("write a token"),
            LlmMessage::assistant("done"),
        ];
        let (system, contents) = GeminiProvider::convert_messages(&messages);

        assert!(system.is_some());
        assert_eq!(contents.len(), 2);
        assert_eq!(contents[0].role.as_deref(), Some("user"));
        assert_eq!(contents[1].role.as_deref(), Some("model"));
    }

    #[test]
    fn test_unconfigured_provider() {
        let provider = GeminiProvider {
            client: Client::new(),
            api_key: None,
            base_url: GEMINI_API_URL.to_string(),
        };
        assert!(!provider.is_configured());
        assert!(provider.supports_model("gemini-2.5-flash"));
        assert!(!provider.supports_model("gpt-4o-mini"));
    }
}
