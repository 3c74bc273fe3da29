//! OpenAI provider implementation.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::errors::{LlmError, LlmResult};
use crate::provider::{GenerateOptions, LlmMessage, LlmResponse, LlmRole, Provider, TokenUsage};

/// OpenAI chat completions endpoint.
const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

/// Request timeout for generation calls.
const REQUEST_TIMEOUT_SECS: u64 = 60;

/// Supported OpenAI models (the fallback tier of the catalogue).
const SUPPORTED_MODELS: &[&str] = &["gpt-4o-mini", "gpt-3.5-turbo"];

#[derive(Debug, Serialize)]
struct OpenAiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
    model: String,
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiErrorBody {
    message: String,
}

#[derive(Debug, Deserialize)]
struct OpenAiErrorResponse {
    error: OpenAiErrorBody,
}

/// OpenAI provider over the chat completions API.
pub struct OpenAiProvider {
    client: Client,
    api_key: Option<String>,
    base_url: String,
}

impl OpenAiProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: Some(api_key.into()),
            base_url: OPENAI_API_URL.to_string(),
        }
    }

    pub fn from_env() -> Self {
        Self {
            client: Client::new(),
            api_key: std::env::var("OPENAI_API_KEY").ok(),
            base_url: OPENAI_API_URL.to_string(),
        }
    }

    /// Point at a different endpoint, mainly for tests.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    fn convert_messages(messages: &[LlmMessage]) -> Vec<OpenAiMessage> {
        messages
            .iter()
            .map(|msg| OpenAiMessage {
                role: match msg.role {
                    LlmRole::System => "system".to_string(),
                    LlmRole::User => "user".to_string(),
                    LlmRole::Assistant => "assistant".to_string(),
                },
                content: msg.content.clone(),
            })
            .collect()
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn api_key_env_var(&self) -> &'static str {
        "OPENAI_API_KEY"
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
            .ok_or_else(|| LlmError::NotConfigured("openai".to_string()))?;

        let request = OpenAiRequest {
            model: model.to_string(),
            messages: Self::convert_messages(messages),
            max_tokens: options.max_tokens,
            temperature: options.temperature,
            stop: options.stop_sequences.clone(),
        };

        tracing::debug!(model, "Calling OpenAI API");

        let response = self
            .client
            .post(&self.base_url)
            .header("Authorization", format!("Bearer {api_key}"))
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout {
                        provider: "openai".to_string(),
                        seconds: REQUEST_TIMEOUT_SECS,
                    }
                } else {
                    LlmError::Api {
                        provider: "openai".to_string(),
                        message: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| LlmError::Api {
            provider: "openai".to_string(),
            message: format!("failed to read response: {e}"),
        })?;

        if !status.is_success() {
            let message = serde_json::from_str::<OpenAiErrorResponse>(&body)
                .map(|e| e.error.message)
                .unwrap_or_else(|_| format!("({status}) {body}"));

            return Err(match status.as_u16() {
                429 => LlmError::RateLimited {
                    provider: "openai".to_string(),
                    message,
                },
                401 | 403 => LlmError::Auth {
                    provider: "openai".to_string(),
                    message,
                },
                _ => LlmError::Api {
                    provider: "openai".to_string(),
                    message,
                },
            });
        }

        let api_response: OpenAiResponse =
            serde_json::from_str(&body).map_err(|e| LlmError::Api {
                provider: "openai".to_string(),
                message: format!("failed to parse response: {e}"),
            })?;

        let text = api_response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default();

        let usage = api_response.usage.map_or_else(TokenUsage::default, |u| TokenUsage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        });

        Ok(LlmResponse {
            text,
            usage,
            model: api_response.model,
            provider: "openai".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_mapping() {
        let messages = vec![
            LlmMessage::system("be precise"),
            LlmMessage::user("write a token"),
        ];
        let converted = OpenAiProvider::convert_messages(&messages);
        assert_eq!(converted[0].role, "system");
        assert_eq!(converted[1].role, "user");
    }
}
