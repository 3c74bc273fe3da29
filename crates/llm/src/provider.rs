//! Provider trait and common request/response types.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::LlmResult;

/// Role of a message in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmRole {
    System,
    User,
    Assistant,
}

/// A message in a conversation with a model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmMessage {
    pub role: LlmRole,
    pub content: String,
}

impl LlmMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: LlmRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: LlmRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: LlmRole::Assistant,
            content: content.into(),
        }
    }
}

/// Token usage reported by a provider.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
}

/// A completed generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    pub text: String,
    pub usage: TokenUsage,
    pub model: String,
    pub provider: String,
}

/// Options for text generation.
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub stop_sequences: Option<Vec<String>>,
}

/// Trait implemented by every model provider.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider name, e.g. "gemini" or "openai".
    fn name(&self) -> &'static str;

    /// Environment variable carrying the API key.
    fn api_key_env_var(&self) -> &'static str;

    /// Whether an API key is present.
    fn is_configured(&self) -> bool;

    /// Models this provider can serve.
    fn supported_models(&self) -> Vec<&'static str>;

    fn supports_model(&self, model: &str) -> bool {
        self.supported_models().contains(&model)
    }

    /// Generate text from messages.
    async fn generate(
        &self,
        model: &str,
        messages: &[LlmMessage],
        options: &GenerateOptions,
    ) -> LlmResult<LlmResponse>;
}

/// Builder for conversation message lists.
#[derive(Debug, Default)]
pub struct MessageBuilder {
    messages: Vec<LlmMessage>,
}

impl MessageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn system(mut self, content: impl Into<String>) -> Self {
        self.messages.push(LlmMessage::system(content));
        self
    }

    pub fn user(mut self, content: impl Into<String>) -> Self {
        self.messages.push(LlmMessage::user(content));
        self
    }

    pub fn assistant(mut self, content: impl Into<String>) -> Self {
        self.messages.push(LlmMessage::assistant(content));
        self
    }

    pub fn build(self) -> Vec<LlmMessage> {
        self.messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_builder_preserves_order() {
        let messages = MessageBuilder::new()
            .system("you are a solidity engineer")
            .user("write a token")
            .assistant("pragma solidity ^0.8.24;")
            .build();

        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].role, LlmRole::System);
        assert_eq!(messages[2].role, LlmRole::Assistant);
    }
}
