//! LLM provider abstraction

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("LLM call timed out after {0} seconds")]
    Timeout(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// One message of a conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Trait for LLM providers.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Send a chat completion request and return the reply text.
    async fn complete(
        &self,
        messages: &[ChatMessage],
        max_tokens: u32,
        temperature: f64,
    ) -> Result<String, ProviderError>;

    fn model(&self) -> &str;
}

/// OpenAI-compatible provider.
/// Works with any endpoint that implements `/chat/completions`.
pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    api_base: String,
    model: String,
}

impl OpenAiProvider {
    pub fn new(
        api_key: String,
        api_base: &str,
        model: String,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_key,
            api_base: api_base.trim_end_matches('/').to_string(),
            model,
        })
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        max_tokens: u32,
        temperature: f64,
    ) -> Result<String, ProviderError> {
        let url = format!("{}/chat/completions", self.api_base);

        let body = json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": max_tokens,
            "temperature": temperature,
        });

        tracing::debug!(url = %url, model = %self.model, messages = messages.len(), "LLM request");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message: text,
            });
        }

        let data: serde_json::Value = response.json().await?;
        parse_completion(&data)
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Extract the first choice's message text from an OpenAI-format response
pub fn parse_completion(data: &serde_json::Value) -> Result<String, ProviderError> {
    let content = data
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|choice| choice.get("message"))
        .and_then(|message| message.get("content"))
        .and_then(|content| content.as_str())
        .ok_or_else(|| ProviderError::Parse("No message content in response".to_string()))?;

    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(ProviderError::Parse("Empty completion".to_string()));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_completion() {
        let data = json!({
            "choices": [{"message": {"role": "assistant", "content": "  You have 15, I have 3.  "}}]
        });
        assert_eq!(parse_completion(&data).unwrap(), "You have 15, I have 3.");
    }

    #[test]
    fn test_parse_completion_rejects_empty() {
        assert!(parse_completion(&json!({"choices": []})).is_err());
        assert!(parse_completion(&json!({"choices": [{"message": {"content": " "}}]})).is_err());
    }

    #[test]
    fn test_roles_serialize_lowercase() {
        let message = ChatMessage::new(ChatRole::Assistant, "hi");
        assert_eq!(
            serde_json::to_value(&message).unwrap(),
            json!({"role": "assistant", "content": "hi"})
        );
        assert!(serde_json::from_value::<ChatMessage>(json!({"role": "robot", "content": "x"})).is_err());
    }
}
