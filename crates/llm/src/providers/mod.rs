use crate::error::ProviderError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use support_core::{ConversationMessage, MessageRole};

pub mod anthropic_provider;
pub mod openai_provider;

pub use anthropic_provider::ClaudeProvider;
pub use openai_provider::OpenAIProvider;

/// Approximate characters per token used for pre-call estimates
pub const CHARS_PER_TOKEN: usize = 4;

/// One conversational turn in provider-neutral form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmMessage {
    pub role: MessageRole,
    pub content: String,
}

impl LlmMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

impl From<&ConversationMessage> for LlmMessage {
    fn from(message: &ConversationMessage) -> Self {
        Self {
            role: message.role,
            content: message.content.clone(),
        }
    }
}

/// Normalized result of one successful provider call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LlmResponse {
    content: String,
    model: String,
    provider: String,
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
    finish_reason: String,
    metadata: HashMap<String, serde_json::Value>,
}

impl LlmResponse {
    pub fn new(
        content: impl Into<String>,
        model: impl Into<String>,
        provider: impl Into<String>,
        prompt_tokens: u32,
        completion_tokens: u32,
    ) -> Self {
        Self {
            content: content.into(),
            model: model.into(),
            provider: provider.into(),
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens.saturating_add(completion_tokens),
            finish_reason: "stop".to_string(),
            metadata: HashMap::new(),
        }
    }

    /// Provider-reported total, when it differs from prompt + completion
    pub fn with_total_tokens(mut self, total_tokens: u32) -> Self {
        self.total_tokens = total_tokens;
        self
    }

    pub fn with_finish_reason(mut self, finish_reason: impl Into<String>) -> Self {
        self.finish_reason = finish_reason.into();
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn prompt_tokens(&self) -> u32 {
        self.prompt_tokens
    }

    pub fn completion_tokens(&self) -> u32 {
        self.completion_tokens
    }

    pub fn total_tokens(&self) -> u32 {
        self.total_tokens
    }

    pub fn finish_reason(&self) -> &str {
        &self.finish_reason
    }

    pub fn metadata(&self) -> &HashMap<String, serde_json::Value> {
        &self.metadata
    }
}

/// Sampling parameters for one call
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 4096,
        }
    }
}

/// Unified LLM provider contract
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Stable label: `claude`, `openai`, ...
    fn provider_name(&self) -> &str;

    fn model(&self) -> &str;

    /// Parameters used when the caller does not override them
    fn default_params(&self) -> GenerationParams;

    /// Per-request timeout enforced by the adapter
    fn timeout(&self) -> Duration;

    /// Execute one completion request.
    ///
    /// `system_prompt` is placed wherever the provider expects it.
    async fn generate(
        &self,
        messages: &[LlmMessage],
        system_prompt: Option<&str>,
        params: &GenerationParams,
    ) -> Result<LlmResponse, ProviderError>;

    fn count_tokens(&self, text: &str) -> usize {
        estimate_tokens(text)
    }
}

/// ~4 characters per token
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count() / CHARS_PER_TOKEN
}

/// Longest prefix of `text` that fits in `budget` estimated tokens
pub fn truncate_to_tokens(text: &str, budget: usize) -> &str {
    let max_chars = budget.saturating_mul(CHARS_PER_TOKEN);
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

pub(crate) fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

pub(crate) fn build_http_client(timeout: Duration) -> Result<reqwest::Client, common::ConfigError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| common::ConfigError::ValidationFailed {
            reason: format!("failed to create HTTP client: {e}"),
        })
}

/// Reads a non-success response into a classified error
pub(crate) async fn error_from_response(response: reqwest::Response) -> ProviderError {
    let status = response.status().as_u16();
    let retry_after = parse_retry_after(response.headers());
    let body = response.text().await.unwrap_or_default();
    ProviderError::from_status(status, &body, retry_after)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_estimate() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens(&"a".repeat(401)), 100);
        // Characters, not bytes
        assert_eq!(estimate_tokens("ééééééé"), 1);
    }

    #[test]
    fn test_truncate_to_tokens() {
        assert_eq!(truncate_to_tokens("abcdefghij", 2), "abcdefgh");
        assert_eq!(truncate_to_tokens("short", 10), "short");
        assert_eq!(truncate_to_tokens("ééééé", 1), "éééé");
        assert_eq!(truncate_to_tokens("abc", 0), "");
    }

    #[test]
    fn test_response_totals_and_accessors() {
        let response = LlmResponse::new("hi", "m", "claude", 10, 5)
            .with_finish_reason("end_turn")
            .with_metadata("id", serde_json::json!("msg_1"));

        assert_eq!(response.total_tokens(), 15);
        assert_eq!(response.finish_reason(), "end_turn");
        assert_eq!(response.metadata()["id"], "msg_1");
        assert_eq!(response.provider(), "claude");
    }

    #[test]
    fn test_message_from_conversation() {
        let turn = ConversationMessage::assistant("previous answer");
        let message = LlmMessage::from(&turn);
        assert_eq!(message.role, MessageRole::Assistant);
        assert_eq!(message.content, "previous answer");
    }

    #[test]
    fn test_retry_after_header() {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(reqwest::header::RETRY_AFTER, "12".parse().unwrap());
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(12)));

        headers.insert(
            reqwest::header::RETRY_AFTER,
            "Wed, 21 Oct 2015 07:28:00 GMT".parse().unwrap(),
        );
        assert_eq!(parse_retry_after(&headers), None);
    }
}
