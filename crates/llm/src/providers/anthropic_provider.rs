use super::{
    build_http_client, error_from_response, GenerationParams, LlmMessage, LlmProvider, LlmResponse,
};
use crate::error::ProviderError;
use async_trait::async_trait;
use common::{ConfigError, ProviderSettings};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use support_core::MessageRole;
use tracing::debug;

/// Anthropic Messages API adapter
#[derive(Debug, Clone)]
pub struct ClaudeProvider {
    api_key: String,
    model: String,
    base_url: String,
    client: Client,
    timeout: Duration,
    defaults: GenerationParams,
}

impl ClaudeProvider {
    pub const LABEL: &'static str = "claude";
    pub const DEFAULT_BASE_URL: &'static str = "https://api.anthropic.com/v1";
    pub const API_VERSION: &'static str = "2023-06-01";

    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self, ConfigError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                config_key: "ANTHROPIC_API_KEY".to_string(),
            });
        }

        let timeout = Duration::from_secs(60);
        Ok(Self {
            api_key,
            model: model.into(),
            base_url: Self::DEFAULT_BASE_URL.to_string(),
            client: build_http_client(timeout)?,
            timeout,
            defaults: GenerationParams::default(),
        })
    }

    pub fn from_settings(settings: &ProviderSettings) -> Result<Self, ConfigError> {
        let mut provider = Self::new(settings.api_key.clone(), settings.model.clone())?
            .with_timeout(settings.timeout)?
            .with_defaults(GenerationParams {
                temperature: settings.temperature,
                max_tokens: settings.max_tokens,
            });
        if let Some(base_url) = &settings.base_url {
            provider = provider.with_base_url(base_url.clone());
        }
        Ok(provider)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, ConfigError> {
        self.client = build_http_client(timeout)?;
        self.timeout = timeout;
        Ok(self)
    }

    pub fn with_defaults(mut self, defaults: GenerationParams) -> Self {
        self.defaults = defaults;
        self
    }

    /// Splits out system turns; the Messages API takes them as a top-level field
    fn build_request(
        &self,
        messages: &[LlmMessage],
        system_prompt: Option<&str>,
        params: &GenerationParams,
    ) -> AnthropicRequest {
        let mut system_parts: Vec<&str> = system_prompt.into_iter().collect();
        let mut turns = Vec::with_capacity(messages.len());

        for message in messages {
            match message.role {
                MessageRole::System => system_parts.push(&message.content),
                MessageRole::User | MessageRole::Assistant => turns.push(AnthropicMessage {
                    role: message.role.as_str().to_string(),
                    content: message.content.clone(),
                }),
            }
        }

        let system = if system_parts.is_empty() {
            None
        } else {
            Some(system_parts.join("\n\n"))
        };

        AnthropicRequest {
            model: self.model.clone(),
            max_tokens: params.max_tokens,
            messages: turns,
            system,
            temperature: Some(params.temperature),
        }
    }
}

#[async_trait]
impl LlmProvider for ClaudeProvider {
    fn provider_name(&self) -> &str {
        Self::LABEL
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn default_params(&self) -> GenerationParams {
        self.defaults
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn generate(
        &self,
        messages: &[LlmMessage],
        system_prompt: Option<&str>,
        params: &GenerationParams,
    ) -> Result<LlmResponse, ProviderError> {
        let start_time = Instant::now();
        let request = self.build_request(messages, system_prompt, params);

        debug!(
            provider = Self::LABEL,
            model = %self.model,
            message_count = request.messages.len(),
            "Sending request to Anthropic"
        );

        let response = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", Self::API_VERSION)
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(ProviderError::from_reqwest)?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let body = response.text().await.map_err(ProviderError::from_reqwest)?;
        let parsed: AnthropicResponse = serde_json::from_str(&body)
            .map_err(|e| ProviderError::Unknown(format!("undecodable Anthropic response: {e}")))?;

        let content: String = parsed
            .content
            .iter()
            .filter(|block| block.content_type == "text")
            .filter_map(|block| block.text.as_deref())
            .collect();
        if content.is_empty() {
            return Err(ProviderError::Unknown(
                "empty response from Anthropic".to_string(),
            ));
        }

        // unreported usage counts as zero
        let (prompt_tokens, completion_tokens) = parsed
            .usage
            .as_ref()
            .map_or((0, 0), |usage| (usage.input_tokens, usage.output_tokens));

        debug!(
            provider = Self::LABEL,
            elapsed_ms = start_time.elapsed().as_millis() as u64,
            total_tokens = prompt_tokens as u64 + completion_tokens as u64,
            "Received response from Anthropic"
        );

        Ok(LlmResponse::new(
            content,
            parsed.model.unwrap_or_else(|| self.model.clone()),
            Self::LABEL,
            prompt_tokens,
            completion_tokens,
        )
        .with_finish_reason(parsed.stop_reason.unwrap_or_else(|| "end_turn".to_string()))
        .with_metadata("id", serde_json::Value::String(parsed.id))
        .with_metadata("type", serde_json::Value::String(parsed.response_type)))
    }
}

// Anthropic-specific request/response types
#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    #[serde(default)]
    id: String,
    #[serde(rename = "type", default)]
    response_type: String,
    model: Option<String>,
    content: Vec<AnthropicContentBlock>,
    usage: Option<AnthropicUsage>,
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnthropicContentBlock {
    #[serde(rename = "type")]
    content_type: String,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}
