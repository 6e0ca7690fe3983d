use super::{
    build_http_client, error_from_response, GenerationParams, LlmMessage, LlmProvider, LlmResponse,
};
use crate::error::ProviderError;
use async_trait::async_trait;
use common::{ConfigError, ProviderSettings};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::debug;

/// OpenAI Chat Completions adapter
#[derive(Debug, Clone)]
pub struct OpenAIProvider {
    api_key: String,
    model: String,
    base_url: String,
    client: Client,
    timeout: Duration,
    defaults: GenerationParams,
}

impl OpenAIProvider {
    pub const LABEL: &'static str = "openai";
    pub const DEFAULT_BASE_URL: &'static str = "https://api.openai.com/v1";

    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self, ConfigError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                config_key: "OPENAI_API_KEY".to_string(),
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

    fn build_request(
        &self,
        messages: &[LlmMessage],
        system_prompt: Option<&str>,
        params: &GenerationParams,
    ) -> OpenAIRequest {
        let mut chat = Vec::with_capacity(messages.len() + 1);
        if let Some(system_prompt) = system_prompt {
            chat.push(OpenAIMessage {
                role: "system".to_string(),
                content: system_prompt.to_string(),
            });
        }
        chat.extend(messages.iter().map(|message| OpenAIMessage {
            role: message.role.as_str().to_string(),
            content: message.content.clone(),
        }));

        OpenAIRequest {
            model: self.model.clone(),
            messages: chat,
            max_tokens: params.max_tokens,
            temperature: params.temperature,
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAIProvider {
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
            "Sending request to OpenAI"
        );

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(ProviderError::from_reqwest)?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let body = response.text().await.map_err(ProviderError::from_reqwest)?;
        let parsed: OpenAIResponse = serde_json::from_str(&body)
            .map_err(|e| ProviderError::Unknown(format!("undecodable OpenAI response: {e}")))?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::Unknown("no choices in OpenAI response".to_string()))?;
        let content = choice
            .message
            .content
            .filter(|c| !c.is_empty())
            .ok_or_else(|| ProviderError::Unknown("empty response from OpenAI".to_string()))?;

        // unreported usage counts as zero
        let (prompt_tokens, completion_tokens, total_tokens) = parsed
            .usage
            .map_or((0, 0, 0), |usage| {
                (usage.prompt_tokens, usage.completion_tokens, usage.total_tokens)
            });
        let response = LlmResponse::new(
            content,
            parsed.model.unwrap_or_else(|| self.model.clone()),
            Self::LABEL,
            prompt_tokens,
            completion_tokens,
        )
        .with_total_tokens(total_tokens);

        debug!(
            provider = Self::LABEL,
            elapsed_ms = start_time.elapsed().as_millis() as u64,
            total_tokens = response.total_tokens() as u64,
            "Received response from OpenAI"
        );

        Ok(response
            .with_finish_reason(choice.finish_reason.unwrap_or_else(|| "stop".to_string()))
            .with_metadata("id", serde_json::Value::String(parsed.id))
            .with_metadata("created", serde_json::Value::from(parsed.created)))
    }
}

// OpenAI-specific request/response types
#[derive(Debug, Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct OpenAIMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    #[serde(default)]
    id: String,
    #[serde(default)]
    created: u64,
    model: Option<String>,
    choices: Vec<OpenAIChoice>,
    usage: Option<OpenAIUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIChoiceMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    fn provider(server: &Server) -> OpenAIProvider {
        OpenAIProvider::new("sk-test", "gpt-4-turbo-preview")
            .unwrap()
            .with_base_url(server.url())
    }

    #[test]
    fn test_system_prompt_leads() {
        let provider = OpenAIProvider::new("sk-test", "gpt-4").unwrap();
        let request = provider.build_request(
            &[LlmMessage::user("Hi"), LlmMessage::assistant("Hello")],
            Some("Be brief"),
            &GenerationParams::default(),
        );

        let roles: Vec<&str> = request.messages.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["system", "user", "assistant"]);
        assert_eq!(request.messages[0].content, "Be brief");
    }

    #[tokio::test]
    async fn test_successful_generation() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer sk-test")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "model": "gpt-4-turbo-preview",
                "messages": [
                    {"role": "system", "content": "Be brief"},
                    {"role": "user", "content": "Hi"}
                ]
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{
                "id": "chatcmpl-1",
                "created": 1700000000,
                "model": "gpt-4-turbo-preview",
                "choices": [{
                    "message": {"role": "assistant", "content": "Hello from OpenAI"},
                    "finish_reason": "stop"
                }],
                "usage": {"prompt_tokens": 9, "completion_tokens": 4, "total_tokens": 13}
            }"#,
            )
            .create_async()
            .await;

        let response = provider(&server)
            .generate(&[LlmMessage::user("Hi")], Some("Be brief"), &GenerationParams::default())
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(response.content(), "Hello from OpenAI");
        assert_eq!(response.provider(), "openai");
        assert_eq!(response.total_tokens(), 13);
        assert_eq!(response.finish_reason(), "stop");
        assert_eq!(response.metadata()["id"], "chatcmpl-1");
        assert_eq!(response.metadata()["created"], 1700000000u64);
    }

    #[tokio::test]
    async fn test_rate_limit_with_retry_after() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(429)
            .with_header("retry-after", "3")
            .with_body(r#"{"error":{"message":"Rate limit reached"}}"#)
            .create_async()
            .await;

        let err = provider(&server)
            .generate(&[LlmMessage::user("Hi")], None, &GenerationParams::default())
            .await
            .unwrap_err();

        assert_eq!(
            err,
            ProviderError::RateLimited {
                message: "HTTP 429: {\"error\":{\"message\":\"Rate limit reached\"}}".to_string(),
                retry_after: Some(Duration::from_secs(3)),
            }
        );
    }

    #[tokio::test]
    async fn test_empty_choices_is_unknown_failure() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_body(r#"{"id":"chatcmpl-2","created":1,"choices":[]}"#)
            .create_async()
            .await;

        let err = provider(&server)
            .generate(&[LlmMessage::user("Hi")], None, &GenerationParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Unknown(_)));
    }

    #[tokio::test]
    async fn test_missing_usage_counts_as_zero() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_body(
                r#"{"id":"chatcmpl-3","created":1,
                    "choices":[{"message":{"role":"assistant","content":"A fairly long answer without usage"},
                                "finish_reason":"stop"}]}"#,
            )
            .create_async()
            .await;

        let response = provider(&server)
            .generate(
                &[LlmMessage::user("Please explain the refund policy in detail")],
                None,
                &GenerationParams::default(),
            )
            .await
            .unwrap();

        assert_eq!(response.content(), "A fairly long answer without usage");
        assert_eq!(response.total_tokens(), 0);
        assert_eq!(response.metadata()["id"], "chatcmpl-3");
    }
}
