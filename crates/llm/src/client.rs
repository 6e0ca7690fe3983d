//! Resilient LLM client
//!
//! Wraps a primary and an optional fallback [`LlmProvider`]. Retryable
//! failures are retried with exponential backoff; once the primary is
//! exhausted the fallback is tried under the configured
//! [`FallbackRetryPolicy`]. Callers only ever see an [`AggregateFailure`].

use crate::error::{AggregateFailure, ProviderError, ProviderFailure};
use crate::providers::{GenerationParams, LlmMessage, LlmProvider, LlmResponse};
use crate::retry::{execute_with_retry, RetryConfig, RetryError};
use common::FallbackRetryPolicy;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Snapshot of the client's usage counters
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageStats {
    pub total_calls: u64,
    pub total_tokens: u64,
    pub fallback_count: u64,
    /// `fallback_count / total_calls`, 0 before the first call
    pub fallback_rate: f64,
    pub primary_provider: String,
    pub fallback_provider: Option<String>,
    pub fallback_enabled: bool,
}

pub struct ResilientLlmClient {
    primary: Arc<dyn LlmProvider>,
    fallback: Option<Arc<dyn LlmProvider>>,
    retry_config: RetryConfig,
    fallback_policy: FallbackRetryPolicy,
    fallback_enabled: bool,
    log_llm_calls: bool,
    total_calls: AtomicU64,
    total_tokens: AtomicU64,
    fallback_count: AtomicU64,
}

impl ResilientLlmClient {
    pub fn new(primary: Arc<dyn LlmProvider>) -> Self {
        Self {
            primary,
            fallback: None,
            retry_config: RetryConfig::default(),
            fallback_policy: FallbackRetryPolicy::default(),
            fallback_enabled: true,
            log_llm_calls: true,
            total_calls: AtomicU64::new(0),
            total_tokens: AtomicU64::new(0),
            fallback_count: AtomicU64::new(0),
        }
    }

    pub fn with_fallback(mut self, fallback: Arc<dyn LlmProvider>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn with_retry_config(mut self, retry_config: RetryConfig) -> Self {
        self.retry_config = retry_config;
        self
    }

    pub fn with_fallback_policy(mut self, policy: FallbackRetryPolicy) -> Self {
        self.fallback_policy = policy;
        self
    }

    pub fn with_fallback_enabled(mut self, enabled: bool) -> Self {
        self.fallback_enabled = enabled;
        self
    }

    pub fn with_llm_call_logging(mut self, enabled: bool) -> Self {
        self.log_llm_calls = enabled;
        self
    }

    pub fn primary_provider(&self) -> &str {
        self.primary.provider_name()
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry_config
    }

    /// Whether every successful call is logged at info level
    pub fn logs_llm_calls(&self) -> bool {
        self.log_llm_calls
    }

    fn active_fallback(&self) -> Option<&Arc<dyn LlmProvider>> {
        self.fallback.as_ref().filter(|_| self.fallback_enabled)
    }

    fn fallback_retry_config(&self) -> RetryConfig {
        match self.fallback_policy {
            FallbackRetryPolicy::SameAsPrimary => self.retry_config.clone(),
            FallbackRetryPolicy::SingleAttempt => self.retry_config.clone().with_max_retries(0),
        }
    }

    /// Generate a completion without an external deadline
    pub async fn generate(
        &self,
        messages: &[LlmMessage],
        system_prompt: Option<&str>,
        temperature: Option<f32>,
        max_tokens: Option<u32>,
    ) -> Result<LlmResponse, AggregateFailure> {
        self.generate_with_cancel(
            messages,
            system_prompt,
            temperature,
            max_tokens,
            &CancellationToken::new(),
        )
        .await
    }

    /// Generate a completion; `cancel` aborts in-flight calls and backoff sleeps.
    ///
    /// `None` sampling parameters fall back to each provider's own defaults.
    pub async fn generate_with_cancel(
        &self,
        messages: &[LlmMessage],
        system_prompt: Option<&str>,
        temperature: Option<f32>,
        max_tokens: Option<u32>,
        cancel: &CancellationToken,
    ) -> Result<LlmResponse, AggregateFailure> {
        let primary = self.primary.as_ref();
        let params = resolve_params(primary, temperature, max_tokens);

        let primary_error =
            match call_provider(primary, &self.retry_config, messages, system_prompt, &params, cancel)
                .await
            {
                Ok(response) => {
                    self.record_success(&response, false);
                    return Ok(response);
                }
                Err(error) => error,
            };

        let primary_cancelled = primary_error.is_cancelled();
        let primary_failure = provider_failure(primary, primary_error);

        let fallback = match self.active_fallback() {
            Some(fallback) if !primary_cancelled => fallback.as_ref(),
            _ => {
                return Err(AggregateFailure {
                    primary: primary_failure,
                    fallback: None,
                    cancelled: primary_cancelled,
                })
            }
        };

        warn!(
            primary = primary.provider_name(),
            fallback = fallback.provider_name(),
            attempts = primary_failure.attempts,
            policy = ?self.fallback_policy,
            "Primary provider exhausted, switching to fallback"
        );

        let params = resolve_params(fallback, temperature, max_tokens);
        let fallback_config = self.fallback_retry_config();
        match call_provider(fallback, &fallback_config, messages, system_prompt, &params, cancel).await {
            Ok(response) => {
                self.record_success(&response, true);
                Ok(response)
            }
            Err(error) => {
                let cancelled = error.is_cancelled();
                Err(AggregateFailure {
                    primary: primary_failure,
                    fallback: Some(provider_failure(fallback, error)),
                    cancelled,
                })
            }
        }
    }

    fn record_success(&self, response: &LlmResponse, via_fallback: bool) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        self.total_tokens
            .fetch_add(u64::from(response.total_tokens()), Ordering::Relaxed);
        if via_fallback {
            self.fallback_count.fetch_add(1, Ordering::Relaxed);
        }

        if self.log_llm_calls {
            info!(
                provider = response.provider(),
                model = response.model(),
                prompt_tokens = response.prompt_tokens(),
                completion_tokens = response.completion_tokens(),
                total_tokens = response.total_tokens(),
                finish_reason = response.finish_reason(),
                fallback = via_fallback,
                "LLM call completed"
            );
        }
    }

    pub fn stats(&self) -> UsageStats {
        let total_calls = self.total_calls.load(Ordering::Relaxed);
        let fallback_count = self.fallback_count.load(Ordering::Relaxed);
        let fallback_rate = if total_calls == 0 {
            0.0
        } else {
            fallback_count as f64 / total_calls as f64
        };

        UsageStats {
            total_calls,
            total_tokens: self.total_tokens.load(Ordering::Relaxed),
            fallback_count,
            fallback_rate,
            primary_provider: self.primary.provider_name().to_string(),
            fallback_provider: self
                .fallback
                .as_ref()
                .map(|fallback| fallback.provider_name().to_string()),
            fallback_enabled: self.fallback_enabled && self.fallback.is_some(),
        }
    }

    pub fn reset_stats(&self) {
        self.total_calls.store(0, Ordering::Relaxed);
        self.total_tokens.store(0, Ordering::Relaxed);
        self.fallback_count.store(0, Ordering::Relaxed);
    }

    /// Pre-call estimate from the primary adapter
    pub fn count_tokens(&self, text: &str) -> usize {
        self.primary.count_tokens(text)
    }
}

fn resolve_params(
    provider: &dyn LlmProvider,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
) -> GenerationParams {
    let defaults = provider.default_params();
    GenerationParams {
        temperature: temperature.unwrap_or(defaults.temperature),
        max_tokens: max_tokens.unwrap_or(defaults.max_tokens),
    }
}

async fn call_provider(
    provider: &dyn LlmProvider,
    config: &RetryConfig,
    messages: &[LlmMessage],
    system_prompt: Option<&str>,
    params: &GenerationParams,
    cancel: &CancellationToken,
) -> Result<LlmResponse, RetryError<ProviderError>> {
    execute_with_retry(config, provider.provider_name(), cancel, move |_attempt| {
        provider.generate(messages, system_prompt, params)
    })
    .await
}

fn provider_failure(provider: &dyn LlmProvider, error: RetryError<ProviderError>) -> ProviderFailure {
    let (attempts, last_error) = match error {
        RetryError::Exhausted {
            attempts,
            last_error,
        } => (attempts, Some(last_error)),
        RetryError::Cancelled {
            attempts,
            last_error,
        } => (attempts, last_error),
    };
    ProviderFailure {
        provider: provider.provider_name().to_string(),
        attempts,
        last_error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedProvider;
    use std::time::Duration;

    fn fast_retries(max_retries: u32) -> RetryConfig {
        RetryConfig::new()
            .with_max_retries(max_retries)
            .with_initial_delay(Duration::from_millis(10))
            .with_max_delay(Duration::from_millis(50))
    }

    #[tokio::test]
    async fn test_primary_success_first_attempt() {
        let primary = Arc::new(ScriptedProvider::new("claude").respond_with("hello", 15));
        let fallback = Arc::new(ScriptedProvider::new("openai"));
        let client = ResilientLlmClient::new(primary.clone()).with_fallback(fallback.clone());

        let response = client
            .generate(&[LlmMessage::user("hi")], None, None, None)
            .await
            .unwrap();

        assert_eq!(response.provider(), "claude");
        assert_eq!(primary.calls(), 1);
        assert_eq!(fallback.calls(), 0);

        let stats = client.stats();
        assert_eq!(stats.total_calls, 1);
        assert_eq!(stats.total_tokens, 15);
        assert_eq!(stats.fallback_count, 0);
        assert_eq!(stats.fallback_rate, 0.0);
    }

    #[tokio::test]
    async fn test_sampling_defaults_come_from_each_provider() {
        let primary = Arc::new(
            ScriptedProvider::new("claude")
                .with_defaults(GenerationParams {
                    temperature: 0.3,
                    max_tokens: 100,
                })
                .fail_with(ProviderError::Authentication("HTTP 401".into())),
        );
        let fallback = Arc::new(
            ScriptedProvider::new("openai")
                .with_defaults(GenerationParams {
                    temperature: 1.5,
                    max_tokens: 200,
                })
                .respond_with("ok", 3),
        );
        let client = ResilientLlmClient::new(primary.clone()).with_fallback(fallback.clone());

        client
            .generate(&[LlmMessage::user("hi")], Some("sys"), None, Some(64))
            .await
            .unwrap();

        let primary_requests = primary.requests();
        let primary_request = &primary_requests[0];
        assert_eq!(primary_request.params.temperature, 0.3);
        assert_eq!(primary_request.params.max_tokens, 64);
        assert_eq!(primary_request.system_prompt.as_deref(), Some("sys"));

        let fallback_requests = fallback.requests();
        let fallback_request = &fallback_requests[0];
        assert_eq!(fallback_request.params.temperature, 1.5);
        assert_eq!(fallback_request.params.max_tokens, 64);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_disabled_returns_primary_failure() {
        let primary = Arc::new(
            ScriptedProvider::new("claude").fail_with(ProviderError::TransientServer("503".into())),
        );
        let fallback = Arc::new(ScriptedProvider::new("openai").respond_with("unused", 1));
        let client = ResilientLlmClient::new(primary.clone())
            .with_fallback(fallback.clone())
            .with_fallback_enabled(false)
            .with_retry_config(fast_retries(1));

        let failure = client
            .generate(&[LlmMessage::user("hi")], None, None, None)
            .await
            .unwrap_err();

        assert_eq!(failure.primary.attempts, 2);
        assert!(failure.fallback.is_none());
        assert_eq!(fallback.calls(), 0);
        assert!(!client.stats().fallback_enabled);
    }

    #[tokio::test]
    async fn test_reset_stats() {
        let primary = Arc::new(ScriptedProvider::new("claude").respond_with("a", 5));
        let client = ResilientLlmClient::new(primary);
        client
            .generate(&[LlmMessage::user("hi")], None, None, None)
            .await
            .unwrap();
        assert_eq!(client.stats().total_calls, 1);

        client.reset_stats();
        let stats = client.stats();
        assert_eq!(stats.total_calls, 0);
        assert_eq!(stats.total_tokens, 0);
        assert_eq!(stats.primary_provider, "claude");
    }

    #[test]
    fn test_count_tokens_uses_primary_estimate() {
        let client = ResilientLlmClient::new(Arc::new(ScriptedProvider::new("claude")));
        assert_eq!(client.count_tokens(&"x".repeat(40)), 10);
    }
}
