use crate::client::ResilientLlmClient;
use crate::providers::*;
use crate::retry::RetryConfig;
use common::{ConfigError, LlmSettings, ProviderKind, ProviderSettings};
use std::sync::Arc;
use tracing::info;

/// Factory for creating LLM providers from configuration
pub struct LlmProviderFactory;

impl LlmProviderFactory {
    /// Create a provider from configuration
    pub fn create_provider(settings: &ProviderSettings) -> Result<Arc<dyn LlmProvider>, ConfigError> {
        match settings.kind {
            ProviderKind::Claude => Ok(Arc::new(ClaudeProvider::from_settings(settings)?)),
            ProviderKind::OpenAi => Ok(Arc::new(OpenAIProvider::from_settings(settings)?)),
        }
    }

    /// Validate the settings and assemble the primary/fallback client
    pub fn build_client(
        settings: &LlmSettings,
        log_llm_calls: bool,
    ) -> Result<ResilientLlmClient, ConfigError> {
        settings.validate()?;

        let primary_kind = settings.primary_kind();
        let primary_settings =
            settings
                .primary_settings()
                .ok_or_else(|| ConfigError::MissingRequired {
                    config_key: format!("{}_API_KEY", primary_kind.env_prefix()),
                })?;
        let primary = Self::create_provider(primary_settings)?;

        let mut client = ResilientLlmClient::new(primary)
            .with_retry_config(RetryConfig::from(settings))
            .with_fallback_policy(settings.fallback_policy)
            .with_fallback_enabled(settings.fallback_enabled)
            .with_llm_call_logging(log_llm_calls);

        if let Some(fallback_kind) = settings.fallback_kind() {
            let fallback_settings =
                settings
                    .fallback_settings()
                    .ok_or_else(|| ConfigError::MissingRequired {
                        config_key: format!("{}_API_KEY", fallback_kind.env_prefix()),
                    })?;
            client = client.with_fallback(Self::create_provider(fallback_settings)?);
        }

        info!(
            primary = %primary_kind,
            fallback = ?settings.fallback_kind().map(|kind| kind.as_str()),
            max_retries = settings.max_retries,
            "LLM client configured"
        );

        Ok(client)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::Settings;

    fn settings(pairs: &[(&str, &str)]) -> Settings {
        Settings::from_lookup(|key| {
            pairs
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
        })
        .unwrap()
    }

    #[test]
    fn test_both_with_fallback() {
        let settings = settings(&[
            ("LLM_PROVIDER", "both"),
            ("ANTHROPIC_API_KEY", "sk-ant-test"),
            ("OPENAI_API_KEY", "sk-test"),
        ]);

        let client = LlmProviderFactory::build_client(&settings.llm, false).unwrap();
        let stats = client.stats();
        assert_eq!(stats.primary_provider, "claude");
        assert_eq!(stats.fallback_provider.as_deref(), Some("openai"));
        assert!(stats.fallback_enabled);
    }

    #[test]
    fn test_openai_only() {
        let settings = settings(&[("LLM_PROVIDER", "openai"), ("OPENAI_API_KEY", "sk-test")]);

        let client = LlmProviderFactory::build_client(&settings.llm, true).unwrap();
        let stats = client.stats();
        assert_eq!(stats.primary_provider, "openai");
        assert_eq!(stats.fallback_provider, None);
    }

    #[test]
    fn test_llm_call_logging_follows_logging_settings() {
        let quiet = settings(&[
            ("LLM_PROVIDER", "openai"),
            ("OPENAI_API_KEY", "sk-test"),
            ("LOG_LLM_CALLS", "false"),
        ]);
        let client =
            LlmProviderFactory::build_client(&quiet.llm, quiet.logging.log_llm_calls).unwrap();
        assert!(!client.logs_llm_calls());

        let verbose = settings(&[("LLM_PROVIDER", "openai"), ("OPENAI_API_KEY", "sk-test")]);
        let client =
            LlmProviderFactory::build_client(&verbose.llm, verbose.logging.log_llm_calls).unwrap();
        assert!(client.logs_llm_calls());
    }

    #[test]
    fn test_create_provider_rejects_empty_key() {
        let provider_settings = ProviderSettings::new(ProviderKind::OpenAi, "");
        assert!(matches!(
            LlmProviderFactory::create_provider(&provider_settings),
            Err(ConfigError::MissingRequired { .. })
        ));
    }
}
