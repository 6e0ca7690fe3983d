//! Typed application settings
//!
//! Settings are read from the process environment (optionally seeded from a
//! `.env` file). Every value is validated once at startup; a `ConfigError`
//! is fatal.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required config: {config_key}")]
    MissingRequired { config_key: String },

    #[error("Invalid config value: {config_key} = '{value}' - {reason}")]
    InvalidValue {
        config_key: String,
        value: String,
        reason: String,
    },

    #[error("Config file not found: {file_path}")]
    FileNotFound { file_path: String },

    #[error("Config validation failed: {reason}")]
    ValidationFailed { reason: String },
}

pub type ConfigResult<T> = Result<T, ConfigError>;

impl ConfigError {
    fn invalid(key: &str, value: impl fmt::Display, reason: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            config_key: key.to_string(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

/// Backing LLM service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Claude,
    OpenAi,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Claude => "claude",
            ProviderKind::OpenAi => "openai",
        }
    }

    fn other(&self) -> Self {
        match self {
            ProviderKind::Claude => ProviderKind::OpenAi,
            ProviderKind::OpenAi => ProviderKind::Claude,
        }
    }

    pub fn env_prefix(&self) -> &'static str {
        match self {
            ProviderKind::Claude => "ANTHROPIC",
            ProviderKind::OpenAi => "OPENAI",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "claude" | "anthropic" => Ok(ProviderKind::Claude),
            "openai" => Ok(ProviderKind::OpenAi),
            other => Err(format!("expected 'claude' or 'openai', got '{other}'")),
        }
    }
}

/// Which providers the LLM client is built from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderSelection {
    ClaudeOnly,
    OpenAiOnly,
    /// Primary plus the other provider as fallback
    Both,
}

impl FromStr for ProviderSelection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "claude" | "primary-only-claude" => Ok(ProviderSelection::ClaudeOnly),
            "openai" | "primary-only-openai" => Ok(ProviderSelection::OpenAiOnly),
            "both" | "both-with-fallback" => Ok(ProviderSelection::Both),
            other => Err(format!("expected 'claude', 'openai' or 'both', got '{other}'")),
        }
    }
}

/// How many attempts the fallback provider gets once the primary is exhausted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackRetryPolicy {
    /// Same retry budget and backoff as the primary
    #[default]
    SameAsPrimary,
    /// Exactly one attempt, no backoff
    SingleAttempt,
}

impl FromStr for FallbackRetryPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "same_as_primary" => Ok(FallbackRetryPolicy::SameAsPrimary),
            "single_attempt" => Ok(FallbackRetryPolicy::SingleAttempt),
            other => Err(format!(
                "expected 'same_as_primary' or 'single_attempt', got '{other}'"
            )),
        }
    }
}

/// Per-provider settings
#[derive(Clone, PartialEq)]
pub struct ProviderSettings {
    pub kind: ProviderKind,
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout: Duration,
    /// Overrides the provider's public endpoint
    pub base_url: Option<String>,
}

impl ProviderSettings {
    pub fn new(kind: ProviderKind, api_key: impl Into<String>) -> Self {
        let model = match kind {
            ProviderKind::Claude => "claude-sonnet-4-20250514",
            ProviderKind::OpenAi => "gpt-4-turbo-preview",
        };
        Self {
            kind,
            api_key: api_key.into(),
            model: model.to_string(),
            temperature: 0.7,
            max_tokens: 4096,
            timeout: Duration::from_secs(60),
            base_url: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    fn max_temperature(&self) -> f32 {
        match self.kind {
            ProviderKind::Claude => 1.0,
            ProviderKind::OpenAi => 2.0,
        }
    }
}

// api_key never reaches logs
impl fmt::Debug for ProviderSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderSettings")
            .field("kind", &self.kind)
            .field("api_key", &"***")
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("timeout", &self.timeout)
            .field("base_url", &self.base_url)
            .finish()
    }
}

/// LLM client settings
#[derive(Debug, Clone, PartialEq)]
pub struct LlmSettings {
    pub selection: ProviderSelection,
    /// Primary provider when `selection` is `Both`
    pub primary: ProviderKind,
    pub fallback_enabled: bool,
    pub fallback_policy: FallbackRetryPolicy,
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    pub retry_max_wait: Duration,
    pub claude: Option<ProviderSettings>,
    pub openai: Option<ProviderSettings>,
}

impl LlmSettings {
    pub const MAX_RETRIES_LIMIT: u32 = 10;

    fn provider(&self, kind: ProviderKind) -> Option<&ProviderSettings> {
        match kind {
            ProviderKind::Claude => self.claude.as_ref(),
            ProviderKind::OpenAi => self.openai.as_ref(),
        }
    }

    pub fn primary_kind(&self) -> ProviderKind {
        match self.selection {
            ProviderSelection::ClaudeOnly => ProviderKind::Claude,
            ProviderSelection::OpenAiOnly => ProviderKind::OpenAi,
            ProviderSelection::Both => self.primary,
        }
    }

    /// Fallback provider kind, if one is configured and enabled
    pub fn fallback_kind(&self) -> Option<ProviderKind> {
        match self.selection {
            ProviderSelection::Both if self.fallback_enabled => Some(self.primary.other()),
            _ => None,
        }
    }

    pub fn primary_settings(&self) -> Option<&ProviderSettings> {
        self.provider(self.primary_kind())
    }

    pub fn fallback_settings(&self) -> Option<&ProviderSettings> {
        self.fallback_kind().and_then(|kind| self.provider(kind))
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_retries > Self::MAX_RETRIES_LIMIT {
            return Err(ConfigError::invalid(
                "LLM_MAX_RETRIES",
                self.max_retries,
                format!("must be at most {}", Self::MAX_RETRIES_LIMIT),
            ));
        }
        if self.retry_max_wait < self.retry_base_delay {
            return Err(ConfigError::ValidationFailed {
                reason: format!(
                    "LLM_RETRY_MAX_WAIT_MS ({}ms) is below LLM_RETRY_BASE_DELAY_MS ({}ms)",
                    self.retry_max_wait.as_millis(),
                    self.retry_base_delay.as_millis()
                ),
            });
        }

        let primary = self.primary_kind();
        let required = std::iter::once(primary).chain(self.fallback_kind());
        for kind in required {
            let key = format!("{}_API_KEY", kind.env_prefix());
            let settings = self
                .provider(kind)
                .ok_or(ConfigError::MissingRequired { config_key: key })?;
            validate_provider(settings)?;
        }
        Ok(())
    }
}

fn validate_provider(settings: &ProviderSettings) -> ConfigResult<()> {
    let prefix = settings.kind.env_prefix();
    validate_api_key(settings.kind, &settings.api_key)?;

    let max = settings.max_temperature();
    if !(0.0..=max).contains(&settings.temperature) {
        return Err(ConfigError::invalid(
            &format!("{prefix}_TEMPERATURE"),
            settings.temperature,
            format!("must be within [0, {max}]"),
        ));
    }
    if settings.max_tokens == 0 {
        return Err(ConfigError::invalid(
            &format!("{prefix}_MAX_TOKENS"),
            0,
            "must be at least 1",
        ));
    }
    if settings.timeout.is_zero() {
        return Err(ConfigError::invalid(
            &format!("{prefix}_TIMEOUT_SECS"),
            0,
            "must be at least 1",
        ));
    }
    if settings.model.trim().is_empty() {
        return Err(ConfigError::MissingRequired {
            config_key: format!("{prefix}_MODEL"),
        });
    }
    Ok(())
}

const KEY_PLACEHOLDERS: [&str; 4] = ["xxxxx", "your-key", "placeholder", "change-me"];

fn validate_api_key(kind: ProviderKind, key: &str) -> ConfigResult<()> {
    let config_key = format!("{}_API_KEY", kind.env_prefix());
    if key.trim().is_empty() {
        return Err(ConfigError::MissingRequired { config_key });
    }

    let lowered = key.to_ascii_lowercase();
    if KEY_PLACEHOLDERS.iter().any(|p| lowered.contains(p)) {
        return Err(ConfigError::invalid(
            &config_key,
            "***",
            "API key appears to be a placeholder",
        ));
    }

    let expected_prefix = match kind {
        ProviderKind::Claude => "sk-ant-",
        ProviderKind::OpenAi => "sk-",
    };
    if !key.starts_with(expected_prefix) {
        return Err(ConfigError::invalid(
            &config_key,
            "***",
            format!("API key should start with '{expected_prefix}'"),
        ));
    }
    Ok(())
}

/// Pipeline thresholds and limits
#[derive(Debug, Clone, PartialEq)]
pub struct AgentSettings {
    /// Minimum retrieval confidence to answer without a human
    pub knowledge_threshold: f64,
    /// Minimum response confidence to answer without a human
    pub escalation_threshold: f64,
    pub max_resolution_attempts: u32,
    pub knowledge_top_k: usize,
    /// Token budget for retrieved documents in the resolution prompt
    pub max_response_tokens_context: usize,
    pub ticket_timeout: Option<Duration>,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            knowledge_threshold: 0.7,
            escalation_threshold: 0.8,
            max_resolution_attempts: 3,
            knowledge_top_k: 5,
            max_response_tokens_context: 2000,
            ticket_timeout: None,
        }
    }
}

impl AgentSettings {
    pub fn validate(&self) -> ConfigResult<()> {
        for (key, value) in [
            ("AGENTS_KNOWLEDGE_THRESHOLD", self.knowledge_threshold),
            ("AGENTS_ESCALATION_THRESHOLD", self.escalation_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::invalid(key, value, "must be within [0, 1]"));
            }
        }
        if self.max_resolution_attempts == 0 {
            return Err(ConfigError::invalid(
                "AGENTS_MAX_RESOLUTION_ATTEMPTS",
                0,
                "must be at least 1",
            ));
        }
        if self.knowledge_top_k == 0 {
            return Err(ConfigError::invalid(
                "AGENTS_KNOWLEDGE_TOP_K",
                0,
                "must be at least 1",
            ));
        }
        if matches!(self.ticket_timeout, Some(t) if t.is_zero()) {
            return Err(ConfigError::invalid(
                "AGENTS_TICKET_TIMEOUT_SECS",
                0,
                "must be at least 1 when set",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("expected 'text' or 'json', got '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoggingSettings {
    pub level: String,
    pub format: LogFormat,
    pub log_llm_calls: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
            log_llm_calls: true,
        }
    }
}

const LOG_LEVELS: [&str; 6] = ["trace", "debug", "info", "warn", "warning", "error"];

/// Top-level settings
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub llm: LlmSettings,
    pub agents: AgentSettings,
    pub logging: LoggingSettings,
}

impl Settings {
    /// Loads `.env` (if present) and then reads the process environment
    pub fn from_env() -> ConfigResult<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads the given env file into the process environment, then reads it.
    /// Variables already set in the environment win.
    pub fn from_env_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        dotenv::from_path(path).map_err(|_| ConfigError::FileNotFound {
            file_path: path.display().to_string(),
        })?;
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads every variable through `lookup`
    pub fn from_lookup<F>(lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let source = Source { lookup };

        let selection: ProviderSelection = source.parse("LLM_PROVIDER", ProviderSelection::Both)?;
        let llm = LlmSettings {
            selection,
            primary: source.parse("LLM_PRIMARY", ProviderKind::Claude)?,
            fallback_enabled: source.parse("LLM_FALLBACK_ENABLED", true)?,
            fallback_policy: source.parse("LLM_FALLBACK_POLICY", FallbackRetryPolicy::default())?,
            max_retries: source.parse("LLM_MAX_RETRIES", 3)?,
            retry_base_delay: Duration::from_millis(source.parse("LLM_RETRY_BASE_DELAY_MS", 1000)?),
            retry_max_wait: Duration::from_millis(source.parse("LLM_RETRY_MAX_WAIT_MS", 10_000)?),
            claude: source.provider(ProviderKind::Claude)?,
            openai: source.provider(ProviderKind::OpenAi)?,
        };
        llm.validate()?;

        let agents = AgentSettings {
            knowledge_threshold: source.parse("AGENTS_KNOWLEDGE_THRESHOLD", 0.7)?,
            escalation_threshold: source.parse("AGENTS_ESCALATION_THRESHOLD", 0.8)?,
            max_resolution_attempts: source.parse("AGENTS_MAX_RESOLUTION_ATTEMPTS", 3)?,
            knowledge_top_k: source.parse("AGENTS_KNOWLEDGE_TOP_K", 5)?,
            max_response_tokens_context: source.parse("AGENTS_MAX_RESPONSE_TOKENS_CONTEXT", 2000)?,
            ticket_timeout: source
                .parse_opt::<u64>("AGENTS_TICKET_TIMEOUT_SECS")?
                .map(Duration::from_secs),
        };
        agents.validate()?;

        let level = source
            .get("LOG_LEVEL")
            .unwrap_or_else(|| "info".to_string())
            .to_ascii_lowercase();
        if !LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::invalid(
                "LOG_LEVEL",
                &level,
                "expected one of trace, debug, info, warn, error",
            ));
        }
        let logging = LoggingSettings {
            level,
            format: source.parse("LOG_FORMAT", LogFormat::Text)?,
            log_llm_calls: source.parse("LOG_LLM_CALLS", true)?,
        };

        Ok(Self {
            llm,
            agents,
            logging,
        })
    }
}

struct Source<F> {
    lookup: F,
}

impl<F> Source<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Value of `key`; blank values count as unset
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse_opt<T>(&self, key: &str) -> ConfigResult<Option<T>>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match self.get(key) {
            None => Ok(None),
            Some(raw) => raw
                .parse::<T>()
                .map(Some)
                .map_err(|e| ConfigError::invalid(key, &raw, e.to_string())),
        }
    }

    fn parse<T>(&self, key: &str, default: T) -> ConfigResult<T>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        Ok(self.parse_opt(key)?.unwrap_or(default))
    }

    /// Provider section; `None` when no API key is set
    fn provider(&self, kind: ProviderKind) -> ConfigResult<Option<ProviderSettings>> {
        let prefix = kind.env_prefix();
        let Some(api_key) = self.get(&format!("{prefix}_API_KEY")) else {
            return Ok(None);
        };

        let mut settings = ProviderSettings::new(kind, api_key);
        if let Some(model) = self.get(&format!("{prefix}_MODEL")) {
            settings.model = model;
        }
        settings.temperature = self.parse(&format!("{prefix}_TEMPERATURE"), settings.temperature)?;
        settings.max_tokens = self.parse(&format!("{prefix}_MAX_TOKENS"), settings.max_tokens)?;
        settings.timeout = Duration::from_secs(self.parse(&format!("{prefix}_TIMEOUT_SECS"), 60)?);
        settings.base_url = self.get(&format!("{prefix}_BASE_URL"));
        Ok(Some(settings))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::collections::HashMap;

    const CLAUDE_KEY: &str = "sk-ant-test-0123456789";
    const OPENAI_KEY: &str = "sk-test-0123456789";

    fn load(pairs: &[(&str, &str)]) -> ConfigResult<Settings> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|key| vars.get(key).cloned())
    }

    fn with_keys<'a>(extra: &[(&'a str, &'a str)]) -> Vec<(&'a str, &'a str)> {
        let mut pairs = vec![("ANTHROPIC_API_KEY", CLAUDE_KEY), ("OPENAI_API_KEY", OPENAI_KEY)];
        pairs.extend_from_slice(extra);
        pairs
    }

    #[test]
    fn test_defaults() {
        let settings = load(&with_keys(&[])).unwrap();

        assert_eq!(settings.llm.selection, ProviderSelection::Both);
        assert_eq!(settings.llm.primary_kind(), ProviderKind::Claude);
        assert_eq!(settings.llm.fallback_kind(), Some(ProviderKind::OpenAi));
        assert_eq!(settings.llm.fallback_policy, FallbackRetryPolicy::SameAsPrimary);
        assert_eq!(settings.llm.max_retries, 3);
        assert_eq!(settings.llm.retry_base_delay, Duration::from_secs(1));
        assert_eq!(settings.llm.retry_max_wait, Duration::from_secs(10));

        let claude = settings.llm.primary_settings().unwrap();
        assert_eq!(claude.model, "claude-sonnet-4-20250514");
        assert_eq!(claude.max_tokens, 4096);
        assert_eq!(claude.timeout, Duration::from_secs(60));

        assert_eq!(settings.agents, AgentSettings::default());
        assert_eq!(settings.logging, LoggingSettings::default());
    }

    #[test]
    fn test_openai_only_does_not_need_claude_key() {
        let settings = load(&[
            ("LLM_PROVIDER", "openai"),
            ("OPENAI_API_KEY", OPENAI_KEY),
            ("OPENAI_MODEL", "gpt-4o"),
        ])
        .unwrap();

        assert_eq!(settings.llm.primary_kind(), ProviderKind::OpenAi);
        assert_eq!(settings.llm.fallback_kind(), None);
        assert_eq!(settings.llm.primary_settings().unwrap().model, "gpt-4o");
    }

    #[test]
    fn test_primary_override_flips_fallback() {
        let settings = load(&with_keys(&[("LLM_PRIMARY", "openai")])).unwrap();
        assert_eq!(settings.llm.primary_kind(), ProviderKind::OpenAi);
        assert_eq!(
            settings.llm.fallback_settings().unwrap().kind,
            ProviderKind::Claude
        );
    }

    #[test]
    fn test_disabled_fallback_needs_only_primary_key() {
        let settings = load(&[
            ("ANTHROPIC_API_KEY", CLAUDE_KEY),
            ("LLM_FALLBACK_ENABLED", "false"),
        ])
        .unwrap();
        assert!(settings.llm.fallback_settings().is_none());
    }

    #[test]
    fn test_missing_fallback_key() {
        let err = load(&[("ANTHROPIC_API_KEY", CLAUDE_KEY)]).unwrap_err();
        assert!(
            matches!(err, ConfigError::MissingRequired { ref config_key } if config_key == "OPENAI_API_KEY")
        );
    }

    #[rstest]
    #[case("sk-ant-your-key-here")]
    #[case("sk-ant-xxxxxxxx")]
    #[case("PLACEHOLDER")]
    #[case("not-a-claude-key")]
    fn test_rejects_bad_claude_keys(#[case] key: &str) {
        let err = load(&[("LLM_PROVIDER", "claude"), ("ANTHROPIC_API_KEY", key)]).unwrap_err();
        match err {
            ConfigError::InvalidValue { config_key, value, .. } => {
                assert_eq!(config_key, "ANTHROPIC_API_KEY");
                assert_eq!(value, "***");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[rstest]
    #[case("LLM_MAX_RETRIES", "11")]
    #[case("LLM_MAX_RETRIES", "-1")]
    #[case("ANTHROPIC_TEMPERATURE", "1.5")]
    #[case("OPENAI_TEMPERATURE", "2.5")]
    #[case("ANTHROPIC_MAX_TOKENS", "0")]
    #[case("AGENTS_KNOWLEDGE_THRESHOLD", "1.2")]
    #[case("AGENTS_ESCALATION_THRESHOLD", "abc")]
    #[case("AGENTS_MAX_RESOLUTION_ATTEMPTS", "0")]
    #[case("AGENTS_TICKET_TIMEOUT_SECS", "0")]
    #[case("LLM_PROVIDER", "gemini")]
    #[case("LLM_FALLBACK_POLICY", "forever")]
    #[case("LOG_LEVEL", "loud")]
    #[case("LOG_FORMAT", "xml")]
    fn test_rejects_out_of_range_values(#[case] key: &str, #[case] value: &str) {
        let err = load(&with_keys(&[(key, value)])).unwrap_err();
        assert!(
            matches!(err, ConfigError::InvalidValue { ref config_key, .. } if config_key == key),
            "unexpected error for {key}: {err}"
        );
    }

    #[test]
    fn test_openai_accepts_higher_temperature() {
        let settings = load(&with_keys(&[("OPENAI_TEMPERATURE", "1.8")])).unwrap();
        assert_eq!(settings.llm.openai.unwrap().temperature, 1.8);
    }

    #[test]
    fn test_max_wait_below_base_delay() {
        let err = load(&with_keys(&[
            ("LLM_RETRY_BASE_DELAY_MS", "5000"),
            ("LLM_RETRY_MAX_WAIT_MS", "1000"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::ValidationFailed { .. }));
    }

    #[test]
    fn test_agent_and_logging_overrides() {
        let settings = load(&with_keys(&[
            ("AGENTS_KNOWLEDGE_THRESHOLD", "0.5"),
            ("AGENTS_ESCALATION_THRESHOLD", "0.6"),
            ("AGENTS_TICKET_TIMEOUT_SECS", "30"),
            ("LLM_FALLBACK_POLICY", "single-attempt"),
            ("LOG_LEVEL", "DEBUG"),
            ("LOG_FORMAT", "json"),
            ("LOG_LLM_CALLS", "false"),
        ]))
        .unwrap();

        assert_eq!(settings.agents.knowledge_threshold, 0.5);
        assert_eq!(settings.agents.escalation_threshold, 0.6);
        assert_eq!(settings.agents.ticket_timeout, Some(Duration::from_secs(30)));
        assert_eq!(settings.llm.fallback_policy, FallbackRetryPolicy::SingleAttempt);
        assert_eq!(settings.logging.level, "debug");
        assert_eq!(settings.logging.format, LogFormat::Json);
        assert!(!settings.logging.log_llm_calls);
    }

    #[test]
    fn test_debug_masks_api_key() {
        let settings = ProviderSettings::new(ProviderKind::Claude, CLAUDE_KEY);
        let rendered = format!("{settings:?}");
        assert!(!rendered.contains(CLAUDE_KEY));
        assert!(rendered.contains("***"));
    }
}
