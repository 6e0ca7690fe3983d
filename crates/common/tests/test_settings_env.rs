use common::{ConfigError, ProviderKind, ProviderSelection, Settings};
use serial_test::serial;
use std::io::Write;
use std::time::Duration;

const MANAGED_VARS: [&str; 8] = [
    "LLM_PROVIDER",
    "LLM_MAX_RETRIES",
    "ANTHROPIC_API_KEY",
    "ANTHROPIC_MODEL",
    "OPENAI_API_KEY",
    "AGENTS_TICKET_TIMEOUT_SECS",
    "LOG_FORMAT",
    "LLM_FALLBACK_ENABLED",
];

fn clear_env() {
    for var in MANAGED_VARS {
        std::env::remove_var(var);
    }
}

#[test]
#[serial]
fn test_from_env_file_loads_values() {
    clear_env();

    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "LLM_PROVIDER=claude").unwrap();
    writeln!(file, "ANTHROPIC_API_KEY=sk-ant-from-file-123").unwrap();
    writeln!(file, "ANTHROPIC_MODEL=claude-3-haiku").unwrap();
    writeln!(file, "LLM_MAX_RETRIES=2").unwrap();
    writeln!(file, "AGENTS_TICKET_TIMEOUT_SECS=45").unwrap();

    let settings = Settings::from_env_file(file.path()).unwrap();

    assert_eq!(settings.llm.selection, ProviderSelection::ClaudeOnly);
    assert_eq!(settings.llm.max_retries, 2);
    let primary = settings.llm.primary_settings().unwrap();
    assert_eq!(primary.kind, ProviderKind::Claude);
    assert_eq!(primary.model, "claude-3-haiku");
    assert_eq!(settings.agents.ticket_timeout, Some(Duration::from_secs(45)));

    clear_env();
}

#[test]
#[serial]
fn test_process_env_wins_over_env_file() {
    clear_env();
    std::env::set_var("LLM_PROVIDER", "claude");
    std::env::set_var("ANTHROPIC_API_KEY", "sk-ant-from-process-456");
    std::env::set_var("LLM_MAX_RETRIES", "5");

    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "LLM_MAX_RETRIES=1").unwrap();

    let settings = Settings::from_env_file(file.path()).unwrap();
    assert_eq!(settings.llm.max_retries, 5);

    clear_env();
}

#[test]
#[serial]
fn test_missing_env_file() {
    clear_env();
    let err = Settings::from_env_file("/no/such/dir/.env").unwrap_err();
    assert!(matches!(err, ConfigError::FileNotFound { .. }));
}

#[test]
#[serial]
fn test_from_env_requires_primary_key() {
    clear_env();
    std::env::set_var("LLM_PROVIDER", "openai");

    let err = Settings::from_lookup(|key| std::env::var(key).ok()).unwrap_err();
    assert!(
        matches!(err, ConfigError::MissingRequired { ref config_key } if config_key == "OPENAI_API_KEY")
    );

    clear_env();
}
