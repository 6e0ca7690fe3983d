pub mod config;
pub mod structured_logging;

pub use config::{
    AgentSettings, ConfigError, ConfigResult, FallbackRetryPolicy, LlmSettings, LogFormat,
    LoggingSettings, ProviderKind, ProviderSelection, ProviderSettings, Settings,
};

pub use structured_logging::{
    init_structured_logging, ExecutionContext, JsonFormatter, LoggingConfig, PerformanceMetrics,
    StructuredLogEntry,
};
