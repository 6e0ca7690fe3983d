//! Resilient LLM invocation layer
//!
//! Provider adapters normalize Claude and OpenAI behind [`LlmProvider`];
//! [`ResilientLlmClient`] adds retry with backoff, fallback switching and
//! usage statistics on top of them.

pub mod client;
pub mod error;
pub mod factory;
pub mod providers;
pub mod retry;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use client::{ResilientLlmClient, UsageStats};
pub use common::FallbackRetryPolicy;
pub use error::{AggregateFailure, AggregateFailureKind, ProviderError, ProviderFailure};
pub use factory::LlmProviderFactory;
pub use providers::{
    estimate_tokens, truncate_to_tokens, ClaudeProvider, GenerationParams, LlmMessage,
    LlmProvider, LlmResponse, OpenAIProvider, CHARS_PER_TOKEN,
};
pub use retry::{calculate_backoff_delay, execute_with_retry, RetryConfig, RetryError, RetryableError};
