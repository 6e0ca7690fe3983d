//! Error taxonomy of the LLM layer
//!
//! Adapters map every provider-specific failure into [`ProviderError`]; the
//! resilient client consumes those internally and only ever surfaces an
//! [`AggregateFailure`].

use crate::retry::RetryableError;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Normalized provider failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// Bad or missing credentials. Never retried.
    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("request timed out: {0}")]
    TimedOut(String),

    #[error("transient server error: {0}")]
    TransientServer(String),

    #[error("unknown failure: {0}")]
    Unknown(String),
}

impl ProviderError {
    /// Classify a non-success HTTP status
    pub fn from_status(status: u16, body: &str, retry_after: Option<Duration>) -> Self {
        let message = format!("HTTP {status}: {}", truncate_body(body));
        match status {
            401 | 403 => ProviderError::Authentication(message),
            429 => ProviderError::RateLimited {
                message,
                retry_after,
            },
            408 => ProviderError::TimedOut(message),
            500..=599 => ProviderError::TransientServer(message),
            _ => ProviderError::Unknown(message),
        }
    }

    /// Classify a transport-level reqwest failure
    pub fn from_reqwest(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            ProviderError::TimedOut(error.to_string())
        } else if error.is_connect() {
            ProviderError::TransientServer(error.to_string())
        } else if let Some(status) = error.status() {
            ProviderError::from_status(status.as_u16(), &error.to_string(), None)
        } else {
            ProviderError::Unknown(error.to_string())
        }
    }

    pub fn is_retryable(&self) -> bool {
        !matches!(self, ProviderError::Authentication(_))
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            ProviderError::Authentication(_) => "authentication",
            ProviderError::RateLimited { .. } => "rate_limited",
            ProviderError::TimedOut(_) => "timed_out",
            ProviderError::TransientServer(_) => "transient_server",
            ProviderError::Unknown(_) => "unknown",
        }
    }
}

fn truncate_body(body: &str) -> &str {
    const LIMIT: usize = 300;
    match body.char_indices().nth(LIMIT) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

impl RetryableError for ProviderError {
    fn is_retryable(&self) -> bool {
        ProviderError::is_retryable(self)
    }

    fn error_type(&self) -> String {
        ProviderError::error_type(self).to_string()
    }

    fn error_message(&self) -> String {
        self.to_string()
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            ProviderError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    fn is_severe(&self) -> bool {
        matches!(self, ProviderError::Unknown(_))
    }
}

/// What one provider did before giving up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderFailure {
    pub provider: String,
    pub attempts: u32,
    /// `None` when cancellation arrived before the first attempt finished
    pub last_error: Option<ProviderError>,
}

impl fmt::Display for ProviderFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let plural = if self.attempts == 1 { "" } else { "s" };
        write!(f, "{} after {} attempt{}", self.provider, self.attempts, plural)?;
        match &self.last_error {
            Some(error) => write!(f, ": {error}"),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateFailureKind {
    /// Every provider exhausted its attempts
    Exhausted,
    /// The call was cancelled (per-ticket deadline or shutdown)
    TimedOut,
}

/// The only error returned by [`crate::ResilientLlmClient`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct AggregateFailure {
    pub primary: ProviderFailure,
    pub fallback: Option<ProviderFailure>,
    pub cancelled: bool,
}

impl AggregateFailure {
    pub fn kind(&self) -> AggregateFailureKind {
        if self.cancelled {
            AggregateFailureKind::TimedOut
        } else {
            AggregateFailureKind::Exhausted
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.kind() == AggregateFailureKind::TimedOut
    }
}

impl fmt::Display for AggregateFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.cancelled {
            write!(f, "LLM call cancelled ({})", self.primary)?;
        } else {
            write!(f, "all LLM providers failed: {}", self.primary)?;
        }
        if let Some(fallback) = &self.fallback {
            write!(f, "; fallback {fallback}")?;
        }
        Ok(())
    }
}
