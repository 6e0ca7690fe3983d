//! Retry engine with exponential backoff
//!
//! Runs an async operation up to `max_retries + 1` times. The delay before
//! retry `n` (0-based) is `initial_delay * backoff_multiplier^n`, capped at
//! `max_delay`. Both the operation and the backoff sleep are raced against a
//! [`CancellationToken`], so an external deadline aborts the loop promptly.

use common::LlmSettings;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Configuration for retry behavior with exponential backoff
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (excluding initial attempt)
    pub max_retries: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Maximum delay cap to prevent excessive waiting
    pub max_delay: Duration,
    /// Multiplier for exponential backoff calculation
    pub backoff_multiplier: f64,
    /// ±10% jitter on every delay
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }
}

impl RetryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// One attempt, no retries
    pub fn single_attempt() -> Self {
        Self::default().with_max_retries(0)
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

impl From<&LlmSettings> for RetryConfig {
    fn from(settings: &LlmSettings) -> Self {
        Self::default()
            .with_max_retries(settings.max_retries)
            .with_initial_delay(settings.retry_base_delay)
            .with_max_delay(settings.retry_max_wait)
    }
}

/// Trait for errors that can be classified as retryable or non-retryable
pub trait RetryableError {
    /// Returns true if the error is retryable (transient)
    fn is_retryable(&self) -> bool;

    /// Returns the error type for logging purposes
    fn error_type(&self) -> String;

    /// Returns the error message
    fn error_message(&self) -> String;

    /// Server-provided minimum wait before the next attempt
    fn retry_after(&self) -> Option<Duration> {
        None
    }

    /// Logged at error level instead of warn
    fn is_severe(&self) -> bool {
        false
    }
}

/// Why the retry loop gave up
#[derive(Debug, Clone, PartialEq)]
pub enum RetryError<E> {
    /// Attempts exhausted or a non-retryable error was returned
    Exhausted { attempts: u32, last_error: E },
    /// The cancellation token fired
    Cancelled { attempts: u32, last_error: Option<E> },
}

impl<E> RetryError<E> {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Exhausted { attempts, .. } | RetryError::Cancelled { attempts, .. } => {
                *attempts
            }
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, RetryError::Cancelled { .. })
    }
}

/// Execute an async operation with retry logic and exponential backoff.
///
/// `operation` receives the 0-based attempt number. `label` only feeds the
/// log lines.
pub async fn execute_with_retry<F, Fut, T, E>(
    config: &RetryConfig,
    label: &str,
    cancel: &CancellationToken,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: RetryableError,
{
    let start_time = Instant::now();
    let max_attempts = config.max_attempts();
    let mut last_error: Option<E> = None;
    let mut attempt: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled {
                attempts: attempt,
                last_error,
            });
        }

        debug!(
            label,
            attempt = attempt + 1,
            max_attempts,
            "Starting attempt"
        );

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!(label, attempt = attempt + 1, "Attempt cancelled");
                return Err(RetryError::Cancelled {
                    attempts: attempt + 1,
                    last_error,
                });
            }
            outcome = operation(attempt) => outcome,
        };

        let error = match outcome {
            Ok(result) => {
                if attempt > 0 {
                    info!(
                        label,
                        retries = attempt,
                        elapsed_ms = start_time.elapsed().as_millis() as u64,
                        "Operation succeeded after retries"
                    );
                }
                return Ok(result);
            }
            Err(error) => error,
        };

        let attempts = attempt + 1;
        if attempts >= max_attempts || !error.is_retryable() {
            if error.is_severe() || !error.is_retryable() {
                error!(
                    label,
                    attempt = attempts,
                    error_type = %error.error_type(),
                    error = %error.error_message(),
                    "Operation failed permanently"
                );
            } else {
                warn!(
                    label,
                    attempt = attempts,
                    error_type = %error.error_type(),
                    error = %error.error_message(),
                    "Operation failed, no attempts left"
                );
            }
            return Err(RetryError::Exhausted {
                attempts,
                last_error: error,
            });
        }

        let delay = calculate_backoff_delay(config, attempt, error.retry_after());
        if error.is_severe() {
            error!(
                label,
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                error_type = %error.error_type(),
                error = %error.error_message(),
                "Attempt failed, retrying"
            );
        } else {
            warn!(
                label,
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                error_type = %error.error_type(),
                error = %error.error_message(),
                "Attempt failed, retrying"
            );
        }
        last_error = Some(error);

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!(label, attempt = attempts, "Backoff cancelled");
                return Err(RetryError::Cancelled {
                    attempts,
                    last_error,
                });
            }
            _ = tokio::time::sleep(delay) => {}
        }

        attempt = attempts;
    }
}

/// Delay before retry number `attempt` (0-based).
///
/// A `retry_after` hint longer than the computed delay wins; the result is
/// always capped at `max_delay` before jitter.
pub fn calculate_backoff_delay(
    config: &RetryConfig,
    attempt: u32,
    retry_after: Option<Duration>,
) -> Duration {
    let base_delay = config.initial_delay.as_millis() as f64;
    let exponential_delay =
        base_delay * config.backoff_multiplier.powi(attempt.min(i32::MAX as u32) as i32);
    let capped_ms = exponential_delay.min(config.max_delay.as_millis() as f64);

    let mut delay = Duration::from_millis(capped_ms as u64);
    if let Some(hint) = retry_after {
        if hint > delay {
            delay = hint.min(config.max_delay);
        }
    }

    if config.jitter {
        let jitter_range = delay.as_millis() as f64 * 0.1;
        if jitter_range > 0.0 {
            let jitter = rand::thread_rng().gen_range(-jitter_range..jitter_range);
            let jittered_delay = (delay.as_millis() as f64 + jitter).max(0.0) as u64;
            delay = Duration::from_millis(jittered_delay);
        }
    }

    delay
}
