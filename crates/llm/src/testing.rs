//! Scripted in-process provider for tests of code built on the LLM layer

use crate::error::ProviderError;
use crate::providers::{GenerationParams, LlmMessage, LlmProvider, LlmResponse};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// One call as seen by [`ScriptedProvider`]
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    pub messages: Vec<LlmMessage>,
    pub system_prompt: Option<String>,
    pub params: GenerationParams,
}

/// Provider that replays a queue of outcomes.
///
/// Outcomes are consumed in order; the last one repeats once the queue is
/// down to a single entry.
pub struct ScriptedProvider {
    label: String,
    model: String,
    defaults: GenerationParams,
    latency: Option<Duration>,
    script: Mutex<VecDeque<Result<LlmResponse, ProviderError>>>,
    calls: AtomicU32,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedProvider {
    pub fn new(label: impl Into<String>) -> Self {
        let label = label.into();
        Self {
            model: format!("{label}-test-model"),
            label,
            defaults: GenerationParams::default(),
            latency: None,
            script: Mutex::new(VecDeque::new()),
            calls: AtomicU32::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue a successful reply with the given completion token count
    pub fn respond_with(self, content: impl Into<String>, total_tokens: u32) -> Self {
        let response = LlmResponse::new(content, self.model.clone(), self.label.clone(), 0, total_tokens);
        self.push(Ok(response))
    }

    pub fn fail_with(self, error: ProviderError) -> Self {
        self.push(Err(error))
    }

    pub fn with_defaults(mut self, defaults: GenerationParams) -> Self {
        self.defaults = defaults;
        self
    }

    /// Every call sleeps this long (tokio time) before answering
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    fn push(self, outcome: Result<LlmResponse, ProviderError>) -> Self {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(outcome);
        }
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }

    fn next_outcome(&self) -> Result<LlmResponse, ProviderError> {
        let mut script = match self.script.lock() {
            Ok(script) => script,
            Err(poisoned) => poisoned.into_inner(),
        };
        let outcome = if script.len() > 1 {
            script.pop_front()
        } else {
            script.front().cloned()
        };
        outcome.unwrap_or_else(|| {
            Err(ProviderError::Unknown(format!(
                "no scripted outcome for {}",
                self.label
            )))
        })
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn provider_name(&self) -> &str {
        &self.label
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn default_params(&self) -> GenerationParams {
        self.defaults
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(60)
    }

    async fn generate(
        &self,
        messages: &[LlmMessage],
        system_prompt: Option<&str>,
        params: &GenerationParams,
    ) -> Result<LlmResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(RecordedRequest {
                messages: messages.to_vec(),
                system_prompt: system_prompt.map(str::to_string),
                params: *params,
            });
        }

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        self.next_outcome()
    }
}
