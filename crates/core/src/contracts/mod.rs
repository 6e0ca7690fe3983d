//! Contracts for the pipeline's external collaborators
//!
//! The pipeline only depends on these traits. Knowledge retrieval and action
//! execution live outside this workspace; the in-memory implementations in
//! [`in_memory`] back tests and local runs.

use crate::domain::{PendingAction, RetrievedDocument};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;

pub mod in_memory;

pub use in_memory::{RecordingActionExecutor, StaticKnowledgeBase};

/// Prompt rendering contract: `(template_key, variables) -> text`.
///
/// Rendering is a pure text substitution; it fails when the template does not
/// exist or a variable it references is missing from `variables`.
pub trait PromptRenderer: Send + Sync {
    fn render(
        &self,
        template_key: &str,
        variables: &HashMap<String, String>,
    ) -> Result<String, crate::prompts::PromptError>;
}

/// Knowledge retrieval contract
#[async_trait]
pub trait KnowledgeRetriever: Send + Sync {
    /// Return at most `top_k` documents ordered by descending relevance
    async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<RetrievedDocument>>;
}

/// Action execution contract (refunds, password resets, ...)
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    /// Execute one action and return its result payload
    async fn execute(&self, action: &PendingAction) -> Result<serde_json::Value>;
}
