use super::{ActionExecutor, KnowledgeRetriever};
use crate::domain::{PendingAction, RetrievedDocument};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Mutex;

/// Keyword-overlap retriever over a fixed document set.
///
/// Each document carries a base score; a document is returned only when it
/// shares at least one word (3+ chars) with the query. Results are sorted by
/// score, highest first.
#[derive(Debug, Default)]
pub struct StaticKnowledgeBase {
    documents: Vec<RetrievedDocument>,
}

impl StaticKnowledgeBase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document(mut self, content: impl Into<String>, score: f64) -> Self {
        self.documents.push(RetrievedDocument::new(content, score));
        self
    }

    fn keywords(text: &str) -> HashSet<String> {
        text.split(|c: char| !c.is_alphanumeric())
            .filter(|w| w.len() >= 3)
            .map(|w| w.to_lowercase())
            .collect()
    }
}

#[async_trait]
impl KnowledgeRetriever for StaticKnowledgeBase {
    async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<RetrievedDocument>> {
        let query_words = Self::keywords(query);
        let mut hits: Vec<RetrievedDocument> = self
            .documents
            .iter()
            .filter(|doc| !Self::keywords(&doc.content).is_disjoint(&query_words))
            .cloned()
            .collect();

        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(top_k);
        Ok(hits)
    }
}

/// Action executor that records every action and answers with a canned result.
///
/// Action types listed via [`RecordingActionExecutor::failing_on`] return an
/// error instead.
#[derive(Debug, Default)]
pub struct RecordingActionExecutor {
    executed: Mutex<Vec<PendingAction>>,
    failing: HashSet<String>,
}

impl RecordingActionExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(mut self, action_type: impl Into<String>) -> Self {
        self.failing.insert(action_type.into());
        self
    }

    /// Actions executed so far, in order
    pub fn executed(&self) -> Vec<PendingAction> {
        self.executed
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ActionExecutor for RecordingActionExecutor {
    async fn execute(&self, action: &PendingAction) -> Result<serde_json::Value> {
        if self.failing.contains(&action.action_type) {
            return Err(anyhow!("action '{}' rejected", action.action_type));
        }

        self.executed
            .lock()
            .map_err(|_| anyhow!("action log poisoned"))?
            .push(action.clone());

        Ok(serde_json::json!({
            "status": "completed",
            "action": action.action_type,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_knowledge_base_ranks_and_limits() {
        let kb = StaticKnowledgeBase::new()
            .with_document("Reset your password from the login page", 0.6)
            .with_document("Password rules require 12 characters", 0.9)
            .with_document("Shipping takes 3-5 days", 0.95);

        let docs = kb.retrieve("I forgot my password", 5).await.unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].score, 0.9);
        assert_eq!(docs[1].score, 0.6);

        let limited = kb.retrieve("password", 1).await.unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn test_static_knowledge_base_no_overlap() {
        let kb = StaticKnowledgeBase::new().with_document("Shipping takes 3-5 days", 0.95);
        assert!(kb.retrieve("refund please", 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_recording_executor() {
        let executor = RecordingActionExecutor::new().failing_on("delete_account");

        let ok = executor
            .execute(&PendingAction::new("reset_password"))
            .await
            .unwrap();
        assert_eq!(ok["status"], "completed");

        let err = executor
            .execute(&PendingAction::new("delete_account"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("delete_account"));

        assert_eq!(executor.executed().len(), 1);
    }
}
