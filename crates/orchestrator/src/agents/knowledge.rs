use super::{cancellable, Stage};
use crate::context::Context;
use anyhow::{Context as _, Result};
use std::sync::Arc;
use support_core::{KnowledgeRetriever, RetrievedDocument};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Retrieves knowledge-base documents for the ticket
pub struct KnowledgeAgent {
    retriever: Arc<dyn KnowledgeRetriever>,
    top_k: usize,
}

impl KnowledgeAgent {
    pub fn new(retriever: Arc<dyn KnowledgeRetriever>, top_k: usize) -> Self {
        Self {
            retriever,
            top_k: top_k.max(1),
        }
    }

    pub(crate) async fn process(&self, ctx: &mut Context, cancel: &CancellationToken) -> Result<()> {
        let query = match ctx.category {
            Some(category) => format!("{category}: {}", ctx.current_message),
            None => ctx.current_message.clone(),
        };

        let documents = cancellable(
            Stage::Knowledge,
            cancel,
            self.retriever.retrieve(&query, self.top_k),
        )
        .await
        .context("knowledge retrieval failed")?;

        let documents: Vec<RetrievedDocument> = documents
            .into_iter()
            .take(self.top_k)
            .map(|doc| {
                let metadata = doc.metadata;
                let mut clamped = RetrievedDocument::new(doc.content, doc.score);
                clamped.metadata = metadata;
                clamped
            })
            .collect();

        let confidence = documents.iter().map(|d| d.score).fold(0.0_f64, f64::max);
        debug!(
            ticket_id = %ctx.ticket_id,
            documents = documents.len(),
            confidence,
            "Knowledge retrieved"
        );

        ctx.retrieved_documents = documents;
        ctx.knowledge_confidence = confidence;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use support_core::{StaticKnowledgeBase, TicketCategory};

    #[tokio::test]
    async fn test_documents_and_confidence() {
        let kb = StaticKnowledgeBase::new()
            .with_document("Your refund arrives within 5 business days", 0.92)
            .with_document("A refund for duplicate charges is automatic", 0.81)
            .with_document("Shipping takes 3 days", 0.4);
        let agent = KnowledgeAgent::new(Arc::new(kb), 2);
        let mut ctx = Context::new("T-1", "C-1", "When will my refund arrive?", Vec::new());
        ctx.category = Some(TicketCategory::Refund);

        agent.process(&mut ctx, &CancellationToken::new()).await.unwrap();

        assert_eq!(ctx.retrieved_documents.len(), 2);
        assert_eq!(ctx.retrieved_documents[0].score, 0.92);
        assert_eq!(ctx.retrieved_documents[1].score, 0.81);
        assert_eq!(ctx.knowledge_confidence, 0.92);
    }

    #[tokio::test]
    async fn test_no_documents_means_zero_confidence() {
        let agent = KnowledgeAgent::new(Arc::new(StaticKnowledgeBase::new()), 5);
        let mut ctx = Context::new("T-1", "C-1", "Anything?", Vec::new());

        agent.process(&mut ctx, &CancellationToken::new()).await.unwrap();

        assert!(ctx.retrieved_documents.is_empty());
        assert_eq!(ctx.knowledge_confidence, 0.0);
    }
}
