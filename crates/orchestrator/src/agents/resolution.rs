use super::parsing::{confidence, extract_json_object, flag, text};
use crate::context::Context;
use anyhow::{anyhow, Context as _, Result};
use llm::{truncate_to_tokens, LlmMessage, ResilientLlmClient};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use support_core::{PendingAction, PromptRenderer};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const SYSTEM_PROMPT: &str = "system_prompts.resolution_agent";
const TEMPLATE: &str = "templates.generate_response";
const NO_DOCUMENTS: &str = "No relevant documents found.";
const REGENERATION_ERROR: &str = "resolution_regeneration_error";

/// Drafts the customer reply from the retrieved documents
pub struct ResolutionAgent {
    llm: Arc<ResilientLlmClient>,
    prompts: Arc<dyn PromptRenderer>,
    confidence_threshold: f64,
    max_attempts: u32,
    context_token_budget: usize,
}

#[derive(Debug, Clone, PartialEq)]
struct Draft {
    response: String,
    confidence: f64,
    requires_action: bool,
    actions: Vec<PendingAction>,
}

impl ResolutionAgent {
    pub fn new(llm: Arc<ResilientLlmClient>, prompts: Arc<dyn PromptRenderer>) -> Self {
        Self {
            llm,
            prompts,
            confidence_threshold: 0.8,
            max_attempts: 3,
            context_token_budget: 2000,
        }
    }

    /// Drafts below `threshold` are regenerated, up to `max_attempts` calls in total
    pub fn with_regeneration(mut self, threshold: f64, max_attempts: u32) -> Self {
        self.confidence_threshold = threshold;
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Token budget for the knowledge excerpts placed in the prompt
    pub fn with_context_budget(mut self, tokens: usize) -> Self {
        self.context_token_budget = tokens;
        self
    }

    pub(crate) async fn process(&self, ctx: &mut Context, cancel: &CancellationToken) -> Result<()> {
        let variables = HashMap::from([
            ("category".to_string(), label_or_unknown(ctx.category.map(|c| c.as_str()))),
            ("priority".to_string(), label_or_unknown(ctx.priority.map(|p| p.as_str()))),
            ("message".to_string(), ctx.current_message.clone()),
            ("documents".to_string(), self.format_documents(ctx)),
        ]);
        let prompt = self.prompts.render(TEMPLATE, &variables)?;
        let system_prompt = self.prompts.render(SYSTEM_PROMPT, &HashMap::new())?;

        let mut messages: Vec<LlmMessage> = ctx.messages.iter().map(LlmMessage::from).collect();
        messages.push(LlmMessage::user(prompt));

        let mut best: Option<Draft> = None;
        let mut attempts = 0;
        while attempts < self.max_attempts {
            attempts += 1;
            let draft = match self.draft(&messages, &system_prompt, attempts, cancel).await {
                Ok(draft) => draft,
                Err(err) => match &best {
                    // a failed regeneration keeps the draft already in hand
                    Some(kept) => {
                        warn!(
                            ticket_id = %ctx.ticket_id,
                            attempt = attempts,
                            kept_confidence = kept.confidence,
                            error = %format!("{err:#}"),
                            "Resolution regeneration failed, keeping best draft"
                        );
                        ctx.metadata.insert(
                            REGENERATION_ERROR.to_string(),
                            Value::String(format!("{err:#}")),
                        );
                        break;
                    }
                    None => return Err(err),
                },
            };

            debug!(
                ticket_id = %ctx.ticket_id,
                attempt = attempts,
                confidence = draft.confidence,
                "Resolution draft generated"
            );

            let done = draft.confidence >= self.confidence_threshold;
            if best.as_ref().map_or(true, |b| draft.confidence > b.confidence) {
                best = Some(draft);
            }
            if done {
                break;
            }
        }

        let draft = best.ok_or_else(|| anyhow!("no resolution draft produced"))?;
        info!(
            ticket_id = %ctx.ticket_id,
            attempts,
            confidence = draft.confidence,
            actions = draft.actions.len(),
            "Resolution drafted"
        );

        ctx.resolution_attempts = attempts;
        ctx.proposed_response = Some(draft.response);
        ctx.response_confidence = Some(draft.confidence);
        ctx.requires_action = draft.requires_action;
        ctx.pending_actions = draft.actions;
        Ok(())
    }

    async fn draft(
        &self,
        messages: &[LlmMessage],
        system_prompt: &str,
        attempt: u32,
        cancel: &CancellationToken,
    ) -> Result<Draft> {
        let response = self
            .llm
            .generate_with_cancel(messages, Some(system_prompt), None, None, cancel)
            .await?;
        parse_draft(response.content())
            .with_context(|| format!("unusable resolution reply (attempt {attempt})"))
    }

    fn format_documents(&self, ctx: &Context) -> String {
        if ctx.retrieved_documents.is_empty() {
            return NO_DOCUMENTS.to_string();
        }
        let joined = ctx
            .retrieved_documents
            .iter()
            .enumerate()
            .map(|(i, doc)| format!("[{}] (relevance {:.2}) {}", i + 1, doc.score, doc.content))
            .collect::<Vec<_>>()
            .join("\n\n");
        truncate_to_tokens(&joined, self.context_token_budget).to_string()
    }
}

fn label_or_unknown(label: Option<&str>) -> String {
    label.unwrap_or("unknown").to_string()
}

fn parse_draft(reply: &str) -> Result<Draft> {
    let object = extract_json_object(reply)?;
    let response = text(&object, "response").ok_or_else(|| anyhow!("reply has no response text"))?;

    let actions = match object.get("actions") {
        Some(Value::Array(items)) => items
            .iter()
            .filter(|item| item.get("type").and_then(Value::as_str).is_some())
            .map(|item| serde_json::from_value::<PendingAction>(item.clone()))
            .collect::<Result<Vec<_>, _>>()
            .context("malformed action list")?,
        _ => Vec::new(),
    };

    Ok(Draft {
        response,
        confidence: confidence(&object, "confidence"),
        requires_action: flag(&object, "requires_action"),
        actions,
    })
}
