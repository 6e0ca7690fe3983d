use super::parsing::{extract_json_object, flag, label, text};
use crate::context::Context;
use anyhow::{bail, Context as _, Result};
use llm::{LlmMessage, ResilientLlmClient};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use support_core::{PromptRenderer, SentimentScore, TicketCategory, TicketPriority};
use tokio_util::sync::CancellationToken;
use tracing::debug;

const SYSTEM_PROMPT: &str = "system_prompts.intake_agent";
const TEMPLATE: &str = "templates.classify_ticket";

/// Classifies the ticket: category, priority, sentiment, intent, entities
pub struct IntakeAgent {
    llm: Arc<ResilientLlmClient>,
    prompts: Arc<dyn PromptRenderer>,
}

#[derive(Debug, Clone, PartialEq)]
struct Classification {
    category: TicketCategory,
    priority: TicketPriority,
    sentiment: SentimentScore,
    intent: Option<String>,
    entities: HashMap<String, Value>,
    escalate: bool,
    reason: Option<String>,
}

impl IntakeAgent {
    pub fn new(llm: Arc<ResilientLlmClient>, prompts: Arc<dyn PromptRenderer>) -> Self {
        Self { llm, prompts }
    }

    pub(crate) async fn process(&self, ctx: &mut Context, cancel: &CancellationToken) -> Result<()> {
        if ctx.current_message.trim().is_empty() {
            bail!("customer message is empty");
        }

        let variables = HashMap::from([
            ("history".to_string(), format_history(ctx)),
            ("message".to_string(), ctx.current_message.clone()),
        ]);
        let prompt = self.prompts.render(TEMPLATE, &variables)?;
        let system_prompt = self.prompts.render(SYSTEM_PROMPT, &HashMap::new())?;

        let response = self
            .llm
            .generate_with_cancel(
                &[LlmMessage::user(prompt)],
                Some(&system_prompt),
                None,
                None,
                cancel,
            )
            .await?;

        let classification =
            parse_classification(response.content()).context("unusable classification reply")?;
        debug!(
            ticket_id = %ctx.ticket_id,
            category = classification.category.as_str(),
            priority = classification.priority.as_str(),
            sentiment = classification.sentiment.as_str(),
            "Ticket classified"
        );

        ctx.category = Some(classification.category);
        ctx.priority = Some(classification.priority);
        ctx.sentiment = Some(classification.sentiment);
        ctx.intent = classification.intent;
        ctx.entities.extend(classification.entities);
        ctx.metadata.insert(
            "intake_provider".to_string(),
            Value::String(response.provider().to_string()),
        );

        if classification.escalate {
            let reason = classification
                .reason
                .unwrap_or_else(|| "intake requested human review".to_string());
            ctx.trigger_escalation(reason);
        }

        Ok(())
    }
}

fn format_history(ctx: &Context) -> String {
    if ctx.messages.is_empty() {
        return "(no previous messages)".to_string();
    }
    ctx.messages
        .iter()
        .map(|m| format!("{}: {}", m.role, m.content))
        .collect::<Vec<_>>()
        .join("\n")
}

fn parse_classification(reply: &str) -> Result<Classification> {
    let object = extract_json_object(reply)?;

    let entities = match object.get("entities") {
        Some(Value::Object(map)) => map.clone().into_iter().collect(),
        _ => HashMap::new(),
    };

    Ok(Classification {
        category: label(&object, "category").unwrap_or(TicketCategory::Other),
        priority: label(&object, "priority").unwrap_or(TicketPriority::Medium),
        sentiment: label(&object, "sentiment").unwrap_or(SentimentScore::Neutral),
        intent: text(&object, "intent"),
        entities,
        escalate: flag(&object, "escalate"),
        reason: text(&object, "reason"),
    })
}
