use crate::context::Context;
use crate::state_machine::{insufficient_knowledge, low_response_confidence, Thresholds};
use anyhow::Result;
use serde_json::{json, Value};
use tracing::warn;

/// Hands the ticket over to a human.
///
/// Purely local: it never calls an LLM, so it completes even after the run's
/// deadline has passed.
pub struct EscalationAgent {
    thresholds: Thresholds,
    customer_notice: Option<String>,
}

impl EscalationAgent {
    pub fn new(thresholds: Thresholds) -> Self {
        Self {
            thresholds,
            customer_notice: None,
        }
    }

    /// Message stored under `metadata["customer_notice"]` for the customer
    pub fn with_customer_notice(mut self, notice: impl Into<String>) -> Self {
        self.customer_notice = Some(notice.into());
        self
    }

    pub(crate) fn process(&self, ctx: &mut Context) -> Result<()> {
        let reason = derive_reason(ctx, &self.thresholds);
        ctx.trigger_escalation(reason);

        if ctx.escalation_context.is_empty() {
            ctx.escalation_context = handoff_context(ctx);
        }
        if let Some(notice) = &self.customer_notice {
            ctx.metadata
                .entry("customer_notice".to_string())
                .or_insert_with(|| Value::String(notice.trim().to_string()));
        }

        warn!(
            ticket_id = %ctx.ticket_id,
            customer_id = %ctx.customer_id,
            reason = ctx.escalation_reason().unwrap_or_default(),
            high_priority = ctx.is_high_priority(),
            "Ticket escalated to human support"
        );
        Ok(())
    }
}

/// Why a ticket ends up with a human, most specific cause first
pub(crate) fn derive_reason(ctx: &Context, thresholds: &Thresholds) -> String {
    let response_confidence = ctx.response_confidence.unwrap_or(0.0);

    if let Some(failure) = ctx.error() {
        format!("pipeline failure in {}: {}", failure.stage, failure.message)
    } else if response_confidence < thresholds.resolution {
        low_response_confidence(response_confidence, thresholds)
    } else if ctx.knowledge_confidence < thresholds.knowledge {
        insufficient_knowledge(ctx.knowledge_confidence, thresholds)
    } else {
        "escalation requested".to_string()
    }
}

fn handoff_context(ctx: &Context) -> std::collections::HashMap<String, Value> {
    [
        ("ticket_id", json!(ctx.ticket_id)),
        ("category", json!(ctx.category.map(|c| c.as_str()))),
        ("priority", json!(ctx.priority.map(|p| p.as_str()))),
        ("sentiment", json!(ctx.sentiment.map(|s| s.as_str()))),
        ("negative_sentiment", json!(ctx.has_negative_sentiment())),
        ("knowledge_confidence", json!(ctx.knowledge_confidence)),
        ("response_confidence", json!(ctx.response_confidence)),
        ("proposed_response", json!(ctx.proposed_response)),
        ("agent_history", json!(ctx.agent_history())),
        ("error", json!(ctx.error())),
    ]
    .into_iter()
    .map(|(key, value)| (key.to_string(), value))
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::Stage;
    use crate::context::{StageFailure, StageFailureKind};

    fn thresholds() -> Thresholds {
        Thresholds {
            knowledge: 0.7,
            resolution: 0.6,
        }
    }

    fn context() -> Context {
        Context::new("T-1", "C-1", "Where is my parcel?", Vec::new())
    }

    #[test]
    fn test_reason_for_low_response_confidence() {
        let mut ctx = context();
        ctx.knowledge_confidence = 0.9;
        ctx.response_confidence = Some(0.4);

        EscalationAgent::new(thresholds()).process(&mut ctx).unwrap();

        assert!(ctx.should_escalate());
        assert_eq!(
            ctx.escalation_reason(),
            Some("low response confidence (0.40 < 0.60)")
        );
        assert_eq!(ctx.escalation_context["response_confidence"], 0.4);
        assert_eq!(ctx.escalation_context["ticket_id"], "T-1");
    }

    #[test]
    fn test_reason_for_low_knowledge_confidence() {
        let mut ctx = context();
        ctx.knowledge_confidence = 0.3;
        ctx.response_confidence = Some(0.9);

        assert_eq!(
            derive_reason(&ctx, &thresholds()),
            "insufficient knowledge confidence (0.30 < 0.70)"
        );
    }

    #[test]
    fn test_reason_for_stage_failure() {
        let mut ctx = context();
        ctx.record_failure(StageFailure {
            stage: Stage::Intake,
            kind: StageFailureKind::AggregateFailure,
            message: "all providers failed".to_string(),
        });

        assert_eq!(
            derive_reason(&ctx, &thresholds()),
            "pipeline failure in intake: all providers failed"
        );
    }

    #[test]
    fn test_existing_reason_and_context_are_kept() {
        let mut ctx = context();
        ctx.trigger_escalation("legal threat");
        ctx.escalation_context
            .insert("note".to_string(), json!("filled by intake"));

        let agent = EscalationAgent::new(thresholds()).with_customer_notice("A human will reply.\n");
        agent.process(&mut ctx).unwrap();
        agent.process(&mut ctx).unwrap();

        assert_eq!(ctx.escalation_reason(), Some("legal threat"));
        assert_eq!(ctx.escalation_context.len(), 1);
        assert_eq!(ctx.metadata["customer_notice"], "A human will reply.");
    }
}
