//! Per-ticket pipeline context
//!
//! One [`Context`] is created per incoming message and moved by value from
//! stage to stage. Escalation state, the agent history and the executed
//! action set can only grow: their fields are private and mutated through
//! [`Context::trigger_escalation`], [`Context::mark_action_executed`] and the
//! envelope's history recording.

use crate::agents::Stage;
use crate::state_machine::{PipelineState, Transition};
use chrono::{DateTime, Utc};
use llm::{AggregateFailure, LlmMessage};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;
use support_core::{
    ConversationMessage, PendingAction, RetrievedDocument, SentimentScore, TicketCategory,
    TicketPriority,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageFailureKind {
    /// Every LLM provider failed
    AggregateFailure,
    /// The run was cancelled by its deadline or by shutdown
    TimedOut,
    /// Any other error raised by the stage
    StageFault,
}

impl StageFailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageFailureKind::AggregateFailure => "aggregate_failure",
            StageFailureKind::TimedOut => "timed_out",
            StageFailureKind::StageFault => "stage_fault",
        }
    }
}

/// Structured description of a failed stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageFailure {
    pub stage: Stage,
    pub kind: StageFailureKind,
    pub message: String,
}

impl StageFailure {
    /// Classify an error returned by a stage's `process`
    pub fn from_error(stage: Stage, error: &anyhow::Error) -> Self {
        let kind = if let Some(failure) = error.downcast_ref::<AggregateFailure>() {
            if failure.is_timeout() {
                StageFailureKind::TimedOut
            } else {
                StageFailureKind::AggregateFailure
            }
        } else if error.downcast_ref::<crate::agents::StageCancelled>().is_some() {
            StageFailureKind::TimedOut
        } else {
            StageFailureKind::StageFault
        };

        Self {
            stage,
            kind,
            message: format!("{error:#}"),
        }
    }
}

impl fmt::Display for StageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]: {}", self.stage, self.kind.as_str(), self.message)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Context {
    pub ticket_id: String,
    pub customer_id: String,
    /// Prior turns, oldest first
    pub messages: Vec<ConversationMessage>,
    pub current_message: String,

    pub category: Option<TicketCategory>,
    pub priority: Option<TicketPriority>,
    pub sentiment: Option<SentimentScore>,
    pub intent: Option<String>,
    pub entities: HashMap<String, Value>,

    pub retrieved_documents: Vec<RetrievedDocument>,
    pub knowledge_confidence: f64,

    pub proposed_response: Option<String>,
    pub response_confidence: Option<f64>,
    pub resolution_attempts: u32,
    pub requires_action: bool,
    pub pending_actions: Vec<PendingAction>,

    pub action_results: HashMap<String, Value>,
    actions_executed: Vec<String>,

    should_escalate: bool,
    escalation_reason: Option<String>,
    pub escalation_context: HashMap<String, Value>,

    agent_history: Vec<String>,
    pub metadata: HashMap<String, Value>,
    error: Option<StageFailure>,

    workflow_step: PipelineState,
    transitions: Vec<Transition>,
    pub created_at: DateTime<Utc>,
}

impl Context {
    pub fn new(
        ticket_id: impl Into<String>,
        customer_id: impl Into<String>,
        current_message: impl Into<String>,
        messages: Vec<ConversationMessage>,
    ) -> Self {
        Self {
            ticket_id: ticket_id.into(),
            customer_id: customer_id.into(),
            messages,
            current_message: current_message.into(),
            category: None,
            priority: None,
            sentiment: None,
            intent: None,
            entities: HashMap::new(),
            retrieved_documents: Vec::new(),
            knowledge_confidence: 0.0,
            proposed_response: None,
            response_confidence: None,
            resolution_attempts: 0,
            requires_action: false,
            pending_actions: Vec::new(),
            action_results: HashMap::new(),
            actions_executed: Vec::new(),
            should_escalate: false,
            escalation_reason: None,
            escalation_context: HashMap::new(),
            agent_history: Vec::new(),
            metadata: HashMap::new(),
            error: None,
            workflow_step: PipelineState::Intake,
            transitions: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn should_escalate(&self) -> bool {
        self.should_escalate
    }

    pub fn escalation_reason(&self) -> Option<&str> {
        self.escalation_reason.as_deref()
    }

    /// Marks the ticket for human review.
    ///
    /// An existing reason is never replaced. Returns `true` when this call
    /// changed anything.
    pub fn trigger_escalation(&mut self, reason: impl Into<String>) -> bool {
        let mut changed = !self.should_escalate;
        self.should_escalate = true;
        if self.escalation_reason.is_none() {
            self.escalation_reason = Some(reason.into());
            changed = true;
        }
        changed
    }

    pub fn agent_history(&self) -> &[String] {
        &self.agent_history
    }

    pub(crate) fn record_history(&mut self, entry: String) {
        self.agent_history.push(entry);
    }

    pub fn actions_executed(&self) -> &[String] {
        &self.actions_executed
    }

    /// Adds `action` to the executed set; duplicates are ignored
    pub fn mark_action_executed(&mut self, action: impl Into<String>) {
        let action = action.into();
        if !self.actions_executed.contains(&action) {
            self.actions_executed.push(action);
        }
    }

    /// Most recently recorded stage failure
    pub fn error(&self) -> Option<&StageFailure> {
        self.error.as_ref()
    }

    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }

    pub(crate) fn record_failure(&mut self, failure: StageFailure) {
        self.error = Some(failure);
    }

    pub fn workflow_step(&self) -> PipelineState {
        self.workflow_step
    }

    pub(crate) fn set_workflow_step(&mut self, step: PipelineState) {
        self.workflow_step = step;
    }

    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    pub(crate) fn record_transition(&mut self, transition: Transition) {
        self.transitions.push(transition);
    }

    pub fn is_high_priority(&self) -> bool {
        matches!(
            self.priority,
            Some(TicketPriority::High) | Some(TicketPriority::Urgent)
        )
    }

    pub fn has_negative_sentiment(&self) -> bool {
        self.sentiment.map_or(false, |s| s.is_negative())
    }

    /// Prior turns followed by the current message as a user turn
    pub fn conversation_for_llm(&self) -> Vec<LlmMessage> {
        self.messages
            .iter()
            .map(LlmMessage::from)
            .chain(std::iter::once(LlmMessage::user(self.current_message.clone())))
            .collect()
    }

    pub fn summary(&self) -> Value {
        json!({
            "ticket_id": self.ticket_id,
            "customer_id": self.customer_id,
            "workflow_step": self.workflow_step.as_str(),
            "category": self.category.map(|c| c.as_str()),
            "priority": self.priority.map(|p| p.as_str()),
            "sentiment": self.sentiment.map(|s| s.as_str()),
            "knowledge_confidence": self.knowledge_confidence,
            "response_confidence": self.response_confidence,
            "has_response": self.proposed_response.is_some(),
            "actions_executed": self.actions_executed,
            "should_escalate": self.should_escalate,
            "escalation_reason": self.escalation_reason,
            "agent_history": self.agent_history,
            "error": self.error.as_ref().map(|e| e.to_string()),
        })
    }
}
