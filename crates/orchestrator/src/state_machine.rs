//! Pipeline state machine
//!
//! `Intake → Knowledge → Resolution → (Action)? → Escalation? → Done`
//!
//! [`next_state`] is pure: it only reads the context produced by the stage
//! that just ran.

use crate::agents::Stage;
use crate::context::Context;
use common::AgentSettings;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Intake,
    Knowledge,
    Resolution,
    Action,
    Escalation,
    Done,
}

impl PipelineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineState::Intake => "intake",
            PipelineState::Knowledge => "knowledge",
            PipelineState::Resolution => "resolution",
            PipelineState::Action => "action",
            PipelineState::Escalation => "escalation",
            PipelineState::Done => "done",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Escalation | PipelineState::Done)
    }

    /// Stage executed while in this state; `Done` runs nothing
    pub fn stage(&self) -> Option<Stage> {
        match self {
            PipelineState::Intake => Some(Stage::Intake),
            PipelineState::Knowledge => Some(Stage::Knowledge),
            PipelineState::Resolution => Some(Stage::Resolution),
            PipelineState::Action => Some(Stage::Action),
            PipelineState::Escalation => Some(Stage::Escalation),
            PipelineState::Done => None,
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Confidence floors below which a ticket goes to a human
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub knowledge: f64,
    pub resolution: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            knowledge: 0.7,
            resolution: 0.8,
        }
    }
}

impl From<&AgentSettings> for Thresholds {
    fn from(settings: &AgentSettings) -> Self {
        Self {
            knowledge: settings.knowledge_threshold,
            resolution: settings.escalation_threshold,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub from: PipelineState,
    pub to: PipelineState,
    pub reason: String,
}

impl Transition {
    fn new(from: PipelineState, to: PipelineState, reason: impl Into<String>) -> Self {
        Self {
            from,
            to,
            reason: reason.into(),
        }
    }
}

/// Decide where the pipeline goes after the stage for `current` has run
pub fn next_state(current: PipelineState, ctx: &Context, thresholds: &Thresholds) -> Transition {
    if current.is_terminal() {
        return Transition::new(current, current, "terminal state");
    }

    if let Some(failure) = ctx.error() {
        return Transition::new(
            current,
            PipelineState::Escalation,
            format!("{} stage failed", failure.stage),
        );
    }

    match current {
        PipelineState::Intake => {
            Transition::new(current, PipelineState::Knowledge, "ticket classified")
        }
        PipelineState::Knowledge => {
            Transition::new(current, PipelineState::Resolution, "knowledge retrieved")
        }
        PipelineState::Resolution if ctx.requires_action || !ctx.pending_actions.is_empty() => {
            Transition::new(current, PipelineState::Action, "response requires actions")
        }
        PipelineState::Resolution | PipelineState::Action => evaluate_outcome(current, ctx, thresholds),
        PipelineState::Escalation | PipelineState::Done => {
            Transition::new(current, current, "terminal state")
        }
    }
}

fn evaluate_outcome(current: PipelineState, ctx: &Context, thresholds: &Thresholds) -> Transition {
    let response_confidence = ctx.response_confidence.unwrap_or(0.0);

    if ctx.should_escalate() {
        Transition::new(current, PipelineState::Escalation, "escalation requested")
    } else if response_confidence < thresholds.resolution {
        Transition::new(
            current,
            PipelineState::Escalation,
            low_response_confidence(response_confidence, thresholds),
        )
    } else if ctx.knowledge_confidence < thresholds.knowledge {
        Transition::new(
            current,
            PipelineState::Escalation,
            insufficient_knowledge(ctx.knowledge_confidence, thresholds),
        )
    } else {
        Transition::new(current, PipelineState::Done, "response ready")
    }
}

pub(crate) fn low_response_confidence(confidence: f64, thresholds: &Thresholds) -> String {
    format!(
        "low response confidence ({:.2} < {:.2})",
        confidence, thresholds.resolution
    )
}

pub(crate) fn insufficient_knowledge(confidence: f64, thresholds: &Thresholds) -> String {
    format!(
        "insufficient knowledge confidence ({:.2} < {:.2})",
        confidence, thresholds.knowledge
    )
}
