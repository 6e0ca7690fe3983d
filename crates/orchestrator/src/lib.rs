//! Support ticket agent pipeline
//!
//! Routes each customer message through five stages and hands the result to
//! a human whenever the pipeline is not confident enough to answer alone.
//!
//! - **Agent**: execution envelope around one stage (enable/disable, metrics,
//!   structured logging, failure capture)
//! - **Context**: per-ticket state moved by value from stage to stage
//! - **state_machine**: the pure transition function between stages
//! - **Orchestrator**: runs the pipeline with per-ticket deadlines and shutdown
//!
//! # Usage
//!
//! ```no_run
//! use orchestrator::Orchestrator;
//! use common::Settings;
//! use std::sync::Arc;
//! use support_core::{PromptLibrary, RecordingActionExecutor, StaticKnowledgeBase};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = Settings::from_env()?;
//!     let orchestrator = Orchestrator::from_settings(
//!         &settings,
//!         Arc::new(PromptLibrary::builtin()?),
//!         Arc::new(StaticKnowledgeBase::new().with_document("Refunds take 5 days", 0.9)),
//!         Arc::new(RecordingActionExecutor::new()),
//!     )?;
//!
//!     let ctx = orchestrator
//!         .run("T-1001", "C-42", "Where is my refund?", Vec::new())
//!         .await;
//!     println!("{}", ctx.summary());
//!     Ok(())
//! }
//! ```

pub mod agents;
pub mod context;
pub mod orchestrator;
pub mod state_machine;

pub use agents::{
    ActionAgent, Agent, AgentMetrics, EscalationAgent, IntakeAgent, KnowledgeAgent,
    ResolutionAgent, Stage, StageAgent, StageCancelled,
};
pub use context::{Context, StageFailure, StageFailureKind};
pub use orchestrator::{AgentPipeline, Orchestrator, PipelineError};
pub use state_machine::{next_state, PipelineState, Thresholds, Transition};
