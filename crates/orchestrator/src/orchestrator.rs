//! Ticket pipeline orchestrator
//!
//! Drives one [`Context`] through `Intake → Knowledge → Resolution →
//! (Action)? → Escalation? → Done`. Stage failures never escape: they are
//! recorded on the context and route the ticket to Escalation. A run always
//! returns the final context.

use crate::agents::escalation::derive_reason;
use crate::agents::{
    ActionAgent, Agent, EscalationAgent, IntakeAgent, KnowledgeAgent, ResolutionAgent, Stage,
};
use crate::context::Context;
use crate::state_machine::{next_state, PipelineState, Thresholds};
use common::{AgentSettings, ConfigError, Settings};
use llm::{LlmProviderFactory, ResilientLlmClient};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use support_core::{
    ActionExecutor, ConversationMessage, KnowledgeRetriever, PromptError, PromptRenderer,
};
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

const ESCALATION_NOTICE: &str = "closings.escalated";

/// Errors raised while assembling the pipeline. Running a ticket never fails.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("pipeline has no {0} agent")]
    MissingStage(Stage),

    #[error("pipeline has more than one {0} agent")]
    DuplicateStage(Stage),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Prompt(#[from] PromptError),
}

/// Exactly one agent per stage, kept in pipeline order
pub struct AgentPipeline {
    agents: Vec<Agent>,
}

impl AgentPipeline {
    pub fn new(mut agents: Vec<Agent>) -> Result<Self, PipelineError> {
        agents.sort_by_key(Agent::stage);
        for pair in agents.windows(2) {
            if pair[0].stage() == pair[1].stage() {
                return Err(PipelineError::DuplicateStage(pair[0].stage()));
            }
        }
        for stage in Stage::ALL {
            if !agents.iter().any(|agent| agent.stage() == stage) {
                return Err(PipelineError::MissingStage(stage));
            }
        }
        Ok(Self { agents })
    }

    /// The agent running `stage`
    pub fn agent(&self, stage: Stage) -> &Agent {
        // sorted, one per stage, so the position is the stage's rank
        &self.agents[stage as usize]
    }

    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }
}

pub struct Orchestrator {
    pipeline: AgentPipeline,
    thresholds: Thresholds,
    ticket_timeout: Option<Duration>,
    shutdown: CancellationToken,
}

impl Orchestrator {
    pub fn new(pipeline: AgentPipeline, thresholds: Thresholds) -> Self {
        Self {
            pipeline,
            thresholds,
            ticket_timeout: None,
            shutdown: CancellationToken::new(),
        }
    }

    /// Deadline for one ticket; when it passes the in-flight stage is cancelled
    pub fn with_ticket_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.ticket_timeout = timeout;
        self
    }

    /// Builds the LLM client from `settings.llm` and assembles every stage
    pub fn from_settings(
        settings: &Settings,
        prompts: Arc<dyn PromptRenderer>,
        retriever: Arc<dyn KnowledgeRetriever>,
        executor: Arc<dyn ActionExecutor>,
    ) -> Result<Self, PipelineError> {
        let llm = LlmProviderFactory::build_client(&settings.llm, settings.logging.log_llm_calls)?;
        Self::assemble(&settings.agents, Arc::new(llm), prompts, retriever, executor)
    }

    /// Assembles every stage around an existing LLM client
    pub fn assemble(
        settings: &AgentSettings,
        llm: Arc<ResilientLlmClient>,
        prompts: Arc<dyn PromptRenderer>,
        retriever: Arc<dyn KnowledgeRetriever>,
        executor: Arc<dyn ActionExecutor>,
    ) -> Result<Self, PipelineError> {
        let thresholds = Thresholds::from(settings);
        let notice = prompts.render(ESCALATION_NOTICE, &HashMap::new())?;

        let pipeline = AgentPipeline::new(vec![
            Agent::new(IntakeAgent::new(llm.clone(), prompts.clone())),
            Agent::new(KnowledgeAgent::new(retriever, settings.knowledge_top_k)),
            Agent::new(
                ResolutionAgent::new(llm, prompts)
                    .with_regeneration(thresholds.resolution, settings.max_resolution_attempts)
                    .with_context_budget(settings.max_response_tokens_context),
            ),
            Agent::new(ActionAgent::new(executor)),
            Agent::new(EscalationAgent::new(thresholds).with_customer_notice(notice)),
        ])?;

        info!(
            knowledge_threshold = thresholds.knowledge,
            resolution_threshold = thresholds.resolution,
            ticket_timeout_secs = settings.ticket_timeout.map(|t| t.as_secs()),
            "Ticket pipeline assembled"
        );

        Ok(Self::new(pipeline, thresholds).with_ticket_timeout(settings.ticket_timeout))
    }

    pub fn pipeline(&self) -> &AgentPipeline {
        &self.pipeline
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    /// Cancels every in-flight run; they finish in Escalation
    pub fn shutdown(&self) {
        info!("Orchestrator shutdown requested");
        self.shutdown.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Processes one customer message and returns the final context
    pub async fn run(
        &self,
        ticket_id: impl Into<String>,
        customer_id: impl Into<String>,
        current_message: impl Into<String>,
        prior_messages: Vec<ConversationMessage>,
    ) -> Context {
        let ctx = Context::new(ticket_id, customer_id, current_message, prior_messages);
        self.run_context(ctx).await
    }

    /// Like [`Orchestrator::run`] with a freshly generated ticket id
    pub async fn run_new_ticket(
        &self,
        customer_id: impl Into<String>,
        current_message: impl Into<String>,
        prior_messages: Vec<ConversationMessage>,
    ) -> Context {
        self.run(Uuid::new_v4().to_string(), customer_id, current_message, prior_messages)
            .await
    }

    /// Drives a prepared context to a terminal state.
    ///
    /// A context that already reached Done or Escalation is returned untouched.
    pub async fn run_context(&self, mut ctx: Context) -> Context {
        if ctx.workflow_step().is_terminal() {
            debug!(
                ticket_id = %ctx.ticket_id,
                workflow_step = %ctx.workflow_step(),
                "Context already finished, not re-entering pipeline"
            );
            return ctx;
        }

        let start_time = Instant::now();
        let cancel = self.shutdown.child_token();
        let deadline = self.ticket_timeout.map(|timeout| start_time + timeout);

        info!(
            ticket_id = %ctx.ticket_id,
            customer_id = %ctx.customer_id,
            "Ticket pipeline started"
        );

        let mut state = PipelineState::Intake;
        ctx.set_workflow_step(state);

        while let Some(stage) = state.stage() {
            let execution = self.pipeline.agent(stage).execute_with_cancel(ctx, &cancel);
            ctx = match deadline {
                Some(deadline) => cancel_at(deadline, &cancel, execution).await,
                None => execution.await,
            };

            if state == PipelineState::Escalation {
                if !ctx.should_escalate() {
                    let reason = derive_reason(&ctx, &self.thresholds);
                    warn!(
                        ticket_id = %ctx.ticket_id,
                        reason = %reason,
                        "Escalation stage did not flag the ticket, forcing escalation"
                    );
                    ctx.trigger_escalation(reason);
                }
                break;
            }

            let transition = next_state(state, &ctx, &self.thresholds);
            info!(
                ticket_id = %ctx.ticket_id,
                from = %transition.from,
                to = %transition.to,
                reason = %transition.reason,
                "Pipeline transition"
            );
            state = transition.to;
            ctx.record_transition(transition);
            ctx.set_workflow_step(state);
        }

        info!(
            ticket_id = %ctx.ticket_id,
            customer_id = %ctx.customer_id,
            final_state = %ctx.workflow_step(),
            should_escalate = ctx.should_escalate(),
            stages_run = ctx.agent_history().len(),
            elapsed_ms = start_time.elapsed().as_millis() as u64,
            summary = %ctx.summary(),
            "Ticket pipeline finished"
        );
        ctx
    }
}

/// Awaits `execution`, cancelling `cancel` once `deadline` passes; the stage
/// still runs to completion after that and records its own timeout.
async fn cancel_at<F>(deadline: Instant, cancel: &CancellationToken, execution: F) -> Context
where
    F: Future<Output = Context>,
{
    tokio::pin!(execution);
    tokio::select! {
        biased;
        ctx = &mut execution => return ctx,
        _ = tokio::time::sleep_until(deadline) => {
            debug!("Ticket deadline passed, cancelling in-flight stage");
            cancel.cancel();
        }
    }
    execution.await
}
