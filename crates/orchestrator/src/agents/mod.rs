//! Pipeline stages and the execution envelope shared by all of them
//!
//! [`Agent`] wraps one [`StageAgent`] with enable/disable, metrics, structured
//! logging and failure containment: `execute` never returns an error, it
//! records it in the context instead. A panicking stage is recorded the same
//! way, as a stage fault.

pub mod action;
pub mod escalation;
pub mod intake;
pub mod knowledge;
mod parsing;
pub mod resolution;

pub use action::ActionAgent;
pub use escalation::EscalationAgent;
pub use intake::IntakeAgent;
pub use knowledge::KnowledgeAgent;
pub use resolution::ResolutionAgent;

use crate::context::{Context, StageFailure};
use anyhow::anyhow;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Identity of a pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Intake,
    Knowledge,
    Resolution,
    Action,
    Escalation,
}

impl Stage {
    /// Pipeline order
    pub const ALL: [Stage; 5] = [
        Stage::Intake,
        Stage::Knowledge,
        Stage::Resolution,
        Stage::Action,
        Stage::Escalation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Intake => "intake",
            Stage::Knowledge => "knowledge",
            Stage::Resolution => "resolution",
            Stage::Action => "action",
            Stage::Escalation => "escalation",
        }
    }

    /// Name used in log lines
    pub fn agent_name(&self) -> &'static str {
        match self {
            Stage::Intake => "intake_agent",
            Stage::Knowledge => "knowledge_agent",
            Stage::Resolution => "resolution_agent",
            Stage::Action => "action_agent",
            Stage::Escalation => "escalation_agent",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A non-LLM wait of a stage was cut short by the run's cancellation token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{stage} stage cancelled")]
pub struct StageCancelled {
    pub stage: Stage,
}

/// Races `future` against `cancel`
pub(crate) async fn cancellable<T, F>(
    stage: Stage,
    cancel: &CancellationToken,
    future: F,
) -> anyhow::Result<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(StageCancelled { stage }.into()),
        result = future => result,
    }
}

/// The closed set of stage implementations
pub enum StageAgent {
    Intake(IntakeAgent),
    Knowledge(KnowledgeAgent),
    Resolution(ResolutionAgent),
    Action(ActionAgent),
    Escalation(EscalationAgent),
}

impl StageAgent {
    pub fn stage(&self) -> Stage {
        match self {
            StageAgent::Intake(_) => Stage::Intake,
            StageAgent::Knowledge(_) => Stage::Knowledge,
            StageAgent::Resolution(_) => Stage::Resolution,
            StageAgent::Action(_) => Stage::Action,
            StageAgent::Escalation(_) => Stage::Escalation,
        }
    }

    pub async fn process(&self, ctx: &mut Context, cancel: &CancellationToken) -> anyhow::Result<()> {
        match self {
            StageAgent::Intake(agent) => agent.process(ctx, cancel).await,
            StageAgent::Knowledge(agent) => agent.process(ctx, cancel).await,
            StageAgent::Resolution(agent) => agent.process(ctx, cancel).await,
            StageAgent::Action(agent) => agent.process(ctx, cancel).await,
            StageAgent::Escalation(agent) => agent.process(ctx),
        }
    }
}

impl From<IntakeAgent> for StageAgent {
    fn from(agent: IntakeAgent) -> Self {
        StageAgent::Intake(agent)
    }
}

impl From<KnowledgeAgent> for StageAgent {
    fn from(agent: KnowledgeAgent) -> Self {
        StageAgent::Knowledge(agent)
    }
}

impl From<ResolutionAgent> for StageAgent {
    fn from(agent: ResolutionAgent) -> Self {
        StageAgent::Resolution(agent)
    }
}

impl From<ActionAgent> for StageAgent {
    fn from(agent: ActionAgent) -> Self {
        StageAgent::Action(agent)
    }
}

impl From<EscalationAgent> for StageAgent {
    fn from(agent: EscalationAgent) -> Self {
        StageAgent::Escalation(agent)
    }
}

/// Snapshot of an agent's execution counters
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentMetrics {
    pub total_executions: u64,
    pub successful_executions: u64,
    pub failed_executions: u64,
    pub total_time: Duration,
    /// `total_time / total_executions`, zero before the first run
    pub average_time: Duration,
    /// `successful_executions / total_executions` in [0, 1], 0 before the first run
    pub success_rate: f64,
}

#[derive(Debug, Default)]
struct MetricsCounters {
    total: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    total_nanos: AtomicU64,
}

impl MetricsCounters {
    fn record(&self, success: bool, elapsed: Duration) {
        self.total.fetch_add(1, Ordering::Relaxed);
        if success {
            self.successes.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.total_nanos.fetch_add(nanos, Ordering::Relaxed);
    }

    fn snapshot(&self) -> AgentMetrics {
        let total = self.total.load(Ordering::Relaxed);
        let successes = self.successes.load(Ordering::Relaxed);
        let total_nanos = self.total_nanos.load(Ordering::Relaxed);

        let (average_time, success_rate) = if total == 0 {
            (Duration::ZERO, 0.0)
        } else {
            (
                Duration::from_nanos(total_nanos / total),
                successes as f64 / total as f64,
            )
        };

        AgentMetrics {
            total_executions: total,
            successful_executions: successes,
            failed_executions: self.failures.load(Ordering::Relaxed),
            total_time: Duration::from_nanos(total_nanos),
            average_time,
            success_rate,
        }
    }

    fn reset(&self) {
        self.total.store(0, Ordering::Relaxed);
        self.successes.store(0, Ordering::Relaxed);
        self.failures.store(0, Ordering::Relaxed);
        self.total_nanos.store(0, Ordering::Relaxed);
    }
}

/// Execution envelope around one stage
pub struct Agent {
    inner: StageAgent,
    enabled: AtomicBool,
    metrics: MetricsCounters,
}

impl Agent {
    pub fn new(inner: impl Into<StageAgent>) -> Self {
        Self {
            inner: inner.into(),
            enabled: AtomicBool::new(true),
            metrics: MetricsCounters::default(),
        }
    }

    pub fn stage(&self) -> Stage {
        self.inner.stage()
    }

    pub fn name(&self) -> &'static str {
        self.stage().agent_name()
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::SeqCst);
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn metrics(&self) -> AgentMetrics {
        self.metrics.snapshot()
    }

    pub fn reset_metrics(&self) {
        self.metrics.reset();
    }

    /// Run the stage without an external deadline
    pub async fn execute(&self, ctx: Context) -> Context {
        self.execute_with_cancel(ctx, &CancellationToken::new()).await
    }

    /// Run the stage; failures end up in `ctx.error()`, never in the return value
    pub async fn execute_with_cancel(&self, mut ctx: Context, cancel: &CancellationToken) -> Context {
        let stage = self.stage();
        if !self.is_enabled() {
            debug!(agent = self.name(), ticket_id = %ctx.ticket_id, "Agent disabled, skipping");
            return ctx;
        }

        let start_time = Instant::now();
        info!(
            agent = self.name(),
            ticket_id = %ctx.ticket_id,
            customer_id = %ctx.customer_id,
            workflow_step = %ctx.workflow_step(),
            message_count = ctx.messages.len(),
            "Agent execution started"
        );

        let outcome = AssertUnwindSafe(self.inner.process(&mut ctx, cancel))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(anyhow!("{stage} stage panicked: {}", panic_message(&*panic))));
        let elapsed = start_time.elapsed();

        match outcome {
            Ok(()) => {
                self.metrics.record(true, elapsed);
                ctx.record_history(format!("{stage}: success"));
                info!(
                    agent = self.name(),
                    ticket_id = %ctx.ticket_id,
                    customer_id = %ctx.customer_id,
                    elapsed_ms = elapsed.as_millis() as u64,
                    should_escalate = ctx.should_escalate(),
                    "Agent execution completed"
                );
            }
            Err(err) => {
                let failure = StageFailure::from_error(stage, &err);
                self.metrics.record(false, elapsed);
                error!(
                    agent = self.name(),
                    ticket_id = %ctx.ticket_id,
                    customer_id = %ctx.customer_id,
                    elapsed_ms = elapsed.as_millis() as u64,
                    kind = failure.kind.as_str(),
                    error = %failure.message,
                    "Agent execution failed"
                );
                ctx.record_failure(failure);
                ctx.record_history(format!("{stage}: failed"));
            }
        }

        ctx
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::StageFailureKind;
    use crate::state_machine::Thresholds;
    use std::sync::Arc;
    use support_core::{PendingAction, RecordingActionExecutor};

    fn context() -> Context {
        Context::new("T-1", "C-1", "Please refund order 42", Vec::new())
    }

    fn action_agent(executor: RecordingActionExecutor) -> Agent {
        Agent::new(ActionAgent::new(Arc::new(executor)))
    }

    #[tokio::test]
    async fn test_success_appends_history_and_counts() {
        let agent = Agent::new(EscalationAgent::new(Thresholds::default()));
        let ctx = agent.execute(context()).await;

        assert_eq!(ctx.agent_history(), ["escalation: success"]);
        let metrics = agent.metrics();
        assert_eq!(metrics.total_executions, 1);
        assert_eq!(metrics.successful_executions, 1);
        assert_eq!(metrics.success_rate, 1.0);
    }

    #[tokio::test]
    async fn test_failure_is_recorded_not_raised() {
        let agent = action_agent(RecordingActionExecutor::new().failing_on("refund"));
        let mut ctx = context();
        ctx.pending_actions.push(PendingAction::new("refund"));

        let ctx = agent.execute(ctx).await;

        assert_eq!(ctx.agent_history(), ["action: failed"]);
        let failure = ctx.error().unwrap();
        assert_eq!(failure.stage, Stage::Action);
        assert_eq!(failure.kind, StageFailureKind::StageFault);
        assert!(failure.message.contains("refund"));

        let metrics = agent.metrics();
        assert_eq!(metrics.failed_executions, 1);
        assert_eq!(metrics.success_rate, 0.0);
    }

    #[tokio::test]
    async fn test_disabled_agent_is_a_no_op() {
        let agent = action_agent(RecordingActionExecutor::new());
        agent.disable();
        assert!(!agent.is_enabled());

        let mut ctx = context();
        ctx.pending_actions.push(PendingAction::new("refund"));
        let ctx = agent.execute(ctx).await;

        assert!(ctx.agent_history().is_empty());
        assert!(ctx.actions_executed().is_empty());
        assert_eq!(agent.metrics().total_executions, 0);

        agent.enable();
        let ctx = agent.execute(ctx).await;
        assert_eq!(ctx.agent_history(), ["action: success"]);
    }

    #[test]
    fn test_metrics_are_zero_without_executions() {
        let agent = Agent::new(EscalationAgent::new(Thresholds::default()));
        let metrics = agent.metrics();
        assert_eq!(metrics.success_rate, 0.0);
        assert_eq!(metrics.average_time, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_average_time_and_reset() {
        let agent = Agent::new(EscalationAgent::new(Thresholds::default()));
        agent.execute(context()).await;
        agent.execute(context()).await;

        let metrics = agent.metrics();
        assert_eq!(metrics.total_executions, 2);
        assert_eq!(metrics.average_time, metrics.total_time / 2);

        agent.reset_metrics();
        assert_eq!(agent.metrics().total_executions, 0);
    }

    #[tokio::test]
    async fn test_cancelled_wait_is_a_timeout() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result: anyhow::Result<()> =
            cancellable(Stage::Knowledge, &cancel, std::future::pending()).await;

        let failure = StageFailure::from_error(Stage::Knowledge, &result.unwrap_err());
        assert_eq!(failure.kind, StageFailureKind::TimedOut);
    }
}
