use super::{cancellable, Stage};
use crate::context::Context;
use anyhow::{Context as _, Result};
use std::sync::Arc;
use support_core::ActionExecutor;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Executes the backend actions proposed by the resolution stage
pub struct ActionAgent {
    executor: Arc<dyn ActionExecutor>,
}

impl ActionAgent {
    pub fn new(executor: Arc<dyn ActionExecutor>) -> Self {
        Self { executor }
    }

    pub(crate) async fn process(&self, ctx: &mut Context, cancel: &CancellationToken) -> Result<()> {
        for action in ctx.pending_actions.clone() {
            let result = cancellable(Stage::Action, cancel, self.executor.execute(&action))
                .await
                .with_context(|| format!("action '{}' failed", action.action_type))?;

            info!(
                ticket_id = %ctx.ticket_id,
                action = %action.action_type,
                "Action executed"
            );
            ctx.action_results.insert(action.action_type.clone(), result);
            ctx.mark_action_executed(action.action_type);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use support_core::{PendingAction, RecordingActionExecutor};

    fn context(actions: &[&str]) -> Context {
        let mut ctx = Context::new("T-1", "C-1", "Refund and reset please", Vec::new());
        ctx.requires_action = true;
        ctx.pending_actions = actions.iter().map(|a| PendingAction::new(*a)).collect();
        ctx
    }

    #[tokio::test]
    async fn test_actions_run_in_order() {
        let executor = Arc::new(RecordingActionExecutor::new());
        let agent = ActionAgent::new(executor.clone());
        let mut ctx = context(&["refund", "reset_password"]);

        agent.process(&mut ctx, &CancellationToken::new()).await.unwrap();

        let executed: Vec<_> = executor
            .executed()
            .into_iter()
            .map(|a| a.action_type)
            .collect();
        assert_eq!(executed, ["refund", "reset_password"]);
        assert_eq!(ctx.actions_executed(), ["refund", "reset_password"]);
        assert_eq!(ctx.action_results["refund"]["status"], "completed");
    }

    #[tokio::test]
    async fn test_first_failure_aborts_remaining_actions() {
        let executor = Arc::new(RecordingActionExecutor::new().failing_on("refund"));
        let agent = ActionAgent::new(executor.clone());
        let mut ctx = context(&["reset_password", "refund", "send_email"]);

        let err = agent
            .process(&mut ctx, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(format!("{err:#}").contains("action 'refund' failed"));
        assert_eq!(ctx.actions_executed(), ["reset_password"]);
        assert!(!ctx.action_results.contains_key("send_email"));
        assert_eq!(executor.executed().len(), 1);
    }
}
