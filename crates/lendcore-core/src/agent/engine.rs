//! Task execution engine: retry with exponential backoff and bounded
//! recovery around any [`Agent`]'s task logic.
//!
//! The numeric thresholds here are contractual: 3 retries (4 total
//! attempts), backoff `2^(n-1)` seconds capped at 30s, 2 recovery attempts
//! per agent instance, and the health window in [`super::AgentState`].

use serde_json::{Value, json};
use tokio::time::{Duration, sleep};

use lendcore_types::conversation::{AgentTask, ConversationContext, TaskStatus};
use lendcore_types::error::AgentError;

use crate::errors::{ErrorOutcome, ErrorReporter};

use super::{Agent, AgentStatus};

/// Tunables for the retry loop. Tests shrink the backoff unit to zero;
/// production uses the defaults.
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    pub max_retries: u32,
    pub backoff_unit_ms: u64,
    pub backoff_cap_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_unit_ms: 1_000,
            backoff_cap_ms: 30_000,
        }
    }
}

impl EngineConfig {
    /// Delay before retry `n` (1-based): `2^(n-1)` units, capped.
    fn backoff(&self, failed_attempts: u32) -> Duration {
        let exp = failed_attempts.saturating_sub(1).min(20);
        let ms = 2u64.saturating_pow(exp).saturating_mul(self.backoff_unit_ms);
        Duration::from_millis(ms.min(self.backoff_cap_ms))
    }
}

/// Execute a task through an agent with retry, backoff, and recovery.
///
/// On success the task is completed and recorded on both the agent's
/// history and the context's completed list. After the final failure the
/// task is marked failed; if the error service allows a retry and the
/// agent still has recovery budget, a bounded recovery pass readies the
/// agent and task for a future delegation. The error returned embeds the
/// customer-facing message either way.
pub async fn execute_task<A: Agent>(
    agent: &mut A,
    task: &mut AgentTask,
    ctx: &mut ConversationContext,
    reporter: &ErrorReporter,
    config: EngineConfig,
) -> Result<Value, AgentError> {
    agent.state_mut().status = AgentStatus::Processing;
    task.start();
    tracing::info!(task_id = %task.id, agent = %agent.kind(), "starting task execution");

    let mut failed_attempts = 0u32;

    loop {
        match agent.execute_logic(task, ctx).await {
            Ok(output) => {
                task.complete(output.clone());
                let state = agent.state_mut();
                state.status = AgentStatus::Completed;
                state.task_history.push(task.clone());
                ctx.complete_task(&task.id);
                tracing::info!(task_id = %task.id, "task completed");
                return Ok(output);
            }
            Err(err) => {
                failed_attempts += 1;
                let kind = agent.kind();
                {
                    let state = agent.state_mut();
                    state.error_count += 1;
                    state.last_error_at = Some(chrono::Utc::now());
                }

                let session_id = ctx.session_id.clone();
                let outcome = reporter.handle_agent_error(
                    kind,
                    &task.id,
                    &err.to_string(),
                    Some(&session_id),
                    Some(ctx),
                );

                tracing::warn!(
                    task_id = %task.id,
                    attempt = failed_attempts,
                    "task execution failed: {err}"
                );

                if failed_attempts > config.max_retries {
                    task.fail(format!(
                        "Task failed after {} retries: {}",
                        config.max_retries, outcome.customer_message
                    ));
                    let state = agent.state_mut();
                    state.status = AgentStatus::Error;
                    state.task_history.push(task.clone());

                    let can_recover = outcome.retry_possible
                        && agent.state().recovery_attempts
                            < agent.state().max_recovery_attempts;
                    if can_recover {
                        attempt_recovery(agent, task, ctx, &outcome);
                    }

                    if outcome.escalation_required {
                        tracing::error!(task_id = %task.id, "task requires escalation");
                    }

                    return Err(AgentError::TaskFailed {
                        attempts: failed_attempts,
                        customer_message: outcome.customer_message,
                    });
                }

                sleep(config.backoff(failed_attempts)).await;
            }
        }
    }
}

/// Run the bounded recovery routine for a failed task.
///
/// A fixed sequence, independent of the error category's recovery tokens
/// (those are consumed at the master-agent layer): restart the agent
/// without clearing its error counters, reset the task to pending for a
/// later delegation, trim the context's error log to the last 3 entries,
/// and record the customer-facing message on the context.
fn attempt_recovery<A: Agent>(
    agent: &mut A,
    task: &mut AgentTask,
    ctx: &mut ConversationContext,
    outcome: &ErrorOutcome,
) {
    let state = agent.state_mut();
    state.recovery_attempts += 1;
    let agent_id = state.id.clone();

    agent.state_mut().restart();

    task.status = TaskStatus::Pending;
    task.error = None;

    let len = ctx.errors.len();
    if len > 3 {
        ctx.errors.drain(..len - 3);
    }

    ctx.add_collected_data(
        "recovery_message",
        json!({
            "message": outcome.customer_message,
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "agent_id": agent_id,
        }),
    );

    tracing::info!(
        agent_id,
        attempt = agent.state().recovery_attempts,
        "recovery pass completed"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use lendcore_types::conversation::{AgentKind, ErrorSeverity, TaskKind};

    use crate::agent::AgentState;

    /// A scripted agent: fails `failures_before_success` times, then
    /// succeeds.
    struct ScriptedAgent {
        state: AgentState,
        calls: u32,
        failures_before_success: u32,
    }

    impl ScriptedAgent {
        fn new(failures_before_success: u32) -> Self {
            Self {
                state: AgentState::new(AgentKind::Sales),
                calls: 0,
                failures_before_success,
            }
        }
    }

    impl Agent for ScriptedAgent {
        fn state(&self) -> &AgentState {
            &self.state
        }

        fn state_mut(&mut self) -> &mut AgentState {
            &mut self.state
        }

        fn can_execute(&self, kind: TaskKind) -> bool {
            kind == TaskKind::Sales
        }

        async fn execute_logic(
            &mut self,
            _task: &AgentTask,
            _ctx: &mut ConversationContext,
        ) -> Result<Value, AgentError> {
            self.calls += 1;
            if self.calls <= self.failures_before_success {
                Err(AgentError::InvalidInput("scripted failure".to_string()))
            } else {
                Ok(json!({"ok": true}))
            }
        }
    }

    fn fast_config() -> EngineConfig {
        EngineConfig {
            backoff_unit_ms: 0,
            ..EngineConfig::default()
        }
    }

    #[tokio::test]
    async fn test_success_first_try() {
        let mut agent = ScriptedAgent::new(0);
        let mut task = AgentTask::new(TaskKind::Sales, json!({}));
        let mut ctx = ConversationContext::new("s", None);
        ctx.add_pending_task(task.id.clone());
        let reporter = ErrorReporter::new();

        let output = execute_task(&mut agent, &mut task, &mut ctx, &reporter, fast_config())
            .await
            .unwrap();
        assert_eq!(output, json!({"ok": true}));
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(agent.state.status, AgentStatus::Completed);
        assert!(ctx.pending_tasks.is_empty());
        assert_eq!(ctx.completed_tasks, vec![task.id.clone()]);
    }

    #[tokio::test]
    async fn test_retries_then_succeeds() {
        let mut agent = ScriptedAgent::new(2);
        let mut task = AgentTask::new(TaskKind::Sales, json!({}));
        let mut ctx = ConversationContext::new("s", None);
        let reporter = ErrorReporter::new();

        let result = execute_task(&mut agent, &mut task, &mut ctx, &reporter, fast_config()).await;
        assert!(result.is_ok());
        assert_eq!(agent.calls, 3);
        assert_eq!(agent.state.error_count, 2);
    }

    #[tokio::test]
    async fn test_always_failing_attempts_exactly_four_times() {
        let mut agent = ScriptedAgent::new(u32::MAX);
        let mut task = AgentTask::new(TaskKind::Sales, json!({}));
        let mut ctx = ConversationContext::new("s", None);
        let reporter = ErrorReporter::new();

        let err = execute_task(&mut agent, &mut task, &mut ctx, &reporter, fast_config())
            .await
            .unwrap_err();
        assert_eq!(agent.calls, 4);
        assert!(matches!(err, AgentError::TaskFailed { attempts: 4, .. }));
        // The failure is recorded, then recovery resets the task to
        // pending for a future delegation.
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(agent.state.recovery_attempts, 1);
        assert!(ctx.collected_data.contains_key("recovery_message"));
    }

    #[tokio::test]
    async fn test_recovery_budget_exhausts() {
        let mut agent = ScriptedAgent::new(u32::MAX);
        let reporter = ErrorReporter::new();
        let mut ctx = ConversationContext::new("s", None);

        for expected_recoveries in [1u32, 2, 2] {
            let mut task = AgentTask::new(TaskKind::Sales, json!({}));
            let _ = execute_task(&mut agent, &mut task, &mut ctx, &reporter, fast_config()).await;
            assert_eq!(agent.state.recovery_attempts, expected_recoveries);
        }
        // With recovery exhausted, the final task stays failed.
        assert!(!agent.state.is_healthy());
    }

    #[tokio::test]
    async fn test_clear_context_trims_error_log() {
        let mut agent = ScriptedAgent::new(u32::MAX);
        let mut task = AgentTask::new(TaskKind::Sales, json!({}));
        let mut ctx = ConversationContext::new("s", None);
        for i in 0..6 {
            ctx.add_error(format!("old error {i}"), ErrorSeverity::Low, None);
        }
        let reporter = ErrorReporter::new();

        let _ = execute_task(&mut agent, &mut task, &mut ctx, &reporter, fast_config()).await;
        assert_eq!(ctx.errors.len(), 3);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let config = EngineConfig::default();
        assert_eq!(config.backoff(1), Duration::from_secs(1));
        assert_eq!(config.backoff(2), Duration::from_secs(2));
        assert_eq!(config.backoff(3), Duration::from_secs(4));
        assert_eq!(config.backoff(6), Duration::from_secs(30));
        assert_eq!(config.backoff(20), Duration::from_secs(30));
    }
}
