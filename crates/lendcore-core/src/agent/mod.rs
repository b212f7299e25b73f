//! Agent contract and worker implementations.
//!
//! Every concrete agent carries an [`AgentState`] and implements [`Agent`];
//! the retry/recovery engine in [`engine`] wraps task execution uniformly.
//! Worker agents never own conversation state: they borrow the context for
//! the duration of a task and route all cross-agent communication through
//! its `collected_data` map.

pub mod engine;
pub mod master;
pub mod sales;
pub mod sanction;
pub mod underwriting;
pub mod verification;

use std::future::Future;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use lendcore_types::conversation::{AgentKind, AgentTask, ConversationContext, TaskKind};
use lendcore_types::error::AgentError;

use crate::storage::{ExternalServices, HistoryStore, LetterRenderer, VerificationLedger};

/// Runtime status of an agent instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Idle,
    Processing,
    Waiting,
    Error,
    Completed,
}

/// An agent is unhealthy after this many lifetime errors.
const MAX_LIFETIME_ERRORS: u32 = 10;

/// An agent stuck in Error longer than this is unhealthy.
const ERROR_STATE_WINDOW_SECS: i64 = 300;

/// Per-instance bookkeeping shared by all agents.
#[derive(Debug, Clone)]
pub struct AgentState {
    pub id: String,
    pub kind: AgentKind,
    pub status: AgentStatus,
    pub error_count: u32,
    pub recovery_attempts: u32,
    pub max_recovery_attempts: u32,
    pub last_error_at: Option<DateTime<Utc>>,
    pub task_history: Vec<AgentTask>,
}

impl AgentState {
    pub fn new(kind: AgentKind) -> Self {
        Self {
            id: format!("{kind}_{}", &Uuid::new_v4().simple().to_string()[..8]),
            kind,
            status: AgentStatus::Idle,
            error_count: 0,
            recovery_attempts: 0,
            max_recovery_attempts: 2,
            last_error_at: None,
            task_history: Vec::new(),
        }
    }

    /// Health predicate: false once errors pile up, recovery is exhausted,
    /// or the agent has sat in Error state past the window.
    pub fn is_healthy(&self) -> bool {
        if self.error_count > MAX_LIFETIME_ERRORS {
            return false;
        }
        if self.recovery_attempts >= self.max_recovery_attempts {
            return false;
        }
        if self.status == AgentStatus::Error {
            if let Some(at) = self.last_error_at {
                if (Utc::now() - at).num_seconds() > ERROR_STATE_WINDOW_SECS {
                    return false;
                }
            }
        }
        true
    }

    /// Return to a clean idle state without clearing error statistics.
    pub fn restart(&mut self) {
        self.status = AgentStatus::Idle;
    }

    /// Full reset, clearing history and counters.
    pub fn reset(&mut self) {
        self.status = AgentStatus::Idle;
        self.error_count = 0;
        self.task_history.clear();
    }
}

/// The common contract all agents implement.
///
/// `execute_logic` is the subclass hook; callers go through
/// [`engine::execute_task`] which adds retry, backoff, and recovery.
pub trait Agent: Send {
    fn state(&self) -> &AgentState;

    fn state_mut(&mut self) -> &mut AgentState;

    fn kind(&self) -> AgentKind {
        self.state().kind
    }

    /// Capability whitelist; each worker accepts only its own task kinds.
    fn can_execute(&self, kind: TaskKind) -> bool;

    fn execute_logic(
        &mut self,
        task: &AgentTask,
        ctx: &mut ConversationContext,
    ) -> impl Future<Output = Result<Value, AgentError>> + Send;
}

/// Read a value another agent shared through the context.
///
/// Checks the plain key first, then the `shared_<src>_to_<dst>_<key>`
/// namespace addressed to `target`. Handoff entries wrap the payload in a
/// `{value, source_agent, ...}` envelope which is unwrapped here.
pub fn shared_value(ctx: &ConversationContext, target: AgentKind, key: &str) -> Option<Value> {
    if let Some(entry) = ctx.collected_data.get(key) {
        return Some(entry.value.clone());
    }

    let suffix = format!("_to_{target}_{key}");
    ctx.collected_data
        .iter()
        .find(|(k, _)| k.starts_with("shared_") && k.ends_with(&suffix))
        .map(|(_, entry)| match entry.value.get("value") {
            Some(inner) => inner.clone(),
            None => entry.value.clone(),
        })
}

/// The worker registry entry: one of the four concrete workers, pinned to
/// the infra collaborators chosen at the composition root.
pub enum WorkerAgent<E, V, R, H>
where
    E: ExternalServices,
    V: VerificationLedger,
    R: LetterRenderer,
    H: HistoryStore,
{
    Sales(sales::SalesAgent),
    Verification(verification::VerificationAgent<E, V>),
    Underwriting(underwriting::UnderwritingAgent<E, H>),
    Sanction(sanction::SanctionAgent<R>),
}

impl<E, V, R, H> Agent for WorkerAgent<E, V, R, H>
where
    E: ExternalServices,
    V: VerificationLedger,
    R: LetterRenderer,
    H: HistoryStore,
{
    fn state(&self) -> &AgentState {
        match self {
            WorkerAgent::Sales(a) => a.state(),
            WorkerAgent::Verification(a) => a.state(),
            WorkerAgent::Underwriting(a) => a.state(),
            WorkerAgent::Sanction(a) => a.state(),
        }
    }

    fn state_mut(&mut self) -> &mut AgentState {
        match self {
            WorkerAgent::Sales(a) => a.state_mut(),
            WorkerAgent::Verification(a) => a.state_mut(),
            WorkerAgent::Underwriting(a) => a.state_mut(),
            WorkerAgent::Sanction(a) => a.state_mut(),
        }
    }

    fn can_execute(&self, kind: TaskKind) -> bool {
        match self {
            WorkerAgent::Sales(a) => a.can_execute(kind),
            WorkerAgent::Verification(a) => a.can_execute(kind),
            WorkerAgent::Underwriting(a) => a.can_execute(kind),
            WorkerAgent::Sanction(a) => a.can_execute(kind),
        }
    }

    async fn execute_logic(
        &mut self,
        task: &AgentTask,
        ctx: &mut ConversationContext,
    ) -> Result<Value, AgentError> {
        match self {
            WorkerAgent::Sales(a) => a.execute_logic(task, ctx).await,
            WorkerAgent::Verification(a) => a.execute_logic(task, ctx).await,
            WorkerAgent::Underwriting(a) => a.execute_logic(task, ctx).await,
            WorkerAgent::Sanction(a) => a.execute_logic(task, ctx).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    #[test]
    fn test_new_state_is_healthy() {
        let state = AgentState::new(AgentKind::Sales);
        assert_eq!(state.status, AgentStatus::Idle);
        assert!(state.is_healthy());
        assert!(state.id.starts_with("sales_"));
    }

    #[test]
    fn test_too_many_errors_is_unhealthy() {
        let mut state = AgentState::new(AgentKind::Sales);
        state.error_count = 11;
        assert!(!state.is_healthy());
    }

    #[test]
    fn test_exhausted_recovery_is_unhealthy() {
        let mut state = AgentState::new(AgentKind::Underwriting);
        state.recovery_attempts = 2;
        assert!(!state.is_healthy());
    }

    #[test]
    fn test_stale_error_state_is_unhealthy() {
        let mut state = AgentState::new(AgentKind::Verification);
        state.status = AgentStatus::Error;
        state.last_error_at = Some(Utc::now() - Duration::seconds(301));
        assert!(!state.is_healthy());

        state.last_error_at = Some(Utc::now() - Duration::seconds(60));
        assert!(state.is_healthy());
    }

    #[test]
    fn test_restart_keeps_error_count() {
        let mut state = AgentState::new(AgentKind::Sales);
        state.status = AgentStatus::Error;
        state.error_count = 4;
        state.restart();
        assert_eq!(state.status, AgentStatus::Idle);
        assert_eq!(state.error_count, 4);
    }

    #[test]
    fn test_shared_value_plain_key() {
        let mut ctx = ConversationContext::new("s", None);
        ctx.add_collected_data("loan_approved", json!(true));
        assert_eq!(
            shared_value(&ctx, AgentKind::Master, "loan_approved"),
            Some(json!(true))
        );
    }

    #[test]
    fn test_shared_value_unwraps_handoff_envelope() {
        let mut ctx = ConversationContext::new("s", None);
        ctx.add_collected_data(
            "shared_master_to_sales_customer_profile",
            json!({"value": {"name": "Ajay"}, "source_agent": "master"}),
        );
        assert_eq!(
            shared_value(&ctx, AgentKind::Sales, "customer_profile"),
            Some(json!({"name": "Ajay"}))
        );
        assert_eq!(shared_value(&ctx, AgentKind::Underwriting, "customer_profile"), None);
    }
}
