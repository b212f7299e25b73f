//! Session management: context lifecycle, per-session worker registry,
//! task execution, and cross-agent data sharing.
//!
//! Workers are auto-created on demand and live for the session. A
//! per-session async mutex serializes task execution and context writes
//! for the same session; different sessions proceed independently.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::{Value, json};
use tokio::sync::Mutex;

use lendcore_types::conversation::{
    AgentKind, AgentTask, ConversationContext, ConversationStage, TaskKind,
};
use lendcore_types::error::{AgentError, SessionError};

use crate::agent::engine::{EngineConfig, execute_task};
use crate::agent::sales::SalesAgent;
use crate::agent::sanction::SanctionAgent;
use crate::agent::underwriting::UnderwritingAgent;
use crate::agent::verification::VerificationAgent;
use crate::agent::{Agent, WorkerAgent};
use crate::errors::ErrorReporter;
use crate::storage::{ContextStore, ExternalServices, HistoryStore, LetterRenderer, VerificationLedger};

type WorkerMap<E, V, R, H> = HashMap<AgentKind, WorkerAgent<E, V, R, H>>;

/// Health snapshot of one registered worker.
#[derive(Debug, Clone, serde::Serialize)]
pub struct WorkerHealth {
    pub agent_id: String,
    pub error_count: u32,
    pub recovery_attempts: u32,
    pub healthy: bool,
}

/// High-level coordinator for sessions and their worker agents.
pub struct SessionManager<C, E, V, R, H>
where
    C: ContextStore,
    E: ExternalServices,
    V: VerificationLedger,
    R: LetterRenderer,
    H: HistoryStore,
{
    store: Arc<C>,
    gateway: Arc<E>,
    ledger: Arc<V>,
    renderer: Arc<R>,
    history: Arc<H>,
    reporter: Arc<ErrorReporter>,
    engine_config: EngineConfig,
    workers: DashMap<String, Arc<Mutex<WorkerMap<E, V, R, H>>>>,
}

impl<C, E, V, R, H> SessionManager<C, E, V, R, H>
where
    C: ContextStore,
    E: ExternalServices,
    V: VerificationLedger,
    R: LetterRenderer,
    H: HistoryStore,
{
    pub fn new(
        store: Arc<C>,
        gateway: Arc<E>,
        ledger: Arc<V>,
        renderer: Arc<R>,
        history: Arc<H>,
        reporter: Arc<ErrorReporter>,
        engine_config: EngineConfig,
    ) -> Self {
        Self {
            store,
            gateway,
            ledger,
            renderer,
            history,
            reporter,
            engine_config,
            workers: DashMap::new(),
        }
    }

    pub fn ledger(&self) -> &Arc<V> {
        &self.ledger
    }

    pub fn reporter(&self) -> &Arc<ErrorReporter> {
        &self.reporter
    }

    /// Start a new conversation session.
    pub async fn start_session(
        &self,
        customer_id: Option<String>,
    ) -> Result<ConversationContext, SessionError> {
        let context = self.store.create(customer_id).await?;
        self.workers
            .insert(context.session_id.clone(), Arc::new(Mutex::new(HashMap::new())));
        tracing::info!(session_id = %context.session_id, "started new session");
        Ok(context)
    }

    /// Fetch the context for a session.
    pub async fn get_session_context(&self, session_id: &str) -> Option<ConversationContext> {
        self.store.get(session_id).await
    }

    /// Persist a mutated context.
    pub async fn update_context(&self, context: &ConversationContext) -> Result<(), SessionError> {
        self.store.update(context).await
    }

    fn session_workers(&self, session_id: &str) -> Arc<Mutex<WorkerMap<E, V, R, H>>> {
        self.workers
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(HashMap::new())))
            .clone()
    }

    fn create_worker(&self, kind: AgentKind) -> Option<WorkerAgent<E, V, R, H>> {
        match kind {
            AgentKind::Sales => Some(WorkerAgent::Sales(SalesAgent::new())),
            AgentKind::Verification => Some(WorkerAgent::Verification(VerificationAgent::new(
                self.gateway.clone(),
                self.ledger.clone(),
            ))),
            AgentKind::Underwriting => Some(WorkerAgent::Underwriting(UnderwritingAgent::new(
                self.gateway.clone(),
                self.history.clone(),
            ))),
            AgentKind::Sanction => Some(WorkerAgent::Sanction(SanctionAgent::new(
                self.renderer.clone(),
            ))),
            AgentKind::Master => None,
        }
    }

    /// Execute a task on a session's worker, creating the worker if this
    /// is its first task. The context is re-persisted after execution.
    pub async fn execute_agent_task(
        &self,
        session_id: &str,
        agent_kind: AgentKind,
        task_kind: TaskKind,
        input: Value,
    ) -> Result<Value, AgentError> {
        let mut context = self
            .store
            .get(session_id)
            .await
            .ok_or_else(|| AgentError::Storage(format!("session {session_id} not found")))?;

        let workers = self.session_workers(session_id);
        let mut workers = workers.lock().await;
        if !workers.contains_key(&agent_kind) {
            let worker = self.create_worker(agent_kind).ok_or_else(|| {
                AgentError::UnsupportedTask {
                    agent: agent_kind.to_string(),
                    task: task_kind.to_string(),
                }
            })?;
            workers.insert(agent_kind, worker);
        }
        let worker = workers.get_mut(&agent_kind).expect("worker just inserted");

        if !worker.can_execute(task_kind) {
            return Err(AgentError::UnsupportedTask {
                agent: agent_kind.to_string(),
                task: task_kind.to_string(),
            });
        }

        let mut task = AgentTask::new(task_kind, input);
        context.add_pending_task(task.id.clone());
        self.store
            .update(&context)
            .await
            .map_err(|e| AgentError::Storage(e.to_string()))?;

        let result = execute_task(
            worker,
            &mut task,
            &mut context,
            &self.reporter,
            self.engine_config,
        )
        .await;

        self.store
            .update(&context)
            .await
            .map_err(|e| AgentError::Storage(e.to_string()))?;

        result
    }

    /// Restart a session's worker of the given kind.
    pub async fn restart_agent(&self, session_id: &str, kind: AgentKind) -> bool {
        let workers = self.session_workers(session_id);
        let mut workers = workers.lock().await;
        match workers.get_mut(&kind) {
            Some(worker) => {
                worker.state_mut().restart();
                true
            }
            None => false,
        }
    }

    /// Health snapshot of a session's registered workers.
    pub async fn worker_health(&self, session_id: &str) -> HashMap<String, WorkerHealth> {
        let workers = self.session_workers(session_id);
        let workers = workers.lock().await;
        workers
            .iter()
            .map(|(kind, worker)| {
                let state = worker.state();
                (
                    kind.to_string(),
                    WorkerHealth {
                        agent_id: state.id.clone(),
                        error_count: state.error_count,
                        recovery_attempts: state.recovery_attempts,
                        healthy: state.is_healthy(),
                    },
                )
            })
            .collect()
    }

    /// Switch the active agent and stage for a session.
    pub async fn switch_agent(
        &self,
        session_id: &str,
        kind: AgentKind,
        stage: ConversationStage,
    ) -> Result<(), SessionError> {
        let mut context = self
            .store
            .get(session_id)
            .await
            .ok_or(SessionError::NotFound)?;
        context.switch_agent(kind, stage);
        self.store.update(&context).await
    }

    /// Unconditional stage setter, used by error-handling and reset paths.
    /// Transitions through this path are NOT validated against the stage
    /// table; the validated route is `conversation::manage_transition`.
    pub async fn set_stage(
        &self,
        session_id: &str,
        stage: ConversationStage,
    ) -> Result<(), SessionError> {
        let mut context = self
            .store
            .get(session_id)
            .await
            .ok_or(SessionError::NotFound)?;
        let old = context.conversation_stage;
        context.conversation_stage = stage;
        context.touch();
        self.store.update(&context).await?;
        tracing::info!(session_id, %old, new = %stage, "updated conversation stage");
        Ok(())
    }

    /// Write one key into the session's collected data.
    pub async fn add_session_data(
        &self,
        session_id: &str,
        key: &str,
        value: Value,
    ) -> Result<(), SessionError> {
        let mut context = self
            .store
            .get(session_id)
            .await
            .ok_or(SessionError::NotFound)?;
        context.add_collected_data(key, value);
        self.store.update(&context).await
    }

    /// Read one key from the session's collected data.
    pub async fn get_session_data(&self, session_id: &str, key: &str) -> Option<Value> {
        self.store
            .get(session_id)
            .await
            .and_then(|ctx| ctx.data_value(key).cloned())
    }

    /// Share data between two agents through the context, under the
    /// `shared_<src>_to_<dst>_<key>` namespace.
    pub async fn share_data_between_agents(
        &self,
        session_id: &str,
        source: AgentKind,
        target: AgentKind,
        data: &serde_json::Map<String, Value>,
    ) -> Result<(), SessionError> {
        let mut context = self
            .store
            .get(session_id)
            .await
            .ok_or(SessionError::NotFound)?;

        for (key, value) in data {
            context.add_collected_data(
                format!("shared_{source}_to_{target}_{key}"),
                json!({
                    "value": value,
                    "source_agent": source.to_string(),
                    "target_agent": target.to_string(),
                    "shared_at": chrono::Utc::now().to_rfc3339(),
                }),
            );
        }
        self.store.update(&context).await
    }

    /// Collect all data shared to `target`, optionally from one source.
    pub async fn get_shared_data(
        &self,
        session_id: &str,
        target: AgentKind,
        source: Option<AgentKind>,
    ) -> HashMap<String, Value> {
        let Some(context) = self.store.get(session_id).await else {
            return HashMap::new();
        };

        let mut shared = HashMap::new();
        for (key, entry) in &context.collected_data {
            let Some(remainder) = key.strip_prefix("shared_") else {
                continue;
            };
            let Some((src, rest)) = remainder.split_once("_to_") else {
                continue;
            };
            let Some(original_key) = rest.strip_prefix(&format!("{target}_")) else {
                continue;
            };
            if let Some(source) = source {
                if src != source.to_string() {
                    continue;
                }
            }
            let value = match entry.value.get("value") {
                Some(inner) => inner.clone(),
                None => entry.value.clone(),
            };
            shared.insert(original_key.to_string(), value);
        }
        shared
    }

    /// End a session: mark completion, reset and drop its workers.
    pub async fn end_session(&self, session_id: &str) -> Result<(), SessionError> {
        let mut context = self
            .store
            .get(session_id)
            .await
            .ok_or(SessionError::NotFound)?;
        context.conversation_stage = ConversationStage::Completion;
        self.store.update(&context).await?;

        if let Some((_, workers)) = self.workers.remove(session_id) {
            let mut workers = workers.lock().await;
            for worker in workers.values_mut() {
                worker.state_mut().reset();
            }
        }
        tracing::info!(session_id, "ended session");
        Ok(())
    }

    /// Recover a session's context after a restart.
    pub async fn recover_session(&self, session_id: &str) -> Option<ConversationContext> {
        let context = self.store.recover(session_id).await?;
        self.workers
            .insert(session_id.to_string(), Arc::new(Mutex::new(HashMap::new())));
        tracing::info!(session_id, "recovered session");
        Some(context)
    }

    /// Active sessions, optionally filtered by customer, newest first.
    pub fn list_active_sessions(
        &self,
        customer_id: Option<&str>,
        limit: usize,
    ) -> Vec<ConversationContext> {
        let mut sessions: Vec<ConversationContext> = self
            .store
            .all_active()
            .into_iter()
            .filter(|ctx| match customer_id {
                Some(id) => ctx.customer_id.as_deref() == Some(id),
                None => true,
            })
            .collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        sessions.truncate(limit);
        sessions
    }

    /// Aggregate session statistics.
    pub fn statistics(&self) -> Value {
        let contexts = self.store.all_active();
        let mut by_stage: HashMap<String, usize> = HashMap::new();
        let mut by_agent: HashMap<String, usize> = HashMap::new();
        for ctx in &contexts {
            *by_stage.entry(ctx.conversation_stage.to_string()).or_default() += 1;
            *by_agent.entry(ctx.current_agent.to_string()).or_default() += 1;
        }
        json!({
            "active_sessions": contexts.len(),
            "sessions_by_stage": by_stage,
            "sessions_by_agent": by_agent,
            "sessions_with_agents": self.workers.len(),
        })
    }

    /// Clean stale contexts and drop orphaned worker registries.
    pub async fn cleanup_expired_sessions(&self) -> usize {
        let cleaned = self.store.cleanup_stale().await;
        let active: std::collections::HashSet<String> =
            self.store.active_sessions().into_iter().collect();
        let orphaned: Vec<String> = self
            .workers
            .iter()
            .map(|entry| entry.key().clone())
            .filter(|id| !active.contains(id))
            .collect();
        let orphan_count = orphaned.len();
        for id in orphaned {
            self.workers.remove(&id);
        }
        cleaned + orphan_count
    }
}
