//! Conversation context, stage, and task types.
//!
//! The [`ConversationContext`] is the single source of truth for a chat
//! session: every agent reads and writes through its `collected_data` map,
//! and the context is persisted after every mutation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// The agents that can own a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    Master,
    Sales,
    Verification,
    Underwriting,
    Sanction,
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentKind::Master => write!(f, "master"),
            AgentKind::Sales => write!(f, "sales"),
            AgentKind::Verification => write!(f, "verification"),
            AgentKind::Underwriting => write!(f, "underwriting"),
            AgentKind::Sanction => write!(f, "sanction"),
        }
    }
}

impl FromStr for AgentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "master" => Ok(AgentKind::Master),
            "sales" => Ok(AgentKind::Sales),
            "verification" => Ok(AgentKind::Verification),
            "underwriting" => Ok(AgentKind::Underwriting),
            // The original system used two aliases for the same worker.
            "sanction" | "sanction_letter" => Ok(AgentKind::Sanction),
            other => Err(format!("invalid agent kind: '{other}'")),
        }
    }
}

/// A named phase of the loan conversation.
///
/// Allowed successors are declared in the stage table owned by
/// `lendcore-core`; the type itself carries no transition rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStage {
    Initiation,
    InformationCollection,
    SalesNegotiation,
    Verification,
    Underwriting,
    DocumentUpload,
    SanctionGeneration,
    Completion,
    ErrorHandling,
}

impl ConversationStage {
    /// All stages in canonical forward order (error_handling last).
    pub const ALL: [ConversationStage; 9] = [
        ConversationStage::Initiation,
        ConversationStage::InformationCollection,
        ConversationStage::SalesNegotiation,
        ConversationStage::Verification,
        ConversationStage::Underwriting,
        ConversationStage::DocumentUpload,
        ConversationStage::SanctionGeneration,
        ConversationStage::Completion,
        ConversationStage::ErrorHandling,
    ];
}

impl fmt::Display for ConversationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConversationStage::Initiation => "initiation",
            ConversationStage::InformationCollection => "information_collection",
            ConversationStage::SalesNegotiation => "sales_negotiation",
            ConversationStage::Verification => "verification",
            ConversationStage::Underwriting => "underwriting",
            ConversationStage::DocumentUpload => "document_upload",
            ConversationStage::SanctionGeneration => "sanction_generation",
            ConversationStage::Completion => "completion",
            ConversationStage::ErrorHandling => "error_handling",
        };
        write!(f, "{s}")
    }
}

impl FromStr for ConversationStage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "initiation" => Ok(ConversationStage::Initiation),
            "information_collection" => Ok(ConversationStage::InformationCollection),
            "sales_negotiation" => Ok(ConversationStage::SalesNegotiation),
            "verification" => Ok(ConversationStage::Verification),
            "underwriting" => Ok(ConversationStage::Underwriting),
            "document_upload" => Ok(ConversationStage::DocumentUpload),
            // Both spellings appeared in the wild; the longer one was an
            // alias for the same phase.
            "sanction_generation" | "sanction_letter_generation" => {
                Ok(ConversationStage::SanctionGeneration)
            }
            "completion" => Ok(ConversationStage::Completion),
            "error_handling" => Ok(ConversationStage::ErrorHandling),
            other => Err(format!("invalid conversation stage: '{other}'")),
        }
    }
}

/// Severity of an error recorded on a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

/// An error entry on a conversation's log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorLog {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub severity: ErrorSeverity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

/// A value in `collected_data`, stamped with the time it was written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectedEntry {
    pub value: Value,
    pub timestamp: DateTime<Utc>,
}

/// Per-session conversation state shared by all agents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationContext {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<String>,
    pub current_agent: AgentKind,
    pub conversation_stage: ConversationStage,
    /// Sole inter-agent shared memory. Keys double as ad hoc namespaces
    /// (`shared_<src>_to_<dst>_<key>` for cross-agent handoffs).
    #[serde(default)]
    pub collected_data: BTreeMap<String, CollectedEntry>,
    #[serde(default)]
    pub pending_tasks: Vec<String>,
    #[serde(default)]
    pub completed_tasks: Vec<String>,
    #[serde(default)]
    pub errors: Vec<ErrorLog>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConversationContext {
    /// Create a fresh context in the initiation stage, owned by the master.
    pub fn new(session_id: impl Into<String>, customer_id: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            customer_id,
            current_agent: AgentKind::Master,
            conversation_stage: ConversationStage::Initiation,
            collected_data: BTreeMap::new(),
            pending_tasks: Vec::new(),
            completed_tasks: Vec::new(),
            errors: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Store a value under `key`, stamping the write time.
    pub fn add_collected_data(&mut self, key: impl Into<String>, value: Value) {
        self.collected_data.insert(
            key.into(),
            CollectedEntry {
                value,
                timestamp: Utc::now(),
            },
        );
        self.touch();
    }

    /// Fetch the raw value stored under `key`, if any.
    pub fn data_value(&self, key: &str) -> Option<&Value> {
        self.collected_data.get(key).map(|e| &e.value)
    }

    /// Append an error to the conversation's log.
    pub fn add_error(&mut self, message: impl Into<String>, severity: ErrorSeverity, context: Option<Value>) {
        let seq = self.errors.len() + 1;
        self.errors.push(ErrorLog {
            id: format!("err_{seq}_{}", Uuid::new_v4().simple()),
            timestamp: Utc::now(),
            message: message.into(),
            severity,
            context,
        });
        self.touch();
    }

    /// Add a task id to the pending list (idempotent).
    pub fn add_pending_task(&mut self, task_id: impl Into<String>) {
        let task_id = task_id.into();
        if !self.pending_tasks.contains(&task_id) {
            self.pending_tasks.push(task_id);
        }
        self.touch();
    }

    /// Move a task id from pending to completed (idempotent).
    pub fn complete_task(&mut self, task_id: &str) {
        self.pending_tasks.retain(|t| t != task_id);
        if !self.completed_tasks.iter().any(|t| t == task_id) {
            self.completed_tasks.push(task_id.to_string());
        }
        self.touch();
    }

    /// Hand the conversation to a different agent at a new stage.
    pub fn switch_agent(&mut self, agent: AgentKind, stage: ConversationStage) {
        self.current_agent = agent;
        self.conversation_stage = stage;
        self.touch();
    }

    /// Refresh the last-modified timestamp.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// The kinds of work a worker agent can be asked to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Sales,
    Verification,
    Underwriting,
    DocumentGeneration,
    GenerateSanctionLetter,
    CreateDownloadLink,
    NotifyCustomer,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskKind::Sales => "sales",
            TaskKind::Verification => "verification",
            TaskKind::Underwriting => "underwriting",
            TaskKind::DocumentGeneration => "document_generation",
            TaskKind::GenerateSanctionLetter => "generate_sanction_letter",
            TaskKind::CreateDownloadLink => "create_download_link",
            TaskKind::NotifyCustomer => "notify_customer",
        };
        write!(f, "{s}")
    }
}

/// Lifecycle status of an [`AgentTask`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// An ephemeral unit of work delegated to an agent.
///
/// Tasks live in the owning agent's in-memory history; only their ids are
/// recorded on the conversation context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTask {
    pub id: String,
    pub kind: TaskKind,
    pub status: TaskStatus,
    pub input: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl AgentTask {
    pub fn new(kind: TaskKind, input: Value) -> Self {
        Self {
            id: format!("task_{}", &Uuid::new_v4().simple().to_string()[..8]),
            kind,
            status: TaskStatus::Pending,
            input,
            output: None,
            error: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn start(&mut self) {
        self.status = TaskStatus::InProgress;
    }

    pub fn complete(&mut self, output: Value) {
        self.status = TaskStatus::Completed;
        self.output = Some(output);
        self.error = None;
        self.completed_at = Some(Utc::now());
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = TaskStatus::Failed;
        self.error = Some(error.into());
        self.completed_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_stage_roundtrip() {
        for stage in ConversationStage::ALL {
            let s = stage.to_string();
            let parsed: ConversationStage = s.parse().unwrap();
            assert_eq!(stage, parsed);
        }
    }

    #[test]
    fn test_stage_alias_parses() {
        let parsed: ConversationStage = "sanction_letter_generation".parse().unwrap();
        assert_eq!(parsed, ConversationStage::SanctionGeneration);
    }

    #[test]
    fn test_stage_serde() {
        let json = serde_json::to_string(&ConversationStage::SalesNegotiation).unwrap();
        assert_eq!(json, "\"sales_negotiation\"");
        let parsed: ConversationStage = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, ConversationStage::SalesNegotiation);
    }

    #[test]
    fn test_agent_kind_roundtrip() {
        for kind in [
            AgentKind::Master,
            AgentKind::Sales,
            AgentKind::Verification,
            AgentKind::Underwriting,
            AgentKind::Sanction,
        ] {
            let parsed: AgentKind = kind.to_string().parse().unwrap();
            assert_eq!(kind, parsed);
        }
        let aliased: AgentKind = "sanction_letter".parse().unwrap();
        assert_eq!(aliased, AgentKind::Sanction);
    }

    #[test]
    fn test_new_context_defaults() {
        let ctx = ConversationContext::new("session_abc", None);
        assert_eq!(ctx.current_agent, AgentKind::Master);
        assert_eq!(ctx.conversation_stage, ConversationStage::Initiation);
        assert!(ctx.collected_data.is_empty());
        assert!(ctx.errors.is_empty());
    }

    #[test]
    fn test_collected_data_overwrites() {
        let mut ctx = ConversationContext::new("s", None);
        ctx.add_collected_data("loan_amount", json!(100000));
        ctx.add_collected_data("loan_amount", json!(250000));
        assert_eq!(ctx.data_value("loan_amount"), Some(&json!(250000)));
        assert_eq!(ctx.collected_data.len(), 1);
    }

    #[test]
    fn test_task_lifecycle() {
        let mut ctx = ConversationContext::new("s", None);
        let mut task = AgentTask::new(TaskKind::Sales, json!({"action": "start_negotiation"}));
        assert_eq!(task.status, TaskStatus::Pending);

        ctx.add_pending_task(task.id.clone());
        ctx.add_pending_task(task.id.clone());
        assert_eq!(ctx.pending_tasks.len(), 1);

        task.start();
        assert_eq!(task.status, TaskStatus::InProgress);

        task.complete(json!({"ok": true}));
        assert_eq!(task.status, TaskStatus::Completed);
        assert!(task.completed_at.is_some());

        ctx.complete_task(&task.id);
        assert!(ctx.pending_tasks.is_empty());
        assert_eq!(ctx.completed_tasks, vec![task.id.clone()]);
    }

    #[test]
    fn test_task_fail_records_error() {
        let mut task = AgentTask::new(TaskKind::Underwriting, json!({}));
        task.fail("bureau unavailable");
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error.as_deref(), Some("bureau unavailable"));
    }

    #[test]
    fn test_add_error_sequences_ids() {
        let mut ctx = ConversationContext::new("s", None);
        ctx.add_error("first", ErrorSeverity::Low, None);
        ctx.add_error("second", ErrorSeverity::High, Some(json!({"stage": "underwriting"})));
        assert_eq!(ctx.errors.len(), 2);
        assert!(ctx.errors[0].id.starts_with("err_1_"));
        assert!(ctx.errors[1].id.starts_with("err_2_"));
        assert!(ctx.errors[1].severity > ctx.errors[0].severity);
    }

    #[test]
    fn test_context_serde_roundtrip() {
        let mut ctx = ConversationContext::new("session_xyz", Some("CUST001".to_string()));
        ctx.add_collected_data("name", json!("Priya Sharma"));
        ctx.switch_agent(AgentKind::Sales, ConversationStage::SalesNegotiation);

        let json = serde_json::to_string(&ctx).unwrap();
        let parsed: ConversationContext = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.session_id, "session_xyz");
        assert_eq!(parsed.current_agent, AgentKind::Sales);
        assert_eq!(parsed.conversation_stage, ConversationStage::SalesNegotiation);
        assert_eq!(parsed.data_value("name"), Some(&json!("Priya Sharma")));
    }
}
