//! Customer-facing error handling service.
//!
//! Maps failure categories to canned customer messages, recovery-action
//! lists, and escalation decisions. Every call produces an outcome; whether
//! to propagate the underlying failure is the caller's decision.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use uuid::Uuid;

use lendcore_types::conversation::{AgentKind, ConversationContext, ConversationStage, ErrorSeverity};

/// Failure categories recognized by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    AgentFailure,
    ApiFailure,
    ValidationError,
    ProcessingError,
    NetworkError,
    TimeoutError,
    AuthenticationError,
    BusinessRuleError,
    DataError,
    SystemError,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCategory::AgentFailure => "agent_failure",
            ErrorCategory::ApiFailure => "api_failure",
            ErrorCategory::ValidationError => "validation_error",
            ErrorCategory::ProcessingError => "processing_error",
            ErrorCategory::NetworkError => "network_error",
            ErrorCategory::TimeoutError => "timeout_error",
            ErrorCategory::AuthenticationError => "authentication_error",
            ErrorCategory::BusinessRuleError => "business_rule_error",
            ErrorCategory::DataError => "data_error",
            ErrorCategory::SystemError => "system_error",
        };
        write!(f, "{s}")
    }
}

/// Recovery-action tokens consumed by the agent engine and master agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    RestartAgent,
    ResetTask,
    ClearContext,
    NotifyCustomer,
    RetryOperation,
    RetryTask,
    UseAlternativeAgent,
    FallbackToManual,
    RetryApiCall,
    UseFallbackData,
    ContinueWithManual,
    RequestDataCorrection,
    ProvideFormatGuidance,
    OfferAssistance,
    RetryProcessing,
    UseAlternativeMethod,
    SimplifyProcess,
    RetryConnection,
    UseCachedData,
    WaitAndRetry,
    IncreaseTimeout,
    UseAsyncProcessing,
    ExplainRules,
    OfferAlternatives,
    SuggestModifications,
    RequestDataVerification,
    UseDefaultValues,
    ManualDataEntry,
    RestartService,
    UseBackupSystem,
    EscalateToAdmin,
    LogError,
    ContinueConversation,
}

/// Where and during what a failure happened.
#[derive(Debug, Clone, Default)]
pub struct ErrorIncident {
    pub session_id: Option<String>,
    pub agent: Option<AgentKind>,
    pub task_id: Option<String>,
    pub customer_id: Option<String>,
    pub stage: Option<ConversationStage>,
    pub detail: Option<Value>,
}

/// Result of handling one failure.
#[derive(Debug, Clone)]
pub struct ErrorOutcome {
    pub error_id: String,
    pub customer_message: String,
    pub recovery_actions: Vec<RecoveryAction>,
    pub escalation_required: bool,
    pub retry_possible: bool,
    pub severity: ErrorSeverity,
}

/// Process-lifetime counters per category, used for forced escalation.
#[derive(Debug, Default)]
struct ErrorStats {
    total: u64,
    by_category: HashMap<ErrorCategory, u64>,
}

/// Escalate a category once its lifetime failure count passes this.
const ESCALATION_COUNT_THRESHOLD: u64 = 10;

/// The error-handling orchestrator. Constructed once at the composition
/// root and shared by reference.
#[derive(Debug, Default)]
pub struct ErrorReporter {
    stats: Mutex<ErrorStats>,
}

impl ErrorReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle a failure: log it, pick the customer message and recovery
    /// plan, bump counters, and optionally record it on the conversation.
    pub fn handle(
        &self,
        message: &str,
        category: ErrorCategory,
        incident: &ErrorIncident,
        conversation: Option<&mut ConversationContext>,
        specific: Option<&str>,
    ) -> ErrorOutcome {
        let count = {
            let mut stats = self.stats.lock().expect("error stats lock poisoned");
            stats.total += 1;
            let entry = stats.by_category.entry(category).or_insert(0);
            *entry += 1;
            *entry
        };

        let error_id = format!("err_{}", &Uuid::new_v4().simple().to_string()[..8]);
        let severity = severity_for(category);
        log_incident(&error_id, category, message, severity, incident);

        let customer_message = customer_message(category, specific).to_string();
        let (recovery_actions, retry_possible, plan_escalates) = recovery_plan(category);
        let escalation_required = plan_escalates
            || category == ErrorCategory::SystemError
            || count > ESCALATION_COUNT_THRESHOLD;

        if let Some(ctx) = conversation {
            ctx.add_error(
                format!("Error ID {error_id}: {message}"),
                conversation_severity(category),
                Some(json!({
                    "error_id": error_id,
                    "error_category": category.to_string(),
                })),
            );
        }

        ErrorOutcome {
            error_id,
            customer_message,
            recovery_actions,
            escalation_required,
            retry_possible,
            severity,
        }
    }

    /// Agent-failure entry point: the specific message sub-key is the
    /// failing agent's kind.
    pub fn handle_agent_error(
        &self,
        agent: AgentKind,
        task_id: &str,
        message: &str,
        session_id: Option<&str>,
        conversation: Option<&mut ConversationContext>,
    ) -> ErrorOutcome {
        let stage = conversation.as_ref().map(|c| c.conversation_stage);
        let incident = ErrorIncident {
            session_id: session_id.map(str::to_string),
            agent: Some(agent),
            task_id: Some(task_id.to_string()),
            stage,
            ..Default::default()
        };
        let specific = agent.to_string();
        self.handle(
            message,
            ErrorCategory::AgentFailure,
            &incident,
            conversation,
            Some(&specific),
        )
    }

    /// API-failure entry point: the specific sub-key is the API name
    /// (crm / credit_bureau / offer_mart).
    pub fn handle_api_error(
        &self,
        api_name: &str,
        message: &str,
        session_id: Option<&str>,
        conversation: Option<&mut ConversationContext>,
    ) -> ErrorOutcome {
        let incident = ErrorIncident {
            session_id: session_id.map(str::to_string),
            detail: Some(json!({"api_name": api_name})),
            ..Default::default()
        };
        self.handle(
            message,
            ErrorCategory::ApiFailure,
            &incident,
            conversation,
            Some(&api_name.to_lowercase()),
        )
    }

    /// Snapshot of lifetime counters.
    pub fn statistics(&self) -> (u64, HashMap<ErrorCategory, u64>) {
        let stats = self.stats.lock().expect("error stats lock poisoned");
        (stats.total, stats.by_category.clone())
    }
}

fn log_incident(
    error_id: &str,
    category: ErrorCategory,
    message: &str,
    severity: ErrorSeverity,
    incident: &ErrorIncident,
) {
    let session = incident.session_id.as_deref().unwrap_or("-");
    match severity {
        ErrorSeverity::Critical => {
            tracing::error!(error_id, %category, session, "critical failure: {message}")
        }
        ErrorSeverity::High => {
            tracing::error!(error_id, %category, session, "{message}")
        }
        ErrorSeverity::Medium => {
            tracing::warn!(error_id, %category, session, "{message}")
        }
        ErrorSeverity::Low => {
            tracing::info!(error_id, %category, session, "{message}")
        }
    }
}

fn severity_for(category: ErrorCategory) -> ErrorSeverity {
    match category {
        ErrorCategory::SystemError => ErrorSeverity::Critical,
        ErrorCategory::AgentFailure | ErrorCategory::ApiFailure => ErrorSeverity::High,
        ErrorCategory::ProcessingError
        | ErrorCategory::NetworkError
        | ErrorCategory::TimeoutError
        | ErrorCategory::DataError
        | ErrorCategory::AuthenticationError => ErrorSeverity::Medium,
        ErrorCategory::ValidationError | ErrorCategory::BusinessRuleError => ErrorSeverity::Low,
    }
}

fn conversation_severity(category: ErrorCategory) -> ErrorSeverity {
    // Same routing as log severity; kept separate because the conversation
    // log is customer-visible via the status endpoint.
    severity_for(category)
}

/// Customer-facing message for a category, optionally specialized by a
/// sub-key (failing agent kind, API name, field name).
fn customer_message(category: ErrorCategory, specific: Option<&str>) -> &'static str {
    match (category, specific) {
        (ErrorCategory::AgentFailure, Some("sales")) => {
            "I'm having trouble with the loan calculation. Let me get you connected with our loan specialist."
        }
        (ErrorCategory::AgentFailure, Some("verification")) => {
            "There's a temporary issue with verification. Let me try an alternative approach."
        }
        (ErrorCategory::AgentFailure, Some("underwriting")) => {
            "I'm experiencing difficulty with the approval process. Please give me a moment to resolve this."
        }
        (ErrorCategory::AgentFailure, Some("sanction")) => {
            "There's a temporary issue generating your documents. I'll have this resolved shortly."
        }
        (ErrorCategory::AgentFailure, _) => {
            "I apologize, but I'm experiencing a temporary issue. Let me try to help you in a different way."
        }
        (ErrorCategory::ApiFailure, Some("crm")) => {
            "I'm unable to access your customer information at the moment. Could you please provide your details manually?"
        }
        (ErrorCategory::ApiFailure, Some("credit_bureau")) => {
            "I'm having difficulty checking your credit score. We can proceed with alternative verification methods."
        }
        (ErrorCategory::ApiFailure, Some("offer_mart")) => {
            "I'm unable to access your pre-approved offers right now. Let me calculate options based on standard criteria."
        }
        (ErrorCategory::ApiFailure, _) => {
            "I'm having trouble accessing some information right now. Let me try again in a moment."
        }
        (ErrorCategory::ValidationError, Some("amount")) => {
            "The loan amount you've entered seems unusual. Could you please confirm the amount?"
        }
        (ErrorCategory::ValidationError, Some("tenure")) => {
            "The tenure you've selected isn't available. Let me show you the available options."
        }
        (ErrorCategory::ValidationError, Some("documents")) => {
            "There's an issue with the document you've uploaded. Please check the format and try again."
        }
        (ErrorCategory::ValidationError, _) => {
            "There seems to be an issue with the information provided. Could you please check and try again?"
        }
        (ErrorCategory::ProcessingError, Some("calculation")) => {
            "There's an issue with the loan calculations. Let me recalculate this for you."
        }
        (ErrorCategory::ProcessingError, Some("document_generation")) => {
            "I'm having trouble generating your documents. I'll resolve this shortly."
        }
        (ErrorCategory::ProcessingError, _) => {
            "I'm having trouble processing your request. Let me try a different approach."
        }
        (ErrorCategory::NetworkError, Some("timeout")) => {
            "The request is taking longer than expected. Let me try again with a different approach."
        }
        (ErrorCategory::NetworkError, _) => {
            "I'm experiencing connectivity issues. Please bear with me while I resolve this."
        }
        (ErrorCategory::TimeoutError, Some("api_timeout")) => {
            "I'm having trouble getting a response from our systems. Let me try an alternative method."
        }
        (ErrorCategory::TimeoutError, _) => {
            "The operation is taking longer than expected. Let me try again."
        }
        (ErrorCategory::AuthenticationError, _) => {
            "I'm unable to verify access to that service right now. Let me try an alternative method."
        }
        (ErrorCategory::BusinessRuleError, Some("eligibility")) => {
            "Based on our current criteria, there are some eligibility concerns. Let me explain the alternatives."
        }
        (ErrorCategory::BusinessRuleError, Some("limits")) => {
            "The requested amount exceeds our current limits. Let me show you what's available."
        }
        (ErrorCategory::BusinessRuleError, _) => {
            "There's an issue with the loan criteria. Let me explain the available options."
        }
        (ErrorCategory::DataError, Some("missing_data")) => {
            "Some required information is missing. Could you please provide the additional details?"
        }
        (ErrorCategory::DataError, Some("invalid_data")) => {
            "Some of the information doesn't seem correct. Could you please check and update it?"
        }
        (ErrorCategory::DataError, _) => {
            "There seems to be an issue with the data. Could you please verify the information?"
        }
        (ErrorCategory::SystemError, Some("database")) => {
            "There's a temporary issue with our systems. I'm working to resolve this."
        }
        (ErrorCategory::SystemError, Some("service_unavailable")) => {
            "Some of our services are temporarily unavailable. Let me try alternative methods."
        }
        (ErrorCategory::SystemError, _) => {
            "I'm experiencing a technical issue. Let me try to resolve this for you."
        }
    }
}

/// Canned recovery plan per category: (actions, retry_possible, escalates).
fn recovery_plan(category: ErrorCategory) -> (Vec<RecoveryAction>, bool, bool) {
    use RecoveryAction::*;
    match category {
        ErrorCategory::AgentFailure => (vec![RestartAgent, ResetTask, NotifyCustomer], true, false),
        ErrorCategory::ApiFailure => {
            (vec![RetryApiCall, UseFallbackData, ContinueWithManual], true, false)
        }
        ErrorCategory::ValidationError => (
            vec![RequestDataCorrection, ProvideFormatGuidance, OfferAssistance],
            true,
            false,
        ),
        ErrorCategory::ProcessingError => (
            vec![RetryProcessing, UseAlternativeMethod, SimplifyProcess],
            true,
            false,
        ),
        ErrorCategory::NetworkError => {
            (vec![RetryConnection, UseCachedData, WaitAndRetry], true, false)
        }
        ErrorCategory::TimeoutError => (
            vec![IncreaseTimeout, RetryOperation, UseAsyncProcessing],
            true,
            false,
        ),
        ErrorCategory::BusinessRuleError => {
            (vec![ExplainRules, OfferAlternatives, SuggestModifications], true, false)
        }
        ErrorCategory::DataError => (
            vec![RequestDataVerification, UseDefaultValues, ManualDataEntry],
            true,
            false,
        ),
        ErrorCategory::SystemError => {
            (vec![RestartService, UseBackupSystem, EscalateToAdmin], true, true)
        }
        ErrorCategory::AuthenticationError => {
            (vec![LogError, NotifyCustomer, ContinueConversation], false, true)
        }
    }
}
