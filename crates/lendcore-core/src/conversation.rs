//! Conversation stage machine, greetings, and closure handling.
//!
//! The stage table is static: each stage declares its allowed successors,
//! the data keys that complete it, and an inactivity timeout. Transition
//! validation is exposed as its own operation; the session manager also
//! carries an unconditional stage setter used by error-handling and reset
//! paths, and the two are intentionally not unified.

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use serde_json::json;

use lendcore_types::conversation::{
    AgentKind, ConversationContext, ConversationStage, ErrorSeverity,
};
use lendcore_types::error::SessionError;

/// Static configuration of one conversation stage.
#[derive(Debug, Clone, Copy)]
pub struct StageRule {
    pub description: &'static str,
    pub next_stages: &'static [ConversationStage],
    pub required_data: &'static [&'static str],
    pub timeout_minutes: u32,
}

use ConversationStage::*;

/// Look up the static rule for a stage.
pub fn stage_rule(stage: ConversationStage) -> StageRule {
    match stage {
        Initiation => StageRule {
            description: "Initial greeting and conversation startup",
            next_stages: &[InformationCollection, Underwriting, ErrorHandling],
            required_data: &[],
            timeout_minutes: 5,
        },
        InformationCollection => StageRule {
            description: "Collecting basic customer information",
            next_stages: &[SalesNegotiation, Underwriting, ErrorHandling],
            required_data: &["name", "age", "city", "loan_amount"],
            timeout_minutes: 10,
        },
        SalesNegotiation => StageRule {
            description: "Negotiating loan terms and conditions",
            next_stages: &[Verification, Underwriting, ErrorHandling],
            required_data: &["agreed_amount", "agreed_tenure", "agreed_rate"],
            timeout_minutes: 15,
        },
        Verification => StageRule {
            description: "Verifying customer identity and details",
            next_stages: &[Underwriting, ErrorHandling],
            required_data: &["kyc_verified", "phone_verified", "address_verified"],
            timeout_minutes: 10,
        },
        Underwriting => StageRule {
            description: "Credit assessment and loan approval decision",
            next_stages: &[SanctionGeneration, DocumentUpload, Completion, ErrorHandling],
            required_data: &["credit_score", "eligibility_decision"],
            timeout_minutes: 5,
        },
        DocumentUpload => StageRule {
            description: "Customer document upload and processing",
            next_stages: &[Underwriting, ErrorHandling],
            required_data: &["salary_slip_uploaded", "document_processed"],
            timeout_minutes: 20,
        },
        SanctionGeneration => StageRule {
            description: "Generating loan sanction letter",
            next_stages: &[Completion, ErrorHandling],
            required_data: &["sanction_letter_generated"],
            timeout_minutes: 5,
        },
        Completion => StageRule {
            description: "Conversation completion and closure",
            next_stages: &[],
            required_data: &["completion_summary"],
            timeout_minutes: 0,
        },
        ErrorHandling => StageRule {
            description: "Handling errors and recovery",
            next_stages: &[Initiation, Completion],
            required_data: &[],
            timeout_minutes: 10,
        },
    }
}

/// Whether the table allows moving from `current` to `target`.
pub fn validate_transition(current: ConversationStage, target: ConversationStage) -> bool {
    stage_rule(current).next_stages.contains(&target)
}

/// The agent that owns each stage.
pub fn agent_for_stage(stage: ConversationStage) -> AgentKind {
    match stage {
        Initiation | InformationCollection | Completion | ErrorHandling => AgentKind::Master,
        SalesNegotiation => AgentKind::Sales,
        // The verification worker also owns document intake.
        Verification | DocumentUpload => AgentKind::Verification,
        Underwriting => AgentKind::Underwriting,
        SanctionGeneration => AgentKind::Sanction,
    }
}

/// Expected next actions for a stage (surfaced in transition reports).
pub fn expected_actions(stage: ConversationStage) -> &'static [&'static str] {
    match stage {
        Initiation => &["provide_greeting", "wait_for_response"],
        InformationCollection => &["collect_name", "collect_age", "collect_city", "collect_loan_amount"],
        SalesNegotiation => &["present_offers", "negotiate_terms", "handle_objections"],
        Verification => &["verify_kyc", "verify_phone", "verify_address"],
        Underwriting => &["fetch_credit_score", "assess_eligibility", "make_decision"],
        DocumentUpload => &["request_documents", "process_documents", "validate_documents"],
        SanctionGeneration => &["generate_pdf", "provide_download_link"],
        Completion => &["provide_summary", "close_conversation"],
        ErrorHandling => &["diagnose_error", "provide_recovery", "communicate_with_customer"],
    }
}

/// Completion state of the current stage against its required data keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageCompletion {
    pub completed: bool,
    pub completion_percentage: f64,
    pub missing_data: Vec<String>,
}

/// Check which of the stage's required keys are present on the context.
pub fn stage_completion(ctx: &ConversationContext) -> StageCompletion {
    let required = stage_rule(ctx.conversation_stage).required_data;
    if required.is_empty() {
        return StageCompletion {
            completed: true,
            completion_percentage: 100.0,
            missing_data: Vec::new(),
        };
    }

    let missing: Vec<String> = required
        .iter()
        .filter(|key| !ctx.collected_data.contains_key(**key))
        .map(|key| key.to_string())
        .collect();
    let done = required.len() - missing.len();

    StageCompletion {
        completed: missing.is_empty(),
        completion_percentage: done as f64 / required.len() as f64 * 100.0,
        missing_data: missing,
    }
}

/// Overall progress along the happy path (error_handling and
/// document_upload are detours, not progress).
pub fn conversation_progress(stage: ConversationStage) -> f64 {
    const PATH: [ConversationStage; 7] = [
        Initiation,
        InformationCollection,
        SalesNegotiation,
        Verification,
        Underwriting,
        SanctionGeneration,
        Completion,
    ];
    match PATH.iter().position(|s| *s == stage) {
        Some(index) => index as f64 / (PATH.len() - 1) as f64 * 100.0,
        None => 0.0,
    }
}

/// Report of an executed stage transition.
#[derive(Debug, Clone)]
pub struct TransitionReport {
    pub from: ConversationStage,
    pub to: ConversationStage,
    pub message: String,
    pub expected_actions: &'static [&'static str],
}

/// Validate and execute a stage transition, switching the owning agent and
/// stamping transition metadata onto the context.
pub fn manage_transition(
    ctx: &mut ConversationContext,
    target: ConversationStage,
) -> Result<TransitionReport, SessionError> {
    let current = ctx.conversation_stage;
    if !validate_transition(current, target) {
        return Err(SessionError::InvalidTransition {
            from: current.to_string(),
            to: target.to_string(),
        });
    }

    ctx.switch_agent(agent_for_stage(target), target);
    ctx.add_collected_data(
        "stage_transition",
        json!({
            "from_stage": current.to_string(),
            "to_stage": target.to_string(),
            "transition_time": chrono::Utc::now().to_rfc3339(),
        }),
    );

    Ok(TransitionReport {
        from: current,
        to: target,
        message: transition_message(current, target),
        expected_actions: expected_actions(target),
    })
}

/// Customer-visible message for a specific transition.
pub fn transition_message(from: ConversationStage, to: ConversationStage) -> String {
    let text = match (from, to) {
        (Initiation, InformationCollection) => {
            "Great! Let me collect some basic information to get started."
        }
        (InformationCollection, SalesNegotiation) => {
            "Perfect! Now let me present you with some attractive loan options."
        }
        (SalesNegotiation, Verification) => {
            "Excellent! Let me verify your details to proceed with the application."
        }
        (Verification, Underwriting) => "Great! Now I'll assess your loan eligibility.",
        (Underwriting, SanctionGeneration) => {
            "Congratulations! Your loan has been approved. Let me generate your sanction letter."
        }
        (Underwriting, DocumentUpload) => {
            "I need some additional documentation to complete your application."
        }
        (DocumentUpload, Underwriting) => {
            "Thank you for the documents. Let me complete the assessment."
        }
        (SanctionGeneration, Completion) => {
            "Your sanction letter is ready! Let me provide you with the details."
        }
        _ => "Moving to the next step of your application process.",
    };
    text.to_string()
}

/// What kind of customer a greeting is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CustomerKind {
    New,
    Returning,
    Referred,
}

/// A generated greeting with its follow-up line.
#[derive(Debug, Clone)]
pub struct Greeting {
    pub message: String,
    pub follow_up: String,
    pub customer_kind: CustomerKind,
    pub personalized: bool,
}

const NEW_CUSTOMER_GREETINGS: [&str; 3] = [
    "Hello! Welcome to our personal loan service. I'm your AI assistant, and I'm here to help you find the perfect loan solution tailored to your needs.",
    "Hi there! Thanks for visiting us today. I'm here to make your loan application process as smooth and quick as possible.",
    "Welcome! I'm your personal loan advisor. Let's work together to find you the best loan option that fits your requirements.",
];

const RETURNING_CUSTOMER_GREETINGS: [&str; 3] = [
    "Hello {name}! Welcome back. I see you're interested in our loan services again. How can I help you today?",
    "Hi {name}! Great to see you again. I'm here to assist you with your loan needs.",
    "Welcome back, {name}! I'm ready to help you with another loan application.",
];

const REFERRED_CUSTOMER_GREETINGS: [&str; 2] = [
    "Hello! I understand you were referred to us for a personal loan. Welcome! I'm here to make this process easy for you.",
    "Hi! Thanks for choosing us based on a referral. I'm excited to help you with your loan requirements.",
];

/// Generate a personalized greeting for a new conversation.
pub fn personalized_greeting(
    customer_name: Option<&str>,
    referred: bool,
    initial_message: Option<&str>,
) -> Greeting {
    let mut rng = rand::thread_rng();
    let (customer_kind, template) = match (customer_name, referred) {
        (Some(_), _) => (
            CustomerKind::Returning,
            *RETURNING_CUSTOMER_GREETINGS
                .choose(&mut rng)
                .expect("template set is non-empty"),
        ),
        (None, true) => (
            CustomerKind::Referred,
            *REFERRED_CUSTOMER_GREETINGS
                .choose(&mut rng)
                .expect("template set is non-empty"),
        ),
        (None, false) => (
            CustomerKind::New,
            *NEW_CUSTOMER_GREETINGS
                .choose(&mut rng)
                .expect("template set is non-empty"),
        ),
    };

    let message = match customer_name {
        Some(name) => template.replace("{name}", name),
        None => template.to_string(),
    };

    let follow_up = match initial_message {
        Some(m) if m.to_lowercase().contains("loan") => {
            "I see you're interested in a personal loan. I'll be happy to help you find the best option for your needs."
        }
        _ if customer_kind == CustomerKind::Returning => "What can I help you with today?",
        _ => {
            "Whether you're looking for a personal loan or just exploring your options, I'm here to guide you through the process."
        }
    }
    .to_string();

    Greeting {
        message,
        follow_up,
        customer_kind,
        personalized: customer_name.is_some(),
    }
}

/// How a conversation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompletionKind {
    Approved,
    Rejected,
    Cancelled,
    Error,
}

/// Closure message plus follow-up for a completed conversation.
pub fn closure_message(kind: CompletionKind, name: Option<&str>, amount: Option<f64>) -> (String, String) {
    let name = name.unwrap_or("there");
    let amount_text = amount
        .map(|a| format!("\u{20b9}{a:.0}"))
        .unwrap_or_else(|| "the requested amount".to_string());

    match kind {
        CompletionKind::Approved => (
            format!(
                "Congratulations, {name}! Your loan of {amount_text} has been approved. Your sanction letter is ready for download. Thank you for choosing our services!"
            ),
            "You can download your sanction letter using the link provided. If you have any questions, feel free to contact our support team.".to_string(),
        ),
        CompletionKind::Rejected => (
            format!(
                "Thank you for your interest, {name}. Unfortunately, we're unable to approve your loan application at this time based on our current lending criteria."
            ),
            "We appreciate your time and encourage you to apply again in the future when your financial profile may better align with our requirements.".to_string(),
        ),
        CompletionKind::Cancelled => (
            format!(
                "I understand you've decided not to proceed with the loan application at this time, {name}."
            ),
            "Thank you for considering our services. Feel free to reach out whenever you need financial assistance in the future.".to_string(),
        ),
        CompletionKind::Error => (
            format!(
                "I apologize, {name}, but we encountered some technical difficulties during your application process."
            ),
            "Our team will review your application and contact you shortly. Thank you for your patience.".to_string(),
        ),
    }
}

/// What to do when a conversation times out in a given stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutRecovery {
    RestartConversation,
    CloseConversation,
    ResumeFromCurrentStage,
}

/// Result of handling a conversation timeout.
#[derive(Debug, Clone)]
pub struct TimeoutReport {
    pub message: String,
    pub recovery: TimeoutRecovery,
    pub stage_at_timeout: ConversationStage,
    pub timeout_minutes: u32,
}

/// Record a timeout on the context and decide the recovery action.
pub fn handle_timeout(ctx: &mut ConversationContext) -> TimeoutReport {
    let stage = ctx.conversation_stage;
    let timeout_minutes = stage_rule(stage).timeout_minutes;

    ctx.add_error(
        format!("Conversation timeout in stage: {stage}"),
        ErrorSeverity::Medium,
        Some(json!({"stage": stage.to_string(), "timeout_minutes": timeout_minutes})),
    );

    let recovery = match stage {
        Initiation | InformationCollection => TimeoutRecovery::RestartConversation,
        Completion => TimeoutRecovery::CloseConversation,
        _ => TimeoutRecovery::ResumeFromCurrentStage,
    };

    TimeoutReport {
        message: "I notice we haven't heard from you in a while. Are you still there? I'm here to help you continue with your loan application.".to_string(),
        recovery,
        stage_at_timeout: stage,
        timeout_minutes,
    }
}
