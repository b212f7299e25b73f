//! Master agent: conversation orchestration, worker selection, and task
//! delegation.
//!
//! The master never executes domain tasks itself. Each user turn is
//! classified, mapped through a static (stage, intent) action table,
//! transitioned through the stage validator, and dispatched to a handler
//! that may delegate to a worker through the session manager. Worker
//! failures are absorbed here: fallback responses, bounded recovery, and
//! escalation once an agent type keeps failing.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use lendcore_types::conversation::{AgentKind, ConversationStage, TaskKind};
use lendcore_types::error::{AgentError, SessionError};

use crate::calculator::LoanCalculator;
use crate::conversation::{
    self, CompletionKind, TimeoutRecovery, conversation_progress, manage_transition,
    stage_completion,
};
use crate::intent::{Intent, IntentAnalysis, classify};
use crate::session::SessionManager;
use crate::storage::{ContextStore, ExternalServices, HistoryStore, LetterRenderer, VerificationLedger};

/// Worker failures for one agent type before the master escalates.
const ESCALATION_THRESHOLD: usize = 3;

/// Failures within this window count as "recent" for health scoring.
const RECENT_FAILURE_WINDOW_SECS: i64 = 3_600;

/// How a chat response should be rendered by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseKind {
    Text,
    Form,
    LoanOptions,
    DownloadLink,
}

/// The payload returned for one processed user turn.
#[derive(Debug, Clone, Serialize)]
pub struct MasterResponse {
    pub response: String,
    pub action_taken: String,
    pub message_type: ResponseKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub form: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loan_options: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_link: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_profile: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loan_approved: Option<bool>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub upload_required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tracking: Option<Value>,
}

impl MasterResponse {
    fn text(response: impl Into<String>, action_taken: &str) -> Self {
        Self {
            response: response.into(),
            action_taken: action_taken.to_string(),
            message_type: ResponseKind::Text,
            form: None,
            loan_options: None,
            download_link: None,
            filename: None,
            customer_profile: None,
            loan_approved: None,
            upload_required: false,
            tracking: None,
        }
    }
}

/// Actions the (stage, intent) table can select.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    CollectInformation,
    StartSales,
    StartVerification,
    StartUnderwriting,
    HandleObjection,
    RequestDocuments,
    GenerateSanctionLetter,
    ProcessCompleteApplication,
    ProvideInformation,
    ContinueConversation,
}

/// Static `(stage, intent) -> (action, next stage)` dispatch table.
///
/// Unlisted combinations fall through to `ContinueConversation` with the
/// stage unchanged.
pub fn decide_action(
    stage: ConversationStage,
    intent: Intent,
) -> (Action, ConversationStage) {
    use Action::*;
    use ConversationStage::*;
    use Intent::*;

    match (stage, intent) {
        (Initiation, LoanInterest) => (CollectInformation, InformationCollection),
        (Initiation, GeneralInquiry) => (ProvideInformation, Initiation),
        (Initiation, ComprehensiveLoanApplication) => (ProcessCompleteApplication, Underwriting),
        (InformationCollection, CustomerDetails) => (StartSales, SalesNegotiation),
        (InformationCollection, FormSubmission) => (StartSales, SalesNegotiation),
        (InformationCollection, Agreement) => (StartSales, SalesNegotiation),
        (InformationCollection, ComprehensiveLoanApplication) => {
            (ProcessCompleteApplication, Underwriting)
        }
        (SalesNegotiation, Agreement) => (StartVerification, Verification),
        (SalesNegotiation, VerificationComplete) => (StartUnderwriting, Underwriting),
        (SalesNegotiation, Objection) => (HandleObjection, SalesNegotiation),
        (SalesNegotiation, ComprehensiveLoanApplication) => {
            (ProcessCompleteApplication, Underwriting)
        }
        (Verification, Agreement) => (StartUnderwriting, Underwriting),
        (Verification, VerificationComplete) => (StartUnderwriting, Underwriting),
        (Verification, GeneralInquiry) => (StartUnderwriting, Underwriting),
        (Underwriting, DocumentRelated) => (RequestDocuments, DocumentUpload),
        (Underwriting, Agreement) => (GenerateSanctionLetter, SanctionGeneration),
        (Underwriting, SanctionLetterRequest) => (GenerateSanctionLetter, SanctionGeneration),
        (Underwriting, VerificationComplete) => (GenerateSanctionLetter, SanctionGeneration),
        (SanctionGeneration, SanctionLetterRequest) => {
            (GenerateSanctionLetter, SanctionGeneration)
        }
        (SanctionGeneration, Agreement) => (GenerateSanctionLetter, SanctionGeneration),
        (current, _) => (ContinueConversation, current),
    }
}

/// One recorded worker failure, kept for escalation and health scoring.
#[derive(Debug, Clone)]
struct FailureRecord {
    at: DateTime<Utc>,
    session_id: String,
    stage: ConversationStage,
    detail: String,
}

/// Result of starting a new conversation.
#[derive(Debug, Clone, Serialize)]
pub struct InitiationReport {
    pub session_id: String,
    pub greeting: String,
    pub conversation_stage: ConversationStage,
    pub next_expected_input: String,
}

/// The orchestrator at the top of the agent stack.
pub struct MasterAgent<C, E, V, R, H>
where
    C: ContextStore,
    E: ExternalServices,
    V: VerificationLedger,
    R: LetterRenderer,
    H: HistoryStore,
{
    sessions: Arc<SessionManager<C, E, V, R, H>>,
    calculator: LoanCalculator,
    failures: Mutex<HashMap<AgentKind, Vec<FailureRecord>>>,
}

impl<C, E, V, R, H> MasterAgent<C, E, V, R, H>
where
    C: ContextStore,
    E: ExternalServices,
    V: VerificationLedger,
    R: LetterRenderer,
    H: HistoryStore,
{
    pub fn new(sessions: Arc<SessionManager<C, E, V, R, H>>) -> Self {
        Self {
            sessions,
            calculator: LoanCalculator::new(),
            failures: Mutex::new(HashMap::new()),
        }
    }

    pub fn sessions(&self) -> &Arc<SessionManager<C, E, V, R, H>> {
        &self.sessions
    }

    /// Start a new conversation and send the personalized greeting.
    pub async fn initiate_conversation(
        &self,
        customer_id: Option<&str>,
        initial_message: Option<&str>,
    ) -> Result<InitiationReport, SessionError> {
        let context = self
            .sessions
            .start_session(customer_id.map(str::to_string))
            .await?;

        // Known customers get the returning-customer greeting; without a
        // CRM lookup at this point the placeholder name is used.
        let name = customer_id.map(|_| "Valued Customer");
        let greeting = conversation::personalized_greeting(name, false, initial_message);
        let full_greeting = format!("{} {}", greeting.message, greeting.follow_up);

        self.sessions
            .add_session_data(
                &context.session_id,
                "conversation_started",
                json!({
                    "timestamp": Utc::now().to_rfc3339(),
                    "customer_id": customer_id,
                    "initial_message": initial_message,
                    "greeting_sent": full_greeting,
                }),
            )
            .await?;

        tracing::info!(session_id = %context.session_id, "initiated conversation");
        Ok(InitiationReport {
            session_id: context.session_id,
            greeting: full_greeting,
            conversation_stage: ConversationStage::Initiation,
            next_expected_input: "customer_response_or_loan_interest".to_string(),
        })
    }

    /// Process one user turn: classify, pick an action, attempt the stage
    /// transition, and run the handler. Handler failures surface as a
    /// friendly processing-error response, never as an error.
    pub async fn process_user_message(
        &self,
        session_id: &str,
        message: &str,
    ) -> Result<MasterResponse, SessionError> {
        let context = self
            .sessions
            .get_session_context(session_id)
            .await
            .ok_or(SessionError::NotFound)?;

        let analysis = classify(message, context.conversation_stage);
        let (action, next_stage) = decide_action(context.conversation_stage, analysis.intent);
        tracing::info!(
            session_id,
            intent = ?analysis.intent,
            ?action,
            "processing user message"
        );

        self.attempt_transition(session_id, context.conversation_stage, next_stage)
            .await;

        let mut response = match self.execute_action(action, session_id, message).await {
            Ok(response) => response,
            Err(err) => {
                tracing::error!(session_id, "action handler failed: {err}");
                MasterResponse::text(
                    "I apologize, but I encountered an issue processing your message. Could you please try again?",
                    "error_handled",
                )
            }
        };
        response.tracking = Some(self.tracking_info(session_id, &analysis).await);
        Ok(response)
    }

    /// Run the validated transition path; invalid transitions are logged
    /// and skipped rather than failing the turn.
    async fn attempt_transition(
        &self,
        session_id: &str,
        current: ConversationStage,
        target: ConversationStage,
    ) {
        if current == target {
            return;
        }
        let Some(mut context) = self.sessions.get_session_context(session_id).await else {
            return;
        };
        match manage_transition(&mut context, target) {
            Ok(report) => {
                if let Err(err) = self.sessions.update_context(&context).await {
                    tracing::warn!(session_id, "failed to persist stage transition: {err}");
                }
                tracing::info!(session_id, from = %report.from, to = %report.to, "stage transition");
            }
            Err(err) => {
                tracing::warn!(session_id, "stage transition rejected: {err}");
            }
        }
    }

    async fn tracking_info(&self, session_id: &str, analysis: &IntentAnalysis) -> Value {
        match self.sessions.get_session_context(session_id).await {
            Some(ctx) => {
                let completion = stage_completion(&ctx);
                json!({
                    "intent": analysis.intent,
                    "confidence": analysis.confidence,
                    "conversation_stage": ctx.conversation_stage,
                    "stage_completion": completion,
                    "overall_progress": conversation_progress(ctx.conversation_stage),
                })
            }
            None => json!({"intent": analysis.intent, "confidence": analysis.confidence}),
        }
    }

    async fn execute_action(
        &self,
        action: Action,
        session_id: &str,
        message: &str,
    ) -> Result<MasterResponse, AgentError> {
        match action {
            Action::CollectInformation => Ok(self.collect_information()),
            Action::StartSales => self.start_sales(session_id).await,
            Action::StartVerification => self.start_verification(session_id).await,
            Action::StartUnderwriting => self.start_underwriting(session_id).await,
            Action::HandleObjection => self.handle_objection(session_id, message).await,
            Action::RequestDocuments => Ok(MasterResponse {
                upload_required: true,
                ..MasterResponse::text(
                    "To proceed with your loan application, I'll need you to upload your latest salary slip. Please use the upload button below.",
                    "document_upload_requested",
                )
            }),
            Action::GenerateSanctionLetter => self.generate_sanction_letter(session_id).await,
            Action::ProcessCompleteApplication => {
                self.process_complete_application(session_id, message).await
            }
            Action::ProvideInformation => Ok(MasterResponse::text(
                "We offer personal loans from \u{20b9}50,000 up to \u{20b9}20,00,000 with flexible tenures between 6 months and 10 years. Would you like to check the options available to you?",
                "information_provided",
            )),
            Action::ContinueConversation => Ok(MasterResponse::text(
                "I understand. Could you please provide more details so I can better assist you?",
                "conversation_continued",
            )),
        }
    }

    /// The structured information-collection form shown to the customer.
    fn collect_information(&self) -> MasterResponse {
        let form = json!({
            "form_type": "customer_information",
            "title": "Personal Loan Application - Basic Information",
            "fields": [
                {"name": "full_name", "label": "Full Name", "type": "text", "required": true,
                 "placeholder": "Enter your full name as per ID proof"},
                {"name": "age", "label": "Age", "type": "number", "required": true,
                 "min": 21, "max": 65, "placeholder": "Enter your age"},
                {"name": "city", "label": "City", "type": "text", "required": true,
                 "placeholder": "Enter your current city"},
                {"name": "phone", "label": "Mobile Number", "type": "tel", "required": true,
                 "placeholder": "Enter 10-digit mobile number"},
                {"name": "loan_amount", "label": "Loan Amount Required (\u{20b9})", "type": "number",
                 "required": true, "min": 50000, "max": 2000000, "step": 10000,
                 "placeholder": "Enter loan amount (minimum \u{20b9}50,000)"},
                {"name": "monthly_salary", "label": "Monthly Salary (\u{20b9})", "type": "number",
                 "required": true, "min": 15000, "placeholder": "Enter your monthly salary"},
                {"name": "employment_type", "label": "Employment Type", "type": "select",
                 "required": true, "options": [
                     {"value": "salaried", "label": "Salaried Employee"},
                     {"value": "self_employed", "label": "Self Employed"},
                     {"value": "business", "label": "Business Owner"}
                 ]},
            ],
            "submit_text": "Get Loan Options",
            "description": "Please fill in your details to get personalized loan options with competitive interest rates.",
        });

        MasterResponse {
            message_type: ResponseKind::Form,
            form: Some(form),
            ..MasterResponse::text(
                "Great! I'd be happy to help you with a personal loan. Please fill in the form below with your details so I can calculate the best loan options for you.",
                "information_collection_started",
            )
        }
    }

    /// Hand the conversation to the sales worker, falling back to canned
    /// options when delegation fails.
    async fn start_sales(&self, session_id: &str) -> Result<MasterResponse, AgentError> {
        let profile = self.customer_profile_value(session_id).await;
        let requested = profile
            .get("requested_amount")
            .and_then(Value::as_f64)
            .unwrap_or(100_000.0);

        let mut handoff = serde_json::Map::new();
        handoff.insert("customer_profile".to_string(), profile.clone());
        self.sessions
            .share_data_between_agents(session_id, AgentKind::Master, AgentKind::Sales, &handoff)
            .await
            .map_err(|e| AgentError::Storage(e.to_string()))?;

        let delegation = self
            .sessions
            .execute_agent_task(
                session_id,
                AgentKind::Sales,
                TaskKind::Sales,
                json!({"action": "start_negotiation", "requested_amount": requested}),
            )
            .await;

        let failure = match delegation {
            Ok(result) if result["negotiation_successful"] == json!(true) => {
                let presentation = result["presentation_message"].as_str().unwrap_or("");
                return Ok(MasterResponse {
                    message_type: ResponseKind::LoanOptions,
                    loan_options: Some(result["loan_options"].clone()),
                    customer_profile: Some(profile),
                    ..MasterResponse::text(
                        format!(
                            "Perfect! I've analyzed your profile and calculated some excellent loan options for you.\n\n{presentation}"
                        ),
                        "sales_process_started",
                    )
                });
            }
            Ok(_) => None,
            Err(err) => Some(err.to_string()),
        };

        if let Some(detail) = failure {
            self.handle_worker_failure(session_id, AgentKind::Sales, &detail)
                .await;
        }
        let options = self.fallback_loan_options(requested);
        Ok(MasterResponse {
            customer_profile: Some(profile),
            ..MasterResponse::text(
                format!(
                    "Perfect! Let me present you with some attractive loan options for \u{20b9}{requested:.0}:\n\n{options}\n\nWhich option interests you the most?"
                ),
                "sales_process_manual",
            )
        })
    }

    /// Kick off full KYC through the verification worker.
    async fn start_verification(&self, session_id: &str) -> Result<MasterResponse, AgentError> {
        let profile = self.customer_profile_value(session_id).await;
        let customer_id = profile
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or("GUEST_USER")
            .to_string();
        let phone = profile.get("phone").and_then(Value::as_str).unwrap_or("N/A");
        let city = profile.get("city").and_then(Value::as_str).unwrap_or("N/A");

        let input = json!({
            "verification_type": "full_kyc",
            "customer_id": customer_id,
            "provided_details": {
                "name": profile.get("name"),
                "phone": profile.get("phone"),
                "address": format!("{city}, India"),
                "age": profile.get("age"),
            },
        });

        let message = format!(
            "Excellent! Now I need to verify your details to proceed with your loan application.\n\
             I'm confirming your identity, validating your mobile number {phone}, and checking your location {city} against our records. This will take just a moment..."
        );

        match self
            .sessions
            .execute_agent_task(session_id, AgentKind::Verification, TaskKind::Verification, input)
            .await
        {
            Ok(result) => {
                let outcome = result["message"].as_str().unwrap_or("");
                Ok(MasterResponse {
                    customer_profile: Some(profile),
                    ..MasterResponse::text(
                        format!("{message}\n\n{outcome}"),
                        "verification_process_started",
                    )
                })
            }
            Err(err) => {
                self.handle_worker_failure(session_id, AgentKind::Verification, &err.to_string())
                    .await;
                Ok(MasterResponse::text(message, "verification_process_started"))
            }
        }
    }

    /// Run the underwriting worker against the negotiated (or default)
    /// terms and report the credit decision.
    async fn start_underwriting(&self, session_id: &str) -> Result<MasterResponse, AgentError> {
        let profile = self.customer_profile_value(session_id).await;
        let customer_id = profile
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or("GUEST_USER")
            .to_string();
        let requested = profile
            .get("requested_amount")
            .and_then(Value::as_f64)
            .unwrap_or(100_000.0);

        let selected = self.selected_loan_option(session_id).await;
        let tenure = selected
            .as_ref()
            .and_then(|o| o.get("tenure"))
            .and_then(Value::as_u64)
            .unwrap_or(60);
        let rate = selected
            .as_ref()
            .and_then(|o| o.get("interest_rate"))
            .and_then(Value::as_f64)
            .unwrap_or(12.0);

        let input = json!({
            "action": "full_underwriting",
            "customer_id": customer_id,
            "customer_profile": profile,
            "loan_application": {
                "requested_amount": requested,
                "tenure": tenure,
                "interest_rate": rate,
            },
        });

        match self
            .sessions
            .execute_agent_task(session_id, AgentKind::Underwriting, TaskKind::Underwriting, input)
            .await
        {
            Ok(result) => {
                self.sessions
                    .add_session_data(session_id, "credit_check_done", json!(true))
                    .await
                    .map_err(|e| AgentError::Storage(e.to_string()))?;

                let credit_score = result["credit_score"].as_i64().unwrap_or(0);
                let decision_message = result["message"].as_str().unwrap_or("").to_string();
                let approved = result["approved"] == json!(true);
                Ok(MasterResponse {
                    loan_approved: Some(approved),
                    customer_profile: Some(profile),
                    ..MasterResponse::text(
                        format!(
                            "Credit check complete. Your credit score is {credit_score}/900.\n\n{decision_message}"
                        ),
                        "credit_check_completed",
                    )
                })
            }
            Err(err) => {
                self.handle_worker_failure(session_id, AgentKind::Underwriting, &err.to_string())
                    .await;
                Ok(MasterResponse::text(
                    "Great! Let me quickly assess your loan eligibility based on our criteria. I'll be back with a decision shortly.",
                    "underwriting_process_started",
                ))
            }
        }
    }

    /// Route a sales objection to the sales worker.
    async fn handle_objection(
        &self,
        session_id: &str,
        objection: &str,
    ) -> Result<MasterResponse, AgentError> {
        let result = self
            .sessions
            .execute_agent_task(
                session_id,
                AgentKind::Sales,
                TaskKind::Sales,
                json!({"action": "handle_objection", "objection": objection}),
            )
            .await;

        match result {
            Ok(outcome) => {
                let response = outcome["response_message"]
                    .as_str()
                    .unwrap_or("I understand your concern. Let me see what alternatives I can offer you.")
                    .to_string();
                Ok(MasterResponse {
                    loan_options: Some(outcome["alternative_options"].clone()),
                    ..MasterResponse::text(response, "objection_handled")
                })
            }
            Err(err) => {
                self.handle_worker_failure(session_id, AgentKind::Sales, &err.to_string())
                    .await;
                Ok(MasterResponse::text(
                    "I understand your concern. Let me see what alternatives I can offer you.",
                    "objection_handled",
                ))
            }
        }
    }

    /// Generate the sanction letter for an approved loan.
    async fn generate_sanction_letter(
        &self,
        session_id: &str,
    ) -> Result<MasterResponse, AgentError> {
        let profile = self.customer_profile_value(session_id).await;
        let name = profile
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("Valued Customer")
            .to_string();

        match self
            .sessions
            .execute_agent_task(
                session_id,
                AgentKind::Sanction,
                TaskKind::GenerateSanctionLetter,
                json!({"customer_profile": profile}),
            )
            .await
        {
            Ok(result) => {
                let message = result["message"].as_str().unwrap_or("").to_string();
                Ok(MasterResponse {
                    message_type: ResponseKind::DownloadLink,
                    download_link: result["download_link"].as_str().map(str::to_string),
                    filename: result["filename"].as_str().map(str::to_string),
                    loan_approved: Some(true),
                    ..MasterResponse::text(
                        format!(
                            "{message}\n\nNext steps: download your sanction letter using the link below, complete the disbursement process, and the funds will be transferred to your account."
                        ),
                        "sanction_letter_generated",
                    )
                })
            }
            Err(err) => {
                self.handle_worker_failure(session_id, AgentKind::Sanction, &err.to_string())
                    .await;
                Ok(MasterResponse {
                    loan_approved: Some(true),
                    ..MasterResponse::text(
                        format!(
                            "Congratulations {name}! Your personal loan has been approved. Your sanction letter is being prepared and will be emailed to you within 24 hours."
                        ),
                        "sanction_letter_generation_failed",
                    )
                })
            }
        }
    }

    /// One-shot path: a single message carried the whole application.
    /// Extract the profile, underwrite, and, on approval, generate the
    /// letter immediately.
    async fn process_complete_application(
        &self,
        session_id: &str,
        message: &str,
    ) -> Result<MasterResponse, AgentError> {
        let profile = extract_profile_from_message(message);
        let name = profile
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("Valued Customer")
            .to_string();
        let requested = profile
            .get("requested_amount")
            .and_then(Value::as_f64)
            .unwrap_or(300_000.0);

        self.sessions
            .add_session_data(session_id, "customer_profile", profile.clone())
            .await
            .map_err(|e| AgentError::Storage(e.to_string()))?;
        tracing::info!(session_id, customer = %name, "processing complete application");

        let underwriting = self.start_underwriting(session_id).await?;

        let approved = self
            .sessions
            .get_session_data(session_id, "loan_approved")
            .await;
        match approved.as_ref().and_then(Value::as_bool) {
            Some(true) => {
                let sanction = self.generate_sanction_letter(session_id).await?;
                if sanction.download_link.is_some() {
                    Ok(MasterResponse {
                        message_type: ResponseKind::DownloadLink,
                        download_link: sanction.download_link,
                        filename: sanction.filename,
                        loan_approved: Some(true),
                        customer_profile: Some(profile),
                        ..MasterResponse::text(
                            format!(
                                "Congratulations {name}! Your personal loan of \u{20b9}{requested:.0} has been approved.\n\n{}",
                                sanction.response
                            ),
                            "complete_application_approved",
                        )
                    })
                } else {
                    Ok(MasterResponse {
                        loan_approved: Some(true),
                        customer_profile: Some(profile),
                        ..MasterResponse::text(
                            format!(
                                "Congratulations {name}! Your personal loan of \u{20b9}{requested:.0} has been approved. Your sanction letter is being prepared and will be emailed to you within 24 hours."
                            ),
                            "complete_application_approved_no_pdf",
                        )
                    })
                }
            }
            Some(false) => Ok(MasterResponse {
                loan_approved: Some(false),
                customer_profile: Some(profile),
                ..MasterResponse::text(
                    format!(
                        "Thank you {name} for your loan application. After careful review, we're unable to approve your loan request at this time based on our current lending criteria. We encourage you to improve your credit score, consider a smaller loan amount, or apply again after 6 months."
                    ),
                    "complete_application_rejected",
                )
            }),
            None => Ok(MasterResponse {
                customer_profile: Some(profile),
                ..MasterResponse::text(
                    format!(
                        "Thank you {name} for providing your complete application details. I'm processing your information through credit assessment, income verification, and risk evaluation, and will get back to you shortly with a decision.\n\n{}",
                        underwriting.response
                    ),
                    "complete_application_processing",
                )
            }),
        }
    }

    /// Close the conversation with a summary and end the session.
    pub async fn complete_conversation(
        &self,
        session_id: &str,
        kind: CompletionKind,
        summary_data: Value,
    ) -> Result<MasterResponse, SessionError> {
        let context = self
            .sessions
            .get_session_context(session_id)
            .await
            .ok_or(SessionError::NotFound)?;

        let name = summary_data
            .get("customer_name")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| {
                context
                    .data_value("customer_profile")
                    .and_then(|p| p.get("name"))
                    .and_then(Value::as_str)
                    .map(str::to_string)
            });
        let amount = summary_data
            .get("amount")
            .and_then(Value::as_f64)
            .or_else(|| {
                context
                    .data_value("approved_loan")
                    .and_then(|l| l.get("amount"))
                    .and_then(Value::as_f64)
            });

        let (closure, follow_up) = conversation::closure_message(kind, name.as_deref(), amount);
        let summary = format!("{closure} {follow_up}");

        self.sessions
            .add_session_data(
                session_id,
                "conversation_completion",
                json!({
                    "completion_type": kind,
                    "summary": summary,
                    "completed_at": Utc::now().to_rfc3339(),
                    "summary_data": summary_data,
                }),
            )
            .await?;
        self.sessions.end_session(session_id).await?;

        tracing::info!(session_id, ?kind, "completed conversation");
        Ok(MasterResponse::text(summary, "conversation_completed"))
    }

    /// Handle an inactivity timeout: log it, move to error handling, and
    /// either restart or close depending on the stage.
    pub async fn handle_conversation_timeout(
        &self,
        session_id: &str,
    ) -> Result<MasterResponse, SessionError> {
        let mut context = self
            .sessions
            .get_session_context(session_id)
            .await
            .ok_or(SessionError::NotFound)?;

        let report = conversation::handle_timeout(&mut context);
        self.sessions.update_context(&context).await?;
        self.sessions
            .set_stage(session_id, ConversationStage::ErrorHandling)
            .await?;

        match report.recovery {
            TimeoutRecovery::RestartConversation => {
                self.sessions
                    .set_stage(session_id, ConversationStage::Initiation)
                    .await?;
            }
            TimeoutRecovery::CloseConversation => {
                self.complete_conversation(
                    session_id,
                    CompletionKind::Cancelled,
                    json!({"reason": "timeout"}),
                )
                .await?;
            }
            TimeoutRecovery::ResumeFromCurrentStage => {}
        }

        tracing::info!(session_id, recovery = ?report.recovery, "handled conversation timeout");
        Ok(MasterResponse::text(report.message, "timeout_handled"))
    }

    /// Absorb a worker failure: record it, run the error service, execute
    /// the recovery plan, and reroute the conversation.
    pub async fn handle_worker_failure(
        &self,
        session_id: &str,
        failed_agent: AgentKind,
        detail: &str,
    ) -> Value {
        let stage = self
            .sessions
            .get_session_context(session_id)
            .await
            .map(|c| c.conversation_stage)
            .unwrap_or(ConversationStage::ErrorHandling);

        let failure_count = {
            let mut failures = self.failures.lock().expect("failure log lock poisoned");
            let records = failures.entry(failed_agent).or_default();
            records.push(FailureRecord {
                at: Utc::now(),
                session_id: session_id.to_string(),
                stage,
                detail: detail.to_string(),
            });
            records.len()
        };

        let outcome = self.sessions.reporter().handle_agent_error(
            failed_agent,
            "master_delegation",
            detail,
            Some(session_id),
            None,
        );
        let escalation_needed =
            failure_count >= ESCALATION_THRESHOLD || outcome.escalation_required;

        use crate::errors::RecoveryAction::*;
        let mut actions_executed: Vec<String> = Vec::new();
        for action in &outcome.recovery_actions {
            match action {
                RestartAgent => {
                    let restarted = self.sessions.restart_agent(session_id, failed_agent).await;
                    actions_executed.push(format!("restart_agent: {restarted}"));
                }
                RetryTask | ResetTask => {
                    actions_executed.push("retry_task: queued".to_string());
                }
                UseAlternativeAgent => {
                    let switched = self
                        .switch_to_alternative(session_id, failed_agent, stage)
                        .await;
                    actions_executed.push(format!("alternative_agent: {switched}"));
                }
                FallbackToManual => {
                    let _ = self
                        .sessions
                        .add_session_data(
                            session_id,
                            "manual_process_required",
                            json!({
                                "failed_agent": failed_agent.to_string(),
                                "requires_manual_intervention": true,
                                "timestamp": Utc::now().to_rfc3339(),
                                "conversation_stage": stage,
                            }),
                        )
                        .await;
                    actions_executed.push("manual_fallback: recorded".to_string());
                }
                NotifyCustomer => {
                    let _ = self
                        .sessions
                        .add_session_data(
                            session_id,
                            "customer_notification",
                            json!({
                                "message": outcome.customer_message,
                                "timestamp": Utc::now().to_rfc3339(),
                                "type": "error_recovery_notification",
                            }),
                        )
                        .await;
                    actions_executed.push("customer_notified: true".to_string());
                }
                _ => {}
            }
        }

        if escalation_needed {
            let _ = self
                .sessions
                .add_session_data(
                    session_id,
                    "escalation_required",
                    json!({
                        "failed_agent": failed_agent.to_string(),
                        "error_summary": outcome.customer_message,
                        "escalation_timestamp": Utc::now().to_rfc3339(),
                        "failure_count": failure_count,
                        "requires_human_intervention": true,
                    }),
                )
                .await;
            let _ = self
                .sessions
                .set_stage(session_id, ConversationStage::ErrorHandling)
                .await;
        } else if let Some(alternative) = alternative_stage(failed_agent, stage) {
            let _ = self.sessions.set_stage(session_id, alternative).await;
        }

        tracing::warn!(
            session_id,
            agent = %failed_agent,
            failure_count,
            escalation_needed,
            "handled worker failure"
        );

        json!({
            "error_handled": true,
            "customer_message": outcome.customer_message,
            "escalation_required": escalation_needed,
            "failure_count": failure_count,
            "actions_executed": actions_executed,
        })
    }

    async fn switch_to_alternative(
        &self,
        session_id: &str,
        failed_agent: AgentKind,
        stage: ConversationStage,
    ) -> bool {
        // The master takes over at the stage preceding the failure.
        match alternative_stage(failed_agent, stage) {
            Some(alternative) => self
                .sessions
                .switch_agent(session_id, AgentKind::Master, alternative)
                .await
                .is_ok(),
            None => false,
        }
    }

    /// Failure-based health snapshot per worker agent type.
    pub fn worker_agent_health(&self) -> HashMap<String, Value> {
        let failures = self.failures.lock().expect("failure log lock poisoned");
        let now = Utc::now();

        [
            AgentKind::Sales,
            AgentKind::Verification,
            AgentKind::Underwriting,
            AgentKind::Sanction,
        ]
        .into_iter()
        .map(|kind| {
            let records = failures.get(&kind).map(Vec::as_slice).unwrap_or(&[]);
            let recent = records
                .iter()
                .filter(|r| (now - r.at).num_seconds() < RECENT_FAILURE_WINDOW_SECS)
                .count();
            let status = if recent < 3 {
                "healthy"
            } else if recent < 5 {
                "degraded"
            } else {
                "critical"
            };
            let last_failure = records.last().map(|r| {
                json!({
                    "at": r.at.to_rfc3339(),
                    "session_id": r.session_id,
                    "stage": r.stage,
                    "detail": r.detail,
                })
            });
            (
                kind.to_string(),
                json!({
                    "total_failures": records.len(),
                    "recent_failures": recent,
                    "health_score": 100_i64.saturating_sub(recent as i64 * 20).max(0),
                    "status": status,
                    "escalation_needed": records.len() >= ESCALATION_THRESHOLD,
                    "last_failure": last_failure,
                }),
            )
        })
        .collect()
    }

    /// The customer profile as currently known to the session: the stored
    /// profile if one exists, otherwise assembled from form data or the
    /// customer-details text, with walk-in defaults.
    async fn customer_profile_value(&self, session_id: &str) -> Value {
        let context = self.sessions.get_session_context(session_id).await;
        let Some(context) = context else {
            return default_profile_value(None);
        };

        if let Some(profile) = context.data_value("customer_profile") {
            return merge_profile_defaults(profile, context.customer_id.as_deref());
        }
        if let Some(form) = context.data_value("form_data") {
            return profile_from_form(form, context.customer_id.as_deref());
        }
        if let Some(details) = context.data_value("customer_details").and_then(Value::as_str) {
            return profile_from_details_text(details, context.customer_id.as_deref());
        }
        default_profile_value(context.customer_id.as_deref())
    }

    /// Terms the customer picked during negotiation, if any.
    async fn selected_loan_option(&self, session_id: &str) -> Option<Value> {
        let context = self.sessions.get_session_context(session_id).await?;
        context
            .data_value("finalized_terms")
            .filter(|v| v.is_object() && !v.as_object().is_some_and(|o| o.is_empty()))
            .cloned()
            .or_else(|| context.data_value("selected_loan_option").cloned())
            .or_else(|| {
                context
                    .data_value("loan_options")
                    .and_then(Value::as_array)
                    .and_then(|a| a.first().cloned())
            })
    }

    /// Three canned tenure/rate combinations used when sales delegation
    /// fails.
    fn fallback_loan_options(&self, amount: f64) -> String {
        let combos = [(12.5, 36u32, "Quick Repayment"), (13.5, 60, "Balanced"), (14.5, 84, "Lower EMI")];
        let mut text = format!("Loan options for \u{20b9}{amount:.0}:\n");
        for (i, (rate, tenure, label)) in combos.iter().enumerate() {
            let emi = self.calculator.emi(amount, *rate, *tenure).unwrap_or(amount / *tenure as f64);
            let marker = if i == 1 { " (recommended)" } else { "" };
            text.push_str(&format!(
                "Option {} - {label}{marker}: EMI \u{20b9}{emi:.0} for {tenure} months at {rate}% per annum, total \u{20b9}{:.0}\n",
                i + 1,
                emi * *tenure as f64
            ));
        }
        text
    }
}

/// Where the conversation falls back to when an agent fails mid-stage.
fn alternative_stage(
    failed_agent: AgentKind,
    stage: ConversationStage,
) -> Option<ConversationStage> {
    match (failed_agent, stage) {
        (AgentKind::Sales, ConversationStage::SalesNegotiation) => {
            Some(ConversationStage::InformationCollection)
        }
        (AgentKind::Verification, ConversationStage::Verification) => {
            Some(ConversationStage::SalesNegotiation)
        }
        (AgentKind::Underwriting, ConversationStage::Underwriting) => {
            Some(ConversationStage::Verification)
        }
        (AgentKind::Sanction, ConversationStage::SanctionGeneration) => {
            Some(ConversationStage::Underwriting)
        }
        _ => None,
    }
}

const KNOWN_CITIES: [&str; 8] = [
    "bangalore", "banglore", "mumbai", "delhi", "chennai", "kolkata", "pune", "hyderabad",
];

fn default_profile_value(customer_id: Option<&str>) -> Value {
    json!({
        "id": customer_id.unwrap_or("GUEST_USER"),
        "name": "Valued Customer",
        "age": 25,
        "city": "Bangalore",
        "phone": "9876543210",
        "address": "Bangalore, Karnataka",
        "credit_score": 750,
        "pre_approved_limit": 500000.0,
        "employment_type": "salaried",
        "salary": 50000.0,
        "requested_amount": 100000.0,
    })
}

/// Overlay a stored profile onto the walk-in defaults so downstream
/// consumers always see a complete record.
fn merge_profile_defaults(profile: &Value, customer_id: Option<&str>) -> Value {
    let mut merged = default_profile_value(customer_id);
    if let (Some(base), Some(overlay)) = (merged.as_object_mut(), profile.as_object()) {
        for (key, value) in overlay {
            if !value.is_null() {
                base.insert(key.clone(), value.clone());
            }
        }
    }
    merged
}

/// Decode a submitted information form. The client sometimes nests the
/// payload (`{form_data: {...}}` or `{value: {form_data: {...}}}`), so
/// unwrap before reading fields.
fn profile_from_form(form: &Value, customer_id: Option<&str>) -> Value {
    let mut inner = form;
    if let Some(nested) = inner.get("value") {
        inner = nested;
    }
    if let Some(nested) = inner.get("form_data") {
        inner = nested;
    }

    let number = |key: &str| -> Option<f64> {
        match inner.get(key) {
            Some(Value::Number(n)) => n.as_f64(),
            Some(Value::String(s)) => s.replace([',', ' '], "").parse().ok(),
            _ => None,
        }
    };

    let mut profile = default_profile_value(customer_id);
    let base = profile.as_object_mut().expect("default profile is an object");
    if let Some(name) = inner.get("full_name").and_then(Value::as_str) {
        base.insert("name".to_string(), json!(name));
    }
    if let Some(age) = number("age") {
        base.insert("age".to_string(), json!(age as u32));
    }
    if let Some(city) = inner.get("city").and_then(Value::as_str) {
        base.insert("city".to_string(), json!(city));
        base.insert("address".to_string(), json!(format!("{city}, India")));
    }
    if let Some(phone) = inner.get("phone").and_then(Value::as_str) {
        base.insert("phone".to_string(), json!(phone));
    }
    if let Some(salary) = number("monthly_salary") {
        base.insert("salary".to_string(), json!(salary));
    }
    if let Some(employment) = inner.get("employment_type").and_then(Value::as_str) {
        base.insert("employment_type".to_string(), json!(employment));
    }
    if let Some(amount) = number("loan_amount") {
        base.insert("requested_amount".to_string(), json!(amount));
    }
    profile
}

/// Parse a `key: value` style customer-details line.
fn profile_from_details_text(details: &str, customer_id: Option<&str>) -> Value {
    let lower = details.to_lowercase();
    let mut profile = default_profile_value(customer_id);
    let base = profile.as_object_mut().expect("default profile is an object");

    if let Some(name) = text_after(details, &["name:"]) {
        base.insert("name".to_string(), json!(name));
    }
    if let Some(age) = number_after(&lower, &["age"]) {
        base.insert("age".to_string(), json!(age as u32));
    }
    if let Some(city) = text_after(details, &["city:"]) {
        base.insert("city".to_string(), json!(title_case(&city)));
    }
    if let Some(amount) = number_after(&lower, &["loan amount", "amount"]) {
        base.insert("requested_amount".to_string(), json!(amount));
    }
    profile
}

/// Extract a customer profile from a free-text comprehensive application.
pub fn extract_profile_from_message(message: &str) -> Value {
    let lower = message.to_lowercase();

    let mut profile = default_profile_value(None);
    let base = profile.as_object_mut().expect("default profile is an object");
    base.insert("age".to_string(), json!(30));
    base.insert("salary".to_string(), json!(60_000.0));
    base.insert("requested_amount".to_string(), json!(300_000.0));

    if let Some(name) = text_after(message, &["my name is", "name is", "name:", "i am"]) {
        base.insert("name".to_string(), json!(title_case(&name)));
    }
    if let Some(age) = number_after(&lower, &["age"]).filter(|a| (18.0..100.0).contains(a)) {
        base.insert("age".to_string(), json!(age as u32));
    }
    if let Some(salary) = number_after(&lower, &["salary", "income", "earn"]) {
        base.insert("salary".to_string(), json!(salary));
    }
    if lower.contains("business") || lower.contains("self employed") {
        base.insert("employment_type".to_string(), json!("self_employed"));
    }
    if let Some(score) = number_after(&lower, &["credit score", "cibil"]) {
        base.insert("credit_score".to_string(), json!(score as i64));
    }
    if let Some(amount) =
        number_after(&lower, &["loan of", "loan for", "loan amount", "amount", "need", "want", "borrow"])
            .filter(|a| *a >= 10_000.0)
    {
        base.insert("requested_amount".to_string(), json!(amount));
    }
    for city in KNOWN_CITIES {
        if lower.contains(city) {
            let city = title_case(city);
            base.insert("address".to_string(), json!(format!("{city}, India")));
            base.insert("city".to_string(), json!(city));
            break;
        }
    }
    profile
}

/// First number following any of the keys (skipping separators, currency
/// marks, and digit-group commas).
fn number_after(lower: &str, keys: &[&str]) -> Option<f64> {
    for key in keys {
        let Some(pos) = lower.find(key) else { continue };
        let tail = &lower[pos + key.len()..];
        let mut digits = String::new();
        for (i, c) in tail.char_indices() {
            if c.is_ascii_digit() {
                digits.push(c);
            } else if !digits.is_empty() {
                if c == ',' {
                    continue;
                }
                break;
            } else if i > 24 {
                break;
            } else if c == ',' || c == ':' || c == ' ' || c == '\u{20b9}' || c == '.'
                || c == 'r' || c == 's' || c == 'i' || c == 'o' || c == 'f'
            {
                // separators and "rs"/"is"/"of" filler between key and value
                continue;
            } else {
                break;
            }
        }
        if !digits.is_empty() {
            if let Ok(value) = digits.parse::<f64>() {
                return Some(value);
            }
        }
    }
    None
}

/// Words following any of the keys, up to the first comma, newline, digit,
/// or a field keyword.
fn text_after(message: &str, keys: &[&str]) -> Option<String> {
    let lower = message.to_lowercase();
    for key in keys {
        let Some(pos) = lower.find(key) else { continue };
        let tail = &message[pos + key.len()..];
        let mut collected = String::new();
        for c in tail.chars() {
            if c == ',' || c == '\n' || c == '.' || c.is_ascii_digit() {
                break;
            }
            collected.push(c);
        }
        let trimmed = collected.trim().trim_end_matches(':');
        // Stop before the next labelled field ("age", "city", ...).
        let cleaned: Vec<&str> = trimmed
            .split_whitespace()
            .take_while(|word| {
                !matches!(
                    word.to_lowercase().as_str(),
                    "age" | "city" | "salary" | "income" | "phone" | "and" | "from"
                )
            })
            .collect();
        if !cleaned.is_empty() {
            return Some(cleaned.join(" "));
        }
    }
    None
}

fn title_case(text: &str) -> String {
    text.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::agent::engine::EngineConfig;
    use crate::agent::sanction::tests::StubRenderer;
    use crate::agent::underwriting::tests::StubHistory;
    use crate::agent::verification::tests::{StubGateway, StubLedger};
    use crate::errors::ErrorReporter;
    use crate::session::tests::MemoryStore;

    type TestMaster =
        MasterAgent<MemoryStore, StubGateway, StubLedger, StubRenderer, StubHistory>;

    fn master_with(gateway: StubGateway) -> TestMaster {
        let sessions = SessionManager::new(
            Arc::new(MemoryStore::default()),
            Arc::new(gateway),
            Arc::new(StubLedger::default()),
            Arc::new(StubRenderer::default()),
            Arc::new(StubHistory::default()),
            Arc::new(ErrorReporter::new()),
            EngineConfig {
                backoff_unit_ms: 0,
                ..EngineConfig::default()
            },
        );
        MasterAgent::new(Arc::new(sessions))
    }

    fn master() -> TestMaster {
        master_with(StubGateway::default())
    }

    #[test]
    fn test_action_table_entries() {
        assert_eq!(
            decide_action(ConversationStage::Initiation, Intent::LoanInterest),
            (Action::CollectInformation, ConversationStage::InformationCollection)
        );
        assert_eq!(
            decide_action(ConversationStage::SalesNegotiation, Intent::Agreement),
            (Action::StartVerification, ConversationStage::Verification)
        );
        assert_eq!(
            decide_action(ConversationStage::SalesNegotiation, Intent::Objection),
            (Action::HandleObjection, ConversationStage::SalesNegotiation)
        );
        assert_eq!(
            decide_action(ConversationStage::Underwriting, Intent::DocumentRelated),
            (Action::RequestDocuments, ConversationStage::DocumentUpload)
        );
        assert_eq!(
            decide_action(ConversationStage::Underwriting, Intent::SanctionLetterRequest),
            (Action::GenerateSanctionLetter, ConversationStage::SanctionGeneration)
        );
    }

    #[test]
    fn test_action_table_default_keeps_stage() {
        assert_eq!(
            decide_action(ConversationStage::Completion, Intent::LoanInterest),
            (Action::ContinueConversation, ConversationStage::Completion)
        );
        assert_eq!(
            decide_action(ConversationStage::Verification, Intent::Objection),
            (Action::ContinueConversation, ConversationStage::Verification)
        );
    }

    #[tokio::test]
    async fn test_initiate_conversation_greets_and_records() {
        let master = master();
        let report = master
            .initiate_conversation(Some("CUST001"), Some("I need a loan"))
            .await
            .unwrap();
        assert_eq!(report.conversation_stage, ConversationStage::Initiation);
        assert!(report.greeting.contains("Valued Customer"));

        let ctx = master
            .sessions()
            .get_session_context(&report.session_id)
            .await
            .unwrap();
        assert!(ctx.collected_data.contains_key("conversation_started"));
    }

    #[tokio::test]
    async fn test_unknown_session_is_an_error() {
        let master = master();
        let err = master.process_user_message("no_such_session", "hello").await;
        assert!(matches!(err, Err(SessionError::NotFound)));
    }

    #[tokio::test]
    async fn test_loan_interest_shows_form() {
        let master = master();
        let report = master.initiate_conversation(None, None).await.unwrap();
        let response = master
            .process_user_message(&report.session_id, "I want to borrow some money")
            .await
            .unwrap();
        assert_eq!(response.message_type, ResponseKind::Form);
        assert!(response.form.is_some());
        assert_eq!(response.action_taken, "information_collection_started");

        let ctx = master
            .sessions()
            .get_session_context(&report.session_id)
            .await
            .unwrap();
        assert_eq!(ctx.conversation_stage, ConversationStage::InformationCollection);
    }

    #[tokio::test]
    async fn test_form_submission_starts_sales_with_options() {
        let master = master();
        let report = master.initiate_conversation(None, None).await.unwrap();
        master
            .sessions()
            .set_stage(&report.session_id, ConversationStage::InformationCollection)
            .await
            .unwrap();
        master
            .sessions()
            .add_session_data(
                &report.session_id,
                "form_data",
                json!({"full_name": "Priya Sharma", "age": "29", "city": "Pune",
                       "monthly_salary": "90,000", "loan_amount": "400000"}),
            )
            .await
            .unwrap();

        let response = master
            .process_user_message(&report.session_id, "form submitted")
            .await
            .unwrap();
        assert_eq!(response.message_type, ResponseKind::LoanOptions);
        assert!(response.loan_options.is_some());
        let profile = response.customer_profile.unwrap();
        assert_eq!(profile["name"], json!("Priya Sharma"));
        assert_eq!(profile["requested_amount"], json!(400_000.0));

        let ctx = master
            .sessions()
            .get_session_context(&report.session_id)
            .await
            .unwrap();
        assert_eq!(ctx.conversation_stage, ConversationStage::SalesNegotiation);
        assert!(ctx.collected_data.contains_key("loan_options"));
    }

    #[tokio::test]
    async fn test_instant_approval_end_to_end() {
        // requested 300k against a 500k limit at credit 785: the instant
        // approval path reaches sanction generation without documents.
        let master = master_with(StubGateway {
            credit_score: 785,
            pre_approved_limit: 500_000.0,
            ..StubGateway::default()
        });
        let report = master.initiate_conversation(Some("CUST001"), None).await.unwrap();
        master
            .sessions()
            .add_session_data(
                &report.session_id,
                "customer_profile",
                json!({"name": "Ajay Kumar", "salary": 80000.0, "requested_amount": 300000.0}),
            )
            .await
            .unwrap();
        master
            .sessions()
            .set_stage(&report.session_id, ConversationStage::Verification)
            .await
            .unwrap();

        let response = master
            .process_user_message(&report.session_id, "verification complete, please proceed")
            .await
            .unwrap();
        assert_eq!(response.action_taken, "credit_check_completed");
        assert_eq!(response.loan_approved, Some(true));
        assert!(response.response.contains("785"));

        let ctx = master
            .sessions()
            .get_session_context(&report.session_id)
            .await
            .unwrap();
        assert_eq!(ctx.conversation_stage, ConversationStage::Underwriting);
        assert_eq!(ctx.data_value("loan_approved"), Some(&json!(true)));
        assert!(ctx.collected_data.contains_key("approved_loan"));

        // Asking for the letter moves to sanction generation, no upload.
        let letter = master
            .process_user_message(&report.session_id, "please generate my sanction letter")
            .await
            .unwrap();
        assert_eq!(letter.message_type, ResponseKind::DownloadLink);
        assert!(letter
            .download_link
            .unwrap()
            .starts_with("/api/documents/download/sanction-letter/"));

        let ctx = master
            .sessions()
            .get_session_context(&report.session_id)
            .await
            .unwrap();
        assert_eq!(ctx.conversation_stage, ConversationStage::SanctionGeneration);
        assert!(!ctx.collected_data.contains_key("salary_slip_uploaded"));
    }

    #[tokio::test]
    async fn test_comprehensive_application_approves_in_one_turn() {
        let master = master_with(StubGateway {
            credit_score: 785,
            pre_approved_limit: 500_000.0,
            ..StubGateway::default()
        });
        let report = master.initiate_conversation(None, None).await.unwrap();

        let response = master
            .process_user_message(
                &report.session_id,
                "I want to apply for a personal loan of 300000. My name is Ajay Kumar, age 32, salary \u{20b9}80000, working as a software engineer in Bangalore",
            )
            .await
            .unwrap();
        assert_eq!(response.action_taken, "complete_application_approved");
        assert_eq!(response.loan_approved, Some(true));
        assert_eq!(response.message_type, ResponseKind::DownloadLink);
        let profile = response.customer_profile.unwrap();
        assert_eq!(profile["name"], json!("Ajay Kumar"));
        assert_eq!(profile["city"], json!("Bangalore"));
    }

    #[tokio::test]
    async fn test_comprehensive_application_rejection_path() {
        let master = master_with(StubGateway {
            credit_score: 590,
            pre_approved_limit: 500_000.0,
            ..StubGateway::default()
        });
        let report = master.initiate_conversation(None, None).await.unwrap();

        let response = master
            .process_user_message(
                &report.session_id,
                "I need a personal loan. My name is Rajesh, age 40, salary rs 50000, working at a company, amount 300000",
            )
            .await
            .unwrap();
        assert_eq!(response.action_taken, "complete_application_rejected");
        assert_eq!(response.loan_approved, Some(false));
        assert!(response.response.contains("unable to approve"));
    }

    #[tokio::test]
    async fn test_objection_routes_to_sales() {
        let master = master();
        let report = master.initiate_conversation(None, None).await.unwrap();
        master
            .sessions()
            .add_session_data(
                &report.session_id,
                "customer_profile",
                json!({"salary": 80000.0, "requested_amount": 300000.0}),
            )
            .await
            .unwrap();
        master
            .sessions()
            .set_stage(&report.session_id, ConversationStage::SalesNegotiation)
            .await
            .unwrap();

        let response = master
            .process_user_message(&report.session_id, "but the emi is too high for me")
            .await
            .unwrap();
        assert_eq!(response.action_taken, "objection_handled");

        let ctx = master
            .sessions()
            .get_session_context(&report.session_id)
            .await
            .unwrap();
        assert_eq!(ctx.conversation_stage, ConversationStage::SalesNegotiation);
    }

    #[tokio::test]
    async fn test_worker_failure_escalates_at_threshold() {
        let master = master();
        let report = master.initiate_conversation(None, None).await.unwrap();

        for expected in 1..ESCALATION_THRESHOLD {
            let outcome = master
                .handle_worker_failure(&report.session_id, AgentKind::Underwriting, "boom")
                .await;
            assert_eq!(outcome["failure_count"], json!(expected));
            assert_eq!(outcome["escalation_required"], json!(false));
        }

        let outcome = master
            .handle_worker_failure(&report.session_id, AgentKind::Underwriting, "boom")
            .await;
        assert_eq!(outcome["escalation_required"], json!(true));

        let ctx = master
            .sessions()
            .get_session_context(&report.session_id)
            .await
            .unwrap();
        assert_eq!(ctx.conversation_stage, ConversationStage::ErrorHandling);
        assert!(ctx.collected_data.contains_key("escalation_required"));

        let health = master.worker_agent_health();
        assert_eq!(health["underwriting"]["escalation_needed"], json!(true));
        assert_eq!(health["underwriting"]["status"], json!("degraded"));
        assert_eq!(health["sales"]["health_score"], json!(100));
    }

    #[tokio::test]
    async fn test_failure_before_threshold_moves_to_alternative_stage() {
        let master = master();
        let report = master.initiate_conversation(None, None).await.unwrap();
        master
            .sessions()
            .set_stage(&report.session_id, ConversationStage::Underwriting)
            .await
            .unwrap();

        master
            .handle_worker_failure(&report.session_id, AgentKind::Underwriting, "bureau down")
            .await;

        let ctx = master
            .sessions()
            .get_session_context(&report.session_id)
            .await
            .unwrap();
        assert_eq!(ctx.conversation_stage, ConversationStage::Verification);
    }

    #[tokio::test]
    async fn test_complete_conversation_summarizes_and_ends() {
        let master = master();
        let report = master.initiate_conversation(None, None).await.unwrap();
        master
            .sessions()
            .add_session_data(
                &report.session_id,
                "approved_loan",
                json!({"amount": 300000.0}),
            )
            .await
            .unwrap();

        let response = master
            .complete_conversation(
                &report.session_id,
                CompletionKind::Approved,
                json!({"customer_name": "Ajay"}),
            )
            .await
            .unwrap();
        assert!(response.response.contains("Ajay"));
        assert!(response.response.contains("300000"));

        let ctx = master
            .sessions()
            .get_session_context(&report.session_id)
            .await
            .unwrap();
        assert_eq!(ctx.conversation_stage, ConversationStage::Completion);
    }

    #[tokio::test]
    async fn test_timeout_in_initiation_restarts() {
        let master = master();
        let report = master.initiate_conversation(None, None).await.unwrap();

        let response = master
            .handle_conversation_timeout(&report.session_id)
            .await
            .unwrap();
        assert_eq!(response.action_taken, "timeout_handled");

        let ctx = master
            .sessions()
            .get_session_context(&report.session_id)
            .await
            .unwrap();
        assert_eq!(ctx.conversation_stage, ConversationStage::Initiation);
        assert_eq!(ctx.errors.len(), 1);
    }

    #[tokio::test]
    async fn test_timeout_mid_flow_resumes() {
        let master = master();
        let report = master.initiate_conversation(None, None).await.unwrap();
        master
            .sessions()
            .set_stage(&report.session_id, ConversationStage::Underwriting)
            .await
            .unwrap();

        master
            .handle_conversation_timeout(&report.session_id)
            .await
            .unwrap();
        let ctx = master
            .sessions()
            .get_session_context(&report.session_id)
            .await
            .unwrap();
        // Resumable stages park in error handling until the customer replies.
        assert_eq!(ctx.conversation_stage, ConversationStage::ErrorHandling);
    }

    #[test]
    fn test_extract_profile_from_message() {
        let profile = extract_profile_from_message(
            "I want to apply for a personal loan of 300000. My name is ajay kumar, age 32, salary \u{20b9}80,000, credit score 785, working as an engineer in bangalore",
        );
        assert_eq!(profile["name"], json!("Ajay Kumar"));
        assert_eq!(profile["age"], json!(32));
        assert_eq!(profile["salary"], json!(80_000.0));
        assert_eq!(profile["credit_score"], json!(785));
        assert_eq!(profile["requested_amount"], json!(300_000.0));
        assert_eq!(profile["city"], json!("Bangalore"));
    }

    #[test]
    fn test_extract_profile_defaults() {
        let profile = extract_profile_from_message("I need a loan please");
        assert_eq!(profile["name"], json!("Valued Customer"));
        assert_eq!(profile["requested_amount"], json!(300_000.0));
        assert_eq!(profile["salary"], json!(60_000.0));
    }

    #[test]
    fn test_number_after_skips_filler() {
        assert_eq!(number_after("salary rs 80,000 per month", &["salary"]), Some(80_000.0));
        assert_eq!(number_after("loan of \u{20b9}3,00,000", &["loan of"]), Some(300_000.0));
        assert_eq!(number_after("no numbers here", &["salary"]), None);
    }

    #[test]
    fn test_text_after_stops_at_fields() {
        assert_eq!(
            text_after("my name is ajay kumar age 32", &["my name is"]),
            Some("ajay kumar".to_string())
        );
        assert_eq!(
            text_after("name: Priya Sharma, city: Pune", &["name:"]),
            Some("Priya Sharma".to_string())
        );
    }

    #[tokio::test]
    async fn test_profile_prefers_stored_over_form() {
        let master = master();
        let report = master.initiate_conversation(None, None).await.unwrap();
        master
            .sessions()
            .add_session_data(&report.session_id, "form_data", json!({"full_name": "Form Name"}))
            .await
            .unwrap();
        master
            .sessions()
            .add_session_data(
                &report.session_id,
                "customer_profile",
                json!({"name": "Stored Name"}),
            )
            .await
            .unwrap();

        let profile = master.customer_profile_value(&report.session_id).await;
        assert_eq!(profile["name"], json!("Stored Name"));
        // Defaults fill whatever the stored profile omitted.
        assert_eq!(profile["credit_score"], json!(750));
    }
}
