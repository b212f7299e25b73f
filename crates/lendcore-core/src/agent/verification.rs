//! Verification worker: KYC checks against CRM master data.
//!
//! Matching is deliberately simple: normalized phone equality, token-set
//! Jaccard similarity for addresses (threshold 0.8) and names (0.7), and a
//! two-year age tolerance. Outcomes are tracked in the verification ledger.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::{Value, json};

use lendcore_types::conversation::{AgentKind, AgentTask, ConversationContext, TaskKind};
use lendcore_types::customer::normalize_phone;
use lendcore_types::error::AgentError;
use lendcore_types::verification::{VerificationMethod, VerificationStatus};

use crate::storage::{CustomerRecord, ExternalServices, VerificationLedger};

use super::{Agent, AgentState};

/// Minimum address token overlap to accept a match.
const ADDRESS_SIMILARITY_THRESHOLD: f64 = 0.8;

/// Minimum name token overlap to accept a match.
const NAME_SIMILARITY_THRESHOLD: f64 = 0.7;

/// Maximum tolerated difference between stated and recorded age.
const AGE_TOLERANCE_YEARS: u32 = 2;

/// Document-verification score needed to pass without CRM data.
const DOCUMENT_PASS_SCORE: u32 = 80;

/// One field-level check outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
enum CheckOutcome {
    Verified,
    Failed(Vec<String>),
}

impl CheckOutcome {
    fn passed(&self) -> bool {
        matches!(self, CheckOutcome::Verified)
    }
}

/// KYC verification worker.
pub struct VerificationAgent<E, V>
where
    E: ExternalServices,
    V: VerificationLedger,
{
    state: AgentState,
    gateway: Arc<E>,
    ledger: Arc<V>,
}

impl<E, V> VerificationAgent<E, V>
where
    E: ExternalServices,
    V: VerificationLedger,
{
    pub fn new(gateway: Arc<E>, ledger: Arc<V>) -> Self {
        Self {
            state: AgentState::new(AgentKind::Verification),
            gateway,
            ledger,
        }
    }

    /// Full KYC: fetch the CRM record, run the three field checks, update
    /// the ledger, and report either success or the documents needed.
    async fn full_kyc(
        &mut self,
        task: &AgentTask,
        ctx: &mut ConversationContext,
    ) -> Result<Value, AgentError> {
        let customer_id = task
            .input
            .get("customer_id")
            .and_then(Value::as_str)
            .ok_or_else(|| AgentError::MissingInput("customer_id".to_string()))?
            .to_string();
        let provided = task.input.get("provided_details").cloned().unwrap_or(json!({}));
        let session_id = ctx.session_id.clone();

        let record = self.ledger.start(&customer_id, &session_id, VerificationMethod::AutomaticCrm);
        if record.status == VerificationStatus::Verified && !record.is_expired() {
            ctx.add_collected_data("kyc_verified", json!(true));
            return Ok(json!({
                "verification_successful": true,
                "reused_existing": true,
                "verification_score": record.verification_score,
                "next_action": "proceed_to_underwriting",
                "message": "You're already verified with us. We can proceed with your loan application.",
            }));
        }

        let crm = match self.gateway.fetch_customer(&customer_id).await {
            Ok(crm) => crm,
            Err(err) => {
                self.ledger.update(
                    &customer_id,
                    &session_id,
                    VerificationStatus::Failed,
                    |r| r.issues.push(format!("CRM error: {err}")),
                );
                return Ok(json!({
                    "verification_successful": false,
                    "next_action": "request_manual_verification",
                    "message": "We're unable to verify your details automatically. Please provide additional documentation.",
                    "error": err.to_string(),
                }));
            }
        };

        if crm.requires_manual_verification {
            self.ledger.update(
                &customer_id,
                &session_id,
                VerificationStatus::RequiresDocuments,
                |r| r.required_documents = vec!["aadhaar".to_string(), "pan".to_string()],
            );
            return Ok(json!({
                "verification_successful": false,
                "requires_documents": true,
                "required_documents": ["aadhaar", "pan"],
                "next_action": "request_documents",
                "message": "We couldn't reach our records service, so we'll verify you from documents instead. Please upload your Aadhaar and PAN.",
            }));
        }

        let checks = run_field_checks(&provided, &crm);
        let score = verification_score(&checks);
        let issues: Vec<String> = checks
            .iter()
            .flat_map(|c| match c {
                CheckOutcome::Failed(issues) => issues.clone(),
                CheckOutcome::Verified => Vec::new(),
            })
            .collect();

        if issues.is_empty() {
            self.ledger.update(
                &customer_id,
                &session_id,
                VerificationStatus::Verified,
                |r| {
                    r.verification_score = Some(score);
                    r.verified_fields = vec![
                        "phone".to_string(),
                        "address".to_string(),
                        "personal_details".to_string(),
                    ];
                },
            );
            ctx.add_collected_data("kyc_verified", json!(true));
            ctx.add_collected_data("phone_verified", json!(true));
            ctx.add_collected_data("address_verified", json!(true));
            ctx.add_collected_data("verification_score", json!(score));

            Ok(json!({
                "verification_successful": true,
                "verification_score": score,
                "customer_id": customer_id,
                "verified_fields": ["phone", "address", "personal_details"],
                "next_action": "proceed_to_underwriting",
                "message": "Great! Your identity has been successfully verified. We can now proceed with your loan application.",
            }))
        } else {
            let documents = required_documents(&issues);
            self.ledger.update(
                &customer_id,
                &session_id,
                VerificationStatus::RequiresDocuments,
                |r| {
                    r.verification_score = Some(score);
                    r.required_documents = documents.clone();
                },
            );
            self.ledger.record_attempt(&customer_id, &session_id, &issues);

            Ok(json!({
                "verification_successful": false,
                "requires_documents": true,
                "verification_score": score,
                "issues": issues.clone(),
                "required_documents": documents,
                "next_action": "request_additional_documents",
                "message": failure_message(&issues),
            }))
        }
    }

    /// Single-field verification against the CRM record.
    async fn single_field(
        &mut self,
        task: &AgentTask,
        field: &str,
    ) -> Result<Value, AgentError> {
        let customer_id = task
            .input
            .get("customer_id")
            .and_then(Value::as_str)
            .ok_or_else(|| AgentError::MissingInput("customer_id".to_string()))?;
        let provided = task
            .input
            .get(field)
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();

        let crm = self
            .gateway
            .fetch_customer(customer_id)
            .await
            .map_err(|e| AgentError::Gateway(e.to_string()))?;

        let outcome = match field {
            "phone" => check_phone(&provided, &crm.phone),
            "address" => check_address(&provided, &crm.address),
            other => {
                return Err(AgentError::InvalidInput(format!(
                    "unknown verification field: {other}"
                )));
            }
        };

        Ok(json!({
            "field": field,
            "verified": outcome.passed(),
            "issues": match outcome {
                CheckOutcome::Verified => Vec::new(),
                CheckOutcome::Failed(issues) => issues,
            },
        }))
    }

    /// Document-based fallback verification: per-type scores summed
    /// against a pass threshold.
    fn verify_documents(&self, task: &AgentTask, ctx: &mut ConversationContext) -> Value {
        let documents = task
            .input
            .get("documents")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        if documents.is_empty() {
            return json!({
                "verification_successful": false,
                "message": "Please upload the required documents to complete verification.",
            });
        }

        let mut total = 0u32;
        let mut verified_documents = Vec::new();
        for document in &documents {
            let doc_type = document.get("type").and_then(Value::as_str).unwrap_or("");
            let score = document_score(doc_type);
            if score > 15 {
                total += score;
                verified_documents.push(doc_type.to_string());
            }
        }

        if total >= DOCUMENT_PASS_SCORE {
            ctx.add_collected_data("kyc_verified", json!(true));
            ctx.add_collected_data("verification_method", json!("document_based"));
            json!({
                "verification_successful": true,
                "verification_score": total,
                "verified_documents": verified_documents,
                "next_action": "proceed_to_underwriting",
                "message": "Thank you! Your documents have been verified successfully.",
            })
        } else {
            json!({
                "verification_successful": false,
                "verification_score": total,
                "verified_documents": verified_documents,
                "message": "The documents provided weren't sufficient for verification. Please upload a clearer identity proof.",
            })
        }
    }
}

impl<E, V> Agent for VerificationAgent<E, V>
where
    E: ExternalServices,
    V: VerificationLedger,
{
    fn state(&self) -> &AgentState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut AgentState {
        &mut self.state
    }

    fn can_execute(&self, kind: TaskKind) -> bool {
        kind == TaskKind::Verification
    }

    async fn execute_logic(
        &mut self,
        task: &AgentTask,
        ctx: &mut ConversationContext,
    ) -> Result<Value, AgentError> {
        let verification_type = task
            .input
            .get("verification_type")
            .and_then(Value::as_str)
            .unwrap_or("full_kyc");

        match verification_type {
            "full_kyc" => self.full_kyc(task, ctx).await,
            "phone_verification" => self.single_field(task, "phone").await,
            "address_verification" => self.single_field(task, "address").await,
            "document_verification" => Ok(self.verify_documents(task, ctx)),
            other => Err(AgentError::InvalidInput(format!(
                "unknown verification type: {other}"
            ))),
        }
    }
}

/// Run phone, address, and personal-detail checks.
fn run_field_checks(provided: &Value, crm: &CustomerRecord) -> Vec<CheckOutcome> {
    let provided_phone = provided.get("phone").and_then(Value::as_str).unwrap_or("");
    let provided_address = provided.get("address").and_then(Value::as_str).unwrap_or("");

    vec![
        check_phone(provided_phone, &crm.phone),
        check_address(provided_address, &crm.address),
        check_personal_details(provided, crm),
    ]
}

fn check_phone(provided: &str, recorded: &str) -> CheckOutcome {
    if provided.is_empty() || recorded.is_empty() {
        return CheckOutcome::Failed(vec!["Missing phone number data".to_string()]);
    }
    if normalize_phone(provided) == normalize_phone(recorded) {
        CheckOutcome::Verified
    } else {
        CheckOutcome::Failed(vec!["Phone number mismatch".to_string()])
    }
}

fn check_address(provided: &str, recorded: &str) -> CheckOutcome {
    if provided.is_empty() || recorded.is_empty() {
        return CheckOutcome::Failed(vec!["Missing address data".to_string()]);
    }
    if token_similarity(provided, recorded) >= ADDRESS_SIMILARITY_THRESHOLD {
        CheckOutcome::Verified
    } else {
        CheckOutcome::Failed(vec!["Address mismatch".to_string()])
    }
}

fn check_personal_details(provided: &Value, crm: &CustomerRecord) -> CheckOutcome {
    let mut issues = Vec::new();

    if let Some(name) = provided.get("name").and_then(Value::as_str) {
        if !name.is_empty()
            && !crm.name.is_empty()
            && token_similarity(name, &crm.name) < NAME_SIMILARITY_THRESHOLD
        {
            issues.push("Name mismatch".to_string());
        }
    }

    if let (Some(provided_age), Some(recorded_age)) =
        (provided.get("age").and_then(Value::as_u64), crm.age)
    {
        if (provided_age as u32).abs_diff(recorded_age) > AGE_TOLERANCE_YEARS {
            issues.push("Age mismatch".to_string());
        }
    }

    if issues.is_empty() {
        CheckOutcome::Verified
    } else {
        CheckOutcome::Failed(issues)
    }
}

/// Jaccard similarity over lowercase whitespace tokens.
fn token_similarity(a: &str, b: &str) -> f64 {
    let tokens_a: BTreeSet<String> = a.to_lowercase().split_whitespace().map(str::to_string).collect();
    let tokens_b: BTreeSet<String> = b.to_lowercase().split_whitespace().map(str::to_string).collect();
    if tokens_a.is_empty() || tokens_b.is_empty() {
        return 0.0;
    }
    let intersection = tokens_a.intersection(&tokens_b).count();
    let union = tokens_a.union(&tokens_b).count();
    intersection as f64 / union as f64
}

/// Overall score: share of checks passed, scaled to 0-100.
fn verification_score(checks: &[CheckOutcome]) -> u32 {
    if checks.is_empty() {
        return 0;
    }
    let passed = checks.iter().filter(|c| c.passed()).count();
    (passed as f64 / checks.len() as f64 * 100.0) as u32
}

/// Documents needed to clear the given issues.
fn required_documents(issues: &[String]) -> Vec<String> {
    let mut documents = BTreeSet::new();
    for issue in issues {
        let lower = issue.to_lowercase();
        if lower.contains("phone") {
            documents.insert("utility_bill");
            documents.insert("bank_statement");
        } else if lower.contains("address") {
            documents.insert("utility_bill");
            documents.insert("aadhaar");
            documents.insert("passport");
        } else if lower.contains("name") {
            documents.insert("aadhaar");
            documents.insert("pan");
            documents.insert("passport");
        }
    }
    if documents.is_empty() {
        documents.insert("aadhaar");
        documents.insert("pan");
    }
    documents.into_iter().map(str::to_string).collect()
}

/// Simulated per-type document verification weight.
fn document_score(doc_type: &str) -> u32 {
    match doc_type.to_lowercase().as_str() {
        "aadhaar" => 40,
        "pan" => 35,
        "passport" => 45,
        "driving_license" => 30,
        "voter_id" => 25,
        "utility_bill" => 20,
        "bank_statement" => 25,
        _ => 10,
    }
}

fn failure_message(issues: &[String]) -> String {
    if issues.len() == 1 {
        let issue = issues[0].to_lowercase();
        if issue.contains("phone") {
            return "We couldn't verify your phone number. Please ensure you've provided the correct number registered with us.".to_string();
        }
        if issue.contains("address") {
            return "We couldn't verify your address. Please confirm your current address matches our records.".to_string();
        }
        if issue.contains("name") {
            return "We couldn't verify your name. Please ensure it matches exactly with your official documents.".to_string();
        }
    }
    "We couldn't verify some of your details automatically. Please provide additional documentation to complete the verification process.".to_string()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    use lendcore_types::error::GatewayError;
    use lendcore_types::verification::VerificationRecord;

    use crate::storage::{CreditReport, LedgerStatistics, OfferSheet};

    /// Gateway double with a programmable CRM record.
    pub struct StubGateway {
        pub customer: Option<CustomerRecord>,
        pub credit_score: i32,
        pub pre_approved_limit: f64,
        pub fail_customer: bool,
    }

    impl Default for StubGateway {
        fn default() -> Self {
            Self {
                customer: Some(CustomerRecord {
                    id: "CUST001".to_string(),
                    name: "Ajay Kumar".to_string(),
                    phone: "9876543210".to_string(),
                    address: "42 MG Road Bangalore Karnataka".to_string(),
                    age: Some(32),
                    city: Some("Bangalore".to_string()),
                    salary: Some(80_000.0),
                    employment_type: Some("salaried".to_string()),
                    from_fallback: false,
                    requires_manual_verification: false,
                }),
                credit_score: 760,
                pre_approved_limit: 500_000.0,
                fail_customer: false,
            }
        }
    }

    impl ExternalServices for StubGateway {
        async fn fetch_customer(&self, customer_id: &str) -> Result<CustomerRecord, GatewayError> {
            if self.fail_customer {
                return Err(GatewayError::CustomerNotFound(customer_id.to_string()));
            }
            Ok(self.customer.clone().expect("stub customer configured"))
        }

        async fn fetch_credit_report(&self, _customer_id: &str) -> Result<CreditReport, GatewayError> {
            Ok(CreditReport { credit_score: self.credit_score, from_fallback: false })
        }

        async fn fetch_offers(&self, _customer_id: &str) -> Result<OfferSheet, GatewayError> {
            Ok(OfferSheet {
                pre_approved_limit: self.pre_approved_limit,
                interest_rate: Some(12.0),
                from_fallback: false,
            })
        }
    }

    /// In-memory ledger double.
    #[derive(Default)]
    pub struct StubLedger {
        pub records: Mutex<Vec<VerificationRecord>>,
    }

    impl VerificationLedger for StubLedger {
        fn start(
            &self,
            customer_id: &str,
            session_id: &str,
            method: VerificationMethod,
        ) -> VerificationRecord {
            let mut records = self.records.lock().unwrap();
            if let Some(existing) = records
                .iter()
                .find(|r| r.customer_id == customer_id && r.session_id == session_id)
            {
                if existing.status == VerificationStatus::Verified && !existing.is_expired() {
                    return existing.clone();
                }
            }
            let record = VerificationRecord::started(customer_id, session_id, method);
            records.push(record.clone());
            record
        }

        fn update(
            &self,
            customer_id: &str,
            session_id: &str,
            status: VerificationStatus,
            apply: impl FnOnce(&mut VerificationRecord),
        ) -> Option<VerificationRecord> {
            let mut records = self.records.lock().unwrap();
            let record = records
                .iter_mut()
                .find(|r| r.customer_id == customer_id && r.session_id == session_id)?;
            record.update_status(status);
            apply(record);
            Some(record.clone())
        }

        fn get(&self, customer_id: &str, session_id: &str) -> Option<VerificationRecord> {
            self.records
                .lock()
                .unwrap()
                .iter()
                .find(|r| r.customer_id == customer_id && r.session_id == session_id)
                .cloned()
        }

        fn history_for(&self, customer_id: &str) -> Vec<VerificationRecord> {
            self.records
                .lock()
                .unwrap()
                .iter()
                .filter(|r| r.customer_id == customer_id)
                .cloned()
                .collect()
        }

        fn is_customer_verified(&self, customer_id: &str) -> bool {
            self.history_for(customer_id)
                .iter()
                .any(|r| r.status == VerificationStatus::Verified && !r.is_expired())
        }

        fn latest_for(&self, customer_id: &str) -> Option<VerificationRecord> {
            self.history_for(customer_id).into_iter().last()
        }

        fn record_attempt(
            &self,
            customer_id: &str,
            session_id: &str,
            issues: &[String],
        ) -> Option<VerificationRecord> {
            let mut records = self.records.lock().unwrap();
            let record = records
                .iter_mut()
                .find(|r| r.customer_id == customer_id && r.session_id == session_id)?;
            record.add_attempt(issues);
            Some(record.clone())
        }

        fn cleanup_stale(&self) -> usize {
            0
        }

        fn statistics(&self, days: i64) -> LedgerStatistics {
            LedgerStatistics { period_days: days, ..Default::default() }
        }
    }

    fn kyc_task(phone: &str, address: &str) -> AgentTask {
        AgentTask::new(
            TaskKind::Verification,
            json!({
                "verification_type": "full_kyc",
                "customer_id": "CUST001",
                "provided_details": {
                    "name": "Ajay Kumar",
                    "phone": phone,
                    "address": address,
                    "age": 32,
                },
            }),
        )
    }

    #[tokio::test]
    async fn test_full_kyc_passes_on_matching_details() {
        let mut agent =
            VerificationAgent::new(Arc::new(StubGateway::default()), Arc::new(StubLedger::default()));
        let mut ctx = ConversationContext::new("sess_1", Some("CUST001".to_string()));
        let task = kyc_task("+91 98765 43210", "42 MG Road Bangalore Karnataka");

        let result = agent.execute_logic(&task, &mut ctx).await.unwrap();
        assert_eq!(result["verification_successful"], json!(true));
        assert_eq!(result["verification_score"], json!(100));
        assert_eq!(ctx.data_value("kyc_verified"), Some(&json!(true)));

        let record = agent.ledger.get("CUST001", "sess_1").unwrap();
        assert_eq!(record.status, VerificationStatus::Verified);
        assert!(record.expires_at.is_some());
    }

    #[tokio::test]
    async fn test_full_kyc_requests_documents_on_mismatch() {
        let mut agent =
            VerificationAgent::new(Arc::new(StubGateway::default()), Arc::new(StubLedger::default()));
        let mut ctx = ConversationContext::new("sess_1", Some("CUST001".to_string()));
        let task = kyc_task("9999999999", "7 Park Street Kolkata");

        let result = agent.execute_logic(&task, &mut ctx).await.unwrap();
        assert_eq!(result["verification_successful"], json!(false));
        assert_eq!(result["requires_documents"], json!(true));
        let documents: Vec<String> = result["required_documents"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap().to_string())
            .collect();
        assert!(documents.contains(&"utility_bill".to_string()));

        let record = agent.ledger.get("CUST001", "sess_1").unwrap();
        assert_eq!(record.status, VerificationStatus::RequiresDocuments);
        assert_eq!(record.attempts, 1);
    }

    #[tokio::test]
    async fn test_crm_failure_falls_back_to_manual() {
        let gateway = StubGateway { fail_customer: true, ..Default::default() };
        let mut agent = VerificationAgent::new(Arc::new(gateway), Arc::new(StubLedger::default()));
        let mut ctx = ConversationContext::new("sess_1", None);
        let task = kyc_task("9876543210", "42 MG Road");

        let result = agent.execute_logic(&task, &mut ctx).await.unwrap();
        assert_eq!(result["verification_successful"], json!(false));
        assert_eq!(result["next_action"], json!("request_manual_verification"));
    }

    #[tokio::test]
    async fn test_valid_record_is_reused() {
        let ledger = Arc::new(StubLedger::default());
        let mut record = VerificationRecord::started("CUST001", "sess_1", VerificationMethod::AutomaticCrm);
        record.update_status(VerificationStatus::Verified);
        record.verification_score = Some(100);
        ledger.records.lock().unwrap().push(record);

        let mut agent = VerificationAgent::new(Arc::new(StubGateway::default()), ledger);
        let mut ctx = ConversationContext::new("sess_1", None);
        let task = kyc_task("1111111111", "nowhere");

        let result = agent.execute_logic(&task, &mut ctx).await.unwrap();
        assert_eq!(result["verification_successful"], json!(true));
        assert_eq!(result["reused_existing"], json!(true));
    }

    #[tokio::test]
    async fn test_document_verification_threshold() {
        let mut agent =
            VerificationAgent::new(Arc::new(StubGateway::default()), Arc::new(StubLedger::default()));
        let mut ctx = ConversationContext::new("sess_1", None);

        let strong = AgentTask::new(
            TaskKind::Verification,
            json!({
                "verification_type": "document_verification",
                "customer_id": "CUST001",
                "documents": [{"type": "aadhaar"}, {"type": "passport"}],
            }),
        );
        let result = agent.execute_logic(&strong, &mut ctx).await.unwrap();
        assert_eq!(result["verification_successful"], json!(true));

        let weak = AgentTask::new(
            TaskKind::Verification,
            json!({
                "verification_type": "document_verification",
                "customer_id": "CUST001",
                "documents": [{"type": "utility_bill"}],
            }),
        );
        let result = agent.execute_logic(&weak, &mut ctx).await.unwrap();
        assert_eq!(result["verification_successful"], json!(false));
    }

    #[test]
    fn test_token_similarity() {
        assert_eq!(token_similarity("42 MG Road", "42 MG Road"), 1.0);
        assert!(token_similarity("42 MG Road Bangalore", "42 MG Road") > 0.7);
        assert!(token_similarity("42 MG Road", "7 Park Street") < 0.2);
        assert_eq!(token_similarity("", "something"), 0.0);
    }

    #[test]
    fn test_phone_check_normalizes() {
        assert!(check_phone("+91 98765 43210", "9876543210").passed());
        assert!(check_phone("09876543210", "9876543210").passed());
        assert!(!check_phone("9876543211", "9876543210").passed());
        assert!(!check_phone("", "9876543210").passed());
    }

    #[test]
    fn test_required_documents_mapping() {
        let documents = required_documents(&["Phone number mismatch".to_string()]);
        assert!(documents.contains(&"utility_bill".to_string()));
        assert!(documents.contains(&"bank_statement".to_string()));

        let fallback = required_documents(&["something odd".to_string()]);
        assert_eq!(fallback, vec!["aadhaar".to_string(), "pan".to_string()]);
    }
}
