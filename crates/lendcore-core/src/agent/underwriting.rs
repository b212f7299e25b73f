//! Underwriting worker: credit assessment and the loan decision rules.
//!
//! The decision logic is deterministic:
//! 1. credit score below 700 rejects outright;
//! 2. amount above 2x the pre-approved limit rejects with a suggested
//!    amount of exactly 2x the limit;
//! 3. amount within the limit approves instantly;
//! 4. between 1x and 2x, approval is conditional on EMI staying within
//!    50% of salary; without salary data, a salary slip is required.

use std::sync::Arc;

use serde_json::{Value, json};
use uuid::Uuid;

use lendcore_types::conversation::{AgentKind, AgentTask, ConversationContext, TaskKind};
use lendcore_types::customer::CustomerProfile;
use lendcore_types::error::AgentError;
use lendcore_types::loan::{
    LoanApplication, LoanApplicationRecord, LoanStatus, UnderwritingDecision,
    UnderwritingDecisionKind,
};

use crate::calculator::{FeeKind, LoanCalculator};
use crate::storage::{ExternalServices, HistoryStore};

use super::sales::{interest_rate_for, profile_from_value};
use super::{Agent, AgentState, shared_value};

/// Business-rule thresholds for underwriting decisions.
#[derive(Debug, Clone, Copy)]
pub struct BusinessRules {
    pub min_credit_score: i32,
    pub max_amount_multiplier: f64,
    pub max_emi_ratio: f64,
    pub min_age: u32,
    pub max_age: u32,
}

impl Default for BusinessRules {
    fn default() -> Self {
        Self {
            min_credit_score: 700,
            max_amount_multiplier: 2.0,
            max_emi_ratio: 0.50,
            min_age: 21,
            max_age: 65,
        }
    }
}

/// Credit-assessment worker.
pub struct UnderwritingAgent<E, H>
where
    E: ExternalServices,
    H: HistoryStore,
{
    state: AgentState,
    gateway: Arc<E>,
    history: Arc<H>,
    calculator: LoanCalculator,
    rules: BusinessRules,
}

impl<E, H> UnderwritingAgent<E, H>
where
    E: ExternalServices,
    H: HistoryStore,
{
    pub fn new(gateway: Arc<E>, history: Arc<H>) -> Self {
        Self {
            state: AgentState::new(AgentKind::Underwriting),
            gateway,
            history,
            calculator: LoanCalculator::new(),
            rules: BusinessRules::default(),
        }
    }

    pub fn rules(&self) -> BusinessRules {
        self.rules
    }

    /// The deterministic decision rules over a profile and application.
    pub fn decide(
        &self,
        profile: &CustomerProfile,
        application: &mut LoanApplication,
    ) -> UnderwritingDecision {
        let mut factors = std::collections::BTreeMap::new();
        factors.insert("credit_score".to_string(), json!(profile.credit_score));
        factors.insert(
            "pre_approved_limit".to_string(),
            json!(profile.pre_approved_limit),
        );
        factors.insert(
            "requested_amount".to_string(),
            json!(application.requested_amount),
        );

        // Rule 1: credit floor.
        if profile.credit_score < self.rules.min_credit_score {
            let message = format!(
                "We're sorry, but we cannot approve your loan application at this time. Your credit score of {} is below our minimum requirement of {}. We recommend improving your credit score and applying again in the future.",
                profile.credit_score, self.rules.min_credit_score
            );
            application.reject(format!(
                "Credit score {} below minimum {}",
                profile.credit_score, self.rules.min_credit_score
            ));
            return self.decision(
                application,
                profile,
                LoanStatus::Rejected,
                UnderwritingDecisionKind::RejectionLowCredit,
                message,
                "end_conversation",
                factors,
                None,
                Vec::new(),
            );
        }

        let amount_ratio = if profile.pre_approved_limit > 0.0 {
            application.requested_amount / profile.pre_approved_limit
        } else {
            f64::INFINITY
        };
        factors.insert("amount_ratio".to_string(), json!(amount_ratio));

        // Rule 2: hard ceiling at 2x the limit.
        if amount_ratio > self.rules.max_amount_multiplier {
            let max_allowed = profile.pre_approved_limit * self.rules.max_amount_multiplier;
            let message = format!(
                "We're unable to approve the requested amount of \u{20b9}{:.0}. The maximum amount we can offer you is \u{20b9}{max_allowed:.0}. Would you like to proceed with a lower amount?",
                application.requested_amount
            );
            application.reject(format!(
                "Requested amount exceeds maximum allowed \u{20b9}{max_allowed:.0}"
            ));
            return self.decision(
                application,
                profile,
                LoanStatus::Rejected,
                UnderwritingDecisionKind::RejectionExcessAmount,
                message,
                "offer_reduced_amount",
                factors,
                Some(max_allowed),
                Vec::new(),
            );
        }

        // Rule 3: within the limit approves instantly.
        if amount_ratio <= 1.0 {
            let message = format!(
                "Congratulations! Your loan application for \u{20b9}{:.0} has been instantly approved. Your EMI will be \u{20b9}{:.0} for {} months.",
                application.requested_amount, application.emi, application.tenure
            );
            application.approve();
            return self.decision(
                application,
                profile,
                LoanStatus::Approved,
                UnderwritingDecisionKind::InstantApproval,
                message,
                "generate_sanction_letter",
                factors,
                None,
                Vec::new(),
            );
        }

        // Rule 4: between 1x and 2x, EMI affordability decides.
        match profile.salary {
            Some(salary) => {
                let emi_ratio = application.emi / salary;
                factors.insert("emi_ratio".to_string(), json!(emi_ratio));

                let terms = self
                    .calculator
                    .loan_terms(
                        application.requested_amount,
                        application.interest_rate,
                        application.tenure,
                        FeeKind::Standard,
                    )
                    .ok();
                let affordability =
                    terms.map(|t| self.calculator.assess_affordability(profile, &t));
                let is_affordable = affordability
                    .as_ref()
                    .map(|a| a.is_affordable)
                    .unwrap_or(false);

                if emi_ratio <= self.rules.max_emi_ratio && is_affordable {
                    let message = format!(
                        "Great news! Your loan application for \u{20b9}{:.0} has been approved. Your EMI of \u{20b9}{:.0} is well within your repayment capacity.",
                        application.requested_amount, application.emi
                    );
                    application.approve();
                    self.decision(
                        application,
                        profile,
                        LoanStatus::Approved,
                        UnderwritingDecisionKind::ConditionalApproval,
                        message,
                        "generate_sanction_letter",
                        factors,
                        None,
                        Vec::new(),
                    )
                } else {
                    let suggested = affordability.map(|a| a.max_affordable_amount);
                    let message = format!(
                        "We're unable to approve the requested amount as the EMI of \u{20b9}{:.0} would exceed 50% of your salary. We can offer you a lower amount with an affordable EMI.",
                        application.emi
                    );
                    application.reject(format!(
                        "EMI \u{20b9}{:.0} exceeds 50% of salary",
                        application.emi
                    ));
                    self.decision(
                        application,
                        profile,
                        LoanStatus::Rejected,
                        UnderwritingDecisionKind::RejectionExcessAmount,
                        message,
                        "offer_reduced_amount",
                        factors,
                        suggested,
                        Vec::new(),
                    )
                }
            }
            None => {
                let message = format!(
                    "To process your loan application for \u{20b9}{:.0}, we need to verify your salary. Please upload your latest salary slip to continue.",
                    application.requested_amount
                );
                application.require_documents();
                self.decision(
                    application,
                    profile,
                    LoanStatus::RequiresDocuments,
                    UnderwritingDecisionKind::RequiresSalaryVerification,
                    message,
                    "request_salary_slip",
                    factors,
                    None,
                    vec!["salary_slip".to_string()],
                )
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn decision(
        &self,
        application: &LoanApplication,
        profile: &CustomerProfile,
        status: LoanStatus,
        kind: UnderwritingDecisionKind,
        message: String,
        next_action: &str,
        factors: std::collections::BTreeMap<String, Value>,
        suggested_amount: Option<f64>,
        required_documents: Vec<String>,
    ) -> UnderwritingDecision {
        UnderwritingDecision {
            application_id: application.id.clone(),
            status,
            kind,
            credit_score: profile.credit_score,
            pre_approved_limit: profile.pre_approved_limit,
            message,
            next_action: next_action.to_string(),
            factors,
            suggested_amount,
            required_documents,
            decided_at: chrono::Utc::now(),
        }
    }

    /// Rule-by-rule validation report without deciding.
    pub fn validate_business_rules(
        &self,
        profile: &CustomerProfile,
        application: &LoanApplication,
    ) -> Value {
        let mut violations: Vec<String> = Vec::new();
        let mut warnings: Vec<String> = Vec::new();

        let age_valid = (self.rules.min_age..=self.rules.max_age).contains(&profile.age);
        if !age_valid {
            violations.push(format!(
                "Age {} is outside allowed range {}-{}",
                profile.age, self.rules.min_age, self.rules.max_age
            ));
        }

        let credit_valid = profile.credit_score >= self.rules.min_credit_score;
        if !credit_valid {
            violations.push(format!(
                "Credit score {} is below minimum {}",
                profile.credit_score, self.rules.min_credit_score
            ));
        }

        let amount_ratio = if profile.pre_approved_limit > 0.0 {
            application.requested_amount / profile.pre_approved_limit
        } else {
            f64::INFINITY
        };
        let amount_valid = amount_ratio <= self.rules.max_amount_multiplier;
        if !amount_valid {
            violations.push(format!(
                "Requested amount \u{20b9}{:.0} exceeds maximum \u{20b9}{:.0}",
                application.requested_amount,
                profile.pre_approved_limit * self.rules.max_amount_multiplier
            ));
        }

        let emi_check = match profile.salary {
            Some(salary) => {
                let emi_ratio = application.emi / salary;
                let emi_valid = emi_ratio <= self.rules.max_emi_ratio;
                if !emi_valid {
                    violations.push(format!(
                        "EMI \u{20b9}{:.0} exceeds {:.0}% of salary",
                        application.emi,
                        self.rules.max_emi_ratio * 100.0
                    ));
                }
                json!({"valid": emi_valid, "emi_ratio": emi_ratio})
            }
            None => {
                warnings.push("Salary information not available for EMI validation".to_string());
                json!({"valid": Value::Null})
            }
        };

        json!({
            "is_valid": violations.is_empty(),
            "rule_checks": {
                "age_check": {"valid": age_valid, "customer_age": profile.age},
                "credit_score_check": {"valid": credit_valid, "customer_score": profile.credit_score},
                "amount_check": {"valid": amount_valid, "amount_ratio": if amount_ratio.is_finite() { json!(amount_ratio) } else { json!("unbounded") }},
                "emi_check": emi_check,
            },
            "violations": violations,
            "warnings": warnings,
        })
    }

    /// End-to-end underwriting: fetch bureau + offer data, enrich the
    /// profile, run the rules, share the outcome, and record history.
    async fn full_underwriting(
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

        let profile_value = shared_value(ctx, AgentKind::Underwriting, "customer_profile")
            .or_else(|| task.input.get("customer_profile").cloned())
            .ok_or_else(|| AgentError::MissingContextData("customer_profile".to_string()))?;
        let mut profile = profile_from_value(&profile_value, Some(&customer_id));

        // Bureau and offer data override whatever the conversation guessed.
        let report = self
            .gateway
            .fetch_credit_report(&customer_id)
            .await
            .map_err(|e| AgentError::Gateway(e.to_string()))?;
        profile.credit_score = report.credit_score;

        let offers = self
            .gateway
            .fetch_offers(&customer_id)
            .await
            .map_err(|e| AgentError::Gateway(e.to_string()))?;
        profile.pre_approved_limit = offers.pre_approved_limit;

        let application_input = task.input.get("loan_application").cloned().unwrap_or(json!({}));
        let requested_amount = application_input
            .get("requested_amount")
            .and_then(Value::as_f64)
            .or(profile.requested_amount)
            .unwrap_or(100_000.0);
        let tenure = application_input
            .get("tenure")
            .and_then(Value::as_u64)
            .unwrap_or(60) as u32;
        let interest_rate = application_input
            .get("interest_rate")
            .and_then(Value::as_f64)
            .or(offers.interest_rate)
            .unwrap_or_else(|| interest_rate_for(&profile, requested_amount));
        let emi = self
            .calculator
            .emi(requested_amount, interest_rate, tenure)
            .map_err(|e| AgentError::InvalidInput(e.to_string()))?;

        let mut application = LoanApplication::new(
            application_input
                .get("id")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("app_{}", Uuid::new_v4().simple())),
            customer_id.clone(),
            requested_amount,
            tenure,
            interest_rate,
            emi,
        );
        application
            .validate()
            .map_err(|e| AgentError::InvalidInput(e.to_string()))?;

        let decision = self.decide(&profile, &mut application);
        let approved = decision.status == LoanStatus::Approved;

        ctx.add_collected_data("credit_score", json!(profile.credit_score));
        ctx.add_collected_data("eligibility_decision", json!(decision.kind));
        ctx.add_collected_data("loan_approved", json!(approved));
        if approved {
            ctx.add_collected_data(
                "approved_loan",
                json!({
                    "amount": application.requested_amount,
                    "tenure": application.tenure,
                    "interest_rate": application.interest_rate,
                    "emi": application.emi,
                    "credit_score": profile.credit_score,
                }),
            );
        }

        let record = LoanApplicationRecord {
            id: application.id.clone(),
            session_id: ctx.session_id.clone(),
            customer_name: profile.name.clone(),
            customer_phone: Some(profile.phone.clone()),
            customer_city: Some(profile.city.clone()),
            requested_amount,
            approved_amount: approved.then_some(requested_amount),
            tenure,
            interest_rate,
            emi: Some(emi),
            status: decision.status,
            credit_score: profile.credit_score,
            rejection_reason: application.rejection_reason.clone(),
            created_at: chrono::Utc::now(),
        };
        if let Err(err) = self.history.record(record).await {
            tracing::warn!("failed to record application history: {err}");
        }

        Ok(json!({
            "decision": decision.status,
            "decision_type": decision.kind,
            "approved": approved,
            "requires_documents": decision.status == LoanStatus::RequiresDocuments,
            "credit_score": profile.credit_score,
            "pre_approved_limit": profile.pre_approved_limit,
            "emi": emi,
            "message": decision.message,
            "next_action": decision.next_action,
            "suggested_amount": decision.suggested_amount,
            "required_documents": decision.required_documents,
            "factors": decision.factors,
        }))
    }

    /// Recommend optimal terms for a desired amount.
    pub fn optimal_terms(&self, profile: &CustomerProfile, desired_amount: f64) -> Value {
        let rate = interest_rate_for(profile, desired_amount);
        let options: Vec<Value> = self
            .calculator
            .adjust_terms_for_affordability(profile, desired_amount, rate)
            .into_iter()
            .map(|terms| {
                let affordability = self.calculator.assess_affordability(profile, &terms);
                json!({
                    "amount": terms.amount,
                    "tenure": terms.tenure,
                    "interest_rate": terms.interest_rate,
                    "emi": terms.emi,
                    "total_payable": terms.total_payable,
                    "processing_fee": terms.processing_fee,
                    "is_affordable": affordability.is_affordable,
                    "risk_level": affordability.risk_level,
                })
            })
            .collect();

        json!({
            "calculation_successful": !options.is_empty(),
            "recommended_option": options.first().cloned(),
            "optimal_terms": options,
        })
    }
}

impl<E, H> Agent for UnderwritingAgent<E, H>
where
    E: ExternalServices,
    H: HistoryStore,
{
    fn state(&self) -> &AgentState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut AgentState {
        &mut self.state
    }

    fn can_execute(&self, kind: TaskKind) -> bool {
        kind == TaskKind::Underwriting
    }

    async fn execute_logic(
        &mut self,
        task: &AgentTask,
        ctx: &mut ConversationContext,
    ) -> Result<Value, AgentError> {
        let action = task
            .input
            .get("action")
            .and_then(Value::as_str)
            .unwrap_or("full_underwriting");

        match action {
            "full_underwriting" => self.full_underwriting(task, ctx).await,
            "credit_score_check" => {
                let customer_id = task
                    .input
                    .get("customer_id")
                    .and_then(Value::as_str)
                    .ok_or_else(|| AgentError::MissingInput("customer_id".to_string()))?;
                let report = self
                    .gateway
                    .fetch_credit_report(customer_id)
                    .await
                    .map_err(|e| AgentError::Gateway(e.to_string()))?;
                ctx.add_collected_data("credit_score", json!(report.credit_score));
                Ok(json!({
                    "credit_check_completed": true,
                    "credit_score": report.credit_score,
                    "from_fallback": report.from_fallback,
                }))
            }
            "affordability_assessment" => {
                let profile_value = task
                    .input
                    .get("customer_profile")
                    .cloned()
                    .ok_or_else(|| AgentError::MissingInput("customer_profile".to_string()))?;
                let profile = profile_from_value(&profile_value, ctx.customer_id.as_deref());
                let terms_value = task
                    .input
                    .get("loan_terms")
                    .cloned()
                    .ok_or_else(|| AgentError::MissingInput("loan_terms".to_string()))?;
                let terms: lendcore_types::loan::LoanTerms = serde_json::from_value(terms_value)
                    .map_err(|e| AgentError::InvalidInput(e.to_string()))?;
                let assessment = self.calculator.assess_affordability(&profile, &terms);
                Ok(json!({
                    "assessment_completed": true,
                    "affordability_result": assessment,
                }))
            }
            "business_rules_validation" => {
                let profile_value = task
                    .input
                    .get("customer_profile")
                    .cloned()
                    .ok_or_else(|| AgentError::MissingInput("customer_profile".to_string()))?;
                let profile = profile_from_value(&profile_value, ctx.customer_id.as_deref());
                let application_value = task
                    .input
                    .get("loan_application")
                    .cloned()
                    .ok_or_else(|| AgentError::MissingInput("loan_application".to_string()))?;
                let application: LoanApplication = serde_json::from_value(application_value)
                    .map_err(|e| AgentError::InvalidInput(e.to_string()))?;
                Ok(json!({
                    "validation_completed": true,
                    "validation_result": self.validate_business_rules(&profile, &application),
                }))
            }
            other => Err(AgentError::InvalidInput(format!(
                "unknown underwriting action: {other}"
            ))),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    use lendcore_types::error::SessionError;

    use crate::agent::verification::tests::StubGateway;

    #[derive(Default)]
    pub struct StubHistory {
        pub records: Mutex<Vec<LoanApplicationRecord>>,
    }

    impl HistoryStore for StubHistory {
        async fn record(&self, record: LoanApplicationRecord) -> Result<(), SessionError> {
            self.records.lock().unwrap().push(record);
            Ok(())
        }

        async fn list(&self) -> Vec<LoanApplicationRecord> {
            self.records.lock().unwrap().clone()
        }
    }

    fn agent(credit_score: i32, limit: f64) -> UnderwritingAgent<StubGateway, StubHistory> {
        let gateway = StubGateway {
            credit_score,
            pre_approved_limit: limit,
            ..Default::default()
        };
        UnderwritingAgent::new(Arc::new(gateway), Arc::new(StubHistory::default()))
    }

    fn profile(credit_score: i32, limit: f64, salary: Option<f64>) -> CustomerProfile {
        let mut p = profile_from_value(&json!({}), Some("CUST001"));
        p.credit_score = credit_score;
        p.pre_approved_limit = limit;
        p.salary = salary;
        p
    }

    fn application(amount: f64, emi: f64) -> LoanApplication {
        LoanApplication::new("app_1", "CUST001", amount, 60, 12.0, emi)
    }

    #[test]
    fn test_instant_approval_within_limit() {
        let uw = agent(785, 500_000.0);
        let p = profile(785, 500_000.0, Some(80_000.0));
        let mut app = application(300_000.0, 6_700.0);

        let decision = uw.decide(&p, &mut app);
        assert_eq!(decision.kind, UnderwritingDecisionKind::InstantApproval);
        assert_eq!(decision.status, LoanStatus::Approved);
        assert_eq!(decision.next_action, "generate_sanction_letter");
        assert_eq!(app.status, LoanStatus::Approved);
    }

    #[test]
    fn test_low_credit_rejects_regardless_of_amount() {
        let uw = agent(590, 500_000.0);
        let p = profile(590, 500_000.0, Some(80_000.0));
        let mut app = application(50_000.0, 1_200.0);

        let decision = uw.decide(&p, &mut app);
        assert_eq!(decision.kind, UnderwritingDecisionKind::RejectionLowCredit);
        assert_eq!(decision.status, LoanStatus::Rejected);
    }

    #[test]
    fn test_excess_amount_suggests_twice_the_limit() {
        let uw = agent(785, 500_000.0);
        let p = profile(785, 500_000.0, Some(80_000.0));
        let mut app = application(1_200_000.0, 26_000.0);

        let decision = uw.decide(&p, &mut app);
        assert_eq!(decision.kind, UnderwritingDecisionKind::RejectionExcessAmount);
        assert_eq!(decision.suggested_amount, Some(1_000_000.0));
    }

    #[test]
    fn test_conditional_approval_with_affordable_emi() {
        let uw = agent(760, 500_000.0);
        let p = profile(760, 500_000.0, Some(100_000.0));
        // 1.4x the limit at a comfortable EMI.
        let mut app = application(700_000.0, 15_600.0);

        let decision = uw.decide(&p, &mut app);
        assert_eq!(decision.kind, UnderwritingDecisionKind::ConditionalApproval);
        assert_eq!(decision.status, LoanStatus::Approved);
    }

    #[test]
    fn test_conditional_band_without_salary_requires_slip() {
        let uw = agent(760, 500_000.0);
        let p = profile(760, 500_000.0, None);
        let mut app = application(700_000.0, 15_600.0);

        let decision = uw.decide(&p, &mut app);
        assert_eq!(
            decision.kind,
            UnderwritingDecisionKind::RequiresSalaryVerification
        );
        assert_eq!(decision.status, LoanStatus::RequiresDocuments);
        assert_eq!(decision.required_documents, vec!["salary_slip".to_string()]);
        assert_eq!(app.status, LoanStatus::RequiresDocuments);
    }

    #[test]
    fn test_emi_beyond_half_salary_rejects() {
        let uw = agent(760, 500_000.0);
        let p = profile(760, 500_000.0, Some(30_000.0));
        let mut app = application(700_000.0, 15_600.0);

        let decision = uw.decide(&p, &mut app);
        assert_eq!(decision.kind, UnderwritingDecisionKind::RejectionExcessAmount);
        assert_eq!(decision.status, LoanStatus::Rejected);
        assert!(decision.suggested_amount.is_some());
    }

    #[test]
    fn test_business_rules_validation_report() {
        let uw = agent(760, 500_000.0);
        let mut p = profile(690, 500_000.0, Some(50_000.0));
        p.age = 70;
        let app = application(1_200_000.0, 30_000.0);

        let report = uw.validate_business_rules(&p, &app);
        assert_eq!(report["is_valid"], json!(false));
        let violations = report["violations"].as_array().unwrap();
        assert_eq!(violations.len(), 4);
    }

    #[tokio::test]
    async fn test_full_underwriting_records_history_and_context() {
        let mut uw = agent(785, 500_000.0);
        let mut ctx = ConversationContext::new("sess_1", Some("CUST001".to_string()));
        ctx.add_collected_data(
            "customer_profile",
            json!({"name": "Ajay Kumar", "salary": 80000.0, "requested_amount": 300000.0}),
        );

        let task = AgentTask::new(
            TaskKind::Underwriting,
            json!({
                "action": "full_underwriting",
                "customer_id": "CUST001",
                "loan_application": {"requested_amount": 300000.0, "tenure": 60, "interest_rate": 12.0},
            }),
        );

        let result = uw.execute_logic(&task, &mut ctx).await.unwrap();
        assert_eq!(result["approved"], json!(true));
        assert_eq!(result["decision_type"], json!("instant_approval"));
        assert_eq!(ctx.data_value("loan_approved"), Some(&json!(true)));
        assert_eq!(ctx.data_value("credit_score"), Some(&json!(785)));
        assert!(ctx.collected_data.contains_key("approved_loan"));

        let records = uw.history.records.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, LoanStatus::Approved);
        assert_eq!(records[0].approved_amount, Some(300_000.0));
    }

    #[tokio::test]
    async fn test_full_underwriting_uses_gateway_data_over_claims() {
        // The customer claims an 850 score, but the bureau says 620.
        let mut uw = agent(620, 500_000.0);
        let mut ctx = ConversationContext::new("sess_1", Some("CUST001".to_string()));
        ctx.add_collected_data(
            "customer_profile",
            json!({"credit_score": 850, "requested_amount": 100000.0}),
        );

        let task = AgentTask::new(
            TaskKind::Underwriting,
            json!({"action": "full_underwriting", "customer_id": "CUST001"}),
        );
        let result = uw.execute_logic(&task, &mut ctx).await.unwrap();
        assert_eq!(result["approved"], json!(false));
        assert_eq!(result["decision_type"], json!("rejection_low_credit"));
    }

    #[test]
    fn test_optimal_terms_recommends_affordable_options() {
        let uw = agent(760, 500_000.0);
        let p = profile(760, 500_000.0, Some(80_000.0));
        let result = uw.optimal_terms(&p, 400_000.0);
        assert_eq!(result["calculation_successful"], json!(true));
        assert!(result["recommended_option"].is_object());
    }
}
