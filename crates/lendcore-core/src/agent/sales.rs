//! Sales worker: loan-term negotiation and objection handling.

use serde_json::{Value, json};

use lendcore_types::conversation::{AgentKind, AgentTask, ConversationContext, TaskKind};
use lendcore_types::customer::{CustomerProfile, EmploymentType};
use lendcore_types::error::AgentError;
use lendcore_types::loan::{LoanTerms, RiskLevel};

use crate::calculator::{FeeKind, LoanCalculator};

use super::{Agent, AgentState, shared_value};

/// Interest band for a credit-score category.
#[derive(Debug, Clone, Copy)]
struct RateBand {
    min: f64,
    max: f64,
}

/// Standard tenure options offered during negotiation, in months.
const TENURE_OPTIONS: [u32; 11] = [6, 12, 18, 24, 36, 48, 60, 72, 84, 96, 120];

/// Objection categories the sales flow recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ObjectionKind {
    HighInterest,
    HighEmi,
    LongTenure,
    ProcessingFee,
    General,
}

/// Sales negotiation worker.
pub struct SalesAgent {
    state: AgentState,
    calculator: LoanCalculator,
}

impl Default for SalesAgent {
    fn default() -> Self {
        Self::new()
    }
}

impl SalesAgent {
    pub fn new() -> Self {
        Self {
            state: AgentState::new(AgentKind::Sales),
            calculator: LoanCalculator::new(),
        }
    }

    /// Negotiate terms: rate from the credit band, affordable tenures,
    /// top-3 options with a presentation message.
    pub fn negotiate_loan_terms(
        &self,
        profile: &CustomerProfile,
        requested_amount: f64,
        preferred_tenure: Option<u32>,
    ) -> Result<Value, AgentError> {
        let rate = interest_rate_for(profile, requested_amount);
        let tenures = self.tenure_options(requested_amount, rate, profile, preferred_tenure);

        let mut options = Vec::new();
        for tenure in tenures.into_iter().take(3) {
            let fee_kind = processing_fee_kind(requested_amount, profile);
            let terms = self
                .calculator
                .loan_terms(requested_amount, rate, tenure, fee_kind)
                .map_err(|e| AgentError::InvalidInput(e.to_string()))?;
            let affordability = self.calculator.assess_affordability(profile, &terms);
            options.push(json!({
                "amount": terms.amount,
                "tenure": terms.tenure,
                "interest_rate": terms.interest_rate,
                "emi": terms.emi,
                "total_payable": terms.total_payable,
                "processing_fee": terms.processing_fee,
                "affordability_score": affordability_score(affordability.risk_level),
                "is_affordable": affordability.is_affordable,
                "risk_level": affordability.risk_level,
            }));
        }

        if options.is_empty() {
            return Err(AgentError::InvalidInput(format!(
                "no affordable tenure found for amount {requested_amount}"
            )));
        }

        let presentation = present_options(&options, profile, requested_amount);
        Ok(json!({
            "negotiation_successful": true,
            "loan_options": options,
            "presentation_message": presentation,
            "recommended_option": options[0],
        }))
    }

    /// Tenures whose EMI the customer can carry, preferred tenure first.
    fn tenure_options(
        &self,
        amount: f64,
        rate: f64,
        profile: &CustomerProfile,
        preferred: Option<u32>,
    ) -> Vec<u32> {
        let mut suitable: Vec<u32> = TENURE_OPTIONS
            .into_iter()
            .filter(|tenure| {
                match self.calculator.loan_terms(amount, rate, *tenure, FeeKind::Standard) {
                    Ok(terms) => {
                        profile.salary.is_none()
                            || self.calculator.assess_affordability(profile, &terms).is_affordable
                    }
                    Err(_) => false,
                }
            })
            .collect();

        if let Some(preferred) = preferred {
            if let Some(pos) = suitable.iter().position(|t| *t == preferred) {
                suitable.remove(pos);
                suitable.insert(0, preferred);
            }
        }
        suitable.truncate(5);
        suitable
    }

    /// Classify and answer a customer objection with alternatives.
    pub fn handle_objection(&self, objection: &str, current_terms: &Value) -> Value {
        let kind = classify_objection(objection);
        let amount = current_terms
            .get("amount")
            .and_then(Value::as_f64)
            .unwrap_or(100_000.0);
        let tenure = current_terms
            .get("tenure")
            .and_then(Value::as_u64)
            .unwrap_or(60) as u32;
        let rate = current_terms
            .get("interest_rate")
            .and_then(Value::as_f64)
            .unwrap_or(13.0);

        let (response, alternatives) = match kind {
            ObjectionKind::HighInterest => {
                let reduced = (rate - 0.5).max(self.calculator.min_interest_rate);
                let alt = self.calculator.loan_terms(amount, reduced, tenure, FeeKind::Standard);
                (
                    "I understand the rate feels high. With a slightly shorter tenure or a good repayment record I can sharpen it a little.".to_string(),
                    alt.ok().map(|t| vec![terms_json(&t)]).unwrap_or_default(),
                )
            }
            ObjectionKind::HighEmi => {
                let longer = TENURE_OPTIONS
                    .into_iter()
                    .filter(|t| *t > tenure)
                    .filter_map(|t| self.calculator.loan_terms(amount, rate, t, FeeKind::Standard).ok())
                    .take(2)
                    .map(|t| terms_json(&t))
                    .collect();
                (
                    "We can bring the monthly EMI down by extending the tenure. Here are a couple of easier options.".to_string(),
                    longer,
                )
            }
            ObjectionKind::LongTenure => {
                let shorter = TENURE_OPTIONS
                    .into_iter()
                    .rev()
                    .filter(|t| *t < tenure)
                    .filter_map(|t| self.calculator.loan_terms(amount, rate, t, FeeKind::Standard).ok())
                    .take(2)
                    .map(|t| terms_json(&t))
                    .collect();
                (
                    "A shorter tenure means a higher EMI but much less total interest. These are the faster routes.".to_string(),
                    shorter,
                )
            }
            ObjectionKind::ProcessingFee => (
                "The processing fee is a one-time charge capped at \u{20b9}50,000. For smaller amounts we have a promotional 1% slab.".to_string(),
                Vec::new(),
            ),
            ObjectionKind::General => (
                "I understand your concern. Let me see what alternatives I can offer you.".to_string(),
                Vec::new(),
            ),
        };

        json!({
            "objection_handled": true,
            "objection_type": objection_label(kind),
            "response_message": response,
            "alternative_options": alternatives,
            "next_action": "continue_negotiation",
        })
    }

    /// Capacity assessment: limits, ratios, and a recommended amount.
    pub fn assess_financial_capacity(&self, profile: &CustomerProfile, requested_amount: f64) -> Value {
        let ratio = if profile.pre_approved_limit > 0.0 {
            requested_amount / profile.pre_approved_limit
        } else {
            f64::INFINITY
        };
        let within_pre_approved = requested_amount <= profile.pre_approved_limit;
        let within_2x = requested_amount <= profile.pre_approved_limit * 2.0;
        let capacity_level = if within_pre_approved {
            "excellent"
        } else if within_2x {
            "good"
        } else {
            "limited"
        };

        let (recommended_amount, available_emi_capacity) = match profile.salary {
            Some(salary) => {
                let capacity =
                    salary * self.calculator.max_emi_ratio - profile.current_emi_burden();
                let recommended = if capacity > 0.0 {
                    let rate = interest_rate_for(profile, requested_amount);
                    self.calculator
                        .max_loan_amount(capacity, rate, 60)
                        .min(profile.pre_approved_limit * 2.0)
                } else {
                    0.0
                };
                (recommended, Some(capacity))
            }
            None => (profile.pre_approved_limit, None),
        };

        json!({
            "customer_id": profile.id,
            "requested_amount": requested_amount,
            "pre_approved_limit": profile.pre_approved_limit,
            "credit_score": profile.credit_score,
            "amount_to_limit_ratio": if ratio.is_finite() { json!(ratio) } else { json!("unbounded") },
            "within_pre_approved": within_pre_approved,
            "within_2x_limit": within_2x,
            "capacity_level": capacity_level,
            "recommended_amount": recommended_amount,
            "available_emi_capacity": available_emi_capacity,
        })
    }
}

impl Agent for SalesAgent {
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
        task: &AgentTask,
        ctx: &mut ConversationContext,
    ) -> Result<Value, AgentError> {
        let action = task
            .input
            .get("action")
            .and_then(Value::as_str)
            .ok_or_else(|| AgentError::MissingInput("action".to_string()))?;

        match action {
            "start_negotiation" => {
                let profile_value = shared_value(ctx, AgentKind::Sales, "customer_profile")
                    .or_else(|| task.input.get("customer_profile").cloned())
                    .ok_or_else(|| {
                        AgentError::MissingContextData("customer_profile".to_string())
                    })?;
                let profile = profile_from_value(&profile_value, ctx.customer_id.as_deref());

                let requested = profile
                    .requested_amount
                    .or_else(|| task.input.get("requested_amount").and_then(Value::as_f64))
                    .unwrap_or(profile.pre_approved_limit);

                let result = self.negotiate_loan_terms(&profile, requested, None)?;

                ctx.add_collected_data("loan_options", result["loan_options"].clone());
                ctx.add_collected_data(
                    "capacity_assessment",
                    self.assess_financial_capacity(&profile, requested),
                );
                ctx.add_collected_data("negotiation_stage", json!("terms_presented"));
                Ok(result)
            }
            "present_terms" => {
                let options = task
                    .input
                    .get("loan_options")
                    .cloned()
                    .or_else(|| shared_value(ctx, AgentKind::Sales, "loan_options"))
                    .unwrap_or(json!([]));
                let count = options.as_array().map(Vec::len).unwrap_or(0);
                Ok(json!({
                    "presentation_generated": true,
                    "options_count": count,
                    "loan_options": options,
                }))
            }
            "handle_objection" => {
                let objection = task
                    .input
                    .get("objection")
                    .and_then(Value::as_str)
                    .unwrap_or("");
                let current = task
                    .input
                    .get("current_terms")
                    .cloned()
                    .or_else(|| {
                        shared_value(ctx, AgentKind::Sales, "loan_options")
                            .and_then(|v| v.as_array().and_then(|a| a.first().cloned()))
                    })
                    .unwrap_or(json!({}));
                Ok(self.handle_objection(objection, &current))
            }
            "finalize_terms" => {
                let selected = task.input.get("selected_option").cloned().unwrap_or(json!({}));
                ctx.add_collected_data("finalized_terms", selected.clone());
                ctx.add_collected_data("negotiation_stage", json!("terms_agreed"));
                Ok(json!({
                    "terms_finalized": true,
                    "final_terms": selected,
                    "next_stage": "verification",
                }))
            }
            "assess_capacity" => {
                let profile_value = shared_value(ctx, AgentKind::Sales, "customer_profile")
                    .ok_or_else(|| {
                        AgentError::MissingContextData("customer_profile".to_string())
                    })?;
                let profile = profile_from_value(&profile_value, ctx.customer_id.as_deref());
                let requested = task
                    .input
                    .get("requested_amount")
                    .and_then(Value::as_f64)
                    .unwrap_or(0.0);
                let assessment = self.assess_financial_capacity(&profile, requested);
                ctx.add_collected_data("financial_assessment", assessment.clone());
                Ok(json!({"assessment_completed": true, "capacity_result": assessment}))
            }
            "provide_alternatives" => {
                let profile_value = shared_value(ctx, AgentKind::Sales, "customer_profile")
                    .ok_or_else(|| {
                        AgentError::MissingContextData("customer_profile".to_string())
                    })?;
                let profile = profile_from_value(&profile_value, ctx.customer_id.as_deref());
                let desired = task
                    .input
                    .get("desired_amount")
                    .and_then(Value::as_f64)
                    .or(profile.requested_amount)
                    .unwrap_or(profile.pre_approved_limit);
                let rate = interest_rate_for(&profile, desired);
                let alternatives: Vec<Value> = self
                    .calculator
                    .adjust_terms_for_affordability(&profile, desired, rate)
                    .iter()
                    .map(terms_json)
                    .collect();
                Ok(json!({
                    "alternatives_generated": true,
                    "options_count": alternatives.len(),
                    "alternative_options": alternatives,
                }))
            }
            other => Err(AgentError::InvalidInput(format!(
                "unknown sales action: {other}"
            ))),
        }
    }
}

/// Rate from the credit band, positioned by the amount-to-limit ratio.
pub fn interest_rate_for(profile: &CustomerProfile, amount: f64) -> f64 {
    let band = if profile.credit_score >= 800 {
        RateBand { min: 10.5, max: 12.0 }
    } else if profile.credit_score >= 750 {
        RateBand { min: 12.0, max: 14.5 }
    } else if profile.credit_score >= 700 {
        RateBand { min: 14.5, max: 17.0 }
    } else {
        RateBand { min: 17.0, max: 20.0 }
    };

    let ratio = if profile.pre_approved_limit > 0.0 {
        amount / profile.pre_approved_limit
    } else {
        2.0
    };
    let span = band.max - band.min;
    let rate = if ratio <= 0.5 {
        band.min
    } else if ratio <= 1.0 {
        band.min + span * 0.3
    } else if ratio <= 2.0 {
        band.min + span * 0.7
    } else {
        band.max
    };
    (rate * 100.0).round() / 100.0
}

/// Fee slab by customer tier and ticket size.
fn processing_fee_kind(amount: f64, profile: &CustomerProfile) -> FeeKind {
    if profile.credit_score >= 800 && amount >= 500_000.0 {
        FeeKind::Premium
    } else if amount <= 100_000.0 {
        FeeKind::Promotional
    } else {
        FeeKind::Standard
    }
}

fn affordability_score(risk: RiskLevel) -> f64 {
    match risk {
        RiskLevel::Low => 100.0,
        RiskLevel::Medium => 70.0,
        RiskLevel::High => 40.0,
    }
}

fn classify_objection(text: &str) -> ObjectionKind {
    let lower = text.to_lowercase();
    if lower.contains("interest") || lower.contains("rate") {
        ObjectionKind::HighInterest
    } else if lower.contains("emi") || lower.contains("monthly") || lower.contains("afford") {
        ObjectionKind::HighEmi
    } else if lower.contains("tenure") || lower.contains("long") || lower.contains("years") {
        ObjectionKind::LongTenure
    } else if lower.contains("fee") || lower.contains("charge") || lower.contains("processing") {
        ObjectionKind::ProcessingFee
    } else {
        ObjectionKind::General
    }
}

fn objection_label(kind: ObjectionKind) -> &'static str {
    match kind {
        ObjectionKind::HighInterest => "high_interest",
        ObjectionKind::HighEmi => "high_emi",
        ObjectionKind::LongTenure => "long_tenure",
        ObjectionKind::ProcessingFee => "processing_fee",
        ObjectionKind::General => "general_concern",
    }
}

fn terms_json(terms: &LoanTerms) -> Value {
    json!({
        "amount": terms.amount,
        "tenure": terms.tenure,
        "interest_rate": terms.interest_rate,
        "emi": terms.emi,
        "total_payable": terms.total_payable,
        "processing_fee": terms.processing_fee,
    })
}

/// Build a presentation message for the top options.
fn present_options(options: &[Value], profile: &CustomerProfile, requested: f64) -> String {
    let mut text = format!(
        "Personalized loan options for {} (\u{20b9}{requested:.0}):\n",
        profile.name
    );
    for (i, option) in options.iter().enumerate() {
        let emi = option["emi"].as_f64().unwrap_or(0.0);
        let tenure = option["tenure"].as_u64().unwrap_or(0);
        let rate = option["interest_rate"].as_f64().unwrap_or(0.0);
        let marker = if i == 0 { " (recommended)" } else { "" };
        text.push_str(&format!(
            "Option {}{marker}: EMI \u{20b9}{emi:.0} for {tenure} months at {rate:.1}% per annum\n",
            i + 1
        ));
    }
    text.push_str("Which option would you prefer, or would you like me to adjust any terms?");
    text
}

/// Decode a loosely-shaped customer profile value, filling the standard
/// walk-in defaults for anything missing.
pub fn profile_from_value(value: &Value, customer_id: Option<&str>) -> CustomerProfile {
    let get_str = |key: &str, default: &str| {
        value
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or(default)
            .to_string()
    };
    let get_f64 = |key: &str| value.get(key).and_then(Value::as_f64);

    let city = get_str("city", "Bangalore");
    let employment = value
        .get("employment_type")
        .and_then(Value::as_str)
        .and_then(|s| s.parse::<EmploymentType>().ok())
        .unwrap_or(EmploymentType::Salaried);

    CustomerProfile {
        id: value
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| customer_id.map(str::to_string))
            .unwrap_or_else(|| "GUEST_USER".to_string()),
        name: get_str("name", "Valued Customer"),
        age: value.get("age").and_then(Value::as_u64).unwrap_or(25) as u32,
        phone: get_str("phone", "9876543210"),
        address: value
            .get("address")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("{city}, India")),
        city,
        current_loans: Vec::new(),
        credit_score: value.get("credit_score").and_then(Value::as_i64).unwrap_or(750) as i32,
        pre_approved_limit: get_f64("pre_approved_limit").unwrap_or(500_000.0),
        salary: get_f64("salary").or(Some(50_000.0)),
        employment_type: employment,
        requested_amount: get_f64("requested_amount"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorReporter;
    use crate::agent::engine::{EngineConfig, execute_task};

    fn profile() -> CustomerProfile {
        profile_from_value(
            &json!({
                "name": "Ajay Kumar",
                "age": 32,
                "salary": 80000.0,
                "credit_score": 760,
                "pre_approved_limit": 500000.0,
                "requested_amount": 300000.0,
            }),
            None,
        )
    }

    #[test]
    fn test_interest_rate_band_positioning() {
        let p = profile();
        // 760 -> good band 12.0-14.5; ratio 0.4 -> band minimum.
        assert_eq!(interest_rate_for(&p, 200_000.0), 12.0);
        // ratio 0.6 -> min + 0.3 * 2.5 = 12.75
        assert_eq!(interest_rate_for(&p, 300_000.0), 12.75);
        // ratio 1.6 -> min + 0.7 * 2.5 = 13.75
        assert_eq!(interest_rate_for(&p, 800_000.0), 13.75);
        // beyond 2x -> band max
        assert_eq!(interest_rate_for(&p, 1_100_000.0), 14.5);
    }

    #[test]
    fn test_negotiation_produces_three_options() {
        let agent = SalesAgent::new();
        let result = agent
            .negotiate_loan_terms(&profile(), 300_000.0, None)
            .unwrap();
        assert_eq!(result["negotiation_successful"], json!(true));
        let options = result["loan_options"].as_array().unwrap();
        assert!(!options.is_empty() && options.len() <= 3);
        for option in options {
            assert!(option["emi"].as_f64().unwrap() > 0.0);
        }
        assert!(result["presentation_message"]
            .as_str()
            .unwrap()
            .contains("Ajay Kumar"));
    }

    #[test]
    fn test_objection_classification() {
        let agent = SalesAgent::new();
        let terms = json!({"amount": 300000.0, "tenure": 60, "interest_rate": 13.0});

        let emi = agent.handle_objection("the monthly emi is too much", &terms);
        assert_eq!(emi["objection_type"], json!("high_emi"));
        assert!(!emi["alternative_options"].as_array().unwrap().is_empty());

        let rate = agent.handle_objection("interest is too high", &terms);
        assert_eq!(rate["objection_type"], json!("high_interest"));

        let general = agent.handle_objection("I am not sure", &terms);
        assert_eq!(general["objection_type"], json!("general_concern"));
    }

    #[test]
    fn test_capacity_levels() {
        let agent = SalesAgent::new();
        let p = profile();
        let within = agent.assess_financial_capacity(&p, 400_000.0);
        assert_eq!(within["capacity_level"], json!("excellent"));

        let stretch = agent.assess_financial_capacity(&p, 900_000.0);
        assert_eq!(stretch["capacity_level"], json!("good"));

        let beyond = agent.assess_financial_capacity(&p, 1_500_000.0);
        assert_eq!(beyond["capacity_level"], json!("limited"));
    }

    #[tokio::test]
    async fn test_start_negotiation_task_shares_context() {
        let mut agent = SalesAgent::new();
        let mut ctx = ConversationContext::new("s", None);
        ctx.add_collected_data(
            "customer_profile",
            json!({"name": "Priya", "salary": 90000.0, "requested_amount": 400000.0}),
        );

        let mut task = AgentTask::new(TaskKind::Sales, json!({"action": "start_negotiation"}));
        let reporter = ErrorReporter::new();
        let config = EngineConfig { backoff_unit_ms: 0, ..EngineConfig::default() };
        let result = execute_task(&mut agent, &mut task, &mut ctx, &reporter, config)
            .await
            .unwrap();

        assert_eq!(result["negotiation_successful"], json!(true));
        assert!(ctx.collected_data.contains_key("loan_options"));
        assert_eq!(ctx.data_value("negotiation_stage"), Some(&json!("terms_presented")));
    }

    #[tokio::test]
    async fn test_missing_profile_fails_task() {
        let mut agent = SalesAgent::new();
        let mut ctx = ConversationContext::new("s", None);
        let mut task = AgentTask::new(TaskKind::Sales, json!({"action": "start_negotiation"}));
        let reporter = ErrorReporter::new();
        let config = EngineConfig { backoff_unit_ms: 0, ..EngineConfig::default() };

        let err = execute_task(&mut agent, &mut task, &mut ctx, &reporter, config)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::TaskFailed { attempts: 4, .. }));
    }

    #[test]
    fn test_can_execute_only_sales() {
        let agent = SalesAgent::new();
        assert!(agent.can_execute(TaskKind::Sales));
        assert!(!agent.can_execute(TaskKind::Underwriting));
    }

    #[test]
    fn test_profile_defaults() {
        let p = profile_from_value(&json!({}), Some("CUST009"));
        assert_eq!(p.id, "CUST009");
        assert_eq!(p.name, "Valued Customer");
        assert_eq!(p.credit_score, 750);
        assert_eq!(p.pre_approved_limit, 500_000.0);
        assert_eq!(p.address, "Bangalore, India");
    }
}
