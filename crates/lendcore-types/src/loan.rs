//! Loan application, terms, and underwriting decision types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use std::collections::BTreeMap;
use std::fmt;

use crate::error::ValidationError;

/// Status of a loan application as it moves through underwriting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoanStatus {
    Pending,
    Approved,
    Rejected,
    RequiresDocuments,
}

/// The specific underwriting outcome classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnderwritingDecisionKind {
    InstantApproval,
    ConditionalApproval,
    RejectionExcessAmount,
    RejectionLowCredit,
    RequiresSalaryVerification,
}

impl fmt::Display for UnderwritingDecisionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UnderwritingDecisionKind::InstantApproval => "instant_approval",
            UnderwritingDecisionKind::ConditionalApproval => "conditional_approval",
            UnderwritingDecisionKind::RejectionExcessAmount => "rejection_excess_amount",
            UnderwritingDecisionKind::RejectionLowCredit => "rejection_low_credit",
            UnderwritingDecisionKind::RequiresSalaryVerification => "requires_salary_verification",
        };
        write!(f, "{s}")
    }
}

/// A loan application under assessment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoanApplication {
    pub id: String,
    pub customer_id: String,
    pub requested_amount: f64,
    pub tenure: u32,
    pub interest_rate: f64,
    pub emi: f64,
    pub status: LoanStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
}

impl LoanApplication {
    pub fn new(
        id: impl Into<String>,
        customer_id: impl Into<String>,
        requested_amount: f64,
        tenure: u32,
        interest_rate: f64,
        emi: f64,
    ) -> Self {
        Self {
            id: id.into(),
            customer_id: customer_id.into(),
            requested_amount,
            tenure,
            interest_rate,
            emi,
            status: LoanStatus::Pending,
            created_at: Utc::now(),
            approved_at: None,
            rejection_reason: None,
        }
    }

    /// Check amount, tenure, and rate against hard limits.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.requested_amount <= 0.0 || self.requested_amount > 10_000_000.0 {
            return Err(ValidationError::AmountOutOfRange);
        }
        if !(6..=360).contains(&self.tenure) {
            return Err(ValidationError::TenureOutOfRange);
        }
        if !(0.0..=50.0).contains(&self.interest_rate) {
            return Err(ValidationError::RateOutOfRange);
        }
        Ok(())
    }

    pub fn approve(&mut self) {
        self.status = LoanStatus::Approved;
        self.approved_at = Some(Utc::now());
        self.rejection_reason = None;
    }

    pub fn reject(&mut self, reason: impl Into<String>) {
        self.status = LoanStatus::Rejected;
        self.rejection_reason = Some(reason.into());
        self.approved_at = None;
    }

    pub fn require_documents(&mut self) {
        self.status = LoanStatus::RequiresDocuments;
    }
}

/// Fully-computed terms for one loan option.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanTerms {
    pub amount: f64,
    pub tenure: u32,
    pub interest_rate: f64,
    pub emi: f64,
    pub total_payable: f64,
    pub total_interest: f64,
    pub processing_fee: f64,
}

/// Repayment-capacity risk band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// Result of assessing a customer's capacity to repay a set of terms.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AffordabilityAssessment {
    pub is_affordable: bool,
    pub emi_to_income_ratio: f64,
    pub debt_to_income_ratio: f64,
    pub available_income: f64,
    pub max_affordable_emi: f64,
    pub max_affordable_amount: f64,
    pub risk_level: RiskLevel,
    pub factors: BTreeMap<String, Value>,
}

/// The outcome of an underwriting pass over one application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnderwritingDecision {
    pub application_id: String,
    pub status: LoanStatus,
    pub kind: UnderwritingDecisionKind,
    pub credit_score: i32,
    pub pre_approved_limit: f64,
    pub message: String,
    pub next_action: String,
    #[serde(default)]
    pub factors: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_amount: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_documents: Vec<String>,
    pub decided_at: DateTime<Utc>,
}

/// One row of the persisted application history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoanApplicationRecord {
    pub id: String,
    pub session_id: String,
    pub customer_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_city: Option<String>,
    pub requested_amount: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_amount: Option<f64>,
    pub tenure: u32,
    pub interest_rate: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emi: Option<f64>,
    pub status: LoanStatus,
    pub credit_score: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn application() -> LoanApplication {
        LoanApplication::new("app_1", "CUST001", 300_000.0, 60, 12.5, 6_750.0)
    }

    #[test]
    fn test_validate_limits() {
        assert!(application().validate().is_ok());

        let mut a = application();
        a.requested_amount = 20_000_000.0;
        assert!(matches!(a.validate(), Err(ValidationError::AmountOutOfRange)));

        let mut a = application();
        a.tenure = 3;
        assert!(matches!(a.validate(), Err(ValidationError::TenureOutOfRange)));

        let mut a = application();
        a.interest_rate = 55.0;
        assert!(matches!(a.validate(), Err(ValidationError::RateOutOfRange)));
    }

    #[test]
    fn test_approve_clears_rejection() {
        let mut a = application();
        a.reject("low credit");
        assert_eq!(a.status, LoanStatus::Rejected);
        assert!(a.rejection_reason.is_some());

        a.approve();
        assert_eq!(a.status, LoanStatus::Approved);
        assert!(a.approved_at.is_some());
        assert!(a.rejection_reason.is_none());
    }

    #[test]
    fn test_require_documents() {
        let mut a = application();
        a.require_documents();
        assert_eq!(a.status, LoanStatus::RequiresDocuments);
    }

    #[test]
    fn test_decision_kind_serde() {
        let json = serde_json::to_string(&UnderwritingDecisionKind::RejectionLowCredit).unwrap();
        assert_eq!(json, "\"rejection_low_credit\"");
    }
}
