//! Customer profile and existing-loan records.
//!
//! A single typed [`CustomerProfile`] is used at every boundary; form
//! submissions and free-text extraction both normalize into it before any
//! business rule runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// An existing loan obligation on a customer's profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoanDetails {
    pub id: String,
    pub amount: f64,
    pub tenure: u32,
    pub interest_rate: f64,
    pub emi: f64,
    pub status: String,
    pub start_date: DateTime<Utc>,
}

/// How the customer earns their income.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmploymentType {
    Salaried,
    SelfEmployed,
    Business,
    Professional,
    Retired,
}

impl std::str::FromStr for EmploymentType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "salaried" => Ok(EmploymentType::Salaried),
            "self_employed" => Ok(EmploymentType::SelfEmployed),
            "business" => Ok(EmploymentType::Business),
            "professional" => Ok(EmploymentType::Professional),
            "retired" => Ok(EmploymentType::Retired),
            other => Err(ValidationError::InvalidEmploymentType(other.to_string())),
        }
    }
}

/// Customer profile used as calculation input throughout the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerProfile {
    pub id: String,
    pub name: String,
    pub age: u32,
    pub city: String,
    pub phone: String,
    pub address: String,
    #[serde(default)]
    pub current_loans: Vec<LoanDetails>,
    pub credit_score: i32,
    pub pre_approved_limit: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub salary: Option<f64>,
    pub employment_type: EmploymentType,
    /// Amount the customer asked for in this conversation, once known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_amount: Option<f64>,
}

impl CustomerProfile {
    /// Validate field-level constraints (credit score range, non-empty
    /// identity fields, Indian mobile number format).
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::EmptyField { field: "name" });
        }
        if self.city.trim().is_empty() {
            return Err(ValidationError::EmptyField { field: "city" });
        }
        if self.address.trim().is_empty() {
            return Err(ValidationError::EmptyField { field: "address" });
        }
        if !(300..=900).contains(&self.credit_score) {
            return Err(ValidationError::CreditScoreOutOfRange(self.credit_score));
        }
        let normalized = normalize_phone(&self.phone);
        if normalized.len() != 10 || !normalized.starts_with(['6', '7', '8', '9']) {
            return Err(ValidationError::InvalidPhone(self.phone.clone()));
        }
        Ok(())
    }

    /// Sum of EMIs on existing loans.
    pub fn current_emi_burden(&self) -> f64 {
        self.current_loans.iter().map(|l| l.emi).sum()
    }

    /// Existing EMI burden as a percentage of salary, if salary is known.
    pub fn debt_to_income_ratio(&self) -> Option<f64> {
        let salary = self.salary?;
        if salary <= 0.0 {
            return Some(0.0);
        }
        Some(self.current_emi_burden() / salary * 100.0)
    }

    /// Monthly income left after existing EMIs, if salary is known.
    pub fn available_income(&self) -> Option<f64> {
        let salary = self.salary?;
        Some((salary - self.current_emi_burden()).max(0.0))
    }

    /// Coarse eligibility gate used before full underwriting.
    pub fn is_eligible_for_amount(&self, requested_amount: f64) -> bool {
        self.credit_score >= 700
            && requested_amount <= self.pre_approved_limit * 2.0
            && self.age >= 21
    }
}

/// Normalize an Indian mobile number to its bare ten digits.
///
/// Strips everything non-numeric, then a `91` country code or a leading
/// trunk zero.
pub fn normalize_phone(phone: &str) -> String {
    let digits: String = phone.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() == 12 && digits.starts_with("91") {
        digits[2..].to_string()
    } else if digits.len() == 11 && digits.starts_with('0') {
        digits[1..].to_string()
    } else {
        digits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> CustomerProfile {
        CustomerProfile {
            id: "CUST001".to_string(),
            name: "Ajay Kumar".to_string(),
            age: 32,
            city: "Bangalore".to_string(),
            phone: "+91 98765 43210".to_string(),
            address: "42 MG Road, Bangalore, Karnataka".to_string(),
            current_loans: vec![],
            credit_score: 760,
            pre_approved_limit: 500_000.0,
            salary: Some(80_000.0),
            employment_type: EmploymentType::Salaried,
            requested_amount: Some(300_000.0),
        }
    }

    #[test]
    fn test_validate_accepts_good_profile() {
        assert!(profile().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_phone() {
        let mut p = profile();
        p.phone = "12345".to_string();
        assert!(matches!(p.validate(), Err(ValidationError::InvalidPhone(_))));
    }

    #[test]
    fn test_validate_rejects_credit_score_out_of_range() {
        let mut p = profile();
        p.credit_score = 950;
        assert!(matches!(
            p.validate(),
            Err(ValidationError::CreditScoreOutOfRange(950))
        ));
    }

    #[test]
    fn test_normalize_phone_variants() {
        assert_eq!(normalize_phone("+91 98765 43210"), "9876543210");
        assert_eq!(normalize_phone("919876543210"), "9876543210");
        assert_eq!(normalize_phone("09876543210"), "9876543210");
        assert_eq!(normalize_phone("9876543210"), "9876543210");
    }

    #[test]
    fn test_debt_ratio_and_available_income() {
        let mut p = profile();
        p.current_loans.push(LoanDetails {
            id: "L1".to_string(),
            amount: 200_000.0,
            tenure: 36,
            interest_rate: 12.0,
            emi: 8_000.0,
            status: "active".to_string(),
            start_date: Utc::now(),
        });
        assert_eq!(p.current_emi_burden(), 8_000.0);
        assert_eq!(p.debt_to_income_ratio(), Some(10.0));
        assert_eq!(p.available_income(), Some(72_000.0));
    }

    #[test]
    fn test_no_salary_means_no_ratios() {
        let mut p = profile();
        p.salary = None;
        assert_eq!(p.debt_to_income_ratio(), None);
        assert_eq!(p.available_income(), None);
    }

    #[test]
    fn test_eligibility_gate() {
        let p = profile();
        assert!(p.is_eligible_for_amount(900_000.0));
        assert!(!p.is_eligible_for_amount(1_100_000.0));

        let mut low = profile();
        low.credit_score = 690;
        assert!(!low.is_eligible_for_amount(100_000.0));
    }

    #[test]
    fn test_employment_type_parse() {
        assert_eq!(
            "self_employed".parse::<EmploymentType>().unwrap(),
            EmploymentType::SelfEmployed
        );
        assert!("astronaut".parse::<EmploymentType>().is_err());
    }
}
