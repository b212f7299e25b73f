//! EMI and affordability arithmetic.
//!
//! All formulas are closed-form. The reverse formulas
//! ([`LoanCalculator::max_loan_amount`], [`LoanCalculator::tenure_for_emi`])
//! are exact algebraic/logarithmic inversions of the EMI formula, so
//! amount -> EMI -> amount round-trips within floating-point tolerance.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::json;

use lendcore_types::customer::CustomerProfile;
use lendcore_types::error::CalculationError;
use lendcore_types::loan::{AffordabilityAssessment, LoanTerms, RiskLevel};

/// Processing-fee schedule applied to a loan option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeeKind {
    Standard,
    Premium,
    Promotional,
}

impl FeeKind {
    fn rate(self) -> f64 {
        match self {
            FeeKind::Standard => 0.02,
            FeeKind::Premium => 0.015,
            FeeKind::Promotional => 0.01,
        }
    }
}

/// Validation report for a set of loan terms against a customer profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TermsValidation {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub recommendations: Vec<String>,
}

/// Outcome of a prepayment scenario calculation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrepaymentScenario {
    pub loan_closed: bool,
    pub prepayment_amount: f64,
    pub new_principal: f64,
    pub new_tenure: u32,
    pub tenure_reduced_by: u32,
    pub interest_saved: f64,
    pub new_emi: f64,
}

/// Loan calculation service with standard lending parameters.
#[derive(Debug, Clone)]
pub struct LoanCalculator {
    pub max_emi_ratio: f64,
    pub safe_emi_ratio: f64,
    pub conservative_emi_ratio: f64,
    pub min_tenure_months: u32,
    pub max_tenure_months: u32,
    pub min_loan_amount: f64,
    pub max_loan_amount_limit: f64,
    pub min_interest_rate: f64,
    pub max_interest_rate: f64,
    pub max_processing_fee: f64,
}

impl Default for LoanCalculator {
    fn default() -> Self {
        Self {
            max_emi_ratio: 0.50,
            safe_emi_ratio: 0.40,
            conservative_emi_ratio: 0.30,
            min_tenure_months: 6,
            max_tenure_months: 360,
            min_loan_amount: 10_000.0,
            max_loan_amount_limit: 10_000_000.0,
            min_interest_rate: 8.0,
            max_interest_rate: 25.0,
            max_processing_fee: 50_000.0,
        }
    }
}

impl LoanCalculator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Monthly EMI for a principal at an annual percentage rate over
    /// `tenure_months`.
    ///
    /// `EMI = P * r * (1+r)^n / ((1+r)^n - 1)` with `r = annual / 1200`;
    /// degenerates to `P / n` at zero rate. Rounded to 2 decimal places.
    pub fn emi(
        &self,
        principal: f64,
        annual_rate: f64,
        tenure_months: u32,
    ) -> Result<f64, CalculationError> {
        self.check_inputs(principal, annual_rate, tenure_months)?;

        let r = annual_rate / 1200.0;
        if r == 0.0 {
            return Ok(round2(principal / tenure_months as f64));
        }

        let growth = (1.0 + r).powi(tenure_months as i32);
        Ok(round2(principal * r * growth / (growth - 1.0)))
    }

    /// Full terms for one option: EMI, totals, and processing fee.
    pub fn loan_terms(
        &self,
        principal: f64,
        annual_rate: f64,
        tenure_months: u32,
        fee: FeeKind,
    ) -> Result<LoanTerms, CalculationError> {
        let emi = self.emi(principal, annual_rate, tenure_months)?;
        let total_payable = emi * tenure_months as f64;

        Ok(LoanTerms {
            amount: principal,
            tenure: tenure_months,
            interest_rate: annual_rate,
            emi,
            total_payable,
            total_interest: total_payable - principal,
            processing_fee: (principal * fee.rate()).min(self.max_processing_fee),
        })
    }

    /// Assess whether a customer can carry the proposed terms.
    ///
    /// With salary known: EMI-to-income and total-debt ratios against the
    /// 30/40/50% thresholds plus a 650 credit-score floor. Without salary:
    /// conservative gate of credit >= 700 and amount within the
    /// pre-approved limit.
    pub fn assess_affordability(
        &self,
        profile: &CustomerProfile,
        terms: &LoanTerms,
    ) -> AffordabilityAssessment {
        let mut factors = BTreeMap::new();
        factors.insert("has_salary_info".to_string(), json!(profile.salary.is_some()));
        factors.insert("credit_score".to_string(), json!(profile.credit_score));
        factors.insert(
            "existing_loans_count".to_string(),
            json!(profile.current_loans.len()),
        );

        let burden = profile.current_emi_burden();

        if let Some(salary) = profile.salary {
            let new_emi_ratio = terms.emi / salary;
            let total_emi_ratio = (burden + terms.emi) / salary;
            let available_income = profile.available_income().unwrap_or(0.0);
            let max_affordable_emi = (salary * self.max_emi_ratio - burden).max(0.0);
            let max_affordable_amount =
                self.max_loan_amount(max_affordable_emi, terms.interest_rate, terms.tenure);

            let is_affordable = total_emi_ratio <= self.max_emi_ratio
                && terms.emi <= max_affordable_emi
                && profile.credit_score >= 650;

            let risk_level = if total_emi_ratio <= self.conservative_emi_ratio {
                RiskLevel::Low
            } else if total_emi_ratio <= self.safe_emi_ratio {
                RiskLevel::Medium
            } else {
                RiskLevel::High
            };

            factors.insert("new_emi_ratio".to_string(), json!(new_emi_ratio));
            factors.insert("total_emi_ratio".to_string(), json!(total_emi_ratio));
            factors.insert("current_emi_burden".to_string(), json!(burden));
            factors.insert("salary".to_string(), json!(salary));

            AffordabilityAssessment {
                is_affordable,
                emi_to_income_ratio: new_emi_ratio,
                debt_to_income_ratio: total_emi_ratio,
                available_income,
                max_affordable_emi,
                max_affordable_amount,
                risk_level,
                factors,
            }
        } else {
            let is_affordable =
                profile.credit_score >= 700 && terms.amount <= profile.pre_approved_limit;

            AffordabilityAssessment {
                is_affordable,
                emi_to_income_ratio: 0.0,
                debt_to_income_ratio: 0.0,
                available_income: 0.0,
                max_affordable_emi: 0.0,
                max_affordable_amount: profile.pre_approved_limit,
                risk_level: RiskLevel::Medium,
                factors,
            }
        }
    }

    /// Generate up to five alternative terms that fit the customer's EMI
    /// capacity: tenure-fit options at the desired amount, plus amount-fit
    /// options at standard tenures, deduped and sorted by amount desc then
    /// EMI asc.
    pub fn adjust_terms_for_affordability(
        &self,
        profile: &CustomerProfile,
        desired_amount: f64,
        annual_rate: f64,
    ) -> Vec<LoanTerms> {
        let target_emis: Vec<f64> = if let Some(salary) = profile.salary {
            let burden = profile.current_emi_burden();
            vec![
                salary * self.conservative_emi_ratio - burden,
                salary * self.safe_emi_ratio - burden,
                salary * self.max_emi_ratio - burden,
            ]
        } else {
            let estimated = profile.pre_approved_limit * 0.02;
            vec![estimated * 0.8, estimated, estimated * 1.2]
        };

        let mut options = Vec::new();

        for target_emi in target_emis {
            if target_emi <= 0.0 {
                continue;
            }

            if let Ok(required_tenure) = self.tenure_for_emi(desired_amount, annual_rate, target_emi)
            {
                if (self.min_tenure_months..=self.max_tenure_months).contains(&required_tenure) {
                    if let Ok(terms) =
                        self.loan_terms(desired_amount, annual_rate, required_tenure, FeeKind::Standard)
                    {
                        options.push(terms);
                    }
                }
            }

            for tenure in [24u32, 36, 48, 60, 84, 120] {
                let max_amount = self.max_loan_amount(target_emi, annual_rate, tenure);
                if max_amount < self.min_loan_amount {
                    continue;
                }
                let amount = desired_amount.min(max_amount);
                if let Ok(terms) = self.loan_terms(amount, annual_rate, tenure, FeeKind::Standard) {
                    if terms.emi <= target_emi * 1.05 {
                        options.push(terms);
                    }
                }
            }
        }

        let mut seen = std::collections::BTreeSet::new();
        options.retain(|t| seen.insert((t.amount.round() as i64, t.tenure, t.emi.round() as i64)));
        options.sort_by(|a, b| {
            b.amount
                .partial_cmp(&a.amount)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.emi.partial_cmp(&b.emi).unwrap_or(std::cmp::Ordering::Equal))
        });
        options.truncate(5);
        options
    }

    /// Validate terms against hard limits and the customer's profile.
    pub fn validate_terms(&self, terms: &LoanTerms, profile: &CustomerProfile) -> TermsValidation {
        let mut report = TermsValidation {
            is_valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
            recommendations: Vec::new(),
        };

        if terms.amount < self.min_loan_amount {
            report.errors.push(format!(
                "Loan amount \u{20b9}{:.0} is below minimum \u{20b9}{:.0}",
                terms.amount, self.min_loan_amount
            ));
        }
        if terms.amount > self.max_loan_amount_limit {
            report.errors.push(format!(
                "Loan amount \u{20b9}{:.0} exceeds maximum \u{20b9}{:.0}",
                terms.amount, self.max_loan_amount_limit
            ));
        }
        if terms.tenure < self.min_tenure_months {
            report.errors.push(format!(
                "Tenure {} months is below minimum {} months",
                terms.tenure, self.min_tenure_months
            ));
        }
        if terms.tenure > self.max_tenure_months {
            report.errors.push(format!(
                "Tenure {} months exceeds maximum {} months",
                terms.tenure, self.max_tenure_months
            ));
        }
        if terms.interest_rate < self.min_interest_rate {
            report.errors.push(format!(
                "Interest rate {}% is below minimum {}%",
                terms.interest_rate, self.min_interest_rate
            ));
        }
        if terms.interest_rate > self.max_interest_rate {
            report.errors.push(format!(
                "Interest rate {}% exceeds maximum {}%",
                terms.interest_rate, self.max_interest_rate
            ));
        }
        if terms.amount > profile.pre_approved_limit * 2.0 {
            report.errors.push(format!(
                "Loan amount exceeds 2x pre-approved limit of \u{20b9}{:.0}",
                profile.pre_approved_limit * 2.0
            ));
        }
        if profile.credit_score < 650 {
            report.errors.push(format!(
                "Credit score {} is below minimum requirement of 650",
                profile.credit_score
            ));
        }

        report.is_valid = report.errors.is_empty();

        let affordability = self.assess_affordability(profile, terms);
        if !affordability.is_affordable {
            report.warnings.push(format!(
                "EMI of \u{20b9}{:.0} may exceed customer's repayment capacity",
                terms.emi
            ));
        }
        if affordability.risk_level == RiskLevel::High {
            report
                .warnings
                .push("High risk: EMI-to-income ratio exceeds safe limits".to_string());
        }
        if terms.amount > profile.pre_approved_limit {
            report.recommendations.push(
                "Consider reducing loan amount to within pre-approved limit for instant approval"
                    .to_string(),
            );
        }
        if affordability.emi_to_income_ratio > self.safe_emi_ratio {
            report.recommendations.push(format!(
                "Consider extending tenure to reduce EMI below \u{20b9}{:.0}",
                affordability.max_affordable_emi
            ));
        }

        report
    }

    /// Evaluate a lump-sum prepayment at `prepayment_month`, holding EMI
    /// constant and shortening the tenure.
    pub fn prepayment_scenario(
        &self,
        terms: &LoanTerms,
        prepayment_amount: f64,
        prepayment_month: u32,
    ) -> Result<PrepaymentScenario, CalculationError> {
        let remaining = self.remaining_principal(
            terms.amount,
            terms.interest_rate,
            terms.emi,
            prepayment_month,
        );
        let prepayment = prepayment_amount.min(remaining);
        let new_principal = remaining - prepayment;
        let remaining_tenure = terms.tenure.saturating_sub(prepayment_month);

        if new_principal <= 0.0 {
            return Ok(PrepaymentScenario {
                loan_closed: true,
                prepayment_amount: prepayment,
                new_principal: 0.0,
                new_tenure: 0,
                tenure_reduced_by: remaining_tenure,
                interest_saved: future_interest(remaining, terms.emi, remaining_tenure),
                new_emi: 0.0,
            });
        }

        let new_tenure = self.tenure_for_emi(new_principal, terms.interest_rate, terms.emi)?;
        let saved = future_interest(remaining, terms.emi, remaining_tenure)
            - future_interest(new_principal, terms.emi, new_tenure);

        Ok(PrepaymentScenario {
            loan_closed: false,
            prepayment_amount: prepayment,
            new_principal,
            new_tenure,
            tenure_reduced_by: remaining_tenure.saturating_sub(new_tenure),
            interest_saved: saved,
            new_emi: terms.emi,
        })
    }

    /// Maximum principal repayable with `target_emi` at the given rate and
    /// tenure. Exact inverse of the EMI formula:
    /// `P = E * ((1+r)^n - 1) / (r * (1+r)^n)`.
    pub fn max_loan_amount(&self, target_emi: f64, annual_rate: f64, tenure_months: u32) -> f64 {
        let r = annual_rate / 1200.0;
        if r == 0.0 {
            return target_emi * tenure_months as f64;
        }
        let growth = (1.0 + r).powi(tenure_months as i32);
        let denominator = r * growth;
        if denominator == 0.0 {
            return 0.0;
        }
        target_emi * (growth - 1.0) / denominator
    }

    /// Months needed to repay `principal` at `target_emi`. Logarithmic
    /// inverse: `n = -ln(1 - P*r/E) / ln(1+r)`, rounded up.
    ///
    /// Fails when the EMI does not even cover the first month's interest
    /// (the loan would never amortize).
    pub fn tenure_for_emi(
        &self,
        principal: f64,
        annual_rate: f64,
        target_emi: f64,
    ) -> Result<u32, CalculationError> {
        let r = annual_rate / 1200.0;
        if r == 0.0 {
            if target_emi <= 0.0 {
                return Err(CalculationError::EmiBelowInterest);
            }
            return Ok((principal / target_emi).ceil() as u32);
        }
        if target_emi <= principal * r {
            return Err(CalculationError::EmiBelowInterest);
        }
        let tenure = -(1.0 - principal * r / target_emi).ln() / (1.0 + r).ln();
        Ok(tenure.ceil() as u32)
    }

    /// Outstanding principal after `months_paid` installments, by the
    /// standard amortization identity.
    pub fn remaining_principal(
        &self,
        principal: f64,
        annual_rate: f64,
        emi: f64,
        months_paid: u32,
    ) -> f64 {
        let r = annual_rate / 1200.0;
        if r == 0.0 {
            return (principal - emi * months_paid as f64).max(0.0);
        }
        let growth = (1.0 + r).powi(months_paid as i32);
        (principal * growth - emi * (growth - 1.0) / r).max(0.0)
    }

    fn check_inputs(
        &self,
        principal: f64,
        annual_rate: f64,
        tenure_months: u32,
    ) -> Result<(), CalculationError> {
        if principal <= 0.0 {
            return Err(CalculationError::NonPositivePrincipal);
        }
        if annual_rate < 0.0 {
            return Err(CalculationError::NegativeRate);
        }
        if tenure_months == 0 {
            return Err(CalculationError::NonPositiveTenure);
        }
        if principal > self.max_loan_amount_limit {
            return Err(CalculationError::PrincipalTooLarge(
                self.max_loan_amount_limit as u64,
            ));
        }
        if tenure_months > self.max_tenure_months {
            return Err(CalculationError::TenureTooLong(self.max_tenure_months));
        }
        Ok(())
    }
}

/// Total interest paid over the remaining schedule.
fn future_interest(principal: f64, emi: f64, remaining_months: u32) -> f64 {
    (emi * remaining_months as f64 - principal).max(0.0)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
