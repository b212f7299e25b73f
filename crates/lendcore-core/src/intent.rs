//! Keyword-based intent classification.
//!
//! A deterministic, total function: an ordered battery of checks evaluated
//! first-match-wins, with hand-tuned priorities and a constant confidence
//! per branch. The default is always `GeneralInquiry`, so every message
//! classifies to something.

use serde::{Deserialize, Serialize};

use lendcore_types::conversation::ConversationStage;

/// The intents the master agent routes on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    ComprehensiveLoanApplication,
    LoanInterest,
    CustomerDetails,
    FormSubmission,
    InformationRequest,
    Agreement,
    VerificationComplete,
    Disagreement,
    Objection,
    DocumentRelated,
    SanctionLetterRequest,
    GeneralInquiry,
}

/// Result of classifying one message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentAnalysis {
    pub intent: Intent,
    pub confidence: f64,
    pub all_intents: Vec<Intent>,
    pub message_length: usize,
    pub context_stage: ConversationStage,
    /// Fraction of application fields detected, for the comprehensive path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_completeness: Option<f64>,
}

const APPLICATION_PHRASES: [&str; 8] = [
    "apply for",
    "loan application",
    "want a loan",
    "need a loan",
    "personal loan",
    "home loan",
    "car loan",
    "business loan",
];

const KNOWN_NAMES: [&str; 6] = ["john", "doe", "ajay", "kumar", "priya", "rajesh"];

const KNOWN_CITIES: [&str; 8] = [
    "bangalore", "banglore", "mumbai", "delhi", "chennai", "kolkata", "pune", "hyderabad",
];

const AMOUNT_LITERALS: [&str; 8] = [
    "50000", "100000", "200000", "300000", "500000", "1000000", "5,00,000", "10,00,000",
];

/// The generic keyword table, scanned in declaration order.
const KEYWORD_RULES: [(Intent, &[&str]); 10] = [
    (Intent::LoanInterest, &["loan", "borrow", "money", "credit", "finance", "amount"]),
    (
        Intent::CustomerDetails,
        &["name", "age", "city", "bangalore", "mumbai", "delhi", "years old", "my name is"],
    ),
    (Intent::FormSubmission, &["form submitted", "form_data"]),
    (Intent::InformationRequest, &["how", "what", "when", "where", "why", "tell me"]),
    (Intent::Agreement, &["yes", "okay", "sure", "agree", "proceed", "continue", "approve"]),
    (
        Intent::VerificationComplete,
        &["verification complete", "kyc complete", "verified", "identity verified", "check my credit", "credit check"],
    ),
    (Intent::Disagreement, &["no", "not", "disagree", "cancel", "stop"]),
    (Intent::Objection, &["but", "however", "expensive", "high", "too much", "cannot"]),
    (Intent::DocumentRelated, &["document", "upload", "file", "salary", "slip", "proof"]),
    (
        Intent::SanctionLetterRequest,
        &["sanction letter", "approval letter", "generate letter", "pdf", "download"],
    ),
];

/// Detected application fields within a message.
#[derive(Debug, Clone, Copy, Default)]
struct FieldSignals {
    name: bool,
    age: bool,
    income: bool,
    employment: bool,
    credit_score: bool,
    amount: bool,
    city: bool,
}

impl FieldSignals {
    fn detect(message: &str, lower: &str) -> Self {
        Self {
            name: lower.contains("name")
                || lower.contains("my name is")
                || KNOWN_NAMES.iter().any(|n| lower.contains(n)),
            age: lower.contains("age") || (18..80).any(|i: i32| message.contains(&i.to_string())),
            income: lower.contains("income")
                || lower.contains("salary")
                || message.contains('\u{20b9}')
                || lower.contains("rs"),
            employment: lower.contains("work")
                || lower.contains("job")
                || lower.contains("employed")
                || lower.contains("engineer")
                || lower.contains("company"),
            credit_score: lower.contains("credit score") || lower.contains("cibil"),
            amount: AMOUNT_LITERALS.iter().any(|a| message.contains(a)),
            city: lower.contains("city") || KNOWN_CITIES.iter().any(|c| lower.contains(c)),
        }
    }

    fn application_count(&self) -> usize {
        [self.name, self.age, self.income, self.employment, self.credit_score, self.amount]
            .into_iter()
            .filter(|b| *b)
            .count()
    }

    fn detail_count(&self) -> usize {
        [self.name, self.age, self.city, self.amount]
            .into_iter()
            .filter(|b| *b)
            .count()
    }
}

/// Classify a message given the conversation's current stage.
pub fn classify(message: &str, stage: ConversationStage) -> IntentAnalysis {
    let lower = message.to_lowercase();
    let signals = FieldSignals::detect(message, &lower);

    // 1. Comprehensive application: enough fields in one message.
    let has_application_phrase = APPLICATION_PHRASES.iter().any(|p| lower.contains(p));
    let field_count = signals.application_count();
    if (has_application_phrase && field_count >= 3) || field_count >= 4 {
        return IntentAnalysis {
            intent: Intent::ComprehensiveLoanApplication,
            confidence: 0.9,
            all_intents: vec![
                Intent::ComprehensiveLoanApplication,
                Intent::CustomerDetails,
                Intent::LoanInterest,
            ],
            message_length: message.len(),
            context_stage: stage,
            application_completeness: Some(field_count as f64 / 6.0),
        };
    }

    // 2. Verification complete / credit-check request.
    if lower.contains("verification complete")
        || lower.contains("kyc complete")
        || (lower.contains("verified") && lower.contains("proceed"))
        || (lower.contains("check") && lower.contains("credit"))
        || (lower.contains("credit") && lower.contains("score"))
        || lower.contains("eligibility")
    {
        return IntentAnalysis {
            intent: Intent::VerificationComplete,
            confidence: 0.95,
            all_intents: vec![Intent::VerificationComplete, Intent::Agreement],
            message_length: message.len(),
            context_stage: stage,
            application_completeness: None,
        };
    }

    // 3. Sanction letter request.
    if (lower.contains("sanction") && lower.contains("letter")) || lower.contains("generate") {
        return IntentAnalysis {
            intent: Intent::SanctionLetterRequest,
            confidence: 0.95,
            all_intents: vec![Intent::SanctionLetterRequest, Intent::Agreement],
            message_length: message.len(),
            context_stage: stage,
            application_completeness: None,
        };
    }

    // 4. Customer-details heuristic, then the generic keyword table.
    let detected: Vec<Intent> = if signals.detail_count() >= 2 {
        vec![Intent::CustomerDetails]
    } else {
        KEYWORD_RULES
            .iter()
            .filter(|(_, keywords)| keywords.iter().any(|k| lower.contains(k)))
            .map(|(intent, _)| *intent)
            .collect()
    };

    let (intent, confidence) = match detected.first() {
        Some(first) => (*first, 0.8),
        None => (Intent::GeneralInquiry, 0.3),
    };

    IntentAnalysis {
        intent,
        confidence,
        all_intents: detected,
        message_length: message.len(),
        context_stage: stage,
        application_completeness: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify_at(message: &str) -> IntentAnalysis {
        classify(message, ConversationStage::Initiation)
    }

    #[test]
    fn test_loan_interest() {
        let analysis = classify_at("I want to borrow some money");
        assert_eq!(analysis.intent, Intent::LoanInterest);
        assert_eq!(analysis.confidence, 0.8);
    }

    #[test]
    fn test_general_inquiry_default() {
        let analysis = classify_at("hmm");
        assert_eq!(analysis.intent, Intent::GeneralInquiry);
        assert_eq!(analysis.confidence, 0.3);
        assert!(analysis.all_intents.is_empty());
    }

    #[test]
    fn test_comprehensive_application_with_phrase() {
        let analysis = classify_at(
            "I want to apply for a personal loan. My name is Ajay, age 32, salary \u{20b9}80000, working as an engineer",
        );
        assert_eq!(analysis.intent, Intent::ComprehensiveLoanApplication);
        assert_eq!(analysis.confidence, 0.9);
        let completeness = analysis.application_completeness.unwrap();
        assert!(completeness >= 0.5);
    }

    #[test]
    fn test_comprehensive_application_without_phrase_needs_four_fields() {
        let analysis = classify_at(
            "my name is Rajesh, age 29, salary rs 60000, credit score 760, working at a company",
        );
        assert_eq!(analysis.intent, Intent::ComprehensiveLoanApplication);
    }

    #[test]
    fn test_verification_complete_priority() {
        let analysis = classify_at("verification complete, please proceed");
        assert_eq!(analysis.intent, Intent::VerificationComplete);
        assert_eq!(analysis.confidence, 0.95);
        assert!(analysis.all_intents.contains(&Intent::Agreement));
    }

    #[test]
    fn test_credit_check_maps_to_verification_complete() {
        let analysis = classify_at("can you check my credit now");
        assert_eq!(analysis.intent, Intent::VerificationComplete);
    }

    #[test]
    fn test_sanction_letter_request() {
        let analysis = classify_at("please send my sanction letter");
        assert_eq!(analysis.intent, Intent::SanctionLetterRequest);
        assert_eq!(analysis.confidence, 0.95);
    }

    #[test]
    fn test_generate_alone_triggers_sanction() {
        let analysis = classify_at("generate it please");
        assert_eq!(analysis.intent, Intent::SanctionLetterRequest);
    }

    #[test]
    fn test_customer_details_heuristic() {
        let analysis = classify_at("I am from Bangalore and I need 300000");
        assert_eq!(analysis.intent, Intent::CustomerDetails);
        assert_eq!(analysis.all_intents, vec![Intent::CustomerDetails]);
    }

    #[test]
    fn test_keyword_table_order_first_match_wins() {
        // "how much money" hits both loan_interest and information_request;
        // loan_interest is declared first.
        let analysis = classify_at("how much money");
        assert_eq!(analysis.intent, Intent::LoanInterest);
        assert!(analysis.all_intents.contains(&Intent::InformationRequest));
    }

    #[test]
    fn test_agreement() {
        let analysis = classify_at("okay let us do that");
        assert_eq!(analysis.intent, Intent::Agreement);
    }

    #[test]
    fn test_objection() {
        let analysis = classify_at("that seems too expensive for me");
        assert_eq!(analysis.intent, Intent::Objection);
    }

    #[test]
    fn test_document_related() {
        let analysis = classify_at("I will upload the slip");
        assert_eq!(analysis.intent, Intent::DocumentRelated);
    }

    #[test]
    fn test_classification_is_total_and_deterministic() {
        for message in ["", "zzz", "??", "loan loan loan"] {
            let a = classify_at(message);
            let b = classify_at(message);
            assert_eq!(a.intent, b.intent);
            assert_eq!(a.confidence, b.confidence);
        }
    }
}
