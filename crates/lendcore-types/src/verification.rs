//! KYC verification records with expiry semantics.
//!
//! One record exists per (customer, session). Verified records carry an
//! expiry 30 days after completion; the ledger treats expired records the
//! same as absent ones when answering "is this customer verified".

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use std::collections::BTreeMap;

/// How long a successful verification stays valid.
pub const VERIFICATION_VALIDITY_DAYS: i64 = 30;

/// Lifecycle status of a verification record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    NotStarted,
    InProgress,
    Verified,
    Failed,
    RequiresDocuments,
    Expired,
}

/// How a verification was (or will be) performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationMethod {
    AutomaticCrm,
    DocumentBased,
    ManualReview,
    Hybrid,
}

/// Per-(customer, session) verification state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationRecord {
    pub customer_id: String,
    pub session_id: String,
    pub status: VerificationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<VerificationMethod>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_score: Option<u32>,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default)]
    pub verified_fields: Vec<String>,
    #[serde(default)]
    pub required_documents: Vec<String>,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attempt_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl VerificationRecord {
    /// Start a new in-progress record for a customer session.
    pub fn started(
        customer_id: impl Into<String>,
        session_id: impl Into<String>,
        method: VerificationMethod,
    ) -> Self {
        Self {
            customer_id: customer_id.into(),
            session_id: session_id.into(),
            status: VerificationStatus::InProgress,
            method: Some(method),
            started_at: Some(Utc::now()),
            completed_at: None,
            expires_at: None,
            verification_score: None,
            issues: Vec::new(),
            verified_fields: Vec::new(),
            required_documents: Vec::new(),
            attempts: 0,
            last_attempt_at: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Whether a verified record's validity window has passed.
    ///
    /// Only verified records expire; others report false.
    pub fn is_expired(&self) -> bool {
        if self.status != VerificationStatus::Verified {
            return false;
        }
        match self.expires_at {
            Some(at) => Utc::now() > at,
            None => false,
        }
    }

    /// Move the record to a new status, stamping completion and expiry
    /// where the transition calls for them.
    pub fn update_status(&mut self, status: VerificationStatus) {
        self.status = status;
        self.last_attempt_at = Some(Utc::now());

        match status {
            VerificationStatus::InProgress => {
                if self.started_at.is_none() {
                    self.started_at = Some(Utc::now());
                }
            }
            VerificationStatus::Verified => {
                self.completed_at = Some(Utc::now());
                if self.expires_at.is_none() {
                    self.expires_at =
                        Some(Utc::now() + Duration::days(VERIFICATION_VALIDITY_DAYS));
                }
            }
            VerificationStatus::Failed => {
                self.completed_at = Some(Utc::now());
            }
            _ => {}
        }
    }

    /// Count another verification attempt, merging any new issues
    /// (deduplicated, order preserved).
    pub fn add_attempt(&mut self, issues: &[String]) {
        self.attempts += 1;
        self.last_attempt_at = Some(Utc::now());
        for issue in issues {
            if !self.issues.contains(issue) {
                self.issues.push(issue.clone());
            }
        }
    }
}
