//! Storage and collaborator traits.
//!
//! Uses RPITIT (native async fn in traits, Rust 2024 edition).
//! Implementations live in `lendcore-infra`; the API crate pins services
//! to concrete types at its composition root.

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use lendcore_types::conversation::ConversationContext;
use lendcore_types::customer::CustomerProfile;
use lendcore_types::error::{AgentError, GatewayError, SessionError};
use lendcore_types::loan::{LoanApplication, LoanApplicationRecord};
use lendcore_types::verification::{VerificationMethod, VerificationRecord, VerificationStatus};

/// Persistence for per-session conversation contexts.
pub trait ContextStore: Send + Sync {
    /// Create and persist a fresh context.
    fn create(
        &self,
        customer_id: Option<String>,
    ) -> impl Future<Output = Result<ConversationContext, SessionError>> + Send;

    /// Fetch a context from cache or disk.
    fn get(
        &self,
        session_id: &str,
    ) -> impl Future<Output = Option<ConversationContext>> + Send;

    /// Write a context to cache and disk.
    fn update(
        &self,
        context: &ConversationContext,
    ) -> impl Future<Output = Result<(), SessionError>> + Send;

    /// Delete a session's context from cache and disk.
    fn remove(&self, session_id: &str) -> impl Future<Output = ()> + Send;

    /// Recover a context from disk after a restart, stamping recovery
    /// metadata on success.
    fn recover(
        &self,
        session_id: &str,
    ) -> impl Future<Output = Option<ConversationContext>> + Send;

    /// Session ids currently cached in memory.
    fn active_sessions(&self) -> Vec<String>;

    /// Snapshot of all cached contexts.
    fn all_active(&self) -> Vec<ConversationContext>;

    /// Drop stale cache entries and delete context files older than the
    /// retention window. Returns the number of sessions cleaned.
    fn cleanup_stale(&self) -> impl Future<Output = usize> + Send;
}

/// Summary counters for the verification ledger.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerStatistics {
    pub total_verifications: usize,
    pub successful_verifications: usize,
    pub success_rate: f64,
    pub average_attempts: f64,
    pub status_distribution: HashMap<String, usize>,
    pub period_days: i64,
}

/// Per-(customer, session) verification record store.
///
/// Implementations persist the whole record set as one file under a lock;
/// operations are synchronous.
pub trait VerificationLedger: Send + Sync {
    /// Begin verification, reusing an existing valid verified record for
    /// the same (customer, session) if one exists.
    fn start(
        &self,
        customer_id: &str,
        session_id: &str,
        method: VerificationMethod,
    ) -> VerificationRecord;

    /// Update a record's status and apply a patch; returns the updated
    /// record, or None when no record exists for the pair.
    fn update(
        &self,
        customer_id: &str,
        session_id: &str,
        status: VerificationStatus,
        apply: impl FnOnce(&mut VerificationRecord),
    ) -> Option<VerificationRecord>;

    /// Current record for the pair, marking it expired in place when its
    /// validity window has passed.
    fn get(&self, customer_id: &str, session_id: &str) -> Option<VerificationRecord>;

    /// All records for a customer across sessions.
    fn history_for(&self, customer_id: &str) -> Vec<VerificationRecord>;

    /// Whether the customer holds any non-expired verified record.
    fn is_customer_verified(&self, customer_id: &str) -> bool;

    /// Most recently started record for a customer.
    fn latest_for(&self, customer_id: &str) -> Option<VerificationRecord>;

    /// Count an attempt against the pair's record, merging issues.
    fn record_attempt(
        &self,
        customer_id: &str,
        session_id: &str,
        issues: &[String],
    ) -> Option<VerificationRecord>;

    /// Drop expired records and records older than the retention window.
    fn cleanup_stale(&self) -> usize;

    /// Aggregate statistics over the trailing `days`.
    fn statistics(&self, days: i64) -> LedgerStatistics;
}

/// Persisted per-application outcome rows served by the history route.
pub trait HistoryStore: Send + Sync {
    fn record(
        &self,
        record: LoanApplicationRecord,
    ) -> impl Future<Output = Result<(), SessionError>> + Send;

    fn list(&self) -> impl Future<Output = Vec<LoanApplicationRecord>> + Send;
}

/// Customer master data as returned by the CRM collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerRecord {
    pub id: String,
    pub name: String,
    pub phone: String,
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub salary: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub employment_type: Option<String>,
    /// True when this record came from the static fallback provider.
    #[serde(default)]
    pub from_fallback: bool,
    /// Fallback records cannot be trusted for automatic KYC.
    #[serde(default)]
    pub requires_manual_verification: bool,
}

/// Credit bureau response.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CreditReport {
    pub credit_score: i32,
    #[serde(default)]
    pub from_fallback: bool,
}

/// Offer mart response.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OfferSheet {
    pub pre_approved_limit: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interest_rate: Option<f64>,
    #[serde(default)]
    pub from_fallback: bool,
}

/// The three external collaborator endpoints behind one resilient client.
///
/// Implementations wrap each endpoint with a circuit breaker, bounded
/// retry, response validation, and static fallback data; callers treat
/// every fetch as a blocking-from-their-view async call that either
/// returns data (live or fallback) or a terminal [`GatewayError`].
pub trait ExternalServices: Send + Sync {
    fn fetch_customer(
        &self,
        customer_id: &str,
    ) -> impl Future<Output = Result<CustomerRecord, GatewayError>> + Send;

    fn fetch_credit_report(
        &self,
        customer_id: &str,
    ) -> impl Future<Output = Result<CreditReport, GatewayError>> + Send;

    fn fetch_offers(
        &self,
        customer_id: &str,
    ) -> impl Future<Output = Result<OfferSheet, GatewayError>> + Send;
}

/// A generated sanction letter on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderedLetter {
    pub path: PathBuf,
    pub filename: String,
    pub download_link: String,
    pub file_size: u64,
}

/// Sanction-letter rendering collaborator.
pub trait LetterRenderer: Send + Sync {
    fn render(
        &self,
        application: &LoanApplication,
        customer: &CustomerProfile,
    ) -> impl Future<Output = Result<RenderedLetter, AgentError>> + Send;
}

/// Document text-extraction collaborator (OCR stand-in).
pub trait DocumentExtractor: Send + Sync {
    fn extract_text(
        &self,
        path: &std::path::Path,
        mime_type: &str,
    ) -> impl Future<Output = Result<String, AgentError>> + Send;
}
