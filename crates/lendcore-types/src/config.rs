//! Application configuration types.
//!
//! `AppConfig` represents the top-level `config.toml` that controls
//! storage paths, external service endpoints, and the HTTP bind address.

use serde::{Deserialize, Serialize};

use std::path::PathBuf;

/// Top-level configuration for the Lendcore service.
///
/// Loaded from `{data_dir}/config.toml`. All fields have sensible defaults;
/// external service URLs can additionally be overridden by environment
/// variables (`LENDCORE_CRM_URL`, `LENDCORE_CREDIT_BUREAU_URL`,
/// `LENDCORE_OFFER_MART_URL`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Address the HTTP server binds to.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Directory for per-session conversation context JSON files,
    /// relative to the data directory unless absolute.
    #[serde(default = "default_context_dir")]
    pub context_dir: PathBuf,

    /// Directory for generated sanction letters and uploaded documents,
    /// relative to the data directory unless absolute.
    #[serde(default = "default_uploads_dir")]
    pub uploads_dir: PathBuf,

    /// Path of the verification record store, relative to the data
    /// directory unless absolute.
    #[serde(default = "default_verification_store")]
    pub verification_store: PathBuf,

    /// Path of the application history store, relative to the data
    /// directory unless absolute.
    #[serde(default = "default_history_store")]
    pub history_store: PathBuf,

    /// External service endpoints.
    #[serde(default)]
    pub services: ServiceEndpoints,
}

/// Base URLs of the three external collaborator services.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceEndpoints {
    #[serde(default = "default_crm_url")]
    pub crm_url: String,
    #[serde(default = "default_credit_bureau_url")]
    pub credit_bureau_url: String,
    #[serde(default = "default_offer_mart_url")]
    pub offer_mart_url: String,
    /// Per-request timeout in seconds for external calls.
    #[serde(default = "default_api_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_bind_addr() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_context_dir() -> PathBuf {
    PathBuf::from("contexts")
}

fn default_uploads_dir() -> PathBuf {
    PathBuf::from("uploads")
}

fn default_verification_store() -> PathBuf {
    PathBuf::from("verification_records.json")
}

fn default_history_store() -> PathBuf {
    PathBuf::from("application_history.json")
}

fn default_crm_url() -> String {
    "http://localhost:3001".to_string()
}

fn default_credit_bureau_url() -> String {
    "http://localhost:3002".to_string()
}

fn default_offer_mart_url() -> String {
    "http://localhost:3003".to_string()
}

fn default_api_timeout_secs() -> u64 {
    30
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            context_dir: default_context_dir(),
            uploads_dir: default_uploads_dir(),
            verification_store: default_verification_store(),
            history_store: default_history_store(),
            services: ServiceEndpoints::default(),
        }
    }
}

impl Default for ServiceEndpoints {
    fn default() -> Self {
        Self {
            crm_url: default_crm_url(),
            credit_bureau_url: default_credit_bureau_url(),
            offer_mart_url: default_offer_mart_url(),
            timeout_secs: default_api_timeout_secs(),
        }
    }
}
