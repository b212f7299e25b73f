//! Application configuration loader.
//!
//! Reads `config.toml` from the data directory and deserializes it into
//! [`AppConfig`]. Falls back to the defaults when the file is missing or
//! malformed, then applies environment overrides for the external service
//! URLs so deployments can repoint the collaborators without editing the
//! file.

use std::path::Path;

use lendcore_types::config::AppConfig;

/// Load configuration from `{data_dir}/config.toml`.
///
/// - If the file does not exist, returns [`AppConfig::default()`].
/// - If the file exists but fails to parse, logs a warning and returns the
///   default.
/// - `LENDCORE_CRM_URL`, `LENDCORE_CREDIT_BUREAU_URL`, and
///   `LENDCORE_OFFER_MART_URL` override the corresponding endpoints in
///   every case.
pub async fn load_app_config(data_dir: &Path) -> AppConfig {
    let config_path = data_dir.join("config.toml");

    let mut config = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => match toml::from_str::<AppConfig>(&content) {
            Ok(config) => config,
            Err(err) => {
                tracing::warn!(
                    "Failed to parse {}: {err}, using defaults",
                    config_path.display()
                );
                AppConfig::default()
            }
        },
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(
                "No config.toml found at {}, using defaults",
                config_path.display()
            );
            AppConfig::default()
        }
        Err(err) => {
            tracing::warn!(
                "Failed to read {}: {err}, using defaults",
                config_path.display()
            );
            AppConfig::default()
        }
    };

    if let Ok(url) = std::env::var("LENDCORE_CRM_URL") {
        config.services.crm_url = url;
    }
    if let Ok(url) = std::env::var("LENDCORE_CREDIT_BUREAU_URL") {
        config.services.credit_bureau_url = url;
    }
    if let Ok(url) = std::env::var("LENDCORE_OFFER_MART_URL") {
        config.services.offer_mart_url = url;
    }

    config
}
