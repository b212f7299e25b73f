//! Application history store.
//!
//! Outcome rows are appended to one JSON array file; the history route
//! serves them newest-first. Writes take an async lock so concurrent
//! underwriting passes cannot clobber each other's append.

use std::path::PathBuf;

use tokio::sync::Mutex;

use lendcore_core::storage::HistoryStore;
use lendcore_types::error::SessionError;
use lendcore_types::loan::LoanApplicationRecord;

/// File-backed implementation of [`HistoryStore`].
pub struct FileHistoryStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileHistoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if let Err(err) = std::fs::create_dir_all(parent) {
                tracing::error!("failed to create history directory: {err}");
            }
        }
        Self {
            path,
            write_lock: Mutex::new(()),
        }
    }

    async fn read_all(&self) -> Vec<LoanApplicationRecord> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|err| {
                tracing::error!("failed to decode application history: {err}");
                Vec::new()
            }),
            Err(_) => Vec::new(),
        }
    }
}

impl HistoryStore for FileHistoryStore {
    async fn record(&self, record: LoanApplicationRecord) -> Result<(), SessionError> {
        let _guard = self.write_lock.lock().await;
        let mut records = self.read_all().await;
        records.push(record);
        let bytes = serde_json::to_vec_pretty(&records)
            .map_err(|e| SessionError::Serialization(e.to_string()))?;
        tokio::fs::write(&self.path, bytes)
            .await
            .map_err(|e| SessionError::Storage(e.to_string()))
    }

    async fn list(&self) -> Vec<LoanApplicationRecord> {
        let mut records = self.read_all().await;
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use lendcore_types::loan::LoanStatus;
    use tempfile::TempDir;

    fn record(id: &str, age_minutes: i64, status: LoanStatus) -> LoanApplicationRecord {
        LoanApplicationRecord {
            id: id.to_string(),
            session_id: "sess_1".to_string(),
            customer_name: "Ajay Kumar".to_string(),
            customer_phone: None,
            customer_city: Some("Bangalore".to_string()),
            requested_amount: 300_000.0,
            approved_amount: (status == LoanStatus::Approved).then_some(300_000.0),
            tenure: 60,
            interest_rate: 12.0,
            emi: Some(6_673.0),
            status,
            credit_score: 760,
            rejection_reason: None,
            created_at: Utc::now() - Duration::minutes(age_minutes),
        }
    }

    #[tokio::test]
    async fn test_record_and_list_newest_first() {
        let tmp = TempDir::new().unwrap();
        let store = FileHistoryStore::new(tmp.path().join("applications.json"));

        store.record(record("app_1", 10, LoanStatus::Approved)).await.unwrap();
        store.record(record("app_2", 1, LoanStatus::Rejected)).await.unwrap();

        let records = store.list().await;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, "app_2");
        assert_eq!(records[1].id, "app_1");
    }

    #[tokio::test]
    async fn test_survives_reload() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("applications.json");
        {
            let store = FileHistoryStore::new(&path);
            store.record(record("app_1", 0, LoanStatus::Approved)).await.unwrap();
        }

        let reloaded = FileHistoryStore::new(&path);
        let records = reloaded.list().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].approved_amount, Some(300_000.0));
    }

    #[tokio::test]
    async fn test_empty_store_lists_nothing() {
        let tmp = TempDir::new().unwrap();
        let store = FileHistoryStore::new(tmp.path().join("applications.json"));
        assert!(store.list().await.is_empty());
    }
}
