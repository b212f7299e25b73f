//! Whole-file JSON verification ledger.
//!
//! All records live in one JSON document guarded by a process-wide mutex;
//! every mutation rewrites the file. Records are loaded once at startup,
//! verified records expire 30 days after completion, and anything older
//! than the retention window is swept by `cleanup_stale`.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{Duration, Utc};

use lendcore_core::storage::{LedgerStatistics, VerificationLedger};
use lendcore_types::verification::{VerificationMethod, VerificationRecord, VerificationStatus};

/// Records untouched for this long are removed by cleanup.
const RETENTION_DAYS: i64 = 90;

/// File-backed implementation of [`VerificationLedger`].
pub struct FileVerificationLedger {
    path: PathBuf,
    records: Mutex<HashMap<String, VerificationRecord>>,
}

fn record_key(customer_id: &str, session_id: &str) -> String {
    format!("{customer_id}_{session_id}")
}

impl FileVerificationLedger {
    /// Open the ledger, loading any existing records from disk.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if let Err(err) = fs::create_dir_all(parent) {
                tracing::error!("failed to create ledger directory: {err}");
            }
        }

        let records = match fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<HashMap<String, VerificationRecord>>(&bytes)
            {
                Ok(records) => {
                    tracing::info!(count = records.len(), "loaded verification records");
                    records
                }
                Err(err) => {
                    tracing::error!("failed to decode verification ledger: {err}");
                    HashMap::new()
                }
            },
            Err(_) => HashMap::new(),
        };

        Self {
            path,
            records: Mutex::new(records),
        }
    }

    /// Rewrite the whole file. Callers hold the records lock.
    fn save(&self, records: &HashMap<String, VerificationRecord>) {
        match serde_json::to_vec_pretty(records) {
            Ok(bytes) => {
                if let Err(err) = fs::write(&self.path, bytes) {
                    tracing::error!("failed to write verification ledger: {err}");
                }
            }
            Err(err) => tracing::error!("failed to encode verification ledger: {err}"),
        }
    }
}

impl VerificationLedger for FileVerificationLedger {
    fn start(
        &self,
        customer_id: &str,
        session_id: &str,
        method: VerificationMethod,
    ) -> VerificationRecord {
        let mut records = self.records.lock().expect("ledger lock poisoned");
        let key = record_key(customer_id, session_id);

        if let Some(existing) = records.get(&key) {
            if existing.status == VerificationStatus::Verified && !existing.is_expired() {
                tracing::info!(customer_id, "reusing valid verification record");
                return existing.clone();
            }
        }

        let record = VerificationRecord::started(customer_id, session_id, method);
        records.insert(key, record.clone());
        self.save(&records);
        tracing::info!(customer_id, session_id, "started verification");
        record
    }

    fn update(
        &self,
        customer_id: &str,
        session_id: &str,
        status: VerificationStatus,
        apply: impl FnOnce(&mut VerificationRecord),
    ) -> Option<VerificationRecord> {
        let mut records = self.records.lock().expect("ledger lock poisoned");
        let key = record_key(customer_id, session_id);
        let record = records.get_mut(&key)?;
        record.update_status(status);
        apply(record);
        let updated = record.clone();
        self.save(&records);
        Some(updated)
    }

    fn get(&self, customer_id: &str, session_id: &str) -> Option<VerificationRecord> {
        let mut records = self.records.lock().expect("ledger lock poisoned");
        let key = record_key(customer_id, session_id);
        let record = records.get_mut(&key)?;
        if record.is_expired() && record.status != VerificationStatus::Expired {
            record.status = VerificationStatus::Expired;
            let updated = record.clone();
            self.save(&records);
            return Some(updated);
        }
        Some(record.clone())
    }

    fn history_for(&self, customer_id: &str) -> Vec<VerificationRecord> {
        let records = self.records.lock().expect("ledger lock poisoned");
        let mut history: Vec<VerificationRecord> = records
            .values()
            .filter(|r| r.customer_id == customer_id)
            .cloned()
            .collect();
        history.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        history
    }

    fn is_customer_verified(&self, customer_id: &str) -> bool {
        let records = self.records.lock().expect("ledger lock poisoned");
        records.values().any(|r| {
            r.customer_id == customer_id
                && r.status == VerificationStatus::Verified
                && !r.is_expired()
        })
    }

    fn latest_for(&self, customer_id: &str) -> Option<VerificationRecord> {
        self.history_for(customer_id).into_iter().next()
    }

    fn record_attempt(
        &self,
        customer_id: &str,
        session_id: &str,
        issues: &[String],
    ) -> Option<VerificationRecord> {
        let mut records = self.records.lock().expect("ledger lock poisoned");
        let key = record_key(customer_id, session_id);
        let record = records.get_mut(&key)?;
        record.add_attempt(issues);
        let updated = record.clone();
        self.save(&records);
        Some(updated)
    }

    fn cleanup_stale(&self) -> usize {
        let mut records = self.records.lock().expect("ledger lock poisoned");
        let cutoff = Utc::now() - Duration::days(RETENTION_DAYS);
        let before = records.len();

        for record in records.values_mut() {
            if record.is_expired() {
                record.status = VerificationStatus::Expired;
            }
        }
        records.retain(|_, record| {
            let last_activity = record
                .last_attempt_at
                .or(record.completed_at)
                .or(record.started_at);
            match last_activity {
                Some(at) => at >= cutoff,
                None => true,
            }
        });

        let removed = before - records.len();
        if removed > 0 {
            self.save(&records);
            tracing::info!(removed, "cleaned up stale verification records");
        }
        removed
    }

    fn statistics(&self, days: i64) -> LedgerStatistics {
        let records = self.records.lock().expect("ledger lock poisoned");
        let cutoff = Utc::now() - Duration::days(days);

        let recent: Vec<&VerificationRecord> = records
            .values()
            .filter(|r| r.started_at.is_some_and(|at| at >= cutoff))
            .collect();

        let total = recent.len();
        let successful = recent
            .iter()
            .filter(|r| r.status == VerificationStatus::Verified)
            .count();
        let attempts: u32 = recent.iter().map(|r| r.attempts).sum();

        let mut status_distribution: HashMap<String, usize> = HashMap::new();
        for record in &recent {
            let status = serde_json::to_value(record.status)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_else(|| "unknown".to_string());
            *status_distribution.entry(status).or_default() += 1;
        }

        LedgerStatistics {
            total_verifications: total,
            successful_verifications: successful,
            success_rate: if total > 0 {
                successful as f64 / total as f64 * 100.0
            } else {
                0.0
            },
            average_attempts: if total > 0 {
                attempts as f64 / total as f64
            } else {
                0.0
            },
            status_distribution,
            period_days: days,
        }
    }
}
