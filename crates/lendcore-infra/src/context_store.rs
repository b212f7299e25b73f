//! File-backed conversation context store.
//!
//! One JSON file per session under the configured directory, fronted by an
//! in-memory cache. Contexts are written back after every mutation; a
//! per-session async lock serializes writes so concurrent requests to the
//! same session cannot interleave a read-modify-write on the file.
//! Sessions idle past the retention window are dropped by `cleanup_stale`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{Duration, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use lendcore_core::storage::ContextStore;
use lendcore_types::conversation::ConversationContext;
use lendcore_types::error::SessionError;

use serde_json::json;

/// Sessions older than this are eligible for cleanup.
const RETENTION_HOURS: i64 = 24;

/// Context persistence rooted at one directory.
pub struct FileContextStore {
    dir: PathBuf,
    cache: DashMap<String, ConversationContext>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl FileContextStore {
    /// Open (and create if needed) the storage directory.
    pub async fn new(dir: impl Into<PathBuf>) -> Result<Self, SessionError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| SessionError::Storage(e.to_string()))?;
        tracing::info!(dir = %dir.display(), "context store initialized");
        Ok(Self {
            dir,
            cache: DashMap::new(),
            locks: DashMap::new(),
        })
    }

    fn path_for(&self, session_id: &str) -> PathBuf {
        self.dir.join(format!("{session_id}.json"))
    }

    fn session_lock(&self, session_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn persist(&self, context: &ConversationContext) -> Result<(), SessionError> {
        let bytes = serde_json::to_vec_pretty(context)
            .map_err(|e| SessionError::Serialization(e.to_string()))?;
        tokio::fs::write(self.path_for(&context.session_id), bytes)
            .await
            .map_err(|e| SessionError::Storage(e.to_string()))
    }

    async fn load_from_disk(&self, session_id: &str) -> Option<ConversationContext> {
        let bytes = tokio::fs::read(self.path_for(session_id)).await.ok()?;
        match serde_json::from_slice(&bytes) {
            Ok(context) => Some(context),
            Err(err) => {
                tracing::error!(session_id, "failed to decode context file: {err}");
                None
            }
        }
    }

    async fn is_stale_file(path: &Path) -> bool {
        let Ok(metadata) = tokio::fs::metadata(path).await else {
            return false;
        };
        let Ok(modified) = metadata.modified() else {
            return false;
        };
        match modified.elapsed() {
            Ok(age) => age.as_secs() > (RETENTION_HOURS as u64) * 3_600,
            Err(_) => false,
        }
    }
}

impl ContextStore for FileContextStore {
    async fn create(
        &self,
        customer_id: Option<String>,
    ) -> Result<ConversationContext, SessionError> {
        let session_id = format!("session_{}", &Uuid::new_v4().simple().to_string()[..12]);
        let context = ConversationContext::new(session_id.clone(), customer_id);

        let lock = self.session_lock(&session_id);
        let _guard = lock.lock().await;
        self.persist(&context).await?;
        self.cache.insert(session_id.clone(), context.clone());

        tracing::info!(session_id, "created session context");
        Ok(context)
    }

    async fn get(&self, session_id: &str) -> Option<ConversationContext> {
        if let Some(context) = self.cache.get(session_id) {
            return Some(context.clone());
        }
        let context = self.load_from_disk(session_id).await?;
        self.cache.insert(session_id.to_string(), context.clone());
        tracing::info!(session_id, "loaded context from storage");
        Some(context)
    }

    async fn update(&self, context: &ConversationContext) -> Result<(), SessionError> {
        let lock = self.session_lock(&context.session_id);
        let _guard = lock.lock().await;
        self.cache
            .insert(context.session_id.clone(), context.clone());
        self.persist(context).await
    }

    async fn remove(&self, session_id: &str) {
        self.cache.remove(session_id);
        self.locks.remove(session_id);
        if let Err(err) = tokio::fs::remove_file(self.path_for(session_id)).await {
            if err.kind() != std::io::ErrorKind::NotFound {
                tracing::error!(session_id, "failed to delete context file: {err}");
            }
        }
    }

    async fn recover(&self, session_id: &str) -> Option<ConversationContext> {
        let mut context = self.load_from_disk(session_id).await?;

        if Utc::now() - context.updated_at > Duration::hours(RETENTION_HOURS) {
            tracing::warn!(session_id, "context too old to recover");
            self.remove(session_id).await;
            return None;
        }

        context.add_collected_data(
            "recovery_info",
            json!({
                "recovered_at": Utc::now().to_rfc3339(),
                "recovery_reason": "system_restart_or_failure",
            }),
        );
        if let Err(err) = self.update(&context).await {
            tracing::error!(session_id, "failed to persist recovered context: {err}");
        }
        tracing::info!(session_id, "recovered context");
        Some(context)
    }

    fn active_sessions(&self) -> Vec<String> {
        self.cache.iter().map(|entry| entry.key().clone()).collect()
    }

    fn all_active(&self) -> Vec<ConversationContext> {
        self.cache.iter().map(|entry| entry.value().clone()).collect()
    }

    async fn cleanup_stale(&self) -> usize {
        let cutoff = Utc::now() - Duration::hours(RETENTION_HOURS);
        let stale: Vec<String> = self
            .cache
            .iter()
            .filter(|entry| entry.value().updated_at < cutoff)
            .map(|entry| entry.key().clone())
            .collect();

        let mut cleaned = stale.len();
        for session_id in &stale {
            self.remove(session_id).await;
        }

        // Orphaned files from sessions no longer cached.
        if let Ok(mut entries) = tokio::fs::read_dir(&self.dir).await {
            while let Ok(Some(entry)) = entries.next_entry().await {
                let path = entry.path();
                if path.extension().is_none_or(|ext| ext != "json") {
                    continue;
                }
                let session_id = path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .unwrap_or_default()
                    .to_string();
                if self.cache.contains_key(&session_id) {
                    continue;
                }
                if Self::is_stale_file(&path).await {
                    if tokio::fs::remove_file(&path).await.is_ok() {
                        cleaned += 1;
                    }
                }
            }
        }

        if cleaned > 0 {
            tracing::info!(cleaned, "cleaned up stale sessions");
        }
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    async fn store(tmp: &TempDir) -> FileContextStore {
        FileContextStore::new(tmp.path().join("contexts"))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_and_get_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp).await;

        let context = store.create(Some("CUST001".to_string())).await.unwrap();
        assert!(context.session_id.starts_with("session_"));

        let fetched = store.get(&context.session_id).await.unwrap();
        assert_eq!(fetched.customer_id.as_deref(), Some("CUST001"));
    }

    #[tokio::test]
    async fn test_update_persists_to_disk() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp).await;

        let mut context = store.create(None).await.unwrap();
        context.add_collected_data("loan_amount", json!(300000));
        store.update(&context).await.unwrap();

        // A fresh store instance must see the write through the file.
        let fresh = FileContextStore::new(tmp.path().join("contexts"))
            .await
            .unwrap();
        let fetched = fresh.get(&context.session_id).await.unwrap();
        assert_eq!(fetched.data_value("loan_amount"), Some(&json!(300000)));
    }

    #[tokio::test]
    async fn test_remove_deletes_file_and_cache() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp).await;

        let context = store.create(None).await.unwrap();
        let path = store.path_for(&context.session_id);
        assert!(path.exists());

        store.remove(&context.session_id).await;
        assert!(!path.exists());
        assert!(store.get(&context.session_id).await.is_none());
    }

    #[tokio::test]
    async fn test_recover_stamps_recovery_info() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp).await;
        let context = store.create(None).await.unwrap();

        // A fresh instance simulates a restart with an empty cache.
        let fresh = FileContextStore::new(tmp.path().join("contexts"))
            .await
            .unwrap();
        let recovered = fresh.recover(&context.session_id).await.unwrap();
        assert!(recovered.collected_data.contains_key("recovery_info"));
        assert_eq!(fresh.active_sessions(), vec![context.session_id.clone()]);
    }

    #[tokio::test]
    async fn test_recover_refuses_expired_context() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp).await;
        let mut context = store.create(None).await.unwrap();
        context.updated_at = Utc::now() - Duration::hours(25);
        store.persist(&context).await.unwrap();

        let fresh = FileContextStore::new(tmp.path().join("contexts"))
            .await
            .unwrap();
        assert!(fresh.recover(&context.session_id).await.is_none());
        assert!(!store.path_for(&context.session_id).exists());
    }

    #[tokio::test]
    async fn test_cleanup_drops_stale_cached_sessions() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp).await;

        let fresh_ctx = store.create(None).await.unwrap();
        let mut stale_ctx = store.create(None).await.unwrap();
        stale_ctx.updated_at = Utc::now() - Duration::hours(25);
        store
            .cache
            .insert(stale_ctx.session_id.clone(), stale_ctx.clone());

        let cleaned = store.cleanup_stale().await;
        assert_eq!(cleaned, 1);
        assert!(store.get(&stale_ctx.session_id).await.is_none());
        assert!(store.get(&fresh_ctx.session_id).await.is_some());
    }

    #[tokio::test]
    async fn test_concurrent_updates_serialize_per_session() {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(store(&tmp).await);
        let context = store.create(None).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            let mut ctx = context.clone();
            handles.push(tokio::spawn(async move {
                ctx.add_collected_data(format!("key_{i}"), json!(i));
                store.update(&ctx).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        // Last writer wins per key set, but the file must be valid JSON.
        let fresh = FileContextStore::new(tmp.path().join("contexts"))
            .await
            .unwrap();
        assert!(fresh.get(&context.session_id).await.is_some());
    }
}
