//! Session Cache
//!
//! Local lookup of `service:conversationId` → session record, consulted
//! before any remote call. Store failures never block the pipeline: reads
//! degrade to "absent" and the caller proceeds to the remote path.

pub mod store;

pub use store::{CacheError, JsonFileStore, MemoryStore, SessionRecord, SessionStore};

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::identity::SessionKey;

/// Last-write-wins view over a `SessionStore`
#[derive(Clone)]
pub struct SessionCache {
    store: Arc<dyn SessionStore>,
}

impl SessionCache {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// Look up a record. Store errors are logged and reported as absent.
    pub async fn get(&self, key: &SessionKey) -> Option<SessionRecord> {
        let storage_key = key.storage_key();
        match self.store.load(&storage_key).await {
            Ok(record) => {
                debug!(key = %storage_key, hit = record.is_some(), "Session cache lookup");
                record
            }
            Err(e) => {
                warn!(key = %storage_key, error = %e, "Session cache unreadable, treating as absent");
                None
            }
        }
    }

    /// Upsert a record
    pub async fn put(&self, key: &SessionKey, record: &SessionRecord) -> Result<(), CacheError> {
        let storage_key = key.storage_key();
        self.store.save(&storage_key, record).await?;
        debug!(key = %storage_key, session_id = %record.session_id, "Session cache write");
        Ok(())
    }

    /// Move a record from `old` to `new`, unchanged. Returns whether anything
    /// moved; an absent `old` is a no-op.
    pub async fn rekey(&self, old: &SessionKey, new: &SessionKey) -> Result<bool, CacheError> {
        let old_key = old.storage_key();
        let new_key = new.storage_key();
        if old_key == new_key {
            return Ok(false);
        }

        let Some(record) = self.store.load(&old_key).await? else {
            debug!(old = %old_key, "Rekey skipped, no record under old key");
            return Ok(false);
        };

        // Insert before removing so a failure in between never loses the record
        self.store.save(&new_key, &record).await?;
        self.store.remove(&old_key).await?;
        info!(old = %old_key, new = %new_key, session_id = %record.session_id, "Promoted session key");
        Ok(true)
    }

    /// All readable records, ordered by key
    pub async fn list(&self) -> Result<Vec<(String, SessionRecord)>, CacheError> {
        self.store.entries().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Service;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn record(session_id: &str, conversation_id: &str) -> SessionRecord {
        SessionRecord {
            session_id: session_id.to_string(),
            session_name: "Trip planning".to_string(),
            service: Service::ChatGpt,
            conversation_id: conversation_id.to_string(),
            is_existing_session: false,
            exists: true,
            linked_at: None,
        }
    }

    /// Store whose every operation fails, counting attempts
    #[derive(Default)]
    struct BrokenStore {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SessionStore for BrokenStore {
        async fn load(&self, _key: &str) -> Result<Option<SessionRecord>, CacheError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(CacheError::Unavailable("disk gone".to_string()))
        }
        async fn save(&self, _key: &str, _record: &SessionRecord) -> Result<(), CacheError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(CacheError::Unavailable("disk gone".to_string()))
        }
        async fn remove(&self, _key: &str) -> Result<(), CacheError> {
            Err(CacheError::Unavailable("disk gone".to_string()))
        }
        async fn entries(&self) -> Result<Vec<(String, SessionRecord)>, CacheError> {
            Err(CacheError::Unavailable("disk gone".to_string()))
        }
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let cache = SessionCache::in_memory();
        let key = SessionKey::new(Service::ChatGpt, "abc123");
        assert!(cache.get(&key).await.is_none());

        cache.put(&key, &record("s1", "abc123")).await.unwrap();
        assert_eq!(cache.get(&key).await, Some(record("s1", "abc123")));

        // Last write wins
        cache.put(&key, &record("s2", "abc123")).await.unwrap();
        assert_eq!(cache.get(&key).await.unwrap().session_id, "s2");
    }

    #[tokio::test]
    async fn test_rekey_moves_record_unchanged() {
        let cache = SessionCache::in_memory();
        let temp = SessionKey::new(Service::ChatGpt, "new-conversation-1700000000000");
        let real = SessionKey::new(Service::ChatGpt, "abc123");
        let original = record("s1", "new-conversation-1700000000000");
        cache.put(&temp, &original).await.unwrap();

        assert!(cache.rekey(&temp, &real).await.unwrap());
        assert!(cache.get(&temp).await.is_none());
        assert_eq!(cache.get(&real).await, Some(original));
    }

    #[tokio::test]
    async fn test_rekey_absent_is_noop() {
        let cache = SessionCache::in_memory();
        let temp = SessionKey::new(Service::Claude, "new-conversation-1");
        let real = SessionKey::new(Service::Claude, "real");
        assert!(!cache.rekey(&temp, &real).await.unwrap());
        assert!(cache.get(&real).await.is_none());
    }

    #[tokio::test]
    async fn test_unreadable_store_degrades_to_absent() {
        let store = Arc::new(BrokenStore::default());
        let cache = SessionCache::new(store.clone());
        let key = SessionKey::new(Service::Gemini, "g1");

        assert!(cache.get(&key).await.is_none());
        assert!(cache.put(&key, &record("s", "g1")).await.is_err());
        assert_eq!(store.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_file_backed_cache_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.json");
        let key = SessionKey::new(Service::ChatGpt, "abc123");

        SessionCache::new(Arc::new(JsonFileStore::new(&path)))
            .put(&key, &record("s1", "abc123"))
            .await
            .unwrap();

        let reopened = SessionCache::new(Arc::new(JsonFileStore::new(&path)));
        assert_eq!(reopened.get(&key).await.unwrap().session_id, "s1");
    }
}
