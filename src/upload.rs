//! Upload Coordinator
//!
//! Sends one conversation delta to the backend against the session the
//! local cache resolves for it. Single attempt per delta; the outcome is
//! returned as an `UploadResult` and never raised.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::backend::{DeltaUpload, SessionBackend};
use crate::cache::SessionCache;
use crate::identity::SessionKey;
use crate::turn::ConversationDelta;

/// Structured outcome of one upload attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub entries_uploaded: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl UploadResult {
    fn uploaded(session_id: &str, entries: usize) -> Self {
        Self {
            success: true,
            error: None,
            entries_uploaded: entries,
            session_id: Some(session_id.to_string()),
        }
    }

    fn failed(session_id: Option<&str>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            entries_uploaded: 0,
            session_id: session_id.map(str::to_string),
        }
    }
}

#[derive(Clone)]
pub struct UploadCoordinator {
    backend: Arc<dyn SessionBackend>,
    cache: SessionCache,
}

impl UploadCoordinator {
    pub fn new(backend: Arc<dyn SessionBackend>, cache: SessionCache) -> Self {
        Self { backend, cache }
    }

    pub fn cache(&self) -> &SessionCache {
        &self.cache
    }

    /// Upload `delta` for the session cached under `key`.
    ///
    /// An empty delta succeeds without a backend call. A key with no cached
    /// record discards the delta. Temporary keys are uploaded under the
    /// conversation id they carry; callers promote keys before calling.
    pub async fn upload(&self, key: &SessionKey, delta: &ConversationDelta) -> UploadResult {
        if delta.is_empty() {
            debug!(key = %key, "Empty delta, nothing to upload");
            return UploadResult {
                success: true,
                error: None,
                entries_uploaded: 0,
                session_id: None,
            };
        }

        let Some(record) = self.cache.get(key).await else {
            warn!(key = %key, turns = delta.len(), "No session for conversation, discarding delta");
            return UploadResult::failed(None, format!("No session found for {}", key));
        };

        let body = DeltaUpload {
            session_id: &record.session_id,
            service: key.service,
            conversation_id: &key.conversation_id,
            conversation: delta.turns(),
            transcript: delta.to_transcript(),
        };

        match self.backend.upload_delta(&body).await {
            Ok(_) => UploadResult::uploaded(&record.session_id, delta.len()),
            Err(e) => {
                error!(
                    key = %key,
                    session_id = %record.session_id,
                    error = %e,
                    "Delta upload failed, dropping"
                );
                UploadResult::failed(Some(&record.session_id), e.to_string())
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::backend::{BackendError, SessionSummary};
    use crate::cache::SessionRecord;
    use crate::identity::Service;
    use crate::turn::ConversationTurn;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::Value;
    use std::collections::{HashMap, VecDeque};

    /// In-memory backend recording every call
    #[derive(Default)]
    pub(crate) struct FakeBackend {
        pub sessions: Mutex<Vec<SessionSummary>>,
        pub links: Mutex<HashMap<(Service, String), String>>,
        pub uploads: Mutex<Vec<(String, String, Vec<ConversationTurn>)>>,
        pub contexts: Mutex<HashMap<String, String>>,
        /// Statuses returned by successive uploads; empty means 200
        pub upload_statuses: Mutex<VecDeque<u16>>,
        pub find_calls: Mutex<usize>,
        pub fail_find: Mutex<bool>,
    }

    impl FakeBackend {
        pub fn with_session(self, id: &str, name: &str) -> Self {
            self.sessions.lock().push(SessionSummary {
                session_id: id.to_string(),
                session_name: name.to_string(),
                context: format!("context of {}", name),
            });
            self.contexts.lock().insert(id.to_string(), format!("context of {}", name));
            self
        }

        pub fn with_link(self, service: Service, conversation_id: &str, session_id: &str) -> Self {
            self.links
                .lock()
                .insert((service, conversation_id.to_string()), session_id.to_string());
            self
        }
    }

    #[async_trait]
    impl SessionBackend for FakeBackend {
        async fn find_session(&self, service: Service, conversation_id: &str) -> Result<Option<String>, BackendError> {
            *self.find_calls.lock() += 1;
            if *self.fail_find.lock() {
                return Err(BackendError::Http("connection refused".to_string()));
            }
            Ok(self.links.lock().get(&(service, conversation_id.to_string())).cloned())
        }

        async fn create_session(
            &self,
            session_name: &str,
            service: Service,
            conversation_id: &str,
        ) -> Result<String, BackendError> {
            let id = format!("sess-{}", self.sessions.lock().len() + 1);
            self.sessions.lock().push(SessionSummary {
                session_id: id.clone(),
                session_name: session_name.to_string(),
                context: String::new(),
            });
            self.links
                .lock()
                .insert((service, conversation_id.to_string()), id.clone());
            Ok(id)
        }

        async fn upload_delta(&self, upload: &DeltaUpload<'_>) -> Result<Value, BackendError> {
            if let Some(status) = self.upload_statuses.lock().pop_front() {
                if status >= 400 {
                    return Err(BackendError::Status {
                        status,
                        body: "Internal Server Error".to_string(),
                    });
                }
            }
            self.uploads.lock().push((
                upload.session_id.to_string(),
                upload.conversation_id.to_string(),
                upload.conversation.to_vec(),
            ));
            Ok(Value::Null)
        }

        async fn get_context(&self, session_id: &str) -> Result<String, BackendError> {
            self.contexts
                .lock()
                .get(session_id)
                .cloned()
                .ok_or_else(|| BackendError::Status {
                    status: 404,
                    body: "Session not found".to_string(),
                })
        }

        async fn list_sessions(&self) -> Result<Vec<SessionSummary>, BackendError> {
            Ok(self.sessions.lock().clone())
        }
    }

    pub(crate) fn record(session_id: &str, key: &SessionKey) -> SessionRecord {
        SessionRecord {
            session_id: session_id.to_string(),
            session_name: "Research".to_string(),
            service: key.service,
            conversation_id: key.conversation_id.clone(),
            is_existing_session: false,
            exists: true,
            linked_at: None,
        }
    }

    fn delta(pairs: &[(&str, &str)]) -> ConversationDelta {
        pairs.iter().map(|(p, r)| ConversationTurn::new(*p, *r)).collect::<Vec<_>>().into()
    }

    async fn setup() -> (Arc<FakeBackend>, UploadCoordinator, SessionKey) {
        let backend = Arc::new(FakeBackend::default());
        let cache = SessionCache::in_memory();
        let key = SessionKey::new(Service::ChatGpt, "abc");
        cache.put(&key, &record("s1", &key)).await.unwrap();
        let uploader = UploadCoordinator::new(backend.clone(), cache);
        (backend, uploader, key)
    }

    #[tokio::test]
    async fn test_upload_sends_delta_for_cached_session() {
        let (backend, uploader, key) = setup().await;
        let result = uploader.upload(&key, &delta(&[("hi", "hello")])).await;

        assert!(result.success);
        assert_eq!(result.entries_uploaded, 1);
        assert_eq!(result.session_id.as_deref(), Some("s1"));
        let uploads = backend.uploads.lock();
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].0, "s1");
        assert_eq!(uploads[0].1, "abc");
    }

    #[tokio::test]
    async fn test_empty_delta_makes_no_call() {
        let (backend, uploader, key) = setup().await;
        let result = uploader.upload(&key, &ConversationDelta::default()).await;
        assert!(result.success);
        assert_eq!(result.entries_uploaded, 0);
        assert!(backend.uploads.lock().is_empty());
    }

    #[tokio::test]
    async fn test_missing_record_discards_delta() {
        let (backend, uploader, _) = setup().await;
        let other = SessionKey::new(Service::Claude, "zzz");
        let result = uploader.upload(&other, &delta(&[("q", "a")])).await;

        assert!(!result.success);
        assert!(result.error.unwrap().contains("claude:zzz"));
        assert!(backend.uploads.lock().is_empty());
    }

    #[tokio::test]
    async fn test_server_error_reported_then_next_delta_proceeds() {
        let (backend, uploader, key) = setup().await;
        backend.upload_statuses.lock().push_back(500);

        let failed = uploader.upload(&key, &delta(&[("one", "1")])).await;
        assert!(!failed.success);
        assert!(failed.error.as_deref().unwrap().contains("500"));
        assert!(backend.uploads.lock().is_empty());

        let ok = uploader.upload(&key, &delta(&[("two", "2")])).await;
        assert!(ok.success);
        let uploads = backend.uploads.lock();
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].2[0].prompt, "two");
    }

    #[test]
    fn test_result_wire_shape() {
        let value = serde_json::to_value(UploadResult::failed(None, "boom")).unwrap();
        assert_eq!(value["success"], false);
        assert_eq!(value["error"], "boom");
        assert_eq!(value["entriesUploaded"], 0);
        assert!(value.get("sessionId").is_none());
    }
}
