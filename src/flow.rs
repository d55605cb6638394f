//! Session Flow Controller
//!
//! Decides, once per activation, whether a page's conversation already
//! belongs to a session or needs the continue/create choice, and writes the
//! cache entry each branch implies.
//!
//! ```text
//! Init → Resolving → Existing | New | Unsupported
//! New → Continuing | Creating → Existing
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::backend::{BackendError, SessionBackend, SessionSummary};
use crate::cache::{CacheError, SessionCache, SessionRecord};
use crate::identity::{resolve_page, PageIdentity, Service};

/// Longest accepted session name, in characters
pub const MAX_SESSION_NAME: usize = 50;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Cannot {action} while {state}")]
    InvalidState { action: &'static str, state: FlowState },
    #[error("Invalid session name: {0}")]
    InvalidName(String),
    #[error("Selected session not found: {0}")]
    SessionNotFound(String),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl Serialize for FlowError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowState {
    Init,
    Resolving,
    Existing,
    New,
    Continuing,
    Creating,
    Unsupported,
}

impl fmt::Display for FlowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FlowState::Init => "init",
            FlowState::Resolving => "resolving",
            FlowState::Existing => "existing",
            FlowState::New => "new",
            FlowState::Continuing => "continuing",
            FlowState::Creating => "creating",
            FlowState::Unsupported => "unsupported",
        };
        f.write_str(name)
    }
}

/// What the popup shows for a conversation linked to a session
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExistingView {
    pub identity: PageIdentity,
    pub record: SessionRecord,
    /// Last known context text; `None` when it could not be fetched
    pub context: Option<String>,
    /// Capture starts on this page for the first time (just created)
    pub first_capture: bool,
}

/// What the popup offers for a conversation with no session yet
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSessionChoice {
    pub identity: PageIdentity,
    pub sessions: Vec<SessionSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "view", rename_all = "snake_case")]
pub enum Activation {
    Unsupported,
    Existing(ExistingView),
    New(NewSessionChoice),
}

pub struct SessionFlow {
    backend: Arc<dyn SessionBackend>,
    cache: SessionCache,
    state: FlowState,
    identity: Option<PageIdentity>,
}

/// Trimmed session name, or why it was rejected
pub fn validate_session_name(name: &str) -> Result<String, FlowError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(FlowError::InvalidName("name is empty".to_string()));
    }
    if name.chars().count() > MAX_SESSION_NAME {
        return Err(FlowError::InvalidName(format!(
            "longer than {} characters",
            MAX_SESSION_NAME
        )));
    }
    Ok(name.to_string())
}

impl SessionFlow {
    pub fn new(backend: Arc<dyn SessionBackend>, cache: SessionCache) -> Self {
        Self {
            backend,
            cache,
            state: FlowState::Init,
            identity: None,
        }
    }

    pub fn state(&self) -> FlowState {
        self.state
    }

    pub fn identity(&self) -> Option<&PageIdentity> {
        self.identity.as_ref()
    }

    /// Resolve the page and pick the existing or new branch. Cache hits
    /// skip the remote existence check entirely.
    pub async fn activate(&mut self, address: &str, now: DateTime<Utc>) -> Result<Activation, FlowError> {
        self.state = FlowState::Resolving;

        let Some(identity) = resolve_page(address, now) else {
            debug!(address = %address, "Unsupported page");
            self.state = FlowState::Unsupported;
            self.identity = None;
            return Ok(Activation::Unsupported);
        };
        self.identity = Some(identity.clone());
        let key = identity.key();

        if let Some(record) = self.cache.get(&key).await {
            info!(key = %key, session_id = %record.session_id, "Session found in cache");
            let context = self.fetch_context(&record.session_id).await;
            self.state = FlowState::Existing;
            return Ok(Activation::Existing(ExistingView {
                identity,
                record,
                context,
                first_capture: false,
            }));
        }

        if !identity.temporary {
            if let Some(view) = self.check_remote(&identity).await {
                self.state = FlowState::Existing;
                return Ok(Activation::Existing(view));
            }
        }

        let sessions = self.list_or_empty().await;
        self.state = FlowState::New;
        Ok(Activation::New(NewSessionChoice { identity, sessions }))
    }

    /// Remote existence check. Failures count as "no session".
    async fn check_remote(&self, identity: &PageIdentity) -> Option<ExistingView> {
        let session_id = match self
            .backend
            .find_session(identity.service, &identity.conversation_id)
            .await
        {
            Ok(Some(id)) => id,
            Ok(None) => return None,
            Err(e) => {
                warn!(key = %identity.key(), error = %e, "Remote session check failed, treating as absent");
                return None;
            }
        };

        let (context, sessions) = futures::join!(
            self.backend.get_context(&session_id),
            self.backend.list_sessions()
        );
        let session_name = sessions
            .ok()
            .and_then(|list| list.into_iter().find(|s| s.session_id == session_id))
            .map(|s| s.session_name)
            .unwrap_or_default();
        let context = context
            .map_err(|e| warn!(session_id = %session_id, error = %e, "Context fetch failed"))
            .ok();

        let record = self.link(identity, session_id, session_name, true).await;
        info!(key = %identity.key(), session_id = %record.session_id, "Session found remotely");
        Some(ExistingView {
            identity: identity.clone(),
            record,
            context,
            first_capture: false,
        })
    }

    /// Attach the current conversation to a listed session
    pub async fn continue_with(&mut self, session_id: &str) -> Result<ExistingView, FlowError> {
        let identity = self.identity_in_new("continue")?;
        self.state = FlowState::Continuing;

        let listed = match self.backend.list_sessions().await {
            Ok(list) => list.into_iter().find(|s| s.session_id == session_id),
            Err(e) => {
                self.state = FlowState::New;
                return Err(e.into());
            }
        };
        let Some(summary) = listed else {
            self.state = FlowState::New;
            return Err(FlowError::SessionNotFound(session_id.to_string()));
        };

        let record = self
            .link(&identity, summary.session_id, summary.session_name, true)
            .await;
        self.state = FlowState::Existing;
        Ok(ExistingView {
            identity,
            record,
            context: Some(summary.context),
            first_capture: false,
        })
    }

    /// Create a session for the current conversation and start capture
    pub async fn create(&mut self, session_name: &str) -> Result<ExistingView, FlowError> {
        let identity = self.identity_in_new("create")?;
        let name = validate_session_name(session_name)?;
        self.state = FlowState::Creating;

        let session_id = match self
            .backend
            .create_session(&name, identity.service, &identity.conversation_id)
            .await
        {
            Ok(id) => id,
            Err(e) => {
                self.state = FlowState::New;
                return Err(e.into());
            }
        };

        let record = self.link(&identity, session_id, name, false).await;
        self.state = FlowState::Existing;
        Ok(ExistingView {
            identity,
            record,
            context: None,
            first_capture: true,
        })
    }

    /// Adopt a real id reported by the page. Only a temporary identity on
    /// the same service changes; returns whether it did.
    pub fn conversation_id_detected(&mut self, service: Service, conversation_id: &str) -> bool {
        let Some(identity) = self.identity.as_mut() else {
            return false;
        };
        if !identity.temporary || identity.service != service {
            return false;
        }
        debug!(from = %identity.conversation_id, to = %conversation_id, "Flow adopted real conversation id");
        identity.conversation_id = conversation_id.to_string();
        identity.temporary = false;
        true
    }

    fn identity_in_new(&self, action: &'static str) -> Result<PageIdentity, FlowError> {
        match (&self.identity, self.state) {
            (Some(identity), FlowState::New) => Ok(identity.clone()),
            (_, state) => Err(FlowError::InvalidState { action, state }),
        }
    }

    /// Write the cache entry for a linked session. A failed write is logged;
    /// the link still holds for this activation.
    async fn link(
        &self,
        identity: &PageIdentity,
        session_id: String,
        session_name: String,
        is_existing_session: bool,
    ) -> SessionRecord {
        let record = SessionRecord {
            session_id,
            session_name,
            service: identity.service,
            conversation_id: identity.conversation_id.clone(),
            is_existing_session,
            exists: true,
            linked_at: Some(Utc::now()),
        };
        if let Err(e) = self.cache.put(&identity.key(), &record).await {
            warn!(key = %identity.key(), error = %e, "Could not cache session link");
        }
        record
    }

    async fn fetch_context(&self, session_id: &str) -> Option<String> {
        match self.backend.get_context(session_id).await {
            Ok(context) => Some(context),
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "Context fetch failed");
                None
            }
        }
    }

    async fn list_or_empty(&self) -> Vec<SessionSummary> {
        match self.backend.list_sessions().await {
            Ok(sessions) => sessions,
            Err(e) => {
                warn!(error = %e, "Session listing failed");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::SessionKey;
    use crate::upload::tests::{record, FakeBackend};

    const CHAT: &str = "https://chatgpt.com/c/abc123";

    fn flow(backend: FakeBackend) -> (Arc<FakeBackend>, SessionCache, SessionFlow) {
        let backend = Arc::new(backend);
        let cache = SessionCache::in_memory();
        let flow = SessionFlow::new(backend.clone(), cache.clone());
        (backend, cache, flow)
    }

    #[tokio::test]
    async fn test_unsupported_page() {
        let (_, _, mut flow) = flow(FakeBackend::default());
        let activation = flow.activate("https://example.com/c/abc", Utc::now()).await.unwrap();
        assert_eq!(activation, Activation::Unsupported);
        assert_eq!(flow.state(), FlowState::Unsupported);
    }

    #[tokio::test]
    async fn test_cache_hit_skips_remote_check() {
        let (backend, cache, mut flow) = flow(FakeBackend::default().with_session("s1", "Trip"));
        let key = SessionKey::new(Service::ChatGpt, "abc123");
        cache.put(&key, &record("s1", &key)).await.unwrap();

        let Activation::Existing(view) = flow.activate(CHAT, Utc::now()).await.unwrap() else {
            panic!("expected existing view");
        };
        assert_eq!(view.record.session_id, "s1");
        assert_eq!(view.context.as_deref(), Some("context of Trip"));
        assert_eq!(*backend.find_calls.lock(), 0);
        assert_eq!(flow.state(), FlowState::Existing);
    }

    #[tokio::test]
    async fn test_remote_hit_writes_cache() {
        let backend = FakeBackend::default()
            .with_session("s9", "Thesis")
            .with_link(Service::ChatGpt, "abc123", "s9");
        let (backend, cache, mut flow) = flow(backend);

        let Activation::Existing(view) = flow.activate(CHAT, Utc::now()).await.unwrap() else {
            panic!("expected existing view");
        };
        assert_eq!(*backend.find_calls.lock(), 1);
        assert_eq!(view.record.session_name, "Thesis");
        assert!(view.record.is_existing_session);

        let cached = cache.get(&SessionKey::new(Service::ChatGpt, "abc123")).await.unwrap();
        assert_eq!(cached.session_id, "s9");
    }

    #[tokio::test]
    async fn test_remote_failure_falls_through_to_new() {
        let backend = FakeBackend::default().with_session("s1", "Trip");
        *backend.fail_find.lock() = true;
        let (_, _, mut flow) = flow(backend);

        let Activation::New(choice) = flow.activate(CHAT, Utc::now()).await.unwrap() else {
            panic!("expected new choice");
        };
        assert_eq!(choice.sessions.len(), 1);
        assert_eq!(flow.state(), FlowState::New);
    }

    #[tokio::test]
    async fn test_temporary_id_skips_remote_check() {
        let (backend, _, mut flow) = flow(FakeBackend::default());
        let activation = flow.activate("https://chatgpt.com/", Utc::now()).await.unwrap();
        assert!(matches!(activation, Activation::New(_)));
        assert_eq!(*backend.find_calls.lock(), 0);
    }

    #[tokio::test]
    async fn test_create_caches_new_session() {
        let (backend, cache, mut flow) = flow(FakeBackend::default());
        flow.activate(CHAT, Utc::now()).await.unwrap();

        let view = flow.create("  Trip planning  ").await.unwrap();
        assert!(view.first_capture);
        assert_eq!(view.record.session_name, "Trip planning");
        assert!(!view.record.is_existing_session);
        assert_eq!(flow.state(), FlowState::Existing);
        assert_eq!(backend.sessions.lock().len(), 1);

        let cached = cache.get(&SessionKey::new(Service::ChatGpt, "abc123")).await.unwrap();
        assert_eq!(cached.session_id, view.record.session_id);
    }

    #[tokio::test]
    async fn test_create_rejects_bad_names() {
        let (_, _, mut flow) = flow(FakeBackend::default());
        flow.activate(CHAT, Utc::now()).await.unwrap();

        assert!(matches!(flow.create("   ").await, Err(FlowError::InvalidName(_))));
        assert!(matches!(flow.create(&"x".repeat(51)).await, Err(FlowError::InvalidName(_))));
        assert_eq!(flow.state(), FlowState::New);
        assert!(flow.create(&"x".repeat(50)).await.is_ok());
    }

    #[tokio::test]
    async fn test_continue_requires_listed_session() {
        let (_, cache, mut flow) = flow(FakeBackend::default().with_session("s1", "Trip"));
        flow.activate(CHAT, Utc::now()).await.unwrap();

        assert!(matches!(
            flow.continue_with("nope").await,
            Err(FlowError::SessionNotFound(_))
        ));
        assert_eq!(flow.state(), FlowState::New);

        let view = flow.continue_with("s1").await.unwrap();
        assert!(view.record.is_existing_session);
        assert!(!view.first_capture);
        assert!(cache.get(&SessionKey::new(Service::ChatGpt, "abc123")).await.is_some());
    }

    #[tokio::test]
    async fn test_actions_outside_new_are_rejected() {
        let (_, _, mut flow) = flow(FakeBackend::default());
        assert!(matches!(
            flow.create("name").await,
            Err(FlowError::InvalidState { state: FlowState::Init, .. })
        ));
    }

    #[tokio::test]
    async fn test_detected_id_replaces_temporary_before_create() {
        let (_, cache, mut flow) = flow(FakeBackend::default());
        flow.activate("https://chatgpt.com/", Utc::now()).await.unwrap();

        assert!(!flow.conversation_id_detected(Service::Claude, "x"));
        assert!(flow.conversation_id_detected(Service::ChatGpt, "abc123"));
        flow.create("Trip").await.unwrap();

        assert!(cache.get(&SessionKey::new(Service::ChatGpt, "abc123")).await.is_some());
        assert!(!flow.conversation_id_detected(Service::ChatGpt, "later"));
    }
}
