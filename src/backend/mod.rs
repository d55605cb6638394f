//! Session Backend
//!
//! The remote store that owns sessions and their accumulated context. The
//! pipeline only needs existence lookup, creation, delta upload, context
//! fetch and listing; everything else about the backend is out of reach.

pub mod client;

pub use client::BackendClient;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::identity::Service;
use crate::turn::ConversationTurn;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Backend HTTP error: {0}")]
    Http(String),
    #[error("Backend returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Deserialization error: {0}")]
    Deserialize(String),
    #[error("Invalid backend URL: {0}")]
    InvalidUrl(String),
}

impl Serialize for BackendError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        BackendError::Http(e.to_string())
    }
}

/// One entry of the remote session listing
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: String,
    pub session_name: String,
    pub context: String,
}

/// Listing rows arrive either positionally (`[id, name, context, ...]`) or
/// as objects with snake_case or camelCase keys.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawSessionSummary {
    Row(Vec<Value>),
    Object {
        #[serde(alias = "sessionId")]
        session_id: String,
        #[serde(default, alias = "sessionName")]
        session_name: String,
        #[serde(default)]
        context: Option<String>,
    },
}

impl<'de> Deserialize<'de> for SessionSummary {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = |v: Option<&Value>| v.and_then(Value::as_str).unwrap_or_default().to_string();
        match RawSessionSummary::deserialize(deserializer)? {
            RawSessionSummary::Row(row) => {
                let session_id = text(row.first());
                if session_id.is_empty() {
                    return Err(serde::de::Error::custom("session row without an id"));
                }
                Ok(SessionSummary {
                    session_id,
                    session_name: text(row.get(1)),
                    context: text(row.get(2)),
                })
            }
            RawSessionSummary::Object { session_id, session_name, context } => Ok(SessionSummary {
                session_id,
                session_name,
                context: context.unwrap_or_default(),
            }),
        }
    }
}

/// Body of a delta upload
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeltaUpload<'a> {
    pub session_id: &'a str,
    pub service: Service,
    pub conversation_id: &'a str,
    pub conversation: &'a [ConversationTurn],
    /// Same turns as `Q:`/`A:` text for stores that keep plain context
    pub transcript: String,
}

#[async_trait]
pub trait SessionBackend: Send + Sync {
    /// Session id attached to a conversation, if any
    async fn find_session(&self, service: Service, conversation_id: &str) -> Result<Option<String>, BackendError>;

    async fn session_exists(&self, service: Service, conversation_id: &str) -> Result<bool, BackendError> {
        Ok(self.find_session(service, conversation_id).await?.is_some())
    }

    /// Create a session attached to a conversation, returning its id
    async fn create_session(
        &self,
        session_name: &str,
        service: Service,
        conversation_id: &str,
    ) -> Result<String, BackendError>;

    async fn upload_delta(&self, upload: &DeltaUpload<'_>) -> Result<Value, BackendError>;

    async fn get_context(&self, session_id: &str) -> Result<String, BackendError>;

    async fn list_sessions(&self) -> Result<Vec<SessionSummary>, BackendError>;
}
