//! Backend HTTP Client
//!
//! reqwest client for the session backend's REST API. Every call is a
//! single attempt: failures come back as `BackendError` and the caller
//! decides what to log. Nothing here retries.

use async_trait::async_trait;
use reqwest::{Client, Response, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, error, info};

use super::{BackendError, DeltaUpload, SessionBackend, SessionSummary};
use crate::identity::Service;

#[derive(Deserialize)]
struct SessionIdResponse {
    #[serde(default)]
    session_id: Option<String>,
}

#[derive(Deserialize)]
struct ContextResponse {
    #[serde(default)]
    context: Value,
}

#[derive(Deserialize)]
struct SessionsResponse {
    #[serde(default)]
    sessions: Vec<SessionSummary>,
}

#[derive(Clone)]
pub struct BackendClient {
    http: Client,
    base_url: Url,
}

impl BackendClient {
    pub fn new(base_url: &str) -> Result<Self, BackendError> {
        Self::with_timeouts(base_url, Duration::from_secs(30), Duration::from_secs(5))
    }

    pub fn with_timeouts(base_url: &str, timeout: Duration, connect_timeout: Duration) -> Result<Self, BackendError> {
        let base_url = Url::parse(base_url.trim_end_matches('/'))
            .map_err(|e| BackendError::InvalidUrl(format!("{}: {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(BackendError::InvalidUrl(base_url.to_string()));
        }
        let http = Client::builder()
            .timeout(timeout)
            .connect_timeout(connect_timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Ok(Self { http, base_url })
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    /// Base URL with percent-encoded path segments appended
    fn endpoint(&self, segments: &[&str]) -> Result<Url, BackendError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| BackendError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Turn a non-success status into `BackendError::Status`
    async fn check(resp: Response, what: &str) -> Result<Response, BackendError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        error!(status = %status, body = %body, call = what, "Backend call failed");
        Err(BackendError::Status {
            status: status.as_u16(),
            body,
        })
    }

    async fn json<T: DeserializeOwned>(resp: Response) -> Result<T, BackendError> {
        resp.json().await.map_err(|e| BackendError::Deserialize(e.to_string()))
    }

    /// Backend health document
    pub async fn health(&self) -> Result<Value, BackendError> {
        let resp = self.http.get(self.endpoint(&["health"])?).send().await?;
        let resp = Self::check(resp, "health").await?;
        Self::json(resp).await
    }
}

#[async_trait]
impl SessionBackend for BackendClient {
    async fn find_session(&self, service: Service, conversation_id: &str) -> Result<Option<String>, BackendError> {
        debug!(service = %service, conversation_id = %conversation_id, "Checking session existence");
        let url = self.endpoint(&["find_session_by_chat", service.as_str(), conversation_id])?;
        let resp = self.http.get(url).send().await?;
        let resp = Self::check(resp, "find_session_by_chat").await?;
        let body: SessionIdResponse = Self::json(resp).await?;
        Ok(body.session_id.filter(|id| !id.is_empty()))
    }

    async fn create_session(
        &self,
        session_name: &str,
        service: Service,
        conversation_id: &str,
    ) -> Result<String, BackendError> {
        let resp = self
            .http
            .post(self.endpoint(&["create_new_session_from_chat"])?)
            .query(&[
                ("session_name", session_name),
                ("service_name", service.as_str()),
                ("conversation_id", conversation_id),
            ])
            .send()
            .await?;
        let resp = Self::check(resp, "create_new_session_from_chat").await?;
        let body: SessionIdResponse = Self::json(resp).await?;

        let session_id = body
            .session_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| BackendError::Deserialize("create response without session_id".to_string()))?;
        info!(session_id = %session_id, name = %session_name, "Created session");
        Ok(session_id)
    }

    async fn upload_delta(&self, upload: &DeltaUpload<'_>) -> Result<Value, BackendError> {
        let resp = self
            .http
            .post(self.endpoint(&["upload_conversation"])?)
            .json(upload)
            .send()
            .await?;
        let resp = Self::check(resp, "upload_conversation").await?;

        // The echo is informational; an empty or non-JSON body still counts as success
        let text = resp.text().await?;
        let echo = serde_json::from_str(&text).unwrap_or(Value::Null);
        info!(
            session_id = %upload.session_id,
            turns = upload.conversation.len(),
            "Uploaded conversation delta"
        );
        Ok(echo)
    }

    async fn get_context(&self, session_id: &str) -> Result<String, BackendError> {
        let resp = self
            .http
            .get(self.endpoint(&["get_context", session_id])?)
            .send()
            .await?;
        let resp = Self::check(resp, "get_context").await?;
        let body: ContextResponse = Self::json(resp).await?;

        // Context is usually text but some stores keep a list of fragments
        Ok(match body.context {
            Value::String(s) => s,
            Value::Array(parts) => parts
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join(" "),
            Value::Null => String::new(),
            other => other.to_string(),
        })
    }

    async fn list_sessions(&self) -> Result<Vec<SessionSummary>, BackendError> {
        let resp = self.http.get(self.endpoint(&["list_all_sessions"])?).send().await?;
        let resp = Self::check(resp, "list_all_sessions").await?;
        let body: SessionsResponse = Self::json(resp).await?;
        debug!(count = body.sessions.len(), "Listed sessions");
        Ok(body.sessions)
    }
}
