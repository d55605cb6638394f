//! Session Record Stores
//!
//! Flat key→value persistence for session records. Keys are canonical
//! `service:conversationId` strings; values are `SessionRecord`s.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

use crate::identity::Service;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl Serialize for CacheError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

/// What the local store remembers about a conversation's session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub session_id: String,
    pub session_name: String,
    pub service: Service,
    pub conversation_id: String,
    /// Linked to a session that already existed upstream (false when created here)
    pub is_existing_session: bool,
    /// Confirmed to exist upstream
    #[serde(default = "default_exists")]
    pub exists: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linked_at: Option<DateTime<Utc>>,
}

fn default_exists() -> bool {
    true
}

/// Persistent key→value map of session records
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self, key: &str) -> Result<Option<SessionRecord>, CacheError>;
    async fn save(&self, key: &str, record: &SessionRecord) -> Result<(), CacheError>;
    async fn remove(&self, key: &str) -> Result<(), CacheError>;
    async fn entries(&self) -> Result<Vec<(String, SessionRecord)>, CacheError>;
}

/// In-process store; contents die with the process
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<String, SessionRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn load(&self, key: &str) -> Result<Option<SessionRecord>, CacheError> {
        Ok(self.records.read().get(key).cloned())
    }

    async fn save(&self, key: &str, record: &SessionRecord) -> Result<(), CacheError> {
        self.records.write().insert(key.to_string(), record.clone());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), CacheError> {
        self.records.write().remove(key);
        Ok(())
    }

    async fn entries(&self) -> Result<Vec<(String, SessionRecord)>, CacheError> {
        let mut entries: Vec<_> = self
            .records
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(entries)
    }
}

/// Single JSON document on disk holding the whole map.
///
/// Every write rewrites the file through a `.tmp` sibling and a rename, so a
/// crash mid-write leaves the previous map intact.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the raw map. A missing file is an empty map.
    async fn read_map(&self) -> Result<Map<String, Value>, CacheError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) if content.trim().is_empty() => Ok(Map::new()),
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Map::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_map(&self, map: &Map<String, Value>) -> Result<(), CacheError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        // Stable key order keeps the file diffable
        let ordered: BTreeMap<_, _> = map.iter().collect();
        let content = serde_json::to_string_pretty(&ordered)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for JsonFileStore {
    async fn load(&self, key: &str) -> Result<Option<SessionRecord>, CacheError> {
        let map = self.read_map().await?;
        match map.get(key) {
            Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
            None => Ok(None),
        }
    }

    async fn save(&self, key: &str, record: &SessionRecord) -> Result<(), CacheError> {
        let mut map = self.read_map().await?;
        map.insert(key.to_string(), serde_json::to_value(record)?);
        self.write_map(&map).await?;
        debug!(key = %key, path = %self.path.display(), "Saved session record");
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), CacheError> {
        let mut map = self.read_map().await?;
        if map.remove(key).is_some() {
            self.write_map(&map).await?;
        }
        Ok(())
    }

    async fn entries(&self) -> Result<Vec<(String, SessionRecord)>, CacheError> {
        let map = self.read_map().await?;
        let mut entries = Vec::with_capacity(map.len());
        for (key, value) in map {
            match serde_json::from_value::<SessionRecord>(value) {
                Ok(record) => entries.push((key, record)),
                Err(e) => {
                    warn!(key = %key, error = %e, "Skipping unreadable session record");
                }
            }
        }
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(entries)
    }
}
