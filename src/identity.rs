//! Page Identity Resolution
//!
//! Maps a chat page address to the `(service, conversationId)` pair used to
//! look up sessions. Pure: the only input besides the address is the clock
//! reading used to mint temporary ids.

use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Prefix of locally minted conversation ids
pub const TEMPORARY_ID_PREFIX: &str = "new-conversation-";

/// Placeholder some pages expose before a thread exists; never a valid id
const UNKNOWN_ID: &str = "unknown";

/// Hostname fragments, checked in order (first match wins)
const SERVICE_HOSTS: &[(&str, Service)] = &[
    ("chatgpt.com", Service::ChatGpt),
    ("claude.ai", Service::Claude),
    ("gemini.google.com", Service::Gemini),
];

/// Supported conversational pages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Service {
    ChatGpt,
    Claude,
    Gemini,
}

impl Service {
    pub fn as_str(&self) -> &'static str {
        match self {
            Service::ChatGpt => "chatgpt",
            Service::Claude => "claude",
            Service::Gemini => "gemini",
        }
    }

    /// Infer the service from a hostname by substring match
    pub fn from_host(host: &str) -> Option<Self> {
        SERVICE_HOSTS
            .iter()
            .find(|(fragment, _)| host.contains(fragment))
            .map(|(_, service)| *service)
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Service {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "chatgpt" => Ok(Service::ChatGpt),
            "claude" => Ok(Service::Claude),
            "gemini" => Ok(Service::Gemini),
            other => Err(format!("Unknown service: {}", other)),
        }
    }
}

/// True iff the id was assigned by the host page rather than minted locally
pub fn is_real_id(conversation_id: &str) -> bool {
    !conversation_id.starts_with(TEMPORARY_ID_PREFIX)
}

/// Mint a temporary conversation id from a clock reading
pub fn temporary_id(now: DateTime<Utc>) -> String {
    format!("{}{}", TEMPORARY_ID_PREFIX, now.timestamp_millis())
}

/// Cache/lookup key for one conversation on one service
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionKey {
    pub service: Service,
    pub conversation_id: String,
}

impl SessionKey {
    pub fn new(service: Service, conversation_id: impl Into<String>) -> Self {
        Self {
            service,
            conversation_id: conversation_id.into(),
        }
    }

    /// Canonical `service:conversationId` form used by the local store
    pub fn storage_key(&self) -> String {
        format!("{}:{}", self.service, self.conversation_id)
    }

    /// Parse a canonical storage key back into its parts
    pub fn parse(storage_key: &str) -> Option<Self> {
        let (service, conversation_id) = storage_key.split_once(':')?;
        if conversation_id.is_empty() {
            return None;
        }
        Some(Self::new(service.parse().ok()?, conversation_id))
    }

    pub fn is_temporary(&self) -> bool {
        !is_real_id(&self.conversation_id)
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.service, self.conversation_id)
    }
}

/// Result of resolving a supported page address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageIdentity {
    pub service: Service,
    pub conversation_id: String,
    /// The id was minted locally because the address carried none
    pub temporary: bool,
}

impl PageIdentity {
    pub fn key(&self) -> SessionKey {
        SessionKey::new(self.service, self.conversation_id.clone())
    }
}

/// Conversation id carried by the address itself, if any.
/// Splitting `/c/abc` on `/` gives `["", "c", "abc"]`; the id is index 2.
fn conversation_id_from_path(url: &Url) -> Option<String> {
    url.path()
        .split('/')
        .nth(2)
        .filter(|segment| !segment.is_empty() && *segment != UNKNOWN_ID)
        .map(|segment| segment.to_string())
}

/// Resolve a page address. Returns `None` for unparseable addresses and
/// unsupported hosts; the caller treats both as an unsupported page.
pub fn resolve_page(address: &str, now: DateTime<Utc>) -> Option<PageIdentity> {
    let url = Url::parse(address).ok()?;
    let service = Service::from_host(url.host_str()?)?;

    Some(match conversation_id_from_path(&url) {
        Some(conversation_id) => PageIdentity {
            service,
            conversation_id,
            temporary: false,
        },
        None => PageIdentity {
            service,
            conversation_id: temporary_id(now),
            temporary: true,
        },
    })
}

/// Real conversation id carried by an address, without minting a temporary one
pub fn real_conversation_id(address: &str) -> Option<(Service, String)> {
    let url = Url::parse(address).ok()?;
    let service = Service::from_host(url.host_str()?)?;
    conversation_id_from_path(&url).map(|id| (service, id))
}
