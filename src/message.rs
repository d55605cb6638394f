//! Messages from the capture side to the coordination side

use serde::{Deserialize, Serialize};

use crate::identity::{Service, SessionKey};
use crate::turn::ConversationTurn;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PageMessage {
    /// New turns observed on a page
    ConversationScraped {
        service: Service,
        #[serde(rename = "conversationId")]
        conversation_id: String,
        data: Vec<ConversationTurn>,
    },
    /// The page now carries a real conversation id
    ConversationIdDetected {
        service: Service,
        #[serde(rename = "conversationId")]
        conversation_id: String,
    },
}

impl PageMessage {
    pub fn key(&self) -> SessionKey {
        match self {
            PageMessage::ConversationScraped { service, conversation_id, .. }
            | PageMessage::ConversationIdDetected { service, conversation_id } => {
                SessionKey::new(*service, conversation_id.clone())
            }
        }
    }
}
