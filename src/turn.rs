//! Conversation turns and deltas

use serde::{Deserialize, Serialize};

/// One resolved user/assistant exchange
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub prompt: String,
    pub response: String,
}

impl ConversationTurn {
    pub fn new(prompt: impl Into<String>, response: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            response: response.into(),
        }
    }
}

/// Turns first observed in one flush, in page order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationDelta(Vec<ConversationTurn>);

impl ConversationDelta {
    pub fn new(turns: Vec<ConversationTurn>) -> Self {
        Self(turns)
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_turns(self) -> Vec<ConversationTurn> {
        self.0
    }

    /// `Q:`/`A:` transcript form, one block per turn
    pub fn to_transcript(&self) -> String {
        self.0
            .iter()
            .map(|t| format!("Q: {}\nA: {}", t.prompt, t.response))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

impl From<Vec<ConversationTurn>> for ConversationDelta {
    fn from(turns: Vec<ConversationTurn>) -> Self {
        Self(turns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delta_serializes_as_plain_array() {
        let delta = ConversationDelta::new(vec![ConversationTurn::new("hi", "hello")]);
        let json = serde_json::to_string(&delta).unwrap();
        assert_eq!(json, r#"[{"prompt":"hi","response":"hello"}]"#);
    }

    #[test]
    fn test_transcript() {
        let delta = ConversationDelta::new(vec![
            ConversationTurn::new("What is AI?", "Simulated intelligence."),
            ConversationTurn::new("Thanks", "Any time."),
        ]);
        assert_eq!(
            delta.to_transcript(),
            "Q: What is AI?\nA: Simulated intelligence.\n\nQ: Thanks\nA: Any time."
        );
        assert!(ConversationDelta::default().to_transcript().is_empty());
    }
}
