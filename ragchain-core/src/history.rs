//! Conversation history carried into a conversational QA call.
//!
//! History arrives either as a flat transcript or as an ordered list of
//! question/answer turns. Both render to the same transcript form before they
//! are interpolated into a prompt.

use crate::error::ChainError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One completed exchange in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub human: String,
    pub ai: String,
}

impl ConversationTurn {
    pub fn new(human: impl Into<String>, ai: impl Into<String>) -> Self {
        Self {
            human: human.into(),
            ai: ai.into(),
        }
    }
}

/// Prior conversational context for a follow-up question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChatHistory {
    Transcript(String),
    Turns(Vec<ConversationTurn>),
}

impl Default for ChatHistory {
    fn default() -> Self {
        ChatHistory::Turns(Vec::new())
    }
}

impl ChatHistory {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Whether there is no usable history. Whitespace-only transcripts count as empty.
    pub fn is_empty(&self) -> bool {
        match self {
            ChatHistory::Transcript(text) => text.trim().is_empty(),
            ChatHistory::Turns(turns) => turns.is_empty(),
        }
    }

    /// Render the history as a single transcript string.
    pub fn to_transcript(&self) -> String {
        match self {
            ChatHistory::Transcript(text) => text.clone(),
            ChatHistory::Turns(turns) => turns
                .iter()
                .map(|t| format!("Human: {}\nAssistant: {}", t.human, t.ai))
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    /// Append a finished turn, converting a transcript history in place.
    pub fn push_turn(&mut self, turn: ConversationTurn) {
        match self {
            ChatHistory::Turns(turns) => turns.push(turn),
            ChatHistory::Transcript(text) => {
                if !text.is_empty() {
                    text.push('\n');
                }
                text.push_str(&format!("Human: {}\nAssistant: {}", turn.human, turn.ai));
            }
        }
    }

    /// Decode history from an envelope value.
    ///
    /// Accepts a string, an array of `[human, ai]` pairs, or an array of
    /// `{"human": .., "ai": ..}` objects.
    pub fn from_value(key: &str, value: &Value) -> Result<Self, ChainError> {
        let invalid = |reason: &str| ChainError::InvalidInput {
            key: key.to_string(),
            reason: reason.to_string(),
        };

        match value {
            Value::String(text) => Ok(ChatHistory::Transcript(text.clone())),
            Value::Array(items) => {
                let mut turns = Vec::with_capacity(items.len());
                for item in items {
                    let turn = match item {
                        Value::Array(pair) if pair.len() == 2 => {
                            match (pair[0].as_str(), pair[1].as_str()) {
                                (Some(h), Some(a)) => ConversationTurn::new(h, a),
                                _ => return Err(invalid("turn pairs must hold two strings")),
                            }
                        }
                        Value::Object(_) => serde_json::from_value(item.clone())
                            .map_err(|_| invalid("turn objects need 'human' and 'ai' strings"))?,
                        _ => return Err(invalid("each turn must be a pair or an object")),
                    };
                    turns.push(turn);
                }
                Ok(ChatHistory::Turns(turns))
            }
            _ => Err(invalid("expected a transcript string or a list of turns")),
        }
    }
}

impl From<String> for ChatHistory {
    fn from(text: String) -> Self {
        ChatHistory::Transcript(text)
    }
}

impl From<&str> for ChatHistory {
    fn from(text: &str) -> Self {
        ChatHistory::Transcript(text.to_string())
    }
}

impl From<Vec<ConversationTurn>> for ChatHistory {
    fn from(turns: Vec<ConversationTurn>) -> Self {
        ChatHistory::Turns(turns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_emptiness() {
        assert!(ChatHistory::empty().is_empty());
        assert!(ChatHistory::from("   \n").is_empty());
        assert!(!ChatHistory::from("Human: hi").is_empty());
        assert!(!ChatHistory::from(vec![ConversationTurn::new("q", "a")]).is_empty());
    }

    #[test]
    fn test_turns_to_transcript() {
        let history = ChatHistory::from(vec![
            ConversationTurn::new("Who is Breyer?", "A justice."),
            ConversationTurn::new("Retired?", "Yes."),
        ]);
        assert_eq!(
            history.to_transcript(),
            "Human: Who is Breyer?\nAssistant: A justice.\nHuman: Retired?\nAssistant: Yes."
        );
    }

    #[test]
    fn test_push_turn_on_transcript() {
        let mut history = ChatHistory::from("Human: a\nAssistant: b");
        history.push_turn(ConversationTurn::new("c", "d"));
        assert_eq!(
            history.to_transcript(),
            "Human: a\nAssistant: b\nHuman: c\nAssistant: d"
        );
    }

    #[test]
    fn test_from_value_variants() {
        let empty = ChatHistory::from_value("chat_history", &json!([])).unwrap();
        assert!(empty.is_empty());

        let text = ChatHistory::from_value("chat_history", &json!("prior talk")).unwrap();
        assert_eq!(text, ChatHistory::Transcript("prior talk".into()));

        let pairs = ChatHistory::from_value("chat_history", &json!([["q", "a"]])).unwrap();
        assert_eq!(pairs, ChatHistory::Turns(vec![ConversationTurn::new("q", "a")]));

        let objects =
            ChatHistory::from_value("chat_history", &json!([{"human": "q", "ai": "a"}])).unwrap();
        assert_eq!(objects, pairs);
    }

    #[test]
    fn test_from_value_rejects_garbage() {
        let err = ChatHistory::from_value("chat_history", &json!(17)).unwrap_err();
        assert!(matches!(err, ChainError::InvalidInput { ref key, .. } if key == "chat_history"));

        let err = ChatHistory::from_value("chat_history", &json!([["only-one"]])).unwrap_err();
        assert!(matches!(err, ChainError::InvalidInput { .. }));
    }

    #[test]
    fn test_from_value_rejects_null() {
        let err = ChatHistory::from_value("chat_history", &Value::Null).unwrap_err();
        assert!(matches!(err, ChainError::InvalidInput { ref key, .. } if key == "chat_history"));
    }
}
