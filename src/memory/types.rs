use std::collections::HashMap;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

impl std::fmt::Display for TurnRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TurnRole::User => write!(f, "user"),
            TurnRole::Assistant => write!(f, "assistant"),
        }
    }
}

/// One message of a conversation. Turns are never edited after creation.
///
/// `timestamp` is kept as the stored text so that turns written by other
/// clients load and save back unchanged, whatever date format they used.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationTurn {
    pub role: TurnRole,
    pub content: String,
    #[serde(default)]
    pub timestamp: String,
}

impl ConversationTurn {
    pub fn new(role: TurnRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: now_timestamp(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(TurnRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(TurnRole::Assistant, content)
    }
}

/// ISO-8601 with millisecond precision and a trailing `Z`, e.g. `2024-05-01T10:00:00.000Z`.
fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Free-form facts remembered for a single user.
pub type FactMap = serde_json::Map<String, serde_json::Value>;

/// Turns by user id, in append order.
pub type ConversationStore = HashMap<String, Vec<ConversationTurn>>;

/// Facts by user id.
pub type UserFacts = HashMap<String, FactMap>;

/// Everything that is persisted: both mappings, always written together.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub conversations: ConversationStore,
    pub facts: UserFacts,
}

#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error on {path}: {source}")]
    Serialization {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

pub type MemoryResult<T> = Result<T, MemoryError>;
