//! Conversation messages threaded through the workflow state.
//!
//! There is one message type. Action requests emitted by the model live in a
//! dedicated `pending_actions` field set at construction, so routing never has
//! to inspect optional attributes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Role of a message in an LLM conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::Tool => "tool",
        }
    }
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MessageRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system" => Ok(MessageRole::System),
            "user" => Ok(MessageRole::User),
            "assistant" => Ok(MessageRole::Assistant),
            "tool" => Ok(MessageRole::Tool),
            other => Err(format!("unknown message role: '{other}'")),
        }
    }
}

/// Where a message came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    #[default]
    Standard,
    /// Synthetic summary of older history produced by the context manager.
    Summary,
    /// Placeholder used when no history fits the context budget.
    HistoryUnavailable,
}

/// A tool or action invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRequest {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub role: MessageRole,
    pub content: String,
    #[serde(default)]
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pending_actions: Vec<ActionRequest>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            role,
            content: content.into(),
            kind: MessageKind::Standard,
            pending_actions: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    /// Assistant message carrying action requests for the router.
    pub fn assistant_with_actions(content: impl Into<String>, actions: Vec<ActionRequest>) -> Self {
        Self {
            pending_actions: actions,
            ..Self::new(MessageRole::Assistant, content)
        }
    }

    pub fn tool(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Tool, content)
    }

    pub fn summary(content: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Summary,
            ..Self::new(MessageRole::System, content)
        }
    }

    pub fn history_unavailable() -> Self {
        Self {
            kind: MessageKind::HistoryUnavailable,
            ..Self::new(
                MessageRole::System,
                "Earlier conversation history was unavailable because it did not fit the model context.",
            )
        }
    }

    pub fn is_system(&self) -> bool {
        self.role == MessageRole::System
    }

    pub fn has_pending_actions(&self) -> bool {
        !self.pending_actions.is_empty()
    }
}
