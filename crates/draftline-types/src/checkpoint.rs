//! Checkpoint records and thread identifiers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::status::RunStatus;
use crate::workflow::WorkflowState;

// ---------------------------------------------------------------------------
// ThreadId
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ThreadIdError {
    #[error("thread id is empty")]
    Empty,

    #[error("thread id '{0}' must have 2 or 3 '_'-separated parts")]
    PartCount(String),

    #[error("thread id '{0}' has an empty part")]
    EmptyPart(String),

    #[error("thread id '{id}' contains invalid character '{ch}'")]
    InvalidCharacter { id: String, ch: char },

    #[error("thread id '{0}' must start with a letter")]
    ComponentStart(String),
}

/// Validated `{component}_{logicalId}[_{suffix}]` identifier.
///
/// Parts are non-empty and use `[A-Za-z0-9-]`. The component starts with a letter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ThreadId(String);

impl ThreadId {
    pub const DEFAULT_COMPONENT: &'static str = "proposal";

    pub fn parse(raw: &str) -> Result<ThreadId, ThreadIdError> {
        if raw.is_empty() {
            return Err(ThreadIdError::Empty);
        }
        let parts: Vec<&str> = raw.split('_').collect();
        if !(2..=3).contains(&parts.len()) {
            return Err(ThreadIdError::PartCount(raw.to_string()));
        }
        if parts.iter().any(|p| p.is_empty()) {
            return Err(ThreadIdError::EmptyPart(raw.to_string()));
        }
        if let Some(ch) = raw.chars().find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_')) {
            return Err(ThreadIdError::InvalidCharacter {
                id: raw.to_string(),
                ch,
            });
        }
        if !parts[0].starts_with(|c: char| c.is_ascii_alphabetic()) {
            return Err(ThreadIdError::ComponentStart(raw.to_string()));
        }
        Ok(ThreadId(raw.to_string()))
    }

    /// Assemble and validate an id. `component` defaults to `proposal`.
    pub fn build(component: Option<&str>, logical_id: &str, suffix: Option<&str>) -> Result<ThreadId, ThreadIdError> {
        let component = component.unwrap_or(Self::DEFAULT_COMPONENT);
        let raw = match suffix {
            Some(suffix) => format!("{component}_{logical_id}_{suffix}"),
            None => format!("{component}_{logical_id}"),
        };
        ThreadId::parse(&raw)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn component(&self) -> &str {
        self.0.split('_').next().unwrap_or_default()
    }

    pub fn logical_id(&self) -> &str {
        self.0.split('_').nth(1).unwrap_or_default()
    }

    pub fn suffix(&self) -> Option<&str> {
        self.0.split('_').nth(2)
    }
}

impl std::fmt::Display for ThreadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for ThreadId {
    type Err = ThreadIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ThreadId::parse(s)
    }
}

impl TryFrom<String> for ThreadId {
    type Error = ThreadIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        ThreadId::parse(&value)
    }
}

impl From<ThreadId> for String {
    fn from(id: ThreadId) -> Self {
        id.0
    }
}

// ---------------------------------------------------------------------------
// Checkpoint
// ---------------------------------------------------------------------------

/// What produced a checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointSource {
    /// Initial state submitted by the caller.
    #[default]
    Input,
    /// Commit after a step ran.
    Step,
    /// Feedback applied on resume.
    Resume,
    /// Direct edit or stale resolution outside a run.
    Update,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    #[serde(default)]
    pub source: CheckpointSource,
    #[serde(default)]
    pub step: Option<String>,
    /// Number of steps executed in the run that wrote this checkpoint.
    #[serde(default)]
    pub step_count: u32,
    #[serde(default)]
    pub run_status: RunStatus,
}

/// Work the engine still owes on this thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingTask {
    pub step: String,
    #[serde(default)]
    pub interrupt: Option<String>,
}

/// Immutable snapshot of a thread's state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub thread_id: ThreadId,
    pub checkpoint_id: Uuid,
    pub parent_checkpoint_id: Option<Uuid>,
    /// Serialized `WorkflowState`.
    pub values: serde_json::Value,
    #[serde(default)]
    pub metadata: CheckpointMetadata,
    /// Steps to run when the thread continues.
    #[serde(default)]
    pub next: Vec<String>,
    #[serde(default)]
    pub tasks: Vec<PendingTask>,
    /// Engine configuration in effect when written.
    #[serde(default)]
    pub config: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(
        thread_id: ThreadId,
        parent_checkpoint_id: Option<Uuid>,
        state: &WorkflowState,
        metadata: CheckpointMetadata,
        next: Vec<String>,
        config: serde_json::Value,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            thread_id,
            checkpoint_id: Uuid::now_v7(),
            parent_checkpoint_id,
            values: serde_json::to_value(state)?,
            metadata,
            next,
            tasks: Vec::new(),
            config,
            created_at: Utc::now(),
        })
    }

    pub fn with_tasks(mut self, tasks: Vec<PendingTask>) -> Self {
        self.tasks = tasks;
        self
    }

    pub fn state(&self) -> Result<WorkflowState, serde_json::Error> {
        serde_json::from_value(self.values.clone())
    }
}

/// One row of a thread listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadSummary {
    pub thread_id: ThreadId,
    pub checkpoint_count: u64,
    pub latest_checkpoint_id: Uuid,
    pub latest_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_ids() {
        let id = ThreadId::parse("proposal_42").unwrap();
        assert_eq!(id.component(), "proposal");
        assert_eq!(id.logical_id(), "42");
        assert_eq!(id.suffix(), None);

        let id = ThreadId::parse("review_abc-1_20260101T0900").unwrap();
        assert_eq!(id.suffix(), Some("20260101T0900"));
    }

    #[test]
    fn test_parse_invalid_ids() {
        assert_eq!(ThreadId::parse(""), Err(ThreadIdError::Empty));
        assert!(matches!(ThreadId::parse("proposal"), Err(ThreadIdError::PartCount(_))));
        assert!(matches!(ThreadId::parse("a_b_c_d"), Err(ThreadIdError::PartCount(_))));
        assert!(matches!(ThreadId::parse("proposal__x"), Err(ThreadIdError::EmptyPart(_))));
        assert!(matches!(
            ThreadId::parse("proposal_4 2"),
            Err(ThreadIdError::InvalidCharacter { ch: ' ', .. })
        ));
        assert!(matches!(ThreadId::parse("9lives_1"), Err(ThreadIdError::ComponentStart(_))));
    }

    #[test]
    fn test_build_default_component() {
        let id = ThreadId::build(None, "42", None).unwrap();
        assert_eq!(id.as_str(), "proposal_42");
        let id = ThreadId::build(Some("review"), "7", Some("v2")).unwrap();
        assert_eq!(id.to_string(), "review_7_v2");
        assert!(ThreadId::build(None, "", None).is_err());
    }

    #[test]
    fn test_thread_id_serde_validates() {
        let id: ThreadId = serde_json::from_str("\"proposal_42\"").unwrap();
        assert_eq!(id.as_str(), "proposal_42");
        assert!(serde_json::from_str::<ThreadId>("\"bad id\"").is_err());
    }

    #[test]
    fn test_checkpoint_state_roundtrip() {
        let state = WorkflowState::new("doc-42", "Proposal", "proposal");
        let cp = Checkpoint::new(
            ThreadId::parse("proposal_42").unwrap(),
            None,
            &state,
            CheckpointMetadata::default(),
            vec!["research".into()],
            serde_json::json!({}),
        )
        .unwrap();
        assert_eq!(cp.state().unwrap(), state);
        assert_eq!(cp.next, vec!["research"]);
    }
}
