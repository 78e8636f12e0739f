//! The workflow state document threaded through every step.
//!
//! A thread has exactly one `WorkflowState` per committed checkpoint. Artifacts
//! are addressed by string id: the three pipeline stages use their reserved
//! names, everything else is a section id.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::ErrorCategory;
use crate::evaluation::EvaluationResult;
use crate::feedback::HumanFeedback;
use crate::message::Message;
use crate::status::{ProcessingStatus, RunStatus, StatusTransitionError};

// ---------------------------------------------------------------------------
// Stages
// ---------------------------------------------------------------------------

/// Fixed pipeline stages that precede section generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Research,
    SolutionAnalysis,
    ConnectionPairs,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Research, Stage::SolutionAnalysis, Stage::ConnectionPairs];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Research => "research",
            Stage::SolutionAnalysis => "solution_analysis",
            Stage::ConnectionPairs => "connection_pairs",
        }
    }

    pub fn from_artifact_id(id: &str) -> Option<Stage> {
        Stage::ALL.into_iter().find(|s| s.as_str() == id)
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result slot for one pipeline stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    pub status: ProcessingStatus,
    #[serde(default)]
    pub output: Option<serde_json::Value>,
    #[serde(default)]
    pub evaluation: Option<EvaluationResult>,
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionRecord {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub content: String,
    pub status: ProcessingStatus,
    #[serde(default)]
    pub evaluation: Option<EvaluationResult>,
    /// Incremented on every content replacement.
    #[serde(default)]
    pub version: u32,
    pub updated_at: DateTime<Utc>,
}

impl SectionRecord {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            content: String::new(),
            status: ProcessingStatus::NotStarted,
            evaluation: None,
            version: 0,
            updated_at: Utc::now(),
        }
    }

    pub fn with_status(mut self, status: ProcessingStatus) -> Self {
        self.status = status;
        self
    }

    /// Swap in new content and bump the version.
    pub fn replace_content(&mut self, content: impl Into<String>) {
        self.content = content.into();
        self.version += 1;
        self.updated_at = Utc::now();
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SectionMergeError {
    #[error("section stored under '{key}' has id '{id}'")]
    KeyMismatch { key: String, id: String },

    #[error("section id '{0}' is reserved for a pipeline stage")]
    ReservedId(String),

    #[error("section id is empty")]
    EmptyId,
}

/// Sections keyed by id. New records only enter through [`SectionMap::merge`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SectionMap(BTreeMap<String, SectionRecord>);

impl SectionMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<&SectionRecord> {
        self.0.get(id)
    }

    pub(crate) fn get_mut(&mut self, id: &str) -> Option<&mut SectionRecord> {
        self.0.get_mut(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.0.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SectionRecord> {
        self.0.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Check that every key equals its record's id and no id is reserved.
    pub fn validate(&self) -> Result<(), SectionMergeError> {
        for (key, record) in &self.0 {
            check_section_id(&record.id)?;
            if key != &record.id {
                return Err(SectionMergeError::KeyMismatch {
                    key: key.clone(),
                    id: record.id.clone(),
                });
            }
        }
        Ok(())
    }

    /// Produce a new map with `updates` inserted or replacing existing entries.
    ///
    /// Pure: `self` is untouched. Records are keyed by their own id.
    pub fn merge(&self, updates: impl IntoIterator<Item = SectionRecord>) -> Result<SectionMap, SectionMergeError> {
        self.validate()?;
        let mut merged = self.0.clone();
        for record in updates {
            check_section_id(&record.id)?;
            merged.insert(record.id.clone(), record);
        }
        Ok(SectionMap(merged))
    }
}

fn check_section_id(id: &str) -> Result<(), SectionMergeError> {
    if id.is_empty() {
        return Err(SectionMergeError::EmptyId);
    }
    if Stage::from_artifact_id(id).is_some() {
        return Err(SectionMergeError::ReservedId(id.to_string()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Interrupts and errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterruptProcessing {
    #[default]
    Pending,
    Processing,
    Completed,
}

/// Human-in-the-loop suspension flag. Raised by review steps, cleared on resume.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InterruptStatus {
    pub is_interrupted: bool,
    #[serde(default)]
    pub point: Option<String>,
    #[serde(default)]
    pub feedback: Option<HumanFeedback>,
    #[serde(default)]
    pub processing: InterruptProcessing,
}

impl InterruptStatus {
    pub fn raise(point: impl Into<String>) -> Self {
        Self {
            is_interrupted: true,
            point: Some(point.into()),
            feedback: None,
            processing: InterruptProcessing::Pending,
        }
    }

    /// Clear the flag after feedback has been applied. The feedback is kept.
    pub fn clear(&mut self) {
        self.is_interrupted = false;
        self.point = None;
        self.processing = InterruptProcessing::Completed;
    }
}

/// A failure recorded in the state. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub timestamp: DateTime<Utc>,
    pub category: ErrorCategory,
    pub message: String,
    pub step: String,
    pub retry_count: u32,
    pub fatal: bool,
}

impl ErrorEvent {
    pub fn new(
        category: ErrorCategory,
        message: impl Into<String>,
        step: impl Into<String>,
        retry_count: u32,
        fatal: bool,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            category,
            message: message.into(),
            step: step.into(),
            retry_count,
            fatal,
        }
    }

    /// Message suitable for showing to a reviewer.
    pub fn user_message(&self) -> String {
        format!(
            "{} (step '{}', {} retries)",
            self.category.user_message(),
            self.step,
            self.retry_count
        )
    }
}

// ---------------------------------------------------------------------------
// WorkflowState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub id: String,
    pub title: String,
    pub content_type: String,
    #[serde(default)]
    pub status: RunStatus,
}

#[derive(Debug, Error)]
pub enum StateError {
    #[error("unknown artifact '{0}'")]
    UnknownArtifact(String),

    #[error("artifact '{artifact}': {source}")]
    Transition {
        artifact: String,
        #[source]
        source: StatusTransitionError,
    },

    #[error(transparent)]
    Sections(#[from] SectionMergeError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    pub document: DocumentMetadata,
    #[serde(default)]
    pub research: StageRecord,
    #[serde(default)]
    pub solution_analysis: StageRecord,
    #[serde(default)]
    pub connection_pairs: StageRecord,
    #[serde(default)]
    pub sections: SectionMap,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub errors: Vec<ErrorEvent>,
    #[serde(default)]
    pub interrupt: InterruptStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowState {
    pub fn new(document_id: impl Into<String>, title: impl Into<String>, content_type: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            document: DocumentMetadata {
                id: document_id.into(),
                title: title.into(),
                content_type: content_type.into(),
                status: RunStatus::Running,
            },
            research: StageRecord::default(),
            solution_analysis: StageRecord::default(),
            connection_pairs: StageRecord::default(),
            sections: SectionMap::new(),
            messages: Vec::new(),
            errors: Vec::new(),
            interrupt: InterruptStatus::default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn stage(&self, stage: Stage) -> &StageRecord {
        match stage {
            Stage::Research => &self.research,
            Stage::SolutionAnalysis => &self.solution_analysis,
            Stage::ConnectionPairs => &self.connection_pairs,
        }
    }

    pub fn stage_mut(&mut self, stage: Stage) -> &mut StageRecord {
        match stage {
            Stage::Research => &mut self.research,
            Stage::SolutionAnalysis => &mut self.solution_analysis,
            Stage::ConnectionPairs => &mut self.connection_pairs,
        }
    }

    /// Stage ids followed by section ids.
    pub fn artifact_ids(&self) -> Vec<String> {
        Stage::ALL
            .iter()
            .map(|s| s.as_str().to_string())
            .chain(self.sections.ids().map(str::to_string))
            .collect()
    }

    pub fn artifact_status(&self, id: &str) -> Option<ProcessingStatus> {
        match Stage::from_artifact_id(id) {
            Some(stage) => Some(self.stage(stage).status),
            None => self.sections.get(id).map(|s| s.status),
        }
    }

    pub fn artifact_version(&self, id: &str) -> Option<u32> {
        match Stage::from_artifact_id(id) {
            Some(stage) => Some(self.stage(stage).version),
            None => self.sections.get(id).map(|s| s.version),
        }
    }

    /// Move an artifact along an allowed status edge. Returns the previous status.
    pub fn set_artifact_status(&mut self, id: &str, next: ProcessingStatus) -> Result<ProcessingStatus, StateError> {
        let now = Utc::now();
        let (status, updated_at) = self.status_slot(id)?;
        let previous = *status;
        *status = previous.transition_to(next).map_err(|source| StateError::Transition {
            artifact: id.to_string(),
            source,
        })?;
        *updated_at = now;
        self.updated_at = now;
        Ok(previous)
    }

    /// Replace an artifact's content and bump its version. Returns the new version.
    ///
    /// Section content is stored as text: JSON strings are unwrapped, any other
    /// value is stored in its compact JSON form.
    pub fn replace_artifact_content(&mut self, id: &str, content: serde_json::Value) -> Result<u32, StateError> {
        let now = Utc::now();
        let version = match Stage::from_artifact_id(id) {
            Some(stage) => {
                let record = self.stage_mut(stage);
                record.output = Some(content);
                record.version += 1;
                record.updated_at = Some(now);
                record.version
            }
            None => {
                let section = self
                    .sections
                    .get_mut(id)
                    .ok_or_else(|| StateError::UnknownArtifact(id.to_string()))?;
                let text = match content {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
                section.replace_content(text);
                section.version
            }
        };
        self.updated_at = now;
        Ok(version)
    }

    pub fn set_evaluation(&mut self, id: &str, evaluation: Option<EvaluationResult>) -> Result<(), StateError> {
        match Stage::from_artifact_id(id) {
            Some(stage) => self.stage_mut(stage).evaluation = evaluation,
            None => {
                self.sections
                    .get_mut(id)
                    .ok_or_else(|| StateError::UnknownArtifact(id.to_string()))?
                    .evaluation = evaluation
            }
        }
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn record_error(&mut self, event: ErrorEvent) {
        self.errors.push(event);
        self.updated_at = Utc::now();
    }

    fn status_slot(&mut self, id: &str) -> Result<(&mut ProcessingStatus, &mut DateTime<Utc>), StateError> {
        match Stage::from_artifact_id(id) {
            Some(stage) => {
                let record = self.stage_mut(stage);
                let updated_at = record.updated_at.get_or_insert_with(Utc::now);
                Ok((&mut record.status, updated_at))
            }
            None => {
                let section = self
                    .sections
                    .get_mut(id)
                    .ok_or_else(|| StateError::UnknownArtifact(id.to_string()))?;
                Ok((&mut section.status, &mut section.updated_at))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_with_intro() -> WorkflowState {
        let mut state = WorkflowState::new("doc-1", "Grant", "proposal");
        state.sections = state
            .sections
            .merge([SectionRecord::new("introduction", "Introduction")])
            .unwrap();
        state
    }

    #[test]
    fn test_merge_is_pure_and_keys_by_id() {
        let base = SectionMap::new();
        let merged = base.merge([SectionRecord::new("budget", "Budget")]).unwrap();
        assert!(base.is_empty());
        assert!(merged.contains("budget"));
        assert_eq!(merged.get("budget").unwrap().id, "budget");
    }

    #[test]
    fn test_merge_replaces_existing() {
        let base = SectionMap::new()
            .merge([SectionRecord::new("budget", "Budget")])
            .unwrap();
        let mut updated = SectionRecord::new("budget", "Budget v2");
        updated.replace_content("numbers");
        let merged = base.merge([updated]).unwrap();
        assert_eq!(merged.len(), 1);
        assert_eq!(merged.get("budget").unwrap().title, "Budget v2");
    }

    #[test]
    fn test_merge_rejects_reserved_and_empty_ids() {
        let base = SectionMap::new();
        assert_eq!(
            base.merge([SectionRecord::new("research", "R")]).unwrap_err(),
            SectionMergeError::ReservedId("research".into())
        );
        assert_eq!(
            base.merge([SectionRecord::new("", "Blank")]).unwrap_err(),
            SectionMergeError::EmptyId
        );
    }

    #[test]
    fn test_merge_detects_key_mismatch_from_deserialized_map() {
        let json = serde_json::json!({
            "intro": {
                "id": "introduction",
                "title": "Intro",
                "status": "not_started",
                "updated_at": "2026-01-01T00:00:00Z"
            }
        });
        let map: SectionMap = serde_json::from_value(json).unwrap();
        assert!(matches!(
            map.merge(Vec::<SectionRecord>::new()),
            Err(SectionMergeError::KeyMismatch { .. })
        ));
    }

    #[test]
    fn test_status_changes_follow_transition_table() {
        let mut state = state_with_intro();
        state.set_artifact_status("introduction", ProcessingStatus::Queued).unwrap();
        state.set_artifact_status("introduction", ProcessingStatus::Running).unwrap();
        let err = state
            .set_artifact_status("introduction", ProcessingStatus::Stale)
            .unwrap_err();
        assert!(matches!(err, StateError::Transition { .. }));
        assert_eq!(state.artifact_status("introduction"), Some(ProcessingStatus::Running));
    }

    #[test]
    fn test_stage_addressed_by_reserved_id() {
        let mut state = state_with_intro();
        state.set_artifact_status("research", ProcessingStatus::Queued).unwrap();
        assert_eq!(state.research.status, ProcessingStatus::Queued);
        assert!(state.research.updated_at.is_some());
    }

    #[test]
    fn test_unknown_artifact() {
        let mut state = state_with_intro();
        assert!(matches!(
            state.set_artifact_status("appendix", ProcessingStatus::Queued),
            Err(StateError::UnknownArtifact(_))
        ));
        assert_eq!(state.artifact_status("appendix"), None);
    }

    #[test]
    fn test_replace_content_bumps_version() {
        let mut state = state_with_intro();
        assert_eq!(
            state
                .replace_artifact_content("introduction", serde_json::json!("first draft"))
                .unwrap(),
            1
        );
        assert_eq!(
            state
                .replace_artifact_content("introduction", serde_json::json!("second draft"))
                .unwrap(),
            2
        );
        assert_eq!(state.sections.get("introduction").unwrap().content, "second draft");

        let v = state
            .replace_artifact_content("research", serde_json::json!({"sources": 3}))
            .unwrap();
        assert_eq!(v, 1);
        assert_eq!(state.research.output, Some(serde_json::json!({"sources": 3})));
    }

    #[test]
    fn test_artifact_ids_order() {
        let state = state_with_intro();
        assert_eq!(
            state.artifact_ids(),
            vec!["research", "solution_analysis", "connection_pairs", "introduction"]
        );
    }

    #[test]
    fn test_interrupt_raise_and_clear() {
        let mut interrupt = InterruptStatus::raise("review_introduction");
        assert!(interrupt.is_interrupted);
        interrupt.feedback = Some(HumanFeedback::approve("introduction"));
        interrupt.clear();
        assert!(!interrupt.is_interrupted);
        assert!(interrupt.point.is_none());
        assert_eq!(interrupt.processing, InterruptProcessing::Completed);
        assert!(interrupt.feedback.is_some());
    }

    #[test]
    fn test_state_json_roundtrip() {
        let mut state = state_with_intro();
        state.messages.push(Message::user("hello"));
        state.record_error(ErrorEvent::new(
            ErrorCategory::RateLimitExceeded,
            "429",
            "generateSection",
            3,
            true,
        ));
        let json = serde_json::to_value(&state).unwrap();
        let back: WorkflowState = serde_json::from_value(json).unwrap();
        assert_eq!(back, state);
    }

    #[test]
    fn test_error_event_user_message() {
        let event = ErrorEvent::new(ErrorCategory::ToolExecutionError, "boom", "lookup", 1, true);
        let text = event.user_message();
        assert!(text.contains("lookup"));
        assert!(text.contains("tool"));
    }
}
