//! Event types for the Draftline engine event bus.
//!
//! `EngineEvent` is broadcast while threads execute. All variants are
//! Clone + Send + Sync for use with tokio broadcast channels.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ErrorCategory;
use crate::status::{ProcessingStatus, RunStatus};

/// How the context manager fitted a message list into the budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextStrategy {
    Unchanged,
    Summarized,
    Truncated,
    HistoryUnavailable,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    StepStarted {
        thread_id: String,
        step: String,
        attempt: u32,
    },

    StepCompleted {
        thread_id: String,
        step: String,
        duration_ms: u64,
    },

    StepRetrying {
        thread_id: String,
        step: String,
        attempt: u32,
        category: ErrorCategory,
        delay_ms: u64,
    },

    StepFailed {
        thread_id: String,
        step: String,
        category: ErrorCategory,
        error: String,
        retry_count: u32,
    },

    /// Router picked the next destination.
    RouteSelected {
        thread_id: String,
        from: String,
        destination: String,
        reason: String,
        target: Option<String>,
        target_status: Option<ProcessingStatus>,
        document_status: RunStatus,
        message_count: usize,
    },

    CheckpointWritten {
        thread_id: String,
        checkpoint_id: Uuid,
        step: Option<String>,
    },

    RunInterrupted {
        thread_id: String,
        point: String,
    },

    RunCompleted {
        thread_id: String,
        steps: u32,
    },

    RunFailed {
        thread_id: String,
        error: String,
    },

    RunCancelled {
        thread_id: String,
    },

    /// The context manager fell back to summarization or truncation.
    ContextFallback {
        model: String,
        strategy: ContextStrategy,
        original_tokens: u32,
        final_tokens: u32,
        reason: Option<String>,
    },

    ArtifactStale {
        thread_id: String,
        artifact: String,
        source: String,
        previous: ProcessingStatus,
    },
}
