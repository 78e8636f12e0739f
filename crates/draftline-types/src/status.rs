//! Processing status of a single artifact and the run status of a document.
//!
//! `ProcessingStatus` only moves along the edges listed in
//! [`ProcessingStatus::can_transition_to`]. Every status write in the engine
//! goes through [`ProcessingStatus::transition_to`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle of one artifact (a pipeline stage or a section).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    #[default]
    NotStarted,
    Queued,
    Running,
    AwaitingReview,
    Approved,
    NeedsRevision,
    Error,
    Stale,
}

impl ProcessingStatus {
    pub const ALL: [ProcessingStatus; 8] = [
        ProcessingStatus::NotStarted,
        ProcessingStatus::Queued,
        ProcessingStatus::Running,
        ProcessingStatus::AwaitingReview,
        ProcessingStatus::Approved,
        ProcessingStatus::NeedsRevision,
        ProcessingStatus::Error,
        ProcessingStatus::Stale,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::NotStarted => "not_started",
            ProcessingStatus::Queued => "queued",
            ProcessingStatus::Running => "running",
            ProcessingStatus::AwaitingReview => "awaiting_review",
            ProcessingStatus::Approved => "approved",
            ProcessingStatus::NeedsRevision => "needs_revision",
            ProcessingStatus::Error => "error",
            ProcessingStatus::Stale => "stale",
        }
    }

    /// Whether `self -> next` is an allowed edge.
    pub fn can_transition_to(self, next: ProcessingStatus) -> bool {
        use ProcessingStatus::*;
        matches!(
            (self, next),
            (NotStarted, Queued)
                | (Queued, Running)
                | (Running, AwaitingReview)
                | (Running, Approved)
                | (Running, Error)
                | (AwaitingReview, Approved)
                | (AwaitingReview, NeedsRevision)
                | (NeedsRevision, Queued)
                | (Error, Queued)
                | (Stale, Queued)
                | (Stale, Approved)
                | (Approved, Stale)
                | (AwaitingReview, Stale)
                | (NeedsRevision, Stale)
                | (Error, Stale)
        )
    }

    /// Return `next` if the edge is allowed.
    pub fn transition_to(self, next: ProcessingStatus) -> Result<ProcessingStatus, StatusTransitionError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(StatusTransitionError { from: self, to: next })
        }
    }

    /// Queued or running. Staleness never overrides these.
    pub fn is_in_flight(self) -> bool {
        matches!(self, ProcessingStatus::Queued | ProcessingStatus::Running)
    }
}

impl std::fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProcessingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ProcessingStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown processing status: '{s}'"))
    }
}

/// Rejected status change.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid status transition: {from} -> {to}")]
pub struct StatusTransitionError {
    pub from: ProcessingStatus,
    pub to: ProcessingStatus,
}

/// Status of the document-level run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Running,
    Interrupted,
    Completed,
    Failed,
    Cancelled,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Running => write!(f, "running"),
            RunStatus::Interrupted => write!(f, "interrupted"),
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Failed => write!(f, "failed"),
            RunStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_edges() {
        use ProcessingStatus::*;
        let path = [NotStarted, Queued, Running, AwaitingReview, Approved, Stale, Queued];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_revision_loop() {
        use ProcessingStatus::*;
        let s = AwaitingReview.transition_to(NeedsRevision).unwrap();
        let s = s.transition_to(Queued).unwrap();
        assert_eq!(s, Queued);
    }

    #[test]
    fn test_rejected_edges() {
        use ProcessingStatus::*;
        assert!(NotStarted.transition_to(Running).is_err());
        assert!(Approved.transition_to(Running).is_err());
        assert!(Queued.transition_to(Stale).is_err());
        assert!(Running.transition_to(Stale).is_err());

        let err = Approved.transition_to(NeedsRevision).unwrap_err();
        assert_eq!(err.to_string(), "invalid status transition: approved -> needs_revision");
    }

    #[test]
    fn test_status_string_roundtrip() {
        for status in ProcessingStatus::ALL {
            let parsed: ProcessingStatus = status.to_string().parse().unwrap();
            assert_eq!(parsed, status);
        }
        assert!("bogus".parse::<ProcessingStatus>().is_err());
    }

    #[test]
    fn test_serde_snake_case() {
        let json = serde_json::to_string(&ProcessingStatus::AwaitingReview).unwrap();
        assert_eq!(json, "\"awaiting_review\"");
    }
}
