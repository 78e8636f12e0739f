//! Application of reviewer feedback to a workflow state.
//!
//! Pure: takes the state by reference and returns the updated copy, so the
//! engine can decide when (and whether) to commit it.

use draftline_types::evaluation::{EvaluationCriteria, EvaluationResult};
use draftline_types::feedback::{FeedbackAction, HumanFeedback};
use draftline_types::message::Message;
use draftline_types::status::ProcessingStatus;
use draftline_types::workflow::{StateError, WorkflowState};

#[derive(Debug, thiserror::Error)]
pub enum FeedbackError {
    #[error("artifact '{artifact}' is {status}; '{action}' does not apply")]
    NotApplicable {
        artifact: String,
        status: ProcessingStatus,
        action: FeedbackAction,
    },

    #[error(transparent)]
    State(#[from] StateError),
}

/// Result of [`apply_feedback`].
#[derive(Debug, Clone)]
pub struct FeedbackOutcome {
    pub state: WorkflowState,
    /// Artifact whose dependents should be marked stale.
    pub propagate_from: Option<String>,
}

/// Prefix for reviewer guidance appended to the history on revise.
const REVISION_PREFIX: &str = "Reviewer feedback for";

/// Apply `feedback` to its target artifact.
///
/// `criteria` is used to turn per-criterion `scores` into an evaluation on approve.
pub fn apply_feedback(
    state: &WorkflowState,
    feedback: &HumanFeedback,
    criteria: Option<&EvaluationCriteria>,
) -> Result<FeedbackOutcome, FeedbackError> {
    let artifact = feedback.target_artifact.as_str();
    let status = state
        .artifact_status(artifact)
        .ok_or_else(|| StateError::UnknownArtifact(artifact.to_string()))?;
    let not_applicable = || FeedbackError::NotApplicable {
        artifact: artifact.to_string(),
        status,
        action: feedback.action,
    };

    let mut next = state.clone();
    let mut propagate_from = None;

    match feedback.action {
        FeedbackAction::Approve => {
            if status != ProcessingStatus::AwaitingReview {
                return Err(not_applicable());
            }
            next.set_artifact_status(artifact, ProcessingStatus::Approved)?;
            if let Some(evaluation) = reviewer_evaluation(feedback, criteria) {
                next.set_evaluation(artifact, Some(evaluation))?;
            }
            // A regenerated artifact invalidates whatever was built on the earlier version.
            if next.artifact_version(artifact).unwrap_or(0) > 1 {
                propagate_from = Some(artifact.to_string());
            }
        }
        FeedbackAction::Revise => {
            if status != ProcessingStatus::AwaitingReview {
                return Err(not_applicable());
            }
            next.set_artifact_status(artifact, ProcessingStatus::NeedsRevision)?;
            next.set_artifact_status(artifact, ProcessingStatus::Queued)?;
            let guidance = feedback
                .comments
                .as_deref()
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .unwrap_or("Please revise this draft.");
            next.messages
                .push(Message::user(format!("{REVISION_PREFIX} '{artifact}': {guidance}")));
        }
        FeedbackAction::Regenerate => match status {
            ProcessingStatus::Stale | ProcessingStatus::Error => {
                next.set_artifact_status(artifact, ProcessingStatus::Queued)?;
            }
            ProcessingStatus::AwaitingReview => {
                next.set_artifact_status(artifact, ProcessingStatus::NeedsRevision)?;
                next.set_artifact_status(artifact, ProcessingStatus::Queued)?;
            }
            _ => return Err(not_applicable()),
        },
        FeedbackAction::KeepCurrent => {
            if status != ProcessingStatus::Stale {
                return Err(not_applicable());
            }
            next.set_artifact_status(artifact, ProcessingStatus::Approved)?;
        }
    }

    next.updated_at = chrono::Utc::now();
    Ok(FeedbackOutcome { state: next, propagate_from })
}

fn reviewer_evaluation(feedback: &HumanFeedback, criteria: Option<&EvaluationCriteria>) -> Option<EvaluationResult> {
    let scores = feedback.scores.as_ref()?;
    let comments = feedback.comments.clone().unwrap_or_default();
    Some(match criteria {
        Some(criteria) => criteria.aggregate(scores, comments),
        None => {
            let score = if scores.is_empty() {
                0.0
            } else {
                scores.values().sum::<f64>() / scores.len() as f64
            };
            EvaluationResult {
                score,
                passed: true,
                feedback: comments,
                criteria: Some(scores.clone()),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use draftline_types::evaluation::Criterion;
    use draftline_types::workflow::SectionRecord;

    use super::*;

    fn state(status: ProcessingStatus) -> WorkflowState {
        let mut state = WorkflowState::new("proposal_42", "Grant", "proposal");
        state.sections = state
            .sections
            .merge([SectionRecord::new("introduction", "Introduction").with_status(status)])
            .unwrap();
        state
    }

    #[test]
    fn test_approve() {
        let before = state(ProcessingStatus::AwaitingReview);
        let outcome = apply_feedback(&before, &HumanFeedback::approve("introduction"), None).unwrap();
        assert_eq!(
            outcome.state.artifact_status("introduction"),
            Some(ProcessingStatus::Approved)
        );
        assert!(outcome.propagate_from.is_none());
        assert_eq!(
            before.artifact_status("introduction"),
            Some(ProcessingStatus::AwaitingReview)
        );
    }

    #[test]
    fn test_approve_regenerated_version_propagates() {
        let mut before = state(ProcessingStatus::AwaitingReview);
        before
            .replace_artifact_content("introduction", serde_json::json!("v1"))
            .unwrap();
        before
            .replace_artifact_content("introduction", serde_json::json!("v2"))
            .unwrap();
        let outcome = apply_feedback(&before, &HumanFeedback::approve("introduction"), None).unwrap();
        assert_eq!(outcome.propagate_from.as_deref(), Some("introduction"));
    }

    #[test]
    fn test_approve_with_scores_uses_criteria() {
        let criteria = EvaluationCriteria {
            content_type: "proposal".into(),
            criteria: vec![
                Criterion {
                    name: "clarity".into(),
                    description: String::new(),
                    weight: 1.0,
                },
                Criterion {
                    name: "evidence".into(),
                    description: String::new(),
                    weight: 3.0,
                },
            ],
            passing_threshold: 0.7,
        };
        let scores = BTreeMap::from([("clarity".to_string(), 0.4), ("evidence".to_string(), 0.8)]);
        let feedback = HumanFeedback::approve("introduction").with_scores(scores);

        let outcome = apply_feedback(&state(ProcessingStatus::AwaitingReview), &feedback, Some(&criteria)).unwrap();
        let eval = outcome
            .state
            .sections
            .get("introduction")
            .unwrap()
            .evaluation
            .clone()
            .unwrap();
        assert!((eval.score - 0.7).abs() < 1e-9);
        assert!(eval.passed);
    }

    #[test]
    fn test_revise_queues_and_appends_guidance() {
        let outcome = apply_feedback(
            &state(ProcessingStatus::AwaitingReview),
            &HumanFeedback::revise("introduction", "shorten it"),
            None,
        )
        .unwrap();
        assert_eq!(
            outcome.state.artifact_status("introduction"),
            Some(ProcessingStatus::Queued)
        );
        let last = outcome.state.last_message().unwrap();
        assert!(last.content.contains("shorten it"));
    }

    #[test]
    fn test_keep_current_resolves_stale() {
        let feedback = HumanFeedback {
            target_artifact: "introduction".into(),
            action: FeedbackAction::KeepCurrent,
            comments: None,
            scores: None,
        };
        let outcome = apply_feedback(&state(ProcessingStatus::Stale), &feedback, None).unwrap();
        assert_eq!(
            outcome.state.artifact_status("introduction"),
            Some(ProcessingStatus::Approved)
        );
    }

    #[test]
    fn test_regenerate_stale() {
        let feedback = HumanFeedback {
            target_artifact: "introduction".into(),
            action: FeedbackAction::Regenerate,
            comments: None,
            scores: None,
        };
        let outcome = apply_feedback(&state(ProcessingStatus::Stale), &feedback, None).unwrap();
        assert_eq!(
            outcome.state.artifact_status("introduction"),
            Some(ProcessingStatus::Queued)
        );
    }

    #[test]
    fn test_approve_requires_review_status() {
        let err = apply_feedback(
            &state(ProcessingStatus::Approved),
            &HumanFeedback::approve("introduction"),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, FeedbackError::NotApplicable { .. }));
    }

    #[test]
    fn test_unknown_artifact() {
        let err = apply_feedback(
            &state(ProcessingStatus::AwaitingReview),
            &HumanFeedback::approve("appendix"),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, FeedbackError::State(StateError::UnknownArtifact(_))));
    }
}
