//! Final-assembly readiness check.

use draftline_types::status::ProcessingStatus;
use draftline_types::workflow::WorkflowState;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockingArtifact {
    pub artifact: String,
    pub status: ProcessingStatus,
}

/// Whether every generated artifact is approved.
///
/// Stages that were never started are ignored; sections always count.
/// A stale artifact blocks until it is regenerated or kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssemblyReadiness {
    pub ready: bool,
    pub blocking: Vec<BlockingArtifact>,
}

impl AssemblyReadiness {
    pub fn check(state: &WorkflowState) -> Self {
        let blocking: Vec<BlockingArtifact> = state
            .artifact_ids()
            .into_iter()
            .filter_map(|artifact| {
                let status = state.artifact_status(&artifact)?;
                let is_section = state.sections.contains(&artifact);
                let counts = is_section || status != ProcessingStatus::NotStarted;
                (counts && status != ProcessingStatus::Approved).then_some(BlockingArtifact { artifact, status })
            })
            .collect();
        Self {
            ready: blocking.is_empty() && !state.sections.is_empty(),
            blocking,
        }
    }
}

#[cfg(test)]
mod tests {
    use draftline_types::workflow::SectionRecord;

    use super::*;

    fn state(sections: &[(&str, ProcessingStatus)]) -> WorkflowState {
        let mut state = WorkflowState::new("proposal_42", "Grant", "proposal");
        state.sections = state
            .sections
            .merge(sections.iter().map(|(id, s)| SectionRecord::new(*id, *id).with_status(*s)))
            .unwrap();
        state
    }

    #[test]
    fn test_all_approved_is_ready() {
        let mut state = state(&[
            ("introduction", ProcessingStatus::Approved),
            ("methods", ProcessingStatus::Approved),
        ]);
        state.research.status = ProcessingStatus::Approved;
        let readiness = AssemblyReadiness::check(&state);
        assert!(readiness.ready);
        assert!(readiness.blocking.is_empty());
    }

    #[test]
    fn test_stale_blocks() {
        let state = state(&[
            ("introduction", ProcessingStatus::Approved),
            ("methods", ProcessingStatus::Stale),
        ]);
        let readiness = AssemblyReadiness::check(&state);
        assert!(!readiness.ready);
        assert_eq!(
            readiness.blocking,
            vec![BlockingArtifact {
                artifact: "methods".into(),
                status: ProcessingStatus::Stale,
            }]
        );
    }

    #[test]
    fn test_started_stage_counts() {
        let mut state = state(&[("introduction", ProcessingStatus::Approved)]);
        state.solution_analysis.status = ProcessingStatus::AwaitingReview;
        let readiness = AssemblyReadiness::check(&state);
        assert!(!readiness.ready);
        assert_eq!(readiness.blocking[0].artifact, "solution_analysis");
    }

    #[test]
    fn test_no_sections_is_not_ready() {
        assert!(!AssemblyReadiness::check(&state(&[])).ready);
    }
}
