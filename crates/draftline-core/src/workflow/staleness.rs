//! Dependency-driven staleness propagation.

use draftline_types::dependency::DependencyMap;
use draftline_types::event::EngineEvent;
use draftline_types::status::ProcessingStatus;
use draftline_types::workflow::WorkflowState;

use crate::event::EventBus;

/// An artifact that was marked stale and the status it held before.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaleMark {
    pub artifact: String,
    pub previous: ProcessingStatus,
}

/// Marks direct dependents of an edited artifact as stale.
///
/// Single pass and not transitive: only artifacts listed under the source in
/// the dependency map are touched. Artifacts that are in flight, not yet
/// generated, already stale or unknown to the state are left alone.
#[derive(Debug, Clone, Default)]
pub struct StalenessTracker {
    dependencies: DependencyMap,
}

impl StalenessTracker {
    pub fn new(dependencies: DependencyMap) -> Self {
        Self { dependencies }
    }

    pub fn dependencies(&self) -> &DependencyMap {
        &self.dependencies
    }

    pub fn mark_stale(&self, state: &mut WorkflowState, source: &str) -> Vec<StaleMark> {
        let mut marked = Vec::new();
        for dependent in self.dependencies.dependents_of(source) {
            let Some(status) = state.artifact_status(dependent) else {
                tracing::debug!(source, dependent, "dependent not present in state, skipping");
                continue;
            };
            if status.is_in_flight() || matches!(status, ProcessingStatus::NotStarted | ProcessingStatus::Stale) {
                continue;
            }
            match state.set_artifact_status(dependent, ProcessingStatus::Stale) {
                Ok(previous) => marked.push(StaleMark {
                    artifact: dependent.to_string(),
                    previous,
                }),
                Err(e) => tracing::warn!(source, dependent, error = %e, "could not mark artifact stale"),
            }
        }
        if !marked.is_empty() {
            tracing::info!(source, count = marked.len(), "marked dependents stale");
        }
        marked
    }

    /// [`mark_stale`](Self::mark_stale), publishing one event per marked artifact.
    pub fn propagate(&self, state: &mut WorkflowState, source: &str, thread_id: &str, bus: &EventBus) -> Vec<StaleMark> {
        let marked = self.mark_stale(state, source);
        for mark in &marked {
            bus.publish(EngineEvent::ArtifactStale {
                thread_id: thread_id.to_string(),
                artifact: mark.artifact.clone(),
                source: source.to_string(),
                previous: mark.previous,
            });
        }
        marked
    }
}
