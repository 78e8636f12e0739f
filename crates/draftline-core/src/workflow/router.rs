//! Pure routing decisions over committed state.

use draftline_types::status::ProcessingStatus;
use draftline_types::workflow::WorkflowState;

use super::graph::{Edge, GraphError, Route, WorkflowGraph};

/// Why a destination was chosen. Logged and surfaced in events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteReason {
    /// The last message requests actions.
    PendingActions,
    /// The step's artifact was sent back for another pass.
    Rerun,
    Edge,
}

impl RouteReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteReason::PendingActions => "pending_actions",
            RouteReason::Rerun => "rerun",
            RouteReason::Edge => "edge",
        }
    }
}

impl std::fmt::Display for RouteReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteDecision {
    pub destination: Route,
    pub reason: RouteReason,
    /// Artifact of the step routed from, with its status at decision time.
    pub target: Option<String>,
    pub target_status: Option<ProcessingStatus>,
}

/// Choose the step after `current` for `state`.
///
/// Checked in order: pending actions (for steps registered with an action
/// step), a target artifact back in `Queued`/`NeedsRevision`, then the
/// step's outgoing edge. Conditional destinations must be declared.
pub fn route(graph: &WorkflowGraph, current: &str, state: &WorkflowState) -> Result<RouteDecision, GraphError> {
    let step = graph.step(current).ok_or_else(|| GraphError::UnknownStep {
        from: "route".into(),
        to: current.to_string(),
    })?;
    let target = step.target(state);
    let target_status = target.as_deref().and_then(|artifact| state.artifact_status(artifact));

    let (destination, reason) = if let Some(action_step) = graph
        .action_step_for(current)
        .filter(|_| state.last_message().is_some_and(|m| m.has_pending_actions()))
    {
        (Route::step(action_step), RouteReason::PendingActions)
    } else if target_status.is_some_and(|s| matches!(s, ProcessingStatus::Queued | ProcessingStatus::NeedsRevision)) {
        (Route::step(current), RouteReason::Rerun)
    } else {
        let destination = match graph.edge(current) {
            Some(Edge::Direct(route)) => route.clone(),
            Some(Edge::Conditional { router, targets }) => {
                let destination = router(state);
                if !targets.contains(&destination) {
                    return Err(GraphError::UndeclaredDestination {
                        from: current.to_string(),
                        destination,
                    });
                }
                destination
            }
            None => return Err(GraphError::NoEdge(current.to_string())),
        };
        (destination, RouteReason::Edge)
    };

    tracing::info!(
        from = current,
        destination = %destination,
        reason = %reason,
        target = ?target,
        target_status = ?target_status,
        message_count = state.messages.len(),
        document_status = %state.document.status,
        last_error = ?state.errors.last().map(|e| e.category),
        "route selected"
    );
    Ok(RouteDecision {
        destination,
        reason,
        target,
        target_status,
    })
}
