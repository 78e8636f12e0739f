//! Workflow execution: graph definition, routing, review interrupts,
//! checkpointing and staleness tracking.

pub mod checkpoint;
pub mod engine;
pub mod feedback;
pub mod graph;
pub mod readiness;
pub mod router;
pub mod staleness;
pub mod step;

pub use checkpoint::{CheckpointError, CheckpointManager, CheckpointWrite};
pub use engine::{EditOutcome, EngineError, RunOutcome, WorkflowEngine};
pub use feedback::{FeedbackError, FeedbackOutcome, apply_feedback};
pub use graph::{GraphBuilder, GraphError, Route, WorkflowGraph};
pub use readiness::{AssemblyReadiness, BlockingArtifact};
pub use router::{RouteDecision, RouteReason, route};
pub use staleness::{StaleMark, StalenessTracker};
pub use step::{BoxStep, StateUpdate, Step, StepContext, StepError, apply_update};
