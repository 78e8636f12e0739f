//! Shared domain types for Draftline.
//!
//! Workflow state, sections, statuses, messages, checkpoints and thread ids,
//! evaluation criteria, engine events, configuration and error types.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod checkpoint;
pub mod config;
pub mod dependency;
pub mod error;
pub mod evaluation;
pub mod event;
pub mod feedback;
pub mod message;
pub mod status;
pub mod workflow;
