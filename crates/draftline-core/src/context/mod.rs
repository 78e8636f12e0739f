//! Context budget management for LLM calls.
//!
//! - `TokenEstimator`: cached per-message token counts with a heuristic fallback
//! - `ContextSummarizer`: folds old history into one summary message
//! - `ContextBudgetManager`: unchanged / summarize / truncate decision

pub mod estimator;
pub mod manager;
pub mod summarizer;

pub use estimator::TokenEstimator;
pub use manager::{ContextBudgetManager, ContextError, PreparedMessages};
pub use summarizer::ContextSummarizer;
