//! Failure handling: classification of step errors and the retry policy
//! applied to them.

pub mod classifier;
pub mod retry;

pub use classifier::{classify, classify_llm, classify_message};
pub use retry::{RetryPolicy, compute_backoff, should_retry};
