//! LlmClient trait definition.
//!
//! The content-generation collaborator consumed by steps and the context
//! manager. Concrete clients live outside this crate.

use draftline_types::error::LlmError;
use draftline_types::message::Message;
use serde::{Deserialize, Serialize};

/// A generation call: a prompt plus the (already budgeted) conversation context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub model: String,
    pub prompt: String,
    pub messages: Vec<Message>,
}

pub trait LlmClient: Send + Sync {
    /// Produce content for `request`.
    fn generate(
        &self,
        request: &GenerateRequest,
    ) -> impl std::future::Future<Output = Result<String, LlmError>> + Send;

    /// Condense `messages` into a single summary text.
    fn summarize(
        &self,
        model: &str,
        messages: &[Message],
    ) -> impl std::future::Future<Output = Result<String, LlmError>> + Send;

    /// Exact token count of `text` for `model`, if the client can compute one.
    fn estimate_tokens(&self, model: &str, text: &str) -> Result<u32, LlmError>;
}
