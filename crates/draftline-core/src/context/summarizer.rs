//! Summarization of older history for the context budget manager.

use draftline_types::error::LlmError;
use draftline_types::message::Message;

use crate::llm::BoxLlmClient;

/// Prefix placed before the collaborator's summary text.
const SUMMARY_PREFIX: &str = "Summary of earlier conversation:";

/// Stateless helper that condenses the oldest slice of history into one message.
pub struct ContextSummarizer;

impl ContextSummarizer {
    /// Summarize `messages` into a single synthetic summary message.
    #[tracing::instrument(
        name = "summarize_context",
        skip(client, messages),
        fields(
            model = %model,
            message_count = messages.len(),
        )
    )]
    pub async fn summarize(client: &BoxLlmClient, model: &str, messages: &[Message]) -> Result<Message, LlmError> {
        let text = client.summarize(model, messages).await?;
        let text = text.trim();
        if text.is_empty() {
            return Err(LlmError::Deserialization("summarizer returned an empty summary".into()));
        }
        Ok(Message::summary(format!("{SUMMARY_PREFIX}\n{text}")))
    }

    /// Split chronological history into `(oldest, kept)`.
    ///
    /// `oldest` holds `floor(len * ratio)` messages; `ratio` is clamped to `0.0..=1.0`.
    pub fn split_for_summary(messages: &[Message], ratio: f64) -> (&[Message], &[Message]) {
        let ratio = ratio.clamp(0.0, 1.0);
        let split_point = ((messages.len() as f64) * ratio).floor() as usize;
        messages.split_at(split_point.min(messages.len()))
    }
}
