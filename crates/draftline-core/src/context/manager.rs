//! Fits outgoing message lists into a model's context budget.
//!
//! The budget is `context_size - reserved_response_tokens`. Lists within budget
//! pass through untouched. Above the summarization threshold the oldest
//! fraction of non-system history is folded into one summary message. When
//! summarization fails, or the result is still too large, the list is
//! truncated: system messages are always kept, then the newest non-system
//! messages that fit. If nothing fits, a single "history unavailable" system
//! message is returned.

use std::sync::Arc;

use draftline_types::config::ContextConfig;
use draftline_types::event::{ContextStrategy, EngineEvent};
use draftline_types::message::Message;
use thiserror::Error;

use super::estimator::TokenEstimator;
use super::summarizer::ContextSummarizer;
use crate::event::EventBus;
use crate::llm::BoxLlmClient;

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("context window management failed: budget of {budget} tokens cannot hold {required} required tokens")]
    BudgetTooSmall { budget: u32, required: u32 },
}

/// Output of [`ContextBudgetManager::prepare_messages`].
#[derive(Debug, Clone)]
pub struct PreparedMessages {
    pub messages: Vec<Message>,
    pub strategy: ContextStrategy,
    pub original_tokens: u32,
    pub total_tokens: u32,
}

/// Token budgeting for LLM calls. Constructed once and shared by reference.
pub struct ContextBudgetManager {
    config: ContextConfig,
    estimator: TokenEstimator,
    llm: Arc<BoxLlmClient>,
    event_bus: EventBus,
}

impl ContextBudgetManager {
    pub fn new(config: ContextConfig, llm: Arc<BoxLlmClient>, event_bus: EventBus) -> Self {
        Self {
            estimator: TokenEstimator::new(&config),
            config,
            llm,
            event_bus,
        }
    }

    pub fn budget_for(&self, model: &str) -> u32 {
        self.config.budget_for(model)
    }

    pub fn estimate(&self, model: &str, messages: &[Message]) -> u32 {
        self.estimator.estimate_all(&self.llm, model, messages)
    }

    pub async fn prepare_messages(&self, messages: &[Message], model: &str) -> Result<PreparedMessages, ContextError> {
        let budget = self.config.budget_for(model);
        let threshold = self.config.summarization_threshold(model);
        let original_tokens = self.estimate(model, messages);

        if messages.is_empty() {
            return self.history_unavailable(model, budget, 0, Some("no history".into()));
        }

        if original_tokens <= budget {
            return Ok(PreparedMessages {
                messages: messages.to_vec(),
                strategy: ContextStrategy::Unchanged,
                original_tokens,
                total_tokens: original_tokens,
            });
        }

        let (candidate, reason) = if original_tokens > threshold {
            match self.summarize_oldest(messages, model).await {
                Ok(Some(summarized)) => {
                    let tokens = self.estimate(model, &summarized);
                    if tokens <= budget {
                        self.emit_fallback(model, ContextStrategy::Summarized, original_tokens, tokens, None);
                        return Ok(PreparedMessages {
                            messages: summarized,
                            strategy: ContextStrategy::Summarized,
                            original_tokens,
                            total_tokens: tokens,
                        });
                    }
                    (summarized, "summary still over budget".to_string())
                }
                Ok(None) => (messages.to_vec(), "nothing to summarize".to_string()),
                Err(e) => {
                    tracing::warn!(model = %model, error = %e, "summarization failed, truncating history");
                    (messages.to_vec(), format!("summarization failed: {e}"))
                }
            }
        } else {
            (messages.to_vec(), "over budget".to_string())
        };

        if let Some((kept, tokens)) = self.truncate(&candidate, model, budget) {
            tracing::warn!(
                model = %model,
                original_tokens,
                final_tokens = tokens,
                kept = kept.len(),
                dropped = candidate.len() - kept.len(),
                reason = %reason,
                "truncated message history to fit context budget"
            );
            self.emit_fallback(model, ContextStrategy::Truncated, original_tokens, tokens, Some(reason));
            return Ok(PreparedMessages {
                messages: kept,
                strategy: ContextStrategy::Truncated,
                original_tokens,
                total_tokens: tokens,
            });
        }

        self.history_unavailable(model, budget, original_tokens, Some(reason))
    }

    /// `[system..., summary, kept...]`, or `None` when there is nothing old enough to fold.
    async fn summarize_oldest(
        &self,
        messages: &[Message],
        model: &str,
    ) -> Result<Option<Vec<Message>>, draftline_types::error::LlmError> {
        let (system, history): (Vec<&Message>, Vec<&Message>) = messages.iter().partition(|m| m.is_system());
        let history: Vec<Message> = history.into_iter().cloned().collect();
        let (oldest, kept) = ContextSummarizer::split_for_summary(&history, self.config.summarize_ratio);
        if oldest.is_empty() {
            return Ok(None);
        }

        let summary = ContextSummarizer::summarize(&self.llm, model, oldest).await?;

        let mut result: Vec<Message> = system.into_iter().cloned().collect();
        result.push(summary);
        result.extend(kept.iter().cloned());
        Ok(Some(result))
    }

    /// Keep every system message, then the newest non-system messages that fit.
    /// Stops at the first message that does not fit. Chronological order is preserved.
    fn truncate(&self, messages: &[Message], model: &str, budget: u32) -> Option<(Vec<Message>, u32)> {
        let costs: Vec<u32> = messages
            .iter()
            .map(|m| self.estimator.estimate_message(&self.llm, model, m))
            .collect();

        let system_cost = messages
            .iter()
            .zip(&costs)
            .filter(|(m, _)| m.is_system())
            .fold(0u32, |acc, (_, c)| acc.saturating_add(*c));
        if system_cost > budget {
            return None;
        }

        let mut keep: Vec<bool> = messages.iter().map(Message::is_system).collect();
        let mut remaining = budget - system_cost;
        for (i, message) in messages.iter().enumerate().rev() {
            if message.is_system() {
                continue;
            }
            if costs[i] > remaining {
                break;
            }
            remaining -= costs[i];
            keep[i] = true;
        }

        let kept: Vec<Message> = messages
            .iter()
            .zip(&keep)
            .filter(|(_, k)| **k)
            .map(|(m, _)| m.clone())
            .collect();
        if kept.is_empty() {
            return None;
        }
        Some((kept, budget - remaining))
    }

    fn history_unavailable(
        &self,
        model: &str,
        budget: u32,
        original_tokens: u32,
        reason: Option<String>,
    ) -> Result<PreparedMessages, ContextError> {
        let placeholder = Message::history_unavailable();
        let tokens = self.estimator.estimate_message(&self.llm, model, &placeholder);
        if tokens > budget {
            return Err(ContextError::BudgetTooSmall {
                budget,
                required: tokens,
            });
        }
        self.emit_fallback(model, ContextStrategy::HistoryUnavailable, original_tokens, tokens, reason);
        Ok(PreparedMessages {
            messages: vec![placeholder],
            strategy: ContextStrategy::HistoryUnavailable,
            original_tokens,
            total_tokens: tokens,
        })
    }

    fn emit_fallback(
        &self,
        model: &str,
        strategy: ContextStrategy,
        original_tokens: u32,
        final_tokens: u32,
        reason: Option<String>,
    ) {
        self.event_bus.publish(EngineEvent::ContextFallback {
            model: model.to_string(),
            strategy,
            original_tokens,
            final_tokens,
            reason,
        });
    }
}
