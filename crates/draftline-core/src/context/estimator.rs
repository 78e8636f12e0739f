//! Per-message token estimation with a content-addressed cache.

use dashmap::DashMap;
use draftline_types::config::ContextConfig;
use draftline_types::message::Message;
use sha2::{Digest, Sha256};

use crate::llm::BoxLlmClient;

/// Estimates token cost of messages, caching exact counts by (model, role, content).
///
/// When the client cannot count a message, a word-count heuristic is used
/// instead: `(words * tokens_per_word + overhead) * safety_multiplier`.
/// Heuristic results are not cached.
pub struct TokenEstimator {
    cache: DashMap<[u8; 32], u32>,
    tokens_per_word: f64,
    per_message_overhead: u32,
    safety_multiplier: f64,
}

impl TokenEstimator {
    pub fn new(config: &ContextConfig) -> Self {
        Self {
            cache: DashMap::new(),
            tokens_per_word: config.fallback_tokens_per_word,
            per_message_overhead: config.per_message_overhead,
            safety_multiplier: config.safety_multiplier,
        }
    }

    pub fn estimate_message(&self, client: &BoxLlmClient, model: &str, message: &Message) -> u32 {
        let key = cache_key(model, message);
        if let Some(hit) = self.cache.get(&key) {
            return *hit;
        }

        match client.estimate_tokens(model, &message.content) {
            Ok(tokens) => {
                let total = tokens.saturating_add(self.per_message_overhead);
                self.cache.insert(key, total);
                total
            }
            Err(e) => {
                tracing::warn!(model = %model, error = %e, "token estimation failed, using word-count heuristic");
                self.heuristic(&message.content)
            }
        }
    }

    /// Sum of per-message estimates.
    pub fn estimate_all(&self, client: &BoxLlmClient, model: &str, messages: &[Message]) -> u32 {
        messages
            .iter()
            .map(|m| self.estimate_message(client, model, m))
            .fold(0u32, u32::saturating_add)
    }

    pub fn heuristic(&self, text: &str) -> u32 {
        let words = text.split_whitespace().count() as f64;
        let raw = words * self.tokens_per_word + f64::from(self.per_message_overhead);
        (raw * self.safety_multiplier).ceil().min(f64::from(u32::MAX)) as u32
    }

    pub fn cached_entries(&self) -> usize {
        self.cache.len()
    }
}

fn cache_key(model: &str, message: &Message) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(model.as_bytes());
    hasher.update([0u8]);
    hasher.update(message.role.as_str().as_bytes());
    hasher.update([0u8]);
    hasher.update(message.content.as_bytes());
    hasher.finalize().into()
}
