//! Engine configuration for Draftline.
//!
//! `EngineConfig` is the top-level `config.toml`. Every field has a default so
//! an empty or partial file is valid. A snapshot of it is stored with each
//! checkpoint.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::dependency::DependencyMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Retry policy for LLM-facing step failures.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Retry policy for transient checkpoint storage failures.
    ///
    /// Fields omitted from a partial `[checkpoint_retry]` table take the
    /// `[retry]` defaults.
    #[serde(default = "RetryConfig::storage")]
    pub checkpoint_retry: RetryConfig,

    #[serde(default)]
    pub context: ContextConfig,

    /// Timeout applied to each external call made by a step.
    #[serde(default = "default_step_timeout_secs")]
    pub step_timeout_secs: u64,

    /// Upper bound on steps executed by a single run before it is failed.
    #[serde(default = "default_max_steps_per_run")]
    pub max_steps_per_run: u32,

    #[serde(default)]
    pub dependencies: DependencyMap,

    /// Directory of YAML evaluation criteria. Defaults to `{data_dir}/criteria`.
    #[serde(default)]
    pub criteria_dir: Option<PathBuf>,
}

fn default_step_timeout_secs() -> u64 {
    300
}

fn default_max_steps_per_run() -> u32 {
    64
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            checkpoint_retry: RetryConfig::storage(),
            context: ContextConfig::default(),
            step_timeout_secs: default_step_timeout_secs(),
            max_steps_per_run: default_max_steps_per_run(),
            dependencies: DependencyMap::default(),
            criteria_dir: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Relative jitter; `0.2` spreads each delay over `±20%`.
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            jitter: 0.2,
        }
    }
}

impl RetryConfig {
    /// Shorter schedule used for checkpoint storage.
    pub fn storage() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 2_000,
            jitter: 0.2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Context size used for models missing from `model_context_sizes`.
    pub default_context_size: u32,
    pub model_context_sizes: BTreeMap<String, u32>,
    /// Tokens held back for the model's response.
    pub reserved_response_tokens: u32,
    /// Summarization kicks in above `budget * summarization_threshold_factor`.
    pub summarization_threshold_factor: f64,
    /// Fraction of non-system history (oldest first) folded into a summary.
    pub summarize_ratio: f64,
    pub fallback_tokens_per_word: f64,
    pub per_message_overhead: u32,
    pub safety_multiplier: f64,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            default_context_size: 128_000,
            model_context_sizes: BTreeMap::new(),
            reserved_response_tokens: 4_096,
            summarization_threshold_factor: 1.5,
            summarize_ratio: 0.5,
            fallback_tokens_per_word: 4.0,
            per_message_overhead: 4,
            safety_multiplier: 1.2,
        }
    }
}

impl ContextConfig {
    pub fn context_size(&self, model: &str) -> u32 {
        self.model_context_sizes
            .get(model)
            .copied()
            .unwrap_or(self.default_context_size)
    }

    /// Token budget for outgoing messages to `model`.
    pub fn budget_for(&self, model: &str) -> u32 {
        self.context_size(model).saturating_sub(self.reserved_response_tokens)
    }

    pub fn summarization_threshold(&self, model: &str) -> u32 {
        let threshold = f64::from(self.budget_for(model)) * self.summarization_threshold_factor.max(1.0);
        threshold.min(f64::from(u32::MAX)) as u32
    }
}
