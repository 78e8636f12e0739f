//! Retry policy and backoff calculation.
//!
//! `attempts_so_far` counts retries already performed for the current step,
//! so the first failure is evaluated with `attempts_so_far == 0`. Categories
//! that are "retried once" get exactly one retry under this convention, and
//! `max_attempts` bounds the number of retries after the initial call.

use std::time::Duration;

use draftline_types::config::RetryConfig;
use draftline_types::error::ErrorCategory;
use draftline_types::workflow::ErrorEvent;
use rand::Rng;

/// Default jitter fraction applied around each delay.
pub const DEFAULT_JITTER: f64 = 0.2;

/// Decide whether a failed step should run again.
pub fn should_retry(event: &ErrorEvent, attempts_so_far: u32, max_attempts: u32) -> bool {
    if attempts_so_far >= max_attempts || event.fatal {
        return false;
    }
    match event.category {
        ErrorCategory::LlmUnavailable | ErrorCategory::RateLimitExceeded => true,
        ErrorCategory::ContextWindowExceeded
        | ErrorCategory::ContextWindowManagementError
        | ErrorCategory::CheckpointError => false,
        ErrorCategory::TokenCalculationError
        | ErrorCategory::SummarizationError
        | ErrorCategory::ToolExecutionError
        | ErrorCategory::InvalidResponseFormat
        | ErrorCategory::Unknown => attempts_so_far < 1,
    }
}

/// `min(base * 2^attempt * (1 ± 0.2), max)` with uniform jitter.
pub fn compute_backoff(attempt: u32, base: Duration, max: Duration) -> Duration {
    compute_backoff_with_jitter(attempt, base, max, DEFAULT_JITTER, jitter_sample())
}

/// Deterministic backoff. `unit` in `[-1.0, 1.0]` selects the point in the jitter band.
pub fn compute_backoff_with_jitter(attempt: u32, base: Duration, max: Duration, jitter: f64, unit: f64) -> Duration {
    let exponential = base.as_secs_f64() * 2f64.powi(attempt.min(63) as i32);
    let factor = 1.0 + jitter.clamp(0.0, 1.0) * unit.clamp(-1.0, 1.0);
    let secs = (exponential * factor).min(max.as_secs_f64()).max(0.0);
    Duration::from_nanos((secs * 1e9).round() as u64).min(max)
}

fn jitter_sample() -> f64 {
    rand::thread_rng().gen_range(-1.0..=1.0)
}

/// `RetryConfig` bound to the functions above.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    pub fn should_retry(&self, event: &ErrorEvent, attempts_so_far: u32) -> bool {
        should_retry(event, attempts_so_far, self.config.max_attempts)
    }

    /// Delay before retry number `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        compute_backoff_with_jitter(
            attempt,
            Duration::from_millis(self.config.base_delay_ms),
            Duration::from_millis(self.config.max_delay_ms),
            self.config.jitter,
            jitter_sample(),
        )
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(category: ErrorCategory) -> ErrorEvent {
        ErrorEvent::new(category, "boom", "generateSection", 0, false)
    }

    #[test]
    fn test_transient_categories_retry_until_max() {
        for category in [ErrorCategory::LlmUnavailable, ErrorCategory::RateLimitExceeded] {
            assert!(should_retry(&event(category), 0, 3));
            assert!(should_retry(&event(category), 2, 3));
            assert!(!should_retry(&event(category), 3, 3));
        }
    }

    #[test]
    fn test_context_and_checkpoint_never_retry() {
        for category in [
            ErrorCategory::ContextWindowExceeded,
            ErrorCategory::ContextWindowManagementError,
            ErrorCategory::CheckpointError,
        ] {
            assert!(!should_retry(&event(category), 0, 3));
        }
    }

    #[test]
    fn test_retry_once_categories() {
        for category in [
            ErrorCategory::TokenCalculationError,
            ErrorCategory::SummarizationError,
            ErrorCategory::Unknown,
            ErrorCategory::ToolExecutionError,
            ErrorCategory::InvalidResponseFormat,
        ] {
            assert!(should_retry(&event(category), 0, 3), "{category}");
            assert!(!should_retry(&event(category), 1, 3), "{category}");
        }
    }

    #[test]
    fn test_fatal_never_retries() {
        let mut ev = event(ErrorCategory::LlmUnavailable);
        ev.fatal = true;
        assert!(!should_retry(&ev, 0, 3));
    }

    #[test]
    fn test_zero_max_attempts() {
        assert!(!should_retry(&event(ErrorCategory::RateLimitExceeded), 0, 0));
    }

    #[test]
    fn test_first_backoff_within_jitter_band() {
        let base = Duration::from_millis(1000);
        let max = Duration::from_millis(30_000);
        for _ in 0..200 {
            let d = compute_backoff(0, base, max);
            assert!(d >= Duration::from_millis(800), "{d:?}");
            assert!(d <= Duration::from_millis(1200), "{d:?}");
        }
    }

    #[test]
    fn test_backoff_band_edges() {
        let base = Duration::from_millis(1000);
        let max = Duration::from_millis(30_000);
        assert_eq!(
            compute_backoff_with_jitter(0, base, max, 0.2, -1.0),
            Duration::from_millis(800)
        );
        assert_eq!(
            compute_backoff_with_jitter(0, base, max, 0.2, 1.0),
            Duration::from_millis(1200)
        );
        assert_eq!(
            compute_backoff_with_jitter(2, base, max, 0.2, 0.0),
            Duration::from_millis(4000)
        );
    }

    #[test]
    fn test_backoff_never_exceeds_max() {
        let base = Duration::from_millis(1000);
        let max = Duration::from_millis(30_000);
        for attempt in 0..100 {
            assert!(compute_backoff(attempt, base, max) <= max);
        }
        assert_eq!(compute_backoff_with_jitter(10, base, max, 0.2, 1.0), max);
    }

    #[test]
    fn test_policy_uses_config() {
        let policy = RetryPolicy::new(RetryConfig {
            max_attempts: 1,
            base_delay_ms: 10,
            max_delay_ms: 15,
            jitter: 0.0,
        });
        assert_eq!(policy.delay_for(0), Duration::from_millis(10));
        assert_eq!(policy.delay_for(5), Duration::from_millis(15));
        assert!(policy.should_retry(&event(ErrorCategory::LlmUnavailable), 0));
        assert!(!policy.should_retry(&event(ErrorCategory::LlmUnavailable), 1));
    }
}
