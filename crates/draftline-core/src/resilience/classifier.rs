//! Error classification.
//!
//! Maps any step failure onto an [`ErrorCategory`]. Typed errors are matched
//! structurally first; free-form messages fall through to pattern matching.
//! Total and deterministic: anything unrecognized is `Unknown`.

use draftline_types::error::{ErrorCategory, LlmError};

use crate::workflow::step::StepError;

/// Classify a step failure.
pub fn classify(error: &StepError) -> ErrorCategory {
    match error {
        StepError::Llm(llm) => classify_llm(llm),
        StepError::Tool { .. } => ErrorCategory::ToolExecutionError,
        StepError::InvalidResponse(_) => ErrorCategory::InvalidResponseFormat,
        StepError::Summarization(_) => ErrorCategory::SummarizationError,
        StepError::Context(_) => ErrorCategory::ContextWindowManagementError,
        StepError::State(_) => ErrorCategory::Unknown,
        StepError::Other(message) => classify_message(message),
    }
}

pub fn classify_llm(error: &LlmError) -> ErrorCategory {
    match error {
        LlmError::RateLimited { .. } => ErrorCategory::RateLimitExceeded,
        LlmError::Overloaded(_) | LlmError::Timeout(_) => ErrorCategory::LlmUnavailable,
        LlmError::ContextLengthExceeded { .. } => ErrorCategory::ContextWindowExceeded,
        LlmError::Deserialization(_) => ErrorCategory::InvalidResponseFormat,
        LlmError::TokenEstimation(_) => ErrorCategory::TokenCalculationError,
        LlmError::Provider { message } => classify_message(message),
        LlmError::InvalidRequest(message) => classify_message(message),
    }
}

/// Pattern-based classification of an error message. Case-insensitive.
pub fn classify_message(message: &str) -> ErrorCategory {
    let text = message.to_ascii_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| text.contains(n));

    if has_status_code(&text, 429) || has(&["rate limit", "rate_limit", "ratelimit", "too many requests"]) {
        ErrorCategory::RateLimitExceeded
    } else if has(&["context window management", "context management", "truncation failed"]) {
        ErrorCategory::ContextWindowManagementError
    } else if has(&[
        "maximum context length",
        "context length",
        "context window",
        "token limit",
        "too many tokens",
        "prompt is too long",
    ]) {
        ErrorCategory::ContextWindowExceeded
    } else if has(&["summariz", "summaris"]) {
        ErrorCategory::SummarizationError
    } else if has(&["tokeniz", "token count", "token calculation", "estimate tokens"]) {
        ErrorCategory::TokenCalculationError
    } else if has(&["checkpoint"]) {
        ErrorCategory::CheckpointError
    } else if has(&["tool"]) {
        ErrorCategory::ToolExecutionError
    } else if has(&[
        "parse",
        "json",
        "schema",
        "deserializ",
        "invalid response",
        "unexpected format",
        "malformed",
    ]) {
        ErrorCategory::InvalidResponseFormat
    } else if [500, 502, 503, 504].iter().any(|code| has_status_code(&text, *code))
        || has(&[
            "timed out",
            "timeout",
            "connection reset",
            "connection refused",
            "connection closed",
            "service unavailable",
            "bad gateway",
            "internal server error",
            "overloaded",
        ])
    {
        ErrorCategory::LlmUnavailable
    } else {
        ErrorCategory::Unknown
    }
}

/// `code` appears in `text` as a standalone number (not part of a longer one).
fn has_status_code(text: &str, code: u16) -> bool {
    let needle = code.to_string();
    let bytes = text.as_bytes();
    text.match_indices(&needle).any(|(start, _)| {
        let end = start + needle.len();
        let before_ok = start == 0 || !bytes[start - 1].is_ascii_digit();
        let after_ok = end == bytes.len() || !bytes[end].is_ascii_digit();
        before_ok && after_ok
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_patterns() {
        assert_eq!(classify_message("HTTP 429 Too Many Requests"), ErrorCategory::RateLimitExceeded);
        assert_eq!(classify_message("Rate limit reached for model"), ErrorCategory::RateLimitExceeded);
        assert_eq!(
            classify_llm(&LlmError::RateLimited { retry_after_ms: Some(10) }),
            ErrorCategory::RateLimitExceeded
        );
    }

    #[test]
    fn test_status_code_word_boundaries() {
        assert_eq!(classify_message("request 14290 failed"), ErrorCategory::Unknown);
        assert_eq!(classify_message("upstream returned 500"), ErrorCategory::LlmUnavailable);
        assert_eq!(classify_message("took 5000ms"), ErrorCategory::Unknown);
    }

    #[test]
    fn test_context_window_patterns() {
        assert_eq!(
            classify_message("This model's maximum context length is 8192 tokens"),
            ErrorCategory::ContextWindowExceeded
        );
        assert_eq!(classify_message("token limit exceeded"), ErrorCategory::ContextWindowExceeded);
        assert_eq!(
            classify_llm(&LlmError::ContextLengthExceeded { max: 10, requested: 20 }),
            ErrorCategory::ContextWindowExceeded
        );
    }

    #[test]
    fn test_unavailable_patterns() {
        assert_eq!(classify_message("operation timed out"), ErrorCategory::LlmUnavailable);
        assert_eq!(classify_message("Connection reset by peer"), ErrorCategory::LlmUnavailable);
        assert_eq!(classify_llm(&LlmError::Timeout(30_000)), ErrorCategory::LlmUnavailable);
        assert_eq!(
            classify_llm(&LlmError::Provider {
                message: "503 Service Unavailable".into()
            }),
            ErrorCategory::LlmUnavailable
        );
    }

    #[test]
    fn test_format_and_tool_patterns() {
        assert_eq!(classify_message("failed to parse JSON output"), ErrorCategory::InvalidResponseFormat);
        assert_eq!(classify_message("schema validation failed"), ErrorCategory::InvalidResponseFormat);
        assert_eq!(classify_message("tool 'search' crashed"), ErrorCategory::ToolExecutionError);
        assert_eq!(
            classify(&StepError::Tool {
                tool: "search".into(),
                message: "exit 1".into()
            }),
            ErrorCategory::ToolExecutionError
        );
        assert_eq!(
            classify(&StepError::InvalidResponse("no sections".into())),
            ErrorCategory::InvalidResponseFormat
        );
    }

    #[test]
    fn test_internal_categories() {
        assert_eq!(classify_message("checkpoint write failed"), ErrorCategory::CheckpointError);
        assert_eq!(classify_message("summarization call failed"), ErrorCategory::SummarizationError);
        assert_eq!(classify_message("tokenizer not found"), ErrorCategory::TokenCalculationError);
        assert_eq!(
            classify_message("context management: truncation failed"),
            ErrorCategory::ContextWindowManagementError
        );
        assert_eq!(
            classify_llm(&LlmError::TokenEstimation("bad model".into())),
            ErrorCategory::TokenCalculationError
        );
    }

    #[test]
    fn test_unknown_is_default() {
        assert_eq!(classify_message(""), ErrorCategory::Unknown);
        assert_eq!(classify_message("something odd happened"), ErrorCategory::Unknown);
        assert_eq!(classify(&StepError::Other("mystery".into())), ErrorCategory::Unknown);
    }

    #[test]
    fn test_deterministic() {
        let msg = "429 rate limit while parsing json";
        assert_eq!(classify_message(msg), classify_message(msg));
        assert_eq!(classify_message(msg), ErrorCategory::RateLimitExceeded);
    }
}
