use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Taxonomy every step failure is mapped onto before retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    LlmUnavailable,
    RateLimitExceeded,
    ContextWindowExceeded,
    ToolExecutionError,
    InvalidResponseFormat,
    CheckpointError,
    SummarizationError,
    ContextWindowManagementError,
    TokenCalculationError,
    Unknown,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::LlmUnavailable => "LLM_UNAVAILABLE",
            ErrorCategory::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            ErrorCategory::ContextWindowExceeded => "CONTEXT_WINDOW_EXCEEDED",
            ErrorCategory::ToolExecutionError => "TOOL_EXECUTION_ERROR",
            ErrorCategory::InvalidResponseFormat => "INVALID_RESPONSE_FORMAT",
            ErrorCategory::CheckpointError => "CHECKPOINT_ERROR",
            ErrorCategory::SummarizationError => "SUMMARIZATION_ERROR",
            ErrorCategory::ContextWindowManagementError => "CONTEXT_WINDOW_MANAGEMENT_ERROR",
            ErrorCategory::TokenCalculationError => "TOKEN_CALCULATION_ERROR",
            ErrorCategory::Unknown => "UNKNOWN",
        }
    }

    /// Text shown to a person when an error of this category is surfaced.
    pub fn user_message(&self) -> &'static str {
        match self {
            ErrorCategory::LlmUnavailable => {
                "The language model service is unavailable. Try again in a few minutes."
            }
            ErrorCategory::RateLimitExceeded => {
                "The language model rate limit was reached. Wait a moment and retry."
            }
            ErrorCategory::ContextWindowExceeded => {
                "The input is too large for the model, even after trimming the conversation."
            }
            ErrorCategory::ToolExecutionError => "A tool used by this step failed to run.",
            ErrorCategory::InvalidResponseFormat => {
                "The model returned a response in an unexpected format."
            }
            ErrorCategory::CheckpointError => "Progress could not be saved. No changes were committed.",
            ErrorCategory::SummarizationError => "The conversation history could not be summarized.",
            ErrorCategory::ContextWindowManagementError => {
                "The conversation history could not be fitted into the model's context."
            }
            ErrorCategory::TokenCalculationError => "Token usage could not be calculated.",
            ErrorCategory::Unknown => "An unexpected error occurred.",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from repository operations (used by port traits in draftline-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error: {0}")]
    Connection(String),

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl RepositoryError {
    /// Connection-level failures that may succeed on retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, RepositoryError::Connection(_))
    }
}

/// Errors surfaced by the LLM collaborator.
#[derive(Debug, Clone, Error)]
pub enum LlmError {
    #[error("provider error: {message}")]
    Provider { message: String },

    #[error("deserialization error: {0}")]
    Deserialization(String),

    #[error("rate limited (retry after {retry_after_ms:?}ms)")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("provider overloaded: {0}")]
    Overloaded(String),

    #[error("request timed out after {0}ms")]
    Timeout(u64),

    #[error("context length exceeded: max {max}, requested {requested}")]
    ContextLengthExceeded { max: u32, requested: u32 },

    #[error("token estimation failed: {0}")]
    TokenEstimation(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_serde_matches_display() {
        let json = serde_json::to_string(&ErrorCategory::RateLimitExceeded).unwrap();
        assert_eq!(json, "\"RATE_LIMIT_EXCEEDED\"");
        assert_eq!(ErrorCategory::RateLimitExceeded.to_string(), "RATE_LIMIT_EXCEEDED");

        let parsed: ErrorCategory = serde_json::from_str("\"CONTEXT_WINDOW_MANAGEMENT_ERROR\"").unwrap();
        assert_eq!(parsed, ErrorCategory::ContextWindowManagementError);
    }

    #[test]
    fn test_user_messages_are_distinct() {
        assert_ne!(
            ErrorCategory::ToolExecutionError.user_message(),
            ErrorCategory::InvalidResponseFormat.user_message()
        );
    }

    #[test]
    fn test_repository_error_transient() {
        assert!(RepositoryError::Connection("busy".into()).is_transient());
        assert!(!RepositoryError::Query("syntax error".into()).is_transient());
        assert_eq!(
            RepositoryError::Query("syntax error".to_string()).to_string(),
            "query error: syntax error"
        );
    }

    #[test]
    fn test_llm_error_display() {
        let err = LlmError::ContextLengthExceeded {
            max: 100_000,
            requested: 120_000,
        };
        assert!(err.to_string().contains("100000"));
        assert!(err.to_string().contains("120000"));
    }
}
