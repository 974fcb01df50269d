//! Error types for the Anthropic Messages client.
//!
//! Every variant is a stage-level failure from the orchestrator's point of
//! view: a timeout is treated exactly like a transport error.

use thiserror::Error;

/// Errors that can occur while asking the model for one stage's output.
#[derive(Debug, Error)]
pub enum AnthropicError {
    /// The server returned HTTP 429.
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    /// Any other non-success HTTP status (401 bad key, 500, 529 overloaded...).
    #[error("API error (status {status}): {message}")]
    ApiError { status: u16, message: String },

    /// Underlying transport failure (DNS, refused connection, body decode).
    #[error("network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    /// The call did not finish inside the stage's time budget.
    #[error("request timed out after {budget_ms}ms")]
    Timeout { budget_ms: u64 },

    /// The response carried no text content blocks.
    #[error("model returned no text content")]
    EmptyResponse,
}

impl AnthropicError {
    /// Short machine-readable label used in logs and stage diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            AnthropicError::RateLimited { .. } => "rate_limited",
            AnthropicError::ApiError { .. } => "api_error",
            AnthropicError::NetworkError(_) => "network",
            AnthropicError::Timeout { .. } => "timeout",
            AnthropicError::EmptyResponse => "empty_response",
        }
    }
}
