//! Inference error types.
//!
//! All errors implement `std::error::Error` via `thiserror`. Structured logging
//! is the caller's responsibility; these types carry the context needed to build
//! meaningful log entries.

use thiserror::Error;

/// Errors that can occur during inference operations.
#[derive(Debug, Error)]
pub enum InferenceError {
    /// TCP/HTTP connection to the model endpoint failed.
    #[error("connection failed to {endpoint}: {reason}")]
    ConnectionFailed {
        endpoint: String,
        reason: String,
    },

    /// The model endpoint did not respond within the configured timeout.
    #[error("inference timeout after {duration_secs}s")]
    Timeout {
        duration_secs: u64,
    },

    /// Non-2xx HTTP response from the model endpoint.
    #[error("HTTP {status}: {body}")]
    HttpError {
        status: u16,
        body: String,
    },

    /// The response body could not be parsed.
    #[error("response parse error: {reason}")]
    ResponseParse {
        reason: String,
    },

    /// Configuration loading or validation error.
    #[error("config error: {reason}")]
    ConfigError {
        reason: String,
    },
}

impl InferenceError {
    /// Check if the provider rejected the request for exceeding the context window.
    ///
    /// Anthropic answers with HTTP 400 and an `invalid_request_error` whose
    /// message says the prompt is too long.
    pub fn is_context_overflow(&self) -> bool {
        match self {
            InferenceError::HttpError { status: 400, body } => {
                let body = body.to_lowercase();
                body.contains("prompt is too long")
                    || body.contains("context window")
                    || body.contains("context length")
                    || body.contains("too many tokens")
            }
            _ => false,
        }
    }
}
