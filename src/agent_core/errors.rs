//! Agent Core error types.

use thiserror::Error;

use crate::inference::InferenceError;

/// Errors that can occur during agent core operations.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The model provider rejected or failed the request.
    #[error("LLM API error: {0}")]
    Provider(#[from] InferenceError),

    /// The request still exceeded the context window after emergency recovery.
    #[error("context window exceeded even after emergency pruning")]
    ContextOverflow,

    /// The model kept requesting tools past the per-turn cap.
    #[error("turn stopped after {rounds} tool rounds without a final answer")]
    ToolRoundLimit { rounds: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_error_wraps_inference_error() {
        let err: AgentError = InferenceError::HttpError {
            status: 401,
            body: "invalid x-api-key".into(),
        }
        .into();
        assert_eq!(err.to_string(), "LLM API error: HTTP 401: invalid x-api-key");
    }

    #[test]
    fn test_round_limit_message() {
        let err = AgentError::ToolRoundLimit { rounds: 10 };
        assert_eq!(
            err.to_string(),
            "turn stopped after 10 tool rounds without a final answer"
        );
    }
}
