//! MCP Client error types.

use thiserror::Error;

/// Errors that can occur during MCP client operations.
#[derive(Debug, Error)]
pub enum McpError {
    /// A server process failed to start.
    #[error("failed to spawn server '{name}': {reason}")]
    SpawnFailed {
        name: String,
        reason: String,
    },

    /// The initialization handshake failed.
    #[error("server '{name}' initialization failed: {reason}")]
    InitFailed {
        name: String,
        reason: String,
    },

    /// JSON-RPC communication error (malformed message, I/O error).
    #[error("transport error for server '{server}': {reason}")]
    TransportError {
        server: String,
        reason: String,
    },

    /// Server returned a JSON-RPC error response.
    #[error("server error [{code}]: {message}")]
    ServerError {
        code: i32,
        message: String,
        data: Option<serde_json::Value>,
    },

    /// No connected server advertises the requested tool.
    #[error("Tool '{name}' not found in any server")]
    UnknownTool {
        name: String,
    },

    /// A single request to a server timed out.
    #[error("request '{method}' to server '{server}' timed out after {timeout_ms}ms")]
    Timeout {
        server: String,
        method: String,
        timeout_ms: u64,
    },

    /// The server was never connected, or has already been cleaned up.
    #[error("server '{name}' is not connected")]
    NotConnected {
        name: String,
    },

    /// Configuration error (missing command, bad servers file).
    #[error("config error: {reason}")]
    ConfigError {
        reason: String,
    },

    /// The blocking bridge could not deliver the call.
    #[error("bridge error: {reason}")]
    BridgeError {
        reason: String,
    },
}

impl From<crate::bridge::BridgeError> for McpError {
    fn from(e: crate::bridge::BridgeError) -> Self {
        McpError::BridgeError {
            reason: e.to_string(),
        }
    }
}
