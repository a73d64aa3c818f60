//! MCP Client — JSON-RPC over stdio for tool server management.
//!
//! This module handles:
//! - Spawning MCP server child processes and the initialize handshake
//! - JSON-RPC 2.0 communication over process stdio
//! - Tool listing and name resolution across every connected server
//! - Tool execution with a fixed-delay retry policy
//! - The `store`/`retrieve` memory tool convention

pub mod connection;
pub mod errors;
pub mod memory;
pub mod registry;
pub mod transport;
pub mod types;

// Re-exports for convenience
pub use connection::{RetryPolicy, ServerConnector, StdioConnector, StdioServer, ToolServer};
pub use errors::McpError;
pub use registry::{ServerRegistry, ToolExecutor};
pub use types::{ServerConfig, ServerStatus, ServersConfig, ToolCallResult, ToolDescriptor};
