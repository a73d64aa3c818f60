//! Inference Client — Anthropic Messages API.
//!
//! This module handles all communication with the model provider:
//! - Message, content block and tool definition wire types
//! - A stateless request/response client behind the [`ChatProvider`] trait
//! - Provider settings and error classification (context overflow)

pub mod client;
pub mod config;
pub mod errors;
pub mod types;

// Re-exports for convenience
pub use client::{ChatProvider, LlmClient};
pub use config::LlmConfig;
pub use errors::InferenceError;
pub use types::{ChatResponse, ContentBlock, Message, MessageContent, Role, ToolDefinition, WireMessage};
