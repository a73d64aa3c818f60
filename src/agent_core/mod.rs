//! Agent Core — conversation state and the per-turn tool loop.
//!
//! Submodules:
//! - `conversation`: History pruning, running summaries and overflow recovery
//! - `turn`: One user turn, including tool execution rounds
//! - `tokens`: Token estimation for request logging
//! - `errors`: Agent-level error types

pub mod conversation;
pub mod errors;
pub mod tokens;
pub mod turn;

// Re-exports for convenience
pub use conversation::{ConversationManager, ConversationState, ToolLogEntry};
pub use errors::AgentError;
pub use tokens::{HeuristicEstimator, TokenEstimator};
pub use turn::{TurnOutcome, TurnRunner};
