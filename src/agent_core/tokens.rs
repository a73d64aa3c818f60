//! Token estimation for request observability.
//!
//! Uses character-based heuristics calibrated for LLM tokenizers:
//! - English prose: ~3.2 chars/token (conservative, overestimates)
//! - JSON/structured content: ~2.8 chars/token (denser due to punctuation, short keys)
//!
//! Estimates are only logged. The estimator sits behind a trait so a real
//! tokenizer can replace the heuristic, and an estimator that cannot answer
//! returns `None`, which skips the log line and nothing else.

use crate::inference::types::{ContentBlock, MessageContent, ToolDefinition, WireMessage};

// ─── Constants ──────────────────────────────────────────────────────────────

/// Average characters per token for English prose.
const CHARS_PER_TOKEN: f64 = 3.2;

/// Average characters per token for JSON/structured content.
const JSON_CHARS_PER_TOKEN: f64 = 2.8;

/// Per-message overhead (role label, formatting tokens).
const MESSAGE_OVERHEAD_TOKENS: u32 = 4;

/// Overhead for a tool_use / tool_result block's JSON structure.
const TOOL_BLOCK_OVERHEAD_TOKENS: u32 = 10;

// ─── Char-Safe Truncation ───────────────────────────────────────────────────

/// The first `max_chars` characters of `s`.
///
/// Always cuts on a char boundary, so multi-byte text never panics.
pub(crate) fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((end, _)) => &s[..end],
        None => s,
    }
}

// ─── Estimator ──────────────────────────────────────────────────────────────

/// Turns text into an approximate token count.
pub trait TokenEstimator: Send + Sync {
    /// Tokens for natural language text.
    fn estimate_text(&self, text: &str) -> Option<u32>;

    /// Tokens for JSON or other structured text.
    fn estimate_json(&self, json: &str) -> Option<u32>;
}

/// The character-ratio heuristic.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeuristicEstimator;

impl TokenEstimator for HeuristicEstimator {
    fn estimate_text(&self, text: &str) -> Option<u32> {
        Some((text.len() as f64 / CHARS_PER_TOKEN).ceil() as u32)
    }

    fn estimate_json(&self, json: &str) -> Option<u32> {
        Some((json.len() as f64 / JSON_CHARS_PER_TOKEN).ceil() as u32)
    }
}

/// Per-part breakdown of an estimated request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenEstimate {
    pub system: u32,
    pub tools: u32,
    pub messages: u32,
}

impl TokenEstimate {
    pub fn total(&self) -> u32 {
        self.system + self.tools + self.messages
    }
}

/// Estimate a whole request: system prompt, tool schemas and messages,
/// each estimated on its own and summed.
///
/// `None` if the estimator could not answer for any part.
pub fn estimate_request(
    estimator: &dyn TokenEstimator,
    messages: &[WireMessage],
    tools: Option<&[ToolDefinition]>,
    system: Option<&str>,
) -> Option<TokenEstimate> {
    let system = match system {
        Some(prompt) => MESSAGE_OVERHEAD_TOKENS + estimator.estimate_text(prompt)?,
        None => 0,
    };

    let tools = match tools {
        Some(tools) if !tools.is_empty() => {
            let json = serde_json::to_string(tools).ok()?;
            estimator.estimate_json(&json)?
        }
        _ => 0,
    };

    let mut message_tokens = 0;
    for message in messages {
        message_tokens += estimate_message(estimator, message)?;
    }

    Some(TokenEstimate {
        system,
        tools,
        messages: message_tokens,
    })
}

/// Estimate a single message.
///
/// Text uses the prose ratio; tool inputs and tool results use the JSON ratio.
pub fn estimate_message(estimator: &dyn TokenEstimator, message: &WireMessage) -> Option<u32> {
    let mut total = MESSAGE_OVERHEAD_TOKENS;

    match &message.content {
        MessageContent::Text(text) => total += estimator.estimate_text(text)?,
        MessageContent::Blocks(blocks) => {
            for block in blocks {
                total += match block {
                    ContentBlock::Text { text } => estimator.estimate_text(text)?,
                    ContentBlock::ToolUse { name, input, .. } => {
                        TOOL_BLOCK_OVERHEAD_TOKENS
                            + estimator.estimate_text(name)?
                            + estimator.estimate_json(&input.to_string())?
                    }
                    ContentBlock::ToolResult { content, .. } => {
                        TOOL_BLOCK_OVERHEAD_TOKENS + estimator.estimate_json(content)?
                    }
                };
            }
        }
    }

    Some(total)
}

// ─── Tests ──────────────────────────────────────────────────────────────────
