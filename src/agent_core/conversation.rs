//! ConversationManager — conversation history with context window management.
//!
//! Responsibilities:
//! - Reduce history to the most recent messages without splitting a tool_use
//!   from its tool_result
//! - Carry dropped history forward as a running summary
//! - Summarize periodically and persist the summary through the memory tool
//! - Recover from a context-overflow rejection by hard truncation
//! - Strip messages to role and content for transport

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::inference::client::ChatProvider;
use crate::inference::types::{ContentBlock, Message, MessageContent, Role, WireMessage};
use crate::mcp_client::memory::{self, CONVERSATION_SUMMARY_KEY, EMERGENCY_SUMMARY_KEY};
use crate::mcp_client::registry::ToolExecutor;

use super::tokens::truncate_chars;

// ─── Constants ──────────────────────────────────────────────────────────────

/// Default number of most recent messages kept by pruning.
pub const DEFAULT_MAX_KEEP: usize = 10;

/// Summarize after every this many tool round-trips.
pub const SUMMARY_INTERVAL: u64 = 20;

/// Number of most recent messages fed to the summarizer.
const SUMMARY_WINDOW: usize = 10;

/// Messages kept by emergency recovery.
pub const EMERGENCY_KEEP: usize = 5;

const SUMMARY_SYSTEM_PROMPT: &str = "You are a helpful assistant that creates concise summaries.";

const CONTEXT_PREFIX: &str = "[Previous conversation context: ";

// ─── ConversationState ──────────────────────────────────────────────────────

/// One executed tool call, kept for display.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolLogEntry {
    pub tool: String,
    pub input: serde_json::Value,
    /// First 200 characters of the result text.
    pub result_preview: String,
    pub timestamp: DateTime<Utc>,
}

/// Everything one conversation owns. Passed explicitly; there is no global.
#[derive(Debug, Clone)]
pub struct ConversationState {
    pub session_id: String,
    /// Authoritative, append-only between prunes.
    pub messages: Vec<Message>,
    /// Replaces pruned history. Derived; clearing it never touches `messages`.
    pub conversation_summary: String,
    /// Tool round-trips so far; drives periodic summarization.
    pub message_count: u64,
    pub tool_log: Vec<ToolLogEntry>,
}

impl ConversationState {
    pub fn new() -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            messages: Vec::new(),
            conversation_summary: String::new(),
            message_count: 0,
            tool_log: Vec::new(),
        }
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn log_tool_call(&mut self, tool: &str, input: &serde_json::Value, result: &str) {
        self.tool_log.push(ToolLogEntry {
            tool: tool.to_string(),
            input: input.clone(),
            result_preview: truncate_chars(result, 200).to_string(),
            timestamp: Utc::now(),
        });
    }
}

impl Default for ConversationState {
    fn default() -> Self {
        Self::new()
    }
}

// ─── ConversationManager ────────────────────────────────────────────────────

/// Owns the pruning and summarization policy.
#[derive(Debug, Clone, Copy)]
pub struct ConversationManager {
    max_keep: usize,
}

impl ConversationManager {
    /// `max_keep` below 1 is raised to 1.
    pub fn new(max_keep: usize) -> Self {
        Self {
            max_keep: max_keep.max(1),
        }
    }

    pub fn max_keep(&self) -> usize {
        self.max_keep
    }

    /// Strip everything except role and content.
    pub fn clean_for_transport(messages: &[Message]) -> Vec<WireMessage> {
        messages.iter().map(Message::to_wire).collect()
    }

    /// Reduce `messages` to roughly the `max_keep` most recent, never
    /// separating a bound tool pair.
    ///
    /// 1. Cut at `len - max_keep`.
    /// 2. A cut that would drop a pair's assistant half while keeping its
    ///    user half moves back to the assistant message. So does a cut that
    ///    lands right after a pair when the next kept message is a user
    ///    message: that message continues the unanswered round-trip.
    /// 3. Leading assistant messages are dropped unless they open a pair.
    /// 4. A non-empty `summary` is prefixed to a plain-text first user
    ///    message (never to a tool_result carrier).
    /// 5. Messages with empty content are dropped.
    pub fn prune_with_summary(&self, messages: &[Message], summary: &str) -> Vec<Message> {
        if messages.len() <= self.max_keep {
            return messages.to_vec();
        }

        let pairs = bound_pairs(messages);
        let opens_pair = |idx: usize| pairs.iter().any(|&(a, _)| a == idx);

        let mut keep_from = messages.len() - self.max_keep;
        loop {
            let before = keep_from;
            for &(assistant_idx, user_idx) in &pairs {
                let splits_pair = assistant_idx < keep_from && keep_from <= user_idx;
                let unanswered = keep_from == user_idx + 1
                    && messages.get(keep_from).map(|m| m.role) == Some(Role::User);
                if splits_pair || unanswered {
                    keep_from = assistant_idx;
                }
            }
            if keep_from == before {
                break;
            }
        }

        let mut start = keep_from;
        while start < messages.len()
            && messages[start].role == Role::Assistant
            && !opens_pair(start)
        {
            start += 1;
        }

        let mut pruned: Vec<Message> = messages[start..].to_vec();

        if !summary.is_empty() {
            if let Some(first) = pruned.first_mut() {
                let prefixed = match &first.content {
                    MessageContent::Text(text)
                        if first.role == Role::User && !text.starts_with(CONTEXT_PREFIX) =>
                    {
                        Some(format!("{CONTEXT_PREFIX}{summary}]\n\n{text}"))
                    }
                    _ => None,
                };
                if let Some(text) = prefixed {
                    first.content = MessageContent::Text(text);
                }
            }
        }

        pruned.retain(|m| !m.content.is_empty());

        tracing::debug!(
            before = messages.len(),
            after = pruned.len(),
            max_keep = self.max_keep,
            "pruned conversation history"
        );
        pruned
    }

    /// Prune the state's history in place against its own summary.
    pub fn prune_state(&self, state: &mut ConversationState) {
        state.messages = self.prune_with_summary(&state.messages, &state.conversation_summary);
    }

    /// Ask the model for a 2-3 sentence digest of the last messages.
    ///
    /// Returns an empty string on any failure.
    pub async fn summarize(provider: &dyn ChatProvider, messages: &[Message]) -> String {
        let window = &messages[messages.len().saturating_sub(SUMMARY_WINDOW)..];
        let lines: Vec<String> = window
            .iter()
            .filter_map(|m| match &m.content {
                MessageContent::Text(text) => Some(format!("{}: {text}", m.role)),
                other => {
                    let text = other.flatten_text();
                    (!text.is_empty()).then(|| format!("{}: {text}", m.role))
                }
            })
            .collect();

        if lines.is_empty() {
            return String::new();
        }

        let prompt = format!(
            "Summarize the following conversation in 2-3 sentences, focusing on key information and context:\n\n{}\n\nSummary:",
            lines.join("\n")
        );
        let request = Self::clean_for_transport(&[Message::user_text(prompt)]);

        match provider
            .get_response(&request, None, Some(SUMMARY_SYSTEM_PROMPT))
            .await
        {
            Ok(response) => match response.content.first() {
                Some(ContentBlock::Text { text }) => text.clone(),
                _ => String::new(),
            },
            Err(e) => {
                tracing::warn!(error = %e, "failed to create summary");
                String::new()
            }
        }
    }

    /// Bookkeeping after tool results were appended: count the round-trip,
    /// summarize every [`SUMMARY_INTERVAL`] round-trips, then prune.
    pub async fn record_tool_round_trip(
        &self,
        state: &mut ConversationState,
        provider: &dyn ChatProvider,
        tools: Option<&dyn ToolExecutor>,
    ) {
        state.message_count += 1;

        if state.message_count % SUMMARY_INTERVAL == 0 {
            let summary = Self::summarize(provider, &state.messages).await;
            if !summary.is_empty() {
                tracing::info!(
                    session_id = %state.session_id,
                    round_trips = state.message_count,
                    "conversation summary updated"
                );
                state.conversation_summary = summary;
                if let Some(tools) = tools {
                    store_best_effort(tools, CONVERSATION_SUMMARY_KEY, &state.conversation_summary)
                        .await;
                }
            }
        }

        self.prune_state(state);
    }

    /// Last-resort recovery after the provider rejected the request as too long.
    ///
    /// Stores an emergency summary (best effort), keeps the last
    /// [`EMERGENCY_KEEP`] messages and drops leading messages until the first
    /// is a user message. Tool pairs are not protected here.
    pub async fn emergency_recover(
        &self,
        state: &mut ConversationState,
        provider: &dyn ChatProvider,
        tools: Option<&dyn ToolExecutor>,
    ) {
        tracing::info!(
            session_id = %state.session_id,
            messages = state.messages.len(),
            "attempting to recover from token limit error"
        );

        let summary = Self::summarize(provider, &state.messages).await;
        if !summary.is_empty() {
            if let Some(tools) = tools {
                store_best_effort(tools, EMERGENCY_SUMMARY_KEY, &summary).await;
            }
        }

        emergency_truncate(&mut state.messages);
    }

    /// A fresh conversation, seeded with the stored summary when the memory
    /// tool has one. Memory failures are logged and ignored.
    pub async fn initialize_conversation(tools: Option<&dyn ToolExecutor>) -> ConversationState {
        let mut state = ConversationState::new();

        let Some(tools) = tools else {
            return state;
        };

        match memory::retrieve(tools, CONVERSATION_SUMMARY_KEY).await {
            Ok(Some(previous)) => {
                tracing::info!(
                    session_id = %state.session_id,
                    preview = %truncate_chars(&previous, 100),
                    "retrieved previous context"
                );
                state.conversation_summary = previous;
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(error = %e, "failed to retrieve from memory");
            }
        }

        state
    }
}

impl Default for ConversationManager {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_KEEP)
    }
}

// ─── Helpers ────────────────────────────────────────────────────────────────

/// `(assistant_idx, user_idx)` for every bound pair.
///
/// The user message must directly follow the assistant message and carry a
/// tool_result for one of its tool_use ids.
fn bound_pairs(messages: &[Message]) -> Vec<(usize, usize)> {
    messages
        .windows(2)
        .enumerate()
        .filter_map(|(idx, window)| {
            let (assistant, user) = (&window[0], &window[1]);
            if assistant.role != Role::Assistant || user.role != Role::User {
                return None;
            }
            let uses = assistant.content.tool_use_ids();
            let answered = user
                .content
                .tool_result_ids()
                .iter()
                .any(|id| uses.contains(id));
            answered.then_some((idx, idx + 1))
        })
        .collect()
}

/// Keep the last [`EMERGENCY_KEEP`] messages, then drop until a user message leads.
fn emergency_truncate(messages: &mut Vec<Message>) {
    let cut = messages.len().saturating_sub(EMERGENCY_KEEP);
    messages.drain(..cut);
    let leading = messages
        .iter()
        .position(|m| m.role == Role::User)
        .unwrap_or(messages.len());
    messages.drain(..leading);
}

async fn store_best_effort(tools: &dyn ToolExecutor, key: &str, value: &str) {
    match memory::store(tools, key, value).await {
        Ok(()) => tracing::info!(key, "stored in memory"),
        Err(e) => tracing::warn!(key, error = %e, "failed to store in memory"),
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
