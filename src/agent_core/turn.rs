//! One conversation turn: user text in, model replies out.
//!
//! The model is called repeatedly while it keeps requesting tools. Each
//! round's tool calls are executed through the registry and their results
//! appended as a single user message before the conversation manager counts
//! the round-trip and re-prunes.

use crate::inference::client::ChatProvider;
use crate::inference::types::{ChatResponse, ContentBlock, Message, ToolDefinition};
use crate::mcp_client::registry::ToolExecutor;
use crate::mcp_client::types::ToolCallResult;

use super::conversation::{ConversationManager, ConversationState};
use super::errors::AgentError;
use super::tokens::truncate_chars;

// ─── Constants ──────────────────────────────────────────────────────────────

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant. Use the available tools when appropriate. \
When you use a tool, the system will provide its output. \
Based on the tool output, provide a natural language response to the user.";

/// Maximum tool rounds in a single turn.
const MAX_TOOL_ROUNDS: usize = 10;

/// Tool results longer than this (in chars) are truncated.
const MAX_TOOL_RESULT_CHARS: usize = 10_000;

/// Chars kept from a truncated tool result.
const TRUNCATED_TOOL_RESULT_CHARS: usize = 1_000;

// ─── Tool Results ───────────────────────────────────────────────────────────

/// Cap an oversized tool result (base64 images and the like).
pub fn truncate_tool_result(text: String) -> String {
    let original_len = text.chars().count();
    if original_len <= MAX_TOOL_RESULT_CHARS {
        return text;
    }

    tracing::warn!(
        original_len,
        truncated_to = TRUNCATED_TOOL_RESULT_CHARS,
        "tool result truncated"
    );
    format!(
        "{}... [Content truncated, original length: {original_len}]",
        truncate_chars(&text, TRUNCATED_TOOL_RESULT_CHARS)
    )
}

/// Flattened, size-capped text of an MCP tool result.
pub fn tool_result_text(result: &ToolCallResult) -> String {
    truncate_tool_result(result.text())
}

// ─── TurnRunner ─────────────────────────────────────────────────────────────

/// What a finished turn produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TurnOutcome {
    /// Text the model said, in order.
    pub replies: Vec<String>,
    /// Number of tool calls executed.
    pub tool_calls: usize,
}

/// Drives turns against a provider and a tool executor.
pub struct TurnRunner<'a> {
    manager: ConversationManager,
    provider: &'a dyn ChatProvider,
    tools: &'a dyn ToolExecutor,
    tool_definitions: Vec<ToolDefinition>,
    system_prompt: String,
}

impl<'a> TurnRunner<'a> {
    pub fn new(
        manager: ConversationManager,
        provider: &'a dyn ChatProvider,
        tools: &'a dyn ToolExecutor,
        tool_definitions: Vec<ToolDefinition>,
    ) -> Self {
        Self {
            manager,
            provider,
            tools,
            tool_definitions,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }

    pub fn with_system_prompt(mut self, prompt: &str) -> Self {
        self.system_prompt = prompt.to_string();
        self
    }

    /// Run one user turn to completion.
    ///
    /// Provider failures abort the turn but leave `state` usable for the next.
    pub async fn run_turn(
        &self,
        state: &mut ConversationState,
        user_input: &str,
    ) -> Result<TurnOutcome, AgentError> {
        state.push(Message::user_text(user_input));
        self.manager.prune_state(state);

        let mut outcome = TurnOutcome::default();
        let mut rounds = 0;
        let mut response = self.request(state).await?;

        loop {
            let text = response.text();
            if !text.is_empty() {
                outcome.replies.push(text);
            }

            if !response.has_tool_use() {
                if !response.content.is_empty() {
                    state.push(Message::assistant_blocks(response.content));
                }
                return Ok(outcome);
            }

            if rounds >= MAX_TOOL_ROUNDS {
                tracing::warn!(
                    session_id = %state.session_id,
                    rounds,
                    "tool round limit reached, dropping pending tool calls"
                );
                let text_only: Vec<ContentBlock> = response
                    .content
                    .into_iter()
                    .filter(|block| matches!(block, ContentBlock::Text { .. }))
                    .collect();
                if !text_only.is_empty() {
                    state.push(Message::assistant_blocks(text_only));
                }
                return Err(AgentError::ToolRoundLimit { rounds });
            }
            rounds += 1;

            let results = self.execute_tool_calls(state, &response.content).await;
            outcome.tool_calls += results.len();
            state.push(Message::assistant_blocks(response.content));
            state.push(Message::user_blocks(results));

            self.manager
                .record_tool_round_trip(state, self.provider, Some(self.tools))
                .await;

            response = self.request(state).await?;
        }
    }

    /// Execute every tool_use block, in order. Failures become result text.
    async fn execute_tool_calls(
        &self,
        state: &mut ConversationState,
        content: &[ContentBlock],
    ) -> Vec<ContentBlock> {
        let mut results = Vec::new();

        for block in content {
            let ContentBlock::ToolUse { id, name, input } = block else {
                continue;
            };

            tracing::info!(tool = %name, arguments = %input, "executing tool");
            let text = match self.tools.execute_tool(name, input.clone()).await {
                Ok(result) => tool_result_text(&result),
                Err(e) => {
                    let message = format!("Error executing tool {name}: {e}");
                    tracing::error!(tool = %name, error = %e, "tool execution failed");
                    message
                }
            };

            state.log_tool_call(name, input, &text);
            results.push(ContentBlock::ToolResult {
                tool_use_id: id.clone(),
                content: text,
            });
        }

        results
    }

    /// Send the current history, recovering once from a context overflow.
    async fn request(&self, state: &mut ConversationState) -> Result<ChatResponse, AgentError> {
        let tools =
            (!self.tool_definitions.is_empty()).then_some(self.tool_definitions.as_slice());
        let wire = ConversationManager::clean_for_transport(&state.messages);

        match self
            .provider
            .get_response(&wire, tools, Some(&self.system_prompt))
            .await
        {
            Ok(response) => Ok(response),
            Err(e) if e.is_context_overflow() => {
                tracing::warn!(error = %e, "request exceeded the context window");
                self.manager
                    .emergency_recover(state, self.provider, Some(self.tools))
                    .await;
                if state.messages.is_empty() {
                    return Err(AgentError::ContextOverflow);
                }

                let wire = ConversationManager::clean_for_transport(&state.messages);
                match self
                    .provider
                    .get_response(&wire, tools, Some(&self.system_prompt))
                    .await
                {
                    Ok(response) => Ok(response),
                    Err(e) if e.is_context_overflow() => Err(AgentError::ContextOverflow),
                    Err(e) => Err(e.into()),
                }
            }
            Err(e) => Err(e.into()),
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
