//! Memory tool convention.
//!
//! A server exposing tools named `store` (`{key, value}`) and `retrieve`
//! (`{key}`) acts as the persistence backend for conversation summaries.
//! Nothing here requires such a server to exist: callers treat every error
//! as "no memory available".

use super::errors::McpError;
use super::registry::ToolExecutor;

pub const STORE_TOOL: &str = "store";
pub const RETRIEVE_TOOL: &str = "retrieve";

/// Key of the running summary maintained by periodic summarization.
pub const CONVERSATION_SUMMARY_KEY: &str = "conversation_summary";

/// Key of the summary written during context-overflow recovery.
pub const EMERGENCY_SUMMARY_KEY: &str = "emergency_summary";

/// Persist `value` under `key`.
pub async fn store(tools: &dyn ToolExecutor, key: &str, value: &str) -> Result<(), McpError> {
    let result = tools
        .execute_tool(STORE_TOOL, serde_json::json!({ "key": key, "value": value }))
        .await?;

    if result.is_error {
        return Err(McpError::ServerError {
            code: super::types::error_codes::INTERNAL_ERROR,
            message: format!("memory store failed: {}", result.text()),
            data: None,
        });
    }
    Ok(())
}

/// Fetch the value stored under `key`.
///
/// The first text item of the result is the value. An error result or a
/// blank value reads as `None`.
pub async fn retrieve(tools: &dyn ToolExecutor, key: &str) -> Result<Option<String>, McpError> {
    let result = tools
        .execute_tool(RETRIEVE_TOOL, serde_json::json!({ "key": key }))
        .await?;

    if result.is_error {
        return Ok(None);
    }
    Ok(result
        .first_text()
        .filter(|text| !text.trim().is_empty())
        .map(str::to_string))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeTools;

    #[tokio::test]
    async fn test_store_then_retrieve() {
        let tools = FakeTools::with_memory();
        store(&tools, CONVERSATION_SUMMARY_KEY, "User is planning a trip to Lisbon.")
            .await
            .unwrap();

        let value = retrieve(&tools, CONVERSATION_SUMMARY_KEY).await.unwrap();
        assert_eq!(value.as_deref(), Some("User is planning a trip to Lisbon."));
        assert_eq!(retrieve(&tools, EMERGENCY_SUMMARY_KEY).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_missing_memory_tool_is_an_error() {
        let tools = FakeTools::without_memory();
        let err = retrieve(&tools, CONVERSATION_SUMMARY_KEY).await.unwrap_err();
        assert!(matches!(err, McpError::UnknownTool { .. }));
        assert!(store(&tools, CONVERSATION_SUMMARY_KEY, "x").await.is_err());
    }
}
