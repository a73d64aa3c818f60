//! Shared types for the MCP client.
//!
//! JSON-RPC 2.0 message types, MCP protocol structures, and the
//! `mcpServers` configuration file format.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::inference::types::ToolDefinition;

// ─── JSON-RPC 2.0 ───────────────────────────────────────────────────────────

/// JSON-RPC 2.0 request message.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcRequest {
    /// Create a new JSON-RPC request.
    pub fn new(id: u64, method: &str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            method: method.to_string(),
            params,
        }
    }
}

/// JSON-RPC 2.0 notification (no `id`, no response).
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcNotification {
    pub fn new(method: &str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params,
        }
    }
}

/// JSON-RPC 2.0 response message (success or error).
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    #[allow(dead_code)]
    pub jsonrpc: String,
    pub id: u64,
    pub result: Option<serde_json::Value>,
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    pub data: Option<serde_json::Value>,
}

// ─── MCP Protocol Types ──────────────────────────────────────────────────────

/// Protocol revision announced in the `initialize` request.
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

/// A callable tool advertised by a server.
///
/// Immutable once built: fields are only reachable through accessors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default, rename = "inputSchema", alias = "input_schema")]
    input_schema: serde_json::Value,
}

impl ToolDescriptor {
    pub fn new(name: &str, description: &str, input_schema: serde_json::Value) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            input_schema,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn input_schema(&self) -> &serde_json::Value {
        &self.input_schema
    }

    /// Convert to the tool definition shape the LLM provider expects.
    pub fn to_wire(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: self.input_schema.clone(),
        }
    }

    /// Human-readable listing used by `--list-tools`.
    pub fn format_for_llm(&self) -> String {
        format!(
            "**{}**\nDescription: {}\nInput Schema: {}\n",
            self.name, self.description, self.input_schema
        )
    }
}

/// Result payload of `tools/list`.
#[derive(Debug, Clone, Deserialize)]
pub struct ListToolsResult {
    #[serde(default)]
    pub tools: Vec<ToolDescriptor>,
    #[serde(default, rename = "nextCursor")]
    pub next_cursor: Option<String>,
}

/// Result payload of `tools/call`.
///
/// `content` is kept as raw JSON items (`text`, `image`, `resource`, ...)
/// and flattened to text by [`ToolCallResult::text`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolCallResult {
    #[serde(default)]
    pub content: Vec<serde_json::Value>,
    #[serde(default, rename = "isError")]
    pub is_error: bool,
}

impl ToolCallResult {
    /// A result carrying a single text item.
    pub fn text_result(text: &str) -> Self {
        Self {
            content: vec![serde_json::json!({"type": "text", "text": text})],
            is_error: false,
        }
    }

    /// The first `text` item, if any.
    pub fn first_text(&self) -> Option<&str> {
        self.content.iter().find_map(|item| {
            match item.get("type").and_then(|t| t.as_str()) {
                Some("text") => item.get("text").and_then(|t| t.as_str()),
                _ => None,
            }
        })
    }

    /// Flatten every content item into one string.
    ///
    /// Text is kept verbatim, images and embedded resources become short
    /// placeholders, anything else is rendered as JSON. Items are joined
    /// with a single space.
    pub fn text(&self) -> String {
        let parts: Vec<String> = self
            .content
            .iter()
            .map(|item| match item.get("type").and_then(|t| t.as_str()) {
                Some("text") => item
                    .get("text")
                    .and_then(|t| t.as_str())
                    .unwrap_or_default()
                    .to_string(),
                Some("image") => "[Image content returned]".to_string(),
                Some("resource") => {
                    let uri = item
                        .get("resource")
                        .and_then(|r| r.get("uri"))
                        .and_then(|u| u.as_str())
                        .unwrap_or("unknown");
                    format!("[Resource: {uri}]")
                }
                _ => item.to_string(),
            })
            .collect();
        parts.join(" ")
    }
}

/// MCP initialize response payload.
#[derive(Debug, Clone, Deserialize)]
pub struct InitializeResult {
    #[serde(default, rename = "protocolVersion")]
    pub protocol_version: Option<String>,
    #[serde(default)]
    #[allow(dead_code)]
    pub capabilities: serde_json::Value,
    #[serde(default, rename = "serverInfo")]
    pub server_info: Option<ServerInfo>,
}

/// Server info returned in the initialize response.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerInfo {
    pub name: Option<String>,
    pub version: Option<String>,
}

// ─── Configuration ───────────────────────────────────────────────────────────

/// One entry of the `mcpServers` mapping.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Layered on top of the inherited process environment.
    #[serde(default)]
    pub env: HashMap<String, String>,
}

/// Top-level tool server configuration file.
///
/// Servers are kept in name order, which is also the order the registry
/// connects and resolves them in.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServersConfig {
    #[serde(default, rename = "mcpServers")]
    pub servers: BTreeMap<String, ServerConfig>,
}

/// Connected / failed flag per configured server.
pub type ServerStatus = BTreeMap<String, bool>;

// ─── Standard Error Codes ────────────────────────────────────────────────────

/// Well-known JSON-RPC error codes.
pub mod error_codes {
    /// The method does not exist or is not available.
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Internal JSON-RPC error.
    pub const INTERNAL_ERROR: i32 = -32603;
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_rpc_request_serialization() {
        let req = JsonRpcRequest::new(1, "tools/list", None);
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"jsonrpc\":\"2.0\""));
        assert!(json.contains("\"id\":1"));
        assert!(json.contains("\"method\":\"tools/list\""));
        // params should be omitted when None
        assert!(!json.contains("params"));
    }

    #[test]
    fn test_notification_has_no_id() {
        let note = JsonRpcNotification::new("notifications/initialized", None);
        let json = serde_json::to_string(&note).unwrap();
        assert!(!json.contains("\"id\""));
        assert!(!json.contains("params"));
    }

    #[test]
    fn test_json_rpc_error_response() {
        let json = r#"{
            "jsonrpc": "2.0",
            "id": 2,
            "result": null,
            "error": {"code": -32601, "message": "Method not found"}
        }"#;
        let resp: JsonRpcResponse = serde_json::from_str(json).unwrap();
        let err = resp.error.unwrap();
        assert_eq!(err.code, error_codes::METHOD_NOT_FOUND);
    }

    #[test]
    fn test_tool_descriptor_from_mcp_listing() {
        let json = r#"{
            "name": "calculate_tax",
            "description": "Compute sales tax",
            "inputSchema": {"type": "object", "required": ["amount"]}
        }"#;
        let tool: ToolDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(tool.name(), "calculate_tax");
        assert_eq!(tool.input_schema()["required"][0], "amount");

        let wire = serde_json::to_value(tool.to_wire()).unwrap();
        assert_eq!(wire["name"], "calculate_tax");
        assert_eq!(wire["input_schema"]["type"], "object");
        assert!(wire.get("inputSchema").is_none());
    }

    #[test]
    fn test_format_for_llm() {
        let tool = ToolDescriptor::new("store", "Persist a value", serde_json::json!({}));
        let text = tool.format_for_llm();
        assert!(text.starts_with("**store**\n"));
        assert!(text.contains("Description: Persist a value"));
    }

    #[test]
    fn test_servers_config_parsing() {
        let json = r#"{
            "mcpServers": {
                "tavily": {"command": "npx", "args": ["-y", "tavily-mcp"]},
                "calculator": {"command": "python", "args": ["calc.py"], "env": {"MODE": "fast"}}
            }
        }"#;
        let config: ServersConfig = serde_json::from_str(json).unwrap();
        let names: Vec<&String> = config.servers.keys().collect();
        assert_eq!(names, vec!["calculator", "tavily"]);
        assert_eq!(config.servers["calculator"].env["MODE"], "fast");
        assert!(config.servers["tavily"].env.is_empty());
    }

    #[test]
    fn test_tool_call_result_flattening() {
        let result: ToolCallResult = serde_json::from_value(serde_json::json!({
            "content": [
                {"type": "text", "text": "Total: 42"},
                {"type": "image", "data": "iVBORw0KGgo=", "mimeType": "image/png"},
                {"type": "resource", "resource": {"uri": "file:///tmp/report.csv"}},
                {"type": "audio", "data": "AAAA"}
            ]
        }))
        .unwrap();

        let text = result.text();
        assert!(text.starts_with("Total: 42 [Image content returned] [Resource: file:///tmp/report.csv] "));
        assert!(text.contains("\"audio\""));
        assert!(!result.is_error);
    }

    #[test]
    fn test_first_text_skips_non_text_items() {
        let result = ToolCallResult {
            content: vec![
                serde_json::json!({"type": "image", "data": ""}),
                serde_json::json!({"type": "text", "text": "remembered"}),
            ],
            is_error: false,
        };
        assert_eq!(result.first_text(), Some("remembered"));
        assert_eq!(ToolCallResult::default().first_text(), None);
    }
}
