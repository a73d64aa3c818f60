//! Tool server connections.
//!
//! A [`ToolServer`] is one logical MCP server: it lists its tools, executes
//! a single tool call, and tears itself down. [`StdioServer`] is the real
//! implementation (a child process speaking JSON-RPC over stdio); tests
//! substitute in-memory servers through the same trait.

use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::Mutex;

use super::errors::McpError;
use super::transport::{extract_result, StdioTransport};
use super::types::{
    InitializeResult, ListToolsResult, ServerConfig, ToolCallResult, ToolDescriptor,
    MCP_PROTOCOL_VERSION,
};

// ─── Constants ───────────────────────────────────────────────────────────────

/// Timeout for the initialize handshake.
const INIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for a single `tools/list` or `tools/call` request.
const CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for graceful shutdown before force-killing.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

// ─── Retry Policy ────────────────────────────────────────────────────────────

/// Fixed-delay retry policy for tool calls.
///
/// `attempts` is the total number of tries, not the number of extra tries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 2,
            delay: Duration::from_millis(1000),
        }
    }
}

// ─── ToolServer ──────────────────────────────────────────────────────────────

/// One connected tool server.
#[async_trait]
pub trait ToolServer: Send + Sync {
    /// Name of the server as configured in `mcpServers`.
    fn name(&self) -> &str;

    /// All tools the server currently advertises.
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, McpError>;

    /// Execute one tool call, once.
    async fn call_tool(
        &self,
        tool_name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolCallResult, McpError>;

    /// Release the connection. Calling it more than once is a no-op.
    async fn cleanup(&self) -> Result<(), McpError>;

    /// Execute a tool call, retrying any failure according to `policy`.
    ///
    /// The last failure is returned once every attempt has been used.
    async fn execute(
        &self,
        tool_name: &str,
        arguments: serde_json::Value,
        policy: RetryPolicy,
    ) -> Result<ToolCallResult, McpError> {
        let attempts = policy.attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.call_tool(tool_name, arguments.clone()).await {
                Ok(result) => return Ok(result),
                Err(e) if attempt >= attempts => {
                    tracing::error!(
                        server = %self.name(),
                        tool = %tool_name,
                        attempts,
                        error = %e,
                        "tool call failed, retries exhausted"
                    );
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!(
                        server = %self.name(),
                        tool = %tool_name,
                        attempt,
                        of = attempts,
                        error = %e,
                        "tool call failed, retrying"
                    );
                    tokio::time::sleep(policy.delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Creates connected [`ToolServer`]s from configuration entries.
#[async_trait]
pub trait ServerConnector: Send + Sync {
    async fn connect(
        &self,
        name: &str,
        config: &ServerConfig,
    ) -> Result<Arc<dyn ToolServer>, McpError>;
}

/// Connector that spawns each server as a child process.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdioConnector;

#[async_trait]
impl ServerConnector for StdioConnector {
    async fn connect(
        &self,
        name: &str,
        config: &ServerConfig,
    ) -> Result<Arc<dyn ToolServer>, McpError> {
        let server = StdioServer::connect(name, config).await?;
        Ok(Arc::new(server))
    }
}

// ─── StdioServer ─────────────────────────────────────────────────────────────

/// An MCP server running as a child process.
pub struct StdioServer {
    name: String,
    transport: StdioTransport,
    /// `None` once the server has been cleaned up.
    process: Mutex<Option<Child>>,
}

impl StdioServer {
    /// Spawn the server process and perform the MCP handshake.
    pub async fn connect(name: &str, config: &ServerConfig) -> Result<Self, McpError> {
        let program = resolve_command(&config.command, std::env::var_os("PATH"))
            .ok_or_else(|| McpError::ConfigError {
                reason: format!("command '{}' for server '{name}' not found", config.command),
            })?;

        let mut cmd = Command::new(&program);
        cmd.args(&config.args);
        // Layered on top of the inherited environment.
        cmd.envs(&config.env);
        cmd.stdin(std::process::Stdio::piped());
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());
        cmd.kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| McpError::SpawnFailed {
            name: name.to_string(),
            reason: format!("{e}"),
        })?;

        let stdin = child.stdin.take().ok_or(McpError::SpawnFailed {
            name: name.to_string(),
            reason: "failed to capture stdin".into(),
        })?;
        let stdout = child.stdout.take().ok_or(McpError::SpawnFailed {
            name: name.to_string(),
            reason: "failed to capture stdout".into(),
        })?;
        if let Some(stderr) = child.stderr.take() {
            forward_stderr(name, stderr);
        }

        let transport = StdioTransport::new(name, stdin, stdout);

        match tokio::time::timeout(INIT_TIMEOUT, handshake(&transport, name)).await {
            Ok(Ok(init)) => {
                tracing::info!(
                    server = %name,
                    command = %program.display(),
                    protocol = init.protocol_version.as_deref().unwrap_or("unknown"),
                    server_name = init
                        .server_info
                        .as_ref()
                        .and_then(|i| i.name.as_deref())
                        .unwrap_or("unknown"),
                    server_version = init
                        .server_info
                        .as_ref()
                        .and_then(|i| i.version.as_deref())
                        .unwrap_or("unknown"),
                    "tool server initialized"
                );
            }
            Ok(Err(e)) => {
                let _ = child.kill().await;
                return Err(McpError::InitFailed {
                    name: name.to_string(),
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                let _ = child.kill().await;
                return Err(McpError::InitFailed {
                    name: name.to_string(),
                    reason: format!("initialization timed out after {}s", INIT_TIMEOUT.as_secs()),
                });
            }
        }

        Ok(Self {
            name: name.to_string(),
            transport,
            process: Mutex::new(Some(child)),
        })
    }

    async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, McpError> {
        if self.process.lock().await.is_none() {
            return Err(McpError::NotConnected {
                name: self.name.clone(),
            });
        }

        let response = tokio::time::timeout(CALL_TIMEOUT, self.transport.request(method, params))
            .await
            .map_err(|_| McpError::Timeout {
                server: self.name.clone(),
                method: method.to_string(),
                timeout_ms: CALL_TIMEOUT.as_millis() as u64,
            })??;

        extract_result(response)
    }
}

#[async_trait]
impl ToolServer for StdioServer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, McpError> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let params = cursor
                .as_ref()
                .map(|c| serde_json::json!({ "cursor": c }));
            let result = self.request("tools/list", params).await?;
            let page: ListToolsResult =
                serde_json::from_value(result).map_err(|e| McpError::TransportError {
                    server: self.name.clone(),
                    reason: format!("invalid tools/list result: {e}"),
                })?;

            tools.extend(page.tools);
            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }

        Ok(tools)
    }

    async fn call_tool(
        &self,
        tool_name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolCallResult, McpError> {
        let params = serde_json::json!({
            "name": tool_name,
            "arguments": arguments,
        });
        let result = self.request("tools/call", Some(params)).await?;

        serde_json::from_value(result).map_err(|e| McpError::TransportError {
            server: self.name.clone(),
            reason: format!("invalid tools/call result: {e}"),
        })
    }

    async fn cleanup(&self) -> Result<(), McpError> {
        // Held for the whole teardown so overlapping calls serialize.
        let mut process = self.process.lock().await;
        let Some(mut child) = process.take() else {
            return Ok(());
        };

        // Closing stdin is the stdio transport's shutdown signal.
        self.transport.close().await;

        match tokio::time::timeout(SHUTDOWN_TIMEOUT, child.wait()).await {
            Ok(Ok(status)) => {
                tracing::info!(server = %self.name, %status, "tool server exited");
                Ok(())
            }
            _ => {
                tracing::warn!(server = %self.name, "tool server did not exit, killing");
                child.kill().await.map_err(|e| McpError::TransportError {
                    server: self.name.clone(),
                    reason: format!("failed to kill server process: {e}"),
                })
            }
        }
    }
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

/// Perform the MCP initialization handshake.
pub(crate) async fn handshake(
    transport: &StdioTransport,
    server_name: &str,
) -> Result<InitializeResult, McpError> {
    let params = serde_json::json!({
        "protocolVersion": MCP_PROTOCOL_VERSION,
        "capabilities": {},
        "clientInfo": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
        },
    });
    let response = transport.request("initialize", Some(params)).await?;
    let result = extract_result(response)?;

    let init: InitializeResult =
        serde_json::from_value(result).map_err(|e| McpError::InitFailed {
            name: server_name.to_string(),
            reason: format!("failed to parse initialize response: {e}"),
        })?;

    transport.notify("notifications/initialized", None).await?;
    Ok(init)
}

/// Resolve the program to spawn.
///
/// `npx` is looked up on `path` explicitly; every other command is passed
/// through unchanged and left to the OS.
pub(crate) fn resolve_command(command: &str, path: Option<OsString>) -> Option<PathBuf> {
    if command != "npx" {
        return Some(PathBuf::from(command));
    }
    let path = path?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(command))
        .find(|candidate| candidate.is_file())
}

/// Forward the server's stderr into the log, one line per event.
fn forward_stderr(server: &str, stderr: ChildStderr) {
    let server = server.to_string();
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            tracing::debug!(server = %server, stderr = %line, "tool server stderr");
        }
    });
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeServer;
    use tokio::io::{duplex, AsyncWriteExt};

    #[tokio::test(start_paused = true)]
    async fn test_execute_retries_then_succeeds() {
        let server = FakeServer::new("calc", &["add"]).failing_calls(1);
        let start = tokio::time::Instant::now();

        let result = server
            .execute("add", serde_json::json!({"a": 1}), RetryPolicy::default())
            .await
            .unwrap();

        assert_eq!(result.first_text(), Some("add ok"));
        assert_eq!(server.call_count(), 2);
        assert!(start.elapsed() >= Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_exhausts_after_exactly_two_attempts() {
        let server = FakeServer::new("calc", &["add"]).failing_calls(u32::MAX);
        let start = tokio::time::Instant::now();

        let err = server
            .execute("add", serde_json::json!({}), RetryPolicy::default())
            .await
            .unwrap_err();

        assert!(matches!(err, McpError::TransportError { .. }));
        assert_eq!(server.call_count(), 2);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(1000));
        assert!(elapsed < Duration::from_millis(2000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_single_attempt_has_no_delay() {
        let server = FakeServer::new("calc", &["add"]).failing_calls(u32::MAX);
        let start = tokio::time::Instant::now();
        let policy = RetryPolicy {
            attempts: 1,
            delay: Duration::from_secs(10),
        };

        assert!(server.execute("add", serde_json::json!({}), policy).await.is_err());
        assert_eq!(server.call_count(), 1);
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_handshake_sends_initialize_then_initialized() {
        let (client_out, server_in) = duplex(4096);
        let (mut server_out, client_in) = duplex(4096);
        let transport = StdioTransport::new("maps", client_out, client_in);

        let server = tokio::spawn(async move {
            let mut lines = BufReader::new(server_in).lines();
            let init = lines.next_line().await.unwrap().unwrap();
            let init: serde_json::Value = serde_json::from_str(&init).unwrap();
            assert_eq!(init["method"], "initialize");
            assert_eq!(init["params"]["protocolVersion"], MCP_PROTOCOL_VERSION);
            assert_eq!(init["params"]["clientInfo"]["name"], "toolchat");

            let reply = serde_json::json!({
                "jsonrpc": "2.0",
                "id": init["id"],
                "result": {
                    "protocolVersion": MCP_PROTOCOL_VERSION,
                    "capabilities": {"tools": {}},
                    "serverInfo": {"name": "maps-server", "version": "1.2.0"}
                }
            });
            server_out
                .write_all(format!("{reply}\n").as_bytes())
                .await
                .unwrap();

            let note = lines.next_line().await.unwrap().unwrap();
            let note: serde_json::Value = serde_json::from_str(&note).unwrap();
            assert_eq!(note["method"], "notifications/initialized");
            assert!(note.get("id").is_none());
        });

        let init = handshake(&transport, "maps").await.unwrap();
        assert_eq!(init.server_info.unwrap().name.as_deref(), Some("maps-server"));
        server.await.unwrap();
    }

    /// Minimal MCP server: two pages of tools, one text result per call.
    #[cfg(unix)]
    const SCRIPTED_SERVER: &str = r#"
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/^{"jsonrpc":"2.0","id":\([0-9]*\),.*/\1/p')
  case "$line" in
    *'"method":"initialize"'*)
      echo '{"jsonrpc":"2.0","id":'"$id"',"result":{"protocolVersion":"2024-11-05","capabilities":{}}}' ;;
    *'"cursor":"page-2"'*)
      echo '{"jsonrpc":"2.0","id":'"$id"',"result":{"tools":[{"name":"b","inputSchema":{}}]}}' ;;
    *'"method":"tools/list"'*)
      echo '{"jsonrpc":"2.0","id":'"$id"',"result":{"tools":[{"name":"a","inputSchema":{}}],"nextCursor":"page-2"}}' ;;
    *'"method":"tools/call"'*)
      echo '{"jsonrpc":"2.0","id":'"$id"',"result":{"content":[{"type":"text","text":"called b"}]}}' ;;
  esac
done
"#;

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stdio_server_pages_tools_and_cleans_up_once() {
        let config = ServerConfig {
            command: "sh".into(),
            args: vec!["-c".into(), SCRIPTED_SERVER.into()],
            ..Default::default()
        };
        let server = StdioServer::connect("scripted", &config).await.unwrap();

        let tools = server.list_tools().await.unwrap();
        let names: Vec<&str> = tools.iter().map(|t| t.name()).collect();
        assert_eq!(names, vec!["a", "b"]);

        let result = server.call_tool("b", serde_json::json!({})).await.unwrap();
        assert_eq!(result.first_text(), Some("called b"));

        let (first, second) = tokio::join!(server.cleanup(), server.cleanup());
        assert!(first.is_ok());
        assert!(second.is_ok());
        assert!(server.process.lock().await.is_none());

        let err = server
            .call_tool("b", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::NotConnected { ref name } if name == "scripted"));
    }

    #[test]
    fn test_resolve_command_passes_through_non_npx() {
        assert_eq!(
            resolve_command("python", None),
            Some(PathBuf::from("python"))
        );
    }

    #[test]
    fn test_resolve_command_finds_npx_on_path() {
        let empty = tempfile::tempdir().unwrap();
        let bin = tempfile::tempdir().unwrap();
        std::fs::write(bin.path().join("npx"), "#!/bin/sh\n").unwrap();

        let path = std::env::join_paths([empty.path(), bin.path()]).unwrap();
        assert_eq!(
            resolve_command("npx", Some(path)),
            Some(bin.path().join("npx"))
        );
    }

    #[test]
    fn test_resolve_command_missing_npx() {
        let empty = tempfile::tempdir().unwrap();
        let path = std::env::join_paths([empty.path()]).unwrap();
        assert_eq!(resolve_command("npx", Some(path)), None);
        assert_eq!(resolve_command("npx", None), None);
    }

    #[tokio::test]
    async fn test_connect_reports_spawn_failure() {
        let config = ServerConfig {
            command: "/nonexistent/toolchat-test-server".into(),
            ..Default::default()
        };
        let err = StdioConnector.connect("ghost", &config).await.err().unwrap();
        assert!(matches!(err, McpError::SpawnFailed { ref name, .. } if name == "ghost"));
    }
}
