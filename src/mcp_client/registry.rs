//! Tool registry — aggregates every configured tool server.
//!
//! Provides:
//! - Concurrent, per-server-isolated initialization from `mcpServers`
//! - Tool listing across connected servers (first server wins on duplicates)
//! - Tool name resolution and execution with the connection retry policy
//! - Best-effort teardown of every connection

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;

use super::connection::{RetryPolicy, ServerConnector, StdioConnector, ToolServer};
use super::errors::McpError;
use super::types::{ServerStatus, ServersConfig, ToolCallResult, ToolDescriptor};

// ─── ToolExecutor ────────────────────────────────────────────────────────────

/// Anything that can resolve a tool by name and run it.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute_tool(
        &self,
        tool_name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolCallResult, McpError>;
}

// ─── ServerRegistry ──────────────────────────────────────────────────────────

/// Owns every tool server connection.
///
/// Servers are kept in name order; that order decides which server wins
/// when two advertise the same tool name.
pub struct ServerRegistry {
    connector: Arc<dyn ServerConnector>,
    servers: BTreeMap<String, Arc<dyn ToolServer>>,
    status: ServerStatus,
    retry: RetryPolicy,
}

impl ServerRegistry {
    /// Registry that spawns servers as child processes.
    pub fn new() -> Self {
        Self::with_connector(Arc::new(StdioConnector))
    }

    pub fn with_connector(connector: Arc<dyn ServerConnector>) -> Self {
        Self {
            connector,
            servers: BTreeMap::new(),
            status: ServerStatus::new(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn set_retry_policy(&mut self, retry: RetryPolicy) {
        self.retry = retry;
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────

    /// Connect every configured server.
    ///
    /// Servers connect concurrently and independently: a failure is recorded
    /// as `false` in the returned status and never affects the others.
    pub async fn initialize_all(&mut self, config: &ServersConfig) -> ServerStatus {
        let connector = Arc::clone(&self.connector);
        let attempts = config.servers.iter().map(|(name, server_config)| {
            let connector = Arc::clone(&connector);
            async move { (name.clone(), connector.connect(name, server_config).await) }
        });

        for (name, outcome) in join_all(attempts).await {
            match outcome {
                Ok(server) => {
                    tracing::info!(server = %name, "tool server connected");
                    if let Some(previous) = self.servers.insert(name.clone(), server) {
                        if let Err(e) = previous.cleanup().await {
                            tracing::warn!(server = %name, error = %e, "tool server cleanup failed");
                        }
                    }
                    self.status.insert(name, true);
                }
                Err(e) => {
                    tracing::error!(server = %name, error = %e, "tool server failed to initialize");
                    if let Some(previous) = self.servers.remove(&name) {
                        if let Err(e) = previous.cleanup().await {
                            tracing::warn!(server = %name, error = %e, "tool server cleanup failed");
                        }
                    }
                    self.status.insert(name, false);
                }
            }
        }

        let connected = self.status.values().filter(|ok| **ok).count();
        tracing::info!(
            connected,
            configured = self.status.len(),
            "tool server initialization complete"
        );
        self.status.clone()
    }

    /// Tear down every connection, then forget them all.
    ///
    /// Individual failures are logged and do not stop the remaining teardowns.
    pub async fn cleanup_all(&mut self) {
        for (name, server) in &self.servers {
            if let Err(e) = server.cleanup().await {
                tracing::warn!(server = %name, error = %e, "tool server cleanup failed");
            }
        }
        self.servers.clear();
        self.status.clear();
    }

    // ─── Inspection ──────────────────────────────────────────────────────

    /// Connected / failed flag per configured server.
    pub fn status(&self) -> &ServerStatus {
        &self.status
    }

    /// Whether at least one server connected.
    pub fn any_connected(&self) -> bool {
        self.status.values().any(|ok| *ok)
    }

    /// Names of connected servers, in registry order.
    pub fn connected_servers(&self) -> Vec<&str> {
        self.connected().map(|(name, _)| name.as_str()).collect()
    }

    fn connected(&self) -> impl Iterator<Item = (&String, &Arc<dyn ToolServer>)> {
        self.servers
            .iter()
            .filter(|(name, _)| self.status.get(*name).copied().unwrap_or(false))
    }

    // ─── Tools ───────────────────────────────────────────────────────────

    /// Every tool advertised by a connected server.
    ///
    /// A server whose listing fails is skipped. A tool name already seen on
    /// an earlier server is dropped with a warning.
    pub async fn list_all_tools(&self) -> Vec<ToolDescriptor> {
        let mut seen = HashSet::new();
        let mut tools = Vec::new();

        for (name, server) in self.connected() {
            match server.list_tools().await {
                Ok(listed) => {
                    for tool in listed {
                        if seen.insert(tool.name().to_string()) {
                            tools.push(tool);
                        } else {
                            tracing::warn!(
                                server = %name,
                                tool = %tool.name(),
                                "duplicate tool name, keeping the earlier server's tool"
                            );
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(server = %name, error = %e, "failed to list tools");
                }
            }
        }

        tools
    }
}

impl Default for ServerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolExecutor for ServerRegistry {
    /// Find the first connected server advertising `tool_name` and run it there.
    ///
    /// Tool lists are fetched fresh on every call.
    async fn execute_tool(
        &self,
        tool_name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolCallResult, McpError> {
        for (name, server) in self.connected() {
            let tools = match server.list_tools().await {
                Ok(tools) => tools,
                Err(e) => {
                    tracing::warn!(server = %name, error = %e, "failed to list tools during lookup");
                    continue;
                }
            };

            if tools.iter().any(|t| t.name() == tool_name) {
                tracing::info!(server = %name, tool = %tool_name, "executing tool");
                return server.execute(tool_name, arguments, self.retry).await;
            }
        }

        Err(McpError::UnknownTool {
            name: tool_name.to_string(),
        })
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
