//! In-memory fakes shared by unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::inference::client::ChatProvider;
use crate::inference::errors::InferenceError;
use crate::inference::types::{ChatResponse, ToolDefinition, WireMessage};
use crate::mcp_client::connection::{ServerConnector, ToolServer};
use crate::mcp_client::errors::McpError;
use crate::mcp_client::memory::{RETRIEVE_TOOL, STORE_TOOL};
use crate::mcp_client::registry::ToolExecutor;
use crate::mcp_client::types::{ServerConfig, ToolCallResult, ToolDescriptor};

// ─── FakeServer ─────────────────────────────────────────────────────────────

/// A tool server that answers every call with `"{tool} ok"`.
pub struct FakeServer {
    name: String,
    tools: Vec<String>,
    failures_left: AtomicU32,
    fail_listing: bool,
    fail_cleanup: bool,
    calls: Mutex<Vec<(String, serde_json::Value)>>,
    cleanups: AtomicU32,
}

impl FakeServer {
    pub fn new(name: &str, tools: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            tools: tools.iter().map(|t| t.to_string()).collect(),
            failures_left: AtomicU32::new(0),
            fail_listing: false,
            fail_cleanup: false,
            calls: Mutex::new(Vec::new()),
            cleanups: AtomicU32::new(0),
        }
    }

    /// The next `n` calls fail with a transport error.
    pub fn failing_calls(self, n: u32) -> Self {
        self.failures_left.store(n, Ordering::SeqCst);
        self
    }

    pub fn failing_listing(mut self) -> Self {
        self.fail_listing = true;
        self
    }

    pub fn failing_cleanup(mut self) -> Self {
        self.fail_cleanup = true;
        self
    }

    /// Calls received, failed ones included.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls(&self) -> Vec<(String, serde_json::Value)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn cleanup_count(&self) -> u32 {
        self.cleanups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ToolServer for FakeServer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, McpError> {
        if self.fail_listing {
            return Err(McpError::TransportError {
                server: self.name.clone(),
                reason: "listing failed".into(),
            });
        }
        Ok(self
            .tools
            .iter()
            .map(|t| {
                ToolDescriptor::new(t, &format!("{t} tool"), serde_json::json!({"type": "object"}))
            })
            .collect())
    }

    async fn call_tool(
        &self,
        tool_name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolCallResult, McpError> {
        self.calls
            .lock()
            .unwrap()
            .push((tool_name.to_string(), arguments));

        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(McpError::TransportError {
                server: self.name.clone(),
                reason: "broken pipe".into(),
            });
        }
        Ok(ToolCallResult::text_result(&format!("{tool_name} ok")))
    }

    async fn cleanup(&self) -> Result<(), McpError> {
        self.cleanups.fetch_add(1, Ordering::SeqCst);
        if self.fail_cleanup {
            return Err(McpError::TransportError {
                server: self.name.clone(),
                reason: "cleanup failed".into(),
            });
        }
        Ok(())
    }
}

// ─── FakeConnector ──────────────────────────────────────────────────────────

/// Hands out pre-built [`FakeServer`]s by name.
#[derive(Default)]
pub struct FakeConnector {
    servers: HashMap<String, Arc<FakeServer>>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_server(self, server: FakeServer) -> Self {
        self.with_shared(Arc::new(server))
    }

    /// Register a server the test keeps a handle to.
    pub fn with_shared(mut self, server: Arc<FakeServer>) -> Self {
        self.servers.insert(server.name.clone(), server);
        self
    }

    /// Connecting to `name` fails. Unregistered names fail the same way.
    pub fn with_failure(mut self, name: &str) -> Self {
        self.servers.remove(name);
        self
    }
}

#[async_trait]
impl ServerConnector for FakeConnector {
    async fn connect(
        &self,
        name: &str,
        _config: &ServerConfig,
    ) -> Result<Arc<dyn ToolServer>, McpError> {
        match self.servers.get(name) {
            Some(server) => Ok(Arc::clone(server) as Arc<dyn ToolServer>),
            None => Err(McpError::InitFailed {
                name: name.to_string(),
                reason: "connection refused".into(),
            }),
        }
    }
}

// ─── FakeProvider ───────────────────────────────────────────────────────────

/// A request as the provider saw it.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub messages: Vec<WireMessage>,
    pub tools: Option<Vec<ToolDefinition>>,
    pub system: Option<String>,
}

/// Replays scripted responses in order.
///
/// Once the script is exhausted the fallback is returned, or a parse error
/// when there is none.
pub struct FakeProvider {
    script: Mutex<VecDeque<Result<ChatResponse, InferenceError>>>,
    fallback: Option<ChatResponse>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl FakeProvider {
    pub fn new(script: Vec<Result<ChatResponse, InferenceError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_fallback(mut self, response: ChatResponse) -> Self {
        self.fallback = Some(response);
        self
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatProvider for FakeProvider {
    async fn get_response(
        &self,
        messages: &[WireMessage],
        tools: Option<&[ToolDefinition]>,
        system_prompt: Option<&str>,
    ) -> Result<ChatResponse, InferenceError> {
        self.requests.lock().unwrap().push(RecordedRequest {
            messages: messages.to_vec(),
            tools: tools.map(<[ToolDefinition]>::to_vec),
            system: system_prompt.map(str::to_string),
        });

        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(result) => result,
            None => self.fallback.clone().ok_or(InferenceError::ResponseParse {
                reason: "no scripted response left".into(),
            }),
        }
    }
}

// ─── FakeTools ──────────────────────────────────────────────────────────────

/// A [`ToolExecutor`] with canned results and an optional in-memory
/// `store`/`retrieve` pair.
#[derive(Default)]
pub struct FakeTools {
    memory: Option<Mutex<HashMap<String, String>>>,
    results: HashMap<String, ToolCallResult>,
    calls: Mutex<Vec<(String, serde_json::Value)>>,
}

impl FakeTools {
    pub fn with_memory() -> Self {
        Self {
            memory: Some(Mutex::new(HashMap::new())),
            ..Self::default()
        }
    }

    pub fn without_memory() -> Self {
        Self::default()
    }

    pub fn with_result(mut self, tool: &str, result: ToolCallResult) -> Self {
        self.results.insert(tool.to_string(), result);
        self
    }

    pub fn stored(&self, key: &str) -> Option<String> {
        self.memory.as_ref()?.lock().unwrap().get(key).cloned()
    }

    /// Non-memory calls received.
    pub fn calls(&self) -> Vec<(String, serde_json::Value)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ToolExecutor for FakeTools {
    async fn execute_tool(
        &self,
        tool_name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolCallResult, McpError> {
        if let Some(memory) = &self.memory {
            let key = arguments["key"].as_str().unwrap_or_default().to_string();
            match tool_name {
                STORE_TOOL => {
                    let value = arguments["value"].as_str().unwrap_or_default().to_string();
                    memory.lock().unwrap().insert(key, value);
                    return Ok(ToolCallResult::text_result("stored"));
                }
                RETRIEVE_TOOL => {
                    let value = memory.lock().unwrap().get(&key).cloned().unwrap_or_default();
                    return Ok(ToolCallResult::text_result(&value));
                }
                _ => {}
            }
        }

        self.calls
            .lock()
            .unwrap()
            .push((tool_name.to_string(), arguments));
        self.results
            .get(tool_name)
            .cloned()
            .ok_or_else(|| McpError::UnknownTool {
                name: tool_name.to_string(),
            })
    }
}
