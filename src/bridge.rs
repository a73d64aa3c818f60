//! Blocking bridge — run async operations from synchronous callers.
//!
//! A dedicated worker thread owns a current-thread tokio runtime. Each
//! bridged call is spawned onto that runtime while the caller blocks on a
//! channel with a timeout. A timed-out call fails for the caller only; the
//! worker keeps running. The worker is started on first use, recreated if it
//! is found dead before a call, and stopped explicitly by
//! [`Bridge::shutdown`].

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::mcp_client::errors::McpError;
use crate::mcp_client::registry::{ServerRegistry, ToolExecutor};
use crate::mcp_client::types::{ServerStatus, ServersConfig, ToolCallResult, ToolDescriptor};

// ─── Constants ──────────────────────────────────────────────────────────────

/// Default wait for a bridged call.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Wait for server initialization, which includes process startup.
pub const INITIALIZE_TIMEOUT: Duration = Duration::from_secs(60);

/// Bounded wait for the worker thread to exit on shutdown.
const SHUTDOWN_WAIT: Duration = Duration::from_secs(5);

const SHUTDOWN_POLL: Duration = Duration::from_millis(10);

const WORKER_THREAD_NAME: &str = "toolchat-bridge";

// ─── Errors ─────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum BridgeError {
    /// The call did not finish in time. It may still complete on the worker.
    #[error("bridged call timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// No worker could be started, or the bridge was shut down.
    #[error("bridge worker unavailable: {reason}")]
    WorkerUnavailable { reason: String },

    /// The worker dropped the call before it produced a result.
    #[error("bridge worker stopped before the call completed")]
    WorkerDied,
}

// ─── Worker ─────────────────────────────────────────────────────────────────

type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

enum Command {
    Run(Job),
    Stop,
}

struct Worker {
    tx: tokio::sync::mpsc::UnboundedSender<Command>,
    handle: JoinHandle<()>,
}

impl Worker {
    fn spawn() -> Result<Self, BridgeError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| BridgeError::WorkerUnavailable {
                reason: format!("failed to build runtime: {e}"),
            })?;
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<Command>();

        let handle = std::thread::Builder::new()
            .name(WORKER_THREAD_NAME.into())
            .spawn(move || {
                runtime.block_on(async move {
                    while let Some(command) = rx.recv().await {
                        match command {
                            Command::Run(job) => {
                                tokio::spawn(job);
                            }
                            Command::Stop => break,
                        }
                    }
                });
                tracing::debug!("bridge worker stopped");
            })
            .map_err(|e| BridgeError::WorkerUnavailable {
                reason: format!("failed to spawn worker thread: {e}"),
            })?;

        tracing::debug!("bridge worker started");
        Ok(Self { tx, handle })
    }

    fn is_alive(&self) -> bool {
        !self.handle.is_finished()
    }
}

// ─── Bridge ─────────────────────────────────────────────────────────────────

/// Synchronous entry point onto a background async runtime.
///
/// Must not be called from inside an async context: the caller's thread
/// blocks until the result arrives or the timeout expires.
pub struct Bridge {
    worker: Mutex<Option<Worker>>,
    closed: AtomicBool,
    timeout: Duration,
}

impl Bridge {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_CALL_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            worker: Mutex::new(None),
            closed: AtomicBool::new(false),
            timeout,
        }
    }

    /// Run `future` on the worker with the default timeout.
    ///
    /// Runtime resources such as timers bind when they are created, so
    /// build them inside an `async` block rather than on the calling thread.
    pub fn run<F, T>(&self, future: F) -> Result<T, BridgeError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        self.run_with_timeout(future, self.timeout)
    }

    pub fn run_with_timeout<F, T>(&self, future: F, timeout: Duration) -> Result<T, BridgeError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (result_tx, result_rx) = std::sync::mpsc::sync_channel(1);
        self.submit(Box::pin(async move {
            let _ = result_tx.send(future.await);
        }))?;

        match result_rx.recv_timeout(timeout) {
            Ok(value) => Ok(value),
            Err(RecvTimeoutError::Timeout) => {
                let timeout_ms = timeout.as_millis() as u64;
                tracing::warn!(timeout_ms, "bridged call timed out");
                Err(BridgeError::Timeout { timeout_ms })
            }
            Err(RecvTimeoutError::Disconnected) => Err(BridgeError::WorkerDied),
        }
    }

    fn submit(&self, job: Job) -> Result<(), BridgeError> {
        let mut guard = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        if self.closed.load(Ordering::SeqCst) {
            return Err(BridgeError::WorkerUnavailable {
                reason: "bridge has been shut down".into(),
            });
        }

        if let Some(worker) = guard.as_ref().filter(|w| w.is_alive()) {
            return worker
                .tx
                .send(Command::Run(job))
                .map_err(|_| BridgeError::WorkerDied);
        }

        if guard.is_some() {
            tracing::warn!("bridge worker died, recreating");
        }
        let worker = Worker::spawn()?;
        let sent = worker.tx.send(Command::Run(job));
        *guard = Some(worker);
        sent.map_err(|_| BridgeError::WorkerDied)
    }

    /// Stop the worker, waiting a bounded time for it to exit.
    ///
    /// Later calls fail with [`BridgeError::WorkerUnavailable`]. Calling this
    /// again is a no-op.
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(worker) = worker else {
            return;
        };

        let _ = worker.tx.send(Command::Stop);
        let deadline = Instant::now() + SHUTDOWN_WAIT;
        while worker.is_alive() && Instant::now() < deadline {
            std::thread::sleep(SHUTDOWN_POLL);
        }

        if worker.is_alive() {
            tracing::warn!(
                wait_secs = SHUTDOWN_WAIT.as_secs(),
                "bridge worker did not stop in time, detaching"
            );
        } else if worker.handle.join().is_err() {
            tracing::warn!("bridge worker panicked");
        }
    }
}

impl Default for Bridge {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        let worker = self
            .worker
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            let _ = worker.tx.send(Command::Stop);
        }
    }
}

// ─── BlockingRegistry ───────────────────────────────────────────────────────

/// Synchronous facade over a [`ServerRegistry`].
pub struct BlockingRegistry {
    registry: Arc<tokio::sync::Mutex<ServerRegistry>>,
    bridge: Bridge,
}

impl BlockingRegistry {
    pub fn new(registry: ServerRegistry) -> Self {
        Self::with_bridge(registry, Bridge::new())
    }

    pub fn with_bridge(registry: ServerRegistry, bridge: Bridge) -> Self {
        Self {
            registry: Arc::new(tokio::sync::Mutex::new(registry)),
            bridge,
        }
    }

    pub fn initialize_all(&self, config: &ServersConfig) -> Result<ServerStatus, BridgeError> {
        let registry = Arc::clone(&self.registry);
        let config = config.clone();
        self.bridge.run_with_timeout(
            async move { registry.lock().await.initialize_all(&config).await },
            INITIALIZE_TIMEOUT,
        )
    }

    pub fn list_all_tools(&self) -> Result<Vec<ToolDescriptor>, BridgeError> {
        let registry = Arc::clone(&self.registry);
        self.bridge
            .run(async move { registry.lock().await.list_all_tools().await })
    }

    pub fn execute_tool(
        &self,
        tool_name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolCallResult, McpError> {
        let registry = Arc::clone(&self.registry);
        let tool_name = tool_name.to_string();
        self.bridge.run(async move {
            registry
                .lock()
                .await
                .execute_tool(&tool_name, arguments)
                .await
        })?
    }

    pub fn cleanup_all(&self) -> Result<(), BridgeError> {
        let registry = Arc::clone(&self.registry);
        self.bridge
            .run(async move { registry.lock().await.cleanup_all().await })
    }

    /// Clean up every server, then stop the worker.
    pub fn shutdown(&self) {
        if let Err(e) = self.cleanup_all() {
            tracing::warn!(error = %e, "cleanup during shutdown failed");
        }
        self.bridge.shutdown();
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp_client::types::ServerConfig;
    use crate::test_support::{FakeConnector, FakeServer};

    #[test]
    fn test_run_returns_value() {
        let bridge = Bridge::new();
        let value = bridge.run(async { 40 + 2 }).unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn test_timeout_keeps_worker_running() {
        let bridge = Bridge::with_timeout(Duration::from_millis(50));

        let err = bridge
            .run(async { tokio::time::sleep(Duration::from_secs(10)).await })
            .unwrap_err();
        assert!(matches!(err, BridgeError::Timeout { timeout_ms: 50 }));

        assert_eq!(bridge.run(async { "still alive" }).unwrap(), "still alive");
    }

    #[test]
    fn test_panicking_call_reports_worker_died() {
        let bridge = Bridge::new();
        let err = bridge
            .run(async {
                panic!("boom");
            })
            .unwrap_err();
        assert!(matches!(err, BridgeError::WorkerDied));

        assert_eq!(bridge.run(async { 1 }).unwrap(), 1);
    }

    #[test]
    fn test_dead_worker_is_recreated() {
        let bridge = Bridge::new();
        bridge.run(async {}).unwrap();

        {
            let guard = bridge.worker.lock().unwrap();
            let worker = guard.as_ref().unwrap();
            worker.tx.send(Command::Stop).unwrap();
            let deadline = Instant::now() + Duration::from_secs(5);
            while worker.is_alive() && Instant::now() < deadline {
                std::thread::sleep(SHUTDOWN_POLL);
            }
            assert!(!worker.is_alive());
        }

        assert_eq!(bridge.run(async { "recreated" }).unwrap(), "recreated");
    }

    #[test]
    fn test_shutdown_is_final_and_idempotent() {
        let bridge = Bridge::new();
        bridge.run(async {}).unwrap();

        bridge.shutdown();
        bridge.shutdown();

        let err = bridge.run(async {}).unwrap_err();
        assert!(matches!(err, BridgeError::WorkerUnavailable { .. }));
    }

    #[test]
    fn test_blocking_registry_round_trip() {
        let connector = FakeConnector::new()
            .with_server(FakeServer::new("calc", &["add", "multiply"]))
            .with_failure("broken");
        let registry = BlockingRegistry::new(ServerRegistry::with_connector(Arc::new(connector)));

        let config = ServersConfig {
            servers: ["calc", "broken"]
                .into_iter()
                .map(|n| (n.to_string(), ServerConfig::default()))
                .collect(),
        };
        let status = registry.initialize_all(&config).unwrap();
        assert_eq!(status.get("calc"), Some(&true));
        assert_eq!(status.get("broken"), Some(&false));

        let tools = registry.list_all_tools().unwrap();
        assert_eq!(tools.len(), 2);

        let result = registry
            .execute_tool("multiply", serde_json::json!({"a": 6, "b": 7}))
            .unwrap();
        assert_eq!(result.first_text(), Some("multiply ok"));

        let err = registry
            .execute_tool("divide", serde_json::json!({}))
            .unwrap_err();
        assert!(matches!(err, McpError::UnknownTool { .. }));

        registry.shutdown();
        assert!(matches!(
            registry.execute_tool("add", serde_json::json!({})),
            Err(McpError::BridgeError { .. })
        ));
    }
}
