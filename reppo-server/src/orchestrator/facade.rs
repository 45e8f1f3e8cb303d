//! Orchestrator facade and its outward MCP tool surface

use super::dispatcher::CallDispatcher;
use super::error::DispatchError;
use super::handle::WorkerInfo;
use super::lifecycle::{LifecycleManager, LifecycleOptions};
use super::namespace::{NamespaceResolver, ServerSummary, ToolEntry};
use super::registry::SessionRegistry;
use crate::config::OrchestratorConfig;
use crate::Result;
use async_trait::async_trait;
use reppo_core::{Manifest, WorkerStatus};
use reppo_mcp::protocol::{CallToolResult, ServerInfo, Tool};
use reppo_mcp::server::ToolHandler;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument};

/// Single entry point over lifecycle, discovery and dispatch
pub struct Orchestrator {
    registry: Arc<SessionRegistry>,
    lifecycle: LifecycleManager,
    resolver: NamespaceResolver,
    dispatcher: CallDispatcher,
}

impl Orchestrator {
    pub fn new(config: &OrchestratorConfig) -> Self {
        Self::with_options(LifecycleOptions::from(config), config.call_timeout())
    }

    pub fn with_options(options: LifecycleOptions, call_timeout: Duration) -> Self {
        let registry = Arc::new(SessionRegistry::new());
        Self {
            lifecycle: LifecycleManager::new(registry.clone(), options),
            resolver: NamespaceResolver::new(registry.clone()),
            dispatcher: CallDispatcher::new(registry.clone(), call_timeout),
            registry,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Launch and register every worker in the manifest
    pub async fn start(&self, manifest: &Manifest) -> Result<()> {
        self.lifecycle.start(manifest).await
    }

    /// Stop every worker; safe to call more than once
    pub async fn stop(&self) {
        self.lifecycle.stop().await
    }

    /// Detailed view of every discoverable worker
    pub fn discover_servers(&self) -> Vec<WorkerInfo> {
        self.registry
            .list()
            .iter()
            .filter(|h| h.status().is_discoverable())
            .map(|h| h.info())
            .collect()
    }

    pub fn list_servers(&self) -> Vec<ServerSummary> {
        self.resolver.list_servers()
    }

    pub fn list_tools(&self, identity: Option<&str>) -> std::result::Result<Vec<ToolEntry>, DispatchError> {
        self.resolver.list_tools(identity)
    }

    /// Invoke a qualified operation; `timeout_ms` overrides the default call timeout
    #[instrument(skip(self, arguments))]
    pub async fn invoke_tool(
        &self,
        qualified_name: &str,
        arguments: Value,
        timeout_ms: Option<u64>,
    ) -> std::result::Result<Value, DispatchError> {
        self.dispatcher
            .invoke(
                qualified_name,
                arguments,
                timeout_ms.map(Duration::from_millis),
            )
            .await
    }

    /// Probe a degraded worker and return it to service if it answers
    pub async fn revive(&self, identity: &str) -> std::result::Result<WorkerStatus, DispatchError> {
        let handle = self
            .registry
            .get(identity)
            .ok_or_else(|| DispatchError::NotFound {
                identity: identity.to_string(),
            })?;

        match handle.status() {
            WorkerStatus::Ready => return Ok(WorkerStatus::Ready),
            WorkerStatus::Terminated => {
                return Err(DispatchError::WorkerUnavailable {
                    identity: identity.to_string(),
                    reason: "worker has terminated".to_string(),
                })
            }
            WorkerStatus::Starting | WorkerStatus::Degraded => {}
        }

        handle
            .client()
            .ping(self.dispatcher.default_timeout())
            .await
            .map_err(|e| DispatchError::Unavailable {
                identity: identity.to_string(),
                reason: format!("Ping failed: {}", e),
            })?;
        handle
            .set_status(WorkerStatus::Ready)
            .map_err(|e| DispatchError::Unavailable {
                identity: identity.to_string(),
                reason: e.to_string(),
            })?;

        info!(identity = %identity, "Worker revived");
        Ok(WorkerStatus::Ready)
    }
}

/// MCP tool surface of an [`Orchestrator`]
#[derive(Clone)]
pub struct OrchestratorTools {
    orchestrator: Arc<Orchestrator>,
}

impl OrchestratorTools {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }
}

fn dispatch_failure(error: DispatchError) -> CallToolResult {
    CallToolResult::structured_error(error.to_json())
}

#[async_trait]
impl ToolHandler for OrchestratorTools {
    fn server_info(&self) -> ServerInfo {
        ServerInfo {
            name: "reppo-orchestrator".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    fn instructions(&self) -> Option<String> {
        Some(
            "Use discover_servers to see connected workers, list_tools to see their \
             operations as <identity>::<operation>, and invoke_tool to call one."
                .to_string(),
        )
    }

    async fn list_tools(&self) -> Vec<Tool> {
        vec![
            Tool::new(
                "discover_servers",
                "List connected worker servers and their status",
                json!({"type": "object", "properties": {}}),
            ),
            Tool::new(
                "list_tools",
                "List qualified operations, optionally for one worker",
                json!({
                    "type": "object",
                    "properties": {
                        "identity": {"type": "string", "description": "Worker identity"}
                    }
                }),
            ),
            Tool::new(
                "invoke_tool",
                "Invoke a worker operation by qualified name",
                json!({
                    "type": "object",
                    "properties": {
                        "qualified_name": {"type": "string"},
                        "arguments": {"type": "object"},
                        "timeout_ms": {"type": "integer", "minimum": 1}
                    },
                    "required": ["qualified_name"]
                }),
            ),
            Tool::new(
                "revive_server",
                "Probe a degraded worker and return it to service",
                json!({
                    "type": "object",
                    "properties": {"identity": {"type": "string"}},
                    "required": ["identity"]
                }),
            ),
        ]
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> CallToolResult {
        match name {
            "discover_servers" => {
                CallToolResult::success(json!({ "servers": self.orchestrator.discover_servers() }))
            }
            "list_tools" => {
                let identity = arguments.get("identity").and_then(Value::as_str);
                match self.orchestrator.list_tools(identity) {
                    Ok(tools) => CallToolResult::success(json!({ "tools": tools })),
                    Err(e) => dispatch_failure(e),
                }
            }
            "invoke_tool" => {
                let Some(qualified_name) = arguments.get("qualified_name").and_then(Value::as_str)
                else {
                    return CallToolResult::error("'qualified_name' is required");
                };
                let call_arguments = arguments.get("arguments").cloned().unwrap_or(Value::Null);
                let timeout_ms = arguments
                    .get("timeout_ms")
                    .and_then(Value::as_u64)
                    .filter(|ms| *ms > 0);
                match self
                    .orchestrator
                    .invoke_tool(qualified_name, call_arguments, timeout_ms)
                    .await
                {
                    Ok(result) => CallToolResult::success(json!({ "result": result })),
                    Err(e) => dispatch_failure(e),
                }
            }
            "revive_server" => {
                let Some(identity) = arguments.get("identity").and_then(Value::as_str) else {
                    return CallToolResult::error("'identity' is required");
                };
                match self.orchestrator.revive(identity).await {
                    Ok(status) => {
                        CallToolResult::success(json!({ "identity": identity, "status": status }))
                    }
                    Err(e) => dispatch_failure(e),
                }
            }
            other => CallToolResult::error(format!("Unknown tool: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demo::DemoProfile;
    use crate::orchestrator::handle::test_support::in_memory_handle;

    async fn tools() -> OrchestratorTools {
        let orchestrator = Orchestrator::with_options(
            LifecycleOptions::default(),
            Duration::from_secs(5),
        );
        orchestrator
            .registry()
            .register(in_memory_handle("adder", DemoProfile::Adder).await)
            .unwrap();
        orchestrator
            .registry()
            .register(in_memory_handle("sleeper", DemoProfile::Sleeper).await)
            .unwrap();
        OrchestratorTools::new(Arc::new(orchestrator))
    }

    #[tokio::test]
    async fn test_discover_servers_tool() {
        let tools = tools().await;
        let result = tools.call_tool("discover_servers", json!({})).await;
        assert!(!result.is_error());
        let servers = &result.structured_content.unwrap()["servers"];
        assert_eq!(servers[0]["identity"], "adder");
        assert_eq!(servers[1]["identity"], "sleeper");
        assert_eq!(servers[1]["operation_count"], 4);
    }

    #[tokio::test]
    async fn test_invoke_tool_wraps_result() {
        let tools = tools().await;
        let result = tools
            .call_tool(
                "invoke_tool",
                json!({"qualified_name": "adder::add", "arguments": {"a": 4, "b": 5}}),
            )
            .await;
        assert!(!result.is_error());
        assert_eq!(result.structured_content.unwrap()["result"]["result"], 9);
    }

    #[tokio::test]
    async fn test_dispatch_errors_are_structured() {
        let tools = tools().await;
        let result = tools
            .call_tool("invoke_tool", json!({"qualified_name": "adder"}))
            .await;
        assert!(result.is_error());
        assert_eq!(result.structured_content.unwrap()["kind"], "invalid_name");

        let result = tools
            .call_tool("list_tools", json!({"identity": "ghost"}))
            .await;
        assert!(result.is_error());
        assert_eq!(result.structured_content.unwrap()["kind"], "not_found");

        let result = tools.call_tool("invoke_tool", json!({})).await;
        assert!(result.is_error());
    }

    #[tokio::test]
    async fn test_revive_degraded_worker() {
        let tools = tools().await;
        let orchestrator = tools.orchestrator().clone();
        let err = orchestrator
            .invoke_tool("sleeper::sleep", json!({"ms": 1000}), Some(50))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "timeout");

        let listed = orchestrator.list_tools(Some("sleeper")).unwrap();
        assert!(listed.iter().all(|t| !t.available));

        let result = tools
            .call_tool("revive_server", json!({"identity": "sleeper"}))
            .await;
        assert!(!result.is_error());
        assert_eq!(result.structured_content.unwrap()["status"], "Ready");
        assert!(orchestrator
            .invoke_tool("sleeper::echo", json!({"value": "back"}), None)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_unknown_facade_tool() {
        let tools = tools().await;
        assert!(tools.call_tool("nope", json!({})).await.is_error());
        assert_eq!(tools.list_tools().await.len(), 4);
    }
}
