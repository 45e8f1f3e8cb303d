//! Worker handle: one supervised worker as seen by the rest of the orchestrator
//!
//! The handle carries the worker's identity, its request channel (an MCP
//! client over the process pipes), the operations declared at handshake and
//! its current status. The process itself is owned by the lifecycle
//! manager's supervisor task.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use reppo_core::{ManifestEntry, OperationDescriptor, WorkerStatus};
use reppo_mcp::client::McpClient;
use reppo_mcp::protocol::{ClientInfo, ServerInfo};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Handle for an individual worker
pub struct WorkerHandle {
    identity: String,
    description: RwLock<Option<String>>,
    command_line: String,
    pid: Option<u32>,
    client: McpClient,
    operations: RwLock<Vec<OperationDescriptor>>,
    server_info: RwLock<Option<ServerInfo>>,
    status: RwLock<WorkerStatus>,
    started_at: DateTime<Utc>,
}

/// Worker information for external queries
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerInfo {
    pub identity: String,
    pub status: WorkerStatus,
    pub operation_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    pub command: String,
    pub started_at: DateTime<Utc>,
}

impl WorkerHandle {
    /// Create a handle in the `Starting` state
    pub fn new(entry: &ManifestEntry, pid: Option<u32>, client: McpClient) -> Self {
        Self {
            identity: entry.identity.clone(),
            description: RwLock::new(entry.description.clone()),
            command_line: entry.command_line(),
            pid,
            client,
            operations: RwLock::new(Vec::new()),
            server_info: RwLock::new(None),
            status: RwLock::new(WorkerStatus::Starting),
            started_at: Utc::now(),
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn command_line(&self) -> &str {
        &self.command_line
    }

    pub fn client(&self) -> &McpClient {
        &self.client
    }

    pub fn status(&self) -> WorkerStatus {
        *self.status.read()
    }

    pub fn description(&self) -> Option<String> {
        self.description.read().clone()
    }

    pub fn server_info(&self) -> Option<ServerInfo> {
        self.server_info.read().clone()
    }

    pub fn operations(&self) -> Vec<OperationDescriptor> {
        self.operations.read().clone()
    }

    pub fn operation_count(&self) -> usize {
        self.operations.read().len()
    }

    pub fn has_operation(&self, name: &str) -> bool {
        self.operations.read().iter().any(|op| op.name == name)
    }

    /// Move to `next`, rejecting illegal transitions
    pub fn set_status(&self, next: WorkerStatus) -> reppo_core::Result<WorkerStatus> {
        let mut status = self.status.write();
        let previous = *status;
        *status = previous.transition_to(next)?;
        debug!(identity = %self.identity, "Worker status {} -> {}", previous, next);
        Ok(previous)
    }

    /// Mark the worker degraded after a failed call
    pub fn mark_degraded(&self, reason: &str) {
        match self.set_status(WorkerStatus::Degraded) {
            Ok(_) => warn!(identity = %self.identity, "Worker degraded: {}", reason),
            Err(e) => debug!(identity = %self.identity, "Not degrading worker: {}", e),
        }
    }

    /// Mark the worker terminated; repeated calls are harmless
    pub fn mark_terminated(&self, reason: &str) {
        let mut status = self.status.write();
        if *status != WorkerStatus::Terminated {
            info!(identity = %self.identity, "Worker terminated ({}): was {}", reason, *status);
            *status = WorkerStatus::Terminated;
        }
    }

    /// Initialize the MCP session and record the declared operations
    ///
    /// Operations whose names could not be resolved once qualified are
    /// dropped with a warning. On success the worker becomes `Ready`.
    pub async fn handshake(
        &self,
        client_info: ClientInfo,
        request_timeout: Duration,
    ) -> reppo_mcp::Result<()> {
        let init = self.client.initialize(client_info, request_timeout).await?;
        let tools = self.client.list_tools(request_timeout).await?;

        let mut operations: Vec<OperationDescriptor> = Vec::with_capacity(tools.len());
        for tool in tools {
            let descriptor = tool.into_descriptor();
            match descriptor.validate() {
                Ok(()) if operations.iter().any(|op| op.name == descriptor.name) => {
                    warn!(
                        identity = %self.identity,
                        "Ignoring duplicate operation '{}'", descriptor.name
                    );
                }
                Ok(()) => operations.push(descriptor),
                Err(e) => warn!(identity = %self.identity, "Ignoring operation: {}", e),
            }
        }

        {
            let mut description = self.description.write();
            if description.is_none() {
                *description = init
                    .instructions
                    .clone()
                    .or_else(|| Some(init.server_info.name.clone()));
            }
        }
        *self.server_info.write() = Some(init.server_info);
        *self.operations.write() = operations;
        self.set_status(WorkerStatus::Ready)?;

        info!(
            identity = %self.identity,
            pid = ?self.pid,
            "Worker ready with {} operations",
            self.operation_count()
        );
        Ok(())
    }

    /// Snapshot for discovery output
    pub fn info(&self) -> WorkerInfo {
        WorkerInfo {
            identity: self.identity.clone(),
            status: self.status(),
            operation_count: self.operation_count(),
            description: self.description(),
            pid: self.pid,
            command: self.command_line.clone(),
            started_at: self.started_at,
        }
    }
}

impl std::fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("identity", &self.identity)
            .field("pid", &self.pid)
            .field("status", &self.status())
            .finish()
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::in_memory_handle;
    use super::*;
    use crate::demo::DemoProfile;

    #[tokio::test]
    async fn test_handshake_makes_worker_ready() {
        let handle = in_memory_handle("adder", DemoProfile::Adder).await;
        assert_eq!(handle.status(), WorkerStatus::Ready);
        assert!(handle.has_operation("add"));
        assert_eq!(handle.operation_count(), 1);
        assert_eq!(handle.server_info().unwrap().name, "reppo-worker-adder");
        assert!(handle.description().is_some());
    }

    #[tokio::test]
    async fn test_status_transitions() {
        let handle = in_memory_handle("sleeper", DemoProfile::Sleeper).await;

        handle.mark_degraded("timeout");
        assert_eq!(handle.status(), WorkerStatus::Degraded);

        handle.set_status(WorkerStatus::Ready).unwrap();
        handle.mark_terminated("test");
        handle.mark_terminated("test again");
        assert_eq!(handle.status(), WorkerStatus::Terminated);

        // terminated is final
        handle.mark_degraded("late failure");
        assert_eq!(handle.status(), WorkerStatus::Terminated);
        assert!(handle.set_status(WorkerStatus::Ready).is_err());
    }

    /// Worker declaring names that cannot be resolved once qualified
    struct SloppyWorker;

    #[async_trait::async_trait]
    impl reppo_mcp::server::ToolHandler for SloppyWorker {
        fn server_info(&self) -> ServerInfo {
            ServerInfo {
                name: "sloppy".to_string(),
                version: "0.0.0".to_string(),
            }
        }

        async fn list_tools(&self) -> Vec<reppo_mcp::protocol::Tool> {
            use reppo_mcp::protocol::Tool;
            let schema = serde_json::json!({"type": "object"});
            vec![
                Tool::new("", "unnamed", schema.clone()),
                Tool::new("a::b", "nested", schema.clone()),
                Tool::new("add", "first add", schema.clone()),
                Tool::new("add", "second add", schema.clone()),
                Tool::new("echo", "echo", schema),
            ]
        }

        async fn call_tool(
            &self,
            _name: &str,
            arguments: serde_json::Value,
        ) -> reppo_mcp::protocol::CallToolResult {
            reppo_mcp::protocol::CallToolResult::success(arguments)
        }
    }

    #[tokio::test]
    async fn test_handshake_drops_unresolvable_and_duplicate_operations() {
        use reppo_mcp::server::McpServer;
        use reppo_mcp::transport::TransportFactory;

        let (client_transport, server_transport) = TransportFactory::in_memory_pair();
        let server = McpServer::new(SloppyWorker);
        tokio::spawn(async move { server.serve(server_transport).await });

        let client = McpClient::connect(client_transport, "sloppy");
        let entry = ManifestEntry::new("sloppy", "in-memory", vec![]);
        let handle = WorkerHandle::new(&entry, None, client);
        handle
            .handshake(
                ClientInfo {
                    name: "test".to_string(),
                    version: "0.0.0".to_string(),
                },
                Duration::from_secs(5),
            )
            .await
            .unwrap();

        assert_eq!(handle.status(), WorkerStatus::Ready);
        assert_eq!(handle.operation_count(), 2);
        assert!(!handle.has_operation(""));
        assert!(!handle.has_operation("a::b"));
        let operations = handle.operations();
        assert_eq!(operations[0].name, "add");
        assert_eq!(operations[0].description, "first add");
        assert_eq!(operations[1].name, "echo");
    }

    #[tokio::test]
    async fn test_info_snapshot() {
        let handle = in_memory_handle("random", DemoProfile::Random).await;
        let info = handle.info();
        assert_eq!(info.identity, "random");
        assert_eq!(info.status, WorkerStatus::Ready);
        assert_eq!(info.operation_count, 1);
        assert_eq!(info.command, "in-memory");

        let value = serde_json::to_value(&info).unwrap();
        assert_eq!(value["status"], "Ready");
    }
}
