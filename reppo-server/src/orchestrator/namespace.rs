//! Namespace resolver: the externally visible view of workers and operations

use super::error::DispatchError;
use super::registry::SessionRegistry;
use reppo_core::WorkerStatus;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

/// Worker summary for `list_servers`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerSummary {
    pub identity: String,
    pub description: String,
}

/// One discoverable operation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolEntry {
    pub qualified_name: String,
    pub description: String,
    pub input_schema: Value,
    /// False while the owning worker is degraded
    pub available: bool,
}

/// Builds qualified operation listings from the registry
#[derive(Clone)]
pub struct NamespaceResolver {
    registry: Arc<SessionRegistry>,
}

impl NamespaceResolver {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    /// Ready and degraded workers, in registration order
    pub fn list_servers(&self) -> Vec<ServerSummary> {
        self.registry
            .list()
            .iter()
            .filter(|h| h.status().is_discoverable())
            .map(|h| ServerSummary {
                identity: h.identity().to_string(),
                description: h.description().unwrap_or_default(),
            })
            .collect()
    }

    /// Qualified operations of one worker, or of every discoverable worker
    pub fn list_tools(&self, identity: Option<&str>) -> Result<Vec<ToolEntry>, DispatchError> {
        let handles = match identity {
            Some(identity) => {
                let handle = self
                    .registry
                    .get(identity)
                    .filter(|h| h.status().is_discoverable())
                    .ok_or_else(|| DispatchError::NotFound {
                        identity: identity.to_string(),
                    })?;
                vec![handle]
            }
            None => self
                .registry
                .list()
                .into_iter()
                .filter(|h| h.status().is_discoverable())
                .collect(),
        };

        Ok(handles
            .iter()
            .flat_map(|handle| {
                let available = handle.status() == WorkerStatus::Ready;
                handle
                    .operations()
                    .into_iter()
                    .map(move |op| ToolEntry {
                        qualified_name: op.qualified_name(handle.identity()),
                        description: op.description,
                        input_schema: op.input_schema,
                        available,
                    })
            })
            .collect())
    }
}
