//! Call dispatcher: routes a qualified tool call to the owning worker

use super::error::DispatchError;
use super::handle::WorkerHandle;
use super::registry::SessionRegistry;
use reppo_core::{split_qualified, WorkerStatus};
use reppo_mcp::protocol::CallToolResult;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Routes calls by qualified name
///
/// Dispatch holds no lock across the worker round trip, so calls to
/// different workers, and to the same worker, proceed concurrently.
#[derive(Clone)]
pub struct CallDispatcher {
    registry: Arc<SessionRegistry>,
    default_timeout: Duration,
}

impl CallDispatcher {
    pub fn new(registry: Arc<SessionRegistry>, default_timeout: Duration) -> Self {
        Self {
            registry,
            default_timeout,
        }
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Invoke `<identity>::<operation>` with `arguments`
    ///
    /// On success the worker's structured result is returned, or the raw
    /// `tools/call` result when the worker sent no structured content.
    pub async fn invoke(
        &self,
        qualified_name: &str,
        arguments: Value,
        timeout: Option<Duration>,
    ) -> Result<Value, DispatchError> {
        let (identity, operation) =
            split_qualified(qualified_name).map_err(|e| DispatchError::InvalidName {
                name: qualified_name.to_string(),
                reason: e.to_string(),
            })?;

        let handle = self
            .registry
            .get(identity)
            .ok_or_else(|| DispatchError::NotFound {
                identity: identity.to_string(),
            })?;

        check_callable(&handle, operation)?;

        let arguments = if arguments.is_null() {
            json!({})
        } else {
            arguments
        };
        let timeout = timeout.unwrap_or(self.default_timeout);

        debug!(identity = %identity, operation = %operation, "Dispatching call");
        let raw = handle
            .client()
            .call_tool(operation, arguments, timeout)
            .await
            .map_err(|e| map_call_error(&handle, operation, timeout, e))?;

        let result: CallToolResult = match serde_json::from_value(raw.clone()) {
            Ok(result) => result,
            Err(e) => {
                handle.mark_degraded("malformed tools/call result");
                return Err(DispatchError::Unavailable {
                    identity: identity.to_string(),
                    reason: format!("Malformed result: {}", e),
                });
            }
        };

        if result.is_error() {
            return Err(DispatchError::WorkerReportedError {
                identity: identity.to_string(),
                operation: operation.to_string(),
                payload: raw,
            });
        }

        Ok(result.structured_content.unwrap_or(raw))
    }
}

fn check_callable(handle: &WorkerHandle, operation: &str) -> Result<(), DispatchError> {
    let identity = handle.identity().to_string();
    match handle.status() {
        WorkerStatus::Ready => {}
        WorkerStatus::Degraded => {
            return Err(DispatchError::Unavailable {
                identity,
                reason: "worker is degraded".to_string(),
            })
        }
        WorkerStatus::Starting => {
            return Err(DispatchError::Unavailable {
                identity,
                reason: "worker is still starting".to_string(),
            })
        }
        WorkerStatus::Terminated => {
            return Err(DispatchError::WorkerUnavailable {
                identity,
                reason: "worker has terminated".to_string(),
            })
        }
    }

    if !handle.has_operation(operation) {
        return Err(DispatchError::UnknownOperation {
            identity,
            operation: operation.to_string(),
        });
    }
    Ok(())
}

fn map_call_error(
    handle: &WorkerHandle,
    operation: &str,
    timeout: Duration,
    error: reppo_mcp::Error,
) -> DispatchError {
    let identity = handle.identity().to_string();
    match error {
        reppo_mcp::Error::Timeout(_) => {
            handle.mark_degraded("call timed out");
            DispatchError::Timeout {
                identity,
                operation: operation.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            }
        }
        reppo_mcp::Error::Connection(reason) | reppo_mcp::Error::Transport(reason) => {
            handle.mark_terminated("connection lost during call");
            DispatchError::WorkerUnavailable { identity, reason }
        }
        reppo_mcp::Error::Rpc(e) => DispatchError::WorkerReportedError {
            identity,
            operation: operation.to_string(),
            payload: json!({ "code": e.code, "message": e.message, "data": e.data }),
        },
        other => {
            warn!(identity = %identity, "Call failed: {}", other);
            handle.mark_degraded("protocol failure");
            DispatchError::Unavailable {
                identity,
                reason: other.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demo::DemoProfile;
    use crate::orchestrator::handle::test_support::in_memory_handle;
    use assert_matches::assert_matches;

    async fn dispatcher() -> (Arc<SessionRegistry>, CallDispatcher) {
        let registry = Arc::new(SessionRegistry::new());
        registry
            .register(in_memory_handle("adder", DemoProfile::Adder).await)
            .unwrap();
        registry
            .register(in_memory_handle("sleeper", DemoProfile::Sleeper).await)
            .unwrap();
        let dispatcher = CallDispatcher::new(registry.clone(), Duration::from_secs(5));
        (registry, dispatcher)
    }

    #[tokio::test]
    async fn test_invoke_returns_structured_result() {
        let (_, dispatcher) = dispatcher().await;
        let result = dispatcher
            .invoke("adder::add", json!({"a": 2, "b": 3}), None)
            .await
            .unwrap();
        assert_eq!(result, json!({"result": 5}));
    }

    #[tokio::test]
    async fn test_invalid_names() {
        let (_, dispatcher) = dispatcher().await;
        for name in ["add", "::add", "adder::", "a::b::c"] {
            assert_matches!(
                dispatcher.invoke(name, json!({}), None).await,
                Err(DispatchError::InvalidName { .. }),
                "{}",
                name
            );
        }
    }

    #[tokio::test]
    async fn test_unknown_worker_and_operation() {
        let (_, dispatcher) = dispatcher().await;
        assert_matches!(
            dispatcher.invoke("nope::add", json!({}), None).await,
            Err(DispatchError::NotFound { identity }) if identity == "nope"
        );
        assert_matches!(
            dispatcher.invoke("adder::subtract", json!({}), None).await,
            Err(DispatchError::UnknownOperation { operation, .. }) if operation == "subtract"
        );
    }

    #[tokio::test]
    async fn test_worker_reported_error_is_forwarded() {
        let (registry, dispatcher) = dispatcher().await;
        let err = dispatcher
            .invoke("sleeper::fail", json!({"message": "disk full"}), None)
            .await
            .unwrap_err();
        assert_matches!(&err, DispatchError::WorkerReportedError { .. });
        assert!(err.to_json()["details"].to_string().contains("disk full"));
        // tool-level errors do not degrade the worker
        assert_eq!(registry.get("sleeper").unwrap().status(), WorkerStatus::Ready);
    }

    #[tokio::test]
    async fn test_timeout_degrades_worker() {
        let (registry, dispatcher) = dispatcher().await;
        let err = dispatcher
            .invoke(
                "sleeper::sleep",
                json!({"ms": 2000}),
                Some(Duration::from_millis(100)),
            )
            .await
            .unwrap_err();
        assert_matches!(err, DispatchError::Timeout { timeout_ms: 100, .. });
        assert_eq!(
            registry.get("sleeper").unwrap().status(),
            WorkerStatus::Degraded
        );

        assert_matches!(
            dispatcher.invoke("sleeper::echo", json!({"value": 1}), None).await,
            Err(DispatchError::Unavailable { .. })
        );
        // the other worker is unaffected
        assert!(dispatcher
            .invoke("adder::add", json!({"a": 1, "b": 1}), None)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_terminated_worker_unavailable() {
        let (registry, dispatcher) = dispatcher().await;
        registry.get("adder").unwrap().mark_terminated("test");
        assert_matches!(
            dispatcher.invoke("adder::add", json!({"a": 1, "b": 1}), None).await,
            Err(DispatchError::WorkerUnavailable { .. })
        );
    }

    #[tokio::test]
    async fn test_closed_connection_terminates_worker() {
        let (registry, dispatcher) = dispatcher().await;
        let handle = registry.get("adder").unwrap();
        handle.client().close().await;
        assert_matches!(
            dispatcher.invoke("adder::add", json!({"a": 1, "b": 1}), None).await,
            Err(DispatchError::WorkerUnavailable { .. })
        );
        assert_eq!(handle.status(), WorkerStatus::Terminated);
    }

    #[tokio::test]
    async fn test_null_arguments_become_empty_object() {
        let (_, dispatcher) = dispatcher().await;
        let result = dispatcher
            .invoke("sleeper::echo", Value::Null, None)
            .await
            .unwrap();
        assert_eq!(result, json!({"value": null}));
    }
}
