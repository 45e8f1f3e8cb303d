//! Startup and dispatch error types
//!
//! Dispatch errors are values returned to the specific caller, never fatal
//! to the orchestrator. They serialize to a stable `{kind, message,
//! worker_identity, details}` shape for the outward tool surface.

use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;

/// A worker failed to come up during startup
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StartupError {
    #[error("Failed to spawn worker '{identity}': {reason}")]
    Spawn { identity: String, reason: String },

    #[error("Handshake with worker '{identity}' failed: {reason}")]
    Handshake { identity: String, reason: String },

    #[error("Handshake with worker '{identity}' timed out after {timeout_ms}ms")]
    HandshakeTimeout { identity: String, timeout_ms: u64 },
}

impl StartupError {
    /// Identity of the worker that failed
    pub fn identity(&self) -> &str {
        match self {
            StartupError::Spawn { identity, .. }
            | StartupError::Handshake { identity, .. }
            | StartupError::HandshakeTimeout { identity, .. } => identity,
        }
    }
}

/// A call could not be completed
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DispatchError {
    #[error("Invalid qualified name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    #[error("No worker registered as '{identity}'")]
    NotFound { identity: String },

    #[error("Worker '{identity}' has no operation '{operation}'")]
    UnknownOperation { identity: String, operation: String },

    #[error("Worker '{identity}' is unavailable: {reason}")]
    Unavailable { identity: String, reason: String },

    #[error("Call to '{identity}::{operation}' timed out after {timeout_ms}ms")]
    Timeout {
        identity: String,
        operation: String,
        timeout_ms: u64,
    },

    #[error("Worker '{identity}' is gone: {reason}")]
    WorkerUnavailable { identity: String, reason: String },

    /// The worker answered with its own error; `payload` is forwarded verbatim
    #[error("Worker '{identity}' reported an error from '{operation}'")]
    WorkerReportedError {
        identity: String,
        operation: String,
        payload: Value,
    },
}

/// Wire form of a [`DispatchError`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorPayload {
    pub kind: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_identity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl DispatchError {
    /// Stable machine-readable kind
    pub fn kind(&self) -> &'static str {
        match self {
            DispatchError::InvalidName { .. } => "invalid_name",
            DispatchError::NotFound { .. } => "not_found",
            DispatchError::UnknownOperation { .. } => "unknown_operation",
            DispatchError::Unavailable { .. } => "unavailable",
            DispatchError::Timeout { .. } => "timeout",
            DispatchError::WorkerUnavailable { .. } => "worker_unavailable",
            DispatchError::WorkerReportedError { .. } => "worker_reported_error",
        }
    }

    pub fn worker_identity(&self) -> Option<&str> {
        match self {
            DispatchError::InvalidName { .. } => None,
            DispatchError::NotFound { identity }
            | DispatchError::UnknownOperation { identity, .. }
            | DispatchError::Unavailable { identity, .. }
            | DispatchError::Timeout { identity, .. }
            | DispatchError::WorkerUnavailable { identity, .. }
            | DispatchError::WorkerReportedError { identity, .. } => Some(identity),
        }
    }

    pub fn to_payload(&self) -> ErrorPayload {
        let details = match self {
            DispatchError::WorkerReportedError { payload, .. } => Some(payload.clone()),
            DispatchError::Timeout { timeout_ms, .. } => Some(json!({ "timeout_ms": timeout_ms })),
            DispatchError::UnknownOperation { operation, .. } => {
                Some(json!({ "operation": operation }))
            }
            _ => None,
        };

        ErrorPayload {
            kind: self.kind(),
            message: self.to_string(),
            worker_identity: self.worker_identity().map(str::to_string),
            details,
        }
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self.to_payload()).unwrap_or_else(|_| {
            json!({ "kind": self.kind(), "message": self.to_string() })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_startup_error_names_worker() {
        let err = StartupError::HandshakeTimeout {
            identity: "adder".to_string(),
            timeout_ms: 250,
        };
        assert_eq!(err.identity(), "adder");
        assert!(err.to_string().contains("adder"));
    }

    #[test]
    fn test_dispatch_error_payload() {
        let err = DispatchError::WorkerReportedError {
            identity: "db".to_string(),
            operation: "query".to_string(),
            payload: json!({"code": -32000, "message": "syntax error"}),
        };
        let value = err.to_json();
        assert_eq!(value["kind"], "worker_reported_error");
        assert_eq!(value["worker_identity"], "db");
        assert_eq!(value["details"]["message"], "syntax error");
    }

    #[test]
    fn test_invalid_name_has_no_identity() {
        let err = DispatchError::InvalidName {
            name: "add".to_string(),
            reason: "missing separator".to_string(),
        };
        let value = err.to_json();
        assert_eq!(value["kind"], "invalid_name");
        assert!(value.get("worker_identity").is_none());
    }
}
