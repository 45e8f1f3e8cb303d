//! Error types for MCP protocol operations

use crate::protocol::JsonRpcError;
use thiserror::Error;

/// MCP protocol error type
#[derive(Error, Debug)]
pub enum Error {
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Core domain error: {0}")]
    Core(#[from] reppo_core::Error),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Invalid params: {message}")]
    InvalidParams { message: String },

    /// The peer answered with a JSON-RPC error object
    #[error("Remote error: {0}")]
    Rpc(JsonRpcError),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl Error {
    /// Whether the underlying connection is gone
    pub fn is_connection(&self) -> bool {
        matches!(self, Error::Connection(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }
}

/// Convenience result type for MCP operations
pub type Result<T> = std::result::Result<T, Error>;
