//! Error types for the orchestrator application

use crate::orchestrator::StartupError;
use thiserror::Error;

/// Orchestrator application error type
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Config file error: {0}")]
    ConfigFile(#[from] config::ConfigError),

    #[error("Startup error: {0}")]
    Startup(#[from] StartupError),

    #[error("MCP protocol error: {0}")]
    Mcp(#[from] reppo_mcp::Error),

    #[error("Core domain error: {0}")]
    Core(#[from] reppo_core::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Convenience result type for orchestrator operations
pub type Result<T> = std::result::Result<T, Error>;
