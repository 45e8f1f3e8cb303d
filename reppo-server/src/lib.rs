//! Reppo orchestrator application
//!
//! Supervises a set of MCP worker processes declared in a manifest and
//! exposes their operations through one MCP surface under qualified
//! `<identity>::<operation>` names.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

pub mod config;
pub mod demo;
pub mod error;
pub mod http;
pub mod orchestrator;

#[cfg(test)]
mod config_tests;

pub use error::{Error, Result};
pub use orchestrator::{Orchestrator, OrchestratorTools};

/// Re-export the protocol and domain crates for convenience
pub use reppo_core as core;
pub use reppo_mcp as mcp;

/// Outward transport for the orchestrator's own MCP surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    /// Newline-delimited JSON-RPC over stdin/stdout
    Stdio,
    /// JSON-RPC over HTTP POST
    Http,
}

/// What to do when a worker fails to start
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartupPolicy {
    /// Stop every launched worker and abort startup
    FailFast,
    /// Log the failure and continue with the remaining workers
    SkipFailed,
}
