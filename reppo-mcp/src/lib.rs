//! MCP protocol implementation for Reppo
//!
//! This crate provides the Model Context Protocol (MCP) plumbing used both
//! to talk to supervised workers and to expose the orchestrator itself.
//!
//! # Architecture
//!
//! - **[`protocol`]**: JSON-RPC 2.0 message types and MCP protocol definitions
//! - **[`transport`]**: Newline-framed transports over stdio, child pipes and memory
//! - **[`client`]**: Correlating MCP client allowing concurrent in-flight requests
//! - **[`server`]**: MCP server loop dispatching to a [`server::ToolHandler`]
//! - **[`error`]**: Error handling for protocol operations
//!
//! # Protocol Flow
//!
//! ```text
//! Client                          Server
//!   |                               |
//!   |-- initialize ---------------->|
//!   |<------------- initialize -----|
//!   |-- notifications/initialized ->|
//!   |                               |
//!   |-- tools/list ---------------->|
//!   |<-------- tools, nextCursor ---|
//!   |                               |
//!   |-- tools/call (id 7) --------->|
//!   |-- tools/call (id 8) --------->|
//!   |<----------------- result 8 ---|
//!   |<----------------- result 7 ---|
//! ```
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use reppo_mcp::{client::McpClient, protocol::ClientInfo, transport::TransportFactory};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let (client_transport, _server_transport) = TransportFactory::in_memory_pair();
//! let client = McpClient::connect(client_transport, "worker");
//!
//! let client_info = ClientInfo {
//!     name: "example-client".to_string(),
//!     version: "1.0.0".to_string(),
//! };
//! client.initialize(client_info, Duration::from_secs(10)).await?;
//! let tools = client.list_tools(Duration::from_secs(10)).await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod protocol;
pub mod server;
pub mod transport;


pub use error::{Error, Result};

/// Re-export core types for convenience
pub use reppo_core as core;
