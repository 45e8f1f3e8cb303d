//! MCP server implementation
//!
//! This module provides protocol handling for a server exposing tools
//! through a [`ToolHandler`]. [`McpServer::handle_message`] answers a single
//! raw message; [`McpServer::serve`] drives a whole transport, running each
//! request as its own task so slow tool calls never block other requests.

use crate::{
    protocol::error_codes,
    protocol::*,
    transport::{Transport, TransportSender},
    Error, Result,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};

/// Source of the tools a server exposes
#[async_trait]
pub trait ToolHandler: Send + Sync + 'static {
    /// Name and version reported during initialization
    fn server_info(&self) -> ServerInfo;

    /// Optional usage instructions reported during initialization
    fn instructions(&self) -> Option<String> {
        None
    }

    /// Tools currently offered
    async fn list_tools(&self) -> Vec<Tool>;

    /// Execute a tool; tool-level failures are reported with `isError`
    async fn call_tool(&self, name: &str, arguments: Value) -> CallToolResult;
}

/// MCP server dispatching protocol requests to a [`ToolHandler`]
pub struct McpServer<H> {
    handler: Arc<H>,
    capabilities: ServerCapabilities,
    page_size: Option<usize>,
}

impl<H> Clone for McpServer<H> {
    fn clone(&self) -> Self {
        Self {
            handler: self.handler.clone(),
            capabilities: self.capabilities.clone(),
            page_size: self.page_size,
        }
    }
}

impl<H: ToolHandler> McpServer<H> {
    /// Create a new MCP server with default capabilities
    pub fn new(handler: H) -> Self {
        Self::from_arc(Arc::new(handler))
    }

    pub fn from_arc(handler: Arc<H>) -> Self {
        Self {
            handler,
            capabilities: ServerCapabilities::default(),
            page_size: None,
        }
    }

    /// Split `tools/list` results into pages of at most `page_size` tools
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = Some(page_size.max(1));
        self
    }

    pub fn handler(&self) -> &Arc<H> {
        &self.handler
    }

    /// Handle an incoming JSON-RPC message
    ///
    /// Returns the serialized response for requests and `None` for
    /// notifications and stray responses.
    pub async fn handle_message(&self, message: &str) -> Result<Option<String>> {
        let parsed = match JsonRpcMessage::parse(message) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("Failed to parse JSON-RPC message: {}", e);
                let response = JsonRpcResponse::error(
                    Value::Null,
                    JsonRpcError::new(error_codes::PARSE_ERROR, format!("Invalid message: {}", e)),
                );
                return Ok(Some(serde_json::to_string(&response)?));
            }
        };

        match parsed {
            JsonRpcMessage::Request(request) => {
                debug!("Handling request: {}", request.method);
                let response = self.handle_request(request).await;
                Ok(Some(serde_json::to_string(&response)?))
            }
            JsonRpcMessage::Notification(notification) => {
                debug!("Received notification: {}", notification.method);
                Ok(None)
            }
            JsonRpcMessage::Response(response) => {
                debug!("Ignoring unsolicited response {}", response.id);
                Ok(None)
            }
        }
    }

    /// Handle a JSON-RPC request and return a response
    async fn handle_request(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let id = request.id.clone();
        let outcome = match request.method.as_str() {
            methods::INITIALIZE => self.handle_initialize(request.params),
            methods::PING => Ok(json!({})),
            methods::LIST_TOOLS => self.handle_list_tools(request.params).await,
            methods::CALL_TOOL => self.handle_call_tool(request.params).await,
            other => {
                warn!("Unknown method: {}", other);
                Err(JsonRpcError::new(
                    error_codes::METHOD_NOT_FOUND,
                    format!("Method not found: {}", other),
                ))
            }
        };

        match outcome {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(error) => JsonRpcResponse::error(id, error),
        }
    }

    fn handle_initialize(&self, params: Option<Value>) -> std::result::Result<Value, JsonRpcError> {
        let params: InitializeParams = params
            .ok_or_else(|| {
                JsonRpcError::new(error_codes::INVALID_PARAMS, "Missing initialize parameters")
            })
            .and_then(|p| {
                serde_json::from_value(p).map_err(|e| {
                    JsonRpcError::new(
                        error_codes::INVALID_PARAMS,
                        format!("Invalid initialize parameters: {}", e),
                    )
                })
            })?;

        info!(
            "Client initializing: {} v{} (protocol: {})",
            params.client_info.name, params.client_info.version, params.protocol_version
        );

        if params.protocol_version != MCP_VERSION {
            warn!(
                "Protocol version mismatch: client={}, server={} - proceeding with connection",
                params.protocol_version, MCP_VERSION
            );
        }

        let result = InitializeResult {
            protocol_version: MCP_VERSION.to_string(),
            server_info: self.handler.server_info(),
            capabilities: self.capabilities.clone(),
            instructions: self.handler.instructions(),
        };
        serde_json::to_value(result)
            .map_err(|e| JsonRpcError::new(error_codes::INTERNAL_ERROR, e.to_string()))
    }

    async fn handle_list_tools(
        &self,
        params: Option<Value>,
    ) -> std::result::Result<Value, JsonRpcError> {
        let params: ListToolsParams = match params {
            Some(p) if !p.is_null() => serde_json::from_value(p).map_err(|e| {
                JsonRpcError::new(error_codes::INVALID_PARAMS, format!("Invalid cursor: {}", e))
            })?,
            _ => ListToolsParams::default(),
        };

        let tools = self.handler.list_tools().await;
        let result = match self.page_size {
            None => ListToolsResult {
                tools,
                next_cursor: None,
            },
            Some(page_size) => {
                let start = match params.cursor.as_deref() {
                    None => 0,
                    Some(cursor) => cursor.parse::<usize>().map_err(|_| {
                        JsonRpcError::new(error_codes::INVALID_PARAMS, "Invalid cursor")
                    })?,
                };
                let end = start.saturating_add(page_size).min(tools.len());
                let page = tools.get(start..end).map(<[Tool]>::to_vec).unwrap_or_default();
                ListToolsResult {
                    tools: page,
                    next_cursor: (end < tools.len()).then(|| end.to_string()),
                }
            }
        };

        serde_json::to_value(result)
            .map_err(|e| JsonRpcError::new(error_codes::INTERNAL_ERROR, e.to_string()))
    }

    async fn handle_call_tool(
        &self,
        params: Option<Value>,
    ) -> std::result::Result<Value, JsonRpcError> {
        let params: CallToolParams = params
            .ok_or_else(|| JsonRpcError::new(error_codes::INVALID_PARAMS, "Missing tool call parameters"))
            .and_then(|p| {
                serde_json::from_value(p).map_err(|e| {
                    JsonRpcError::new(
                        error_codes::INVALID_PARAMS,
                        format!("Invalid tool call parameters: {}", e),
                    )
                })
            })?;

        debug!("Calling tool {}", params.name);
        let result = self.handler.call_tool(&params.name, params.arguments).await;
        serde_json::to_value(result)
            .map_err(|e| JsonRpcError::new(error_codes::INTERNAL_ERROR, e.to_string()))
    }

    /// Serve requests from `transport` until the peer disconnects
    ///
    /// `notifications/cancelled` aborts the matching in-flight request; no
    /// response is sent for it.
    pub async fn serve(&self, transport: Transport) -> Result<()> {
        let (sender, mut receiver) = transport.split();
        let (out_tx, out_rx) = mpsc::unbounded_channel::<String>();
        let writer = tokio::spawn(write_loop(sender, out_rx));
        let in_flight: Arc<Mutex<HashMap<String, AbortHandle>>> =
            Arc::new(Mutex::new(HashMap::new()));

        info!("MCP server loop started");
        let outcome = loop {
            let message = match receiver.receive().await {
                Ok(message) => message,
                Err(Error::Connection(reason)) => {
                    info!("Client disconnected: {}", reason);
                    break Ok(());
                }
                Err(e) => {
                    error!("Transport error: {}", e);
                    break Err(e);
                }
            };

            match JsonRpcMessage::parse(&message) {
                Ok(JsonRpcMessage::Request(request)) => {
                    let key = request.id.to_string();
                    let server = self.clone();
                    let out_tx = out_tx.clone();
                    let registry = in_flight.clone();
                    let task_key = key.clone();

                    // Hold the map lock across spawn so the task cannot
                    // remove its entry before it is inserted
                    let mut map = in_flight.lock();
                    let task = tokio::spawn(async move {
                        let response = server.handle_request(request).await;
                        registry.lock().remove(&task_key);
                        match serde_json::to_string(&response) {
                            Ok(json) => {
                                let _ = out_tx.send(json);
                            }
                            Err(e) => error!("Failed to serialize response: {}", e),
                        }
                    });
                    map.insert(key, task.abort_handle());
                }
                Ok(JsonRpcMessage::Notification(notification))
                    if notification.method == methods::CANCELLED =>
                {
                    let request_id = notification
                        .params
                        .and_then(|p| serde_json::from_value::<CancelledParams>(p).ok())
                        .map(|p| p.request_id.to_string());
                    if let Some(request_id) = request_id {
                        if let Some(handle) = in_flight.lock().remove(&request_id) {
                            handle.abort();
                            info!("Cancelled in-flight request {}", request_id);
                        }
                    }
                }
                Ok(_) => match self.handle_message(&message).await {
                    Ok(Some(response)) => {
                        let _ = out_tx.send(response);
                    }
                    Ok(None) => {}
                    Err(e) => warn!("Failed to handle message: {}", e),
                },
                Err(e) => {
                    warn!("Unparseable message: {}", e);
                    let response = JsonRpcResponse::error(
                        Value::Null,
                        JsonRpcError::new(error_codes::INVALID_REQUEST, e.to_string()),
                    );
                    if let Ok(json) = serde_json::to_string(&response) {
                        let _ = out_tx.send(json);
                    }
                }
            }
        };

        for (_, handle) in in_flight.lock().drain() {
            handle.abort();
        }
        drop(out_tx);
        if let Err(e) = writer.await {
            debug!("Writer task ended abnormally: {}", e);
        }
        info!("MCP server loop finished");
        outcome
    }
}

async fn write_loop(mut sender: Box<dyn TransportSender>, mut out_rx: mpsc::UnboundedReceiver<String>) {
    while let Some(message) = out_rx.recv().await {
        if let Err(e) = sender.send(&message).await {
            error!("Failed to write response: {}", e);
            break;
        }
    }
    if let Err(e) = sender.close().await {
        debug!("Error closing transport: {}", e);
    }
}
