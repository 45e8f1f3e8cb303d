//! MCP client implementation
//!
//! The client owns one transport and correlates responses to requests by
//! id, so any number of requests may be in flight at once. A single reader
//! task routes each response to its waiter; when the peer goes away every
//! pending waiter fails with a connection error.

use crate::{
    protocol::*,
    transport::{Transport, TransportReceiver, TransportSender, DEFAULT_WRITE_TIMEOUT},
    Error, Result,
};
use parking_lot::Mutex as SyncMutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{timeout, timeout_at, Duration, Instant};
use tracing::{debug, info, trace, warn};

type Reply = std::result::Result<Value, JsonRpcError>;

const CANCEL_SEND_TIMEOUT: Duration = Duration::from_secs(1);

/// MCP client for talking to a single MCP server
#[derive(Clone)]
pub struct McpClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    /// Label used in logs, usually the peer's identity
    label: String,
    sender: Mutex<Option<Box<dyn TransportSender>>>,
    pending: SyncMutex<HashMap<u64, oneshot::Sender<Reply>>>,
    next_id: AtomicU64,
    closed: AtomicBool,
    reader: SyncMutex<Option<JoinHandle<()>>>,
}

impl McpClient {
    /// Wrap a transport and start routing its incoming messages
    pub fn connect<S: Into<String>>(transport: Transport, label: S) -> Self {
        let (sender, receiver) = transport.split();
        let inner = Arc::new(ClientInner {
            label: label.into(),
            sender: Mutex::new(Some(sender)),
            pending: SyncMutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            reader: SyncMutex::new(None),
        });

        let handle = tokio::spawn(read_loop(inner.clone(), receiver));
        *inner.reader.lock() = Some(handle);

        Self { inner }
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// Whether the connection to the peer has been lost or closed
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Number of requests currently awaiting a response
    pub fn pending_requests(&self) -> usize {
        self.inner.pending.lock().len()
    }

    /// Perform the MCP handshake
    pub async fn initialize(
        &self,
        client_info: ClientInfo,
        request_timeout: Duration,
    ) -> Result<InitializeResult> {
        let params = InitializeParams {
            protocol_version: MCP_VERSION.to_string(),
            client_info,
            capabilities: ClientCapabilities::default(),
        };

        let result = self
            .request(
                methods::INITIALIZE,
                Some(serde_json::to_value(params)?),
                request_timeout,
            )
            .await?;

        let result: InitializeResult =
            serde_json::from_value(result).map_err(|e| Error::Protocol {
                message: format!("Invalid initialize result: {}", e),
            })?;

        if result.protocol_version != MCP_VERSION {
            warn!(
                "Protocol version mismatch with {}: peer={}, ours={} - proceeding",
                self.inner.label, result.protocol_version, MCP_VERSION
            );
        }

        self.notify(methods::INITIALIZED, None).await?;
        info!(
            "MCP session with {} initialized ({} v{})",
            self.inner.label, result.server_info.name, result.server_info.version
        );
        Ok(result)
    }

    /// List all tools, following pagination cursors
    pub async fn list_tools(&self, request_timeout: Duration) -> Result<Vec<Tool>> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let params = ListToolsParams {
                cursor: cursor.take(),
            };
            let result = self
                .request(
                    methods::LIST_TOOLS,
                    Some(serde_json::to_value(params)?),
                    request_timeout,
                )
                .await?;
            let page: ListToolsResult =
                serde_json::from_value(result).map_err(|e| Error::Protocol {
                    message: format!("Invalid tools/list result: {}", e),
                })?;

            tools.extend(page.tools);
            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }

        debug!("{} declared {} tools", self.inner.label, tools.len());
        Ok(tools)
    }

    /// Call a tool and return the raw `tools/call` result
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
        request_timeout: Duration,
    ) -> Result<Value> {
        let params = CallToolParams {
            name: name.to_string(),
            arguments,
        };
        self.request(
            methods::CALL_TOOL,
            Some(serde_json::to_value(params)?),
            request_timeout,
        )
        .await
    }

    /// Send a ping and wait for the reply
    pub async fn ping(&self, request_timeout: Duration) -> Result<()> {
        self.request(methods::PING, None, request_timeout).await?;
        debug!("Ping to {} successful", self.inner.label);
        Ok(())
    }

    /// Send a request and wait for its response
    ///
    /// `request_timeout` bounds the whole exchange, including a write that
    /// blocks because the peer stopped reading. If the wait ends without a
    /// response (timeout, or the returned future is dropped) the correlation
    /// entry is removed and, once the request went out, the peer receives a
    /// best-effort `notifications/cancelled`.
    pub async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        request_timeout: Duration,
    ) -> Result<Value> {
        if self.is_closed() {
            return Err(Error::Connection(format!(
                "Connection to {} is closed",
                self.inner.label
            )));
        }

        let deadline = Instant::now() + request_timeout;
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.inner.pending.lock().insert(id, tx);

        let mut guard = PendingGuard {
            inner: self.inner.clone(),
            id,
            sent: false,
            armed: true,
        };

        let request = JsonRpcRequest::new_with_id(json!(id), method, params);
        let json = serde_json::to_string(&request)?;
        match timeout_at(deadline, self.inner.send(&json)).await {
            Ok(sent) => sent?,
            Err(_) => {
                warn!(
                    "Could not deliver {} to {} within {}ms",
                    method,
                    self.inner.label,
                    request_timeout.as_millis()
                );
                return Err(self.timed_out(method, request_timeout));
            }
        }
        guard.sent = true;
        trace!("Sent {} request {} to {}", method, id, self.inner.label);

        match timeout_at(deadline, rx).await {
            Ok(Ok(reply)) => {
                guard.armed = false;
                reply.map_err(Error::Rpc)
            }
            Ok(Err(_)) => {
                guard.armed = false;
                Err(Error::Connection(format!(
                    "Connection to {} closed while awaiting {}",
                    self.inner.label, method
                )))
            }
            Err(_) => Err(self.timed_out(method, request_timeout)),
        }
    }

    fn timed_out(&self, method: &str, request_timeout: Duration) -> Error {
        Error::Timeout(format!(
            "{} to {} timed out after {}ms",
            method,
            self.inner.label,
            request_timeout.as_millis()
        ))
    }

    /// Send a notification
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        let notification = JsonRpcNotification::new(method, params);
        self.inner
            .send_within(&serde_json::to_string(&notification)?, DEFAULT_WRITE_TIMEOUT)
            .await
    }

    /// Close the connection; pending requests fail with a connection error
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(mut sender) = self.inner.sender.lock().await.take() {
            if let Err(e) = sender.close().await {
                debug!("Error closing transport to {}: {}", self.inner.label, e);
            }
        }
        if let Some(reader) = self.inner.reader.lock().take() {
            reader.abort();
        }
        self.inner.pending.lock().clear();
        info!("MCP client connection to {} closed", self.inner.label);
    }
}

impl ClientInner {
    async fn send(&self, message: &str) -> Result<()> {
        let mut sender = self.sender.lock().await;
        let sender = sender.as_mut().ok_or_else(|| {
            Error::Connection(format!("Connection to {} is closed", self.label))
        })?;
        sender.send(message).await
    }

    /// `send`, including the wait for the sender lock, bounded by `limit`
    async fn send_within(&self, message: &str, limit: Duration) -> Result<()> {
        timeout(limit, self.send(message)).await.map_err(|_| {
            Error::Timeout(format!(
                "Sending to {} timed out after {}ms",
                self.label,
                limit.as_millis()
            ))
        })?
    }

    fn fail_all(&self) {
        self.closed.store(true, Ordering::Release);
        let dropped = {
            let mut pending = self.pending.lock();
            let count = pending.len();
            pending.clear();
            count
        };
        if dropped > 0 {
            warn!(
                "Connection to {} lost with {} requests in flight",
                self.label, dropped
            );
        }
    }

    async fn answer_peer_request(&self, request: JsonRpcRequest) {
        let response = match request.method.as_str() {
            methods::PING => JsonRpcResponse::success(request.id, json!({})),
            other => {
                debug!("{} sent unsupported request {}", self.label, other);
                JsonRpcResponse::error(
                    request.id,
                    JsonRpcError::new(error_codes::METHOD_NOT_FOUND, "Method not found"),
                )
            }
        };
        match serde_json::to_string(&response) {
            Ok(json) => {
                if let Err(e) = self.send_within(&json, DEFAULT_WRITE_TIMEOUT).await {
                    debug!("Failed to answer request from {}: {}", self.label, e);
                }
            }
            Err(e) => warn!("Failed to serialize response for {}: {}", self.label, e),
        }
    }
}

async fn read_loop(inner: Arc<ClientInner>, mut receiver: Box<dyn TransportReceiver>) {
    loop {
        let message = match receiver.receive().await {
            Ok(message) => message,
            Err(e) => {
                debug!("Reader for {} stopped: {}", inner.label, e);
                break;
            }
        };

        match JsonRpcMessage::parse(&message) {
            Ok(JsonRpcMessage::Response(response)) => {
                let Some(id) = response.id.as_u64() else {
                    warn!("{} sent a response with foreign id {}", inner.label, response.id);
                    continue;
                };
                let reply = match response.error {
                    Some(error) => Err(error),
                    None => Ok(response.result.unwrap_or(Value::Null)),
                };
                let waiter = inner.pending.lock().remove(&id);
                match waiter {
                    Some(waiter) => {
                        let _ = waiter.send(reply);
                    }
                    None => debug!(
                        "Discarding response {} from {}: no longer awaited",
                        id, inner.label
                    ),
                }
            }
            Ok(JsonRpcMessage::Request(request)) => {
                inner.answer_peer_request(request).await;
            }
            Ok(JsonRpcMessage::Notification(notification)) => {
                trace!("{} notification: {}", inner.label, notification.method);
            }
            Err(e) => {
                warn!("Unparseable message from {}: {}", inner.label, e);
            }
        }
    }

    inner.fail_all();
}

/// Removes an abandoned request from the pending map and tells the peer
struct PendingGuard {
    inner: Arc<ClientInner>,
    id: u64,
    sent: bool,
    armed: bool,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.inner.pending.lock().remove(&self.id);

        if !self.sent || self.inner.closed.load(Ordering::Acquire) {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };

        let inner = self.inner.clone();
        let id = self.id;
        runtime.spawn(async move {
            let params = CancelledParams {
                request_id: json!(id),
                reason: Some("Request abandoned by caller".to_string()),
            };
            let notification = match serde_json::to_value(params) {
                Ok(params) => JsonRpcNotification::new(methods::CANCELLED, Some(params)),
                Err(_) => return,
            };
            if let Ok(json) = serde_json::to_string(&notification) {
                if let Err(e) = inner.send_within(&json, CANCEL_SEND_TIMEOUT).await {
                    debug!("Failed to send cancellation to {}: {}", inner.label, e);
                }
            }
        });
    }
}
