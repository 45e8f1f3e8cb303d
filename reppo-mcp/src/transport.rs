//! Transport layer for MCP communication
//!
//! Messages are newline-delimited JSON-RPC 2.0 objects. A transport is split
//! into a sending half and a receiving half so that one task can read
//! responses while any number of callers write requests.

use crate::{Error, Result};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::process::{ChildStdin, ChildStdout};
use tokio::signal;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};
use tracing::{debug, error, info, warn};

/// Sending half of a transport
#[async_trait::async_trait]
pub trait TransportSender: Send {
    /// Send a single message
    async fn send(&mut self, message: &str) -> Result<()>;

    /// Close the sending direction
    async fn close(&mut self) -> Result<()>;
}

/// Receiving half of a transport
#[async_trait::async_trait]
pub trait TransportReceiver: Send {
    /// Receive the next message; a `Connection` error means the peer is gone
    async fn receive(&mut self) -> Result<String>;
}

/// A bidirectional transport made of its two halves
pub struct Transport {
    pub sender: Box<dyn TransportSender>,
    pub receiver: Box<dyn TransportReceiver>,
}

impl Transport {
    pub fn new(sender: Box<dyn TransportSender>, receiver: Box<dyn TransportReceiver>) -> Self {
        Self { sender, receiver }
    }

    pub fn split(self) -> (Box<dyn TransportSender>, Box<dyn TransportReceiver>) {
        (self.sender, self.receiver)
    }
}

/// Default write timeout for framed writes (10 seconds)
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default buffer size for framed streams (64KB)
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// Validate that a message is a single JSON-RPC 2.0 object without embedded newlines
pub fn validate_message(message: &str) -> Result<()> {
    if message.contains('\n') || message.contains('\r') {
        return Err(Error::Transport(
            "Message contains embedded newlines, which breaks line framing".to_string(),
        ));
    }

    let parsed: Value = serde_json::from_str(message)
        .map_err(|e| Error::Transport(format!("Invalid JSON in message: {}", e)))?;

    match &parsed {
        Value::Object(obj) => match obj.get("jsonrpc").and_then(|v| v.as_str()) {
            Some("2.0") => Ok(()),
            _ => Err(Error::Transport(
                "Message must use JSON-RPC 2.0 protocol".to_string(),
            )),
        },
        Value::Array(_) => Err(Error::Transport(
            "Batch messages are not supported".to_string(),
        )),
        _ => Err(Error::Transport(
            "JSON-RPC message must be an object".to_string(),
        )),
    }
}

/// Newline-framed writer over any async byte sink
pub struct LineWriter<W> {
    writer: BufWriter<W>,
    write_timeout: Duration,
    closed: bool,
    /// Set while a frame is being written; still set if that write was abandoned
    interrupted: bool,
    messages_sent: u64,
}

impl<W: AsyncWrite + Unpin + Send> LineWriter<W> {
    pub fn new(writer: W) -> Self {
        Self::with_config(writer, DEFAULT_WRITE_TIMEOUT, DEFAULT_BUFFER_SIZE)
    }

    pub fn with_config(writer: W, write_timeout: Duration, buffer_size: usize) -> Self {
        Self {
            writer: BufWriter::with_capacity(buffer_size.max(4096), writer),
            write_timeout,
            closed: false,
            interrupted: false,
            messages_sent: 0,
        }
    }

    pub fn messages_sent(&self) -> u64 {
        self.messages_sent
    }
}

#[async_trait::async_trait]
impl<W: AsyncWrite + Unpin + Send> TransportSender for LineWriter<W> {
    async fn send(&mut self, message: &str) -> Result<()> {
        if self.closed {
            return Err(Error::Connection("Transport is closed".to_string()));
        }

        validate_message(message)?;

        // An abandoned write may have left a partial line on the stream;
        // terminate it so the peer discards it instead of merging frames.
        let resync = std::mem::replace(&mut self.interrupted, true);
        let mut frame = Vec::with_capacity(message.len() + 2);
        if resync {
            frame.push(b'\n');
        }
        frame.extend_from_slice(message.as_bytes());
        frame.push(b'\n');

        let writer = &mut self.writer;
        let write_operation = async {
            writer.write_all(&frame).await?;
            writer.flush().await
        };

        match timeout(self.write_timeout, write_operation).await {
            Ok(Ok(())) => {
                self.interrupted = false;
                self.messages_sent += 1;
                debug!("Sent {} bytes (total sent: {})", message.len(), self.messages_sent);
                Ok(())
            }
            Ok(Err(e)) => {
                self.closed = true;
                match e.kind() {
                    std::io::ErrorKind::BrokenPipe | std::io::ErrorKind::ConnectionReset => {
                        Err(Error::Connection(format!("Peer closed the stream: {}", e)))
                    }
                    _ => {
                        error!("Write operation failed: {}", e);
                        Err(Error::Transport(format!("Failed to write message: {}", e)))
                    }
                }
            }
            Err(_) => {
                warn!("Write operation timed out after {:?}", self.write_timeout);
                Err(Error::Timeout(format!(
                    "Write timeout after {:?}",
                    self.write_timeout
                )))
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            if let Err(e) = self.writer.flush().await {
                debug!("Error flushing during close: {}", e);
            }
            if let Err(e) = self.writer.shutdown().await {
                debug!("Error shutting down writer during close: {}", e);
            }
        }
        Ok(())
    }
}

/// Newline-framed reader over any async byte source
///
/// Blank lines are skipped, and so are lines that fail validation (with a
/// warning). End of stream is reported as a `Connection` error.
pub struct LineReader<R> {
    reader: BufReader<R>,
    line: String,
    messages_received: u64,
}

impl<R: AsyncRead + Unpin + Send> LineReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::with_capacity(DEFAULT_BUFFER_SIZE, reader),
            line: String::new(),
            messages_received: 0,
        }
    }
}

#[async_trait::async_trait]
impl<R: AsyncRead + Unpin + Send> TransportReceiver for LineReader<R> {
    async fn receive(&mut self) -> Result<String> {
        loop {
            self.line.clear();
            match self.reader.read_line(&mut self.line).await {
                Ok(0) => {
                    return Err(Error::Connection("Stream reached EOF".to_string()));
                }
                Ok(_) => {
                    let message = self.line.trim_end_matches(['\n', '\r']);
                    if message.trim().is_empty() {
                        continue;
                    }
                    if let Err(e) = validate_message(message) {
                        warn!("Received invalid message: {}, continuing to read", e);
                        continue;
                    }
                    self.messages_received += 1;
                    return Ok(message.to_string());
                }
                Err(e) => match e.kind() {
                    std::io::ErrorKind::Interrupted => continue,
                    std::io::ErrorKind::InvalidData => {
                        warn!("Received non UTF-8 line, continuing to read");
                        continue;
                    }
                    _ => {
                        return Err(Error::Connection(format!("Failed to read: {}", e)));
                    }
                },
            }
        }
    }
}

/// In-memory sending half, used for tests and local wiring
pub struct InMemorySender {
    sender: Option<mpsc::UnboundedSender<String>>,
}

/// In-memory receiving half
pub struct InMemoryReceiver {
    receiver: mpsc::UnboundedReceiver<String>,
}

#[async_trait::async_trait]
impl TransportSender for InMemorySender {
    async fn send(&mut self, message: &str) -> Result<()> {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| Error::Connection("In-memory transport is closed".to_string()))?;
        validate_message(message)?;
        sender.send(message.to_string()).map_err(|_| {
            Error::Connection("In-memory transport peer has gone away".to_string())
        })
    }

    async fn close(&mut self) -> Result<()> {
        self.sender = None;
        Ok(())
    }
}

#[async_trait::async_trait]
impl TransportReceiver for InMemoryReceiver {
    async fn receive(&mut self) -> Result<String> {
        self.receiver
            .recv()
            .await
            .ok_or_else(|| Error::Connection("In-memory transport connection closed".to_string()))
    }
}

/// Wait until a shutdown signal is received (SIGINT/SIGTERM)
pub async fn shutdown_signal() {
    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
        }
        _ = wait_for_sigterm() => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}

#[cfg(unix)]
async fn wait_for_sigterm() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            warn!("Failed to install SIGTERM handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_sigterm() {
    std::future::pending::<()>().await;
}

/// Transport factory for creating different transport types
pub struct TransportFactory;

impl TransportFactory {
    /// Transport over this process's own stdin/stdout
    pub fn stdio() -> Transport {
        Transport::new(
            Box::new(LineWriter::new(tokio::io::stdout())),
            Box::new(LineReader::new(tokio::io::stdin())),
        )
    }

    /// Transport over a spawned child's pipes
    pub fn child(stdin: ChildStdin, stdout: ChildStdout) -> Transport {
        Transport::new(
            Box::new(LineWriter::new(stdin)),
            Box::new(LineReader::new(stdout)),
        )
    }

    /// Create an in-memory transport pair for testing
    pub fn in_memory_pair() -> (Transport, Transport) {
        let (tx1, rx1) = mpsc::unbounded_channel();
        let (tx2, rx2) = mpsc::unbounded_channel();

        (
            Transport::new(
                Box::new(InMemorySender { sender: Some(tx1) }),
                Box::new(InMemoryReceiver { receiver: rx2 }),
            ),
            Transport::new(
                Box::new(InMemorySender { sender: Some(tx2) }),
                Box::new(InMemoryReceiver { receiver: rx1 }),
            ),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_transport() {
        let (a, b) = TransportFactory::in_memory_pair();
        let (mut a_tx, _a_rx) = a.split();
        let (_b_tx, mut b_rx) = b.split();

        a_tx.send(r#"{"jsonrpc":"2.0","method":"ping","id":1}"#)
            .await
            .unwrap();
        assert_eq!(
            b_rx.receive().await.unwrap(),
            r#"{"jsonrpc":"2.0","method":"ping","id":1}"#
        );

        a_tx.close().await.unwrap();
        assert!(a_tx.send(r#"{"jsonrpc":"2.0","method":"x"}"#).await.is_err());
        assert!(b_rx.receive().await.unwrap_err().is_connection());
    }

    #[test]
    fn test_message_validation() {
        assert!(validate_message(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#).is_ok());
        assert!(validate_message("not json at all").is_err());
        assert!(validate_message(r#"{"jsonrpc":"1.0","id":1}"#).is_err());
        assert!(validate_message("{\"jsonrpc\":\"2.0\",\n\"id\":1}").is_err());
        assert!(validate_message("{\"jsonrpc\":\"2.0\",\r\"id\":1}").is_err());
        assert!(validate_message(r#"{"id":1,"method":"test"}"#).is_err());
        assert!(validate_message(r#"[{"jsonrpc":"2.0","method":"x"}]"#).is_err());
        assert!(validate_message("\"just a string\"").is_err());
    }

    #[tokio::test]
    async fn test_line_framing_over_duplex() {
        let (client, server) = tokio::io::duplex(1024);
        let (server_read, _server_write) = tokio::io::split(server);
        let (_client_read, client_write) = tokio::io::split(client);

        let mut writer = LineWriter::new(client_write);
        let mut reader = LineReader::new(server_read);

        writer
            .send(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#)
            .await
            .unwrap();
        writer
            .send(r#"{"jsonrpc":"2.0","id":2,"method":"ping"}"#)
            .await
            .unwrap();
        assert_eq!(writer.messages_sent(), 2);

        assert!(reader.receive().await.unwrap().contains("\"id\":1"));
        assert!(reader.receive().await.unwrap().contains("\"id\":2"));

        writer.close().await.unwrap();
        assert!(reader.receive().await.unwrap_err().is_connection());
    }

    #[tokio::test]
    async fn test_reader_skips_blank_and_invalid_lines() {
        let input: &[u8] =
            b"\n   \nnot json\n{\"jsonrpc\":\"1.0\"}\r\n{\"jsonrpc\":\"2.0\",\"method\":\"x\"}\r\n";
        let mut reader = LineReader::new(input);

        assert_eq!(
            reader.receive().await.unwrap(),
            r#"{"jsonrpc":"2.0","method":"x"}"#
        );
        assert!(reader.receive().await.unwrap_err().is_connection());
    }

    #[tokio::test]
    async fn test_reader_reassembles_split_frames() {
        let mock = tokio_test::io::Builder::new()
            .read(b"{\"jsonrpc\":\"2.0\",")
            .read(b"\"id\":7,\"result\":{}}\n{\"jsonrpc\"")
            .read(b":\"2.0\",\"method\":\"ping\",\"id\":8}\n")
            .build();
        let mut reader = LineReader::new(mock);

        assert_eq!(
            reader.receive().await.unwrap(),
            r#"{"jsonrpc":"2.0","id":7,"result":{}}"#
        );
        assert_eq!(
            reader.receive().await.unwrap(),
            r#"{"jsonrpc":"2.0","method":"ping","id":8}"#
        );
        assert!(reader.receive().await.unwrap_err().is_connection());
    }

    #[tokio::test]
    async fn test_writer_frames_with_newline() {
        let mock = tokio_test::io::Builder::new()
            .write(b"{\"jsonrpc\":\"2.0\",\"method\":\"ping\",\"id\":1}\n")
            .build();
        let mut writer = LineWriter::new(mock);
        writer
            .send(r#"{"jsonrpc":"2.0","method":"ping","id":1}"#)
            .await
            .unwrap();
        assert_eq!(writer.messages_sent(), 1);
    }

    #[tokio::test]
    async fn test_writer_broken_pipe_is_connection_error() {
        let mock = tokio_test::io::Builder::new()
            .write_error(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "worker exited",
            ))
            .build();
        let mut writer = LineWriter::new(mock);

        let err = writer
            .send(r#"{"jsonrpc":"2.0","method":"ping","id":1}"#)
            .await
            .unwrap_err();
        assert!(err.is_connection());
        // closed after the failure
        assert!(writer
            .send(r#"{"jsonrpc":"2.0","method":"ping","id":2}"#)
            .await
            .unwrap_err()
            .is_connection());
    }

    #[tokio::test]
    async fn test_writer_survives_write_timeout() {
        let (client, server) = tokio::io::duplex(64);
        let mut writer = LineWriter::with_config(client, Duration::from_millis(50), 4096);
        let big = format!(
            r#"{{"jsonrpc":"2.0","method":"note","params":{{"v":"{}"}}}}"#,
            "x".repeat(200)
        );

        // nobody is reading yet
        assert!(writer.send(&big).await.unwrap_err().is_timeout());

        let reader = tokio::spawn(async move {
            let mut reader = LineReader::new(server);
            let first = reader.receive().await.unwrap();
            let second = reader.receive().await.unwrap();
            (first, second)
        });

        writer
            .send(r#"{"jsonrpc":"2.0","method":"ping","id":2}"#)
            .await
            .unwrap();
        let (first, second) = reader.await.unwrap();
        assert_eq!(first, big);
        assert_eq!(second, r#"{"jsonrpc":"2.0","method":"ping","id":2}"#);
        assert_eq!(writer.messages_sent(), 1);
    }

    #[tokio::test]
    async fn test_writer_rejects_invalid_messages() {
        let (client, _server) = tokio::io::duplex(64);
        let mut writer = LineWriter::new(client);
        assert!(writer.send("{\"jsonrpc\":\"2.0\",\n\"x\":1}").await.is_err());
        assert_eq!(writer.messages_sent(), 0);
    }
}
