//! Terminal Connection
//!
//! Two transports to the terminal:
//!
//! - **Reply channel**: every request opens its own socket, writes the frame,
//!   reads until the peer closes, the read ceiling is hit, the configured
//!   terminator arrives or the peer goes quiet after replying, then drops the
//!   socket. The whole read is bounded by `read_timeout`. No pooling, no
//!   retries.
//! - **Stream channel**: one long-lived socket read by a single background
//!   task. Decoded frames are pushed to an `mpsc` channel as
//!   [`StreamEvent`]s. Reads are bounded by the poll interval so the reader
//!   notices `close_stream` even when the terminal is silent.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::infrastructure::config::TerminalSettings;
use crate::infrastructure::metrics;
use crate::infrastructure::protocol::{
    DecodeError, Frame, InboundDecoder, TransformError, WireMode, decode,
};

/// Read buffer size for both channels.
const READ_CHUNK: usize = 4096;

// =============================================================================
// Error Type
// =============================================================================

/// I/O stage that timed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoStage {
    /// Establishing the socket.
    Connect,
    /// Waiting for reply bytes.
    Read,
}

impl std::fmt::Display for IoStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Connect => "connect",
            Self::Read => "read",
        })
    }
}

/// Coarse classification of [`ConnectionError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    /// Socket could not be opened.
    Connect,
    /// Frame could not be written.
    Write,
    /// Reply could not be read.
    Read,
    /// Connect or read exceeded its timeout.
    Timeout,
    /// Peer closed without sending anything.
    Closed,
    /// Reply bytes did not form a valid frame.
    Framing,
    /// Inbound bytes failed the wire-mode transform.
    Transform,
}

/// Errors on either channel.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// Socket could not be opened.
    #[error("failed to connect to {endpoint}: {source}")]
    Connect {
        /// Remote address.
        endpoint: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Frame could not be written.
    #[error("failed to write to {endpoint}: {source}")]
    Write {
        /// Remote address.
        endpoint: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Reply could not be read.
    #[error("failed to read from {endpoint}: {source}")]
    Read {
        /// Remote address.
        endpoint: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Connect or read exceeded its timeout.
    #[error("{stage} timed out after {timeout:?} on {endpoint}")]
    Timeout {
        /// Remote address.
        endpoint: String,
        /// Stage that timed out.
        stage: IoStage,
        /// Configured timeout.
        timeout: Duration,
    },

    /// Peer closed without sending anything.
    #[error("{endpoint} closed the connection without replying")]
    Closed {
        /// Remote address.
        endpoint: String,
    },

    /// Reply bytes did not form a valid frame.
    #[error("malformed reply from {endpoint}: {source}")]
    Decode {
        /// Remote address.
        endpoint: String,
        /// Framing error.
        #[source]
        source: DecodeError,
    },

    /// Inbound bytes failed the wire-mode transform.
    #[error("could not transform reply from {endpoint}: {source}")]
    Transform {
        /// Remote address.
        endpoint: String,
        /// Transform error.
        #[source]
        source: TransformError,
    },
}

impl ConnectionError {
    /// Coarse classification.
    #[must_use]
    pub const fn kind(&self) -> ConnectionErrorKind {
        match self {
            Self::Connect { .. } => ConnectionErrorKind::Connect,
            Self::Write { .. } => ConnectionErrorKind::Write,
            Self::Read { .. } => ConnectionErrorKind::Read,
            Self::Timeout { .. } => ConnectionErrorKind::Timeout,
            Self::Closed { .. } => ConnectionErrorKind::Closed,
            Self::Decode { .. } => ConnectionErrorKind::Framing,
            Self::Transform { .. } => ConnectionErrorKind::Transform,
        }
    }

    /// Remote address the error refers to.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        match self {
            Self::Connect { endpoint, .. }
            | Self::Write { endpoint, .. }
            | Self::Read { endpoint, .. }
            | Self::Timeout { endpoint, .. }
            | Self::Closed { endpoint }
            | Self::Decode { endpoint, .. }
            | Self::Transform { endpoint, .. } => endpoint,
        }
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Connection parameters.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Reply channel address (`host:port`).
    pub reply_endpoint: String,
    /// Stream channel address (`host:port`).
    pub stream_endpoint: String,
    /// Inbound byte encoding.
    pub wire_mode: WireMode,
    /// Socket connect timeout.
    pub connect_timeout: Duration,
    /// Upper bound on reading one reply.
    pub read_timeout: Duration,
    /// Silence after the first reply bytes that ends an unterminated reply.
    pub reply_idle_gap: Duration,
    /// Reply read ceiling in bytes.
    pub max_reply_bytes: usize,
    /// Bounded read interval on the stream channel.
    pub stream_poll_interval: Duration,
    /// Optional frame terminator.
    pub terminator: Option<char>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::from_settings(&TerminalSettings::default())
    }
}

impl ConnectionConfig {
    /// Create configuration for the given endpoints with default timeouts.
    #[must_use]
    pub fn new(reply_endpoint: impl Into<String>, stream_endpoint: impl Into<String>) -> Self {
        Self {
            reply_endpoint: reply_endpoint.into(),
            stream_endpoint: stream_endpoint.into(),
            ..Self::default()
        }
    }

    /// Create configuration from `TerminalSettings`.
    #[must_use]
    pub fn from_settings(settings: &TerminalSettings) -> Self {
        Self {
            reply_endpoint: format!("{}:{}", settings.host, settings.reply_port),
            stream_endpoint: format!("{}:{}", settings.host, settings.stream_port),
            wire_mode: settings.wire_mode,
            connect_timeout: settings.connect_timeout,
            read_timeout: settings.read_timeout,
            reply_idle_gap: settings.reply_idle_gap,
            max_reply_bytes: settings.max_reply_bytes,
            stream_poll_interval: settings.stream_poll_interval,
            terminator: settings.reply_terminator,
        }
    }

    /// Set the wire mode.
    #[must_use]
    pub const fn with_wire_mode(mut self, wire_mode: WireMode) -> Self {
        self.wire_mode = wire_mode;
        self
    }

    /// Set the frame terminator.
    #[must_use]
    pub const fn with_terminator(mut self, terminator: char) -> Self {
        self.terminator = Some(terminator);
        self
    }

    /// Set the reply read timeout.
    #[must_use]
    pub const fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Set the idle gap that ends an unterminated reply.
    #[must_use]
    pub const fn with_reply_idle_gap(mut self, gap: Duration) -> Self {
        self.reply_idle_gap = gap;
        self
    }

    /// Set the stream poll interval.
    #[must_use]
    pub const fn with_stream_poll_interval(mut self, interval: Duration) -> Self {
        self.stream_poll_interval = interval;
        self
    }

    /// Set the reply read ceiling.
    #[must_use]
    pub const fn with_max_reply_bytes(mut self, max: usize) -> Self {
        self.max_reply_bytes = max;
        self
    }
}

// =============================================================================
// Stream State
// =============================================================================

/// Stream channel lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No socket.
    #[default]
    Disconnected,
    /// Socket being opened.
    Connecting,
    /// Reader running.
    Connected,
}

/// Events pushed by the stream reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Socket opened and reader started.
    Connected,
    /// A decoded frame.
    Frame(Frame),
    /// Text that did not decode as a frame.
    Malformed {
        /// Text as received.
        raw: String,
        /// Why it was rejected.
        error: String,
    },
    /// Read or transform failure; the reader is about to exit.
    Error(String),
    /// Reader exited and the socket is closed.
    Disconnected,
}

/// Stream channel status shared with the health endpoint.
#[derive(Debug, Default)]
pub struct StreamStatus {
    state: RwLock<ConnectionState>,
    running: AtomicBool,
    frames_received: AtomicU64,
    last_error: RwLock<Option<String>>,
}

impl StreamStatus {
    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Whether the reader is supposed to be running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Frames decoded since creation.
    #[must_use]
    pub fn frames_received(&self) -> u64 {
        self.frames_received.load(Ordering::Relaxed)
    }

    /// Most recent reader error.
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.write() = state;
    }

    fn record_error(&self, error: String) {
        *self.last_error.write() = Some(error);
    }
}

struct StreamHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

// =============================================================================
// Connection
// =============================================================================

/// Client side of both terminal channels.
pub struct Connection {
    config: ConnectionConfig,
    status: Arc<StreamStatus>,
    stream: Mutex<Option<StreamHandle>>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("config", &self.config)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Create a connection. No socket is opened until used.
    #[must_use]
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            status: Arc::new(StreamStatus::default()),
            stream: Mutex::new(None),
        }
    }

    /// Connection parameters.
    #[must_use]
    pub const fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Shared stream channel status.
    #[must_use]
    pub fn stream_status(&self) -> Arc<StreamStatus> {
        Arc::clone(&self.status)
    }

    /// Stream channel lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.status.state()
    }

    /// Whether the stream reader is running.
    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.status.is_running()
    }

    // -------------------------------------------------------------------------
    // Reply channel
    // -------------------------------------------------------------------------

    /// Send one frame on a fresh reply-channel socket and decode the reply.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError`] on connect, write, read or timeout
    /// failures, when the peer sends nothing, or when the reply does not
    /// transform or decode.
    pub async fn send_request(&self, frame: &Frame) -> Result<Frame, ConnectionError> {
        let endpoint = self.config.reply_endpoint.as_str();
        let wire = frame.encode();
        let started = Instant::now();

        let mut socket = connect(endpoint, self.config.connect_timeout).await?;

        socket
            .write_all(wire.as_bytes())
            .await
            .map_err(|source| ConnectionError::Write {
                endpoint: endpoint.to_string(),
                source,
            })?;

        let text = self.read_reply(&mut socket).await;
        drop(socket);
        let text = text?;
        let text = strip_frame_text(&text, self.config.terminator);

        let reply = decode(text).map_err(|source| ConnectionError::Decode {
            endpoint: endpoint.to_string(),
            source,
        })?;

        tracing::debug!(
            endpoint,
            command = %frame.command,
            reply = %reply.command,
            fields = reply.fields.len(),
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "Reply received"
        );

        Ok(reply)
    }

    /// Read and transform one reply.
    ///
    /// Ends at peer close, the read ceiling, the terminator, or once
    /// `reply_idle_gap` passes without bytes after the reply has started.
    /// Fails with a read timeout only when nothing arrived by the deadline.
    async fn read_reply(&self, socket: &mut TcpStream) -> Result<String, ConnectionError> {
        let endpoint = self.config.reply_endpoint.as_str();
        let max = self.config.max_reply_bytes;
        let deadline = tokio::time::Instant::now() + self.config.read_timeout;
        let transform_error = |source: TransformError| ConnectionError::Transform {
            endpoint: endpoint.to_string(),
            source,
        };

        let mut decoder = InboundDecoder::new(self.config.wire_mode);
        let mut text = String::new();
        let mut received = 0usize;
        let mut chunk = [0u8; READ_CHUNK];

        while received < max {
            let wait_until = if received == 0 {
                deadline
            } else {
                deadline.min(tokio::time::Instant::now() + self.config.reply_idle_gap)
            };

            let read = match tokio::time::timeout_at(wait_until, socket.read(&mut chunk)).await {
                Ok(read) => read.map_err(|source| ConnectionError::Read {
                    endpoint: endpoint.to_string(),
                    source,
                })?,
                Err(_) if received == 0 => {
                    return Err(ConnectionError::Timeout {
                        endpoint: endpoint.to_string(),
                        stage: IoStage::Read,
                        timeout: self.config.read_timeout,
                    });
                }
                Err(_) => {
                    tracing::debug!(endpoint, received, "Reply ended by idle gap");
                    break;
                }
            };

            if read == 0 {
                break;
            }
            let take = read.min(max - received);
            received += take;
            text.push_str(&decoder.push(&chunk[..take]).map_err(transform_error)?);

            if take < read {
                tracing::warn!(endpoint, max, "Reply truncated at read ceiling");
                break;
            }
            if self.config.terminator.is_some_and(|t| text.ends_with(t)) {
                break;
            }
        }

        if received == 0 {
            return Err(ConnectionError::Closed {
                endpoint: endpoint.to_string(),
            });
        }
        text.push_str(&decoder.finish().map_err(transform_error)?);

        Ok(text)
    }

    // -------------------------------------------------------------------------
    // Stream channel
    // -------------------------------------------------------------------------

    /// Open the stream channel and start its reader.
    ///
    /// Events go to `events`. Calling this while the reader is running does
    /// nothing.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError`] if the socket cannot be opened.
    pub async fn open_stream(
        &self,
        events: mpsc::Sender<StreamEvent>,
    ) -> Result<(), ConnectionError> {
        if self
            .status
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("Stream channel already open");
            return Ok(());
        }

        let endpoint = self.config.stream_endpoint.clone();
        self.status.set_state(ConnectionState::Connecting);
        tracing::info!(endpoint = %endpoint, "Opening stream channel");

        let socket = match connect(&endpoint, self.config.connect_timeout).await {
            Ok(socket) => socket,
            Err(e) => {
                self.status.running.store(false, Ordering::SeqCst);
                self.status.set_state(ConnectionState::Disconnected);
                self.status.record_error(e.to_string());
                return Err(e);
            }
        };

        self.status.set_state(ConnectionState::Connected);

        let cancel = CancellationToken::new();
        let reader = StreamReader {
            socket,
            endpoint,
            events,
            cancel: cancel.clone(),
            status: Arc::clone(&self.status),
            decoder: InboundDecoder::new(self.config.wire_mode),
            poll_interval: self.config.stream_poll_interval,
            terminator: self.config.terminator,
            pending: String::new(),
        };
        let task = tokio::spawn(reader.run());

        let previous = self.stream.lock().replace(StreamHandle { cancel, task });
        if let Some(previous) = previous {
            // The old reader already exited on its own; make sure it is gone.
            previous.cancel.cancel();
            previous.task.abort();
            tracing::debug!(
                endpoint = %self.config.stream_endpoint,
                "Replaced finished stream reader"
            );
        }

        Ok(())
    }

    /// Stop the stream reader and close its socket.
    ///
    /// Returns once the reader has exited. Closing an idle channel does
    /// nothing.
    pub async fn close_stream(&self) {
        self.status.running.store(false, Ordering::SeqCst);

        let handle = self.stream.lock().take();
        if let Some(handle) = handle {
            handle.cancel.cancel();
            if let Err(e) = handle.task.await {
                tracing::warn!(error = %e, "Stream reader ended abnormally");
            }
            tracing::info!(endpoint = %self.config.stream_endpoint, "Stream channel closed");
        }

        self.status.set_state(ConnectionState::Disconnected);
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(handle) = self.stream.get_mut().take() {
            handle.cancel.cancel();
        }
    }
}

async fn connect(endpoint: &str, timeout: Duration) -> Result<TcpStream, ConnectionError> {
    tokio::time::timeout(timeout, TcpStream::connect(endpoint))
        .await
        .map_err(|_| ConnectionError::Timeout {
            endpoint: endpoint.to_string(),
            stage: IoStage::Connect,
            timeout,
        })?
        .map_err(|source| ConnectionError::Connect {
            endpoint: endpoint.to_string(),
            source,
        })
}

/// Drop the terminator and trailing line noise some terminals append.
fn strip_frame_text(text: &str, terminator: Option<char>) -> &str {
    let text = text.trim_end_matches(['\0', '\r', '\n']);
    match terminator {
        Some(t) => text.strip_suffix(t).unwrap_or(text),
        None => text,
    }
}

// =============================================================================
// Stream Reader
// =============================================================================

struct StreamReader {
    socket: TcpStream,
    endpoint: String,
    events: mpsc::Sender<StreamEvent>,
    cancel: CancellationToken,
    status: Arc<StreamStatus>,
    decoder: InboundDecoder,
    poll_interval: Duration,
    terminator: Option<char>,
    pending: String,
}

impl StreamReader {
    async fn run(mut self) {
        let mut buf = vec![0u8; READ_CHUNK];
        let mut exit_error = None;

        self.emit(StreamEvent::Connected).await;

        while self.status.is_running() {
            let read = tokio::select! {
                () = self.cancel.cancelled() => break,
                read = tokio::time::timeout(self.poll_interval, self.socket.read(&mut buf)) => read,
            };

            match read {
                // Idle; loop to recheck `running`.
                Err(_) => {}
                Ok(Ok(0)) => {
                    tracing::info!(endpoint = %self.endpoint, "Stream channel closed by peer");
                    break;
                }
                Ok(Ok(n)) => {
                    if let Err(e) = self.handle_bytes(&buf[..n]).await {
                        exit_error = Some(e);
                        break;
                    }
                }
                Ok(Err(e)) => {
                    exit_error = Some(format!("read failed: {e}"));
                    break;
                }
            }
        }

        let cancelled = self.cancel.is_cancelled();
        if !cancelled {
            self.status.running.store(false, Ordering::SeqCst);
            self.status.set_state(ConnectionState::Disconnected);
        }

        if let Some(error) = exit_error {
            tracing::warn!(endpoint = %self.endpoint, error = %error, "Stream reader stopped");
            self.status.record_error(error.clone());
            let _ = self.events.try_send(StreamEvent::Error(error));
        }
        let _ = self.events.try_send(StreamEvent::Disconnected);

        tracing::debug!(endpoint = %self.endpoint, cancelled, "Stream reader exited");
    }

    async fn handle_bytes(&mut self, bytes: &[u8]) -> Result<(), String> {
        let text = self
            .decoder
            .push(bytes)
            .map_err(|e| format!("transform failed: {e}"))?;

        let Some(terminator) = self.terminator else {
            self.handle_text(&text).await;
            return Ok(());
        };

        self.pending.push_str(&text);
        while let Some(end) = self.pending.find(terminator) {
            let complete: String = self.pending.drain(..end + terminator.len_utf8()).collect();
            self.handle_text(&complete[..end]).await;
        }

        Ok(())
    }

    async fn handle_text(&self, text: &str) {
        let text = strip_frame_text(text, None).trim_start_matches(['\r', '\n']);
        if text.is_empty() {
            return;
        }

        let event = match decode(text) {
            Ok(frame) => {
                self.status.frames_received.fetch_add(1, Ordering::Relaxed);
                metrics::record_stream_frame("ok");
                StreamEvent::Frame(frame)
            }
            Err(e) => {
                metrics::record_stream_frame(e.kind());
                tracing::warn!(endpoint = %self.endpoint, error = %e, "Malformed stream frame");
                StreamEvent::Malformed {
                    raw: text.to_string(),
                    error: e.to_string(),
                }
            }
        };

        self.emit(event).await;
    }

    async fn emit(&self, event: StreamEvent) {
        tokio::select! {
            () = self.cancel.cancelled() => {}
            sent = self.events.send(event) => {
                if sent.is_err() {
                    tracing::debug!(endpoint = %self.endpoint, "Stream event receiver dropped");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn config_from_settings() {
        let settings = TerminalSettings {
            host: "10.1.1.1".to_string(),
            reply_terminator: Some('!'),
            ..TerminalSettings::default()
        };
        let config = ConnectionConfig::from_settings(&settings);
        assert_eq!(config.reply_endpoint, "10.1.1.1:15556");
        assert_eq!(config.stream_endpoint, "10.1.1.1:15557");
        assert_eq!(config.terminator, Some('!'));
        assert_eq!(config.max_reply_bytes, 65_536);
        assert_eq!(config.reply_idle_gap, Duration::from_millis(200));
    }

    #[test_case("F000^1^", None, "F000^1^" ; "untouched")]
    #[test_case("F000^1^\r\n", None, "F000^1^" ; "line ending")]
    #[test_case("F000^1^\0", None, "F000^1^" ; "nul")]
    #[test_case("F000^1^!", Some('!'), "F000^1^" ; "terminator")]
    #[test_case("F000^1^!\n", Some('!'), "F000^1^" ; "terminator then newline")]
    fn strips_frame_text(input: &str, terminator: Option<char>, expected: &str) {
        assert_eq!(strip_frame_text(input, terminator), expected);
    }

    #[test]
    fn error_kind_and_endpoint() {
        let err = ConnectionError::Closed {
            endpoint: "127.0.0.1:1".to_string(),
        };
        assert_eq!(err.kind(), ConnectionErrorKind::Closed);
        assert_eq!(err.endpoint(), "127.0.0.1:1");

        let err = ConnectionError::Timeout {
            endpoint: "h:2".to_string(),
            stage: IoStage::Read,
            timeout: Duration::from_millis(5),
        };
        assert_eq!(err.kind(), ConnectionErrorKind::Timeout);
        assert!(err.to_string().starts_with("read timed out"));
    }

    #[test]
    fn new_connection_is_idle() {
        let connection = Connection::new(ConnectionConfig::default());
        assert_eq!(connection.state(), ConnectionState::Disconnected);
        assert!(!connection.is_streaming());
        assert_eq!(connection.stream_status().frames_received(), 0);
    }

    #[tokio::test]
    async fn close_without_open_is_noop() {
        let connection = Connection::new(ConnectionConfig::default());
        connection.close_stream().await;
        assert_eq!(connection.state(), ConnectionState::Disconnected);
    }
}
