//! MCP transport implementations.
//!
//! A transport moves newline-free JSON-RPC payloads between the session task and
//! a server. Three are provided:
//! - [`StdioTransport`]: a child process speaking newline-delimited JSON on stdin/stdout
//! - [`StreamableHttpTransport`]: MCP streamable HTTP (POST + optional GET event stream)
//! - [`MemoryTransport`]: an in-process channel pair, used to script servers in tests
//!
//! `receive` must be cancel-safe: the session task polls it inside `select!`.
//! Every implementation therefore reads from an internal channel fed by a
//! background reader task.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::StatusCode;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::error::TransportError;
use crate::protocol::RequestId;
use crate::sse::SseDecoder;

const EVENT_STREAM: &str = "text/event-stream";
const SESSION_ID_HEADER: &str = "mcp-session-id";
const PROTOCOL_VERSION_HEADER: &str = "mcp-protocol-version";

/// Something the transport delivers to the session.
#[derive(Debug)]
pub enum Inbound {
    /// A raw JSON-RPC payload (single message or batch).
    Message(String),
    /// The transport could not deliver one specific request.
    RequestFailed {
        id: RequestId,
        error: TransportError,
    },
}

/// Trait for MCP transport implementations.
#[async_trait]
pub trait Transport: Send {
    /// Send one JSON-RPC payload.
    async fn send(&mut self, message: String) -> Result<(), TransportError>;

    /// Wait for the next inbound item. Cancel-safe.
    async fn receive(&mut self) -> Result<Inbound, TransportError>;

    /// Close the connection, waiting at most `grace` for a clean exit.
    async fn close(&mut self, grace: Duration) -> Result<(), TransportError>;

    /// Check if the transport is connected.
    fn is_connected(&self) -> bool;
}

/// How to reach a server.
#[derive(Debug, Clone)]
pub enum TransportConfig {
    /// Spawn a local process.
    Stdio {
        command: String,
        args: Vec<String>,
        env: HashMap<String, String>,
        working_dir: Option<PathBuf>,
    },
    /// Connect to a streamable HTTP endpoint.
    Http {
        url: String,
        headers: HeaderMap,
        connect_timeout: Duration,
        sse_read_timeout: Duration,
    },
}

impl TransportConfig {
    /// Human-readable target used in logs and diagnostics.
    pub fn describe(&self) -> String {
        match self {
            TransportConfig::Stdio { command, args, .. } if args.is_empty() => command.clone(),
            TransportConfig::Stdio { command, args, .. } => format!("{} {}", command, args.join(" ")),
            TransportConfig::Http { url, .. } => url.clone(),
        }
    }

    /// Open the transport.
    pub async fn open(self) -> Result<Box<dyn Transport>, TransportError> {
        match self {
            TransportConfig::Stdio {
                command,
                args,
                env,
                working_dir,
            } => Ok(Box::new(
                StdioTransport::spawn(&command, &args, env, working_dir.as_ref()).await?,
            )),
            TransportConfig::Http {
                url,
                headers,
                connect_timeout,
                sse_read_timeout,
            } => Ok(Box::new(StreamableHttpTransport::new(
                url,
                headers,
                connect_timeout,
                sse_read_timeout,
            )?)),
        }
    }
}

/// Make sure `Accept` advertises `text/event-stream`.
///
/// An explicit caller value is kept and the event-stream type is appended to it.
pub fn merge_accept_header(headers: &mut HeaderMap) {
    let merged = match headers.get(ACCEPT).and_then(|v| v.to_str().ok()) {
        None => format!("application/json, {}", EVENT_STREAM),
        Some(current) if current.to_ascii_lowercase().contains(EVENT_STREAM) => return,
        Some(current) if current.trim().is_empty() => format!("application/json, {}", EVENT_STREAM),
        Some(current) => format!("{}, {}", current, EVENT_STREAM),
    };
    if let Ok(value) = HeaderValue::from_str(&merged) {
        headers.insert(ACCEPT, value);
    }
}

/// Build a header map from string pairs.
pub fn header_map<'a>(
    pairs: impl IntoIterator<Item = (&'a String, &'a String)>,
) -> Result<HeaderMap, TransportError> {
    let mut headers = HeaderMap::new();
    for (name, value) in pairs {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| TransportError::InvalidHeader(name.clone()))?;
        let header_value =
            HeaderValue::from_str(value).map_err(|_| TransportError::InvalidHeader(name.clone()))?;
        headers.insert(header_name, header_value);
    }
    Ok(headers)
}

// ============================================================================
// stdio
// ============================================================================

/// Number of stderr lines a stdio transport remembers.
const STDERR_TAIL_LINES: usize = 20;

/// Standard I/O transport for MCP servers.
///
/// Spawns a child process and exchanges newline-delimited JSON over its
/// stdin/stdout. Stderr is drained into `debug` logs and its last lines are
/// kept for diagnostics.
pub struct StdioTransport {
    child: Child,
    stdin: Option<ChildStdin>,
    lines: mpsc::UnboundedReceiver<std::io::Result<String>>,
    reader: tokio::task::JoinHandle<()>,
    stderr_tail: Arc<Mutex<VecDeque<String>>>,
    stderr_drain: tokio::task::JoinHandle<()>,
    connected: bool,
}

impl StdioTransport {
    /// Spawn a new stdio transport.
    pub async fn spawn(
        command: &str,
        args: &[String],
        env: HashMap<String, String>,
        working_dir: Option<&PathBuf>,
    ) -> Result<Self, TransportError> {
        debug!(command = command, args = ?args, "Spawning MCP server process");

        let mut cmd = Command::new(command);
        cmd.args(args)
            .envs(&env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(TransportError::SpawnFailed)?;

        let stdin = child.stdin.take().ok_or_else(|| {
            TransportError::SpawnFailed(std::io::Error::other("failed to capture stdin"))
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            TransportError::SpawnFailed(std::io::Error::other("failed to capture stdout"))
        })?;
        let stderr = child.stderr.take().ok_or_else(|| {
            TransportError::SpawnFailed(std::io::Error::other("failed to capture stderr"))
        })?;

        let stderr_tail = Arc::new(Mutex::new(VecDeque::with_capacity(STDERR_TAIL_LINES)));
        let stderr_drain = {
            let tail = stderr_tail.clone();
            let server = command.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(server = %server, "stderr: {}", line);
                    let mut tail = tail.lock();
                    if tail.len() == STDERR_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line);
                }
            })
        };

        let (tx, lines) = mpsc::unbounded_channel();
        let reader = tokio::spawn(async move {
            let mut stdout = BufReader::new(stdout).lines();
            loop {
                match stdout.next_line().await {
                    Ok(Some(line)) if line.trim().is_empty() => continue,
                    Ok(Some(line)) => {
                        if tx.send(Ok(line)).is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        let _ = tx.send(Err(e));
                        break;
                    }
                }
            }
        });

        debug!(pid = ?child.id(), "MCP server process spawned");

        Ok(Self {
            child,
            stdin: Some(stdin),
            lines,
            reader,
            stderr_tail,
            stderr_drain,
            connected: true,
        })
    }

    /// Get the process ID of the child process.
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Most recent lines the server wrote to stderr, oldest first.
    pub fn stderr_tail(&self) -> Vec<String> {
        self.stderr_tail.lock().iter().cloned().collect()
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn send(&mut self, message: String) -> Result<(), TransportError> {
        let stdin = match (self.connected, self.stdin.as_mut()) {
            (true, Some(stdin)) => stdin,
            _ => return Err(TransportError::NotConnected),
        };

        debug!(message = %message, "Sending message to MCP server");

        let mut line = message.into_bytes();
        line.push(b'\n');
        stdin.write_all(&line).await.map_err(TransportError::WriteError)?;
        stdin.flush().await.map_err(TransportError::WriteError)?;
        Ok(())
    }

    async fn receive(&mut self) -> Result<Inbound, TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }

        match self.lines.recv().await {
            Some(Ok(line)) => {
                debug!(message = %line, "Received message from MCP server");
                Ok(Inbound::Message(line))
            }
            Some(Err(e)) => {
                self.connected = false;
                Err(TransportError::ReadError(e))
            }
            None => {
                self.connected = false;
                Err(TransportError::ConnectionClosed)
            }
        }
    }

    async fn close(&mut self, grace: Duration) -> Result<(), TransportError> {
        if !self.connected && self.stdin.is_none() {
            return Ok(());
        }

        debug!("Closing MCP server transport");
        self.connected = false;
        // Closing stdin is the polite shutdown signal for stdio servers.
        drop(self.stdin.take());
        self.reader.abort();

        if let Some(pid) = self.child.id() {
            #[cfg(unix)]
            {
                use nix::sys::signal::{kill, Signal};
                use nix::unistd::Pid;

                debug!(pid = pid, "Sending SIGTERM to MCP server");
                let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
            }

            tokio::select! {
                _ = self.child.wait() => {
                    debug!("MCP server exited gracefully");
                }
                _ = tokio::time::sleep(grace) => {
                    warn!(pid = pid, "MCP server did not exit within grace period, killing");
                    let _ = self.child.kill().await;
                }
            }
        }

        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

impl Drop for StdioTransport {
    fn drop(&mut self) {
        // kill_on_drop reaps the child
        self.reader.abort();
        self.stderr_drain.abort();
    }
}

// ============================================================================
// Streamable HTTP
// ============================================================================

/// State shared between the transport and its in-flight HTTP tasks.
#[derive(Debug, Default)]
struct HttpSession {
    session_id: RwLock<Option<String>>,
    protocol_version: RwLock<Option<String>>,
}

/// MCP streamable HTTP transport.
///
/// Each outgoing request is a POST whose response is JSON, an event stream,
/// or `202 Accepted` with no body. Requests are posted from background tasks so
/// long-running tool calls do not stall the session; notifications and replies
/// are posted inline to keep their ordering relative to later requests.
pub struct StreamableHttpTransport {
    client: reqwest::Client,
    url: String,
    headers: HeaderMap,
    session: Arc<HttpSession>,
    inbound_tx: mpsc::UnboundedSender<Inbound>,
    inbound_rx: mpsc::UnboundedReceiver<Inbound>,
    tasks: JoinSet<()>,
    listening: bool,
    connected: bool,
}

impl StreamableHttpTransport {
    /// Create a transport for `url`. Nothing is sent until the first message.
    pub fn new(
        url: impl Into<String>,
        mut headers: HeaderMap,
        connect_timeout: Duration,
        sse_read_timeout: Duration,
    ) -> Result<Self, TransportError> {
        merge_accept_header(&mut headers);

        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .read_timeout(sse_read_timeout)
            .build()
            .map_err(|e| TransportError::Http(e.to_string()))?;

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        Ok(Self {
            client,
            url: url.into(),
            headers,
            session: Arc::new(HttpSession::default()),
            inbound_tx,
            inbound_rx,
            tasks: JoinSet::new(),
            listening: false,
            connected: true,
        })
    }

    /// Session id assigned by the server, once known.
    pub fn session_id(&self) -> Option<String> {
        self.session.session_id.read().clone()
    }

    fn request(&self, method: reqwest::Method) -> reqwest::RequestBuilder {
        let mut request = self.client.request(method, &self.url).headers(self.headers.clone());
        if let Some(ref id) = *self.session.session_id.read() {
            request = request.header(SESSION_ID_HEADER, id);
        }
        if let Some(ref version) = *self.session.protocol_version.read() {
            request = request.header(PROTOCOL_VERSION_HEADER, version);
        }
        request
    }

    /// Open the optional GET stream for server-initiated messages.
    fn start_listening(&mut self) {
        if self.listening {
            return;
        }
        self.listening = true;

        let request = self
            .request(reqwest::Method::GET)
            .header(ACCEPT, EVENT_STREAM);
        let inbound = self.inbound_tx.clone();

        self.tasks.spawn(async move {
            match request.send().await {
                Ok(response) if response.status() == StatusCode::METHOD_NOT_ALLOWED => {
                    debug!("Server does not offer a GET event stream");
                }
                Ok(response) if response.status().is_success() => {
                    debug!("Listening for server-initiated messages");
                    pump_event_stream(response, &inbound, None, None).await;
                }
                Ok(response) => {
                    debug!(status = %response.status(), "GET event stream refused");
                }
                Err(e) => debug!(error = %e, "GET event stream failed"),
            }
        });
    }
}

/// Classify an outgoing payload: `(request id, method)`.
fn outgoing_shape(message: &str) -> (Option<RequestId>, Option<String>) {
    let Ok(value) = serde_json::from_str::<Value>(message) else {
        return (None, None);
    };
    let method = value.get("method").and_then(Value::as_str).map(str::to_string);
    let id = value
        .get("id")
        .cloned()
        .and_then(|id| serde_json::from_value::<RequestId>(id).ok());
    (id, method)
}

/// POST one payload and forward whatever comes back.
async fn post_message(
    request: reqwest::RequestBuilder,
    body: String,
    id: Option<RequestId>,
    capture_version: bool,
    session: Arc<HttpSession>,
    inbound: mpsc::UnboundedSender<Inbound>,
) -> Result<(), TransportError> {
    let response = request
        .header(CONTENT_TYPE, "application/json")
        .body(body)
        .send()
        .await
        .map_err(|e| TransportError::Http(e.to_string()))?;

    let status = response.status();
    if let Some(sid) = response
        .headers()
        .get(SESSION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
    {
        let mut current = session.session_id.write();
        if current.as_deref() != Some(sid) {
            debug!(session_id = sid, "Server assigned MCP session id");
            *current = Some(sid.to_string());
        }
    }

    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        let body = response.text().await.unwrap_or_default();
        return Err(TransportError::Unauthorized {
            status: status.as_u16(),
            body,
        });
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(TransportError::HttpStatus {
            status: status.as_u16(),
            body,
        });
    }
    if status == StatusCode::ACCEPTED {
        return Ok(());
    }

    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_ascii_lowercase();

    if content_type.starts_with(EVENT_STREAM) {
        let version_slot = capture_version.then_some(&session);
        let answered = pump_event_stream(response, &inbound, version_slot, id.as_ref()).await;
        if id.is_some() && !answered {
            return Err(TransportError::Http(
                "event stream ended before the response arrived".to_string(),
            ));
        }
        return Ok(());
    }

    let text = response
        .text()
        .await
        .map_err(|e| TransportError::Http(e.to_string()))?;
    if text.trim().is_empty() {
        if id.is_some() {
            return Err(TransportError::Http("empty response body".to_string()));
        }
        return Ok(());
    }
    if capture_version {
        remember_protocol_version(&session, &text);
    }
    let _ = inbound.send(Inbound::Message(text));
    Ok(())
}

/// Forward every message event of an SSE body.
///
/// Returns whether a response to `expect` went by.
async fn pump_event_stream(
    response: reqwest::Response,
    inbound: &mpsc::UnboundedSender<Inbound>,
    version_slot: Option<&Arc<HttpSession>>,
    expect: Option<&RequestId>,
) -> bool {
    let mut decoder = SseDecoder::new();
    let mut body = response.bytes_stream();
    let mut answered = false;

    let mut forward = |data: String| {
        if let Some(session) = version_slot {
            remember_protocol_version(session, &data);
        }
        if let Some(expected) = expect {
            answered |= is_response_to(&data, expected);
        }
        inbound.send(Inbound::Message(data)).is_ok()
    };

    while let Some(chunk) = body.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                debug!(error = %e, "Event stream ended with error");
                break;
            }
        };
        for event in decoder.feed(&chunk) {
            if event.is_message() && !event.data.trim().is_empty() && !forward(event.data) {
                return true;
            }
        }
    }
    if let Some(event) = decoder.finish() {
        if event.is_message() && !event.data.trim().is_empty() {
            forward(event.data);
        }
    }
    answered
}

fn is_response_to(payload: &str, expected: &RequestId) -> bool {
    let Ok(value) = serde_json::from_str::<Value>(payload) else {
        return false;
    };
    let items = match value {
        Value::Array(items) => items,
        single => vec![single],
    };
    items.iter().any(|item| {
        item.get("method").is_none()
            && item
                .get("id")
                .and_then(|id| serde_json::from_value::<RequestId>(id.clone()).ok())
                .as_ref()
                == Some(expected)
    })
}

fn remember_protocol_version(session: &HttpSession, payload: &str) {
    let version = serde_json::from_str::<Value>(payload).ok().and_then(|v| {
        v.pointer("/result/protocolVersion")
            .and_then(Value::as_str)
            .map(str::to_string)
    });
    if let Some(version) = version {
        *session.protocol_version.write() = Some(version);
    }
}

#[async_trait]
impl Transport for StreamableHttpTransport {
    async fn send(&mut self, message: String) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }

        // Reap finished POST tasks.
        while self.tasks.try_join_next().is_some() {}

        let (id, method) = outgoing_shape(&message);
        let request = self.request(reqwest::Method::POST);
        let session = self.session.clone();
        let inbound = self.inbound_tx.clone();

        debug!(url = %self.url, method = ?method, "POST to MCP server");

        match (id, method.as_deref()) {
            // Requests: post in the background, failures are reported per id.
            (Some(id), Some(method)) => {
                let capture_version = method == "initialize";
                self.tasks.spawn(async move {
                    let result = post_message(
                        request,
                        message,
                        Some(id.clone()),
                        capture_version,
                        session,
                        inbound.clone(),
                    )
                    .await;
                    if let Err(error) = result {
                        let _ = inbound.send(Inbound::RequestFailed { id, error });
                    }
                });
                Ok(())
            }
            // Notifications and replies to server requests.
            (_, method) => {
                let initialized = method == Some("notifications/initialized");
                post_message(request, message, None, false, session, inbound).await?;
                if initialized {
                    self.start_listening();
                }
                Ok(())
            }
        }
    }

    async fn receive(&mut self) -> Result<Inbound, TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        // The transport keeps a sender alive, so this only ends on close.
        self.inbound_rx.recv().await.ok_or(TransportError::ConnectionClosed)
    }

    async fn close(&mut self, grace: Duration) -> Result<(), TransportError> {
        if !self.connected {
            return Ok(());
        }
        self.connected = false;
        self.tasks.abort_all();

        if self.session_id().is_some() {
            let request = self.request(reqwest::Method::DELETE);
            match tokio::time::timeout(grace, request.send()).await {
                Ok(Ok(response)) => debug!(status = %response.status(), "MCP session terminated"),
                Ok(Err(e)) => debug!(error = %e, "Failed to terminate MCP session"),
                Err(_) => debug!("Timed out terminating MCP session"),
            }
        }

        info!(url = %self.url, "HTTP transport closed");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

// ============================================================================
// In-memory
// ============================================================================

/// Server side of a [`MemoryTransport`].
///
/// The receiving methods block the calling thread, so a scripted server can run
/// on a plain `std::thread` next to the blocking client API.
pub struct MemoryPeer {
    to_client: mpsc::UnboundedSender<String>,
    from_client: mpsc::UnboundedReceiver<String>,
}

impl MemoryPeer {
    /// Block until the client sends a message. `None` once the client closed.
    pub fn recv(&mut self) -> Option<Value> {
        loop {
            let text = self.from_client.blocking_recv()?;
            match serde_json::from_str(&text) {
                Ok(value) => return Some(value),
                Err(e) => warn!(error = %e, "MemoryPeer dropped a non-JSON message"),
            }
        }
    }

    /// Send a message to the client. Returns false if the client is gone.
    pub fn send(&self, message: Value) -> bool {
        self.to_client.send(message.to_string()).is_ok()
    }

    /// Send a raw payload to the client.
    pub fn send_raw(&self, payload: impl Into<String>) -> bool {
        self.to_client.send(payload.into()).is_ok()
    }
}

/// In-process transport connected to a [`MemoryPeer`].
pub struct MemoryTransport {
    to_server: Option<mpsc::UnboundedSender<String>>,
    from_server: mpsc::UnboundedReceiver<String>,
    connected: bool,
}

impl MemoryTransport {
    /// Create a connected transport/peer pair.
    pub fn pair() -> (MemoryTransport, MemoryPeer) {
        let (to_server, from_client) = mpsc::unbounded_channel();
        let (to_client, from_server) = mpsc::unbounded_channel();
        (
            MemoryTransport {
                to_server: Some(to_server),
                from_server,
                connected: true,
            },
            MemoryPeer {
                to_client,
                from_client,
            },
        )
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&mut self, message: String) -> Result<(), TransportError> {
        let sender = self.to_server.as_ref().ok_or(TransportError::NotConnected)?;
        sender
            .send(message)
            .map_err(|_| TransportError::ConnectionClosed)
    }

    async fn receive(&mut self) -> Result<Inbound, TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        match self.from_server.recv().await {
            Some(message) => Ok(Inbound::Message(message)),
            None => {
                self.connected = false;
                Err(TransportError::ConnectionClosed)
            }
        }
    }

    async fn close(&mut self, _grace: Duration) -> Result<(), TransportError> {
        self.connected = false;
        self.to_server = None;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}
