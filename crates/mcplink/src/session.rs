//! MCP session: connection state machine and request correlation.
//!
//! A session owns one transport through a long-lived task running on the
//! background runtime. Callers talk to that task over channels:
//! - outgoing payloads go through an mpsc queue, preserving submission order
//! - each request parks a oneshot sender in the pending map, keyed by its id
//! - server-initiated requests are answered by the [`CallbackRouter`]
//!
//! When the task dies, every pending request fails with `ConnectionLost`, the
//! cause is kept for the next caller, and the session refuses further work.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::callbacks::CallbackRouter;
use crate::error::{Error, Result, TransportError};
use crate::protocol::{
    CallToolParams, CallToolResult, ClientInfo, GetPromptParams, GetPromptResult,
    IncomingMessage, InitializeParams, InitializeResult, JsonRpcNotification, JsonRpcRequest,
    JsonRpcResponse, ListPromptsResult, ListResourcesResult, ListToolsResult, PaginatedParams,
    PromptDefinition, ReadResourceParams, ReadResourceResult, RequestId, ResourceDefinition,
    ServerCapabilities, ServerInfo, ToolDefinition, MCP_PROTOCOL_VERSION,
};
use crate::transport::{Inbound, Transport, TransportConfig};

/// Session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unconnected,
    Connecting,
    Ready,
    Closing,
    Closed,
    /// Absorbing: the connection died or never came up.
    Failed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Unconnected => "unconnected",
            Self::Connecting => "connecting",
            Self::Ready => "ready",
            Self::Closing => "closing",
            Self::Closed => "closed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

type Reply = Result<Value>;

struct Inner {
    state: SessionState,
    pending: HashMap<RequestId, oneshot::Sender<Reply>>,
    /// Cause of death, handed to the next caller once.
    failure: Option<Error>,
    initialized: Option<InitializeResult>,
    outgoing: Option<mpsc::UnboundedSender<String>>,
    shutdown: Option<oneshot::Sender<Duration>>,
    task: Option<JoinHandle<()>>,
}

impl Inner {
    /// Mark the session dead and fail everything in flight.
    fn fail(&mut self, error: Error) {
        if matches!(self.state, SessionState::Closing | SessionState::Closed) {
            self.drain_pending("session closed");
            return;
        }
        warn!(error = %error, "MCP session failed");
        self.state = SessionState::Failed;
        self.drain_pending(&error.to_string());
        self.failure = Some(error);
        self.outgoing = None;
    }

    fn drain_pending(&mut self, reason: &str) {
        for (_, waiter) in self.pending.drain() {
            let _ = waiter.send(Err(Error::ConnectionLost(reason.to_string())));
        }
    }

    /// Error to report for an operation attempted outside `Ready`.
    fn unusable(&mut self) -> Error {
        match self.state {
            SessionState::Failed => self.failure.take().unwrap_or(Error::NotConnected),
            _ => Error::NotConnected,
        }
    }
}

/// One protocol session with one server.
pub struct McpSession {
    target: String,
    client_info: ClientInfo,
    router: Arc<CallbackRouter>,
    next_id: AtomicU64,
    inner: Arc<Mutex<Inner>>,
}

impl McpSession {
    /// Create an unconnected session.
    pub fn new(target: impl Into<String>, client_info: ClientInfo, router: CallbackRouter) -> Self {
        Self {
            target: target.into(),
            client_info,
            router: Arc::new(router),
            next_id: AtomicU64::new(1),
            inner: Arc::new(Mutex::new(Inner {
                state: SessionState::Unconnected,
                pending: HashMap::new(),
                failure: None,
                initialized: None,
                outgoing: None,
                shutdown: None,
                task: None,
            })),
        }
    }

    /// Target this session talks to (command line or URL).
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    /// Whether the handshake has completed.
    pub fn is_initialized(&self) -> bool {
        self.inner.lock().initialized.is_some()
    }

    /// Server capabilities from the handshake.
    pub fn server_capabilities(&self) -> Option<ServerCapabilities> {
        self.inner
            .lock()
            .initialized
            .as_ref()
            .map(|i| i.capabilities.clone())
    }

    /// Server identity from the handshake.
    pub fn server_info(&self) -> Option<ServerInfo> {
        self.inner
            .lock()
            .initialized
            .as_ref()
            .map(|i| i.server_info.clone())
    }

    /// Open the transport described by `config` and start the session task.
    ///
    /// Must run on the background runtime.
    pub async fn connect(&self, config: TransportConfig) -> Result<()> {
        self.begin_connect()?;
        info!(target = %self.target, "Connecting to MCP server");

        match config.open().await {
            Ok(transport) => self.attach(transport),
            Err(e) => {
                let error = Error::from_transport(&self.target, e);
                let mut inner = self.inner.lock();
                inner.state = SessionState::Failed;
                inner.failure = None;
                Err(error)
            }
        }
    }

    /// Start the session task over an already-open transport.
    ///
    /// Must run on the background runtime.
    pub async fn connect_with(&self, transport: Box<dyn Transport>) -> Result<()> {
        self.begin_connect()?;
        self.attach(transport)
    }

    fn begin_connect(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.state != SessionState::Unconnected {
            return Err(Error::invalid_state("unconnected", inner.state.to_string()));
        }
        inner.state = SessionState::Connecting;
        Ok(())
    }

    fn attach(&self, transport: Box<dyn Transport>) -> Result<()> {
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let task = tokio::spawn(run_session(SessionTask {
            target: self.target.clone(),
            transport,
            outgoing_rx,
            replies: outgoing_tx.clone(),
            shutdown_rx,
            inner: self.inner.clone(),
            router: self.router.clone(),
        }));

        let mut inner = self.inner.lock();
        inner.outgoing = Some(outgoing_tx);
        inner.shutdown = Some(shutdown_tx);
        inner.task = Some(task);
        inner.state = SessionState::Ready;
        debug!(target = %self.target, "MCP transport open");
        Ok(())
    }

    /// Perform the handshake. A second call returns the cached result.
    pub async fn initialize(&self) -> Result<InitializeResult> {
        if let Some(done) = self.inner.lock().initialized.clone() {
            return Ok(done);
        }

        debug!(target = %self.target, "Initializing MCP session");

        let params = InitializeParams {
            protocol_version: MCP_PROTOCOL_VERSION.to_string(),
            capabilities: self.router.capabilities(),
            client_info: self.client_info.clone(),
        };
        let raw = self.send_request("initialize", Some(params)).await?;
        let result: InitializeResult = serde_json::from_value(raw)
            .map_err(|e| Error::protocol(format!("invalid initialize result: {}", e)))?;

        self.notify::<()>("notifications/initialized", None)?;
        self.inner.lock().initialized = Some(result.clone());

        info!(
            target = %self.target,
            server_name = %result.server_info.name,
            protocol_version = %result.protocol_version,
            "MCP session initialized"
        );

        Ok(result)
    }

    /// List every tool, following pagination.
    pub async fn list_tools(&self) -> Result<Vec<ToolDefinition>> {
        self.paginate("tools/list", |page: ListToolsResult| (page.tools, page.next_cursor))
            .await
    }

    /// List every resource, following pagination.
    pub async fn list_resources(&self) -> Result<Vec<ResourceDefinition>> {
        self.paginate("resources/list", |page: ListResourcesResult| {
            (page.resources, page.next_cursor)
        })
        .await
    }

    /// List every prompt, following pagination.
    pub async fn list_prompts(&self) -> Result<Vec<PromptDefinition>> {
        self.paginate("prompts/list", |page: ListPromptsResult| {
            (page.prompts, page.next_cursor)
        })
        .await
    }

    /// Call a tool. A result flagged `isError` is returned as-is.
    pub async fn call_tool(&self, name: &str, arguments: Option<Value>) -> Result<CallToolResult> {
        debug!(target = %self.target, tool = name, "Calling tool");
        let params = CallToolParams {
            name: name.to_string(),
            arguments,
        };
        let result: CallToolResult = self.request("tools/call", Some(params)).await?;
        if result.is_error {
            warn!(target = %self.target, tool = name, "Tool returned error");
        }
        Ok(result)
    }

    /// Read a resource by URI.
    pub async fn read_resource(&self, uri: &str) -> Result<ReadResourceResult> {
        debug!(target = %self.target, uri = uri, "Reading resource");
        self.request(
            "resources/read",
            Some(ReadResourceParams {
                uri: uri.to_string(),
            }),
        )
        .await
    }

    /// Render a prompt.
    pub async fn get_prompt(
        &self,
        name: &str,
        arguments: BTreeMap<String, String>,
    ) -> Result<GetPromptResult> {
        debug!(target = %self.target, prompt = name, "Getting prompt");
        let params = GetPromptParams {
            name: name.to_string(),
            arguments: (!arguments.is_empty()).then_some(arguments),
        };
        self.request("prompts/get", Some(params)).await
    }

    /// Stop the session task, cancelling it if it outlives `grace`.
    ///
    /// Idempotent; closing a failed or never-connected session is a no-op.
    pub async fn close(&self, grace: Duration) {
        let (shutdown, task) = {
            let mut inner = self.inner.lock();
            match inner.state {
                SessionState::Ready | SessionState::Connecting => {}
                SessionState::Unconnected => {
                    inner.state = SessionState::Closed;
                    return;
                }
                _ => return,
            }
            inner.state = SessionState::Closing;
            inner.outgoing = None;
            (inner.shutdown.take(), inner.task.take())
        };

        debug!(target = %self.target, "Closing MCP session");

        if let Some(shutdown) = shutdown {
            let _ = shutdown.send(grace);
        }
        if let Some(mut task) = task {
            if tokio::time::timeout(grace, &mut task).await.is_err() {
                warn!(target = %self.target, "Session task did not stop in time, cancelling");
                task.abort();
            }
        }

        let mut inner = self.inner.lock();
        inner.state = SessionState::Closed;
        inner.drain_pending("session closed");
        info!(target = %self.target, "MCP session closed");
    }

    async fn paginate<P, T>(
        &self,
        method: &str,
        split: impl Fn(P) -> (Vec<T>, Option<String>),
    ) -> Result<Vec<T>>
    where
        P: DeserializeOwned,
    {
        let mut items = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let params = cursor.clone().map(|c| PaginatedParams { cursor: Some(c) });
            let page: P = self.request(method, params).await?;
            let (batch, next) = split(page);
            items.extend(batch);

            match next {
                Some(next) if !next.is_empty() && Some(&next) != cursor.as_ref() => {
                    cursor = Some(next)
                }
                _ => break,
            }
        }

        debug!(target = %self.target, method = method, count = items.len(), "Listed");
        Ok(items)
    }

    async fn request<P, R>(&self, method: &str, params: Option<P>) -> Result<R>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        if !self.is_initialized() {
            return Err(Error::NotInitialized);
        }
        let raw = self.send_request(method, params).await?;
        serde_json::from_value(raw)
            .map_err(|e| Error::protocol(format!("invalid {} result: {}", method, e)))
    }

    async fn send_request<P: Serialize>(&self, method: &str, params: Option<P>) -> Result<Value> {
        let id = RequestId::from(self.next_id.fetch_add(1, Ordering::SeqCst));
        let payload = serde_json::to_string(&JsonRpcRequest::new(id.clone(), method, params))?;
        let (tx, rx) = oneshot::channel();

        {
            // State check and registration happen under one lock so a
            // concurrent failure cannot strand this waiter.
            let mut inner = self.inner.lock();
            if inner.state != SessionState::Ready {
                return Err(inner.unusable());
            }
            let outgoing = inner.outgoing.clone().ok_or(Error::NotConnected)?;
            inner.pending.insert(id.clone(), tx);
            if outgoing.send(payload).is_err() {
                inner.pending.remove(&id);
                return Err(Error::NotConnected);
            }
        }

        // Unregisters the waiter if this future is dropped before the reply.
        let _registration = PendingRegistration {
            inner: &self.inner,
            id,
        };

        rx.await
            .map_err(|_| Error::ConnectionLost("request abandoned".to_string()))?
    }

    fn notify<P: Serialize>(&self, method: &str, params: Option<P>) -> Result<()> {
        let payload = serde_json::to_string(&JsonRpcNotification::new(method, params))?;
        let mut inner = self.inner.lock();
        if inner.state != SessionState::Ready {
            return Err(inner.unusable());
        }
        inner
            .outgoing
            .as_ref()
            .ok_or(Error::NotConnected)?
            .send(payload)
            .map_err(|_| Error::NotConnected)
    }
}

/// Pending-map entry owned by one in-flight request.
struct PendingRegistration<'a> {
    inner: &'a Mutex<Inner>,
    id: RequestId,
}

impl Drop for PendingRegistration<'_> {
    fn drop(&mut self) {
        // A no-op once the reply was delivered, since delivery removes the entry.
        self.inner.lock().pending.remove(&self.id);
    }
}

struct SessionTask {
    target: String,
    transport: Box<dyn Transport>,
    outgoing_rx: mpsc::UnboundedReceiver<String>,
    replies: mpsc::UnboundedSender<String>,
    shutdown_rx: oneshot::Receiver<Duration>,
    inner: Arc<Mutex<Inner>>,
    router: Arc<CallbackRouter>,
}

/// The long-lived loop that exclusively owns the transport.
async fn run_session(mut task: SessionTask) {
    let outcome: std::result::Result<(), TransportError> = loop {
        tokio::select! {
            grace = &mut task.shutdown_rx => {
                let grace = grace.unwrap_or(crate::runtime::DEFAULT_CLOSE_GRACE);
                if let Err(e) = task.transport.close(grace).await {
                    debug!(error = %e, "Transport close reported an error");
                }
                break Ok(());
            }
            outgoing = task.outgoing_rx.recv() => {
                // The session always holds a sender, so None only follows close.
                let Some(payload) = outgoing else { break Ok(()) };
                if let Err(e) = task.transport.send(payload).await {
                    break Err(e);
                }
            }
            inbound = task.transport.receive() => match inbound {
                Ok(Inbound::Message(text)) => dispatch(&task, &text),
                Ok(Inbound::RequestFailed { id, error }) => {
                    let waiter = task.inner.lock().pending.remove(&id);
                    match waiter {
                        Some(waiter) => {
                            let _ = waiter.send(Err(Error::from_transport(&task.target, error)));
                        }
                        None => debug!(id = %id, error = %error, "Failure for unknown request"),
                    }
                }
                Err(e) => break Err(e),
            },
        }
    };

    let mut inner = task.inner.lock();
    match outcome {
        Ok(()) => inner.drain_pending("session closed"),
        Err(TransportError::ConnectionClosed) => inner.fail(Error::ConnectionLost(format!(
            "{} closed the connection",
            task.target
        ))),
        Err(e) => inner.fail(Error::from_transport(&task.target, e)),
    }
}

fn dispatch(task: &SessionTask, text: &str) {
    let messages = match IncomingMessage::parse_all(text) {
        Ok(messages) => messages,
        Err(e) => {
            warn!(error = %e, "Ignoring malformed message from server");
            return;
        }
    };

    for message in messages {
        let message = match message {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Skipping malformed message from server");
                continue;
            }
        };
        match message {
            IncomingMessage::Response { id, result, error } => {
                let waiter = task.inner.lock().pending.remove(&id);
                let Some(waiter) = waiter else {
                    warn!(id = %id, "Response for unknown request");
                    continue;
                };
                let reply = match error {
                    Some(error) => Err(Error::Server {
                        code: error.code,
                        message: error.message,
                    }),
                    None => Ok(result.unwrap_or(Value::Null)),
                };
                let _ = waiter.send(reply);
            }
            IncomingMessage::Request { id, method, params } => {
                debug!(id = %id, method = %method, "Server-initiated request");
                let router = task.router.clone();
                let replies = task.replies.clone();
                // Handlers may be slow; keep the read loop moving.
                tokio::spawn(async move {
                    let response = match router.handle(&method, params).await {
                        Ok(result) => serde_json::to_string(&JsonRpcResponse::success(id, result)),
                        Err(error) => {
                            serde_json::to_string(&JsonRpcResponse::<Value>::failure(id, error))
                        }
                    };
                    match response {
                        Ok(payload) => {
                            let _ = replies.send(payload);
                        }
                        Err(e) => warn!(error = %e, "Failed to encode callback response"),
                    }
                });
            }
            IncomingMessage::Notification { method, params } => match method.as_str() {
                "notifications/message" => {
                    let data = params.unwrap_or(Value::Null);
                    info!(target = %task.target, message = %data, "Server log");
                }
                m if m.ends_with("/list_changed") => {
                    debug!(notification = m, "Server list changed; registry snapshot is unchanged");
                }
                other => debug!(notification = other, "Server notification"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryTransport;

    #[test]
    fn test_state_display() {
        assert_eq!(SessionState::Ready.to_string(), "ready");
        assert_eq!(SessionState::Failed.to_string(), "failed");
    }

    #[tokio::test]
    async fn test_operations_before_connect() {
        let session = McpSession::new("test", ClientInfo::default(), CallbackRouter::new());
        assert_eq!(session.state(), SessionState::Unconnected);

        let err = session.initialize().await.unwrap_err();
        assert!(matches!(err, Error::NotConnected));

        session.close(Duration::from_millis(10)).await;
        assert_eq!(session.state(), SessionState::Closed);
        session.close(Duration::from_millis(10)).await;
    }

    #[tokio::test]
    async fn test_dropped_request_is_unregistered() {
        let (transport, _peer) = MemoryTransport::pair();
        let session = McpSession::new("memory", ClientInfo::default(), CallbackRouter::new());
        session.connect_with(Box::new(transport)).await.unwrap();

        let mut call = Box::pin(session.send_request("tools/list", None::<Value>));
        assert!(futures::poll!(&mut call).is_pending());
        assert_eq!(session.inner.lock().pending.len(), 1);

        drop(call);
        assert!(session.inner.lock().pending.is_empty());
        assert_eq!(session.state(), SessionState::Ready);

        session.close(Duration::from_millis(100)).await;
    }

    #[tokio::test]
    async fn test_connect_failure_is_captured() {
        let session = McpSession::new(
            "/no/such/server",
            ClientInfo::default(),
            CallbackRouter::new(),
        );
        let err = session
            .connect(TransportConfig::Stdio {
                command: "/no/such/server".to_string(),
                args: vec![],
                env: HashMap::new(),
                working_dir: None,
            })
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Connection { .. }));
        assert_eq!(session.state(), SessionState::Failed);

        // Closing a failed session is a silent no-op.
        session.close(Duration::from_millis(10)).await;
        assert_eq!(session.state(), SessionState::Failed);
    }
}
