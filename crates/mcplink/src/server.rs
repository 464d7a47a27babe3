//! The blocking handle returned by [`load`](crate::load).

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::protocol::{
    CallToolResult, Content, PromptDefinition, PromptMessage, ResourceContents,
    ResourceDefinition, ServerCapabilities, ServerInfo, ToolDefinition,
};
use crate::registry::{CapabilityRegistry, Parameter, Resolved};
use crate::runtime::{with_deadline, BackgroundRuntime};
use crate::session::McpSession;

/// What an invocation produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Output {
    /// Text-only tool content (joined with newlines) or a single text resource.
    Text(String),
    /// Mixed tool content.
    Content(Vec<Content>),
    /// Structured tool output with no content blocks.
    Structured(Value),
    /// Resource contents that are not a single text body.
    Resource(Vec<ResourceContents>),
    /// Rendered prompt messages.
    Messages(Vec<PromptMessage>),
}

impl Output {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Output::Text(text) => Some(text),
            _ => None,
        }
    }

    fn from_tool(name: &str, result: CallToolResult) -> Result<Self> {
        let texts: Vec<&str> = result.content.iter().filter_map(Content::as_text).collect();

        if result.is_error {
            let message = if texts.is_empty() {
                "tool reported an error".to_string()
            } else {
                texts.join("\n")
            };
            return Err(Error::ToolExecution {
                name: name.to_string(),
                message,
            });
        }

        if result.content.is_empty() {
            return Ok(match result.structured_content {
                Some(value) => Output::Structured(value),
                None => Output::Text(String::new()),
            });
        }
        if texts.len() == result.content.len() {
            return Ok(Output::Text(texts.join("\n")));
        }
        Ok(Output::Content(result.content))
    }

    fn from_resource(mut contents: Vec<ResourceContents>) -> Self {
        if contents.len() == 1 && contents[0].text.is_some() {
            if let Some(text) = contents.remove(0).text {
                return Output::Text(text);
            }
        }
        Output::Resource(contents)
    }
}

fn describe_content(content: &Content) -> String {
    match content {
        Content::Text { text } => text.clone(),
        Content::Image { mime_type, .. } => format!("[image {}]", mime_type),
        Content::Audio { mime_type, .. } => format!("[audio {}]", mime_type),
        Content::Resource { resource } => resource
            .text
            .clone()
            .unwrap_or_else(|| format!("[resource {}]", resource.uri)),
        Content::ResourceLink { uri, .. } => format!("[link {}]", uri),
    }
}

impl fmt::Display for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Output::Text(text) => f.write_str(text),
            Output::Content(items) => {
                let parts: Vec<String> = items.iter().map(describe_content).collect();
                f.write_str(&parts.join("\n"))
            }
            Output::Structured(value) => write!(f, "{}", value),
            Output::Resource(contents) => {
                let parts: Vec<String> = contents
                    .iter()
                    .map(|c| c.text.clone().unwrap_or_else(|| format!("[blob {}]", c.uri)))
                    .collect();
                f.write_str(&parts.join("\n"))
            }
            Output::Messages(messages) => {
                let parts: Vec<String> = messages
                    .iter()
                    .map(|m| format!("{}: {}", m.role, describe_content(&m.content)))
                    .collect();
                f.write_str(&parts.join("\n"))
            }
        }
    }
}

/// An owned copy of a resolved capability.
#[derive(Debug, Clone, PartialEq)]
pub enum Capability {
    Tool(ToolDefinition),
    Resource(ResourceDefinition),
    Prompt(PromptDefinition),
}

impl From<Resolved<'_>> for Capability {
    fn from(resolved: Resolved<'_>) -> Self {
        match resolved {
            Resolved::Tool(t) => Capability::Tool(t.clone()),
            Resolved::Resource(r) => Capability::Resource(r.clone()),
            Resolved::Prompt(p) => Capability::Prompt(p.clone()),
        }
    }
}

struct ServerInner {
    target: String,
    runtime: BackgroundRuntime,
    session: Arc<McpSession>,
    registry: CapabilityRegistry,
    call_timeout: Option<Duration>,
    close_grace: Duration,
    closed: AtomicBool,
}

impl ServerInner {
    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(target = %self.target, "Closing server handle");

        let session = self.session.clone();
        let grace = self.close_grace;
        // Best effort: a dead runtime or a call from the worker just skips this step.
        if let Err(e) = self.runtime.run(async move {
            session.close(grace).await;
            Ok(())
        }) {
            debug!(error = %e, "Session close skipped");
        }
        self.runtime.close(grace);
        info!(target = %self.target, "MCP server closed");
    }
}

impl Drop for ServerInner {
    fn drop(&mut self) {
        self.close();
    }
}

/// A loaded server. Cheap to clone; all clones share one connection.
///
/// Every method blocks the calling thread and may be used from many threads at
/// once. The connection closes on [`close`](Self::close) or when the last clone
/// is dropped.
#[derive(Clone)]
pub struct ServerHandle {
    inner: Arc<ServerInner>,
}

impl fmt::Debug for ServerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerHandle")
            .field("target", &self.inner.target)
            .field("tools", &self.inner.registry.tools().len())
            .field("resources", &self.inner.registry.resources().len())
            .field("prompts", &self.inner.registry.prompts().len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl ServerHandle {
    pub(crate) fn new(
        runtime: BackgroundRuntime,
        session: Arc<McpSession>,
        registry: CapabilityRegistry,
        target: String,
        call_timeout: Option<Duration>,
        close_grace: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(ServerInner {
                target,
                runtime,
                session,
                registry,
                call_timeout,
                close_grace,
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Command line or URL this handle is connected to.
    pub fn target(&self) -> &str {
        &self.inner.target
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Run a session operation on the worker, bounded by the call timeout if one is set.
    fn run<T, F, Fut>(&self, operation: String, f: F) -> Result<T>
    where
        F: FnOnce(Arc<McpSession>) -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        if self.is_closed() {
            return Err(Error::NotConnected);
        }
        let deadline = self.inner.call_timeout;
        let future = f(self.inner.session.clone());
        self.inner
            .runtime
            .run(with_deadline(operation, deadline, future))
    }

    /// Look a name up without calling anything.
    pub fn resolve(&self, name: &str) -> Result<Capability> {
        self.inner.registry.resolve(name).map(Capability::from)
    }

    /// Call whatever `name` resolves to: run a tool, read a resource, or render a prompt.
    pub fn invoke(&self, name: &str, args: Value) -> Result<Output> {
        match self.resolve(name)? {
            Capability::Tool(tool) => self.call_resolved_tool(tool.name, args),
            Capability::Resource(resource) => self.read_resource(&resource.uri),
            Capability::Prompt(prompt) => self.render_prompt(prompt.name, prompt_arguments(&args)),
        }
    }

    /// Call a tool by original or normalized name.
    pub fn call_tool(&self, name: &str, args: Value) -> Result<Output> {
        match self.inner.registry.resolve(name)? {
            Resolved::Tool(tool) => self.call_resolved_tool(tool.name.clone(), args),
            _ => Err(Error::CapabilityNotFound {
                name: name.to_string(),
                available: self.tool_names(),
            }),
        }
    }

    fn call_resolved_tool(&self, name: String, args: Value) -> Result<Output> {
        let arguments = match args {
            Value::Null => None,
            other => Some(other),
        };
        let tool = name.clone();
        let result = self.run(format!("tool '{}'", name), move |session| async move {
            session.call_tool(&tool, arguments).await
        })?;
        Output::from_tool(&name, result)
    }

    /// Read a resource by URI, or by the name it was listed under.
    pub fn read_resource(&self, uri_or_name: &str) -> Result<Output> {
        let uri = match self.inner.registry.resolve(uri_or_name) {
            Ok(Resolved::Resource(resource)) => resource.uri.clone(),
            _ => uri_or_name.to_string(),
        };
        let target = uri.clone();
        let result = self.run(format!("resource '{}'", uri), move |session| async move {
            session.read_resource(&target).await
        })?;
        Ok(Output::from_resource(result.contents))
    }

    /// Render a prompt by original or normalized name.
    pub fn get_prompt(&self, name: &str, args: BTreeMap<String, String>) -> Result<Output> {
        match self.inner.registry.resolve(name)? {
            Resolved::Prompt(prompt) => self.render_prompt(prompt.name.clone(), args),
            _ => Err(Error::CapabilityNotFound {
                name: name.to_string(),
                available: self
                    .inner
                    .registry
                    .prompts()
                    .iter()
                    .map(|p| p.name.clone())
                    .collect(),
            }),
        }
    }

    fn render_prompt(&self, name: String, args: BTreeMap<String, String>) -> Result<Output> {
        let prompt = name.clone();
        let result = self.run(format!("prompt '{}'", name), move |session| async move {
            session.get_prompt(&prompt, args).await
        })?;
        Ok(Output::Messages(result.messages))
    }

    fn tool_names(&self) -> Vec<String> {
        self.inner
            .registry
            .tools()
            .iter()
            .map(|t| t.name.clone())
            .collect()
    }

    /// Callable handles for every tool, built fresh on each call.
    pub fn tools(&self) -> Vec<ToolHandle> {
        self.inner
            .registry
            .tools()
            .iter()
            .map(|def| ToolHandle {
                server: self.clone(),
                definition: def.clone(),
            })
            .collect()
    }

    /// Handle for one tool.
    pub fn tool(&self, name: &str) -> Result<ToolHandle> {
        match self.inner.registry.resolve(name)? {
            Resolved::Tool(def) => Ok(ToolHandle {
                server: self.clone(),
                definition: def.clone(),
            }),
            _ => Err(Error::CapabilityNotFound {
                name: name.to_string(),
                available: self.tool_names(),
            }),
        }
    }

    pub fn resources(&self) -> Vec<ResourceDefinition> {
        self.inner.registry.resources().to_vec()
    }

    pub fn prompts(&self) -> Vec<PromptDefinition> {
        self.inner.registry.prompts().to_vec()
    }

    /// Every capability name, tools first.
    pub fn available_names(&self) -> Vec<String> {
        self.inner.registry.available_names()
    }

    pub fn server_info(&self) -> Option<ServerInfo> {
        self.inner.session.server_info()
    }

    /// Capabilities the server declared in the handshake.
    pub fn capabilities(&self) -> Option<ServerCapabilities> {
        self.inner.session.server_capabilities()
    }

    /// Shut the connection down. Idempotent and never fails; later calls on
    /// any clone return `NotConnected`.
    pub fn close(&self) {
        self.inner.close();
    }
}

fn prompt_arguments(args: &Value) -> BTreeMap<String, String> {
    args.as_object()
        .map(|map| {
            map.iter()
                .map(|(k, v)| {
                    let value = match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    (k.clone(), value)
                })
                .collect()
        })
        .unwrap_or_default()
}

/// A single tool bound to its server.
#[derive(Debug, Clone)]
pub struct ToolHandle {
    server: ServerHandle,
    definition: ToolDefinition,
}

impl ToolHandle {
    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn description(&self) -> Option<&str> {
        self.definition.description.as_deref()
    }

    pub fn input_schema(&self) -> &Value {
        &self.definition.input_schema
    }

    pub fn parameters(&self) -> Vec<Parameter> {
        self.definition.parameters()
    }

    pub fn call(&self, args: Value) -> Result<Output> {
        self.server
            .call_resolved_tool(self.definition.name.clone(), args)
    }
}
