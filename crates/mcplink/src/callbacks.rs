//! Handlers for server-initiated requests.
//!
//! A server may ask the client to run an LLM completion (`sampling/createMessage`),
//! to collect input from a human (`elicitation/create`), or to list its roots.
//! The [`CallbackRouter`] answers these; handler failures become protocol-level
//! rejections and never reach the foreground caller.

use std::io::{BufRead, Write};
use std::sync::Arc;

use async_trait::async_trait;
use mcplink_core::{Message, ProviderError, Role};
use mcplink_providers::{CompletionRequest, ProviderCredentials};
use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::protocol::{
    ClientCapabilities, Content, CreateMessageParams, CreateMessageResult, ElicitAction,
    ElicitParams, ElicitResult, JsonRpcError, ListRootsResult, ModelPreferences, Root,
    RootsCapability,
};

/// Output size used when the server does not ask for one.
pub const DEFAULT_MAX_TOKENS: u32 = 1000;

/// Attempts allowed for a required elicitation field.
const MAX_PROMPT_ATTEMPTS: usize = 3;

/// Why a server-initiated request was rejected.
#[derive(Debug, Error)]
pub enum CallbackError {
    #[error("{0} not supported by this client")]
    NotSupported(String),

    #[error("invalid params: {0}")]
    InvalidParams(String),

    #[error("Sampling failed: {0}")]
    SamplingFailed(String),
}

impl From<CallbackError> for JsonRpcError {
    fn from(e: CallbackError) -> Self {
        let code = match e {
            CallbackError::NotSupported(_) => JsonRpcError::METHOD_NOT_FOUND,
            CallbackError::InvalidParams(_) => JsonRpcError::INVALID_PARAMS,
            CallbackError::SamplingFailed(_) => JsonRpcError::INTERNAL_ERROR,
        };
        JsonRpcError::new(code, e.to_string())
    }
}

/// A completion request from the server, flattened to text messages.
#[derive(Debug, Clone)]
pub struct SamplingRequest {
    pub messages: Vec<Message>,
    pub model_preferences: Option<ModelPreferences>,
    pub system_prompt: Option<String>,
    pub max_tokens: u32,
}

/// Generated text and the model that produced it.
#[derive(Debug, Clone)]
pub struct SamplingResponse {
    pub text: String,
    pub model: String,
}

/// Produces completions on behalf of the server.
#[async_trait]
pub trait SamplingHandler: Send + Sync {
    async fn sample(&self, request: SamplingRequest) -> anyhow::Result<SamplingResponse>;
}

/// Plain closures returning text are sampling handlers.
#[async_trait]
impl<F> SamplingHandler for F
where
    F: Fn(SamplingRequest) -> anyhow::Result<String> + Send + Sync,
{
    async fn sample(&self, request: SamplingRequest) -> anyhow::Result<SamplingResponse> {
        Ok(SamplingResponse {
            text: self(request)?,
            model: "default".to_string(),
        })
    }
}

/// Collects structured input for the server.
#[async_trait]
pub trait ElicitationHandler: Send + Sync {
    /// Return the collected object; an error cancels the request.
    async fn elicit(&self, message: &str, schema: &Value) -> anyhow::Result<Value>;
}

#[async_trait]
impl<F> ElicitationHandler for F
where
    F: Fn(&str, &Value) -> anyhow::Result<Value> + Send + Sync,
{
    async fn elicit(&self, message: &str, schema: &Value) -> anyhow::Result<Value> {
        self(message, schema)
    }
}

/// Dispatches server-initiated requests to the registered handlers.
#[derive(Clone, Default)]
pub struct CallbackRouter {
    sampling: Option<Arc<dyn SamplingHandler>>,
    elicitation: Option<Arc<dyn ElicitationHandler>>,
    roots: Vec<Root>,
}

impl std::fmt::Debug for CallbackRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackRouter")
            .field("sampling", &self.sampling.is_some())
            .field("elicitation", &self.elicitation.is_some())
            .field("roots", &self.roots)
            .finish()
    }
}

impl CallbackRouter {
    /// Router with no handlers and no roots.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sampling(mut self, handler: Arc<dyn SamplingHandler>) -> Self {
        self.sampling = Some(handler);
        self
    }

    pub fn with_elicitation(mut self, handler: Arc<dyn ElicitationHandler>) -> Self {
        self.elicitation = Some(handler);
        self
    }

    pub fn with_roots(mut self, roots: Vec<Root>) -> Self {
        self.roots = roots;
        self
    }

    pub fn roots(&self) -> &[Root] {
        &self.roots
    }

    /// Capabilities to advertise in the handshake.
    pub fn capabilities(&self) -> ClientCapabilities {
        ClientCapabilities {
            roots: (!self.roots.is_empty()).then(|| RootsCapability {
                list_changed: false,
            }),
            sampling: self.sampling.as_ref().map(|_| Map::new()),
            elicitation: self.elicitation.as_ref().map(|_| Map::new()),
        }
    }

    /// Answer one server-initiated request.
    pub async fn handle(&self, method: &str, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let params = params.unwrap_or(Value::Null);
        match method {
            "ping" => Ok(json!({})),
            "roots/list" => Ok(serde_json::to_value(ListRootsResult {
                roots: self.roots.clone(),
            })
            .unwrap_or_else(|_| json!({ "roots": [] }))),
            "sampling/createMessage" => self.sample(params).await.map_err(Into::into),
            "elicitation/create" => self.elicit(params).await.map_err(Into::into),
            other => {
                debug!(method = other, "Unsupported server request");
                Err(JsonRpcError::new(
                    JsonRpcError::METHOD_NOT_FOUND,
                    format!("Method not found: {}", other),
                ))
            }
        }
    }

    async fn sample(&self, params: Value) -> Result<Value, CallbackError> {
        let handler = self
            .sampling
            .as_ref()
            .ok_or_else(|| CallbackError::NotSupported("sampling".to_string()))?;

        let params: CreateMessageParams = serde_json::from_value(params)
            .map_err(|e| CallbackError::InvalidParams(e.to_string()))?;

        let request = SamplingRequest {
            messages: params
                .messages
                .into_iter()
                .map(|m| Message::new(m.role, flatten_content(&m.content)))
                .collect(),
            model_preferences: params.model_preferences,
            system_prompt: params.system_prompt,
            max_tokens: params.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        };

        let response = handler.sample(request).await.map_err(|e| {
            warn!(error = %e, "Sampling handler failed");
            CallbackError::SamplingFailed(e.to_string())
        })?;

        let result = CreateMessageResult {
            role: Role::Assistant,
            content: Content::text(response.text),
            model: response.model,
            stop_reason: Some("endTurn".to_string()),
        };
        serde_json::to_value(result).map_err(|e| CallbackError::SamplingFailed(e.to_string()))
    }

    async fn elicit(&self, params: Value) -> Result<Value, CallbackError> {
        let handler = self
            .elicitation
            .as_ref()
            .ok_or_else(|| CallbackError::NotSupported("elicitation".to_string()))?;

        let params: ElicitParams = serde_json::from_value(params)
            .map_err(|e| CallbackError::InvalidParams(e.to_string()))?;

        let result = match handler.elicit(&params.message, &params.requested_schema).await {
            Ok(content) => ElicitResult {
                action: ElicitAction::Accept,
                content: Some(content),
            },
            Err(e) => {
                info!(error = %e, "Elicitation cancelled");
                ElicitResult {
                    action: ElicitAction::Cancel,
                    content: Some(json!({ "error": e.to_string() })),
                }
            }
        };
        serde_json::to_value(result).map_err(|e| CallbackError::InvalidParams(e.to_string()))
    }
}

/// Text view of a sampling content block.
fn flatten_content(content: &Content) -> String {
    match content.as_text() {
        Some(text) => text.to_string(),
        None => serde_json::to_string(content).unwrap_or_default(),
    }
}

// ============================================================================
// Default sampling handler
// ============================================================================

/// Runs sampling requests against whichever LLM backend has credentials.
#[derive(Debug, Clone)]
pub struct DefaultSamplingHandler {
    credentials: ProviderCredentials,
    model: Option<String>,
    default_max_tokens: u32,
}

impl DefaultSamplingHandler {
    pub fn new(credentials: ProviderCredentials) -> Self {
        Self {
            credentials,
            model: None,
            default_max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    /// Discover credentials from the standard environment variables.
    pub fn from_env() -> Self {
        Self::new(ProviderCredentials::from_env())
    }

    /// Always use this model, ignoring server preferences.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.default_max_tokens = max_tokens;
        self
    }

    /// Whether a completion could be attempted at all.
    pub fn can_handle(&self) -> bool {
        self.model.is_some() || !self.credentials.is_empty()
    }

    /// Pick the model id to send and the backend to send it to.
    fn select(
        &self,
        preferences: Option<&ModelPreferences>,
    ) -> Result<(Arc<dyn mcplink_providers::Provider>, String), ProviderError> {
        if let Some(model) = self.model.as_deref() {
            return self.credentials.route(Some(model));
        }

        if let Some(preferred) = preferences.and_then(ModelPreferences::preferred_model) {
            match self.credentials.route(Some(preferred)) {
                Ok(found) => return Ok(found),
                Err(e) => debug!(model = preferred, error = %e, "Preferred model unavailable"),
            }
        }

        self.credentials.route(None)
    }
}

#[async_trait]
impl SamplingHandler for DefaultSamplingHandler {
    #[instrument(skip(self, request), fields(messages = request.messages.len()))]
    async fn sample(&self, request: SamplingRequest) -> anyhow::Result<SamplingResponse> {
        let (provider, model) = self.select(request.model_preferences.as_ref())?;
        let max_tokens = if request.max_tokens == 0 {
            self.default_max_tokens
        } else {
            request.max_tokens
        };

        let mut completion = CompletionRequest::new(&model, request.messages, max_tokens);
        if let Some(system) = request.system_prompt.filter(|s| !s.is_empty()) {
            completion = completion.with_system(system);
        }

        info!(provider = provider.id(), model = %model, "Sampling");
        let response = provider.complete(completion).await?;

        Ok(SamplingResponse {
            text: response.content,
            model: if response.model.is_empty() {
                model
            } else {
                response.model
            },
        })
    }
}

// ============================================================================
// Terminal elicitation handler
// ============================================================================

/// Prompts on the controlling terminal for each field of the requested schema.
#[derive(Debug, Clone, Default)]
pub struct TerminalElicitationHandler;

impl TerminalElicitationHandler {
    pub fn new() -> Self {
        Self
    }

    /// Run the prompt loop over arbitrary streams.
    pub fn prompt_with<R: BufRead, W: Write>(
        &self,
        message: &str,
        schema: &Value,
        input: &mut R,
        output: &mut W,
    ) -> anyhow::Result<Value> {
        writeln!(output, "\n{}", message)?;

        let properties = schema
            .get("properties")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        let required: Vec<&str> = schema
            .get("required")
            .and_then(Value::as_array)
            .map(|r| r.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        let mut collected = Map::new();
        for (name, field) in &properties {
            let is_required = required.contains(&name.as_str());
            if let Some(value) = prompt_field(name, field, is_required, input, output)? {
                collected.insert(name.clone(), value);
            }
        }

        Ok(Value::Object(collected))
    }
}

#[async_trait]
impl ElicitationHandler for TerminalElicitationHandler {
    async fn elicit(&self, message: &str, schema: &Value) -> anyhow::Result<Value> {
        let handler = self.clone();
        let message = message.to_string();
        let schema = schema.clone();
        tokio::task::spawn_blocking(move || {
            let stdin = std::io::stdin();
            let mut input = stdin.lock();
            let mut output = std::io::stdout();
            handler.prompt_with(&message, &schema, &mut input, &mut output)
        })
        .await?
    }
}

fn prompt_field<R: BufRead, W: Write>(
    name: &str,
    field: &Value,
    required: bool,
    input: &mut R,
    output: &mut W,
) -> anyhow::Result<Option<Value>> {
    let kind = field.get("type").and_then(Value::as_str).unwrap_or("string");
    let choices: Vec<Value> = field
        .get("enum")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let default = field.get("default");

    let mut label = name.to_string();
    if let Some(desc) = field.get("description").and_then(Value::as_str) {
        label.push_str(&format!(" ({})", desc));
    }
    label.push_str(&format!(" [{}]", kind));
    if !choices.is_empty() {
        let rendered: Vec<String> = choices
            .iter()
            .enumerate()
            .map(|(i, c)| format!("{}={}", i + 1, display_value(c)))
            .collect();
        label.push_str(&format!(" {{{}}}", rendered.join(", ")));
    }
    if let Some(d) = default {
        label.push_str(&format!(" default: {}", display_value(d)));
    }
    if required {
        label.push_str(" *");
    }

    for _ in 0..MAX_PROMPT_ATTEMPTS {
        write!(output, "{}: ", label)?;
        output.flush()?;

        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            break;
        }
        let raw = line.trim();

        if raw.is_empty() {
            if let Some(d) = default {
                return Ok(Some(d.clone()));
            }
            if !required {
                return Ok(None);
            }
            writeln!(output, "  {} is required", name)?;
            continue;
        }

        match parse_input(raw, kind, &choices) {
            Ok(value) => return Ok(Some(value)),
            Err(reason) => writeln!(output, "  {}", reason)?,
        }
    }

    if required {
        anyhow::bail!("no valid value for required field '{}'", name);
    }
    Ok(None)
}

fn parse_input(raw: &str, kind: &str, choices: &[Value]) -> Result<Value, String> {
    if !choices.is_empty() {
        if let Some(hit) = choices.iter().find(|c| display_value(c) == raw) {
            return Ok(hit.clone());
        }
        return raw
            .parse::<usize>()
            .ok()
            .and_then(|i| i.checked_sub(1))
            .and_then(|i| choices.get(i))
            .cloned()
            .ok_or_else(|| format!("choose one of {} options", choices.len()));
    }

    match kind {
        "boolean" => match raw.to_ascii_lowercase().as_str() {
            "y" | "yes" | "true" | "1" => Ok(Value::Bool(true)),
            "n" | "no" | "false" | "0" => Ok(Value::Bool(false)),
            _ => Err("expected yes or no".to_string()),
        },
        "integer" => raw
            .parse::<i64>()
            .map(Value::from)
            .map_err(|_| "expected an integer".to_string()),
        "number" => raw
            .parse::<f64>()
            .ok()
            .and_then(|n| serde_json::Number::from_f64(n).map(Value::Number))
            .ok_or_else(|| "expected a number".to_string()),
        _ => Ok(Value::String(raw.to_string())),
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sampling_params(text: &str) -> Value {
        json!({
            "messages": [{"role": "user", "content": {"type": "text", "text": text}}],
            "systemPrompt": "be brief",
            "maxTokens": 50
        })
    }

    #[tokio::test]
    async fn test_ping_and_unknown_method() {
        let router = CallbackRouter::new();
        assert_eq!(router.handle("ping", None).await.unwrap(), json!({}));

        let err = router.handle("tasks/run", None).await.unwrap_err();
        assert_eq!(err.code, JsonRpcError::METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_sampling_with_closure() {
        let handler = |req: SamplingRequest| -> anyhow::Result<String> {
            assert_eq!(req.max_tokens, 50);
            assert_eq!(req.system_prompt.as_deref(), Some("be brief"));
            Ok(format!("echo: {}", req.messages[0].content))
        };
        let router = CallbackRouter::new().with_sampling(Arc::new(handler));
        assert!(router.capabilities().sampling.is_some());

        let result = router
            .handle("sampling/createMessage", Some(sampling_params("hi")))
            .await
            .unwrap();
        assert_eq!(result["role"], "assistant");
        assert_eq!(result["content"]["text"], "echo: hi");
        assert_eq!(result["model"], "default");
        assert_eq!(result["stopReason"], "endTurn");
    }

    #[tokio::test]
    async fn test_sampling_errors() {
        let router = CallbackRouter::new();
        let err = router
            .handle("sampling/createMessage", Some(sampling_params("hi")))
            .await
            .unwrap_err();
        assert_eq!(err.code, JsonRpcError::METHOD_NOT_FOUND);

        let failing =
            |_: SamplingRequest| -> anyhow::Result<String> { anyhow::bail!("model offline") };
        let router = CallbackRouter::new().with_sampling(Arc::new(failing));
        let err = router
            .handle("sampling/createMessage", Some(sampling_params("hi")))
            .await
            .unwrap_err();
        assert_eq!(err.code, JsonRpcError::INTERNAL_ERROR);
        assert_eq!(err.message, "Sampling failed: model offline");

        let err = router
            .handle("sampling/createMessage", Some(json!({"messages": 3})))
            .await
            .unwrap_err();
        assert_eq!(err.code, JsonRpcError::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_elicitation_accept_and_cancel() {
        let accept = |msg: &str, _: &Value| -> anyhow::Result<Value> {
            Ok(json!({ "answer": msg.len() }))
        };
        let router = CallbackRouter::new().with_elicitation(Arc::new(accept));
        let result = router
            .handle(
                "elicitation/create",
                Some(json!({"message": "four", "requestedSchema": {}})),
            )
            .await
            .unwrap();
        assert_eq!(result, json!({"action": "accept", "content": {"answer": 4}}));

        let refuse = |_: &str, _: &Value| -> anyhow::Result<Value> { anyhow::bail!("no tty") };
        let router = CallbackRouter::new().with_elicitation(Arc::new(refuse));
        let result = router
            .handle(
                "elicitation/create",
                Some(json!({"message": "x", "requestedSchema": {}})),
            )
            .await
            .unwrap();
        assert_eq!(result["action"], "cancel");
        assert_eq!(result["content"]["error"], "no tty");
    }

    #[tokio::test]
    async fn test_roots_list() {
        let root = Root {
            uri: "file:///tmp/project".to_string(),
            name: Some("project".to_string()),
        };
        let router = CallbackRouter::new().with_roots(vec![root]);
        assert!(router.capabilities().roots.is_some());

        let result = router.handle("roots/list", None).await.unwrap();
        assert_eq!(result["roots"][0]["uri"], "file:///tmp/project");
        assert_eq!(result["roots"][0]["name"], "project");
    }

    #[test]
    fn test_default_sampling_without_credentials() {
        let handler = DefaultSamplingHandler::new(ProviderCredentials::default());
        assert!(!handler.can_handle());
        let err = handler.select(None).err().unwrap();
        assert!(matches!(err, ProviderError::NoCredentials));

        assert!(handler.with_model("gpt-4o").can_handle());
    }

    #[test]
    fn test_default_sampling_model_selection() {
        let credentials = ProviderCredentials::from_lookup(|var| match var {
            "OPENAI_API_KEY" => Some("sk-test".to_string()),
            _ => None,
        });
        let handler = DefaultSamplingHandler::new(credentials);

        let (provider, model) = handler.select(None).unwrap();
        assert_eq!(provider.id(), "openai");
        assert_eq!(model, "gpt-4o-mini");

        let prefs: ModelPreferences =
            serde_json::from_value(json!({"hints": [{"name": "gpt-4o"}]})).unwrap();
        let (_, model) = handler.select(Some(&prefs)).unwrap();
        assert_eq!(model, "gpt-4o");

        // Preference for an unconfigured backend falls back to what is available.
        let prefs: ModelPreferences =
            serde_json::from_value(json!({"hints": [{"name": "claude-3-haiku"}]})).unwrap();
        let (provider, _) = handler.select(Some(&prefs)).unwrap();
        assert_eq!(provider.id(), "openai");
    }

    #[test]
    fn test_terminal_prompt_parses_schema_types() {
        let schema = json!({
            "type": "object",
            "properties": {
                "name": {"type": "string", "description": "Your name"},
                "age": {"type": "integer"},
                "subscribe": {"type": "boolean"},
                "color": {"type": "string", "enum": ["red", "green", "blue"]},
                "nickname": {"type": "string"},
                "tier": {"type": "string", "default": "free"}
            },
            "required": ["name", "age"]
        });
        let mut input = Cursor::new("Ada\nforty\n36\nyes\n2\n\n\n");
        let mut output = Vec::new();

        let value = TerminalElicitationHandler::new()
            .prompt_with("Tell me about you", &schema, &mut input, &mut output)
            .unwrap();

        assert_eq!(
            value,
            json!({
                "name": "Ada",
                "age": 36,
                "subscribe": true,
                "color": "green",
                "tier": "free"
            })
        );
        let shown = String::from_utf8(output).unwrap();
        assert!(shown.contains("Tell me about you"));
        assert!(shown.contains("expected an integer"));
        assert!(shown.contains("1=red, 2=green, 3=blue"));
    }

    #[test]
    fn test_terminal_prompt_gives_up_on_required_field() {
        let schema = json!({
            "properties": {"name": {"type": "string"}},
            "required": ["name"]
        });
        let mut input = Cursor::new("\n\n\n");
        let mut output = Vec::new();
        let err = TerminalElicitationHandler::new()
            .prompt_with("Name?", &schema, &mut input, &mut output)
            .unwrap_err();
        assert!(err.to_string().contains("name"));
    }
}
