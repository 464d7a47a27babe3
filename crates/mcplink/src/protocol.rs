//! MCP protocol types.
//!
//! This module defines the JSON-RPC 2.0 message types and MCP-specific
//! protocol structures exchanged with MCP servers, in both directions.

use std::collections::BTreeMap;

use mcplink_core::Role;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// JSON-RPC protocol version.
pub const JSONRPC_VERSION: &str = "2.0";

/// MCP protocol version requested during the handshake.
pub const MCP_PROTOCOL_VERSION: &str = "2025-06-18";

/// Request ID for JSON-RPC messages.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Numeric ID.
    Number(i64),
    /// String ID.
    String(String),
}

impl From<u64> for RequestId {
    fn from(id: u64) -> Self {
        Self::Number(id as i64)
    }
}

impl From<&str> for RequestId {
    fn from(id: &str) -> Self {
        Self::String(id.to_string())
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{}", n),
            Self::String(s) => f.write_str(s),
        }
    }
}

/// JSON-RPC request message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest<P> {
    /// JSON-RPC version (always "2.0").
    pub jsonrpc: String,
    /// Unique request ID.
    pub id: RequestId,
    /// Method name.
    pub method: String,
    /// Optional method parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<P>,
}

impl<P> JsonRpcRequest<P> {
    /// Create a new JSON-RPC request.
    pub fn new(id: impl Into<RequestId>, method: impl Into<String>, params: Option<P>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: id.into(),
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Error code.
    pub code: i32,
    /// Error message.
    pub message: String,
    /// Optional additional data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    /// Standard JSON-RPC error codes.
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;

    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }
}

/// JSON-RPC response message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse<R> {
    /// JSON-RPC version (always "2.0").
    pub jsonrpc: String,
    /// Request ID this is responding to.
    pub id: RequestId,
    /// Successful result (mutually exclusive with error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<R>,
    /// Error object (mutually exclusive with result).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl<R> JsonRpcResponse<R> {
    /// Successful response.
    pub fn success(id: RequestId, result: R) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Error response.
    pub fn failure(id: RequestId, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }

    /// Check if this response is an error.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// JSON-RPC notification (no ID, no response expected).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification<P> {
    /// JSON-RPC version (always "2.0").
    pub jsonrpc: String,
    /// Method name.
    pub method: String,
    /// Optional method parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<P>,
}

impl<P> JsonRpcNotification<P> {
    /// Create a new JSON-RPC notification.
    pub fn new(method: impl Into<String>, params: Option<P>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }
}

/// Any message arriving from the server, classified by shape.
#[derive(Debug, Clone)]
pub enum IncomingMessage {
    /// Server-initiated request that needs a reply.
    Request {
        id: RequestId,
        method: String,
        params: Option<Value>,
    },
    /// Server-initiated notification.
    Notification {
        method: String,
        params: Option<Value>,
    },
    /// Reply to one of our requests.
    Response {
        id: RequestId,
        result: Option<Value>,
        error: Option<JsonRpcError>,
    },
}

impl IncomingMessage {
    /// Parse a wire payload. Batches yield one entry per element, each
    /// classified on its own so a bad element does not hide its neighbours.
    ///
    /// Fails only when the payload is not JSON at all.
    pub fn parse_all(
        text: &str,
    ) -> Result<Vec<Result<IncomingMessage, serde_json::Error>>, serde_json::Error> {
        Ok(match serde_json::from_str::<Value>(text)? {
            Value::Array(items) => items.into_iter().map(Self::from_value).collect(),
            single => vec![Self::from_value(single)],
        })
    }

    fn from_value(value: Value) -> Result<IncomingMessage, serde_json::Error> {
        #[derive(Deserialize)]
        struct Raw {
            id: Option<RequestId>,
            method: Option<String>,
            params: Option<Value>,
            result: Option<Value>,
            error: Option<JsonRpcError>,
        }

        let raw: Raw = serde_json::from_value(value)?;
        Ok(match (raw.id, raw.method) {
            (Some(id), Some(method)) => IncomingMessage::Request {
                id,
                method,
                params: raw.params,
            },
            (None, Some(method)) => IncomingMessage::Notification {
                method,
                params: raw.params,
            },
            (Some(id), None) => IncomingMessage::Response {
                id,
                result: raw.result,
                error: raw.error,
            },
            (None, None) => {
                return Err(serde::de::Error::custom(
                    "message has neither an id nor a method",
                ))
            }
        })
    }
}

// ============================================================================
// Handshake
// ============================================================================

/// Client information sent during initialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    /// Client name.
    pub name: String,
    /// Client version.
    pub version: String,
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self {
            name: "mcplink".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Server information returned during initialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    /// Server name.
    pub name: String,
    /// Server version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Client capabilities for initialization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientCapabilities {
    /// Roots capability (for file system access).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roots: Option<RootsCapability>,
    /// Sampling capability.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sampling: Option<Map<String, Value>>,
    /// Elicitation capability.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elicitation: Option<Map<String, Value>>,
}

/// Roots capability.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RootsCapability {
    /// Whether the client sends `notifications/roots/list_changed`.
    #[serde(default)]
    pub list_changed: bool,
}

/// Server capabilities returned during initialization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerCapabilities {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompts: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logging: Option<Value>,
}

/// Parameters for the initialize request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    /// MCP protocol version.
    pub protocol_version: String,
    /// Client capabilities.
    pub capabilities: ClientCapabilities,
    /// Client information.
    pub client_info: ClientInfo,
}

/// Result of the initialize request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    /// MCP protocol version chosen by the server.
    pub protocol_version: String,
    /// Server capabilities.
    #[serde(default)]
    pub capabilities: ServerCapabilities,
    /// Server information.
    pub server_info: ServerInfo,
    /// Optional usage instructions from the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

// ============================================================================
// Listing
// ============================================================================

/// Cursor parameter shared by every `*/list` request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PaginatedParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

/// Result of the tools/list request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListToolsResult {
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// Result of the resources/list request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResourcesResult {
    #[serde(default)]
    pub resources: Vec<ResourceDefinition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// Result of the prompts/list request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListPromptsResult {
    #[serde(default)]
    pub prompts: Vec<PromptDefinition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// MCP tool definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    /// Tool name.
    pub name: String,
    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema for the tool's input parameters.
    #[serde(default)]
    pub input_schema: Value,
}

/// MCP resource definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDefinition {
    pub uri: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// MCP prompt definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub arguments: Vec<PromptArgument>,
}

/// A declared prompt argument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptArgument {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub required: bool,
}

// ============================================================================
// Invocation
// ============================================================================

/// Parameters for the tools/call request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallToolParams {
    /// Tool name.
    pub name: String,
    /// Tool arguments.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
}

/// Result of the tools/call request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResult {
    /// Content returned by the tool.
    #[serde(default)]
    pub content: Vec<Content>,
    /// Optional structured output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<Value>,
    /// Whether the tool execution resulted in an error.
    #[serde(default)]
    pub is_error: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadResourceParams {
    pub uri: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadResourceResult {
    #[serde(default)]
    pub contents: Vec<ResourceContents>,
}

/// Body of a resource, either text or base64 blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceContents {
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blob: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetPromptParams {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetPromptResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub messages: Vec<PromptMessage>,
}

/// One rendered prompt message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: Role,
    pub content: Content,
}

/// Content block carried by tool results, prompt messages and sampling messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Content {
    /// Text content.
    Text { text: String },
    /// Image content (base64 encoded).
    Image {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    /// Audio content (base64 encoded).
    Audio {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    /// Embedded resource.
    Resource { resource: ResourceContents },
    /// Link to a resource the client may read separately.
    ResourceLink {
        uri: String,
        #[serde(default)]
        name: String,
        #[serde(rename = "mimeType", default, skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
    },
}

impl Content {
    /// Create a text content item.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Get the text content if this is a text item.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }
}

// ============================================================================
// Server-initiated requests
// ============================================================================

/// Parameters of `sampling/createMessage`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMessageParams {
    pub messages: Vec<SamplingMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_preferences: Option<ModelPreferences>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop_sequences: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingMessage {
    pub role: Role,
    pub content: Content,
}

/// Server hints about which model to use.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelPreferences {
    #[serde(default)]
    pub hints: Vec<ModelHint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_priority: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed_priority: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intelligence_priority: Option<f64>,
    /// Non-standard keys, e.g. a plain `model` name.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ModelPreferences {
    /// The model the server asked for, if any.
    pub fn preferred_model(&self) -> Option<&str> {
        self.hints
            .iter()
            .find_map(|h| h.name.as_deref())
            .or_else(|| self.extra.get("model").and_then(Value::as_str))
            .filter(|m| !m.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelHint {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Result of `sampling/createMessage`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMessageResult {
    pub role: Role,
    pub content: Content,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
}

/// Parameters of `elicitation/create`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElicitParams {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub requested_schema: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElicitAction {
    Accept,
    Decline,
    Cancel,
}

/// Result of `elicitation/create`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElicitResult {
    pub action: ElicitAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
}

/// A filesystem root advertised to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Root {
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListRootsResult {
    pub roots: Vec<Root>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_serialization() {
        let request = JsonRpcRequest::new(
            1u64,
            "tools/call",
            Some(CallToolParams {
                name: "echo".to_string(),
                arguments: Some(json!({"message": "hi"})),
            }),
        );

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["jsonrpc"], "2.0");
        assert_eq!(json["id"], 1);
        assert_eq!(json["params"]["arguments"]["message"], "hi");
    }

    #[test]
    fn test_classify_incoming_messages() {
        let parsed: Vec<IncomingMessage> = IncomingMessage::parse_all(
            r#"[
                {"jsonrpc":"2.0","id":3,"result":{}},
                {"jsonrpc":"2.0","id":"s-1","method":"ping"},
                {"jsonrpc":"2.0","method":"notifications/tools/list_changed"}
            ]"#,
        )
        .unwrap()
        .into_iter()
        .collect::<Result<_, _>>()
        .unwrap();

        assert!(matches!(&parsed[0], IncomingMessage::Response { id: RequestId::Number(3), .. }));
        assert!(
            matches!(&parsed[1], IncomingMessage::Request { id: RequestId::String(s), method, .. } if s == "s-1" && method == "ping")
        );
        assert!(matches!(&parsed[2], IncomingMessage::Notification { .. }));

        let unclassified = IncomingMessage::parse_all(r#"{"jsonrpc":"2.0"}"#).unwrap();
        assert!(unclassified[0].is_err());
        assert!(IncomingMessage::parse_all("not json").is_err());
    }

    #[test]
    fn test_batch_elements_are_classified_independently() {
        let parsed = IncomingMessage::parse_all(
            r#"[{"jsonrpc":"2.0","id":7,"result":{"ok":true}}, 42, {"jsonrpc":"2.0"}]"#,
        )
        .unwrap();

        assert_eq!(parsed.len(), 3);
        assert!(matches!(
            &parsed[0],
            Ok(IncomingMessage::Response { id: RequestId::Number(7), .. })
        ));
        assert!(parsed[1].is_err());
        assert!(parsed[2].is_err());
    }

    #[test]
    fn test_error_response() {
        let parsed = IncomingMessage::parse_all(
            r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32601,"message":"Method not found"}}"#,
        )
        .unwrap();

        match &parsed[0] {
            Ok(IncomingMessage::Response { error: Some(error), .. }) => {
                assert_eq!(error.code, JsonRpcError::METHOD_NOT_FOUND);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_initialize_result_and_pagination() {
        let init: InitializeResult = serde_json::from_value(json!({
            "protocolVersion": "2025-03-26",
            "capabilities": {"tools": {"listChanged": true}},
            "serverInfo": {"name": "test-server", "version": "1.0.0"}
        }))
        .unwrap();
        assert_eq!(init.server_info.name, "test-server");
        assert!(init.capabilities.tools.is_some());
        assert!(init.capabilities.prompts.is_none());

        let page: ListToolsResult = serde_json::from_value(json!({
            "tools": [{"name": "echo", "inputSchema": {"type": "object"}}],
            "nextCursor": "page-2"
        }))
        .unwrap();
        assert_eq!(page.next_cursor.as_deref(), Some("page-2"));
    }

    #[test]
    fn test_content_variants() {
        let result: CallToolResult = serde_json::from_value(json!({
            "content": [
                {"type": "text", "text": "File contents here"},
                {"type": "resource", "resource": {"uri": "file:///a.txt", "text": "a"}},
                {"type": "resource_link", "uri": "file:///b.txt", "name": "b"}
            ],
            "isError": false
        }))
        .unwrap();
        assert_eq!(result.content[0].as_text(), Some("File contents here"));
        assert!(matches!(result.content[1], Content::Resource { .. }));
        assert!(matches!(result.content[2], Content::ResourceLink { .. }));
    }

    #[test]
    fn test_model_preferences() {
        let prefs: ModelPreferences = serde_json::from_value(json!({
            "hints": [{"name": "claude-3-5-haiku"}],
            "speedPriority": 0.8
        }))
        .unwrap();
        assert_eq!(prefs.preferred_model(), Some("claude-3-5-haiku"));

        let prefs: ModelPreferences = serde_json::from_value(json!({"model": "gpt-4o"})).unwrap();
        assert_eq!(prefs.preferred_model(), Some("gpt-4o"));

        assert_eq!(ModelPreferences::default().preferred_model(), None);
    }

    #[test]
    fn test_elicit_result_wire_format() {
        let result = ElicitResult {
            action: ElicitAction::Cancel,
            content: Some(json!({"error": "no tty"})),
        };
        assert_eq!(
            serde_json::to_value(result).unwrap(),
            json!({"action": "cancel", "content": {"error": "no tty"}})
        );
    }
}
