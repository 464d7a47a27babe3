//! Anthropic (Claude) provider implementation.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, instrument};

use mcplink_core::{Message, ProviderError, Role};

use crate::traits::{CompletionRequest, CompletionResponse, FinishReason, Provider, Usage};

/// Anthropic API base URL.
const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1";

/// Current Anthropic API version.
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Default Claude model for sampling.
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

/// Anthropic provider for Claude models.
pub struct AnthropicProvider {
    client: Client,
    api_key: String,
    base_url: String,
    default_model: String,
}

impl AnthropicProvider {
    /// Create a new Anthropic provider.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: ANTHROPIC_API_URL.to_string(),
            default_model: DEFAULT_MODEL.to_string(),
        }
    }

    /// Create from environment variable.
    pub fn from_env() -> Option<Self> {
        std::env::var("ANTHROPIC_API_KEY").ok().map(Self::new)
    }

    /// Set the default model.
    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    /// Point the provider at a different API root.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Convert messages to Anthropic format. System messages travel separately.
    fn format_messages(&self, messages: &[Message]) -> Vec<AnthropicMessage> {
        messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| AnthropicMessage {
                role: m.role.as_str().to_string(),
                content: vec![AnthropicContent::Text {
                    text: m.content.clone(),
                }],
            })
            .collect()
    }

    /// Extract system prompt from messages.
    fn extract_system(&self, messages: &[Message], explicit_system: Option<&str>) -> Option<String> {
        if let Some(sys) = explicit_system {
            return Some(sys.to_string());
        }

        messages
            .iter()
            .find(|m| m.role == Role::System)
            .map(|m| m.content.clone())
    }

    fn parse_response(&self, response: AnthropicResponse) -> CompletionResponse {
        let content = response
            .content
            .iter()
            .filter_map(|block| match block {
                AnthropicContent::Text { text } => Some(text.as_str()),
                AnthropicContent::Other => None,
            })
            .collect::<String>();

        let finish_reason = match response.stop_reason.as_deref() {
            Some("max_tokens") => FinishReason::MaxTokens,
            Some("refusal") => FinishReason::ContentFilter,
            _ => FinishReason::Stop,
        };

        CompletionResponse {
            content,
            model: response.model,
            finish_reason,
            usage: Usage {
                input_tokens: response.usage.input_tokens,
                output_tokens: response.usage.output_tokens,
            },
        }
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn id(&self) -> &str {
        "anthropic"
    }

    fn name(&self) -> &str {
        "Anthropic"
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }

    #[instrument(skip(self, request), fields(model = %request.model))]
    async fn complete(&self, request: CompletionRequest) -> anyhow::Result<CompletionResponse> {
        let model = if request.model.is_empty() {
            &self.default_model
        } else {
            &request.model
        };

        let api_request = AnthropicRequest {
            model: model.to_string(),
            messages: self.format_messages(&request.messages),
            system: self.extract_system(&request.messages, request.system.as_deref()),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            stop_sequences: if request.stop.is_empty() {
                None
            } else {
                Some(request.stop.clone())
            },
        };

        debug!("Sending request to Anthropic API");

        let response = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&api_request)
            .send()
            .await
            .map_err(|e| ProviderError::NetworkError {
                provider: "anthropic".to_string(),
                message: e.to_string(),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            error!("Anthropic API error: {} - {}", status, error_text);
            return Err(ProviderError::api_error("anthropic", status.as_u16(), error_text).into());
        }

        let api_response: AnthropicResponse = response.json().await?;
        Ok(self.parse_response(api_response))
    }
}

// Anthropic API types

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_sequences: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: String,
    content: Vec<AnthropicContent>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
enum AnthropicContent {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    #[serde(skip_serializing)]
    Other,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContent>,
    model: String,
    stop_reason: Option<String>,
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_provider_metadata() {
        let provider = AnthropicProvider::new("test-key");
        assert_eq!(provider.id(), "anthropic");
        assert_eq!(provider.name(), "Anthropic");
        assert_eq!(provider.default_model(), DEFAULT_MODEL);
        assert!(provider.is_configured());
        assert!(!AnthropicProvider::new("").is_configured());
    }

    #[test]
    fn test_format_messages_drops_system() {
        let provider = AnthropicProvider::new("test-key");

        let messages = vec![
            Message::system("be terse"),
            Message::user("Hello"),
            Message::assistant("Hi there!"),
        ];

        let formatted = provider.format_messages(&messages);
        assert_eq!(formatted.len(), 2);
        assert_eq!(formatted[0].role, "user");
        assert_eq!(formatted[1].role, "assistant");
        assert_eq!(
            provider.extract_system(&messages, None).as_deref(),
            Some("be terse")
        );
        assert_eq!(
            provider.extract_system(&messages, Some("explicit")).as_deref(),
            Some("explicit")
        );
    }

    #[tokio::test]
    async fn test_complete_against_mock_api() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/messages"))
            .and(header("x-api-key", "test-key"))
            .and(header("anthropic-version", ANTHROPIC_VERSION))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "msg_1",
                "type": "message",
                "role": "assistant",
                "model": "claude-sonnet-4-20250514",
                "content": [
                    {"type": "text", "text": "Paris"},
                    {"type": "tool_use", "id": "t1", "name": "x", "input": {}}
                ],
                "stop_reason": "end_turn",
                "usage": {"input_tokens": 12, "output_tokens": 1}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = AnthropicProvider::new("test-key").with_base_url(server.uri());
        let request = CompletionRequest::new("", vec![Message::user("Capital of France?")], 50);
        let response = provider.complete(request).await.unwrap();

        assert_eq!(response.content, "Paris");
        assert_eq!(response.model, "claude-sonnet-4-20250514");
        assert_eq!(response.finish_reason, FinishReason::Stop);
        assert_eq!(response.usage.input_tokens, 12);
    }

    #[tokio::test]
    async fn test_auth_failure_maps_to_provider_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid x-api-key"))
            .mount(&server)
            .await;

        let provider = AnthropicProvider::new("bad").with_base_url(server.uri());
        let err = provider
            .complete(CompletionRequest::new("", vec![Message::user("hi")], 10))
            .await
            .unwrap_err();

        let provider_err = err.downcast_ref::<ProviderError>().unwrap();
        assert!(matches!(provider_err, ProviderError::AuthenticationFailed { .. }));
    }
}
