//! Error types for mcplink.
//!
//! This module provides the workspace-wide error hierarchy, with structured
//! errors that include context and recovery suggestions.

use thiserror::Error;

/// Result type alias using the core error.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for mcplink.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Provider error with structured details
    #[error("{0}")]
    Provider(#[from] ProviderError),

    /// MCP session error
    #[error("MCP error: {0}")]
    Mcp(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Get a recovery suggestion for this error.
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            Error::Config(_) => Some("Check your config file at ~/.config/mcplink/config.toml"),
            Error::Provider(e) => e.recovery_suggestion(),
            _ => None,
        }
    }

    /// Create a provider-not-configured error.
    pub fn provider_not_configured(provider: &str) -> Self {
        Error::Provider(ProviderError::NotConfigured {
            provider: provider.to_string(),
            env_var: match provider {
                "anthropic" => Some("ANTHROPIC_API_KEY".to_string()),
                "openai" => Some("OPENAI_API_KEY".to_string()),
                "google" => Some("GOOGLE_API_KEY".to_string()),
                _ => None,
            },
        })
    }
}

/// Provider-specific errors with detailed context.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// Provider not configured
    #[error("Provider '{provider}' is not configured")]
    NotConfigured {
        provider: String,
        env_var: Option<String>,
    },

    /// No provider credentials at all
    #[error("No API keys found. Set ANTHROPIC_API_KEY, OPENAI_API_KEY, or GOOGLE_API_KEY")]
    NoCredentials,

    /// Authentication failed
    #[error("Authentication failed for {provider}: {message}")]
    AuthenticationFailed { provider: String, message: String },

    /// API request failed
    #[error("API request to {provider} failed: {status} - {message}")]
    ApiError {
        provider: String,
        status: u16,
        message: String,
    },

    /// Model not found
    #[error("Model '{model}' not found for provider '{provider}'")]
    ModelNotFound { provider: String, model: String },

    /// Network error
    #[error("Network error connecting to {provider}: {message}")]
    NetworkError { provider: String, message: String },
}

impl ProviderError {
    /// Get a recovery suggestion for this error.
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            ProviderError::NotConfigured {
                env_var: Some(_), ..
            } => Some("Set the API key environment variable"),
            ProviderError::NotConfigured { .. } => {
                Some("Configure the provider in ~/.config/mcplink/config.toml")
            }
            ProviderError::NoCredentials => {
                Some("Export an LLM API key or pass an explicit sampling model")
            }
            ProviderError::AuthenticationFailed { .. } => {
                Some("Check that your API key is valid and not expired")
            }
            ProviderError::ApiError { status: 429, .. } => {
                Some("You've hit rate limits. Wait a moment and try again")
            }
            ProviderError::ApiError {
                status: 500..=599, ..
            } => Some("The API service is having issues. Try again later"),
            ProviderError::NetworkError { .. } => Some("Check your internet connection"),
            _ => None,
        }
    }

    /// Create an API error from status code and message.
    pub fn api_error(provider: impl Into<String>, status: u16, message: impl Into<String>) -> Self {
        match status {
            401 | 403 => ProviderError::AuthenticationFailed {
                provider: provider.into(),
                message: message.into(),
            },
            _ => ProviderError::ApiError {
                provider: provider.into(),
                status,
                message: message.into(),
            },
        }
    }
}

/// Format an error with its recovery suggestion.
pub fn format_error_with_suggestion(error: &Error) -> String {
    let mut output = error.to_string();
    if let Some(suggestion) = error.recovery_suggestion() {
        output.push_str(&format!("\n  Suggestion: {}", suggestion));
    }
    output
}
