//! Configuration system for mcplink.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Main configuration struct for mcplink.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Client and connection settings
    pub client: ClientConfig,
    /// Sampling (provider-initiated LLM completion) settings
    pub sampling: SamplingConfig,
    /// Named servers: name -> command line or URL
    pub servers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Client name reported during the handshake
    pub name: String,
    /// HTTP connect timeout in seconds
    pub request_timeout_secs: u64,
    /// Optional deadline for loading and for each call, in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_timeout_secs: Option<u64>,
    /// Grace period for closing a session, in seconds
    pub close_grace_secs: u64,
    /// Read timeout for long-lived SSE streams, in seconds
    pub sse_read_timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            name: "mcplink".to_string(),
            request_timeout_secs: 30,
            call_timeout_secs: None,
            close_grace_secs: 5,
            sse_read_timeout_secs: 300,
        }
    }
}

impl ClientConfig {
    /// Request timeout as a duration.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Call deadline as a duration; `None` means calls are not bounded.
    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout_secs.map(Duration::from_secs)
    }

    /// Close grace period as a duration.
    pub fn close_grace(&self) -> Duration {
        Duration::from_secs(self.close_grace_secs)
    }

    /// SSE read timeout as a duration.
    pub fn sse_read_timeout(&self) -> Duration {
        Duration::from_secs(self.sse_read_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Explicit model override (skips auto-detection)
    pub model: Option<String>,
    /// Default maximum output tokens when the provider does not ask for a limit
    pub max_tokens: u32,
    /// Anthropic credentials
    pub anthropic: Option<ProviderConfig>,
    /// OpenAI credentials
    pub openai: Option<ProviderConfig>,
    /// Google (Gemini) credentials
    pub google: Option<ProviderConfig>,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            model: None,
            max_tokens: 1000,
            anthropic: None,
            openai: None,
            google: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// API key (can be set directly or via environment)
    pub api_key: Option<String>,
    /// Environment variable name for API key
    pub api_key_env: Option<String>,
    /// Base URL (optional, for custom endpoints)
    pub base_url: Option<String>,
}

impl ProviderConfig {
    /// Resolve the API key from either direct value or environment variable.
    pub fn resolve_api_key(&self) -> Option<String> {
        if let Some(ref key) = self.api_key {
            return Some(key.clone());
        }
        if let Some(ref env_var) = self.api_key_env {
            if let Ok(key) = std::env::var(env_var) {
                return Some(key);
            }
        }
        None
    }
}

/// Validation result with multiple issues.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    /// List of validation issues
    pub issues: Vec<ValidationIssue>,
}

impl ValidationResult {
    /// Create a new empty validation result.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if validation passed (no errors).
    pub fn is_ok(&self) -> bool {
        !self.issues.iter().any(|i| i.severity == IssueSeverity::Error)
    }

    /// Get only error-level issues.
    pub fn errors(&self) -> Vec<&ValidationIssue> {
        self.issues.iter().filter(|i| i.severity == IssueSeverity::Error).collect()
    }

    /// Get only warning-level issues.
    pub fn warnings(&self) -> Vec<&ValidationIssue> {
        self.issues.iter().filter(|i| i.severity == IssueSeverity::Warning).collect()
    }

    /// Add an error.
    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.issues.push(ValidationIssue {
            severity: IssueSeverity::Error,
            field: field.into(),
            message: message.into(),
        });
    }

    /// Add a warning.
    pub fn add_warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.issues.push(ValidationIssue {
            severity: IssueSeverity::Warning,
            field: field.into(),
            message: message.into(),
        });
    }
}

/// A single validation issue.
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    /// Severity of the issue
    pub severity: IssueSeverity,
    /// Field path (e.g., "client.request_timeout_secs")
    pub field: String,
    /// Human-readable message
    pub message: String,
}

/// Severity level for validation issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueSeverity {
    /// Warnings don't prevent loading
    Warning,
    /// Errors prevent loading
    Error,
}

impl Config {
    /// Build the layered figment: defaults, user config, project config, environment.
    ///
    /// Environment variables use `__` as the section separator, e.g.
    /// `MCPLINK_CLIENT__REQUEST_TIMEOUT_SECS=10`.
    pub fn figment() -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(Self::config_dir().join("config.toml")))
            .merge(Toml::file(".mcplink/config.toml"))
            .merge(Env::prefixed("MCPLINK_").split("__"))
    }

    /// Load configuration from all sources.
    pub fn load() -> Result<Self, figment::Error> {
        Self::figment().extract()
    }

    /// Load and validate configuration.
    pub fn load_validated() -> Result<Self, Error> {
        let config = Self::load().map_err(|e| Error::Config(e.to_string()))?;
        let result = config.validate();

        if !result.is_ok() {
            let errors: Vec<String> = result
                .errors()
                .iter()
                .map(|e| format!("{}: {}", e.field, e.message))
                .collect();
            return Err(Error::Config(format!(
                "Configuration validation failed:\n  {}",
                errors.join("\n  ")
            )));
        }

        for warning in result.warnings() {
            tracing::warn!("Config warning - {}: {}", warning.field, warning.message);
        }

        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::new();

        if self.client.name.trim().is_empty() {
            result.add_error("client.name", "Client name cannot be empty");
        }

        if self.client.request_timeout_secs == 0 {
            result.add_error(
                "client.request_timeout_secs",
                "request_timeout_secs must be greater than 0",
            );
        }

        if self.client.call_timeout_secs == Some(0) {
            result.add_error(
                "client.call_timeout_secs",
                "call_timeout_secs must be greater than 0, or unset for no deadline",
            );
        }

        if self.client.close_grace_secs == 0 {
            result.add_error("client.close_grace_secs", "close_grace_secs must be greater than 0");
        } else if self.client.close_grace_secs > 60 {
            result.add_warning(
                "client.close_grace_secs",
                "close_grace_secs is very high (> 60s), closing a stuck server will be slow",
            );
        }

        if self.sampling.max_tokens == 0 {
            result.add_error("sampling.max_tokens", "max_tokens must be greater than 0");
        }

        for (field, provider) in [
            ("sampling.anthropic", &self.sampling.anthropic),
            ("sampling.openai", &self.sampling.openai),
            ("sampling.google", &self.sampling.google),
        ] {
            let Some(provider) = provider else { continue };
            if provider.api_key.as_ref().map(|k| k.is_empty()).unwrap_or(false) {
                result.add_warning(format!("{}.api_key", field), "API key is empty string");
            }
            if let Some(ref base_url) = provider.base_url {
                if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
                    result.add_error(
                        format!("{}.base_url", field),
                        "base_url must start with http:// or https://",
                    );
                }
            }
        }

        for (name, target) in &self.servers {
            if target.trim().is_empty() {
                result.add_error(format!("servers.{}", name), "Server target cannot be empty");
            }
        }

        result
    }

    /// Look up a named server's command line or URL.
    pub fn server(&self, name: &str) -> Option<&str> {
        self.servers.get(name).map(String::as_str)
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String, Error> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    /// Get the configuration directory.
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|p| p.join("mcplink"))
            .unwrap_or_else(|| PathBuf::from("~/.config/mcplink"))
    }
}
