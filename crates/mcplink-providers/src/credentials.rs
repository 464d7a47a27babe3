//! Provider credential discovery and model routing.
//!
//! Credentials are looked up in a fixed order (Anthropic, OpenAI, Google) so
//! that the same environment always selects the same default model.

use std::sync::Arc;

use mcplink_core::config::{ProviderConfig, SamplingConfig};
use mcplink_core::ProviderError;

use crate::{anthropic, gemini, openai};
use crate::{AnthropicProvider, GeminiProvider, OpenAIProvider, Provider};

/// Supported LLM backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Anthropic,
    OpenAI,
    Google,
}

impl ProviderKind {
    /// Selection order when nothing else decides.
    pub const ORDER: [ProviderKind; 3] = [Self::Anthropic, Self::OpenAI, Self::Google];

    /// Provider identifier.
    pub fn id(&self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::OpenAI => "openai",
            Self::Google => "google",
        }
    }

    /// Model used when only the provider is known.
    pub fn default_model(&self) -> &'static str {
        match self {
            Self::Anthropic => anthropic::DEFAULT_MODEL,
            Self::OpenAI => openai::DEFAULT_MODEL,
            Self::Google => gemini::DEFAULT_MODEL,
        }
    }

    /// Environment variables consulted for this provider's key, in order.
    pub fn env_vars(&self) -> &'static [&'static str] {
        match self {
            Self::Anthropic => &["ANTHROPIC_API_KEY"],
            Self::OpenAI => &["OPENAI_API_KEY"],
            Self::Google => &["GOOGLE_API_KEY", "GEMINI_API_KEY"],
        }
    }

    /// Infer the provider from a model name.
    ///
    /// Accepts both bare names (`claude-...`, `gpt-4o`, `gemini-2.0-flash`) and
    /// routed names (`anthropic/claude-...`, `gemini/gemini-pro`).
    pub fn for_model(model: &str) -> Option<(ProviderKind, String)> {
        if let Some((prefix, rest)) = model.split_once('/') {
            let kind = match prefix {
                "anthropic" => Some(Self::Anthropic),
                "openai" => Some(Self::OpenAI),
                "google" | "gemini" => Some(Self::Google),
                _ => None,
            };
            if let Some(kind) = kind {
                return Some((kind, rest.to_string()));
            }
        }

        let lower = model.to_ascii_lowercase();
        let kind = if lower.starts_with("claude") {
            Self::Anthropic
        } else if lower.starts_with("gpt")
            || lower.starts_with("o1")
            || lower.starts_with("o3")
            || lower.starts_with("o4")
            || lower.starts_with("chatgpt")
        {
            Self::OpenAI
        } else if lower.starts_with("gemini") {
            Self::Google
        } else {
            return None;
        };
        Some((kind, model.to_string()))
    }
}

/// A discovered API key and optional endpoint override.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub api_key: String,
    pub base_url: Option<String>,
}

/// Credentials for every provider that could serve a sampling request.
#[derive(Debug, Clone, Default)]
pub struct ProviderCredentials {
    pub anthropic: Option<Credential>,
    pub openai: Option<Credential>,
    pub google: Option<Credential>,
}

impl ProviderCredentials {
    /// Discover credentials from the standard environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Discover credentials from configuration, falling back to the environment.
    pub fn from_config(config: &SamplingConfig) -> Self {
        let env = Self::from_env();
        let pick = |cfg: &Option<ProviderConfig>, fallback: Option<Credential>| {
            match cfg {
                Some(cfg) => match cfg.resolve_api_key().filter(|k| !k.is_empty()) {
                    Some(api_key) => Some(Credential {
                        api_key,
                        base_url: cfg.base_url.clone(),
                    }),
                    None => fallback.map(|c| Credential {
                        base_url: cfg.base_url.clone().or(c.base_url),
                        ..c
                    }),
                },
                None => fallback,
            }
        };
        Self {
            anthropic: pick(&config.anthropic, env.anthropic),
            openai: pick(&config.openai, env.openai),
            google: pick(&config.google, env.google),
        }
    }

    /// Discover credentials through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let find = |kind: ProviderKind| {
            kind.env_vars()
                .iter()
                .filter_map(|var| lookup(var))
                .find(|value| !value.is_empty())
                .map(|api_key| Credential {
                    api_key,
                    base_url: None,
                })
        };
        Self {
            anthropic: find(ProviderKind::Anthropic),
            openai: find(ProviderKind::OpenAI),
            google: find(ProviderKind::Google),
        }
    }

    /// Credential for a specific provider.
    pub fn get(&self, kind: ProviderKind) -> Option<&Credential> {
        match kind {
            ProviderKind::Anthropic => self.anthropic.as_ref(),
            ProviderKind::OpenAI => self.openai.as_ref(),
            ProviderKind::Google => self.google.as_ref(),
        }
    }

    /// True when no provider has a key.
    pub fn is_empty(&self) -> bool {
        ProviderKind::ORDER.iter().all(|k| self.get(*k).is_none())
    }

    /// First provider with a key, in selection order.
    pub fn first_available(&self) -> Option<ProviderKind> {
        ProviderKind::ORDER.into_iter().find(|k| self.get(*k).is_some())
    }

    /// Build a provider client for the given backend.
    pub fn provider(&self, kind: ProviderKind) -> Result<Arc<dyn Provider>, ProviderError> {
        let cred = self.get(kind).ok_or_else(|| ProviderError::NotConfigured {
            provider: kind.id().to_string(),
            env_var: kind.env_vars().first().map(|v| v.to_string()),
        })?;

        let provider: Arc<dyn Provider> = match kind {
            ProviderKind::Anthropic => {
                let mut p = AnthropicProvider::new(&cred.api_key);
                if let Some(ref url) = cred.base_url {
                    p = p.with_base_url(url);
                }
                Arc::new(p)
            }
            ProviderKind::OpenAI => {
                let mut p = OpenAIProvider::new(&cred.api_key);
                if let Some(ref url) = cred.base_url {
                    p = p.with_base_url(url);
                }
                Arc::new(p)
            }
            ProviderKind::Google => {
                let mut p = GeminiProvider::new(&cred.api_key);
                if let Some(ref url) = cred.base_url {
                    p = p.with_base_url(url);
                }
                Arc::new(p)
            }
        };
        Ok(provider)
    }

    /// Resolve a model name to a provider client and the model id to send.
    ///
    /// With no model, the first available provider and its default model are used.
    /// A model whose provider cannot be inferred is routed to the first available
    /// provider unchanged.
    pub fn route(&self, model: Option<&str>) -> Result<(Arc<dyn Provider>, String), ProviderError> {
        match model {
            Some(model) => {
                let (kind, model_id) = match ProviderKind::for_model(model) {
                    Some(found) => found,
                    None => (
                        self.first_available().ok_or(ProviderError::NoCredentials)?,
                        model.to_string(),
                    ),
                };
                Ok((self.provider(kind)?, model_id))
            }
            None => {
                let kind = self.first_available().ok_or(ProviderError::NoCredentials)?;
                Ok((self.provider(kind)?, kind.default_model().to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn creds(vars: &[(&str, &str)]) -> ProviderCredentials {
        let map: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        ProviderCredentials::from_lookup(|var| map.get(var).cloned())
    }

    #[test]
    fn test_selection_order_prefers_anthropic() {
        let c = creds(&[("OPENAI_API_KEY", "sk-o"), ("ANTHROPIC_API_KEY", "sk-a")]);
        assert_eq!(c.first_available(), Some(ProviderKind::Anthropic));

        let (provider, model) = c.route(None).unwrap();
        assert_eq!(provider.id(), "anthropic");
        assert_eq!(model, "claude-sonnet-4-20250514");
    }

    #[test]
    fn test_gemini_key_alias() {
        let c = creds(&[("GEMINI_API_KEY", "g")]);
        assert_eq!(c.first_available(), Some(ProviderKind::Google));
        assert_eq!(c.route(None).unwrap().1, "gemini-2.0-flash");
    }

    #[test]
    fn test_empty_values_are_ignored() {
        let c = creds(&[("ANTHROPIC_API_KEY", ""), ("OPENAI_API_KEY", "sk-o")]);
        assert_eq!(c.first_available(), Some(ProviderKind::OpenAI));
    }

    #[test]
    fn test_no_credentials() {
        let c = creds(&[]);
        assert!(c.is_empty());
        assert!(matches!(c.route(None), Err(ProviderError::NoCredentials)));
        assert!(matches!(
            c.route(Some("claude-3-5-haiku")),
            Err(ProviderError::NotConfigured { .. })
        ));
    }

    #[test]
    fn test_model_routing() {
        assert_eq!(
            ProviderKind::for_model("gpt-4o"),
            Some((ProviderKind::OpenAI, "gpt-4o".to_string()))
        );
        assert_eq!(
            ProviderKind::for_model("gemini/gemini-pro"),
            Some((ProviderKind::Google, "gemini-pro".to_string()))
        );
        assert_eq!(
            ProviderKind::for_model("anthropic/claude-3-opus"),
            Some((ProviderKind::Anthropic, "claude-3-opus".to_string()))
        );
        assert_eq!(ProviderKind::for_model("llama3"), None);

        let c = creds(&[("OPENAI_API_KEY", "sk-o")]);
        let (provider, model) = c.route(Some("llama3")).unwrap();
        assert_eq!(provider.id(), "openai");
        assert_eq!(model, "llama3");
    }

    #[test]
    fn test_config_key_overrides_env() {
        let config = SamplingConfig {
            openai: Some(ProviderConfig {
                api_key: Some("from-config".to_string()),
                base_url: Some("http://localhost:8080/v1".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let c = ProviderCredentials::from_config(&config);
        let openai = c.openai.unwrap();
        assert_eq!(openai.api_key, "from-config");
        assert_eq!(openai.base_url.as_deref(), Some("http://localhost:8080/v1"));
    }
}
