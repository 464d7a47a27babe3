//! Credential resolution for remote servers.
//!
//! Precedence, highest first:
//! 1. an explicit [`AuthSpec`] passed to the loader
//! 2. an `Authorization` header supplied by the caller
//! 3. the default token (normally `MCP_TOKEN` from the environment)

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::error::{Error, Result};

/// Environment variable consulted when no other credential is given.
pub const TOKEN_ENV_VAR: &str = "MCP_TOKEN";

/// Produces request headers carrying credentials.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Headers to attach to every request sent to `url`.
    async fn headers(&self, url: &str) -> Result<BTreeMap<String, String>>;
}

fn bearer(token: &str) -> BTreeMap<String, String> {
    BTreeMap::from([("Authorization".to_string(), format!("Bearer {}", token))])
}

/// Static bearer token.
#[derive(Clone)]
pub struct BearerToken(String);

impl BearerToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BearerToken(***)")
    }
}

#[async_trait]
impl CredentialProvider for BearerToken {
    async fn headers(&self, _url: &str) -> Result<BTreeMap<String, String>> {
        Ok(bearer(&self.0))
    }
}

type TokenFn = Arc<dyn Fn() -> anyhow::Result<String> + Send + Sync>;

/// Token produced by a caller-supplied function at load time.
#[derive(Clone)]
pub struct TokenCallback(TokenFn);

impl TokenCallback {
    pub fn new(f: impl Fn() -> anyhow::Result<String> + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }
}

#[async_trait]
impl CredentialProvider for TokenCallback {
    async fn headers(&self, _url: &str) -> Result<BTreeMap<String, String>> {
        let token = (self.0)().map_err(|e| Error::config(format!("token callback failed: {}", e)))?;
        if token.is_empty() {
            return Ok(BTreeMap::new());
        }
        Ok(bearer(&token))
    }
}

/// How the caller asked to authenticate.
#[derive(Clone)]
pub enum AuthSpec {
    /// Literal bearer token.
    Bearer(String),
    /// Interactive OAuth flow through the configured provider.
    OAuth,
    /// Zero-argument token function.
    TokenFn(TokenFn),
    /// Fully custom credential provider.
    Provider(Arc<dyn CredentialProvider>),
}

impl fmt::Debug for AuthSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthSpec::Bearer(_) => f.write_str("Bearer(***)"),
            AuthSpec::OAuth => f.write_str("OAuth"),
            AuthSpec::TokenFn(_) => f.write_str("TokenFn"),
            AuthSpec::Provider(_) => f.write_str("Provider"),
        }
    }
}

impl From<&str> for AuthSpec {
    fn from(s: &str) -> Self {
        if s == "oauth" {
            AuthSpec::OAuth
        } else {
            AuthSpec::Bearer(s.to_string())
        }
    }
}

impl From<String> for AuthSpec {
    fn from(s: String) -> Self {
        AuthSpec::from(s.as_str())
    }
}

impl AuthSpec {
    /// Wrap a token function.
    pub fn token_fn(f: impl Fn() -> anyhow::Result<String> + Send + Sync + 'static) -> Self {
        AuthSpec::TokenFn(Arc::new(f))
    }

    /// Wrap a custom provider.
    pub fn provider(provider: impl CredentialProvider + 'static) -> Self {
        AuthSpec::Provider(Arc::new(provider))
    }

    /// Parse an auth value from configuration. Only strings are meaningful there.
    pub fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::String(s) => Ok(AuthSpec::from(s.as_str())),
            other => Err(Error::config(format!(
                "unsupported auth value: {} (expected a token string or \"oauth\")",
                other
            ))),
        }
    }
}

/// Everything credential resolution looks at.
#[derive(Clone, Default)]
pub struct AuthContext<'a> {
    pub auth: Option<&'a AuthSpec>,
    pub headers: Option<&'a BTreeMap<String, String>>,
    pub auto_auth: bool,
    pub oauth_provider: Option<Arc<dyn CredentialProvider>>,
    pub default_token: Option<&'a str>,
}

fn has_authorization(headers: Option<&BTreeMap<String, String>>) -> bool {
    headers.is_some_and(|h| h.keys().any(|k| k.eq_ignore_ascii_case("authorization")))
}

/// Compute the credential headers for `url`; empty when none apply.
pub async fn resolve_credentials(
    ctx: &AuthContext<'_>,
    url: &str,
) -> Result<BTreeMap<String, String>> {
    let provider: Arc<dyn CredentialProvider> = match ctx.auth {
        Some(AuthSpec::Bearer(token)) => Arc::new(BearerToken::new(token.clone())),
        Some(AuthSpec::TokenFn(f)) => Arc::new(TokenCallback(f.clone())),
        Some(AuthSpec::Provider(p)) => p.clone(),
        Some(AuthSpec::OAuth) => {
            if !ctx.auto_auth {
                return Err(Error::config(
                    "auth = \"oauth\" requires auto_auth to be enabled",
                ));
            }
            ctx.oauth_provider.clone().ok_or_else(|| {
                Error::config("auth = \"oauth\" requires an OAuth credential provider")
            })?
        }
        None => {
            if has_authorization(ctx.headers) {
                debug!("Using caller-supplied Authorization header");
                return Ok(BTreeMap::new());
            }
            match ctx.default_token.filter(|t| !t.is_empty()) {
                Some(token) => {
                    debug!("Using default bearer token");
                    return Ok(bearer(token));
                }
                None => return Ok(BTreeMap::new()),
            }
        }
    };

    provider.headers(url).await
}

#[cfg(test)]
mod tests {
    use super::*;

    const URL: &str = "http://localhost:8000/mcp";

    #[test]
    fn test_auth_spec_from_string() {
        assert!(matches!(AuthSpec::from("oauth"), AuthSpec::OAuth));
        assert!(matches!(AuthSpec::from("abc"), AuthSpec::Bearer(t) if t == "abc"));
        assert!(AuthSpec::from_value(&Value::from("tok")).is_ok());
        assert!(matches!(
            AuthSpec::from_value(&Value::from(42)),
            Err(Error::Config(_))
        ));
        assert_eq!(format!("{:?}", AuthSpec::from("secret")), "Bearer(***)");
    }

    #[tokio::test]
    async fn test_explicit_token_wins() {
        let auth = AuthSpec::from("explicit");
        let headers = BTreeMap::from([("authorization".to_string(), "Bearer header".to_string())]);
        let ctx = AuthContext {
            auth: Some(&auth),
            headers: Some(&headers),
            default_token: Some("env"),
            ..Default::default()
        };
        let resolved = resolve_credentials(&ctx, URL).await.unwrap();
        assert_eq!(resolved["Authorization"], "Bearer explicit");
    }

    #[tokio::test]
    async fn test_header_beats_default_token() {
        let headers = BTreeMap::from([("AUTHORIZATION".to_string(), "Bearer h".to_string())]);
        let ctx = AuthContext {
            headers: Some(&headers),
            default_token: Some("env"),
            ..Default::default()
        };
        assert!(resolve_credentials(&ctx, URL).await.unwrap().is_empty());

        let ctx = AuthContext {
            default_token: Some("env"),
            ..Default::default()
        };
        let resolved = resolve_credentials(&ctx, URL).await.unwrap();
        assert_eq!(resolved["Authorization"], "Bearer env");

        let ctx = AuthContext::default();
        assert!(resolve_credentials(&ctx, URL).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_token_callback() {
        let auth = AuthSpec::token_fn(|| Ok("generated".to_string()));
        let ctx = AuthContext {
            auth: Some(&auth),
            ..Default::default()
        };
        let resolved = resolve_credentials(&ctx, URL).await.unwrap();
        assert_eq!(resolved["Authorization"], "Bearer generated");

        let empty = AuthSpec::token_fn(|| Ok(String::new()));
        let ctx = AuthContext {
            auth: Some(&empty),
            ..Default::default()
        };
        assert!(resolve_credentials(&ctx, URL).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_oauth_requires_provider_and_auto_auth() {
        let auth = AuthSpec::OAuth;
        let ctx = AuthContext {
            auth: Some(&auth),
            auto_auth: true,
            ..Default::default()
        };
        assert!(matches!(
            resolve_credentials(&ctx, URL).await,
            Err(Error::Config(_))
        ));

        let ctx = AuthContext {
            auth: Some(&auth),
            auto_auth: false,
            oauth_provider: Some(Arc::new(BearerToken::new("oauth-token"))),
            ..Default::default()
        };
        assert!(resolve_credentials(&ctx, URL).await.is_err());

        let ctx = AuthContext {
            auth: Some(&auth),
            auto_auth: true,
            oauth_provider: Some(Arc::new(BearerToken::new("oauth-token"))),
            ..Default::default()
        };
        let resolved = resolve_credentials(&ctx, URL).await.unwrap();
        assert_eq!(resolved["Authorization"], "Bearer oauth-token");
    }

    #[tokio::test]
    async fn test_custom_provider_sees_url() {
        struct UrlEcho;

        #[async_trait]
        impl CredentialProvider for UrlEcho {
            async fn headers(&self, url: &str) -> Result<BTreeMap<String, String>> {
                Ok(BTreeMap::from([("X-Target".to_string(), url.to_string())]))
            }
        }

        let auth = AuthSpec::provider(UrlEcho);
        let ctx = AuthContext {
            auth: Some(&auth),
            ..Default::default()
        };
        let resolved = resolve_credentials(&ctx, URL).await.unwrap();
        assert_eq!(resolved["X-Target"], URL);
    }
}
