//! Loading a server: target parsing, options, and the connect sequence.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use mcplink_core::Config;
use mcplink_providers::ProviderCredentials;
use tracing::{debug, info, warn};

use crate::auth::{resolve_credentials, AuthContext, AuthSpec, CredentialProvider, TOKEN_ENV_VAR};
use crate::callbacks::{
    CallbackRouter, DefaultSamplingHandler, ElicitationHandler, SamplingHandler,
    TerminalElicitationHandler, DEFAULT_MAX_TOKENS,
};
use crate::error::{Error, Result};
use crate::protocol::{ClientInfo, Root};
use crate::registry::CapabilityRegistry;
use crate::runtime::{with_deadline, BackgroundRuntime};
use crate::server::ServerHandle;
use crate::session::McpSession;
use crate::transport::{header_map, merge_accept_header, Transport, TransportConfig};

/// Name of the worker thread that owns a loaded server's I/O.
pub const WORKER_THREAD_NAME: &str = "mcplink-worker";

/// Prefixes that mark a target as a command line rather than a registered name.
const LAUNCHER_PREFIXES: [&str; 5] = ["python", "npx", "node", "uv", "/"];

/// Arguments with these prefixes are never taken as filesystem roots.
const NON_ROOT_PREFIXES: [&str; 5] = ["-", "npx", "node", "@", "uv"];

/// What to load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Already-split command vector.
    Command(Vec<String>),
    /// Remote endpoint.
    Url(String),
    /// Unparsed string: a URL, a command line, or a registered server name.
    Line(String),
}

impl From<&str> for Target {
    fn from(s: &str) -> Self {
        Target::Line(s.to_string())
    }
}

impl From<String> for Target {
    fn from(s: String) -> Self {
        Target::Line(s)
    }
}

impl From<Vec<String>> for Target {
    fn from(parts: Vec<String>) -> Self {
        Target::Command(parts)
    }
}

impl From<&[&str]> for Target {
    fn from(parts: &[&str]) -> Self {
        Target::Command(parts.iter().map(|s| s.to_string()).collect())
    }
}

impl<const N: usize> From<[&str; N]> for Target {
    fn from(parts: [&str; N]) -> Self {
        Target::Command(parts.iter().map(|s| s.to_string()).collect())
    }
}

/// A target after URL detection, registry lookup and splitting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Command(Vec<String>),
    Url(String),
}

impl Endpoint {
    pub fn describe(&self) -> String {
        match self {
            Endpoint::Command(parts) => parts.join(" "),
            Endpoint::Url(url) => url.clone(),
        }
    }
}

fn is_url(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://")
}

impl Target {
    /// Resolve against the named server registry and split command lines.
    pub fn resolve(self, servers: &BTreeMap<String, String>) -> Result<Endpoint> {
        let line = match self {
            Target::Url(url) => return Ok(Endpoint::Url(url)),
            Target::Command(parts) if parts.is_empty() => {
                return Err(Error::config("command cannot be empty"))
            }
            Target::Command(parts) => return Ok(Endpoint::Command(parts)),
            Target::Line(line) => line,
        };

        let line = line.trim();
        if is_url(line) {
            return Ok(Endpoint::Url(line.to_string()));
        }

        let mut line = line.to_string();
        if !LAUNCHER_PREFIXES.iter().any(|p| line.starts_with(p)) {
            if let Some(registered) = servers.get(&line) {
                debug!(name = %line, command = %registered, "Using registered server");
                line = registered.clone();
                if is_url(&line) {
                    return Ok(Endpoint::Url(line));
                }
            }
        }

        let parts = split_command(&line)?;
        if parts.is_empty() {
            return Err(Error::config("command cannot be empty"));
        }
        Ok(Endpoint::Command(parts))
    }
}

/// Split a command line into arguments, honoring quotes and backslash escapes.
pub fn split_command(line: &str) -> Result<Vec<String>> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(ch) => current.push(ch),
                        None => return Err(Error::config("unterminated single quote in command")),
                    }
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(ch @ ('"' | '\\' | '$' | '`')) => current.push(ch),
                            Some(ch) => {
                                current.push('\\');
                                current.push(ch);
                            }
                            None => {
                                return Err(Error::config("unterminated double quote in command"))
                            }
                        },
                        Some(ch) => current.push(ch),
                        None => return Err(Error::config("unterminated double quote in command")),
                    }
                }
            }
            '\\' => {
                in_word = true;
                if let Some(ch) = chars.next() {
                    current.push(ch);
                }
            }
            c if c.is_whitespace() => {
                if in_word {
                    parts.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            c => {
                in_word = true;
                current.push(c);
            }
        }
    }

    if in_word {
        parts.push(current);
    }
    Ok(parts)
}

/// Turn paths into advertised roots: absolute `file://` URIs named after the
/// final path component.
pub fn roots_from_paths<P: AsRef<Path>>(paths: &[P]) -> Vec<Root> {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
    paths
        .iter()
        .map(|p| {
            let p = p.as_ref();
            let absolute = if p.is_absolute() {
                p.to_path_buf()
            } else {
                cwd.join(p)
            };
            let name = absolute
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| absolute.display().to_string());
            Root {
                uri: format!("file://{}", absolute.display()),
                name: Some(name),
            }
        })
        .collect()
}

/// Roots implied by a filesystem server's command line.
pub fn detect_roots(command: &[String]) -> Vec<PathBuf> {
    if !command.iter().any(|part| part.contains("server-filesystem")) {
        return Vec::new();
    }
    command
        .iter()
        .filter(|arg| arg.contains('/'))
        .filter(|arg| !NON_ROOT_PREFIXES.iter().any(|p| arg.starts_with(p)))
        .map(PathBuf::from)
        .collect()
}

/// Options for [`load`].
#[derive(Clone)]
pub struct LoadOptions {
    pub(crate) headers: BTreeMap<String, String>,
    pub(crate) auth: Option<AuthSpec>,
    pub(crate) auto_auth: bool,
    pub(crate) oauth_provider: Option<Arc<dyn CredentialProvider>>,
    pub(crate) default_token: Option<String>,
    pub(crate) timeout: Duration,
    pub(crate) call_timeout: Option<Duration>,
    pub(crate) sse_read_timeout: Duration,
    pub(crate) close_grace: Duration,
    pub(crate) allow_sampling: bool,
    pub(crate) on_sampling: Option<Arc<dyn SamplingHandler>>,
    pub(crate) allow_elicitation: bool,
    pub(crate) on_elicitation: Option<Arc<dyn ElicitationHandler>>,
    pub(crate) roots: Vec<PathBuf>,
    pub(crate) sampling_credentials: Option<ProviderCredentials>,
    pub(crate) sampling_model: Option<String>,
    pub(crate) sampling_max_tokens: u32,
    pub(crate) client_name: String,
    pub(crate) env: HashMap<String, String>,
    pub(crate) working_dir: Option<PathBuf>,
    pub(crate) servers: BTreeMap<String, String>,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            headers: BTreeMap::new(),
            auth: None,
            auto_auth: true,
            oauth_provider: None,
            default_token: None,
            timeout: Duration::from_secs(30),
            call_timeout: None,
            sse_read_timeout: Duration::from_secs(300),
            close_grace: Duration::from_secs(5),
            allow_sampling: true,
            on_sampling: None,
            allow_elicitation: true,
            on_elicitation: None,
            roots: Vec::new(),
            sampling_credentials: None,
            sampling_model: None,
            sampling_max_tokens: DEFAULT_MAX_TOKENS,
            client_name: ClientInfo::default().name,
            env: HashMap::new(),
            working_dir: None,
            servers: BTreeMap::new(),
        }
    }
}

impl std::fmt::Debug for LoadOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadOptions")
            .field("headers", &self.headers.keys().collect::<Vec<_>>())
            .field("auth", &self.auth)
            .field("auto_auth", &self.auto_auth)
            .field("timeout", &self.timeout)
            .field("call_timeout", &self.call_timeout)
            .field("allow_sampling", &self.allow_sampling)
            .field("allow_elicitation", &self.allow_elicitation)
            .field("roots", &self.roots)
            .field("client_name", &self.client_name)
            .finish_non_exhaustive()
    }
}

impl LoadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed timeouts, client name, sampling credentials and named servers from configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            timeout: config.client.request_timeout(),
            call_timeout: config.client.call_timeout(),
            sse_read_timeout: config.client.sse_read_timeout(),
            close_grace: config.client.close_grace(),
            client_name: config.client.name.clone(),
            sampling_credentials: Some(ProviderCredentials::from_config(&config.sampling)),
            sampling_model: config.sampling.model.clone(),
            sampling_max_tokens: config.sampling.max_tokens,
            servers: config.servers.clone(),
            ..Self::default()
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn headers(mut self, headers: BTreeMap<String, String>) -> Self {
        self.headers.extend(headers);
        self
    }

    /// Token string, `"oauth"`, or any other [`AuthSpec`].
    pub fn auth(mut self, auth: impl Into<AuthSpec>) -> Self {
        self.auth = Some(auth.into());
        self
    }

    pub fn auto_auth(mut self, enabled: bool) -> Self {
        self.auto_auth = enabled;
        self
    }

    /// Provider that runs the interactive flow behind `auth("oauth")`.
    pub fn oauth_provider(mut self, provider: impl CredentialProvider + 'static) -> Self {
        self.oauth_provider = Some(Arc::new(provider));
        self
    }

    /// Token used when neither `auth` nor an `Authorization` header is given.
    pub fn default_token(mut self, token: impl Into<String>) -> Self {
        self.default_token = Some(token.into());
        self
    }

    /// Take the default token from `MCP_TOKEN`, if set.
    pub fn from_env_token(mut self) -> Self {
        self.default_token = std::env::var(TOKEN_ENV_VAR).ok().filter(|t| !t.is_empty());
        self
    }

    /// HTTP connect timeout. Stdio servers and in-flight calls are not bounded by it.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Deadline for loading and for each call. `None` (the default) waits as long
    /// as the server does, including while it waits on sampling or elicitation.
    pub fn call_timeout(mut self, timeout: impl Into<Option<Duration>>) -> Self {
        self.call_timeout = timeout.into();
        self
    }

    pub fn sse_read_timeout(mut self, timeout: Duration) -> Self {
        self.sse_read_timeout = timeout;
        self
    }

    pub fn close_grace(mut self, grace: Duration) -> Self {
        self.close_grace = grace;
        self
    }

    pub fn allow_sampling(mut self, allow: bool) -> Self {
        self.allow_sampling = allow;
        self
    }

    pub fn on_sampling(mut self, handler: impl SamplingHandler + 'static) -> Self {
        self.on_sampling = Some(Arc::new(handler));
        self
    }

    pub fn allow_elicitation(mut self, allow: bool) -> Self {
        self.allow_elicitation = allow;
        self
    }

    pub fn on_elicitation(mut self, handler: impl ElicitationHandler + 'static) -> Self {
        self.on_elicitation = Some(Arc::new(handler));
        self
    }

    pub fn root(mut self, path: impl Into<PathBuf>) -> Self {
        self.roots.push(path.into());
        self
    }

    pub fn roots<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.roots.extend(paths.into_iter().map(Into::into));
        self
    }

    pub fn sampling_credentials(mut self, credentials: ProviderCredentials) -> Self {
        self.sampling_credentials = Some(credentials);
        self
    }

    pub fn sampling_model(mut self, model: impl Into<String>) -> Self {
        self.sampling_model = Some(model.into());
        self
    }

    pub fn client_name(mut self, name: impl Into<String>) -> Self {
        self.client_name = name.into();
        self
    }

    /// Extra environment for a spawned server process.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Register a named server for this load.
    pub fn server(mut self, name: impl Into<String>, command: impl Into<String>) -> Self {
        self.servers.insert(name.into(), command.into());
        self
    }

    fn callback_router(&self, roots: Vec<Root>) -> CallbackRouter {
        let mut router = CallbackRouter::new().with_roots(roots);

        if self.allow_sampling {
            let handler: Arc<dyn SamplingHandler> = match &self.on_sampling {
                Some(handler) => handler.clone(),
                None => {
                    let credentials = self
                        .sampling_credentials
                        .clone()
                        .unwrap_or_else(ProviderCredentials::from_env);
                    let mut default = DefaultSamplingHandler::new(credentials)
                        .with_max_tokens(self.sampling_max_tokens);
                    if let Some(model) = &self.sampling_model {
                        default = default.with_model(model.clone());
                    }
                    if !default.can_handle() {
                        debug!("No LLM credentials found; sampling requests will fail");
                    }
                    Arc::new(default)
                }
            };
            router = router.with_sampling(handler);
        }

        if self.allow_elicitation {
            let handler: Arc<dyn ElicitationHandler> = match &self.on_elicitation {
                Some(handler) => handler.clone(),
                None => Arc::new(TerminalElicitationHandler::new()),
            };
            router = router.with_elicitation(handler);
        }

        router
    }

    fn client_info(&self) -> ClientInfo {
        ClientInfo {
            name: self.client_name.clone(),
            ..ClientInfo::default()
        }
    }
}

/// How the session obtains its transport.
enum Connect {
    Config(TransportConfig),
    Http(String),
    Ready(Box<dyn Transport>),
}

/// Connect to a server, perform the handshake and index its capabilities.
///
/// Blocks until the server is ready. The returned handle owns a dedicated worker
/// thread; dropping or closing the handle shuts it down.
pub fn load(target: impl Into<Target>, options: LoadOptions) -> Result<ServerHandle> {
    let endpoint = target.into().resolve(&options.servers)?;

    match endpoint {
        Endpoint::Url(url) => {
            let roots = roots_from_paths(&options.roots);
            establish(url.clone(), roots, options, Connect::Http(url))
        }
        Endpoint::Command(parts) => {
            let target = parts.join(" ");
            let paths = if options.roots.is_empty() {
                detect_roots(&parts)
            } else {
                options.roots.clone()
            };
            if !paths.is_empty() {
                debug!(roots = ?paths, "Advertising roots");
            }
            let roots = roots_from_paths(&paths);

            let mut parts = parts.into_iter();
            let command = parts.next().ok_or_else(|| Error::config("command cannot be empty"))?;
            let config = TransportConfig::Stdio {
                command,
                args: parts.collect(),
                env: options.env.clone(),
                working_dir: options.working_dir.clone(),
            };
            establish(target, roots, options, Connect::Config(config))
        }
    }
}

/// Like [`load`], over a transport the caller already opened.
pub fn load_with_transport(
    transport: Box<dyn Transport>,
    options: LoadOptions,
) -> Result<ServerHandle> {
    let roots = roots_from_paths(&options.roots);
    establish("custom transport".to_string(), roots, options, Connect::Ready(transport))
}

fn establish(
    target: String,
    roots: Vec<Root>,
    options: LoadOptions,
    connect: Connect,
) -> Result<ServerHandle> {
    info!(target = %target, "Loading MCP server");

    let runtime = BackgroundRuntime::start(WORKER_THREAD_NAME)?;
    let router = options.callback_router(roots);
    let session = Arc::new(McpSession::new(&target, options.client_info(), router));
    let deadline = options.call_timeout;
    let grace = options.close_grace;

    let handshake = {
        let session = session.clone();
        let target = target.clone();
        async move {
            match connect {
                Connect::Config(config) => session.connect(config).await?,
                Connect::Ready(transport) => session.connect_with(transport).await?,
                Connect::Http(url) => {
                    let config = http_config(&url, &options).await?;
                    session.connect(config).await?
                }
            }

            session.initialize().await?;
            let tools = session.list_tools().await?;
            let resources = session.list_resources().await.unwrap_or_else(|e| {
                debug!(target = %target, error = %e, "Server does not list resources");
                Vec::new()
            });
            let prompts = session.list_prompts().await.unwrap_or_else(|e| {
                debug!(target = %target, error = %e, "Server does not list prompts");
                Vec::new()
            });
            CapabilityRegistry::build(tools, resources, prompts)
        }
    };

    let outcome = runtime.run(with_deadline(
        format!("loading {}", target),
        deadline,
        handshake,
    ));

    match outcome {
        Ok(registry) => {
            info!(
                target = %target,
                tools = registry.tools().len(),
                resources = registry.resources().len(),
                prompts = registry.prompts().len(),
                "MCP server ready"
            );
            Ok(ServerHandle::new(runtime, session, registry, target, deadline, grace))
        }
        Err(e) => {
            warn!(target = %target, error = %e, "Failed to load MCP server");
            let closing = session.clone();
            let _ = runtime.run(async move {
                closing.close(grace).await;
                Ok(())
            });
            runtime.close(grace);
            Err(e)
        }
    }
}

async fn http_config(url: &str, options: &LoadOptions) -> Result<TransportConfig> {
    let ctx = AuthContext {
        auth: options.auth.as_ref(),
        headers: Some(&options.headers),
        auto_auth: options.auto_auth,
        oauth_provider: options.oauth_provider.clone(),
        default_token: options.default_token.as_deref(),
    };
    let credentials = resolve_credentials(&ctx, url).await?;

    let mut headers = header_map(options.headers.iter())?;
    // Credential headers override caller headers of the same name.
    headers.extend(header_map(credentials.iter())?);
    merge_accept_header(&mut headers);

    Ok(TransportConfig::Http {
        url: url.to_string(),
        headers,
        connect_timeout: options.timeout,
        sse_read_timeout: options.sse_read_timeout,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_split_command() {
        assert_eq!(
            split_command("python tests/server.py --port 8000").unwrap(),
            strings(&["python", "tests/server.py", "--port", "8000"])
        );
        assert_eq!(
            split_command(r#"node "my server.js" 'single quoted' a\ b"#).unwrap(),
            strings(&["node", "my server.js", "single quoted", "a b"])
        );
        assert_eq!(
            split_command(r#"echo "say \"hi\"" ''"#).unwrap(),
            strings(&["echo", "say \"hi\"", ""])
        );
        assert!(split_command("   ").unwrap().is_empty());
        assert!(matches!(split_command("echo 'oops"), Err(Error::Config(_))));
    }

    #[test]
    fn test_target_resolution() {
        let servers = BTreeMap::from([
            ("weather".to_string(), "npx -y @h1deya/mcp-server-weather".to_string()),
            ("remote".to_string(), "https://example.com/mcp".to_string()),
        ]);

        assert_eq!(
            Target::from("https://api.example.com/mcp").resolve(&servers).unwrap(),
            Endpoint::Url("https://api.example.com/mcp".to_string())
        );
        assert_eq!(
            Target::from("weather").resolve(&servers).unwrap(),
            Endpoint::Command(strings(&["npx", "-y", "@h1deya/mcp-server-weather"]))
        );
        assert_eq!(
            Target::from("remote").resolve(&servers).unwrap(),
            Endpoint::Url("https://example.com/mcp".to_string())
        );
        // Launcher prefixes skip the registry.
        assert_eq!(
            Target::from("python weather").resolve(&servers).unwrap(),
            Endpoint::Command(strings(&["python", "weather"]))
        );
        // Unknown names run as commands.
        assert_eq!(
            Target::from("my-server").resolve(&servers).unwrap(),
            Endpoint::Command(strings(&["my-server"]))
        );
        assert_eq!(
            Target::from(["python", "server.py"]).resolve(&servers).unwrap(),
            Endpoint::Command(strings(&["python", "server.py"]))
        );

        assert!(matches!(
            Target::from("").resolve(&servers),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            Target::Command(vec![]).resolve(&servers),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_detect_roots_for_filesystem_server() {
        let cmd = strings(&[
            "npx",
            "-y",
            "@modelcontextprotocol/server-filesystem",
            "/tmp",
            "./data/docs",
            "--flag=/x",
        ]);
        assert_eq!(
            detect_roots(&cmd),
            vec![PathBuf::from("/tmp"), PathBuf::from("./data/docs")]
        );

        assert!(detect_roots(&strings(&["python", "/srv/server.py"])).is_empty());
    }

    #[test]
    fn test_roots_from_paths() {
        let roots = roots_from_paths(&["/tmp/project", "relative/dir"]);
        assert_eq!(roots[0].uri, "file:///tmp/project");
        assert_eq!(roots[0].name.as_deref(), Some("project"));

        assert!(roots[1].uri.starts_with("file:///"));
        assert!(roots[1].uri.ends_with("relative/dir"));
        assert_eq!(roots[1].name.as_deref(), Some("dir"));
    }

    #[test]
    fn test_options_defaults_and_config() {
        let options = LoadOptions::new();
        assert!(options.auto_auth);
        assert!(options.allow_sampling);
        assert!(options.allow_elicitation);
        assert_eq!(options.timeout, Duration::from_secs(30));
        assert_eq!(options.call_timeout, None);

        let mut config = Config::default();
        config.client.request_timeout_secs = 12;
        config.client.call_timeout_secs = Some(90);
        config.client.name = "custom".to_string();
        config
            .servers
            .insert("fs".to_string(), "npx server-filesystem /tmp".to_string());

        let options = LoadOptions::from_config(&config);
        assert_eq!(options.timeout, Duration::from_secs(12));
        assert_eq!(options.call_timeout, Some(Duration::from_secs(90)));
        assert_eq!(options.clone().call_timeout(None).call_timeout, None);
        assert_eq!(options.client_info().name, "custom");
        assert!(options.servers.contains_key("fs"));
    }

    #[test]
    fn test_router_follows_allow_flags() {
        let caps = LoadOptions::new()
            .sampling_credentials(ProviderCredentials::default())
            .callback_router(vec![])
            .capabilities();
        assert!(caps.sampling.is_some());
        assert!(caps.elicitation.is_some());
        assert!(caps.roots.is_none());

        let caps = LoadOptions::new()
            .allow_sampling(false)
            .allow_elicitation(false)
            .callback_router(roots_from_paths(&["/tmp"]))
            .capabilities();
        assert!(caps.sampling.is_none());
        assert!(caps.elicitation.is_none());
        assert!(caps.roots.is_some());
    }

    #[tokio::test]
    async fn test_http_config_merges_headers_and_credentials() {
        let options = LoadOptions::new()
            .header("X-Trace", "1")
            .header("Accept", "application/json")
            .auth("secret");
        let config = http_config("http://localhost:8000/mcp", &options).await.unwrap();

        let TransportConfig::Http { headers, .. } = config else {
            panic!("expected an HTTP config");
        };
        assert_eq!(headers["x-trace"], "1");
        assert_eq!(headers["authorization"], "Bearer secret");
        assert_eq!(headers["accept"], "application/json, text/event-stream");
    }

    #[test]
    fn test_load_missing_command_fails_cleanly() {
        let err = load("/definitely/not/a/server --stdio", LoadOptions::new()).unwrap_err();
        assert!(matches!(err, Error::Connection { .. }), "got {err:?}");
    }
}
