//! Error types for loading and talking to MCP servers.

use thiserror::Error;

/// Result type alias for mcplink operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by a transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Failed to spawn the child process.
    #[error("failed to spawn process: {0}")]
    SpawnFailed(std::io::Error),

    /// Failed to write to the transport.
    #[error("write error: {0}")]
    WriteError(std::io::Error),

    /// Failed to read from the transport.
    #[error("read error: {0}")]
    ReadError(std::io::Error),

    /// Connection was closed by the other side.
    #[error("connection closed")]
    ConnectionClosed,

    /// Transport is not connected.
    #[error("not connected")]
    NotConnected,

    /// HTTP request could not be completed.
    #[error("HTTP request failed: {0}")]
    Http(String),

    /// HTTP endpoint answered with a non-success status.
    #[error("HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    /// HTTP endpoint rejected the credentials.
    #[error("unauthorized (HTTP {status}): {body}")]
    Unauthorized { status: u16, body: String },

    /// A configured header name or value is not valid HTTP.
    #[error("invalid header '{0}'")]
    InvalidHeader(String),
}

impl TransportError {
    /// Whether the transport rejected the request for credential reasons.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, TransportError::Unauthorized { .. })
    }
}

/// Errors that can occur while loading or using an MCP server.
#[derive(Debug, Error)]
pub enum Error {
    /// The transport could not be opened.
    #[error("failed to connect to {target}: {message}. {hint}")]
    Connection {
        target: String,
        message: String,
        hint: String,
    },

    /// Credentials were rejected.
    #[error("authentication failed for {target}: {message}")]
    Authentication { target: String, message: String },

    /// Handshake failed or the server sent malformed data.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Requested capability is not offered by the server.
    #[error("'{name}' not found. Available: {}", format_available(.available))]
    CapabilityNotFound { name: String, available: Vec<String> },

    /// The server ran the tool and reported failure.
    #[error("tool '{name}' failed: {message}")]
    ToolExecution { name: String, message: String },

    /// The server answered with a JSON-RPC error.
    #[error("server error (code {code}): {message}")]
    Server { code: i32, message: String },

    /// An operation was attempted before the handshake.
    #[error("session not initialized; call initialize first")]
    NotInitialized,

    /// The session is closed or never connected.
    #[error("not connected")]
    NotConnected,

    /// The connection dropped while a request was in flight.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// Two provider names normalize to the same identifier.
    #[error("capability names '{first}' and '{second}' both normalize to '{normalized}'")]
    NameCollision {
        normalized: String,
        first: String,
        second: String,
    },

    /// Invalid load options or configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// An operation did not finish within the configured timeout.
    #[error("{operation} timed out after {seconds}s")]
    Timeout { operation: String, seconds: u64 },

    /// The background runtime failed or was misused.
    #[error("runtime error: {0}")]
    Runtime(String),

    /// Operation not valid in the session's current state.
    #[error("invalid session state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn format_available(names: &[String]) -> String {
    if names.is_empty() {
        "(none)".to_string()
    } else {
        names.join(", ")
    }
}

impl Error {
    /// Create a protocol error.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid state error.
    pub fn invalid_state(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::InvalidState {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, after: std::time::Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            seconds: after.as_secs(),
        }
    }

    /// Build a connection error with manual-test guidance for the target.
    pub fn connection(target: impl Into<String>, message: impl Into<String>) -> Self {
        let target = target.into();
        let hint = if target.starts_with("http://") || target.starts_with("https://") {
            format!(
                "Check that the server is running and reachable, then test it manually with: curl -v {}",
                target
            )
        } else {
            format!(
                "Check that the command exists and starts an MCP server on stdio, then run it directly: {}",
                target
            )
        };
        Self::Connection {
            target,
            message: message.into(),
            hint,
        }
    }

    /// Convert a transport failure, keeping authentication rejections distinguishable.
    pub fn from_transport(target: &str, error: TransportError) -> Self {
        match error {
            TransportError::Unauthorized { status, body } => Self::Authentication {
                target: target.to_string(),
                message: if body.is_empty() {
                    format!("HTTP {}", status)
                } else {
                    format!("HTTP {}: {}", status, body)
                },
            },
            TransportError::SpawnFailed(e) => Self::connection(target, e.to_string()),
            TransportError::Http(message) => Self::connection(target, message),
            other => Self::Transport(other),
        }
    }

    /// Whether this error was caused by rejected credentials.
    pub fn is_auth_error(&self) -> bool {
        match self {
            Error::Authentication { .. } => true,
            Error::Transport(e) => e.is_unauthorized(),
            _ => false,
        }
    }

    /// Get a recovery suggestion for this error.
    pub fn recovery_suggestion(&self) -> Option<&str> {
        match self {
            Error::Connection { hint, .. } => Some(hint),
            Error::Authentication { .. } => {
                Some("Check the token passed via auth, the Authorization header, or MCP_TOKEN")
            }
            Error::CapabilityNotFound { .. } => Some("Run `mcplink tools <target>` to list capabilities"),
            Error::Timeout { .. } => {
                Some("Raise call_timeout, or check that the server and any callback handlers respond")
            }
            Error::NotInitialized => Some("Call initialize() before any other session operation"),
            Error::NotConnected | Error::ConnectionLost(_) => {
                Some("Load the server again; the session cannot be reused")
            }
            Error::NameCollision { .. } => {
                Some("The server exposes names that differ only in case or separators")
            }
            Error::Config(_) => Some("Check your load options and ~/.config/mcplink/config.toml"),
            _ => None,
        }
    }
}

impl From<Error> for mcplink_core::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::Config(msg) => mcplink_core::Error::Config(msg),
            other => mcplink_core::Error::Mcp(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_display() {
        let err = TransportError::ConnectionClosed;
        assert_eq!(err.to_string(), "connection closed");
    }

    #[test]
    fn test_capability_not_found_lists_names() {
        let err = Error::CapabilityNotFound {
            name: "missing".to_string(),
            available: vec!["echo".to_string(), "add".to_string()],
        };
        let text = err.to_string();
        assert!(text.contains("missing"));
        assert!(text.contains("echo, add"));

        let empty = Error::CapabilityNotFound {
            name: "x".to_string(),
            available: vec![],
        };
        assert!(empty.to_string().contains("(none)"));
    }

    #[test]
    fn test_unauthorized_maps_to_authentication() {
        let err = Error::from_transport(
            "http://localhost:8000/mcp",
            TransportError::Unauthorized {
                status: 401,
                body: "bad token".to_string(),
            },
        );
        assert!(err.is_auth_error());
        assert!(matches!(err, Error::Authentication { .. }));

        let err = Error::from_transport("cat", TransportError::ConnectionClosed);
        assert!(!err.is_auth_error());
    }

    #[test]
    fn test_connection_hint_depends_on_target() {
        let http = Error::connection("https://example.com/mcp", "refused");
        assert!(http.recovery_suggestion().unwrap().contains("curl -v https://example.com/mcp"));

        let stdio = Error::connection("python server.py", "No such file");
        assert!(stdio.recovery_suggestion().unwrap().contains("python server.py"));

        let text = http.to_string();
        assert!(text.starts_with("failed to connect to https://example.com/mcp: refused."));
        assert!(text.contains("curl -v https://example.com/mcp"));
    }

    #[test]
    fn test_error_to_core_error() {
        let core: mcplink_core::Error = Error::config("bad auth").into();
        assert!(matches!(core, mcplink_core::Error::Config(_)));

        let core: mcplink_core::Error = Error::NotConnected.into();
        assert!(matches!(core, mcplink_core::Error::Mcp(_)));
    }
}
