//! # mcplink
//!
//! Blocking client for MCP (Model Context Protocol) servers.
//!
//! This crate provides:
//! - [`load`]: connect to a local command or remote URL and index what it offers
//! - [`ServerHandle`]: call tools, read resources and render prompts by name
//!   from ordinary synchronous code
//! - stdio and streamable HTTP transports, driven by a background worker thread
//! - answers to server-initiated sampling, elicitation and roots requests
//!
//! ```no_run
//! use mcplink::{load, LoadOptions};
//! use serde_json::json;
//!
//! let server = load("npx -y @modelcontextprotocol/server-filesystem /tmp", LoadOptions::new())?;
//! let listing = server.invoke("list_directory", json!({ "path": "/tmp" }))?;
//! println!("{}", listing);
//! server.close();
//! # Ok::<(), mcplink::Error>(())
//! ```

pub mod auth;
pub mod callbacks;
pub mod error;
pub mod loader;
pub mod protocol;
pub mod registry;
pub mod runtime;
pub mod server;
pub mod session;
pub mod sse;
pub mod transport;

pub use auth::{AuthSpec, BearerToken, CredentialProvider, TokenCallback};
pub use callbacks::{
    CallbackRouter, DefaultSamplingHandler, ElicitationHandler, SamplingHandler, SamplingRequest,
    SamplingResponse, TerminalElicitationHandler,
};
pub use error::{Error, Result, TransportError};
pub use loader::{load, load_with_transport, LoadOptions, Target};
pub use protocol::{Content, PromptDefinition, ResourceDefinition, Root, ToolDefinition};
pub use registry::{normalize_name, CapabilityKind, Parameter};
pub use server::{Capability, Output, ServerHandle, ToolHandle};
pub use session::{McpSession, SessionState};
pub use transport::{MemoryPeer, MemoryTransport, Transport, TransportConfig};
