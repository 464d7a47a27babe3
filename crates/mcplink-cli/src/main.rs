//! # mcplink-cli
//!
//! Command-line client for MCP servers.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use mcplink::LoadOptions;
use mcplink_core::Config;

mod commands;

/// Application context containing shared state.
pub struct AppContext {
    pub config: Config,
}

/// mcplink - call MCP server tools from the command line
#[derive(Parser)]
#[command(name = "mcplink")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Options shared by every command that connects to a server.
#[derive(Args, Debug, Clone)]
pub struct ConnectArgs {
    /// Command line, URL, or registered server name
    #[arg(value_name = "TARGET")]
    pub target: String,

    /// Extra HTTP header, as "Name: value"
    #[arg(short = 'H', long = "header", value_name = "HEADER")]
    pub headers: Vec<String>,

    /// Bearer token, or "oauth"
    #[arg(long, env = "MCPLINK_AUTH", hide_env_values = true)]
    pub auth: Option<String>,

    /// HTTP connect timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Give up on loading or on the call after this many seconds
    #[arg(long, value_name = "SECS")]
    pub call_timeout: Option<u64>,

    /// Directory to advertise as a root
    #[arg(long = "root", value_name = "PATH")]
    pub roots: Vec<PathBuf>,

    /// Refuse sampling requests from the server
    #[arg(long)]
    pub no_sampling: bool,

    /// Refuse elicitation requests from the server
    #[arg(long)]
    pub no_elicitation: bool,
}

impl ConnectArgs {
    /// Build load options on top of the configuration defaults.
    pub fn load_options(&self, config: &Config) -> anyhow::Result<LoadOptions> {
        let mut options = LoadOptions::from_config(config)
            .from_env_token()
            .allow_sampling(!self.no_sampling)
            .allow_elicitation(!self.no_elicitation)
            .roots(self.roots.iter().cloned());

        for raw in &self.headers {
            let (name, value) = raw
                .split_once(':')
                .with_context(|| format!("Invalid header '{}', expected \"Name: value\"", raw))?;
            options = options.header(name.trim(), value.trim());
        }
        if let Some(ref auth) = self.auth {
            options = options.auth(auth.as_str());
        }
        if let Some(secs) = self.timeout {
            options = options.timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = self.call_timeout {
            options = options.call_timeout(Duration::from_secs(secs));
        }
        Ok(options)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// List a server's tools, resources and prompts
    Tools {
        #[command(flatten)]
        connect: ConnectArgs,
    },
    /// Call a tool (or any capability) by name
    Call {
        #[command(flatten)]
        connect: ConnectArgs,
        /// Tool name, original or snake_case
        name: String,
        /// Arguments as a JSON object
        #[arg(long, value_name = "JSON")]
        json: Option<String>,
        /// Arguments as key=value (values parsed as JSON when possible)
        #[arg(value_name = "KEY=VALUE")]
        args: Vec<String>,
    },
    /// Read a resource by URI or name
    Read {
        #[command(flatten)]
        connect: ConnectArgs,
        /// Resource URI or name
        uri: String,
    },
    /// Render a prompt
    Prompt {
        #[command(flatten)]
        connect: ConnectArgs,
        /// Prompt name
        name: String,
        /// Prompt arguments as key=value
        #[arg(value_name = "KEY=VALUE")]
        args: Vec<String>,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Diagnose configuration and credentials
    Doctor,
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Show current configuration
    Show,
    /// Print the config file location
    Path,
    /// List registered servers
    Servers,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging; RUST_LOG overrides the default level.
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    // Load configuration
    let config = Config::load_validated().unwrap_or_else(|e| {
        tracing::warn!("Failed to load config, using defaults: {}", e);
        Config::default()
    });
    let ctx = AppContext { config };

    match cli.command {
        Commands::Tools { connect } => commands::server::list(&connect, &ctx),
        Commands::Call {
            connect,
            name,
            json,
            args,
        } => commands::server::call(&connect, &name, json.as_deref(), &args, &ctx),
        Commands::Read { connect, uri } => commands::server::read(&connect, &uri, &ctx),
        Commands::Prompt {
            connect,
            name,
            args,
        } => commands::server::prompt(&connect, &name, &args, &ctx),
        Commands::Config { action } => commands::config::handle(action, &ctx),
        Commands::Doctor => commands::doctor::run(&ctx),
    }
}
