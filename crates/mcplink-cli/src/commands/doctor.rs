//! Diagnostic command to check installation.

use mcplink_providers::{ProviderCredentials, ProviderKind};

use crate::AppContext;

pub fn run(ctx: &AppContext) -> anyhow::Result<()> {
    println!("Running diagnostics...\n");

    // Check config directory
    let config_dir = mcplink_core::Config::config_dir();
    println!("Config directory: {:?}", config_dir);
    if config_dir.join("config.toml").exists() {
        println!("  ✓ config.toml found");
    } else {
        println!("  ✗ No config.toml (defaults in use)");
    }

    let validation = ctx.config.validate();
    for issue in &validation.issues {
        println!("  ! {}: {}", issue.field, issue.message);
    }

    // Check sampling credentials
    println!("\nSampling providers:");
    let credentials = ProviderCredentials::from_config(&ctx.config.sampling);
    for kind in ProviderKind::ORDER {
        let vars = kind.env_vars().join(" or ");
        if credentials.get(kind).is_some() {
            println!("  ✓ {} configured", kind.id());
        } else {
            println!("  ✗ {} not configured (set {})", kind.id(), vars);
        }
    }

    match ctx.config.sampling.model {
        Some(ref model) => println!("\nSampling model: {} (from config)", model),
        None => match credentials.first_available() {
            Some(kind) => println!("\nSampling model: {} (auto)", kind.default_model()),
            None => println!("\nSampling model: ✗ none, sampling requests will be refused"),
        },
    }

    // Check bearer token
    println!("\nAuthentication:");
    if std::env::var(mcplink::auth::TOKEN_ENV_VAR).is_ok() {
        println!("  ✓ {} is set", mcplink::auth::TOKEN_ENV_VAR);
    } else {
        println!("  ✗ {} is not set", mcplink::auth::TOKEN_ENV_VAR);
    }

    // Registered servers
    println!("\nServers:");
    if ctx.config.servers.is_empty() {
        println!("  (none registered)");
    }
    for (name, target) in &ctx.config.servers {
        println!("  - {} -> {}", name, target);
    }

    println!("\nDiagnostics complete.");
    Ok(())
}
