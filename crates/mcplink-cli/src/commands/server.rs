//! Commands that connect to an MCP server.

use std::collections::BTreeMap;

use anyhow::{bail, Context};
use serde_json::{Map, Value};

use mcplink::{load, ServerHandle};

use crate::{AppContext, ConnectArgs};

fn connect(args: &ConnectArgs, ctx: &AppContext) -> anyhow::Result<ServerHandle> {
    let options = args.load_options(&ctx.config)?;
    tracing::debug!("Connecting to {}", args.target);
    match load(args.target.as_str(), options) {
        Ok(server) => Ok(server),
        Err(e) => {
            // Connection errors already carry their hint in the message.
            if !matches!(e, mcplink::Error::Connection { .. }) {
                if let Some(hint) = e.recovery_suggestion() {
                    eprintln!("hint: {}", hint);
                }
            }
            Err(e).with_context(|| format!("Failed to load '{}'", args.target))
        }
    }
}

/// Parse `key=value` pairs; values that are valid JSON keep their type.
pub fn parse_pairs(pairs: &[String]) -> anyhow::Result<Map<String, Value>> {
    let mut map = Map::new();
    for pair in pairs {
        let Some((key, raw)) = pair.split_once('=') else {
            bail!("Invalid argument '{}', expected key=value", pair);
        };
        if key.is_empty() {
            bail!("Invalid argument '{}', key is empty", pair);
        }
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        map.insert(key.to_string(), value);
    }
    Ok(map)
}

/// Combine `--json` and `key=value` arguments; pairs win on conflict.
pub fn build_arguments(json: Option<&str>, pairs: &[String]) -> anyhow::Result<Value> {
    let mut map = match json {
        Some(raw) => match serde_json::from_str(raw).context("Invalid --json argument")? {
            Value::Object(map) => map,
            other => bail!("--json must be an object, got {}", other),
        },
        None => Map::new(),
    };
    map.extend(parse_pairs(pairs)?);
    Ok(Value::Object(map))
}

/// Prompt arguments are strings; JSON values are rendered back to text.
fn prompt_arguments(pairs: &[String]) -> anyhow::Result<BTreeMap<String, String>> {
    Ok(parse_pairs(pairs)?
        .into_iter()
        .map(|(k, v)| match v {
            Value::String(s) => (k, s),
            other => (k, other.to_string()),
        })
        .collect())
}

pub fn list(args: &ConnectArgs, ctx: &AppContext) -> anyhow::Result<()> {
    let server = connect(args, ctx)?;

    if let Some(info) = server.server_info() {
        match info.version {
            Some(ref version) => println!("{} {}\n", info.name, version),
            None => println!("{}\n", info.name),
        }
    }

    let tools = server.tools();
    println!("Tools ({}):", tools.len());
    for tool in &tools {
        println!("  {}", tool.name());
        if let Some(description) = tool.description() {
            println!("      {}", description.lines().next().unwrap_or_default());
        }
        for param in tool.parameters() {
            let marker = if param.required { "" } else { "?" };
            println!("      - {}{}: {}", param.name, marker, param.type_name);
        }
    }

    let resources = server.resources();
    if !resources.is_empty() {
        println!("\nResources ({}):", resources.len());
        for resource in &resources {
            println!("  {} ({})", resource.name, resource.uri);
        }
    }

    let prompts = server.prompts();
    if !prompts.is_empty() {
        println!("\nPrompts ({}):", prompts.len());
        for prompt in &prompts {
            let names: Vec<&str> = prompt.arguments.iter().map(|a| a.name.as_str()).collect();
            println!("  {}({})", prompt.name, names.join(", "));
        }
    }

    server.close();
    Ok(())
}

pub fn call(
    args: &ConnectArgs,
    name: &str,
    json: Option<&str>,
    pairs: &[String],
    ctx: &AppContext,
) -> anyhow::Result<()> {
    let arguments = build_arguments(json, pairs)?;
    let server = connect(args, ctx)?;
    let result = server.invoke(name, arguments);
    server.close();
    println!("{}", result?);
    Ok(())
}

pub fn read(args: &ConnectArgs, uri: &str, ctx: &AppContext) -> anyhow::Result<()> {
    let server = connect(args, ctx)?;
    let result = server.read_resource(uri);
    server.close();
    println!("{}", result?);
    Ok(())
}

pub fn prompt(
    args: &ConnectArgs,
    name: &str,
    pairs: &[String],
    ctx: &AppContext,
) -> anyhow::Result<()> {
    let arguments = prompt_arguments(pairs)?;
    let server = connect(args, ctx)?;
    let result = server.get_prompt(name, arguments);
    server.close();
    println!("{}", result?);
    Ok(())
}
