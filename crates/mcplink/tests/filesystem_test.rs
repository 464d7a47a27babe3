//! Integration tests against real stdio MCP servers.
//!
//! These need `npx` and network access to fetch the server package; when the
//! server cannot be started the tests report why and return early.

use std::time::Duration;

use mcplink::{load, LoadOptions};
use serde_json::json;

fn options() -> LoadOptions {
    LoadOptions::new()
        .call_timeout(Duration::from_secs(120))
        .allow_sampling(false)
        .allow_elicitation(false)
}

/// Test loading the filesystem MCP server with roots taken from its command line.
#[test]
fn test_filesystem_server() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("hello.txt"), "hello from mcplink").unwrap();
    let root = dir.path().canonicalize().unwrap();

    let command = vec![
        "npx".to_string(),
        "-y".to_string(),
        "@modelcontextprotocol/server-filesystem".to_string(),
        root.display().to_string(),
    ];

    let server = match load(command, options()) {
        Ok(server) => server,
        Err(e) => {
            eprintln!("Could not start filesystem server: {}", e);
            if let Some(hint) = e.recovery_suggestion() {
                eprintln!("{}", hint);
            }
            return;
        }
    };

    let names: Vec<String> = server.tools().iter().map(|t| t.name().to_string()).collect();
    assert!(
        names.iter().any(|n| n == "read_file" || n == "read_text_file"),
        "expected a file reading tool, got {:?}",
        names
    );

    let tool = if names.iter().any(|n| n == "read_text_file") {
        "read_text_file"
    } else {
        "read_file"
    };
    let path = root.join("hello.txt");
    let out = server
        .invoke(tool, json!({ "path": path.display().to_string() }))
        .unwrap();
    assert!(out.to_string().contains("hello from mcplink"));

    server.close();
}

/// With a call timeout, a process that is not an MCP server fails the load instead of hanging.
#[test]
fn test_non_mcp_process_fails() {
    let err = load(
        "/bin/sh -c 'echo not-json; sleep 30'",
        LoadOptions::new()
            .call_timeout(Duration::from_secs(2))
            .close_grace(Duration::from_millis(200)),
    )
    .unwrap_err();
    assert!(
        matches!(err, mcplink::Error::Timeout { .. }),
        "unexpected error: {err:?}"
    );
}
