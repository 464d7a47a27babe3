//! Streamable HTTP tests against a wiremock-backed MCP server.

use std::thread;
use std::time::Duration;

use mcplink::{load, Error, LoadOptions, Output};
use serde_json::{json, Value};
use tokio::runtime::Runtime;
use wiremock::matchers::path;
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

const SESSION_ID: &str = "session-7f3a";
const TOKEN: &str = "test-token-12345";

/// Minimal MCP server: `echo` answers with JSON, `add` answers over an event stream.
struct FakeMcp {
    token: Option<&'static str>,
}

fn header<'a>(request: &'a Request, name: &str) -> Option<&'a str> {
    request.headers.get(name).and_then(|v| v.to_str().ok())
}

fn rpc_result(id: &Value, result: Value) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "result": result})
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

impl Respond for FakeMcp {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        if let Some(token) = self.token {
            let expected = format!("Bearer {}", token);
            if header(request, "authorization") != Some(expected.as_str()) {
                return ResponseTemplate::new(401).set_body_string("invalid or missing token");
            }
        }

        match request.method.as_str() {
            "GET" => return ResponseTemplate::new(405),
            "DELETE" => return ResponseTemplate::new(200),
            _ => {}
        }

        let accept = header(request, "accept").unwrap_or_default();
        if !accept.contains("application/json") || !accept.contains("text/event-stream") {
            return ResponseTemplate::new(406).set_body_string("bad accept header");
        }

        let Ok(message) = serde_json::from_slice::<Value>(&request.body) else {
            return ResponseTemplate::new(400).set_body_string("bad json");
        };
        let method = message["method"].as_str().unwrap_or_default();

        if method != "initialize" {
            if header(request, "mcp-session-id") != Some(SESSION_ID) {
                return ResponseTemplate::new(400).set_body_string("missing session id");
            }
            if header(request, "mcp-protocol-version") != Some("2025-06-18") {
                return ResponseTemplate::new(400).set_body_string("missing protocol version");
            }
        }

        let Some(id) = message.get("id") else {
            return ResponseTemplate::new(202);
        };

        let params = &message["params"];
        let body = match method {
            "initialize" => rpc_result(
                id,
                json!({
                    "protocolVersion": "2025-06-18",
                    "capabilities": {"tools": {"listChanged": false}},
                    "serverInfo": {"name": "wiremock-mcp", "version": "0.1.0"}
                }),
            ),
            "tools/list" => rpc_result(
                id,
                json!({"tools": [
                    {
                        "name": "echo",
                        "description": "Echo back the message",
                        "inputSchema": {
                            "type": "object",
                            "properties": {"message": {"type": "string"}},
                            "required": ["message"]
                        }
                    },
                    {
                        "name": "add",
                        "description": "Add two numbers",
                        "inputSchema": {
                            "type": "object",
                            "properties": {"a": {"type": "number"}, "b": {"type": "number"}},
                            "required": ["a", "b"]
                        }
                    }
                ]}),
            ),
            "tools/call" if params["name"] == "echo" => rpc_result(
                id,
                json!({"content": [{"type": "text", "text": params["arguments"]["message"]}]}),
            ),
            "tools/call" if params["name"] == "add" => {
                let a = params["arguments"]["a"].as_f64().unwrap_or_default();
                let b = params["arguments"]["b"].as_f64().unwrap_or_default();
                let log = json!({
                    "jsonrpc": "2.0",
                    "method": "notifications/message",
                    "params": {"level": "info", "data": "adding"}
                });
                let result = rpc_result(
                    id,
                    json!({"content": [{"type": "text", "text": format_number(a + b)}]}),
                );
                let stream = format!(
                    "event: message\ndata: {}\n\nevent: message\ndata: {}\n\n",
                    log, result
                );
                return ResponseTemplate::new(200)
                    .insert_header("mcp-session-id", SESSION_ID)
                    .set_body_raw(stream, "text/event-stream");
            }
            _ => json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": {"code": -32601, "message": format!("Method not found: {}", method)}
            }),
        };

        ResponseTemplate::new(200)
            .insert_header("mcp-session-id", SESSION_ID)
            .set_body_json(body)
    }
}

/// Mock server plus the runtime that started it.
struct Fixture {
    server: MockServer,
    _runtime: Runtime,
}

impl Fixture {
    fn start(token: Option<&'static str>) -> Self {
        let runtime = Runtime::new().unwrap();
        let server = runtime.block_on(async {
            let server = MockServer::start().await;
            Mock::given(path("/mcp"))
                .respond_with(FakeMcp { token })
                .mount(&server)
                .await;
            server
        });
        Self {
            server,
            _runtime: runtime,
        }
    }

    fn url(&self) -> String {
        format!("{}/mcp", self.server.uri())
    }
}

fn options() -> LoadOptions {
    LoadOptions::new()
        .timeout(Duration::from_secs(10))
        .close_grace(Duration::from_secs(1))
        .allow_sampling(false)
        .allow_elicitation(false)
}

#[test]
fn test_echo_over_http() {
    let fixture = Fixture::start(None);
    let server = load(fixture.url(), options()).unwrap();

    assert_eq!(server.server_info().unwrap().name, "wiremock-mcp");

    let out = server
        .invoke("echo", json!({"message": "Hello, World!"}))
        .unwrap();
    assert_eq!(out, Output::Text("Hello, World!".to_string()));

    server.close();
}

#[test]
fn test_event_stream_response() {
    let fixture = Fixture::start(None);
    let server = load(fixture.url(), options()).unwrap();

    let out = server.invoke("add", json!({"a": 2.5, "b": 1.5})).unwrap();
    assert_eq!(out.to_string(), "4");

    server.close();
}

#[test]
fn test_concurrent_calls_share_one_session() {
    let fixture = Fixture::start(None);
    let server = load(fixture.url(), options()).unwrap();

    let workers: Vec<_> = (0..10)
        .map(|i| {
            let server = server.clone();
            thread::spawn(move || {
                let out = server.invoke("add", json!({"a": i, "b": i})).unwrap();
                assert_eq!(out.to_string(), (i * 2).to_string());
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }
    server.close();
}

#[test]
fn test_unknown_capability_and_optional_listings() {
    let fixture = Fixture::start(None);
    let server = load(fixture.url(), options()).unwrap();

    // resources/list and prompts/list are not implemented by this server.
    assert!(server.resources().is_empty());
    assert!(server.prompts().is_empty());

    let err = server.invoke("subtract", json!({"a": 1, "b": 2})).unwrap_err();
    let text = err.to_string();
    assert!(text.contains("subtract"));
    assert!(text.contains("echo, add"));

    server.close();
}

#[test]
fn test_close_is_idempotent() {
    let fixture = Fixture::start(None);
    let server = load(fixture.url(), options()).unwrap();

    server.close();
    server.close();
    assert!(server.is_closed());
    assert!(matches!(
        server.invoke("echo", json!({"message": "late"})),
        Err(Error::NotConnected)
    ));
}

#[test]
fn test_bearer_token_accepted() {
    let fixture = Fixture::start(Some(TOKEN));

    let server = load(fixture.url(), options().auth(TOKEN)).unwrap();
    assert_eq!(
        server.invoke("echo", json!({"message": "authed"})).unwrap().to_string(),
        "authed"
    );
    server.close();

    let server = load(
        fixture.url(),
        options().header("Authorization", format!("Bearer {}", TOKEN)),
    )
    .unwrap();
    server.close();

    let server = load(fixture.url(), options().default_token(TOKEN)).unwrap();
    server.close();
}

#[test]
fn test_explicit_auth_overrides_default_token() {
    let fixture = Fixture::start(Some(TOKEN));
    let err = load(
        fixture.url(),
        options().auth("wrong-token").default_token(TOKEN),
    )
    .unwrap_err();
    assert!(err.is_auth_error(), "got {err:?}");
}

#[test]
fn test_bad_or_missing_token_is_auth_error() {
    let fixture = Fixture::start(Some(TOKEN));

    let err = load(fixture.url(), options().auth("wrong-token")).unwrap_err();
    assert!(err.is_auth_error(), "got {err:?}");
    assert!(err.to_string().contains("401"));

    let err = load(fixture.url(), options()).unwrap_err();
    assert!(err.is_auth_error(), "got {err:?}");
}

#[test]
fn test_oauth_without_provider_is_config_error() {
    let fixture = Fixture::start(None);
    let err = load(fixture.url(), options().auth("oauth")).unwrap_err();
    assert!(matches!(err, Error::Config(_)), "got {err:?}");
}

#[test]
fn test_unreachable_url_has_curl_hint() {
    let err = load("http://127.0.0.1:9/mcp", options()).unwrap_err();
    let hint = err.recovery_suggestion().unwrap_or_default().to_string();
    assert!(hint.contains("curl -v http://127.0.0.1:9/mcp"), "got {err:?}");
}
