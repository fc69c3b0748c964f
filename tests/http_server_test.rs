//! End-to-end tests for the streamable HTTP transport

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::{Method, Request, StatusCode};
use serde_json::json;
use tokio::net::TcpStream;
use uuid::Uuid;

use vuetify_mcp::config::{Config, ConfigOptions, HttpOptions};
use vuetify_mcp::http::{limiter_for, HttpTransport, SessionFactory};
use vuetify_mcp::mcp::types::{CallToolResult, Tool};
use vuetify_mcp::mcp::{McpServer, ToolHandler};
use vuetify_mcp::tools::Registrars;

use common::{get, post_json, send, start_server, test_limiter, LogCapture};

const PING: &str = r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#;

// ========================================================================
// Fixed routes
// ========================================================================

#[tokio::test]
async fn test_health_returns_ok() {
    let server = start_server(None, Registrars::default()).await;
    let response = get(server.local_addr(), "/health").await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.json(), json!({"status": "ok"}));
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_info_describes_endpoints() {
    let server = start_server(None, Registrars::default()).await;
    let response = get(server.local_addr(), "/").await;

    assert_eq!(response.status, StatusCode::OK);
    let info = response.json();
    assert_eq!(info["name"], "Vuetify MCP Server");
    assert_eq!(info["version"], env!("CARGO_PKG_VERSION"));
    assert_eq!(info["mcp_endpoint"], "/mcp");
    assert_eq!(info["health_endpoint"], "/health");
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_unknown_path_is_not_found_with_guidance() {
    let server = start_server(None, Registrars::default()).await;
    let response = get(server.local_addr(), "/docs").await;

    assert_eq!(response.status, StatusCode::NOT_FOUND);
    assert!(response.body.contains("/mcp"));
    assert!(response.body.contains("/health"));
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_preflight_on_any_path() {
    let server = start_server(Some(test_limiter(1, 60_000)), Registrars::default()).await;
    let addr = server.local_addr();

    // Exhaust the budget first; preflight must not care
    get(addr, "/missing").await;
    assert_eq!(get(addr, "/missing").await.status, StatusCode::TOO_MANY_REQUESTS);

    for path in ["/mcp", "/", "/does/not/exist"] {
        let response = send(addr, Method::OPTIONS, path, &[], "").await;
        assert_eq!(response.status, StatusCode::NO_CONTENT);
        assert!(response.body.is_empty());
        assert_eq!(
            response.headers.get("access-control-allow-origin").unwrap(),
            "*"
        );
        assert_eq!(
            response.headers.get("access-control-allow-methods").unwrap(),
            "GET, POST, DELETE, OPTIONS"
        );
        assert_eq!(
            response.headers.get("access-control-allow-headers").unwrap(),
            "Content-Type, Authorization, Mcp-Session-Id, X-Vuetify-Api-Key"
        );
    }
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_get_and_delete_on_mcp_path_not_allowed() {
    let server = start_server(None, Registrars::default()).await;
    let addr = server.local_addr();

    for method in [Method::GET, Method::DELETE] {
        let response = send(addr, method, "/mcp", &[], "").await;
        assert_eq!(response.status, StatusCode::METHOD_NOT_ALLOWED);
        assert!(response.body.contains("stateless"));
    }

    let response = send(addr, Method::PATCH, "/mcp", &[], "").await;
    assert_eq!(response.status, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(response.body, "Method Not Allowed");
    server.shutdown().await.unwrap();
}

// ========================================================================
// Rate limiting
// ========================================================================

#[tokio::test]
async fn test_rate_limited_response_shape() {
    let server = start_server(Some(test_limiter(2, 60_000)), Registrars::default()).await;
    let addr = server.local_addr();

    let first = get(addr, "/missing").await;
    assert_eq!(first.headers.get("x-ratelimit-limit").unwrap(), "2");
    assert_eq!(first.headers.get("x-ratelimit-remaining").unwrap(), "1");
    get(addr, "/missing").await;

    let denied = get(addr, "/missing").await;
    assert_eq!(denied.status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(denied.headers.get("retry-after").unwrap(), "60");
    assert_eq!(denied.headers.get("x-ratelimit-remaining").unwrap(), "0");
    assert!(denied.headers.contains_key("x-ratelimit-reset"));

    let body = denied.json();
    assert_eq!(body["error"], "Too Many Requests");
    assert_eq!(body["retryAfter"], 60);
    assert!(body["message"].as_str().unwrap().contains("60 seconds"));
    let reset = body["resetTime"].as_str().unwrap();
    assert!(chrono::DateTime::parse_from_rfc3339(reset).is_ok());
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_health_and_info_stay_reachable_when_throttled() {
    let server = start_server(Some(test_limiter(1, 60_000)), Registrars::default()).await;
    let addr = server.local_addr();

    get(addr, "/missing").await;
    assert_eq!(get(addr, "/missing").await.status, StatusCode::TOO_MANY_REQUESTS);

    for _ in 0..3 {
        let health = get(addr, "/health").await;
        assert_eq!(health.status, StatusCode::OK);
        assert_eq!(health.json(), json!({"status": "ok"}));
        assert_eq!(get(addr, "/").await.status, StatusCode::OK);
    }
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_forwarded_for_origins_are_limited_separately() {
    let server = start_server(Some(test_limiter(1, 60_000)), Registrars::default()).await;
    let addr = server.local_addr();
    let from = |ip: &'static str| [("x-forwarded-for", ip)];

    let a = send(addr, Method::GET, "/missing", &from("10.0.0.1"), "").await;
    assert_eq!(a.status, StatusCode::NOT_FOUND);
    let a_again = send(addr, Method::GET, "/missing", &from("10.0.0.1, 192.168.0.1"), "").await;
    assert_eq!(a_again.status, StatusCode::TOO_MANY_REQUESTS);
    let b = send(addr, Method::GET, "/missing", &from("10.0.0.2"), "").await;
    assert_eq!(b.status, StatusCode::NOT_FOUND);
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_server_credential_disables_rate_limit() {
    let config = Config::new(ConfigOptions {
        api_key: Some("server-key".to_string()),
        rate_limit_max: Some(2),
        ..ConfigOptions::default()
    })
    .unwrap();
    assert!(!config.rate_limit_enabled());

    let limiter = limiter_for(&config);
    assert!(limiter.is_none());

    let server = start_server(limiter, Registrars::default()).await;
    let addr = server.local_addr();
    for _ in 0..6 {
        let response = post_json(addr, "/mcp", &[], PING).await;
        assert_ne!(response.status, StatusCode::TOO_MANY_REQUESTS);
        assert!(!response.headers.contains_key("x-ratelimit-limit"));
    }
    server.shutdown().await.unwrap();
}

// ========================================================================
// MCP endpoint
// ========================================================================

#[tokio::test]
async fn test_invalid_json_is_bad_request() {
    let server = start_server(None, Registrars::default()).await;
    let response = post_json(server.local_addr(), "/mcp", &[], "not json").await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.body, "Bad Request - Invalid JSON");
    server.shutdown().await.unwrap();
}

#[tokio::test(flavor = "current_thread")]
async fn test_invalid_json_logs_no_server_error() {
    let capture = LogCapture::default();
    let _guard = capture.install();

    let transport = HttpTransport::new(HttpOptions::default(), None, SessionFactory::default());
    let request = Request::builder()
        .method(Method::POST)
        .uri("/mcp")
        .header("content-type", "application/json")
        .body(Full::new(Bytes::from_static(b"not json")))
        .unwrap();
    let response = transport.handle(request, None).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let logs = capture.contents();
    assert!(logs.contains("WARN"), "expected a rejection line, got: {}", logs);
    assert!(!logs.contains("ERROR"), "unexpected error line: {}", logs);
    assert!(!logs.contains("Internal Server Error"));
}

#[tokio::test]
async fn test_initialize_without_event_stream_accept() {
    let server = start_server(None, Registrars::default()).await;
    let response = post_json(
        server.local_addr(),
        "/mcp",
        &[("accept", "application/json")],
        r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#,
    )
    .await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(
        response.headers.get("content-type").unwrap(),
        "text/event-stream"
    );
    assert!(response.headers.get("mcp-session-id").is_none());
    let events = response.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["id"], 1);
    assert_eq!(events[0]["result"]["serverInfo"]["name"], "Vuetify");
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_notification_is_accepted_without_body() {
    let server = start_server(None, Registrars::default()).await;
    let response = post_json(
        server.local_addr(),
        "/mcp",
        &[],
        r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
    )
    .await;

    assert_eq!(response.status, StatusCode::ACCEPTED);
    assert!(response.body.is_empty());
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_tools_see_request_credentials() {
    let server = start_server(None, Registrars::default()).await;
    let addr = server.local_addr();
    let call = r#"{"jsonrpc":"2.0","id":5,"method":"tools/call","params":{"name":"get_api_key_status"}}"#;

    let with_key = post_json(addr, "/mcp", &[("x-vuetify-api-key", "abc")], call).await;
    let text = with_key.events()[0]["result"]["content"][0]["text"].clone();
    assert!(text.as_str().unwrap().starts_with("A Vuetify API key"));

    let with_bearer = post_json(addr, "/mcp", &[("authorization", "Bearer xyz")], call).await;
    let text = with_bearer.events()[0]["result"]["content"][0]["text"].clone();
    assert!(text.as_str().unwrap().starts_with("A Vuetify API key"));

    let anonymous = post_json(addr, "/mcp", &[], call).await;
    let text = anonymous.events()[0]["result"]["content"][0]["text"].clone();
    assert!(text.as_str().unwrap().starts_with("No Vuetify API key"));
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_concurrent_calls_get_isolated_servers() {
    let seen: Arc<Mutex<Vec<Uuid>>> = Arc::new(Mutex::new(Vec::new()));
    let recorder = seen.clone();

    let registrars = Registrars {
        tools: Arc::new(move |server: &mut McpServer| -> anyhow::Result<()> {
            recorder.lock().unwrap().push(server.instance_id());
            let handler: ToolHandler = Arc::new(|_args, _auth| {
                Box::pin(async {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok::<_, anyhow::Error>(CallToolResult::text("done"))
                })
            });
            server.register_tool(
                Tool {
                    name: "slow".to_string(),
                    description: "Sleeps briefly".to_string(),
                    input_schema: json!({"type": "object"}),
                },
                handler,
            )
        }),
        ..Registrars::default()
    };

    let server = start_server(None, registrars).await;
    let addr = server.local_addr();
    let call_a = r#"{"jsonrpc":"2.0","id":"a","method":"tools/call","params":{"name":"slow"}}"#;
    let call_b = r#"{"jsonrpc":"2.0","id":"b","method":"tools/call","params":{"name":"slow"}}"#;

    let (a, b) = tokio::join!(
        post_json(addr, "/mcp", &[], call_a),
        post_json(addr, "/mcp", &[], call_b)
    );
    assert_eq!(a.events()[0]["id"], "a");
    assert_eq!(b.events()[0]["id"], "b");

    let ids = seen.lock().unwrap().clone();
    assert_eq!(ids.len(), 2);
    assert_ne!(ids[0], ids[1]);
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_registration_failure_is_internal_error() {
    let registrars = Registrars {
        prompts: Arc::new(|_server: &mut McpServer| -> anyhow::Result<()> {
            Err(anyhow::anyhow!("prompt table unavailable"))
        }),
        ..Registrars::default()
    };
    let server = start_server(None, registrars).await;
    let response = post_json(server.local_addr(), "/mcp", &[], PING).await;

    assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response.body, "Internal Server Error");
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_panicking_tool_yields_single_500() {
    let registrars = Registrars {
        tools: Arc::new(|server: &mut McpServer| -> anyhow::Result<()> {
            let handler: ToolHandler = Arc::new(|args, _auth| {
                Box::pin(async move {
                    if args.is_object() {
                        panic!("tool exploded");
                    }
                    Ok::<_, anyhow::Error>(CallToolResult::text("unreachable"))
                })
            });
            server.register_tool(
                Tool {
                    name: "explode".to_string(),
                    description: "Always panics".to_string(),
                    input_schema: json!({"type": "object"}),
                },
                handler,
            )
        }),
        ..Registrars::default()
    };
    let server = start_server(Some(test_limiter(5, 60_000)), registrars).await;
    let addr = server.local_addr();

    let call = r#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"explode"}}"#;
    let response = post_json(addr, "/mcp", &[], call).await;
    assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response.body, "Internal Server Error");
    assert_eq!(response.headers.get("x-ratelimit-limit").unwrap(), "5");
    assert_eq!(response.headers.get("x-ratelimit-remaining").unwrap(), "4");
    assert!(response.headers.contains_key("x-ratelimit-reset"));

    // The next call is unaffected
    assert_eq!(get(addr, "/health").await.status, StatusCode::OK);
    server.shutdown().await.unwrap();
}

// ========================================================================
// Lifecycle
// ========================================================================

#[tokio::test]
async fn test_shutdown_closes_listener() {
    let server = start_server(Some(test_limiter(5, 60_000)), Registrars::default()).await;
    let addr = server.local_addr();
    assert_eq!(get(addr, "/health").await.status, StatusCode::OK);

    server.shutdown().await.unwrap();
    assert!(TcpStream::connect(addr).await.is_err());
}

#[tokio::test]
async fn test_bind_failure_is_reported() {
    let first = start_server(None, Registrars::default()).await;
    let taken = first.local_addr().port();

    let options = HttpOptions {
        host: "127.0.0.1".to_string(),
        port: taken,
        ..Default::default()
    };
    let result = HttpTransport::new(options, None, SessionFactory::default())
        .start()
        .await;
    assert!(result.is_err());
    first.shutdown().await.unwrap();
}
