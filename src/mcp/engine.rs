//! Streamable HTTP protocol engine
//!
//! Frames one POSTed JSON-RPC payload (single message or batch) into a
//! server-sent-events response. An engine is connected to exactly one
//! [`McpServer`] and runs a close hook exactly once, either on an explicit
//! [`ProtocolEngine::close`] or when it is dropped.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use hyper::header::{HeaderValue, ACCEPT, CACHE_CONTROL, CONTENT_TYPE};
use hyper::{HeaderMap, Response, StatusCode};
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

use crate::auth::AuthContext;
use crate::http::response::{finish, json_response, HttpResponse};

use super::server::McpServer;
use super::types::{JsonRpcRequest, JsonRpcResponse, INVALID_REQUEST, PARSE_ERROR, SERVER_ERROR};

pub const SESSION_ID_HEADER: &str = "mcp-session-id";

/// Produces session identifiers for stateful engines
pub type SessionIdGenerator = Arc<dyn Fn() -> String + Send + Sync>;

pub type CloseHook = Box<dyn FnOnce() + Send>;

pub fn uuid_session_ids() -> SessionIdGenerator {
    Arc::new(|| Uuid::new_v4().to_string())
}

pub struct ProtocolEngine {
    instance_id: Uuid,
    session_id_generator: Option<SessionIdGenerator>,
    session_id: Option<String>,
    server: Option<Arc<McpServer>>,
    on_close: Option<CloseHook>,
    closed: bool,
}

impl ProtocolEngine {
    /// `None` selects stateless operation: no session id is ever issued
    pub fn new(session_id_generator: Option<SessionIdGenerator>) -> Self {
        Self {
            instance_id: Uuid::new_v4(),
            session_id_generator,
            session_id: None,
            server: None,
            on_close: None,
            closed: false,
        }
    }

    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    pub fn is_stateless(&self) -> bool {
        self.session_id_generator.is_none()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn connect(&mut self, server: Arc<McpServer>) -> Result<()> {
        if self.server.is_some() {
            return Err(anyhow!(
                "Engine {} is already connected to a server",
                self.instance_id
            ));
        }
        self.server = Some(server);
        Ok(())
    }

    pub fn on_close(&mut self, hook: impl FnOnce() + Send + 'static) {
        self.on_close = Some(Box::new(hook));
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Run the close hook. Later calls do nothing.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.server = None;
        if let Some(hook) = self.on_close.take() {
            hook();
        }
        debug!("Closed protocol engine {}", self.instance_id);
    }

    /// Process one POSTed payload and produce the complete HTTP response
    pub async fn handle_request(
        &mut self,
        headers: &HeaderMap,
        body: Value,
        auth: &AuthContext,
    ) -> Result<HttpResponse> {
        let server = match (&self.server, self.closed) {
            (Some(server), false) => server.clone(),
            _ => return Err(anyhow!("Engine {} has no open server", self.instance_id)),
        };

        if !accepts_json_and_event_stream(headers) {
            return Ok(rpc_error_response(
                StatusCode::NOT_ACCEPTABLE,
                SERVER_ERROR,
                "Not Acceptable: Client must accept both application/json and text/event-stream",
            ));
        }

        if !header_contains(headers, CONTENT_TYPE, "application/json") {
            return Ok(rpc_error_response(
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                SERVER_ERROR,
                "Unsupported Media Type: Content-Type must be application/json",
            ));
        }

        let messages = match body {
            Value::Array(items) if items.is_empty() => {
                return Ok(rpc_error_response(
                    StatusCode::BAD_REQUEST,
                    INVALID_REQUEST,
                    "Invalid Request: empty batch",
                ));
            }
            Value::Array(items) => items,
            single => vec![single],
        };

        let mut requests = Vec::with_capacity(messages.len());
        let mut has_calls = false;
        for message in messages {
            if !is_jsonrpc_message(&message) {
                return Ok(rpc_error_response(
                    StatusCode::BAD_REQUEST,
                    PARSE_ERROR,
                    "Parse error: Invalid JSON-RPC message",
                ));
            }
            // Client responses to server-initiated requests carry no method
            if message.get("method").is_none() {
                continue;
            }
            let request: JsonRpcRequest = match serde_json::from_value(message) {
                Ok(request) => request,
                Err(e) => {
                    return Ok(rpc_error_response(
                        StatusCode::BAD_REQUEST,
                        INVALID_REQUEST,
                        &format!("Invalid Request: {}", e),
                    ));
                }
            };
            has_calls |= !request.is_notification();
            requests.push(request);
        }

        if let Some(generate) = &self.session_id_generator {
            if self.session_id.is_none() && requests.iter().any(|r| r.method == "initialize") {
                self.session_id = Some(generate());
            }
        }

        let mut responses: Vec<JsonRpcResponse> = Vec::new();
        for request in requests {
            if let Some(response) = server.handle_request(request, auth).await {
                responses.push(response);
            }
        }

        if !has_calls {
            return Ok(self.with_session_header(
                Response::builder().status(StatusCode::ACCEPTED),
                "",
            ));
        }

        let mut stream = String::new();
        for response in &responses {
            stream.push_str(&sse_frame(&serde_json::to_value(response)?));
        }

        Ok(self.with_session_header(
            Response::builder()
                .status(StatusCode::OK)
                .header(CONTENT_TYPE, "text/event-stream")
                .header(CACHE_CONTROL, "no-cache"),
            stream,
        ))
    }

    fn with_session_header(
        &self,
        builder: hyper::http::response::Builder,
        body: impl Into<hyper::body::Bytes>,
    ) -> HttpResponse {
        let builder = match self
            .session_id
            .as_deref()
            .and_then(|id| HeaderValue::from_str(id).ok())
        {
            Some(id) => builder.header(SESSION_ID_HEADER, id),
            None => builder,
        };
        finish(builder, body)
    }
}

impl Drop for ProtocolEngine {
    fn drop(&mut self) {
        self.close();
    }
}

/// Encode one message as a server-sent event
pub fn sse_frame(message: &Value) -> String {
    format!("event: message\ndata: {}\n\n", message)
}

fn header_contains(headers: &HeaderMap, name: hyper::header::HeaderName, needle: &str) -> bool {
    headers
        .get_all(name)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.to_ascii_lowercase().contains(needle))
}

fn accepts_json_and_event_stream(headers: &HeaderMap) -> bool {
    header_contains(headers, ACCEPT, "application/json")
        && header_contains(headers, ACCEPT, "text/event-stream")
}

fn is_jsonrpc_message(message: &Value) -> bool {
    message.get("jsonrpc").and_then(Value::as_str) == Some("2.0")
}

fn rpc_error_response(status: StatusCode, code: i32, message: &str) -> HttpResponse {
    json_response(
        status,
        &json!({
            "jsonrpc": "2.0",
            "error": {"code": code, "message": message},
            "id": null,
        }),
    )
}
