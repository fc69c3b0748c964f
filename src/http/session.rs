//! Per-call MCP sessions
//!
//! Every POST to the MCP path gets its own server and protocol engine.
//! Nothing built here outlives the call that built it.

use std::sync::Arc;

use anyhow::Result;
use hyper::body::Bytes;
use hyper::header::{HeaderValue, ACCEPT};
use hyper::HeaderMap;
use serde_json::Value;
use tracing::{debug, error};
use uuid::Uuid;

use crate::auth::AuthContext;
use crate::error::TransportError;
use crate::http::response::HttpResponse;
use crate::mcp::{McpServer, ProtocolEngine};
use crate::tools::{build_server, Registrars};

const EVENT_STREAM: &str = "text/event-stream";
const NORMALIZED_ACCEPT: &str = "application/json, text/event-stream";

/// An engine/server pair serving exactly one call.
/// Dropping it closes the engine, which in turn closes the server.
pub struct SessionInstance {
    engine: ProtocolEngine,
    server: Arc<McpServer>,
}

impl SessionInstance {
    pub fn engine_id(&self) -> Uuid {
        self.engine.instance_id()
    }

    pub fn server_id(&self) -> Uuid {
        self.server.instance_id()
    }

    pub fn server(&self) -> &Arc<McpServer> {
        &self.server
    }

    pub fn engine(&self) -> &ProtocolEngine {
        &self.engine
    }

    pub async fn handle(
        mut self,
        headers: &HeaderMap,
        body: Value,
        auth: &AuthContext,
    ) -> Result<HttpResponse> {
        let response = self.engine.handle_request(headers, body, auth).await;
        self.engine.close();
        response
    }
}

#[derive(Clone, Default)]
pub struct SessionFactory {
    registrars: Registrars,
}

impl SessionFactory {
    pub fn new(registrars: Registrars) -> Self {
        Self { registrars }
    }

    /// Build a stateless engine connected to a fully registered server
    pub fn create(&self) -> Result<SessionInstance> {
        let server = Arc::new(build_server(&self.registrars)?);

        let mut engine = ProtocolEngine::new(None);
        engine.connect(server.clone())?;

        let closing = server.clone();
        engine.on_close(move || close_in_background(closing));

        debug!(
            "Created session engine {} for server {}",
            engine.instance_id(),
            server.instance_id()
        );
        Ok(SessionInstance { engine, server })
    }

    /// Handle a POST to the MCP path
    pub async fn handle_post(
        &self,
        headers: &mut HeaderMap,
        body: Bytes,
    ) -> Result<HttpResponse, TransportError> {
        let message: Value = serde_json::from_slice(&body)?;

        normalize_accept(headers);
        let auth = AuthContext::from_headers(headers);

        let session = self.create()?;
        Ok(session.handle(headers, message, &auth).await?)
    }
}

/// Some clients omit `text/event-stream`; the engine requires it
pub fn normalize_accept(headers: &mut HeaderMap) {
    let has_event_stream = headers
        .get_all(ACCEPT)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.contains(EVENT_STREAM));

    if !has_event_stream {
        headers.insert(ACCEPT, HeaderValue::from_static(NORMALIZED_ACCEPT));
    }
}

fn close_in_background(server: Arc<McpServer>) {
    let close = async move {
        if let Err(e) = server.close().await {
            error!("Error closing server: {}", e);
        }
    };

    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(close);
        }
        Err(_) => error!("Error closing server: no async runtime available"),
    }
}
