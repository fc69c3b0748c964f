//! MCP server implementation

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, Result};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::auth::AuthContext;

use super::types::*;

/// Name reported in the MCP `initialize` handshake
pub const SERVER_NAME: &str = "Vuetify";

pub type ToolFuture = Pin<Box<dyn Future<Output = Result<CallToolResult>> + Send>>;

/// Async tool body. Receives the call arguments and the caller's credentials.
pub type ToolHandler = Arc<dyn Fn(Value, AuthContext) -> ToolFuture + Send + Sync>;

struct RegisteredTool {
    definition: Tool,
    handler: ToolHandler,
}

/// Backing MCP server: capability registries plus JSON-RPC dispatch
pub struct McpServer {
    instance_id: Uuid,
    info: ServerInfo,
    tools: Vec<RegisteredTool>,
    prompts: Vec<Prompt>,
    resources: Vec<Resource>,
    closed: AtomicBool,
}

impl McpServer {
    pub fn new(name: &str, version: &str) -> Self {
        Self {
            instance_id: Uuid::new_v4(),
            info: ServerInfo {
                name: name.to_string(),
                version: version.to_string(),
            },
            tools: Vec::new(),
            prompts: Vec::new(),
            resources: Vec::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Identifies this instance; no two servers share one
    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    pub fn register_tool(&mut self, definition: Tool, handler: ToolHandler) -> Result<()> {
        if self.tools.iter().any(|t| t.definition.name == definition.name) {
            return Err(anyhow!("Tool '{}' is already registered", definition.name));
        }
        self.tools.push(RegisteredTool {
            definition,
            handler,
        });
        Ok(())
    }

    pub fn register_prompt(&mut self, prompt: Prompt) {
        self.prompts.push(prompt);
    }

    pub fn register_resource(&mut self, resource: Resource) {
        self.resources.push(resource);
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.tools
            .iter()
            .map(|t| t.definition.name.as_str())
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Release the server. A second close is reported as an error.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(anyhow!("Server {} is already closed", self.instance_id));
        }
        debug!("Closed MCP server {}", self.instance_id);
        Ok(())
    }

    /// Handle a JSON-RPC request
    pub async fn handle_request(
        &self,
        request: JsonRpcRequest,
        auth: &AuthContext,
    ) -> Option<JsonRpcResponse> {
        if request.is_notification() {
            match request.method.as_str() {
                "initialized" | "notifications/initialized" => {}
                _ => debug!("Received notification: {}", request.method),
            }
            return None;
        }

        if self.is_closed() {
            return Some(JsonRpcResponse::error(
                request.id,
                INTERNAL_ERROR,
                "Server is closed".to_string(),
            ));
        }

        let id = request.id;
        let response = match request.method.as_str() {
            "initialize" => to_response(id, self.initialize_result()),
            "ping" => JsonRpcResponse::success(id, json!({})),
            "tools/list" => to_response(
                id,
                ListToolsResult {
                    tools: self.tools.iter().map(|t| t.definition.clone()).collect(),
                },
            ),
            "tools/call" => self.handle_call_tool(id, request.params, auth).await,
            "prompts/list" => to_response(
                id,
                ListPromptsResult {
                    prompts: self.prompts.clone(),
                },
            ),
            "resources/list" => to_response(
                id,
                ListResourcesResult {
                    resources: self.resources.clone(),
                },
            ),
            _ => JsonRpcResponse::error(
                id,
                METHOD_NOT_FOUND,
                format!("Method not found: {}", request.method),
            ),
        };

        Some(response)
    }

    fn initialize_result(&self) -> InitializeResult {
        InitializeResult {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities {
                tools: Some(CapabilityDescriptor::described(
                    "Tools to help with Vuetify component properties, layouts, and documentation.",
                )),
                prompts: Some(CapabilityDescriptor::described(
                    "Prompts to assist with Vuetify component usage and best practices.",
                )),
                resources: Some(CapabilityDescriptor::described(
                    "No resources required for Vuetify assistance.",
                )),
            },
            server_info: self.info.clone(),
        }
    }

    async fn handle_call_tool(
        &self,
        id: Option<Value>,
        params: Option<Value>,
        auth: &AuthContext,
    ) -> JsonRpcResponse {
        let params = match params {
            Some(p) => p,
            None => {
                return JsonRpcResponse::error(id, INVALID_PARAMS, "Missing params".to_string());
            }
        };

        let call_params: CallToolParams = match serde_json::from_value(params) {
            Ok(p) => p,
            Err(e) => {
                return JsonRpcResponse::error(id, INVALID_PARAMS, format!("Invalid params: {}", e));
            }
        };

        let tool = match self
            .tools
            .iter()
            .find(|t| t.definition.name == call_params.name)
        {
            Some(tool) => tool,
            None => {
                return JsonRpcResponse::error(
                    id,
                    INVALID_PARAMS,
                    format!("Unknown tool: {}", call_params.name),
                );
            }
        };

        let arguments = call_params.arguments.unwrap_or_else(|| json!({}));
        let started = Instant::now();
        let outcome = (tool.handler)(arguments, auth.clone()).await;
        let duration_ms = started.elapsed().as_millis();

        match outcome {
            Ok(result) => {
                debug!("Tool {} completed in {}ms", call_params.name, duration_ms);
                to_response(id, result)
            }
            Err(e) => {
                warn!(
                    "Tool {} failed after {}ms: {}",
                    call_params.name, duration_ms, e
                );
                to_response(id, CallToolResult::error(format!("Error: {}", e)))
            }
        }
    }
}

fn to_response<T: Serialize>(id: Option<Value>, result: T) -> JsonRpcResponse {
    match serde_json::to_value(result) {
        Ok(value) => JsonRpcResponse::success(id, value),
        Err(e) => JsonRpcResponse::error(id, INTERNAL_ERROR, format!("Internal error: {}", e)),
    }
}
