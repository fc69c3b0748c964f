//! api_key_status tool implementation

use std::sync::Arc;

use anyhow::Result;
use serde_json::json;

use crate::mcp::types::{CallToolResult, Tool};
use crate::mcp::{McpServer, ToolHandler};

pub const API_KEY_STATUS_TOOL: &str = "get_api_key_status";

pub fn definition() -> Tool {
    Tool {
        name: API_KEY_STATUS_TOOL.to_string(),
        description: "Report whether the current request carries a Vuetify API key. \
            Send the key in the X-Vuetify-Api-Key header or as an Authorization bearer token."
            .to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {}
        }),
    }
}

pub fn register(server: &mut McpServer) -> Result<()> {
    let handler: ToolHandler = Arc::new(|_args, auth| {
        Box::pin(async move {
            let text = if auth.is_authenticated() {
                "A Vuetify API key was provided with this request."
            } else {
                "No Vuetify API key was provided. Set the X-Vuetify-Api-Key header \
                 or an Authorization: Bearer token."
            };
            Ok::<_, anyhow::Error>(CallToolResult::text(text))
        })
    });
    server.register_tool(definition(), handler)
}
