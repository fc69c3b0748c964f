//! Capability registration for freshly built MCP servers

pub mod api_key_status;

use std::sync::Arc;

use anyhow::Result;

use crate::mcp::McpServer;

/// Populates one capability family on a new server
pub type Registrar = Arc<dyn Fn(&mut McpServer) -> Result<()> + Send + Sync>;

/// The three registration steps every new server goes through
#[derive(Clone)]
pub struct Registrars {
    pub resources: Registrar,
    pub prompts: Registrar,
    pub tools: Registrar,
}

impl Default for Registrars {
    fn default() -> Self {
        Self {
            resources: Arc::new(register_resources),
            prompts: Arc::new(register_prompts),
            tools: Arc::new(register_tools),
        }
    }
}

impl Registrars {
    pub fn apply(&self, server: &mut McpServer) -> Result<()> {
        (self.resources)(server)?;
        (self.prompts)(server)?;
        (self.tools)(server)?;
        Ok(())
    }
}

/// No resources are exposed yet
pub fn register_resources(_server: &mut McpServer) -> Result<()> {
    Ok(())
}

/// No prompts are exposed yet
pub fn register_prompts(_server: &mut McpServer) -> Result<()> {
    Ok(())
}

pub fn register_tools(server: &mut McpServer) -> Result<()> {
    api_key_status::register(server)
}

/// Build a server with every capability registered
pub fn build_server(registrars: &Registrars) -> Result<McpServer> {
    let mut server = McpServer::new(crate::mcp::SERVER_NAME, env!("CARGO_PKG_VERSION"));
    registrars.apply(&mut server)?;
    Ok(server)
}
