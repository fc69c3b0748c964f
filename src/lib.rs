//! vuetify-mcp library - MCP server for Vuetify with a stateless HTTP transport

pub mod auth;
pub mod config;
pub mod error;
pub mod http;
pub mod mcp;
pub mod rate_limit;
pub mod tools;

// Re-export commonly used types
pub use auth::{AuthContext, CredentialValidator};
pub use config::{Config, ConfigOptions, HttpOptions};
pub use error::TransportError;
pub use http::{HttpTransport, RunningServer, SessionFactory};
pub use mcp::McpServer;
pub use rate_limit::{RateLimitDecision, RateLimitOptions, RateLimiter};
pub use tools::Registrars;
