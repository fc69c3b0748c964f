//! MCP (Model Context Protocol) module

pub mod engine;
pub mod server;
pub mod stdio;
pub mod types;

pub use engine::{ProtocolEngine, SessionIdGenerator, SESSION_ID_HEADER};
pub use server::{McpServer, ToolFuture, ToolHandler, SERVER_NAME};
pub use stdio::{
    is_header_line, parse_content_length, read_message, Framing, StdioTransport, INVALID_API_KEY,
    MAX_HEADER_COUNT,
};
