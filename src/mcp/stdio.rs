//! Stdio transport with line or `Content-Length` framing

use std::sync::Arc;

use anyhow::{anyhow, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, error, info, warn};

use crate::auth::{AuthContext, CredentialValidator};

use super::server::McpServer;
use super::types::{JsonRpcRequest, JsonRpcResponse, PARSE_ERROR};

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Framing {
    Lsp,
    Line,
}

pub fn is_header_line(line: &str) -> bool {
    match line.split_once(':') {
        Some((name, _)) => {
            let name = name.trim();
            name.eq_ignore_ascii_case("content-length") || name.eq_ignore_ascii_case("content-type")
        }
        None => false,
    }
}

pub fn parse_content_length(line: &str) -> Result<Option<usize>> {
    let (name, value) = match line.split_once(':') {
        Some(parts) => parts,
        None => return Ok(None),
    };

    if !name.trim().eq_ignore_ascii_case("content-length") {
        return Ok(None);
    }

    let length = value
        .trim()
        .parse::<usize>()
        .map_err(|e| anyhow!("Invalid Content-Length header: {}", e))?;
    Ok(Some(length))
}

/// Maximum message size for either framing (10MB)
pub const MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;
/// Maximum header line length in LSP framing
const MAX_HEADER_LENGTH: usize = 1024;
/// Maximum number of header lines, including skipped blank lines
pub const MAX_HEADER_COUNT: usize = 100;

async fn read_trimmed_line<R>(reader: &mut R, limit: usize) -> Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    let bytes = reader.read_line(&mut line).await?;
    if bytes == 0 {
        return Ok(None);
    }
    if line.len() > limit {
        return Err(anyhow!(
            "Line length {} exceeds maximum allowed size of {} bytes",
            line.len(),
            limit
        ));
    }
    Ok(Some(line.trim_end_matches(&['\r', '\n'][..]).to_string()))
}

async fn read_lsp_body<R>(reader: &mut R, first_line: Option<String>) -> Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut content_length: Option<usize> = None;
    let mut pending = first_line;
    let mut seen_header = false;
    let mut line_count = 0;

    loop {
        let line = match pending.take() {
            Some(line) => line,
            None => match read_trimmed_line(reader, MAX_HEADER_LENGTH).await? {
                Some(line) => line,
                None => return Ok(None),
            },
        };

        line_count += 1;
        if line_count > MAX_HEADER_COUNT {
            return Err(anyhow!(
                "Too many header lines or skipped blank lines (limit {})",
                MAX_HEADER_COUNT
            ));
        }

        if line.is_empty() {
            if seen_header {
                break;
            }
            continue;
        }

        seen_header = true;
        if let Some(len) = parse_content_length(&line)? {
            content_length = Some(len);
        }
    }

    let length =
        content_length.ok_or_else(|| anyhow!("Missing Content-Length header in LSP message"))?;
    if length > MAX_MESSAGE_SIZE {
        return Err(anyhow!(
            "Content-Length {} exceeds maximum allowed size of {} bytes",
            length,
            MAX_MESSAGE_SIZE
        ));
    }

    let mut buf = vec![0u8; length];
    reader.read_exact(&mut buf).await?;
    let message = String::from_utf8(buf).map_err(|e| anyhow!("Invalid UTF-8 payload: {}", e))?;
    Ok(Some(message))
}

/// Read one message, detecting the framing from the first non-blank line
/// when it is not yet known.
pub async fn read_message<R>(
    reader: &mut R,
    framing: &mut Option<Framing>,
) -> Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    if *framing == Some(Framing::Lsp) {
        return read_lsp_body(reader, None).await;
    }

    loop {
        let line = match read_trimmed_line(reader, MAX_MESSAGE_SIZE).await? {
            Some(line) => line,
            None => return Ok(None),
        };
        if line.is_empty() {
            continue;
        }

        if framing.is_none() {
            if parse_content_length(&line)?.is_some() || is_header_line(&line) {
                *framing = Some(Framing::Lsp);
                return read_lsp_body(reader, Some(line)).await;
            }
            *framing = Some(Framing::Line);
        }

        return Ok(Some(line));
    }
}

pub async fn write_message<W>(writer: &mut W, framing: Framing, payload: &str) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut buffer = Vec::with_capacity(payload.len() + 32);
    match framing {
        Framing::Line => {
            buffer.extend_from_slice(payload.as_bytes());
            buffer.push(b'\n');
        }
        Framing::Lsp => {
            buffer.extend_from_slice(
                format!("Content-Length: {}\r\n\r\n", payload.len()).as_bytes(),
            );
            buffer.extend_from_slice(payload.as_bytes());
        }
    }
    writer.write_all(&buffer).await?;
    writer.flush().await?;
    Ok(())
}

/// Error code returned to callers whose API key fails validation
pub const INVALID_API_KEY: i32 = 403;

/// Long-lived transport serving a single [`McpServer`] over a byte stream
pub struct StdioTransport {
    server: McpServer,
    auth: AuthContext,
    framing: Option<Framing>,
    validator: Option<Arc<CredentialValidator>>,
}

impl StdioTransport {
    pub fn new(server: McpServer, auth: AuthContext, framing: Option<Framing>) -> Self {
        Self {
            server,
            auth,
            framing,
            validator: None,
        }
    }

    /// Gate every message on the process credential passing `validator`
    pub fn with_validator(mut self, validator: Arc<CredentialValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    async fn credentials_valid(&self) -> bool {
        match &self.validator {
            Some(validator) => {
                let key = self.auth.token.as_deref().unwrap_or_default();
                validator.validate(key).await
            }
            None => true,
        }
    }

    /// Serve stdin/stdout until stdin closes
    pub async fn run(self) -> Result<()> {
        let mut reader = tokio::io::BufReader::new(tokio::io::stdin());
        let mut writer = tokio::io::stdout();
        self.serve(&mut reader, &mut writer).await
    }

    pub async fn serve<R, W>(mut self, reader: &mut R, writer: &mut W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        info!("MCP server started on stdio, waiting for requests...");

        loop {
            let message = match read_message(reader, &mut self.framing).await {
                Ok(Some(message)) => message,
                Ok(None) => break,
                Err(e) => {
                    error!("Failed to read message: {}", e);
                    continue;
                }
            };

            debug!("Received: {}", message);
            let framing = self.framing.unwrap_or(Framing::Line);

            let response = match serde_json::from_str::<JsonRpcRequest>(&message) {
                Ok(request) => {
                    if self.credentials_valid().await {
                        self.server.handle_request(request, &self.auth).await
                    } else {
                        warn!("Rejected {}: invalid API key", request.method);
                        if request.is_notification() {
                            None
                        } else {
                            Some(JsonRpcResponse::error(
                                request.id,
                                INVALID_API_KEY,
                                "Invalid API key".to_string(),
                            ))
                        }
                    }
                }
                Err(e) => {
                    error!("Failed to parse request: {}", e);
                    Some(JsonRpcResponse::error(
                        None,
                        PARSE_ERROR,
                        format!("Parse error: {}", e),
                    ))
                }
            };

            if let Some(response) = response {
                let payload = serde_json::to_string(&response)?;
                debug!("Sending: {}", payload);
                write_message(writer, framing, &payload).await?;
            }
        }

        if let Err(e) = self.server.close().await {
            error!("Error closing server: {}", e);
        }
        Ok(())
    }
}
