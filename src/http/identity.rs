//! Client identity for rate limiting

use std::net::SocketAddr;

use hyper::HeaderMap;

use crate::mcp::SESSION_ID_HEADER;

pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

/// Derive the rate-limit key for a call.
///
/// Stateful sessions are keyed by session id (`session:<id>`); everything
/// else by network origin (`ip:<addr>`), preferring the first
/// `X-Forwarded-For` hop over the socket peer.
///
/// Both headers are taken on trust. The stateless transport never issues
/// `Mcp-Session-Id`, so a caller that rotates it gets a fresh bucket per call;
/// deployments that need a hard per-origin limit must strip or overwrite these
/// headers at the proxy. Callers with a server credential skip the limiter
/// entirely (see `limiter_for`).
pub fn client_key(headers: &HeaderMap, remote_addr: Option<SocketAddr>) -> String {
    if let Some(session) = header_str(headers, SESSION_ID_HEADER) {
        return format!("session:{}", session);
    }

    let forwarded = header_str(headers, FORWARDED_FOR_HEADER)
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    match (forwarded, remote_addr) {
        (Some(addr), _) => format!("ip:{}", addr),
        (None, Some(addr)) => format!("ip:{}", addr.ip()),
        (None, None) => "ip:unknown".to_string(),
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}
