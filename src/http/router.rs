//! Route classification for the HTTP transport

use hyper::Method;

pub const HEALTH_PATH: &str = "/health";
pub const INFO_PATH: &str = "/";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// CORS preflight, answered before any other check
    Preflight,
    Health,
    Info,
    NotFound,
    /// POST to the MCP path, handed to a fresh session
    Protocol,
    /// GET/DELETE on the MCP path need session persistence
    StatelessUnsupported,
    MethodNotAllowed,
}

pub fn classify(method: &Method, path: &str, mcp_path: &str) -> Route {
    if method == Method::OPTIONS {
        return Route::Preflight;
    }
    if path == HEALTH_PATH && method == Method::GET {
        return Route::Health;
    }
    if path == INFO_PATH && method == Method::GET {
        return Route::Info;
    }
    if path != mcp_path {
        return Route::NotFound;
    }

    match *method {
        Method::POST => Route::Protocol,
        Method::GET | Method::DELETE => Route::StatelessUnsupported,
        _ => Route::MethodNotAllowed,
    }
}

/// Health and info stay reachable while a caller is throttled
pub fn is_rate_limit_exempt(path: &str) -> bool {
    path == HEALTH_PATH || path == INFO_PATH
}
