//! Response builders for the HTTP transport

use chrono::SecondsFormat;
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{HeaderValue, CONTENT_TYPE, RETRY_AFTER};
use hyper::http::response::Builder;
use hyper::{Response, StatusCode};
use serde_json::{json, Value};
use tracing::error;

use crate::rate_limit::RateLimitDecision;

pub type HttpResponse = Response<Full<Bytes>>;

pub const CORS_ALLOW_METHODS: &str = "GET, POST, DELETE, OPTIONS";
pub const CORS_ALLOW_HEADERS: &str =
    "Content-Type, Authorization, Mcp-Session-Id, X-Vuetify-Api-Key";

/// Finish a builder, degrading to a bare 500 if a header value was invalid
pub fn finish(builder: Builder, body: impl Into<Bytes>) -> HttpResponse {
    match builder.body(Full::new(body.into())) {
        Ok(response) => response,
        Err(e) => {
            error!("Failed to build response: {}", e);
            let mut response = Response::new(Full::new(Bytes::from_static(
                b"Internal Server Error",
            )));
            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            response
        }
    }
}

pub fn cors_preflight() -> HttpResponse {
    finish(
        Response::builder()
            .status(StatusCode::NO_CONTENT)
            .header("Access-Control-Allow-Origin", "*")
            .header("Access-Control-Allow-Methods", CORS_ALLOW_METHODS)
            .header("Access-Control-Allow-Headers", CORS_ALLOW_HEADERS),
        Bytes::new(),
    )
}

pub fn json_response(status: StatusCode, body: &Value) -> HttpResponse {
    finish(
        Response::builder()
            .status(status)
            .header(CONTENT_TYPE, "application/json"),
        body.to_string(),
    )
}

pub fn text_response(status: StatusCode, body: impl Into<String>) -> HttpResponse {
    finish(
        Response::builder()
            .status(status)
            .header(CONTENT_TYPE, "text/plain"),
        body.into(),
    )
}

pub fn iso8601(decision: &RateLimitDecision) -> String {
    decision
        .reset_time
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Attach `X-RateLimit-*` headers describing `decision`
pub fn apply_rate_limit_headers(response: &mut HttpResponse, decision: &RateLimitDecision) {
    let headers = response.headers_mut();
    headers.insert("X-RateLimit-Limit", HeaderValue::from(decision.limit));
    headers.insert("X-RateLimit-Remaining", HeaderValue::from(decision.remaining));
    if let Ok(reset) = HeaderValue::from_str(&iso8601(decision)) {
        headers.insert("X-RateLimit-Reset", reset);
    }
}

pub fn too_many_requests(decision: &RateLimitDecision) -> HttpResponse {
    let retry_after = decision.retry_after_secs.unwrap_or(1);
    let body = json!({
        "error": "Too Many Requests",
        "message": format!(
            "Rate limit exceeded. Please try again in {} seconds.",
            retry_after
        ),
        "retryAfter": retry_after,
        "resetTime": iso8601(decision),
    });

    let mut response = json_response(StatusCode::TOO_MANY_REQUESTS, &body);
    response
        .headers_mut()
        .insert(RETRY_AFTER, HeaderValue::from(retry_after));
    apply_rate_limit_headers(&mut response, decision);
    response
}
