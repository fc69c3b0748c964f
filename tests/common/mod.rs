//! Shared helpers for HTTP transport tests

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::header::HOST;
use hyper::{HeaderMap, Method, Request, StatusCode};
use hyper_util::rt::TokioIo;
use serde_json::Value;
use tokio::net::TcpStream;

use vuetify_mcp::config::HttpOptions;
use vuetify_mcp::http::{HttpTransport, RunningServer, SessionFactory};
use vuetify_mcp::rate_limit::{RateLimitOptions, RateLimiter};
use vuetify_mcp::tools::Registrars;

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
}

impl TestResponse {
    pub fn json(&self) -> Value {
        serde_json::from_str(&self.body).unwrap()
    }

    /// JSON payloads of every `data:` line in an event-stream body
    pub fn events(&self) -> Vec<Value> {
        self.body
            .lines()
            .filter_map(|line| line.strip_prefix("data: "))
            .map(|data| serde_json::from_str(data).unwrap())
            .collect()
    }
}

pub fn test_limiter(max_requests: u32, window_ms: u64) -> Arc<RateLimiter> {
    Arc::new(RateLimiter::new(
        RateLimitOptions::new(max_requests, window_ms).unwrap(),
    ))
}

pub async fn start_server(
    limiter: Option<Arc<RateLimiter>>,
    registrars: Registrars,
) -> RunningServer {
    let options = HttpOptions {
        host: "127.0.0.1".to_string(),
        port: 0,
        ..HttpOptions::default()
    };
    HttpTransport::new(options, limiter, SessionFactory::new(registrars))
        .start()
        .await
        .unwrap()
}

pub async fn send(
    addr: SocketAddr,
    method: Method,
    path: &str,
    headers: &[(&str, &str)],
    body: &str,
) -> TestResponse {
    let stream = TcpStream::connect(addr).await.unwrap();
    let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
        .await
        .unwrap();
    tokio::spawn(async move {
        let _ = conn.await;
    });

    let mut builder = Request::builder()
        .method(method)
        .uri(path)
        .header(HOST, addr.to_string());
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let request = builder
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap();

    let response = sender.send_request(request).await.unwrap();
    let (parts, body) = response.into_parts();
    let bytes = body.collect().await.unwrap().to_bytes();

    TestResponse {
        status: parts.status,
        headers: parts.headers,
        body: String::from_utf8(bytes.to_vec()).unwrap(),
    }
}

pub async fn get(addr: SocketAddr, path: &str) -> TestResponse {
    send(addr, Method::GET, path, &[], "").await
}

pub async fn post_json(
    addr: SocketAddr,
    path: &str,
    extra_headers: &[(&str, &str)],
    body: &str,
) -> TestResponse {
    let mut headers = vec![("content-type", "application/json")];
    headers.extend_from_slice(extra_headers);
    send(addr, Method::POST, path, &headers, body).await
}

/// Collects formatted log output for the current thread
#[derive(Clone, Default)]
pub struct LogCapture {
    buffer: Arc<std::sync::Mutex<Vec<u8>>>,
}

pub struct LogWriter {
    buffer: Arc<std::sync::Mutex<Vec<u8>>>,
}

impl std::io::Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buffer.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl LogCapture {
    /// Route every event on this thread into the capture until the guard drops
    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let buffer = self.buffer.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_max_level(tracing::Level::TRACE)
            .with_writer(move || LogWriter {
                buffer: buffer.clone(),
            })
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.buffer.lock().unwrap()).into_owned()
    }
}
