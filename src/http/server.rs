//! Streamable HTTP transport
//!
//! Owns the listening socket. Each call goes through CORS handling, rate
//! limiting and routing; POSTs to the MCP path get a fresh session from the
//! [`SessionFactory`]. Every call ends in exactly one response, including
//! when a handler fails or panics.

use std::convert::Infallible;
use std::error::Error as StdError;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::FutureExt;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use hyper::body::{Body, Bytes};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{HeaderMap, Request, StatusCode};
use hyper_util::rt::{TokioIo, TokioTimer};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{Config, HttpOptions};
use crate::error::TransportError;
use crate::rate_limit::RateLimiter;

use super::identity::client_key;
use super::response::{
    apply_rate_limit_headers, cors_preflight, json_response, text_response, too_many_requests,
    HttpResponse,
};
use super::router::{self, Route, HEALTH_PATH};
use super::session::SessionFactory;

/// Name reported by the info route
pub const SERVER_DISPLAY_NAME: &str = "Vuetify MCP Server";

/// Bound on how long a client may take to send request headers
pub const HEADER_READ_TIMEOUT: Duration = Duration::from_secs(30);

struct Shared {
    options: HttpOptions,
    limiter: Option<Arc<RateLimiter>>,
    sessions: SessionFactory,
}

/// Request handling for the HTTP transport. Cheap to clone.
#[derive(Clone)]
pub struct HttpTransport {
    shared: Arc<Shared>,
}

/// Build the limiter for `config`, or `None` for trusted deployments
pub fn limiter_for(config: &Config) -> Option<Arc<RateLimiter>> {
    if !config.rate_limit_enabled() {
        warn!("Server API key is configured, rate limiting is disabled for all callers");
        return None;
    }
    Some(Arc::new(RateLimiter::new(config.rate_limit.clone())))
}

impl HttpTransport {
    pub fn new(
        options: HttpOptions,
        limiter: Option<Arc<RateLimiter>>,
        sessions: SessionFactory,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                options,
                limiter,
                sessions,
            }),
        }
    }

    pub fn options(&self) -> &HttpOptions {
        &self.shared.options
    }

    /// Bind the listener and start serving in the background
    pub async fn start(self) -> Result<RunningServer> {
        let options = &self.shared.options;
        let listener = TcpListener::bind((options.host.as_str(), options.port))
            .await
            .with_context(|| format!("Failed to bind {}:{}", options.host, options.port))?;
        let local_addr = listener.local_addr()?;

        info!(
            "MCP Server listening on http://{}:{}{}",
            options.host,
            local_addr.port(),
            options.path
        );

        let limiter = self.shared.limiter.clone();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(accept_loop(self, listener, shutdown_rx));

        Ok(RunningServer {
            local_addr,
            shutdown: shutdown_tx,
            task,
            limiter,
        })
    }

    /// Produce the single terminal response for one call.
    ///
    /// Admission runs before the unwind boundary so the limiter decision
    /// survives a panicking handler and still reaches the 500.
    pub async fn handle<B>(&self, req: Request<B>, remote_addr: Option<SocketAddr>) -> HttpResponse
    where
        B: Body<Data = Bytes> + Send,
        B::Error: Into<Box<dyn StdError + Send + Sync>>,
    {
        info!("{} {}", req.method(), req.uri());

        let path = req.uri().path().to_string();
        let route = router::classify(req.method(), &path, &self.shared.options.path);

        if route == Route::Preflight {
            return cors_preflight();
        }

        let decision = match &self.shared.limiter {
            Some(limiter) if !router::is_rate_limit_exempt(&path) => {
                let key = client_key(req.headers(), remote_addr);
                let decision = limiter.check(&key);
                if !decision.allowed {
                    warn!(
                        "Rate limit exceeded for {}, retry after {}s",
                        key,
                        decision.retry_after_secs.unwrap_or(1)
                    );
                    return too_many_requests(&decision);
                }
                Some(decision)
            }
            _ => None,
        };

        let mut response = match AssertUnwindSafe(self.dispatch(route, req))
            .catch_unwind()
            .await
        {
            Ok(response) => response,
            Err(_) => {
                error!("Error handling request: handler panicked");
                text_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
            }
        };

        if let Some(decision) = &decision {
            apply_rate_limit_headers(&mut response, decision);
        }
        response
    }

    async fn dispatch<B>(&self, route: Route, req: Request<B>) -> HttpResponse
    where
        B: Body<Data = Bytes> + Send,
        B::Error: Into<Box<dyn StdError + Send + Sync>>,
    {
        let options = &self.shared.options;
        match route {
            Route::Preflight => cors_preflight(),
            Route::Health => json_response(StatusCode::OK, &json!({"status": "ok"})),
            Route::Info => json_response(
                StatusCode::OK,
                &json!({
                    "name": SERVER_DISPLAY_NAME,
                    "version": env!("CARGO_PKG_VERSION"),
                    "mcp_endpoint": options.path,
                    "health_endpoint": HEALTH_PATH,
                }),
            ),
            Route::NotFound => text_response(
                StatusCode::NOT_FOUND,
                format!(
                    "Not Found. Try {} for MCP endpoint or /health for health check.",
                    options.path
                ),
            ),
            Route::Protocol => {
                let (mut parts, body) = req.into_parts();
                match self.protocol(&mut parts.headers, body).await {
                    Ok(response) => response,
                    Err(err) => error_response(err),
                }
            }
            Route::StatelessUnsupported => text_response(
                StatusCode::METHOD_NOT_ALLOWED,
                "Method Not Allowed - stateless mode only supports POST",
            ),
            Route::MethodNotAllowed => {
                text_response(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed")
            }
        }
    }

    async fn protocol<B>(
        &self,
        headers: &mut HeaderMap,
        body: B,
    ) -> Result<HttpResponse, TransportError>
    where
        B: Body<Data = Bytes> + Send,
        B::Error: Into<Box<dyn StdError + Send + Sync>>,
    {
        let body = self.read_body(body).await?;
        self.shared.sessions.handle_post(headers, body).await
    }

    /// Read the whole body, bounded in both size and time
    async fn read_body<B>(&self, body: B) -> Result<Bytes, TransportError>
    where
        B: Body<Data = Bytes> + Send,
        B::Error: Into<Box<dyn StdError + Send + Sync>>,
    {
        let limit = self.shared.options.max_body_bytes;
        let timeout = self.shared.options.body_timeout;

        match tokio::time::timeout(timeout, Limited::new(body, limit).collect()).await {
            Err(_) => Err(TransportError::BodyTimeout {
                secs: timeout.as_secs(),
            }),
            Ok(Err(e)) if e.downcast_ref::<LengthLimitError>().is_some() => {
                Err(TransportError::BodyTooLarge { limit })
            }
            Ok(Err(e)) => Err(TransportError::BodyRead(e.to_string())),
            Ok(Ok(collected)) => Ok(collected.to_bytes()),
        }
    }
}

fn error_response(err: TransportError) -> HttpResponse {
    let status = err.status();
    if status.is_server_error() {
        error!("Error handling request: {}", err);
    } else {
        warn!("Rejected request: {}", err);
    }
    text_response(status, err.client_message())
}

async fn accept_loop(
    transport: HttpTransport,
    listener: TcpListener,
    mut shutdown: oneshot::Receiver<()>,
) {
    loop {
        let (stream, remote_addr) = tokio::select! {
            _ = &mut shutdown => {
                info!("HTTP transport stopped accepting connections");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                    continue;
                }
            },
        };

        let io = TokioIo::new(stream);
        let transport = transport.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req| {
                let transport = transport.clone();
                async move { Ok::<_, Infallible>(transport.handle(req, Some(remote_addr)).await) }
            });

            let mut builder = http1::Builder::new();
            builder
                .timer(TokioTimer::new())
                .header_read_timeout(HEADER_READ_TIMEOUT);

            if let Err(e) = builder.serve_connection(io, service).await {
                if e.is_incomplete_message() || e.is_closed() {
                    debug!("Connection from {} closed early: {}", remote_addr, e);
                } else {
                    error!("Error serving connection from {}: {}", remote_addr, e);
                }
            }
        });
    }
}

/// Handle to a listening transport
pub struct RunningServer {
    local_addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
    limiter: Option<Arc<RateLimiter>>,
}

impl RunningServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting connections and stop the limiter sweep.
    /// Connections already being served run to completion.
    pub async fn shutdown(self) -> Result<()> {
        let RunningServer {
            shutdown,
            task,
            limiter,
            ..
        } = self;

        let _ = shutdown.send(());
        task.await?;
        if let Some(limiter) = limiter {
            limiter.destroy();
        }
        Ok(())
    }
}
