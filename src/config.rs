//! Configuration module - CLI arguments and settings

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};

use crate::rate_limit::RateLimitOptions;

/// Server-level credential. When set, the rate limiter is disabled.
pub const ENV_API_KEY: &str = "VUETIFY_API_KEY";
/// Token forwarded to documentation fetches
pub const ENV_GITHUB_TOKEN: &str = "GITHUB_TOKEN";

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_MCP_PATH: &str = "/mcp";
pub const DEFAULT_RATE_LIMIT_MAX: u32 = 100;
pub const DEFAULT_RATE_LIMIT_WINDOW_MS: u64 = 60_000;
/// Maximum accepted request body (4MB)
pub const DEFAULT_MAX_BODY_BYTES: usize = 4 * 1024 * 1024;
pub const DEFAULT_BODY_TIMEOUT_SECS: u64 = 30;

/// Listener and request-handling settings for the HTTP transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpOptions {
    pub port: u16,
    pub host: String,
    pub path: String,
    pub max_body_bytes: usize,
    pub body_timeout: Duration,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            host: DEFAULT_HOST.to_string(),
            path: DEFAULT_MCP_PATH.to_string(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            body_timeout: Duration::from_secs(DEFAULT_BODY_TIMEOUT_SECS),
        }
    }
}

/// Optional configuration parameters for Config::new()
#[derive(Debug, Clone, Default)]
pub struct ConfigOptions {
    pub api_key: Option<String>,
    pub github_token: Option<String>,
    pub port: Option<u16>,
    pub host: Option<String>,
    pub path: Option<String>,
    pub rate_limit_max: Option<u32>,
    pub rate_limit_window_ms: Option<u64>,
    pub max_body_bytes: Option<usize>,
    pub body_timeout_secs: Option<u64>,
}

impl ConfigOptions {
    /// Fill credentials that were not given explicitly from the environment
    pub fn with_env_fallback(mut self) -> Self {
        if self.api_key.is_none() {
            self.api_key = env_non_empty(ENV_API_KEY);
        }
        if self.github_token.is_none() {
            self.github_token = env_non_empty(ENV_GITHUB_TOKEN);
        }
        self
    }
}

/// Main configuration struct
#[derive(Debug, Clone)]
pub struct Config {
    pub api_key: Option<String>,
    pub github_token: Option<String>,
    pub http: HttpOptions,
    pub rate_limit: RateLimitOptions,
}

impl Config {
    pub fn new(options: ConfigOptions) -> Result<Arc<Self>> {
        let path = options
            .path
            .unwrap_or_else(|| DEFAULT_MCP_PATH.to_string());
        if !path.starts_with('/') {
            return Err(anyhow!("path must start with '/': {}", path));
        }
        if path == "/" || path == "/health" {
            return Err(anyhow!("path '{}' is reserved", path));
        }

        let host = options.host.unwrap_or_else(|| DEFAULT_HOST.to_string());
        if host.trim().is_empty() {
            return Err(anyhow!("host cannot be empty"));
        }

        let max_body_bytes = options.max_body_bytes.unwrap_or(DEFAULT_MAX_BODY_BYTES);
        if max_body_bytes == 0 {
            return Err(anyhow!("max_body_bytes must be greater than zero"));
        }

        let body_timeout_secs = options
            .body_timeout_secs
            .unwrap_or(DEFAULT_BODY_TIMEOUT_SECS);
        if body_timeout_secs == 0 {
            return Err(anyhow!("body_timeout_secs must be greater than zero"));
        }

        let rate_limit = RateLimitOptions::new(
            options.rate_limit_max.unwrap_or(DEFAULT_RATE_LIMIT_MAX),
            options
                .rate_limit_window_ms
                .unwrap_or(DEFAULT_RATE_LIMIT_WINDOW_MS),
        )?;

        Ok(Arc::new(Self {
            api_key: options.api_key.filter(|k| !k.is_empty()),
            github_token: options.github_token.filter(|t| !t.is_empty()),
            http: HttpOptions {
                port: options.port.unwrap_or(DEFAULT_PORT),
                host,
                path,
                max_body_bytes,
                body_timeout: Duration::from_secs(body_timeout_secs),
            },
            rate_limit,
        }))
    }

    /// Trusted deployments carry a server credential and skip rate limiting
    pub fn rate_limit_enabled(&self) -> bool {
        self.api_key.is_none()
    }
}

fn env_non_empty(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
