//! Per-request credential extraction

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::Result;
use hyper::header::AUTHORIZATION;
use hyper::HeaderMap;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Header carrying a Vuetify API key directly
pub const API_KEY_HEADER: &str = "x-vuetify-api-key";

/// Credentials attached to a single inbound call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthContext {
    pub token: Option<String>,
}

impl AuthContext {
    pub fn new(token: Option<String>) -> Self {
        Self { token }
    }

    /// `X-Vuetify-Api-Key` wins over `Authorization: Bearer <token>`.
    /// Empty values are treated as absent.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let custom = headers
            .get(API_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty());

        let bearer = headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .filter(|v| !v.is_empty());

        Self {
            token: custom.or(bearer).map(str::to_string),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }
}

/// How long a validation outcome is reused before asking again
pub const DEFAULT_VALIDATION_TTL: Duration = Duration::from_secs(300);

pub type CheckFuture = Pin<Box<dyn Future<Output = Result<bool>> + Send>>;

/// Decides whether a key is valid. Errors count as invalid.
pub type CredentialCheck = Arc<dyn Fn(String) -> CheckFuture + Send + Sync>;

/// Validates API keys through a [`CredentialCheck`], caching outcomes for a TTL
pub struct CredentialValidator {
    check: CredentialCheck,
    ttl: Duration,
    cache: Mutex<HashMap<String, (bool, Instant)>>,
}

impl CredentialValidator {
    pub fn new(check: CredentialCheck, ttl: Duration) -> Self {
        Self {
            check,
            ttl,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Validator that accepts every key, used until a key service is configured
    pub fn accept_all() -> Self {
        Self::new(
            Arc::new(|_key| Box::pin(async { Ok::<_, anyhow::Error>(true) })),
            DEFAULT_VALIDATION_TTL,
        )
    }

    pub async fn validate(&self, key: &str) -> bool {
        if let Some(valid) = self.cached(key) {
            return valid;
        }

        match (self.check)(key.to_string()).await {
            Ok(valid) => {
                debug!("API key validated: {}", valid);
                self.cache
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(key.to_string(), (valid, Instant::now()));
                valid
            }
            Err(e) => {
                warn!("API key validation failed: {}", e);
                false
            }
        }
    }

    pub fn clear_cache(&self) {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn cached(&self, key: &str) -> Option<bool> {
        let cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        cache
            .get(key)
            .filter(|(_, checked_at)| checked_at.elapsed() < self.ttl)
            .map(|(valid, _)| *valid)
    }
}
