//! Failures that terminate an HTTP call with a specific status code

use hyper::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Request body exceeds {limit} bytes")]
    BodyTooLarge { limit: usize },

    #[error("Timed out reading request body after {secs}s")]
    BodyTimeout { secs: u64 },

    #[error("Failed to read request body: {0}")]
    BodyRead(String),

    #[error("Invalid JSON body: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl TransportError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BodyTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::BodyTimeout { .. } => StatusCode::REQUEST_TIMEOUT,
            Self::BodyRead(_) | Self::InvalidJson(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Plain-text body sent to the client. Internal details stay in the log.
    pub fn client_message(&self) -> String {
        match self {
            Self::InvalidJson(_) => "Bad Request - Invalid JSON".to_string(),
            Self::Internal(_) => "Internal Server Error".to_string(),
            other => other.to_string(),
        }
    }
}
