// Gateway error type

use thiserror::Error;

/// Failure classes for the gateway.
///
/// Components return these as values; only the proxy layer translates them to
/// HTTP responses. Messages never carry original values or placeholder
/// contents.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{name} backend not configured")]
    MissingBackend { name: String },

    #[error("Request body exceeds {limit} bytes")]
    BodyTooLarge { limit: usize },

    #[error("Invalid request payload: {0}")]
    InvalidPayload(String),

    #[error("Sanitization incomplete: outbound payload rejected")]
    CanaryTripped { ssn_like: usize, ein_like: usize },

    #[error("Upstream request failed: {0}")]
    Upstream(String),

    #[error("Vault error: {0}")]
    Vault(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, GatewayError>;
