//! Error types and conversions

use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Duplicate backend id: {0}")]
    DuplicateBackend(String),

    #[error("Backend '{backend_id}' unreachable: {reason}")]
    BackendUnreachable { backend_id: String, reason: String },

    #[error("Malformed identifier: {0}")]
    MalformedIdentifier(String),

    #[error("Unknown backend: {0}")]
    UnknownBackend(String),

    #[error("Backend '{backend_id}' timed out after {timeout_ms}ms calling '{name}'")]
    Timeout {
        backend_id: String,
        name: String,
        timeout_ms: u64,
    },

    #[error("Backend '{backend_id}' failed during '{name}': {message}")]
    BackendInvocation {
        backend_id: String,
        name: String,
        message: String,
    },

    #[error("Redaction stage error: {0}")]
    Redaction(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type GatewayResult<T> = Result<T, GatewayError>;

impl From<GatewayError> for String {
    fn from(err: GatewayError) -> String {
        err.to_string()
    }
}
