//! Error types for the prepper receiver.

/// Top-level error type for the receiver process.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Transport lifecycle errors.
///
/// These never originate from a single envelope: a bad delivery produces an
/// `Outcome`, not a transport error.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("HTTP server failed: {0}")]
    Serve(#[from] std::io::Error),

    #[error("Broker request failed: {0}")]
    Broker(#[from] rumqttc::ClientError),
}

/// Wire-level errors: the delivery could not be read as an event at all.
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("Missing required attribute: {0}")]
    MissingAttribute(&'static str),

    #[error("Invalid attribute {name}: {reason}")]
    InvalidAttribute { name: &'static str, reason: String },

    #[error("Malformed event: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// The payload of a correctly addressed envelope violates the record schema.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("failed to convert data: {detail}")]
pub struct DecodeError {
    pub detail: String,
}

impl DecodeError {
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
        }
    }
}

/// Processing-stage errors raised by a `FileHandler`.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("Handler {name} failed: {reason}")]
    Failed { name: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for the receiver.
pub type Result<T> = std::result::Result<T, Error>;
