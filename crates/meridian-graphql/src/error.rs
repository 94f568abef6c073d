//! Error types for the transport layer.
//!
//! Everything above the transport seam reports failures as values
//! ([`OperationResult`](crate::OperationResult) or
//! [`CloseReason`](crate::subscription::CloseReason)); `TransportError` only
//! exists below that boundary.

use thiserror::Error;

/// Errors raised by the HTTP and socket transports.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Failed to build or dispatch an HTTP request.
    #[error("HTTP request error: {0}")]
    Request(String),

    /// Invalid URL provided.
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Connection refused or failed.
    #[error("connection error: {0}")]
    Connection(String),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid header name or value.
    #[error("invalid header: {0}")]
    InvalidHeader(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() {
            Self::Connection(err.to_string())
        } else {
            Self::Request(err.to_string())
        }
    }
}

/// A specialized Result type for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;
