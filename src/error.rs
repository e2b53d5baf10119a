//! Error types for activitywire.

use thiserror::Error;

/// Main error type for all connector operations.
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// A required construction parameter was missing or unusable.
    #[error("Invalid argument: {0}")]
    Argument(&'static str),

    /// A required call parameter was missing or empty. Nothing was sent.
    #[error("Validation failed: {field} cannot be empty")]
    Validation {
        /// Name of the offending parameter.
        field: &'static str,
    },

    /// The socket could not be established.
    #[error("Connect error: {0}")]
    Connect(String),

    /// The connection was closed, by us or by the peer.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Writing a frame failed; the operation did not complete.
    #[error("Send error: {0}")]
    Send(String),

    /// Reading a frame failed.
    #[error("Receive error: {0}")]
    Receive(String),

    /// Inbound payload could not be decoded.
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Outbound payload could not be serialized.
    #[error("Encode error: {0}")]
    Encode(#[from] serde_json::Error),

    /// The operation has no channel-side acknowledgement wiring.
    #[error("Operation not supported over the socket transport: {operation}")]
    NotSupported {
        /// Logical operation name.
        operation: &'static str,
    },

    /// The credentials provider failed to produce a token.
    #[error("Credentials error: {0}")]
    Credentials(String),

    /// Backpressure timeout - outbound queue full.
    #[error("Backpressure timeout")]
    BackpressureTimeout,

    /// No acknowledgement (or connection) within the configured deadline.
    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// Reasons an inbound frame could not be turned into a value.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Frame bytes are not valid UTF-8.
    #[error("frame is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    /// Frame is not well-formed JSON for the expected shape.
    #[error("malformed payload: {0}")]
    Json(#[from] serde_json::Error),

    /// A field the channel must always send is absent or empty.
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
}

/// Result type alias using ConnectorError.
pub type Result<T> = std::result::Result<T, ConnectorError>;
