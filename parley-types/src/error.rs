//! Error types for Parley.

use thiserror::Error;

/// Errors that can occur in Parley operations.
#[derive(Debug, Error)]
pub enum ParleyError {
    /// MessagePack serialization failed
    #[error("serialization failed: {0}")]
    Serialization(#[source] rmp_serde::encode::Error),

    /// MessagePack deserialization failed
    #[error("deserialization failed: {0}")]
    Deserialization(#[source] rmp_serde::decode::Error),

    /// Invalid protocol version
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    /// Bad or missing credential
    #[error("authentication failed")]
    AuthenticationFailed,

    /// Operation attempted before the handshake completed
    #[error("not authenticated")]
    NotAuthenticated,

    /// Unknown target user or pairing code
    #[error("not found: {0}")]
    NotFound(String),

    /// Pairing code past its TTL
    #[error("expired")]
    Expired,

    /// Delivery suppressed by the recipient's block list.
    /// Never surfaced to the sender.
    #[error("blocked")]
    Blocked,

    /// Storage collaborator failure
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Signaling forward failed
    #[error("relay error: {0}")]
    Relay(String),

    /// Invalid data format
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Connection error
    #[error("connection error: {0}")]
    Connection(String),

    /// Timeout
    #[error("operation timed out")]
    Timeout,

    /// Rate limit exceeded
    #[error("rate limit exceeded")]
    RateLimited,

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}
