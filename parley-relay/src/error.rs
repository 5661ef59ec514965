//! Error types for the relay server.

use thiserror::Error;

/// Top-level relay error.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Configuration loading or validation failed
    #[error("config error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Storage layer failure
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Protocol-level failure on a connection
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Credential verification or minting failed
    #[error("auth error: {0}")]
    Auth(#[from] crate::auth::CredentialError),

    /// Referenced user, message, or pairing code does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Delivery suppressed by the recipient's block list
    #[error("delivery blocked")]
    Blocked,

    /// Call signaling forward failed
    #[error("signaling error: {0}")]
    Signaling(String),

    /// Rate limit exceeded
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// I/O error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the storage layer.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Underlying database failure
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Schema migration failed
    #[error("migration failed: {0}")]
    Migration(String),

    /// A stored row did not decode into its domain type
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Database path is not usable
    #[error("invalid database path: {0}")]
    InvalidPath(String),
}

/// Errors raised while servicing a single connection.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeded the size limit or was otherwise malformed
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Outbound event failed to encode
    #[error("serialization failed: {0}")]
    Serialization(#[from] rmp_serde::encode::Error),

    /// Inbound event failed to decode
    #[error("deserialization failed: {0}")]
    Deserialization(#[from] rmp_serde::decode::Error),

    /// Event arrived in a state that does not accept it
    #[error("unexpected message in state {state}: {message}")]
    UnexpectedMessage {
        /// Session state when the event arrived
        state: String,
        /// Event kind received
        message: String,
    },

    /// Operation attempted before the handshake completed
    #[error("not authenticated")]
    NotAuthenticated,

    /// Hello carried a bad or expired credential
    #[error("authentication failed")]
    AuthenticationFailed,

    /// Connection-level failure
    #[error("connection error: {0}")]
    Connection(String),

    /// Stream read or write failure
    #[error("stream error: {0}")]
    Stream(String),

    /// Client requested an unsupported protocol version
    #[error("unsupported protocol version: {0}")]
    VersionMismatch(u8),

    /// Client exceeded a rate limit
    #[error("rate limited: {reason}")]
    RateLimited {
        /// Which limit was hit
        reason: String,
    },

    /// Internal error while servicing the connection
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result alias for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;

/// Result alias for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Result alias for per-connection protocol operations.
pub type ProtocolResult<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_error_converts_to_relay_error() {
        let err = StorageError::InvalidData("truncated uuid".into());
        let relay: RelayError = err.into();
        assert!(matches!(relay, RelayError::Storage(_)));
    }

    #[test]
    fn protocol_error_display() {
        let err = ProtocolError::UnexpectedMessage {
            state: "awaiting_hello".into(),
            message: "send_message".into(),
        };
        assert_eq!(
            err.to_string(),
            "unexpected message in state awaiting_hello: send_message"
        );
    }

    #[test]
    fn rate_limited_includes_reason() {
        let err = ProtocolError::RateLimited {
            reason: "events per second".into(),
        };
        assert!(err.to_string().contains("events per second"));
    }
}
