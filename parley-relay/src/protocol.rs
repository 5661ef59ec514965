//! QUIC protocol handler.
//!
//! Accepts connections on the Parley ALPN, applies the connection-level
//! admission gates, and hands each connection to a [`Session`].

use crate::error::ProtocolError;
use crate::server::{ParleyRelay, RelayMetrics};
use crate::session::Session;
use iroh::endpoint::Connection;
use iroh::protocol::{AcceptError, ProtocolHandler};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// ALPN identifier for the Parley protocol.
pub const ALPN: &[u8] = b"/parley/1";

/// Protocol version carried in hello and welcome.
pub const PROTOCOL_VERSION: u8 = 1;

/// Maximum size of one event frame in bytes.
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Application close code for a connection refused by rate limiting.
const CLOSE_RATE_LIMITED: u32 = 1;

/// Application close code for a connection refused at capacity.
const CLOSE_AT_CAPACITY: u32 = 2;

/// Map a protocol error to the application close code sent with it.
pub fn close_code(err: &ProtocolError) -> u32 {
    match err {
        ProtocolError::RateLimited { .. } => CLOSE_RATE_LIMITED,
        ProtocolError::Connection(_) | ProtocolError::Stream(_) => 3,
        ProtocolError::VersionMismatch(_) => 4,
        ProtocolError::AuthenticationFailed | ProtocolError::NotAuthenticated => 5,
        ProtocolError::InvalidMessage(_)
        | ProtocolError::UnexpectedMessage { .. }
        | ProtocolError::Serialization(_)
        | ProtocolError::Deserialization(_) => 6,
        ProtocolError::Internal(_) => 7,
    }
}

/// Accepts Parley connections and spawns a session per connection.
#[derive(Debug, Clone)]
pub struct ParleyProtocol {
    relay: Arc<ParleyRelay>,
}

impl ParleyProtocol {
    /// Create a handler over the shared server state.
    pub fn new(relay: Arc<ParleyRelay>) -> Self {
        Self { relay }
    }
}

impl ProtocolHandler for ParleyProtocol {
    fn accept(
        &self,
        connection: Connection,
    ) -> impl std::future::Future<Output = Result<(), AcceptError>> + Send {
        let relay = Arc::clone(&self.relay);
        async move {
            let remote_id = connection.remote_id();

            if relay.limits().check_connection(*remote_id.as_bytes()).is_err() {
                RelayMetrics::incr(&relay.metrics().rate_limit_hits);
                info!(remote = %remote_id, "connection rate limited");
                connection.close(CLOSE_RATE_LIMITED.into(), b"rate limited");
                return Ok(());
            }

            let max_connections = relay.config().server.max_connections;
            if relay.registry().connection_count() >= max_connections {
                warn!(max_connections, "connection refused at capacity");
                connection.close(CLOSE_AT_CAPACITY.into(), b"at capacity");
                return Ok(());
            }

            RelayMetrics::incr(&relay.metrics().connections_total);
            debug!(remote = %remote_id, "connection accepted");

            let session = Session::new(relay, connection);
            tokio::spawn(session.run());
            Ok(())
        }
    }
}
