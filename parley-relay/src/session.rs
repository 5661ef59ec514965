//! Per-connection session handling.
//!
//! A session starts in `AwaitingHello`: the client must open a bi stream
//! and present a credential within the hello timeout. Once authenticated
//! the session registers with the identity registry, subscribes to the
//! user's own channel, and enters the event loop. Every subsequent
//! event arrives on its own uni stream; deliveries travel the other way
//! on server-opened uni streams.
//!
//! Failures while handling an event are reported back to this
//! connection only, the session itself keeps running.

use crate::error::{ProtocolError, ProtocolResult};
use crate::protocol::{close_code, MAX_MESSAGE_SIZE, PROTOCOL_VERSION};
use crate::registry::ChannelKey;
use crate::server::{ParleyRelay, RelayMetrics};
use crate::storage::UserRecord;
use iroh::endpoint::{Connection, RecvStream, SendStream};
use parley_types::{
    CallError, ClientEvent, ConnectionId, MessageError, ServerEvent, Welcome,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Lifecycle state of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    /// Connected, hello not yet received
    AwaitingHello,
    /// Authenticated, event loop running
    Active,
}

/// One client connection being serviced.
pub struct Session {
    relay: Arc<ParleyRelay>,
    connection: Connection,
    state: SessionState,
}

impl Session {
    /// Wrap an accepted connection.
    pub fn new(relay: Arc<ParleyRelay>, connection: Connection) -> Self {
        Self {
            relay,
            connection,
            state: SessionState::AwaitingHello,
        }
    }

    /// Service the connection until it closes.
    pub async fn run(mut self) {
        let (user, connection_id) = match self.handshake().await {
            Ok(authenticated) => authenticated,
            Err(err) => {
                info!(error = %err, "handshake failed");
                self.connection
                    .close(close_code(&err).into(), err.to_string().as_bytes());
                return;
            }
        };

        info!(user = %user.id, connection = %connection_id, "session active");
        self.state = SessionState::Active;
        self.event_loop(&user, connection_id).await;

        self.relay.registry().unregister(connection_id);
        info!(user = %user.id, connection = %connection_id, "session closed");
    }

    /// Accept the hello stream, verify the credential, and welcome the
    /// client.
    async fn handshake(&mut self) -> ProtocolResult<(UserRecord, ConnectionId)> {
        let hello_timeout = Duration::from_secs(self.relay.config().server.hello_timeout_secs);

        let accepted = tokio::time::timeout(hello_timeout, self.connection.accept_bi())
            .await
            .map_err(|_| ProtocolError::Connection("hello timeout".into()))?;
        let (mut send, mut recv) =
            accepted.map_err(|err| ProtocolError::Connection(err.to_string()))?;

        let bytes = read_frame(&mut recv).await?;
        let event = ClientEvent::from_bytes(&bytes)
            .map_err(|err| ProtocolError::InvalidMessage(err.to_string()))?;

        let hello = match event {
            ClientEvent::Hello(hello) => hello,
            other => {
                return Err(ProtocolError::UnexpectedMessage {
                    state: "awaiting_hello".into(),
                    message: event_name(&other).into(),
                })
            }
        };

        if hello.version != PROTOCOL_VERSION {
            return Err(ProtocolError::VersionMismatch(hello.version));
        }

        let user = self.relay.authenticate(&hello.token).await?;

        let welcome = ServerEvent::Welcome(Welcome {
            version: PROTOCOL_VERSION,
            user_id: user.id,
        });
        let bytes = welcome.to_bytes().map_err(|err| {
            ProtocolError::Internal(format!("failed to encode welcome: {err}"))
        })?;
        write_frame(&mut send, &bytes).await?;
        send.finish()
            .map_err(|err| ProtocolError::Stream(err.to_string()))?;

        // register only once the welcome is on the wire, so a failed
        // handshake never leaves a registry entry behind
        let connection_id = ConnectionId::random();
        self.relay
            .registry()
            .register(connection_id, self.connection.clone());
        self.relay
            .registry()
            .subscribe(connection_id, ChannelKey::User(user.id));

        Ok((user, connection_id))
    }

    /// Accept uni streams and dispatch their events until the
    /// connection goes away or the client says bye.
    async fn event_loop(&self, user: &UserRecord, connection_id: ConnectionId) {
        loop {
            let mut recv = match self.connection.accept_uni().await {
                Ok(recv) => recv,
                Err(err) => {
                    debug!(connection = %connection_id, error = %err, "connection ended");
                    return;
                }
            };

            if let Err(err) = self.relay.limits().check_event(*connection_id.as_bytes()) {
                RelayMetrics::incr(&self.relay.metrics().rate_limit_hits);
                debug!(connection = %connection_id, "event dropped: {err}");
                self.report_message_error(connection_id, err.to_string());
                continue;
            }

            let event = match read_event(&mut recv).await {
                Ok(event) => event,
                Err(err) => {
                    RelayMetrics::incr(&self.relay.metrics().errors_total);
                    debug!(connection = %connection_id, error = %err, "bad event frame");
                    self.report_message_error(connection_id, err.to_string());
                    continue;
                }
            };

            match event {
                ClientEvent::Bye(bye) => {
                    debug!(connection = %connection_id, reason = ?bye.reason, "client said bye");
                    self.connection.close(0u32.into(), b"bye");
                    return;
                }
                ClientEvent::Hello(_) => {
                    warn!(connection = %connection_id, "unexpected hello after handshake");
                    self.connection.close(
                        close_code(&ProtocolError::UnexpectedMessage {
                            state: "active".into(),
                            message: "hello".into(),
                        })
                        .into(),
                        b"unexpected hello",
                    );
                    return;
                }
                ClientEvent::Join(join) => {
                    self.relay
                        .registry()
                        .subscribe(connection_id, ChannelKey::Group(join.room_id));
                    debug!(connection = %connection_id, group = %join.room_id, "joined group channel");
                }
                ClientEvent::Message(request) => {
                    if let Err(err) = self.relay.handle_send(user.id, request).await {
                        RelayMetrics::incr(&self.relay.metrics().errors_total);
                        self.report_message_error(connection_id, err.to_string());
                    }
                }
                signal @ (ClientEvent::CallOffer(_)
                | ClientEvent::CallAnswer(_)
                | ClientEvent::CallReject(_)
                | ClientEvent::CallEnd(_)
                | ClientEvent::IceCandidate(_)
                | ClientEvent::SecureCallOffer(_)
                | ClientEvent::SecureCallAnswer(_)
                | ClientEvent::SecureIceCandidate(_)
                | ClientEvent::KeyExchangeInit(_)) => {
                    if let Err(err) = self.relay.handle_signal(user.id, signal).await {
                        RelayMetrics::incr(&self.relay.metrics().errors_total);
                        self.relay.registry().send_to_connection(
                            connection_id,
                            &ServerEvent::CallError(CallError {
                                message: err.to_string(),
                            }),
                        );
                    }
                }
            }
        }
    }

    /// Push a message error back to this connection only.
    fn report_message_error(&self, connection_id: ConnectionId, error: String) {
        self.relay.registry().send_to_connection(
            connection_id,
            &ServerEvent::MessageError(MessageError { error }),
        );
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

/// Read one length-prefixed frame.
async fn read_frame(recv: &mut RecvStream) -> ProtocolResult<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    recv.read_exact(&mut len_buf)
        .await
        .map_err(|err| ProtocolError::Stream(err.to_string()))?;

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::InvalidMessage(format!(
            "frame of {len} bytes exceeds limit of {MAX_MESSAGE_SIZE}"
        )));
    }

    let mut bytes = vec![0u8; len];
    recv.read_exact(&mut bytes)
        .await
        .map_err(|err| ProtocolError::Stream(err.to_string()))?;
    Ok(bytes)
}

/// Read and decode one client event.
async fn read_event(recv: &mut RecvStream) -> ProtocolResult<ClientEvent> {
    let bytes = read_frame(recv).await?;
    ClientEvent::from_bytes(&bytes).map_err(|err| ProtocolError::InvalidMessage(err.to_string()))
}

/// Write one length-prefixed frame.
async fn write_frame(send: &mut SendStream, bytes: &[u8]) -> ProtocolResult<()> {
    let len = bytes.len() as u32;
    send.write_all(&len.to_be_bytes())
        .await
        .map_err(|err| ProtocolError::Stream(err.to_string()))?;
    send.write_all(bytes)
        .await
        .map_err(|err| ProtocolError::Stream(err.to_string()))?;
    Ok(())
}

fn event_name(event: &ClientEvent) -> &'static str {
    match event {
        ClientEvent::Hello(_) => "hello",
        ClientEvent::Join(_) => "join",
        ClientEvent::Message(_) => "message",
        ClientEvent::CallOffer(_) => "call_offer",
        ClientEvent::CallAnswer(_) => "call_answer",
        ClientEvent::CallReject(_) => "call_reject",
        ClientEvent::CallEnd(_) => "call_end",
        ClientEvent::IceCandidate(_) => "ice_candidate",
        ClientEvent::SecureCallOffer(_) => "secure_call_offer",
        ClientEvent::SecureCallAnswer(_) => "secure_call_answer",
        ClientEvent::SecureIceCandidate(_) => "secure_ice_candidate",
        ClientEvent::KeyExchangeInit(_) => "key_exchange_init",
        ClientEvent::Bye(_) => "bye",
    }
}
