//! Protocol events for Parley.
//!
//! One tagged variant per event name, in both directions. Payload fields
//! are validated by the type system at decode time rather than inspected
//! ad hoc after dispatch.

use serde::{Deserialize, Serialize};

use crate::{GroupId, MessageId, ParleyError, UserId};

/// Events sent by a client over its connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Initial handshake carrying the bearer credential
    Hello(Hello),
    /// Join an additional group channel
    Join(Join),
    /// Send a chat message
    Message(SendMessage),
    /// Start a call
    CallOffer(CallOffer),
    /// Answer a call
    CallAnswer(CallAnswer),
    /// Reject an incoming call
    CallReject(CallReject),
    /// Hang up
    CallEnd(CallEnd),
    /// Trickle an ICE candidate
    IceCandidate(IceCandidate),
    /// Start a call with an encrypted offer
    SecureCallOffer(SecureCallOffer),
    /// Answer with an encrypted answer
    SecureCallAnswer(SecureCallAnswer),
    /// Trickle an encrypted ICE candidate
    SecureIceCandidate(SecureIceCandidate),
    /// Initiate a key exchange for a secure call
    KeyExchangeInit(KeyExchangeInit),
    /// Graceful disconnect
    Bye(Bye),
}

impl ClientEvent {
    /// Serialize to MessagePack bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ParleyError> {
        rmp_serde::to_vec(self).map_err(ParleyError::Serialization)
    }

    /// Deserialize from MessagePack bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ParleyError> {
        rmp_serde::from_slice(bytes).map_err(ParleyError::Deserialization)
    }
}

/// Events delivered to a client over its connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Handshake accepted
    Welcome(Welcome),
    /// A chat message for one of this connection's channels
    Message(PopulatedMessage),
    /// A send failed; delivered to the sender only
    MessageError(MessageError),
    /// Incoming call offer, with caller identity attached
    CallOffer(RelayedCallOffer),
    /// Call answered
    CallAnswer(RelayedCallAnswer),
    /// Call rejected
    CallReject,
    /// Call ended
    CallEnd,
    /// ICE candidate from the peer
    IceCandidate(RelayedIceCandidate),
    /// Incoming encrypted call offer, with caller identity attached
    SecureCallOffer(RelayedSecureCallOffer),
    /// Encrypted call answered
    SecureCallAnswer(RelayedSecureCallAnswer),
    /// Encrypted ICE candidate from the peer
    SecureIceCandidate(RelayedSecureIceCandidate),
    /// Key exchange handshake from the peer, with identity attached
    KeyExchangeResponse(KeyExchangeResponse),
    /// A signaling relay failed; delivered to the initiator only
    CallError(CallError),
    /// Contact list changed; carries the refreshed list
    ContactsUpdated(ContactsUpdated),
}

impl ServerEvent {
    /// Serialize to MessagePack bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ParleyError> {
        rmp_serde::to_vec(self).map_err(ParleyError::Serialization)
    }

    /// Deserialize from MessagePack bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ParleyError> {
        rmp_serde::from_slice(bytes).map_err(ParleyError::Deserialization)
    }
}

/// Initial handshake sent by the client on connect.
///
/// Must be the first event on a new connection; everything else is
/// refused until the credential is verified.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hello {
    /// Protocol version (currently 1)
    pub version: u8,
    /// Bearer session credential
    pub token: String,
}

impl std::fmt::Debug for Hello {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hello")
            .field("version", &self.version)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

/// Handshake response once the credential is verified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Welcome {
    /// Protocol version supported by the server
    pub version: u8,
    /// The authenticated user
    pub user_id: UserId,
}

/// Join an additional group channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Join {
    /// The group to join
    pub room_id: GroupId,
}

/// Kind tag for a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Plain text
    Text,
    /// Image attachment
    Image,
    /// Audio attachment
    Audio,
}

/// Send a chat message to a user or a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendMessage {
    /// Recipient: a user id or an email address (resolved server-side).
    /// Ignored when `group_id` is set.
    pub to: String,
    /// Message text
    pub content: String,
    /// Kind tag
    pub kind: MessageKind,
    /// Target group, for group messages
    pub group_id: Option<GroupId>,
    /// Image attachment reference
    pub image: Option<String>,
    /// Audio attachment reference
    pub audio: Option<String>,
}

/// A send failed. Delivered to the sender only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageError {
    /// Human-readable failure description
    pub error: String,
}

/// Minimal public identity attached to populated events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    /// User id
    pub id: UserId,
    /// Account email
    pub email: String,
    /// Display name
    pub display_name: String,
    /// Unique handle
    pub username: String,
    /// Avatar URL, if set
    pub avatar_url: Option<String>,
}

/// A persisted message with sender and recipient identities resolved.
///
/// Exactly one of `to` and `group_id` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PopulatedMessage {
    /// Storage-assigned message id
    pub id: MessageId,
    /// Sender identity
    pub from: UserProfile,
    /// Recipient identity, for one-to-one messages
    pub to: Option<UserProfile>,
    /// Target group, for group messages
    pub group_id: Option<GroupId>,
    /// Message text
    pub content: String,
    /// Kind tag
    pub kind: MessageKind,
    /// Image attachment reference
    pub image: Option<String>,
    /// Audio attachment reference
    pub audio: Option<String>,
    /// Creation time, unix millis
    pub created_at: u64,
    /// Read flag (false at creation)
    pub read: bool,
}

/// Start a call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallOffer {
    /// Callee
    pub to: UserId,
    /// Media kind requested by the caller (e.g. "audio", "video")
    pub call_type: String,
    /// SDP offer
    pub offer: String,
}

/// Answer a call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallAnswer {
    /// Caller
    pub to: UserId,
    /// SDP answer
    pub answer: String,
}

/// Reject an incoming call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallReject {
    /// Caller
    pub to: UserId,
}

/// Hang up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallEnd {
    /// The other party
    pub to: UserId,
}

/// Trickle an ICE candidate to the peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    /// The other party
    pub to: UserId,
    /// Serialized candidate
    pub candidate: String,
}

/// Start a call with an encrypted offer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecureCallOffer {
    /// Callee
    pub to: UserId,
    /// Media kind requested by the caller
    pub call_type: String,
    /// Encrypted SDP offer (opaque to the relay)
    pub offer: String,
    /// Opaque call correlator, carried unmodified
    pub session_id: String,
}

/// Answer with an encrypted answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecureCallAnswer {
    /// Caller
    pub to: UserId,
    /// Encrypted SDP answer (opaque to the relay)
    pub answer: String,
    /// Opaque call correlator, carried unmodified
    pub session_id: String,
}

/// Trickle an encrypted ICE candidate to the peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecureIceCandidate {
    /// The other party
    pub to: UserId,
    /// Encrypted candidate (opaque to the relay)
    pub candidate: String,
    /// Opaque call correlator, carried unmodified
    pub session_id: String,
}

/// Initiate a key exchange for a secure call.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyExchangeInit {
    /// The other party
    pub to: UserId,
    /// Initiator's public key (opaque to the relay)
    pub public_key: String,
    /// Wrapped session key material (opaque to the relay)
    pub session_key: String,
}

impl std::fmt::Debug for KeyExchangeInit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyExchangeInit")
            .field("to", &self.to)
            .field("public_key", &"[REDACTED]")
            .field("session_key", &"[REDACTED]")
            .finish()
    }
}

/// Graceful disconnect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bye {
    /// Optional reason for disconnect
    pub reason: Option<String>,
}

/// An incoming call offer, caller identity attached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayedCallOffer {
    /// Caller identity
    pub from: UserProfile,
    /// Media kind requested by the caller
    pub call_type: String,
    /// SDP offer
    pub offer: String,
}

/// A relayed answer. Carries no sender identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayedCallAnswer {
    /// SDP answer
    pub answer: String,
}

/// A relayed ICE candidate. Carries no sender identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayedIceCandidate {
    /// Serialized candidate
    pub candidate: String,
}

/// An incoming encrypted call offer, caller identity attached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayedSecureCallOffer {
    /// Caller identity
    pub from: UserProfile,
    /// Media kind requested by the caller
    pub call_type: String,
    /// Encrypted SDP offer
    pub offer: String,
    /// Opaque call correlator
    pub session_id: String,
}

/// A relayed encrypted answer. Carries no sender identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayedSecureCallAnswer {
    /// Encrypted SDP answer
    pub answer: String,
    /// Opaque call correlator
    pub session_id: String,
}

/// A relayed encrypted ICE candidate. Carries no sender identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayedSecureIceCandidate {
    /// Encrypted candidate
    pub candidate: String,
    /// Opaque call correlator
    pub session_id: String,
}

/// Key exchange handshake relayed to the peer, initiator identity attached.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyExchangeResponse {
    /// Initiator identity
    pub from: UserProfile,
    /// Initiator's public key (opaque to the relay)
    pub public_key: String,
    /// Wrapped session key material (opaque to the relay)
    pub session_key: String,
}

impl std::fmt::Debug for KeyExchangeResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyExchangeResponse")
            .field("from", &self.from.id)
            .field("public_key", &"[REDACTED]")
            .field("session_key", &"[REDACTED]")
            .finish()
    }
}

/// A signaling relay failed. Delivered to the initiator only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallError {
    /// Human-readable failure description
    pub message: String,
}

/// The connection owner's contact list changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactsUpdated {
    /// The refreshed contact list
    pub contacts: Vec<UserProfile>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> UserProfile {
        UserProfile {
            id: UserId::new(),
            email: "ada@example.com".into(),
            display_name: "Ada".into(),
            username: "ada".into(),
            avatar_url: None,
        }
    }

    #[test]
    fn hello_roundtrip() {
        let event = ClientEvent::Hello(Hello {
            version: 1,
            token: "bearer-token".into(),
        });

        let bytes = event.to_bytes().unwrap();
        let restored = ClientEvent::from_bytes(&bytes).unwrap();

        assert_eq!(event, restored);
    }

    #[test]
    fn hello_debug_redacts_token() {
        let hello = Hello {
            version: 1,
            token: "secret-bearer-token".into(),
        };
        let debug = format!("{:?}", hello);
        assert!(debug.contains("REDACTED"));
        assert!(!debug.contains("secret-bearer-token"));
    }

    #[test]
    fn send_message_roundtrip() {
        let event = ClientEvent::Message(SendMessage {
            to: "ada@example.com".into(),
            content: "hi".into(),
            kind: MessageKind::Text,
            group_id: None,
            image: None,
            audio: None,
        });

        let bytes = event.to_bytes().unwrap();
        let restored = ClientEvent::from_bytes(&bytes).unwrap();

        assert!(matches!(restored, ClientEvent::Message(_)));
    }

    #[test]
    fn group_message_carries_group_id() {
        let group = GroupId::new();
        let event = ClientEvent::Message(SendMessage {
            to: String::new(),
            content: "hello group".into(),
            kind: MessageKind::Text,
            group_id: Some(group),
            image: None,
            audio: None,
        });

        let bytes = event.to_bytes().unwrap();
        match ClientEvent::from_bytes(&bytes).unwrap() {
            ClientEvent::Message(msg) => assert_eq!(msg.group_id, Some(group)),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn populated_message_roundtrip() {
        let event = ServerEvent::Message(PopulatedMessage {
            id: MessageId::new(),
            from: profile(),
            to: Some(profile()),
            group_id: None,
            content: "hi".into(),
            kind: MessageKind::Text,
            image: None,
            audio: None,
            created_at: 1754400000000,
            read: false,
        });

        let bytes = event.to_bytes().unwrap();
        let restored = ServerEvent::from_bytes(&bytes).unwrap();

        assert_eq!(event, restored);
    }

    #[test]
    fn relayed_offer_carries_caller_identity() {
        let caller = profile();
        let event = ServerEvent::CallOffer(RelayedCallOffer {
            from: caller.clone(),
            call_type: "video".into(),
            offer: "sdp-offer".into(),
        });

        let bytes = event.to_bytes().unwrap();
        match ServerEvent::from_bytes(&bytes).unwrap() {
            ServerEvent::CallOffer(offer) => assert_eq!(offer.from, caller),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn relayed_answer_carries_no_identity() {
        let event = ServerEvent::CallAnswer(RelayedCallAnswer {
            answer: "sdp-answer".into(),
        });

        let bytes = event.to_bytes().unwrap();
        let restored = ServerEvent::from_bytes(&bytes).unwrap();

        assert_eq!(event, restored);
    }

    #[test]
    fn call_reject_has_empty_payload() {
        let bytes = ServerEvent::CallReject.to_bytes().unwrap();
        let restored = ServerEvent::from_bytes(&bytes).unwrap();
        assert_eq!(restored, ServerEvent::CallReject);
    }

    #[test]
    fn secure_variants_carry_session_id() {
        let event = ClientEvent::SecureIceCandidate(SecureIceCandidate {
            to: UserId::new(),
            candidate: "encrypted".into(),
            session_id: "call-42".into(),
        });

        let bytes = event.to_bytes().unwrap();
        match ClientEvent::from_bytes(&bytes).unwrap() {
            ClientEvent::SecureIceCandidate(c) => assert_eq!(c.session_id, "call-42"),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn key_exchange_debug_redacts_material() {
        let init = KeyExchangeInit {
            to: UserId::new(),
            public_key: "pk-material".into(),
            session_key: "sk-material".into(),
        };
        let debug = format!("{:?}", init);
        assert!(debug.contains("REDACTED"));
        assert!(!debug.contains("pk-material"));
        assert!(!debug.contains("sk-material"));
    }

    #[test]
    fn contacts_updated_roundtrip() {
        let event = ServerEvent::ContactsUpdated(ContactsUpdated {
            contacts: vec![profile(), profile()],
        });

        let bytes = event.to_bytes().unwrap();
        match ServerEvent::from_bytes(&bytes).unwrap() {
            ServerEvent::ContactsUpdated(c) => assert_eq!(c.contacts.len(), 2),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn message_kind_json_tags_are_lowercase() {
        let json = serde_json::to_string(&MessageKind::Image).unwrap();
        assert_eq!(json, "\"image\"");
    }

    #[test]
    fn malformed_bytes_fail_to_decode() {
        assert!(ClientEvent::from_bytes(&[0xFF, 0x00, 0x12]).is_err());
    }
}
