//! # parley-types
//!
//! Wire format types for the Parley real-time messaging protocol.
//!
//! This crate provides the foundational types used across all Parley crates:
//! - [`UserId`], [`GroupId`], [`MessageId`], [`ConnectionId`] - Identity types
//! - [`ClientEvent`] - Events a client sends over its connection
//! - [`ServerEvent`] - Events the relay delivers to clients
//! - [`ParleyError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod events;
mod ids;

pub use error::ParleyError;
pub use events::{
    Bye, CallAnswer, CallEnd, CallError, CallOffer, CallReject, ClientEvent, ContactsUpdated,
    Hello, IceCandidate, Join, KeyExchangeInit, KeyExchangeResponse, MessageError, MessageKind,
    PopulatedMessage, RelayedCallAnswer, RelayedCallOffer, RelayedIceCandidate,
    RelayedSecureCallAnswer, RelayedSecureCallOffer, RelayedSecureIceCandidate, SecureCallAnswer,
    SecureCallOffer, SecureIceCandidate, SendMessage, ServerEvent, UserProfile, Welcome,
};
pub use ids::{ConnectionId, GroupId, MessageId, UserId};
