//! # parley-relay
//!
//! Relay server for the Parley messaging protocol.
//!
//! This crate implements a relay that:
//! - Accepts iroh QUIC connections from Parley clients
//! - Routes messages between identities, with block lists enforced
//!   before anything is persisted or delivered
//! - Forwards call-signaling events without inspecting or ordering them
//! - Pairs new devices over a short-lived QR code flow
//!
//! ## Architecture
//!
//! ```text
//! Client A ──┐                    ┌── Client B
//!            │    iroh QUIC       │
//!            ├───────────────────►│
//!            │                    │
//!        ┌───┴────────────────────┴───┐
//!        │       parley-relay         │
//!        │  ┌──────────┐ ┌─────────┐  │
//!        │  │  SQLite  │ │  HTTP   │◄─┼── new device (QR pairing)
//!        │  │ messages │ │ sidecar │  │
//!        │  └──────────┘ └─────────┘  │
//!        └────────────────────────────┘
//! ```
//!
//! ## Protocol
//!
//! The relay uses ALPN `/parley/1`. A connection opens with a
//! bidirectional hello/welcome handshake, then every subsequent event
//! travels on its own unidirectional stream as a length-prefixed
//! MessagePack frame.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod auth;
pub mod cleanup;
pub mod config;
pub mod error;
pub mod http;
pub mod limits;
pub mod pairing;
pub mod protocol;
pub mod registry;
pub mod relay;
pub mod server;
pub mod session;
pub mod signaling;
pub mod storage;
