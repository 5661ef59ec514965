//! Identity registry: tracks live connections and the identity channels
//! they subscribe to, and fans events out to subscribers.
//!
//! Every authenticated connection subscribes to its user channel; joining
//! a group adds a group channel subscription. Publishing is fire-and-forget:
//! each delivery runs on its own task and a failed or slow subscriber never
//! blocks the publisher or other subscribers.

use dashmap::DashMap;
use iroh::endpoint::Connection;
use parley_types::{ConnectionId, GroupId, ServerEvent, UserId};
use std::collections::HashSet;
use std::fmt;
use tracing::{debug, warn};

/// An identity channel events can be published to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKey {
    /// All live connections belonging to one user (all their devices)
    User(UserId),
    /// All live connections of members who joined a group
    Group(GroupId),
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelKey::User(id) => write!(f, "user:{id}"),
            ChannelKey::Group(id) => write!(f, "group:{id}"),
        }
    }
}

/// Connection and subscription state for the relay.
#[derive(Default)]
pub struct IdentityRegistry {
    connections: DashMap<ConnectionId, Connection>,
    subscribers: DashMap<ChannelKey, HashSet<ConnectionId>>,
    memberships: DashMap<ConnectionId, HashSet<ChannelKey>>,
}

impl IdentityRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a live connection so it can receive deliveries.
    pub fn register(&self, id: ConnectionId, connection: Connection) {
        self.connections.insert(id, connection);
        self.memberships.entry(id).or_default();
    }

    /// Subscribe a registered connection to a channel.
    ///
    /// No-op for unknown connections, a subscription without a live
    /// handle could never be delivered to.
    pub fn subscribe(&self, id: ConnectionId, key: ChannelKey) {
        if !self.connections.contains_key(&id) {
            debug!(connection = %id, channel = %key, "subscribe for unknown connection ignored");
            return;
        }
        self.subscribers.entry(key).or_default().insert(id);
        self.memberships.entry(id).or_default().insert(key);
    }

    /// Drop a connection and every subscription it holds.
    pub fn unregister(&self, id: ConnectionId) {
        self.connections.remove(&id);
        let keys = self
            .memberships
            .remove(&id)
            .map(|(_, keys)| keys)
            .unwrap_or_default();
        for key in keys {
            if let Some(mut subs) = self.subscribers.get_mut(&key) {
                subs.remove(&id);
            }
            self.subscribers.remove_if(&key, |_, subs| subs.is_empty());
        }
    }

    /// Publish an event to every subscriber of a channel.
    ///
    /// Returns the number of connections the event was dispatched to.
    /// Dispatch is fire-and-forget, a count of n means n delivery tasks
    /// were spawned, not that n clients received the bytes.
    pub fn publish(&self, key: ChannelKey, event: &ServerEvent) -> usize {
        let bytes = match event.to_bytes() {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(channel = %key, error = %err, "failed to encode event for publish");
                return 0;
            }
        };

        let targets: Vec<ConnectionId> = match self.subscribers.get(&key) {
            Some(subs) => subs.iter().copied().collect(),
            None => return 0,
        };

        let mut dispatched = 0;
        for id in targets {
            if let Some(connection) = self.connections.get(&id) {
                spawn_delivery(id, connection.clone(), bytes.clone());
                dispatched += 1;
            }
        }
        dispatched
    }

    /// Send an event to one specific connection.
    ///
    /// Returns true if the connection was known and a delivery task was
    /// spawned.
    pub fn send_to_connection(&self, id: ConnectionId, event: &ServerEvent) -> bool {
        let bytes = match event.to_bytes() {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(connection = %id, error = %err, "failed to encode event for send");
                return false;
            }
        };
        match self.connections.get(&id) {
            Some(connection) => {
                spawn_delivery(id, connection.clone(), bytes);
                true
            }
            None => false,
        }
    }

    /// Number of live registered connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Number of channels with at least one subscriber.
    pub fn channel_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Number of subscribers on a channel.
    pub fn subscriber_count(&self, key: ChannelKey) -> usize {
        self.subscribers.get(&key).map(|subs| subs.len()).unwrap_or(0)
    }

    /// Whether a channel currently has any subscribers.
    pub fn has_subscribers(&self, key: ChannelKey) -> bool {
        self.subscriber_count(key) > 0
    }
}

impl fmt::Debug for IdentityRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityRegistry")
            .field("connections", &self.connections.len())
            .field("channels", &self.subscribers.len())
            .finish_non_exhaustive()
    }
}

fn spawn_delivery(id: ConnectionId, connection: Connection, bytes: Vec<u8>) {
    tokio::spawn(async move {
        if let Err(err) = deliver(&connection, &bytes).await {
            debug!(connection = %id, error = %err, "delivery failed");
        }
    });
}

async fn deliver(connection: &Connection, bytes: &[u8]) -> anyhow::Result<()> {
    let mut stream = connection.open_uni().await?;
    let len = bytes.len() as u32;
    stream.write_all(&len.to_be_bytes()).await?;
    stream.write_all(bytes).await?;
    stream.finish()?;
    // wait for the peer to acknowledge before dropping the stream
    stream.stopped().await.ok();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // Subscription bookkeeping is testable without live QUIC connections:
    // subscribe refuses unknown connections, so these tests exercise the
    // channel index directly.

    #[test]
    fn subscribe_unknown_connection_is_ignored() {
        let registry = IdentityRegistry::new();
        let id = ConnectionId::random();
        registry.subscribe(id, ChannelKey::User(UserId::new()));
        assert_eq!(registry.connection_count(), 0);
        assert_eq!(registry.subscriber_count(ChannelKey::User(UserId::new())), 0);
    }

    #[test]
    fn publish_to_empty_channel_dispatches_nothing() {
        let registry = IdentityRegistry::new();
        let event = ServerEvent::CallEnd;
        assert_eq!(registry.publish(ChannelKey::User(UserId::new()), &event), 0);
    }

    #[test]
    fn unregister_unknown_connection_is_harmless() {
        let registry = IdentityRegistry::new();
        registry.unregister(ConnectionId::random());
        assert_eq!(registry.connection_count(), 0);
    }

    #[test]
    fn send_to_unknown_connection_returns_false() {
        let registry = IdentityRegistry::new();
        assert!(!registry.send_to_connection(ConnectionId::random(), &ServerEvent::CallEnd));
    }

    #[test]
    fn channel_key_display() {
        let user = UserId::new();
        let key = ChannelKey::User(user);
        assert_eq!(key.to_string(), format!("user:{user}"));
    }

    #[test]
    fn has_subscribers_false_for_empty() {
        let registry = IdentityRegistry::new();
        assert!(!registry.has_subscribers(ChannelKey::Group(GroupId::new())));
    }
}
