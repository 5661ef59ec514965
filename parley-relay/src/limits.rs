//! Rate limiting for connections, events, and pairing codes.
//!
//! Keyed limiters track per-node and per-connection budgets; the pairing
//! limiter is a single shared bucket because code generation is
//! unauthenticated and a per-caller key would be trivially rotated.

use crate::config::LimitsConfig;
use governor::clock::DefaultClock;
use governor::state::keyed::DefaultKeyedStateStore;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use std::fmt;
use std::num::NonZeroU32;

type KeyedLimiter<K> = RateLimiter<K, DefaultKeyedStateStore<K>, DefaultClock>;
type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// A rate limit was exceeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitError {
    /// Which limit was hit
    pub limit: &'static str,
}

impl fmt::Display for RateLimitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rate limit exceeded: {}", self.limit)
    }
}

impl std::error::Error for RateLimitError {}

/// All rate limiters for the relay, checked at admission points.
pub struct RateLimits {
    connections: KeyedLimiter<[u8; 32]>,
    events: KeyedLimiter<[u8; 16]>,
    pairings: DirectLimiter,
}

impl RateLimits {
    /// Build limiters from config. Zero values are clamped to one,
    /// governor quotas cannot be empty.
    pub fn new(config: &LimitsConfig) -> Self {
        let connections_per_minute = nonzero(config.connections_per_minute);
        let events_per_second = nonzero(config.events_per_second);
        let pairings_per_minute = nonzero(config.pairings_per_minute);

        Self {
            connections: RateLimiter::keyed(Quota::per_minute(connections_per_minute)),
            events: RateLimiter::keyed(Quota::per_second(events_per_second)),
            pairings: RateLimiter::direct(Quota::per_minute(pairings_per_minute)),
        }
    }

    /// Check whether a remote node may open a new connection.
    pub fn check_connection(&self, node_id: [u8; 32]) -> Result<(), RateLimitError> {
        self.connections.check_key(&node_id).map_err(|_| RateLimitError {
            limit: "connections per minute",
        })
    }

    /// Check whether a connection may submit another event.
    pub fn check_event(&self, connection_id: [u8; 16]) -> Result<(), RateLimitError> {
        self.events.check_key(&connection_id).map_err(|_| RateLimitError {
            limit: "events per second",
        })
    }

    /// Check whether another pairing code may be minted.
    pub fn check_pairing(&self) -> Result<(), RateLimitError> {
        self.pairings.check().map_err(|_| RateLimitError {
            limit: "pairing codes per minute",
        })
    }

    /// Drop limiter state for keys that have been idle long enough to
    /// have a full budget again. Called from the cleanup task.
    pub fn shrink(&self) {
        self.connections.retain_recent();
        self.events.retain_recent();
    }
}

impl fmt::Debug for RateLimits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimits").finish_non_exhaustive()
    }
}

fn nonzero(value: u32) -> NonZeroU32 {
    NonZeroU32::new(value.max(1)).unwrap_or(NonZeroU32::MIN)
}
