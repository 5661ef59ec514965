//! QR pairing: short-lived codes that let a logged-in device hand a
//! credential to a new device.
//!
//! Lifecycle: a new device generates a code (Pending), a logged-in device
//! scans and approves it (Confirmed), the new device polls and consumes
//! the credential exactly once. Codes expire after a configurable TTL,
//! enforced both lazily on access and by a periodic sweep.
//!
//! All transitions run under the table's shard lock, so a code observed
//! Pending cannot be approved twice and a Confirmed code cannot be
//! consumed twice, regardless of interleaving.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parley_types::UserId;
use rand::RngCore;
use std::fmt;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Length of a pairing code in raw bytes (displayed as hex, twice this).
const CODE_BYTES: usize = 32;

/// A freshly generated pairing code, ready to render as a QR payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedPairing {
    /// 64-character lowercase hex code
    pub code: String,
    /// Wall-clock expiry, milliseconds since the Unix epoch
    pub expires_at: u64,
}

/// Result of an approval attempt by a logged-in device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApproveOutcome {
    /// The code was Pending and is now Confirmed
    Approved,
    /// The code existed but its TTL had elapsed
    Expired,
    /// The code is unknown or was already approved or consumed
    Invalid,
}

/// Result of a poll by the device that generated the code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Not yet approved, keep polling
    Pending,
    /// Approved. The credential is handed over and the code is consumed.
    Confirmed {
        /// User the new device now acts as
        user_id: UserId,
        /// Credential minted for the new device
        token: String,
    },
    /// The code's TTL elapsed before approval or consumption
    Expired,
    /// The code is unknown or was already consumed
    Invalid,
}

enum PairingState {
    Pending,
    Confirmed { user_id: UserId, token: String },
}

struct PairingEntry {
    state: PairingState,
    created_at: Instant,
}

impl PairingEntry {
    fn expired(&self, ttl: Duration) -> bool {
        self.created_at.elapsed() > ttl
    }
}

/// In-memory table of pairing codes.
pub struct PairingTable {
    entries: DashMap<String, PairingEntry>,
    ttl: Duration,
}

impl PairingTable {
    /// Create a table whose codes expire after `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Mint a new Pending code.
    pub fn generate(&self) -> GeneratedPairing {
        let mut bytes = [0u8; CODE_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        let code = hex::encode(bytes);

        self.entries.insert(
            code.clone(),
            PairingEntry {
                state: PairingState::Pending,
                created_at: Instant::now(),
            },
        );

        let expires_at = SystemTime::now() + self.ttl;
        let expires_at = expires_at
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;

        GeneratedPairing { code, expires_at }
    }

    /// Approve a Pending code, binding it to a user and credential.
    ///
    /// Exactly one concurrent approval can succeed, later attempts see
    /// Invalid.
    pub fn approve(&self, code: &str, user_id: UserId, token: String) -> ApproveOutcome {
        match self.entries.entry(code.to_string()) {
            Entry::Occupied(mut entry) => {
                if entry.get().expired(self.ttl) {
                    entry.remove();
                    return ApproveOutcome::Expired;
                }
                match entry.get().state {
                    PairingState::Pending => {
                        entry.get_mut().state = PairingState::Confirmed { user_id, token };
                        ApproveOutcome::Approved
                    }
                    PairingState::Confirmed { .. } => ApproveOutcome::Invalid,
                }
            }
            Entry::Vacant(_) => ApproveOutcome::Invalid,
        }
    }

    /// Poll a code. Consumes it if Confirmed.
    ///
    /// Exactly one concurrent poll can observe Confirmed, the entry is
    /// removed under the same lock that reads it.
    pub fn poll(&self, code: &str) -> PollOutcome {
        match self.entries.entry(code.to_string()) {
            Entry::Occupied(entry) => {
                if entry.get().expired(self.ttl) {
                    entry.remove();
                    return PollOutcome::Expired;
                }
                match entry.get().state {
                    PairingState::Pending => PollOutcome::Pending,
                    PairingState::Confirmed { .. } => {
                        let removed = entry.remove();
                        match removed.state {
                            PairingState::Confirmed { user_id, token } => {
                                PollOutcome::Confirmed { user_id, token }
                            }
                            PairingState::Pending => unreachable!("state checked under lock"),
                        }
                    }
                }
            }
            Entry::Vacant(_) => PollOutcome::Invalid,
        }
    }

    /// Remove all expired codes. Returns how many were dropped.
    pub fn sweep(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.expired(self.ttl));
        before.saturating_sub(self.entries.len())
    }

    /// Number of codes currently tracked, including expired ones not
    /// yet swept.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for PairingTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PairingTable")
            .field("entries", &self.entries.len())
            .field("ttl", &self.ttl)
            .finish()
    }
}
