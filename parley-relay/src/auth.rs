//! Credential verification and minting.
//!
//! The relay does not own accounts or passwords. It verifies bearer
//! credentials through the [`Credentials`] collaborator and mints fresh
//! ones during QR pairing. Production deployments supply their own
//! implementation, [`DevCredentials`] backs tests and local runs.

use async_trait::async_trait;
use dashmap::DashMap;
use parley_types::UserId;
use rand::RngCore;
use std::fmt;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Default credential lifetime for [`DevCredentials`].
const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Errors from credential operations.
#[derive(Debug, Error)]
pub enum CredentialError {
    /// Token is unknown or malformed
    #[error("invalid credential")]
    Invalid,

    /// Token was valid once but its lifetime elapsed
    #[error("expired credential")]
    Expired,

    /// The backing credential service failed
    #[error("credential backend error: {0}")]
    Backend(String),
}

/// Verifies and mints bearer credentials.
#[async_trait]
pub trait Credentials: Send + Sync {
    /// Resolve a bearer token to the user it authenticates.
    async fn verify(&self, token: &str) -> Result<UserId, CredentialError>;

    /// Mint a fresh token for a user. Used when pairing hands a
    /// credential to a new device.
    async fn mint(&self, user_id: UserId) -> Result<String, CredentialError>;
}

struct IssuedToken {
    user_id: UserId,
    issued_at: Instant,
}

/// In-memory credential store for tests and local development.
pub struct DevCredentials {
    tokens: DashMap<String, IssuedToken>,
    ttl: Duration,
}

impl DevCredentials {
    /// Create a store with the default seven-day token lifetime.
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_TOKEN_TTL)
    }

    /// Create a store with a custom token lifetime.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            tokens: DashMap::new(),
            ttl,
        }
    }

    /// Insert a known token directly. Test setup helper.
    pub fn issue(&self, token: &str, user_id: UserId) {
        self.tokens.insert(
            token.to_string(),
            IssuedToken {
                user_id,
                issued_at: Instant::now(),
            },
        );
    }
}

impl Default for DevCredentials {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DevCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DevCredentials")
            .field("tokens", &self.tokens.len())
            .field("ttl", &self.ttl)
            .finish()
    }
}

#[async_trait]
impl Credentials for DevCredentials {
    async fn verify(&self, token: &str) -> Result<UserId, CredentialError> {
        let expired = match self.tokens.get(token) {
            Some(issued) => {
                if issued.issued_at.elapsed() <= self.ttl {
                    return Ok(issued.user_id);
                }
                true
            }
            None => false,
        };
        if expired {
            self.tokens.remove(token);
            return Err(CredentialError::Expired);
        }
        Err(CredentialError::Invalid)
    }

    async fn mint(&self, user_id: UserId) -> Result<String, CredentialError> {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        let token = hex::encode(bytes);
        self.tokens.insert(
            token.clone(),
            IssuedToken {
                user_id,
                issued_at: Instant::now(),
            },
        );
        Ok(token)
    }
}
