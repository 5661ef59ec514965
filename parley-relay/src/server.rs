//! Relay server state.
//!
//! [`ParleyRelay`] aggregates the collaborators every connection and
//! HTTP handler works through: storage, credentials, the identity
//! registry, the message and signaling relays, the pairing table, and
//! rate limits. One instance lives for the whole process behind an
//! `Arc`.

use crate::auth::Credentials;
use crate::config::Config;
use crate::error::{ProtocolError, RelayError};
use crate::limits::RateLimits;
use crate::pairing::{ApproveOutcome, GeneratedPairing, PairingTable, PollOutcome};
use crate::registry::IdentityRegistry;
use crate::relay::{MessageRelay, SendOutcome};
use crate::signaling::SignalingRelay;
use crate::storage::{Storage, UserRecord};
use parley_types::{ClientEvent, SendMessage, UserId, UserProfile};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Counters exposed on the metrics endpoint.
#[derive(Debug, Default)]
pub struct RelayMetrics {
    /// Connections accepted since startup.
    pub connections_total: AtomicU64,
    /// Messages accepted for delivery.
    pub messages_total: AtomicU64,
    /// Messages suppressed by a block list.
    pub messages_suppressed_total: AtomicU64,
    /// Signaling events forwarded.
    pub signals_total: AtomicU64,
    /// Pairing codes generated.
    pub pairing_generated_total: AtomicU64,
    /// Pairing codes approved.
    pub pairing_confirmed_total: AtomicU64,
    /// Pairing credentials consumed.
    pub pairing_consumed_total: AtomicU64,
    /// Pairing codes dropped by expiry.
    pub pairing_expired_total: AtomicU64,
    /// Failed credential verifications.
    pub auth_failures_total: AtomicU64,
    /// Requests refused by a rate limit.
    pub rate_limit_hits: AtomicU64,
    /// Errors surfaced to clients.
    pub errors_total: AtomicU64,
}

impl RelayMetrics {
    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }
}

/// Result of polling a pairing code, with the credential resolved.
#[derive(Debug, Clone)]
pub enum PairingPoll {
    /// Not yet approved.
    Pending,
    /// Approved and now consumed.
    Confirmed {
        /// Credential minted for the new device.
        token: String,
        /// The account the new device now acts as.
        user: UserProfile,
    },
    /// The code expired before approval or consumption.
    Expired,
    /// The code is unknown or was already consumed.
    Invalid,
}

/// Shared state for the relay server.
pub struct ParleyRelay {
    config: Config,
    storage: Arc<dyn Storage>,
    credentials: Arc<dyn Credentials>,
    registry: Arc<IdentityRegistry>,
    messages: MessageRelay,
    signaling: SignalingRelay,
    pairing: PairingTable,
    limits: RateLimits,
    metrics: RelayMetrics,
}

impl ParleyRelay {
    /// Build the server state from config and collaborators.
    pub fn new(
        config: Config,
        storage: Arc<dyn Storage>,
        credentials: Arc<dyn Credentials>,
    ) -> Self {
        let registry = Arc::new(IdentityRegistry::new());
        let messages = MessageRelay::new(Arc::clone(&storage), Arc::clone(&registry));
        let signaling = SignalingRelay::new(Arc::clone(&storage), Arc::clone(&registry));
        let pairing = PairingTable::new(Duration::from_secs(config.pairing.ttl_secs));
        let limits = RateLimits::new(&config.limits);

        Self {
            config,
            storage,
            credentials,
            registry,
            messages,
            signaling,
            pairing,
            limits,
            metrics: RelayMetrics::default(),
        }
    }

    /// Server configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Storage backend.
    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Connection and channel registry.
    pub fn registry(&self) -> &Arc<IdentityRegistry> {
        &self.registry
    }

    /// Pairing code table.
    pub fn pairing(&self) -> &PairingTable {
        &self.pairing
    }

    /// Rate limiters.
    pub fn limits(&self) -> &RateLimits {
        &self.limits
    }

    /// Metric counters.
    pub fn metrics(&self) -> &RelayMetrics {
        &self.metrics
    }

    /// Resolve a bearer token to the full user record.
    pub async fn authenticate(&self, token: &str) -> Result<UserRecord, ProtocolError> {
        let user_id = match self.credentials.verify(token).await {
            Ok(user_id) => user_id,
            Err(err) => {
                RelayMetrics::incr(&self.metrics.auth_failures_total);
                info!(error = %err, "credential rejected");
                return Err(ProtocolError::AuthenticationFailed);
            }
        };
        match self.storage.get_user(user_id).await {
            Ok(Some(user)) => Ok(user),
            Ok(None) => {
                RelayMetrics::incr(&self.metrics.auth_failures_total);
                warn!(user = %user_id, "credential for unknown user");
                Err(ProtocolError::AuthenticationFailed)
            }
            Err(err) => Err(ProtocolError::Internal(err.to_string())),
        }
    }

    /// Accept a message send from an authenticated sender.
    pub async fn handle_send(
        &self,
        sender: UserId,
        request: SendMessage,
    ) -> Result<SendOutcome, RelayError> {
        let outcome = self.messages.send(sender, request).await?;
        match &outcome {
            SendOutcome::Delivered(_) => RelayMetrics::incr(&self.metrics.messages_total),
            SendOutcome::Suppressed => {
                RelayMetrics::incr(&self.metrics.messages_suppressed_total)
            }
        }
        Ok(outcome)
    }

    /// Forward a signaling event from an authenticated sender.
    pub async fn handle_signal(
        &self,
        sender: UserId,
        event: ClientEvent,
    ) -> Result<(), RelayError> {
        self.signaling.relay(sender, event).await?;
        RelayMetrics::incr(&self.metrics.signals_total);
        Ok(())
    }

    /// Mint a new pairing code.
    pub fn generate_pairing(&self) -> Result<GeneratedPairing, RelayError> {
        if let Err(err) = self.limits.check_pairing() {
            RelayMetrics::incr(&self.metrics.rate_limit_hits);
            return Err(RelayError::RateLimited(err.to_string()));
        }
        let pairing = self.pairing.generate();
        RelayMetrics::incr(&self.metrics.pairing_generated_total);
        Ok(pairing)
    }

    /// Approve a pairing code on behalf of a logged-in user.
    ///
    /// The credential is minted before the table transition so no lock
    /// is held across the mint. If the transition loses, the minted
    /// token is simply never handed out and ages away.
    pub async fn approve_pairing(
        &self,
        code: &str,
        user_id: UserId,
    ) -> Result<ApproveOutcome, RelayError> {
        let token = self
            .credentials
            .mint(user_id)
            .await
            .map_err(RelayError::Auth)?;
        let outcome = self.pairing.approve(code, user_id, token);
        match outcome {
            ApproveOutcome::Approved => {
                RelayMetrics::incr(&self.metrics.pairing_confirmed_total);
                info!(user = %user_id, "pairing approved");
            }
            ApproveOutcome::Expired => RelayMetrics::incr(&self.metrics.pairing_expired_total),
            ApproveOutcome::Invalid => {}
        }
        Ok(outcome)
    }

    /// Poll a pairing code, consuming the credential if confirmed.
    pub async fn poll_pairing(&self, code: &str) -> Result<PairingPoll, RelayError> {
        match self.pairing.poll(code) {
            PollOutcome::Pending => Ok(PairingPoll::Pending),
            PollOutcome::Expired => {
                RelayMetrics::incr(&self.metrics.pairing_expired_total);
                Ok(PairingPoll::Expired)
            }
            PollOutcome::Invalid => Ok(PairingPoll::Invalid),
            PollOutcome::Confirmed { user_id, token } => {
                let user = self
                    .storage
                    .get_user(user_id)
                    .await?
                    .ok_or_else(|| RelayError::NotFound(format!("user {user_id}")))?;
                RelayMetrics::incr(&self.metrics.pairing_consumed_total);
                info!(user = %user_id, "pairing credential consumed");
                Ok(PairingPoll::Confirmed {
                    token,
                    user: user.profile(),
                })
            }
        }
    }
}

impl fmt::Debug for ParleyRelay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParleyRelay")
            .field("connections", &self.registry.connection_count())
            .field("pairing_codes", &self.pairing.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::DevCredentials;
    use crate::storage::{NewUser, SqliteStorage};
    use parley_types::MessageKind;

    pub(crate) async fn test_relay() -> (Arc<ParleyRelay>, Arc<DevCredentials>) {
        let storage: Arc<dyn Storage> = Arc::new(SqliteStorage::in_memory().await.unwrap());
        let credentials = Arc::new(DevCredentials::new());
        let relay = ParleyRelay::new(
            Config::default(),
            storage,
            Arc::clone(&credentials) as Arc<dyn Credentials>,
        );
        (Arc::new(relay), credentials)
    }

    async fn make_user(relay: &ParleyRelay, email: &str) -> UserRecord {
        relay
            .storage()
            .create_user(NewUser {
                email: email.to_string(),
                display_name: "User".to_string(),
                username: "user".to_string(),
                avatar_url: None,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn authenticate_resolves_known_token() {
        let (relay, credentials) = test_relay().await;
        let user = make_user(&relay, "alice@example.com").await;
        credentials.issue("tok", user.id);

        let resolved = relay.authenticate("tok").await.unwrap();
        assert_eq!(resolved.id, user.id);
    }

    #[tokio::test]
    async fn authenticate_rejects_unknown_token() {
        let (relay, _) = test_relay().await;
        let err = relay.authenticate("bogus").await.unwrap_err();
        assert!(matches!(err, ProtocolError::AuthenticationFailed));
        assert_eq!(
            relay.metrics().auth_failures_total.load(Ordering::Relaxed),
            1
        );
    }

    #[tokio::test]
    async fn authenticate_rejects_token_for_missing_user() {
        let (relay, credentials) = test_relay().await;
        credentials.issue("tok", UserId::new());

        let err = relay.authenticate("tok").await.unwrap_err();
        assert!(matches!(err, ProtocolError::AuthenticationFailed));
    }

    #[tokio::test]
    async fn send_updates_metrics() {
        let (relay, _) = test_relay().await;
        let alice = make_user(&relay, "alice@example.com").await;
        let bob = make_user(&relay, "bob@example.com").await;

        relay
            .storage()
            .block_user(bob.id, alice.id)
            .await
            .unwrap();

        let request = SendMessage {
            to: "bob@example.com".to_string(),
            content: "hi".to_string(),
            kind: MessageKind::Text,
            group_id: None,
            image: None,
            audio: None,
        };
        relay.handle_send(alice.id, request.clone()).await.unwrap();
        assert_eq!(
            relay
                .metrics()
                .messages_suppressed_total
                .load(Ordering::Relaxed),
            1
        );

        relay.storage().unblock_user(bob.id, alice.id).await.unwrap();
        relay.handle_send(alice.id, request).await.unwrap();
        assert_eq!(relay.metrics().messages_total.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn pairing_roundtrip_through_server() {
        let (relay, _) = test_relay().await;
        let alice = make_user(&relay, "alice@example.com").await;

        let pairing = relay.generate_pairing().unwrap();
        assert!(matches!(
            relay.poll_pairing(&pairing.code).await.unwrap(),
            PairingPoll::Pending
        ));

        let outcome = relay.approve_pairing(&pairing.code, alice.id).await.unwrap();
        assert_eq!(outcome, ApproveOutcome::Approved);

        let poll = relay.poll_pairing(&pairing.code).await.unwrap();
        let token = match poll {
            PairingPoll::Confirmed { token, user } => {
                assert_eq!(user.id, alice.id);
                token
            }
            other => panic!("expected Confirmed, got {other:?}"),
        };

        // the minted credential authenticates as alice
        let resolved = relay.authenticate(&token).await.unwrap();
        assert_eq!(resolved.id, alice.id);

        // consumed: a second poll finds nothing
        assert!(matches!(
            relay.poll_pairing(&pairing.code).await.unwrap(),
            PairingPoll::Invalid
        ));
    }

    #[tokio::test]
    async fn approve_unknown_code_is_invalid() {
        let (relay, _) = test_relay().await;
        let alice = make_user(&relay, "alice@example.com").await;
        let outcome = relay.approve_pairing("deadbeef", alice.id).await.unwrap();
        assert_eq!(outcome, ApproveOutcome::Invalid);
        assert_eq!(
            relay
                .metrics()
                .pairing_confirmed_total
                .load(Ordering::Relaxed),
            0
        );
    }
}
