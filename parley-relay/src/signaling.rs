//! Call signaling relay.
//!
//! Forwards WebRTC negotiation events between users without tracking
//! call state. The relay validates nothing about ordering: an answer
//! with no preceding offer is forwarded as-is, peers own the call
//! state machine.
//!
//! Sender identity is attached only where the receiving client needs to
//! know who is initiating: plain and secure offers, and key exchange.
//! Answers, candidates, rejects, and hangups are forwarded bare.

use crate::error::RelayError;
use crate::registry::{ChannelKey, IdentityRegistry};
use crate::storage::Storage;
use parley_types::{
    ClientEvent, KeyExchangeResponse, RelayedCallAnswer, RelayedCallOffer, RelayedIceCandidate,
    RelayedSecureCallAnswer, RelayedSecureCallOffer, RelayedSecureIceCandidate, ServerEvent,
    UserId, UserProfile,
};
use std::sync::Arc;
use tracing::{debug, info};

/// Stateless forwarder for call negotiation events.
pub struct SignalingRelay {
    storage: Arc<dyn Storage>,
    registry: Arc<IdentityRegistry>,
}

impl SignalingRelay {
    /// Create a signaling relay over the given storage and registry.
    pub fn new(storage: Arc<dyn Storage>, registry: Arc<IdentityRegistry>) -> Self {
        Self { storage, registry }
    }

    /// Forward one signaling event from an authenticated sender.
    ///
    /// Initiating kinds pass the recipient's block gate silently, a
    /// blocked caller observes the same nothing an offline callee
    /// produces. Errors returned here are reported to the sender only.
    pub async fn relay(&self, sender_id: UserId, event: ClientEvent) -> Result<(), RelayError> {
        match event {
            ClientEvent::CallOffer(offer) => {
                let Some(from) = self.initiator_profile(sender_id, offer.to).await? else {
                    return Ok(());
                };
                self.forward(
                    offer.to,
                    ServerEvent::CallOffer(RelayedCallOffer {
                        from,
                        call_type: offer.call_type,
                        offer: offer.offer,
                    }),
                );
                Ok(())
            }
            ClientEvent::CallAnswer(answer) => {
                self.forward(
                    answer.to,
                    ServerEvent::CallAnswer(RelayedCallAnswer {
                        answer: answer.answer,
                    }),
                );
                Ok(())
            }
            ClientEvent::CallReject(reject) => {
                self.forward(reject.to, ServerEvent::CallReject);
                Ok(())
            }
            ClientEvent::CallEnd(end) => {
                self.forward(end.to, ServerEvent::CallEnd);
                Ok(())
            }
            ClientEvent::IceCandidate(candidate) => {
                self.forward(
                    candidate.to,
                    ServerEvent::IceCandidate(RelayedIceCandidate {
                        candidate: candidate.candidate,
                    }),
                );
                Ok(())
            }
            ClientEvent::SecureCallOffer(offer) => {
                let Some(from) = self.initiator_profile(sender_id, offer.to).await? else {
                    return Ok(());
                };
                self.forward(
                    offer.to,
                    ServerEvent::SecureCallOffer(RelayedSecureCallOffer {
                        from,
                        call_type: offer.call_type,
                        offer: offer.offer,
                        session_id: offer.session_id,
                    }),
                );
                Ok(())
            }
            ClientEvent::SecureCallAnswer(answer) => {
                self.forward(
                    answer.to,
                    ServerEvent::SecureCallAnswer(RelayedSecureCallAnswer {
                        answer: answer.answer,
                        session_id: answer.session_id,
                    }),
                );
                Ok(())
            }
            ClientEvent::SecureIceCandidate(candidate) => {
                self.forward(
                    candidate.to,
                    ServerEvent::SecureIceCandidate(RelayedSecureIceCandidate {
                        candidate: candidate.candidate,
                        session_id: candidate.session_id,
                    }),
                );
                Ok(())
            }
            ClientEvent::KeyExchangeInit(init) => {
                let Some(from) = self.initiator_profile(sender_id, init.to).await? else {
                    return Ok(());
                };
                self.forward(
                    init.to,
                    ServerEvent::KeyExchangeResponse(KeyExchangeResponse {
                        from,
                        public_key: init.public_key,
                        session_key: init.session_key,
                    }),
                );
                Ok(())
            }
            other => Err(RelayError::Signaling(format!(
                "not a signaling event: {other:?}"
            ))),
        }
    }

    /// Look up the sender's public profile for an initiating event,
    /// or None when the callee's block gate suppresses it.
    async fn initiator_profile(
        &self,
        sender_id: UserId,
        target: UserId,
    ) -> Result<Option<UserProfile>, RelayError> {
        if self.storage.is_blocked(target, sender_id).await? {
            info!(sender = %sender_id, target = %target, "signal suppressed by block list");
            return Ok(None);
        }
        let sender = self
            .storage
            .get_user(sender_id)
            .await?
            .ok_or_else(|| RelayError::NotFound(format!("sender {sender_id}")))?;
        Ok(Some(sender.profile()))
    }

    fn forward(&self, target: UserId, event: ServerEvent) {
        let dispatched = self.registry.publish(ChannelKey::User(target), &event);
        debug!(target = %target, dispatched, "signal forwarded");
    }
}

impl std::fmt::Debug for SignalingRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalingRelay").finish_non_exhaustive()
    }
}
