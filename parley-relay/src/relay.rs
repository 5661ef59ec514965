//! Message relay: the persist-then-publish send path.
//!
//! Every accepted message is persisted before any delivery is attempted,
//! so a crash between persist and publish loses a notification, never a
//! message. Delivery itself is fire-and-forget through the registry.

use crate::error::{RelayError, StorageError};
use crate::registry::{ChannelKey, IdentityRegistry};
use crate::storage::{NewMessage, Storage, UserRecord};
use parley_types::{PopulatedMessage, SendMessage, ServerEvent, UserId};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};

/// What happened to a send request.
#[derive(Debug, Clone)]
pub enum SendOutcome {
    /// Message persisted and dispatched to subscriber channels.
    Delivered(PopulatedMessage),
    /// Recipient has blocked the sender. Nothing was persisted and the
    /// sender is told nothing.
    Suppressed,
}

/// Persists messages and fans them out to identity channels.
pub struct MessageRelay {
    storage: Arc<dyn Storage>,
    registry: Arc<IdentityRegistry>,
}

impl MessageRelay {
    /// Create a relay over the given storage and registry.
    pub fn new(storage: Arc<dyn Storage>, registry: Arc<IdentityRegistry>) -> Self {
        Self { storage, registry }
    }

    /// Handle a send request from an authenticated sender.
    ///
    /// 1:1 messages resolve the recipient, pass the block gate, persist,
    /// auto-link first contacts, then publish to both the recipient's
    /// and the sender's user channels. Group messages persist and
    /// publish to the group channel.
    pub async fn send(
        &self,
        sender_id: UserId,
        request: SendMessage,
    ) -> Result<SendOutcome, RelayError> {
        let sender = self
            .storage
            .get_user(sender_id)
            .await?
            .ok_or_else(|| RelayError::NotFound(format!("sender {sender_id}")))?;

        match request.group_id {
            Some(group_id) => {
                let stored = self
                    .storage
                    .store_message(NewMessage {
                        sender_id,
                        recipient_id: None,
                        group_id: Some(group_id),
                        content: request.content,
                        kind: request.kind,
                        image: request.image,
                        audio: request.audio,
                    })
                    .await?;

                let populated = PopulatedMessage {
                    id: stored.id,
                    from: sender.profile(),
                    to: None,
                    group_id: Some(group_id),
                    content: stored.content,
                    kind: stored.kind,
                    image: stored.image,
                    audio: stored.audio,
                    created_at: stored.created_at,
                    read: stored.read,
                };

                let dispatched = self
                    .registry
                    .publish(ChannelKey::Group(group_id), &ServerEvent::Message(populated.clone()));
                debug!(message = %stored.id, group = %group_id, dispatched, "group message published");

                Ok(SendOutcome::Delivered(populated))
            }
            None => {
                let recipient = self.resolve_recipient(&request.to).await?;

                // Block gate runs before persist: a suppressed message
                // leaves no trace, and the sender is never told.
                if self.storage.is_blocked(recipient.id, sender.id).await? {
                    info!(sender = %sender.id, recipient = %recipient.id, "delivery suppressed by block list");
                    return Ok(SendOutcome::Suppressed);
                }

                let stored = self
                    .storage
                    .store_message(NewMessage {
                        sender_id,
                        recipient_id: Some(recipient.id),
                        group_id: None,
                        content: request.content,
                        kind: request.kind,
                        image: request.image,
                        audio: request.audio,
                    })
                    .await?;

                self.link_first_contact(&sender, &recipient).await?;

                let populated = PopulatedMessage {
                    id: stored.id,
                    from: sender.profile(),
                    to: Some(recipient.profile()),
                    group_id: None,
                    content: stored.content,
                    kind: stored.kind,
                    image: stored.image,
                    audio: stored.audio,
                    created_at: stored.created_at,
                    read: stored.read,
                };

                let event = ServerEvent::Message(populated.clone());
                self.registry.publish(ChannelKey::User(recipient.id), &event);
                // sender echo: every device of the sender sees the
                // message too
                self.registry.publish(ChannelKey::User(sender.id), &event);
                debug!(message = %stored.id, recipient = %recipient.id, "direct message published");

                Ok(SendOutcome::Delivered(populated))
            }
        }
    }

    /// Resolve a `to` field: a user id in UUID form, or an email.
    async fn resolve_recipient(&self, to: &str) -> Result<UserRecord, RelayError> {
        let found = match UserId::from_str(to) {
            Ok(id) => self.storage.get_user(id).await?,
            Err(_) => self.storage.find_user_by_email(to).await?,
        };
        found.ok_or_else(|| RelayError::NotFound(format!("recipient {to}")))
    }

    /// On first contact, link both users and push each one their
    /// refreshed contact list.
    async fn link_first_contact(
        &self,
        sender: &UserRecord,
        recipient: &UserRecord,
    ) -> Result<(), StorageError> {
        if sender.id == recipient.id {
            return Ok(());
        }

        let sender_added = self.storage.add_contact(sender.id, recipient.id).await?;
        let recipient_added = self.storage.add_contact(recipient.id, sender.id).await?;

        for (user_id, added) in [(sender.id, sender_added), (recipient.id, recipient_added)] {
            if added {
                let contacts = self
                    .storage
                    .get_contacts(user_id)
                    .await?
                    .into_iter()
                    .map(|record| record.profile())
                    .collect();
                self.registry.publish(
                    ChannelKey::User(user_id),
                    &ServerEvent::ContactsUpdated(parley_types::ContactsUpdated { contacts }),
                );
                info!(user = %user_id, "contact list updated");
            }
        }

        Ok(())
    }
}

impl std::fmt::Debug for MessageRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageRelay").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{NewUser, SqliteStorage};
    use parley_types::{GroupId, MessageKind};

    async fn setup() -> (MessageRelay, Arc<dyn Storage>, Arc<IdentityRegistry>) {
        let storage: Arc<dyn Storage> = Arc::new(SqliteStorage::in_memory().await.unwrap());
        let registry = Arc::new(IdentityRegistry::new());
        let relay = MessageRelay::new(Arc::clone(&storage), Arc::clone(&registry));
        (relay, storage, registry)
    }

    async fn make_user(storage: &Arc<dyn Storage>, email: &str, name: &str) -> UserRecord {
        storage
            .create_user(NewUser {
                email: email.to_string(),
                display_name: name.to_string(),
                username: name.to_lowercase(),
                avatar_url: None,
            })
            .await
            .unwrap()
    }

    fn text_message(to: &str) -> SendMessage {
        SendMessage {
            to: to.to_string(),
            content: "hello".to_string(),
            kind: MessageKind::Text,
            group_id: None,
            image: None,
            audio: None,
        }
    }

    #[tokio::test]
    async fn direct_send_persists_and_populates() {
        let (relay, storage, _) = setup().await;
        let alice = make_user(&storage, "alice@example.com", "Alice").await;
        let bob = make_user(&storage, "bob@example.com", "Bob").await;

        let outcome = relay
            .send(alice.id, text_message("bob@example.com"))
            .await
            .unwrap();

        let populated = match outcome {
            SendOutcome::Delivered(populated) => populated,
            SendOutcome::Suppressed => panic!("expected delivery"),
        };
        assert_eq!(populated.from.id, alice.id);
        assert_eq!(populated.to.as_ref().unwrap().id, bob.id);
        assert!(!populated.read);

        let stored = storage.get_message(populated.id).await.unwrap().unwrap();
        assert_eq!(stored.content, "hello");
        assert_eq!(stored.recipient_id, Some(bob.id));
    }

    #[tokio::test]
    async fn recipient_resolves_by_id_string_too() {
        let (relay, storage, _) = setup().await;
        let alice = make_user(&storage, "alice@example.com", "Alice").await;
        let bob = make_user(&storage, "bob@example.com", "Bob").await;

        let outcome = relay
            .send(alice.id, text_message(&bob.id.to_string()))
            .await
            .unwrap();
        assert!(matches!(outcome, SendOutcome::Delivered(_)));
    }

    #[tokio::test]
    async fn unknown_recipient_is_not_found() {
        let (relay, storage, _) = setup().await;
        let alice = make_user(&storage, "alice@example.com", "Alice").await;

        let err = relay
            .send(alice.id, text_message("ghost@example.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::NotFound(_)));
    }

    #[tokio::test]
    async fn blocked_send_is_suppressed_without_persisting() {
        let (relay, storage, _) = setup().await;
        let alice = make_user(&storage, "alice@example.com", "Alice").await;
        let bob = make_user(&storage, "bob@example.com", "Bob").await;

        storage.block_user(bob.id, alice.id).await.unwrap();

        let outcome = relay
            .send(alice.id, text_message("bob@example.com"))
            .await
            .unwrap();
        assert!(matches!(outcome, SendOutcome::Suppressed));

        // no message row, no contact link
        assert!(!storage.are_contacts(alice.id, bob.id).await.unwrap());
    }

    #[tokio::test]
    async fn block_is_directional_for_sends() {
        let (relay, storage, _) = setup().await;
        let alice = make_user(&storage, "alice@example.com", "Alice").await;
        let bob = make_user(&storage, "bob@example.com", "Bob").await;

        // bob blocked alice, but bob can still message alice
        storage.block_user(bob.id, alice.id).await.unwrap();

        let outcome = relay
            .send(bob.id, text_message("alice@example.com"))
            .await
            .unwrap();
        assert!(matches!(outcome, SendOutcome::Delivered(_)));
    }

    #[tokio::test]
    async fn first_send_links_contacts_both_ways() {
        let (relay, storage, _) = setup().await;
        let alice = make_user(&storage, "alice@example.com", "Alice").await;
        let bob = make_user(&storage, "bob@example.com", "Bob").await;

        relay
            .send(alice.id, text_message("bob@example.com"))
            .await
            .unwrap();

        assert!(storage.are_contacts(alice.id, bob.id).await.unwrap());
        assert!(storage.are_contacts(bob.id, alice.id).await.unwrap());
    }

    #[tokio::test]
    async fn repeat_sends_do_not_duplicate_contacts() {
        let (relay, storage, _) = setup().await;
        let alice = make_user(&storage, "alice@example.com", "Alice").await;
        make_user(&storage, "bob@example.com", "Bob").await;

        relay
            .send(alice.id, text_message("bob@example.com"))
            .await
            .unwrap();
        relay
            .send(alice.id, text_message("bob@example.com"))
            .await
            .unwrap();

        let contacts = storage.get_contacts(alice.id).await.unwrap();
        assert_eq!(contacts.len(), 1);
    }

    #[tokio::test]
    async fn self_send_does_not_self_link() {
        let (relay, storage, _) = setup().await;
        let alice = make_user(&storage, "alice@example.com", "Alice").await;

        relay
            .send(alice.id, text_message("alice@example.com"))
            .await
            .unwrap();

        assert!(storage.get_contacts(alice.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn group_send_skips_recipient_resolution() {
        let (relay, storage, _) = setup().await;
        let alice = make_user(&storage, "alice@example.com", "Alice").await;
        let group = GroupId::new();

        let mut request = text_message("");
        request.group_id = Some(group);

        let outcome = relay.send(alice.id, request).await.unwrap();
        let populated = match outcome {
            SendOutcome::Delivered(populated) => populated,
            SendOutcome::Suppressed => panic!("expected delivery"),
        };
        assert_eq!(populated.group_id, Some(group));
        assert!(populated.to.is_none());
    }

    #[tokio::test]
    async fn unknown_sender_is_not_found() {
        let (relay, storage, _) = setup().await;
        make_user(&storage, "bob@example.com", "Bob").await;

        let err = relay
            .send(UserId::new(), text_message("bob@example.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::NotFound(_)));
    }
}
