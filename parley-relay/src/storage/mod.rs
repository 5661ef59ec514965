//! Storage layer for the relay.
//!
//! Holds user records, persisted messages, contact links, and block
//! lists. The relay persists every accepted message before publishing
//! it, so delivery to offline devices can be recovered from here.

mod sqlite;

pub use sqlite::SqliteStorage;

use crate::error::StorageError;
use async_trait::async_trait;
use parley_types::{GroupId, MessageId, MessageKind, UserId, UserProfile};

/// A user account as stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    /// Account identifier.
    pub id: UserId,
    /// Login email, unique per account, compared case-insensitively.
    pub email: String,
    /// Name shown to other users.
    pub display_name: String,
    /// Short handle.
    pub username: String,
    /// Optional avatar URL.
    pub avatar_url: Option<String>,
    /// Unix timestamp in milliseconds when the account was created.
    pub created_at: u64,
}

impl UserRecord {
    /// The public shape of this user, safe to send to other users.
    pub fn profile(&self) -> UserProfile {
        UserProfile {
            id: self.id,
            email: self.email.clone(),
            display_name: self.display_name.clone(),
            username: self.username.clone(),
            avatar_url: self.avatar_url.clone(),
        }
    }
}

/// Request to create a user account.
#[derive(Debug, Clone)]
pub struct NewUser {
    /// Login email.
    pub email: String,
    /// Name shown to other users.
    pub display_name: String,
    /// Short handle.
    pub username: String,
    /// Optional avatar URL.
    pub avatar_url: Option<String>,
}

/// Request to persist a message. Exactly one of `recipient_id` and
/// `group_id` must be set.
#[derive(Debug, Clone)]
pub struct NewMessage {
    /// Sending user.
    pub sender_id: UserId,
    /// Target user for a 1:1 message.
    pub recipient_id: Option<UserId>,
    /// Target group for a group message.
    pub group_id: Option<GroupId>,
    /// Message text.
    pub content: String,
    /// Payload kind.
    pub kind: MessageKind,
    /// Optional image attachment reference.
    pub image: Option<String>,
    /// Optional audio attachment reference.
    pub audio: Option<String>,
}

/// A message as persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    /// Identifier assigned at persistence.
    pub id: MessageId,
    /// Sending user.
    pub sender_id: UserId,
    /// Target user for a 1:1 message.
    pub recipient_id: Option<UserId>,
    /// Target group for a group message.
    pub group_id: Option<GroupId>,
    /// Message text.
    pub content: String,
    /// Payload kind.
    pub kind: MessageKind,
    /// Optional image attachment reference.
    pub image: Option<String>,
    /// Optional audio attachment reference.
    pub audio: Option<String>,
    /// Unix timestamp in milliseconds when the message was persisted.
    pub created_at: u64,
    /// Whether the recipient has read the message.
    pub read: bool,
}

/// Trait for relay storage backends.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Create a user account.
    async fn create_user(&self, user: NewUser) -> Result<UserRecord, StorageError>;

    /// Look up a user by id.
    async fn get_user(&self, id: UserId) -> Result<Option<UserRecord>, StorageError>;

    /// Look up a user by email, case-insensitively.
    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserRecord>, StorageError>;

    /// Persist a message and assign it an id and timestamp.
    async fn store_message(&self, message: NewMessage) -> Result<StoredMessage, StorageError>;

    /// Look up a persisted message by id.
    async fn get_message(&self, id: MessageId) -> Result<Option<StoredMessage>, StorageError>;

    /// Whether `blocker` has blocked `blocked`.
    async fn is_blocked(&self, blocker: UserId, blocked: UserId) -> Result<bool, StorageError>;

    /// Add `blocked` to `blocker`'s block list. Idempotent.
    async fn block_user(&self, blocker: UserId, blocked: UserId) -> Result<(), StorageError>;

    /// Remove `blocked` from `blocker`'s block list. Idempotent.
    async fn unblock_user(&self, blocker: UserId, blocked: UserId) -> Result<(), StorageError>;

    /// Add `contact` to `user`'s contact list.
    ///
    /// Returns true if the link was newly created, false if it already
    /// existed. One-directional, callers add both directions for a
    /// mutual link.
    async fn add_contact(&self, user: UserId, contact: UserId) -> Result<bool, StorageError>;

    /// Whether `contact` is on `user`'s contact list.
    async fn are_contacts(&self, user: UserId, contact: UserId) -> Result<bool, StorageError>;

    /// All users on `user`'s contact list.
    async fn get_contacts(&self, user: UserId) -> Result<Vec<UserRecord>, StorageError>;
}
