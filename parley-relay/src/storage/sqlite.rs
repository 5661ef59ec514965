//! SQLite storage backend for the relay.

use super::{NewMessage, NewUser, Storage, StoredMessage, UserRecord};
use crate::error::StorageError;
use async_trait::async_trait;
use parley_types::{GroupId, MessageId, MessageKind, UserId};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

/// SQLite-based relay storage.
///
/// Uses WAL mode for concurrent reads/writes.
#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Create a new SQLite storage from a database path.
    ///
    /// Creates the database file if it doesn't exist.
    pub async fn new(path: &Path) -> Result<Self, StorageError> {
        let path = path
            .to_str()
            .ok_or_else(|| StorageError::InvalidPath(path.display().to_string()))?;
        let options = SqliteConnectOptions::from_str(path)
            .map_err(StorageError::Database)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await
            .map_err(StorageError::Database)?;

        let storage = Self { pool };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Create an in-memory SQLite storage (for testing).
    pub async fn in_memory() -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(":memory:")
            .map_err(StorageError::Database)?
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(StorageError::Database)?;

        let storage = Self { pool };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Run database migrations.
    async fn run_migrations(&self) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id BLOB PRIMARY KEY,
                email TEXT NOT NULL COLLATE NOCASE UNIQUE,
                display_name TEXT NOT NULL,
                username TEXT NOT NULL,
                avatar_url TEXT,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                id BLOB PRIMARY KEY,
                sender_id BLOB NOT NULL,
                recipient_id BLOB,
                group_id BLOB,
                content TEXT NOT NULL,
                kind TEXT NOT NULL,
                image TEXT,
                audio TEXT,
                created_at INTEGER NOT NULL,
                is_read INTEGER NOT NULL DEFAULT 0,
                CHECK ((recipient_id IS NULL) != (group_id IS NULL))
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS contacts (
                user_id BLOB NOT NULL,
                contact_id BLOB NOT NULL,
                created_at INTEGER NOT NULL,
                PRIMARY KEY (user_id, contact_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS blocks (
                blocker_id BLOB NOT NULL,
                blocked_id BLOB NOT NULL,
                created_at INTEGER NOT NULL,
                PRIMARY KEY (blocker_id, blocked_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_messages_recipient ON messages(recipient_id, created_at)",
        )
        .execute(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_messages_group ON messages(group_id, created_at)",
        )
        .execute(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_contacts_user ON contacts(user_id)")
            .execute(&self.pool)
            .await
            .map_err(StorageError::Database)?;

        Ok(())
    }

    fn current_timestamp_millis() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn create_user(&self, user: NewUser) -> Result<UserRecord, StorageError> {
        let id = UserId::new();
        let created_at = Self::current_timestamp_millis();

        sqlx::query(
            r#"
            INSERT INTO users (id, email, display_name, username, avatar_url, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(id.as_uuid().as_bytes().as_slice())
        .bind(&user.email)
        .bind(&user.display_name)
        .bind(&user.username)
        .bind(&user.avatar_url)
        .bind(created_at as i64)
        .execute(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        Ok(UserRecord {
            id,
            email: user.email,
            display_name: user.display_name,
            username: user.username,
            avatar_url: user.avatar_url,
            created_at,
        })
    }

    async fn get_user(&self, id: UserId) -> Result<Option<UserRecord>, StorageError> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT id, email, display_name, username, avatar_url, created_at
            FROM users
            WHERE id = ?1
            "#,
        )
        .bind(id.as_uuid().as_bytes().as_slice())
        .fetch_optional(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        row.map(TryInto::try_into).transpose()
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserRecord>, StorageError> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT id, email, display_name, username, avatar_url, created_at
            FROM users
            WHERE email = ?1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        row.map(TryInto::try_into).transpose()
    }

    async fn store_message(&self, message: NewMessage) -> Result<StoredMessage, StorageError> {
        if message.recipient_id.is_some() == message.group_id.is_some() {
            return Err(StorageError::InvalidData(
                "message must target exactly one of a user or a group".into(),
            ));
        }

        let id = MessageId::new();
        let created_at = Self::current_timestamp_millis();

        sqlx::query(
            r#"
            INSERT INTO messages (id, sender_id, recipient_id, group_id, content, kind, image, audio, created_at, is_read)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 0)
            "#,
        )
        .bind(id.as_uuid().as_bytes().as_slice())
        .bind(message.sender_id.as_uuid().as_bytes().as_slice())
        .bind(message.recipient_id.map(|r| r.as_uuid().as_bytes().to_vec()))
        .bind(message.group_id.map(|g| g.as_uuid().as_bytes().to_vec()))
        .bind(&message.content)
        .bind(kind_to_str(message.kind))
        .bind(&message.image)
        .bind(&message.audio)
        .bind(created_at as i64)
        .execute(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        Ok(StoredMessage {
            id,
            sender_id: message.sender_id,
            recipient_id: message.recipient_id,
            group_id: message.group_id,
            content: message.content,
            kind: message.kind,
            image: message.image,
            audio: message.audio,
            created_at,
            read: false,
        })
    }

    async fn get_message(&self, id: MessageId) -> Result<Option<StoredMessage>, StorageError> {
        let row = sqlx::query_as::<_, MessageRow>(
            r#"
            SELECT id, sender_id, recipient_id, group_id, content, kind, image, audio, created_at, is_read
            FROM messages
            WHERE id = ?1
            "#,
        )
        .bind(id.as_uuid().as_bytes().as_slice())
        .fetch_optional(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        row.map(TryInto::try_into).transpose()
    }

    async fn is_blocked(&self, blocker: UserId, blocked: UserId) -> Result<bool, StorageError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM blocks WHERE blocker_id = ?1 AND blocked_id = ?2",
        )
        .bind(blocker.as_uuid().as_bytes().as_slice())
        .bind(blocked.as_uuid().as_bytes().as_slice())
        .fetch_one(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        Ok(count > 0)
    }

    async fn block_user(&self, blocker: UserId, blocked: UserId) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO blocks (blocker_id, blocked_id, created_at)
            VALUES (?1, ?2, ?3)
            "#,
        )
        .bind(blocker.as_uuid().as_bytes().as_slice())
        .bind(blocked.as_uuid().as_bytes().as_slice())
        .bind(Self::current_timestamp_millis() as i64)
        .execute(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        Ok(())
    }

    async fn unblock_user(&self, blocker: UserId, blocked: UserId) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM blocks WHERE blocker_id = ?1 AND blocked_id = ?2")
            .bind(blocker.as_uuid().as_bytes().as_slice())
            .bind(blocked.as_uuid().as_bytes().as_slice())
            .execute(&self.pool)
            .await
            .map_err(StorageError::Database)?;

        Ok(())
    }

    async fn add_contact(&self, user: UserId, contact: UserId) -> Result<bool, StorageError> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO contacts (user_id, contact_id, created_at)
            VALUES (?1, ?2, ?3)
            "#,
        )
        .bind(user.as_uuid().as_bytes().as_slice())
        .bind(contact.as_uuid().as_bytes().as_slice())
        .bind(Self::current_timestamp_millis() as i64)
        .execute(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        Ok(result.rows_affected() > 0)
    }

    async fn are_contacts(&self, user: UserId, contact: UserId) -> Result<bool, StorageError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM contacts WHERE user_id = ?1 AND contact_id = ?2",
        )
        .bind(user.as_uuid().as_bytes().as_slice())
        .bind(contact.as_uuid().as_bytes().as_slice())
        .fetch_one(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        Ok(count > 0)
    }

    async fn get_contacts(&self, user: UserId) -> Result<Vec<UserRecord>, StorageError> {
        let rows = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT u.id, u.email, u.display_name, u.username, u.avatar_url, u.created_at
            FROM contacts c
            JOIN users u ON u.id = c.contact_id
            WHERE c.user_id = ?1
            ORDER BY u.display_name ASC
            "#,
        )
        .bind(user.as_uuid().as_bytes().as_slice())
        .fetch_all(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        rows.into_iter().map(TryInto::try_into).collect()
    }
}

fn kind_to_str(kind: MessageKind) -> &'static str {
    match kind {
        MessageKind::Text => "text",
        MessageKind::Image => "image",
        MessageKind::Audio => "audio",
    }
}

fn kind_from_str(kind: &str) -> Result<MessageKind, StorageError> {
    match kind {
        "text" => Ok(MessageKind::Text),
        "image" => Ok(MessageKind::Image),
        "audio" => Ok(MessageKind::Audio),
        other => Err(StorageError::InvalidData(format!(
            "unknown message kind: {other}"
        ))),
    }
}

fn uuid_from_blob(bytes: &[u8], column: &str) -> Result<uuid::Uuid, StorageError> {
    uuid::Uuid::from_slice(bytes)
        .map_err(|_| StorageError::InvalidData(format!("malformed uuid in column {column}")))
}

/// Internal row type for user queries.
#[derive(sqlx::FromRow)]
struct UserRow {
    id: Vec<u8>,
    email: String,
    display_name: String,
    username: String,
    avatar_url: Option<String>,
    created_at: i64,
}

impl TryFrom<UserRow> for UserRecord {
    type Error = StorageError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        Ok(UserRecord {
            id: UserId::from_uuid(uuid_from_blob(&row.id, "users.id")?),
            email: row.email,
            display_name: row.display_name,
            username: row.username,
            avatar_url: row.avatar_url,
            created_at: row.created_at as u64,
        })
    }
}

/// Internal row type for message queries.
#[derive(sqlx::FromRow)]
struct MessageRow {
    id: Vec<u8>,
    sender_id: Vec<u8>,
    recipient_id: Option<Vec<u8>>,
    group_id: Option<Vec<u8>>,
    content: String,
    kind: String,
    image: Option<String>,
    audio: Option<String>,
    created_at: i64,
    is_read: i64,
}

impl TryFrom<MessageRow> for StoredMessage {
    type Error = StorageError;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        Ok(StoredMessage {
            id: MessageId::from_uuid(uuid_from_blob(&row.id, "messages.id")?),
            sender_id: UserId::from_uuid(uuid_from_blob(&row.sender_id, "messages.sender_id")?),
            recipient_id: row
                .recipient_id
                .as_deref()
                .map(|b| uuid_from_blob(b, "messages.recipient_id").map(UserId::from_uuid))
                .transpose()?,
            group_id: row
                .group_id
                .as_deref()
                .map(|b| uuid_from_blob(b, "messages.group_id").map(GroupId::from_uuid))
                .transpose()?,
            content: row.content,
            kind: kind_from_str(&row.kind)?,
            image: row.image,
            audio: row.audio,
            created_at: row.created_at as u64,
            read: row.is_read != 0,
        })
    }
}
