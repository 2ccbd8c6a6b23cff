// friends.rs
use std::path::Path;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::StoreError;
use crate::message::ChatMessage;
use crate::profile::{Gender, UserId, UserProfile};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS users (
    id         TEXT PRIMARY KEY,
    name       TEXT NOT NULL,
    gender     TEXT NOT NULL,
    last_seen  TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS friendships (
    user_a     TEXT NOT NULL,
    user_b     TEXT NOT NULL,
    created_at TEXT NOT NULL,
    PRIMARY KEY (user_a, user_b)
);
CREATE TABLE IF NOT EXISTS friend_messages (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    sender     TEXT NOT NULL,
    recipient  TEXT NOT NULL,
    body       TEXT NOT NULL,
    sent_at    TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_friend_messages_pair
    ON friend_messages (sender, recipient);
";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FriendRecord {
    pub id: UserId,
    pub name: String,
}

/// Confirmed friend pairs and their message history, kept apart from the
/// live matching state. A pair is stored once, smallest id first.
pub struct FriendStore {
    conn: Connection,
}

fn ordered<'a>(a: &'a str, b: &'a str) -> (&'a str, &'a str) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

impl FriendStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Records or refreshes a user's display data.
    pub fn upsert_user(&self, profile: &UserProfile) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO users (id, name, gender, last_seen) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name,
                                           gender = excluded.gender,
                                           last_seen = excluded.last_seen",
            params![profile.id, profile.name, profile.gender.as_str(), Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn user(&self, id: &str) -> Result<Option<UserProfile>, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT id, name, gender FROM users WHERE id = ?1",
                params![id],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?)),
            )
            .optional()?;
        row.map(|(id, name, gender)| -> Result<UserProfile, StoreError> {
            let gender: Gender = gender
                .parse()
                .map_err(|_| StoreError::Corrupt(format!("gender '{gender}' for user {id}")))?;
            Ok(UserProfile { id, name, gender, age: None })
        })
        .transpose()
    }

    /// Returns false if the pair already existed.
    pub fn add_friendship(&self, a: &str, b: &str) -> Result<bool, StoreError> {
        let (first, second) = ordered(a, b);
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO friendships (user_a, user_b, created_at) VALUES (?1, ?2, ?3)",
            params![first, second, Utc::now().to_rfc3339()],
        )?;
        Ok(inserted > 0)
    }

    pub fn are_friends(&self, a: &str, b: &str) -> Result<bool, StoreError> {
        let (first, second) = ordered(a, b);
        let found = self
            .conn
            .query_row(
                "SELECT 1 FROM friendships WHERE user_a = ?1 AND user_b = ?2",
                params![first, second],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn list_friends(&self, user: &str) -> Result<Vec<FriendRecord>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT u.id, u.name
               FROM friendships f
               JOIN users u ON u.id = CASE WHEN f.user_a = ?1 THEN f.user_b ELSE f.user_a END
              WHERE f.user_a = ?1 OR f.user_b = ?1
              ORDER BY u.name",
        )?;
        let rows = stmt.query_map(params![user], |row| {
            Ok(FriendRecord {
                id: row.get(0)?,
                name: row.get(1)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn append_message(&self, from: &str, to: &str, text: &str) -> Result<ChatMessage, StoreError> {
        let message = ChatMessage::new(from, text);
        self.conn.execute(
            "INSERT INTO friend_messages (sender, recipient, body, sent_at) VALUES (?1, ?2, ?3, ?4)",
            params![from, to, message.text, message.timestamp],
        )?;
        Ok(message)
    }

    /// The most recent `limit` messages between two users, oldest first.
    pub fn history(&self, a: &str, b: &str, limit: usize) -> Result<Vec<ChatMessage>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT sender, body, sent_at FROM friend_messages
              WHERE (sender = ?1 AND recipient = ?2) OR (sender = ?2 AND recipient = ?1)
              ORDER BY id DESC
              LIMIT ?3",
        )?;
        let rows = stmt.query_map(params![a, b, limit as i64], |row| {
            Ok(ChatMessage {
                from: row.get(0)?,
                text: row.get(1)?,
                timestamp: row.get(2)?,
            })
        })?;
        let mut messages = rows.collect::<Result<Vec<_>, _>>()?;
        messages.reverse();
        Ok(messages)
    }
}
