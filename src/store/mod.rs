mod sqlite;
#[cfg(test)]
pub(crate) mod fake;

use std::future::Future;

use time::OffsetDateTime;
use uuid::Uuid;

use crate::db::{ChatMessage, Room, User};

pub use sqlite::SqliteStore;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Another writer already holds the unique key.
    #[error("unique constraint violated")]
    UniqueViolation,
    #[error("corrupt row: {0}")]
    Corrupt(String),
    #[error(transparent)]
    Backend(sqlx::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err.as_database_error() {
            Some(db_err) if db_err.is_unique_violation() => Self::UniqueViolation,
            _ => Self::Backend(err),
        }
    }
}

impl From<uuid::Error> for StoreError {
    fn from(err: uuid::Error) -> Self {
        Self::Corrupt(err.to_string())
    }
}

/// Durable storage for users, rooms and messages.
///
/// `create_room` must fail with [`StoreError::UniqueViolation`] when a room
/// with the same name already exists. That constraint is what settles
/// concurrent creation of the same room.
pub trait Store: Send + Sync + 'static {
    fn find_user(&self, id: Uuid) -> impl Future<Output = StoreResult<Option<User>>> + Send;

    /// Oldest user registered under `name`.
    fn find_user_by_name(
        &self,
        name: &str,
    ) -> impl Future<Output = StoreResult<Option<User>>> + Send;

    fn create_user(&self, name: &str) -> impl Future<Output = StoreResult<User>> + Send;

    fn find_room(&self, name: &str) -> impl Future<Output = StoreResult<Option<Room>>> + Send;

    fn create_room(
        &self,
        name: &str,
        owner_id: Uuid,
    ) -> impl Future<Output = StoreResult<Room>> + Send;

    /// Appends a message stamped with the current time, never earlier than
    /// the newest message already in the room.
    fn insert_message(
        &self,
        room: &Room,
        sender: &User,
        text: &str,
    ) -> impl Future<Output = StoreResult<ChatMessage>> + Send;

    /// Every message of the room, oldest first.
    fn room_history(
        &self,
        room_id: Uuid,
    ) -> impl Future<Output = StoreResult<Vec<ChatMessage>>> + Send;
}

pub(crate) fn unix_millis(at: OffsetDateTime) -> i64 {
    (at.unix_timestamp_nanos() / 1_000_000) as i64
}

pub(crate) fn from_unix_millis(millis: i64) -> StoreResult<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000)
        .map_err(|err| StoreError::Corrupt(format!("timestamp {millis}: {err}")))
}
