use sqlx::SqlitePool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::db::{ChatMessage, Room, User};

use super::{from_unix_millis, unix_millis, Store, StoreResult};

#[derive(Debug, Clone)]
pub struct SqliteStore {
    db_pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(db_pool: SqlitePool) -> Self {
        Self { db_pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.db_pool
    }
}

type UserRow = (String, String);
type RoomRow = (String, String, String);
type MessageRow = (String, String, String, String, String, i64);

fn user_from_row((id, name): UserRow) -> StoreResult<User> {
    Ok(User {
        id: Uuid::parse_str(&id)?,
        name,
    })
}

fn room_from_row((id, name, owner_id): RoomRow) -> StoreResult<Room> {
    Ok(Room {
        id: Uuid::parse_str(&id)?,
        name,
        owner_id: Uuid::parse_str(&owner_id)?,
    })
}

fn message_from_row(
    (id, room_id, user_id, sender, text, created_at): MessageRow,
) -> StoreResult<ChatMessage> {
    Ok(ChatMessage {
        id: Uuid::parse_str(&id)?,
        room_id: Uuid::parse_str(&room_id)?,
        user_id: Uuid::parse_str(&user_id)?,
        sender,
        text,
        created_at: from_unix_millis(created_at)?,
    })
}

impl Store for SqliteStore {
    async fn find_user(&self, id: Uuid) -> StoreResult<Option<User>> {
        sqlx::query_as::<_, UserRow>("SELECT id,name FROM users WHERE id=?")
            .bind(id.to_string())
            .fetch_optional(&self.db_pool)
            .await?
            .map(user_from_row)
            .transpose()
    }

    async fn find_user_by_name(&self, name: &str) -> StoreResult<Option<User>> {
        sqlx::query_as::<_, UserRow>(
            "SELECT id,name FROM users WHERE name=? ORDER BY rowid LIMIT 1",
        )
            .bind(name)
            .fetch_optional(&self.db_pool)
            .await?
            .map(user_from_row)
            .transpose()
    }

    async fn create_user(&self, name: &str) -> StoreResult<User> {
        let id = Uuid::now_v7();
        sqlx::query("INSERT INTO users (id,name) VALUES (?,?)")
            .bind(id.to_string())
            .bind(name)
            .execute(&self.db_pool)
            .await?;

        Ok(User {
            id,
            name: name.to_owned(),
        })
    }

    async fn find_room(&self, name: &str) -> StoreResult<Option<Room>> {
        sqlx::query_as::<_, RoomRow>("SELECT id,name,owner_id FROM rooms WHERE name=?")
            .bind(name)
            .fetch_optional(&self.db_pool)
            .await?
            .map(room_from_row)
            .transpose()
    }

    async fn create_room(&self, name: &str, owner_id: Uuid) -> StoreResult<Room> {
        let id = Uuid::now_v7();
        sqlx::query("INSERT INTO rooms (id,name,owner_id) VALUES (?,?,?)")
            .bind(id.to_string())
            .bind(name)
            .bind(owner_id.to_string())
            .execute(&self.db_pool)
            .await?;

        Ok(Room {
            id,
            name: name.to_owned(),
            owner_id,
        })
    }

    async fn insert_message(
        &self,
        room: &Room,
        sender: &User,
        text: &str,
    ) -> StoreResult<ChatMessage> {
        let id = Uuid::now_v7();
        let now = unix_millis(OffsetDateTime::now_utc());

        // clamp against the room's newest row so created_at never runs backwards
        let (created_at,): (i64,) = sqlx::query_as(
            "INSERT INTO messages (id,room_id,user_id,text,created_at) \
             VALUES (?,?,?,?,MAX(?,COALESCE(\
                (SELECT MAX(created_at) FROM messages WHERE room_id=?),0))) \
             RETURNING created_at",
        )
        .bind(id.to_string())
        .bind(room.id.to_string())
        .bind(sender.id.to_string())
        .bind(text)
        .bind(now)
        .bind(room.id.to_string())
        .fetch_one(&self.db_pool)
        .await?;

        Ok(ChatMessage {
            id,
            room_id: room.id,
            user_id: sender.id,
            sender: sender.name.clone(),
            text: text.to_owned(),
            created_at: from_unix_millis(created_at)?,
        })
    }

    async fn room_history(&self, room_id: Uuid) -> StoreResult<Vec<ChatMessage>> {
        let rows: Vec<MessageRow> = sqlx::query_as(
            "SELECT m.id,m.room_id,m.user_id,u.name,m.text,m.created_at \
             FROM messages m JOIN users u ON u.id=m.user_id \
             WHERE m.room_id=? \
             ORDER BY m.created_at ASC, m.rowid ASC",
        )
        .bind(room_id.to_string())
        .fetch_all(&self.db_pool)
        .await?;

        rows.into_iter().map(message_from_row).collect()
    }
}
