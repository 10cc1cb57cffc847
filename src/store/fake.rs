use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Mutex,
};

use time::OffsetDateTime;
use uuid::Uuid;

use crate::db::{ChatMessage, Room, User};

use super::{Store, StoreError, StoreResult};

#[derive(Default)]
struct Tables {
    users: Vec<User>,
    rooms: Vec<Room>,
    messages: Vec<ChatMessage>,
}

/// In-process store with switches for storage misbehaviour.
#[derive(Default)]
pub(crate) struct FakeStore {
    tables: Mutex<Tables>,
    /// Next `create_room` acts as if another writer committed the same name first.
    pub(crate) lose_next_creation: AtomicBool,
    /// With `lose_next_creation`: the winner's row never becomes visible.
    pub(crate) hide_winner: AtomicBool,
    pub(crate) fail_history: AtomicBool,
    /// Next `create_user` finds another writer registered the same name just before it.
    pub(crate) concurrent_user_insert: AtomicBool,
    pub(crate) room_lookups: AtomicUsize,
}

impl FakeStore {
    pub(crate) fn rooms_named(&self, name: &str) -> usize {
        self.tables.lock().unwrap().rooms.iter().filter(|r| r.name == name).count()
    }

    pub(crate) fn users_named(&self, name: &str) -> usize {
        self.tables.lock().unwrap().users.iter().filter(|u| u.name == name).count()
    }
}

fn user(name: &str) -> User {
    User {
        id: Uuid::now_v7(),
        name: name.to_owned(),
    }
}

impl Store for FakeStore {
    async fn find_user(&self, id: Uuid) -> StoreResult<Option<User>> {
        Ok(self.tables.lock().unwrap().users.iter().find(|u| u.id == id).cloned())
    }

    async fn find_user_by_name(&self, name: &str) -> StoreResult<Option<User>> {
        Ok(self.tables.lock().unwrap().users.iter().find(|u| u.name == name).cloned())
    }

    async fn create_user(&self, name: &str) -> StoreResult<User> {
        let mut tables = self.tables.lock().unwrap();
        if self.concurrent_user_insert.swap(false, Ordering::SeqCst) {
            tables.users.push(user(name));
        }
        let created = user(name);
        tables.users.push(created.clone());
        Ok(created)
    }

    async fn find_room(&self, name: &str) -> StoreResult<Option<Room>> {
        self.room_lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.tables.lock().unwrap().rooms.iter().find(|r| r.name == name).cloned())
    }

    async fn create_room(&self, name: &str, owner_id: Uuid) -> StoreResult<Room> {
        let mut tables = self.tables.lock().unwrap();
        if self.lose_next_creation.swap(false, Ordering::SeqCst) {
            if !self.hide_winner.load(Ordering::SeqCst) {
                tables.rooms.push(Room {
                    id: Uuid::now_v7(),
                    name: name.to_owned(),
                    owner_id: Uuid::now_v7(),
                });
            }
            return Err(StoreError::UniqueViolation);
        }
        if tables.rooms.iter().any(|r| r.name == name) {
            return Err(StoreError::UniqueViolation);
        }

        let room = Room {
            id: Uuid::now_v7(),
            name: name.to_owned(),
            owner_id,
        };
        tables.rooms.push(room.clone());
        Ok(room)
    }

    async fn insert_message(
        &self,
        room: &Room,
        sender: &User,
        text: &str,
    ) -> StoreResult<ChatMessage> {
        let mut tables = self.tables.lock().unwrap();
        let newest = tables
            .messages
            .iter()
            .filter(|m| m.room_id == room.id)
            .map(|m| m.created_at)
            .max();
        let now = OffsetDateTime::now_utc();

        let message = ChatMessage {
            id: Uuid::now_v7(),
            room_id: room.id,
            user_id: sender.id,
            sender: sender.name.clone(),
            text: text.to_owned(),
            created_at: newest.map_or(now, |newest| newest.max(now)),
        };
        tables.messages.push(message.clone());
        Ok(message)
    }

    async fn room_history(&self, room_id: Uuid) -> StoreResult<Vec<ChatMessage>> {
        if self.fail_history.load(Ordering::SeqCst) {
            return Err(StoreError::Backend(sqlx::Error::PoolTimedOut));
        }
        Ok(self
            .tables
            .lock()
            .unwrap()
            .messages
            .iter()
            .filter(|m| m.room_id == room_id)
            .cloned()
            .collect())
    }
}
