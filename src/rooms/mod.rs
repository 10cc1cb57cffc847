pub mod broadcast;
pub mod msg;
mod ws;

use axum::{routing::get, Router};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::{
    db::{ChatMessage, Room},
    error::{ChatError, ChatResult},
    protocol::{HistoryLine, ServerEvent},
    session::Session,
    store::{Store, StoreError},
    AppState,
};

pub use broadcast::{BroadcastRouter, RoomGate};
pub use ws::serve_connection;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/ws", get(ws::room_ws))
}

/// Joins `room_name`, creating the room on first use.
///
/// The joiner receives the room's full history as a `room-history` event and
/// everyone already in the room receives `peer-joined`. All of it is queued
/// under the room gate, so any message is seen by the joiner exactly once:
/// either in the history or live. The history is also returned to the caller.
///
/// Rejoining with the same peer id only re-sends the history. Rejoining with
/// a different one tells the others `peer-left` for the old id, then
/// `peer-joined` for the new one.
pub async fn join_room<S: Store>(
    store: &S,
    router: &BroadcastRouter,
    session: &mut Session,
    room_name: &str,
    peer_id: &str,
) -> ChatResult<(Room, Vec<ChatMessage>)> {
    let user_id = session.require_identity()?;
    let room_name = room_name.trim();
    if room_name.is_empty() {
        return Err(ChatError::validation("room name must not be empty"));
    }

    let room = find_or_create_room(store, room_name, user_id).await?;

    let mut gate = router.gate(&room.name).await;
    let history = match store.room_history(room.id).await {
        Ok(history) => history,
        Err(err) => {
            drop(gate);
            router.prune(&room.name);
            return Err(err.into());
        }
    };

    let connection_id = session.connection_id();
    let previous = gate.subscribe(connection_id, peer_id, session.outbox().clone());
    session.record_join(&room.name, peer_id);
    let joined = ServerEvent::PeerJoined {
        room_name: room.name.clone(),
        peer_id: peer_id.to_owned(),
    };
    match previous {
        None => {
            let notified = gate.notify_others(connection_id, &joined);
            info!(room = %room.name, %user_id, peer_id, notified, "joined room");
        }
        Some(old_peer_id) if old_peer_id != peer_id => {
            // others only ever see the id that is currently joined
            let left = ServerEvent::PeerLeft {
                room_name: room.name.clone(),
                peer_id: old_peer_id.clone(),
            };
            gate.notify_others(connection_id, &left);
            gate.notify_others(connection_id, &joined);
            info!(room = %room.name, %user_id, old_peer_id, peer_id, "rejoined room as new peer");
        }
        Some(_) => debug!(room = %room.name, %user_id, peer_id, "rejoined room"),
    }
    session.send(ServerEvent::RoomHistory {
        room_name: room.name.clone(),
        messages: history.iter().map(HistoryLine::from).collect(),
    });
    drop(gate);

    Ok((room, history))
}

/// Looks the room up and creates it if missing.
///
/// Losing a creation race to another connection shows up as a unique
/// violation; the winner's row is then fetched and used. If that row cannot
/// be seen either, storage is inconsistent and the join fails.
pub(crate) async fn find_or_create_room<S: Store>(
    store: &S,
    name: &str,
    owner_id: Uuid,
) -> ChatResult<Room> {
    if let Some(room) = store.find_room(name).await? {
        return Ok(room);
    }

    match store.create_room(name, owner_id).await {
        Ok(room) => {
            info!(room = %room.name, room_id = %room.id, %owner_id, "created room");
            Ok(room)
        }
        Err(StoreError::UniqueViolation) => {
            debug!(room = name, "room created concurrently, joining existing one");
            store.find_room(name).await?.ok_or_else(|| {
                error!(room = name, "room missing after unique violation");
                let detail = format!("room {name} not visible after unique violation");
                ChatError::Persistence(StoreError::Corrupt(detail))
            })
        }
        Err(err) => Err(err.into()),
    }
}

/// Removes a closing session from every room it joined and tells the
/// remaining members with `peer-left`.
pub async fn leave_all(router: &BroadcastRouter, session: &mut Session) {
    let connection_id = session.connection_id();

    for (room_name, peer_id) in session.close() {
        let mut gate = router.gate(&room_name).await;
        let peer_id = gate.unsubscribe(connection_id).unwrap_or(peer_id);
        let notified = gate.publish(&ServerEvent::PeerLeft {
            room_name: room_name.clone(),
            peer_id: peer_id.clone(),
        });
        drop(gate);

        router.prune(&room_name);
        info!(room = %room_name, peer_id, notified, "left room");
    }
}
