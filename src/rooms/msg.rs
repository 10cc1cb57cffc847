use tracing::{debug, error};

use crate::{
    db::ChatMessage,
    error::{ChatError, ChatResult},
    protocol::ServerEvent,
    session::Session,
    store::Store,
};

use super::BroadcastRouter;

/// Persists a message and fans it out to everyone in the room, sender included.
///
/// The room gate is held from before the insert until the fan-out is queued,
/// so joins cannot slip in between the two.
pub async fn send_message<S: Store>(
    store: &S,
    router: &BroadcastRouter,
    session: &Session,
    room_name: &str,
    text: &str,
    correlation_id: Option<String>,
) -> ChatResult<ChatMessage> {
    let user_id = session.require_identity()?;
    if text.trim().is_empty() {
        return Err(ChatError::validation("message must not be empty"));
    }

    let room_name = room_name.trim();
    let room = store
        .find_room(room_name)
        .await?
        .ok_or_else(|| ChatError::not_found(format!("room {room_name} does not exist")))?;
    if !session.has_joined(&room.name) {
        return Err(ChatError::validation(format!("join room {} before sending to it", room.name)));
    }

    let Some(sender) = store.find_user(user_id).await? else {
        error!(%user_id, "bound user missing from storage");
        return Err(ChatError::not_found("user not found"));
    };

    let gate = router.gate(&room.name).await;
    let message = store.insert_message(&room, &sender, text).await?;
    let delivered = gate.publish(&ServerEvent::message(&room.name, &message, correlation_id));
    drop(gate);

    debug!(room = %room.name, message_id = %message.id, delivered, "message sent");
    Ok(message)
}
