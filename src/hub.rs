use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::{
    error::{ChatError, ChatResult},
    identity,
    protocol::{ClientEvent, ServerEvent},
    rooms::{self, BroadcastRouter},
    session::Session,
    store::Store,
};

/// Routes client events to the identity, room and message handlers.
///
/// Each connection feeds its events one at a time, so a session's events are
/// handled in arrival order while different connections interleave freely.
pub struct Hub<S> {
    store: Arc<S>,
    router: BroadcastRouter,
}

impl<S> Clone for Hub<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            router: self.router.clone(),
        }
    }
}

impl<S: Store> Hub<S> {
    pub fn new(store: S) -> Self {
        Self {
            store: Arc::new(store),
            router: BroadcastRouter::new(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn router(&self) -> &BroadcastRouter {
        &self.router
    }

    pub fn connect(&self) -> (Session, mpsc::Receiver<ServerEvent>) {
        let (session, rx) = Session::channel();
        debug!(connection = %session.connection_id(), "connected");
        (session, rx)
    }

    /// Handles one event; failures go back to the session as `error` events.
    pub async fn dispatch(&self, session: &mut Session, event: ClientEvent) {
        let kind = event.kind();
        if let Err(err) = self.handle(session, event).await {
            match &err {
                ChatError::Persistence(source) => {
                    error!(
                        connection = %session.connection_id(),
                        event = kind,
                        %source,
                        "request failed"
                    );
                }
                _ => warn!(
                    connection = %session.connection_id(),
                    event = kind,
                    %err,
                    "request rejected"
                ),
            }
            session.send(ServerEvent::Error { reason: err.reason() });
        }
    }

    async fn handle(&self, session: &mut Session, event: ClientEvent) -> ChatResult<()> {
        match event {
            ClientEvent::BindIdentity { name } => {
                let user_id = identity::bind_identity(&*self.store, session, &name).await?;
                session.send(ServerEvent::IdentityBound { user_id });
            }
            ClientEvent::JoinRoom { room_name, peer_id } => {
                rooms::join_room(&*self.store, &self.router, session, &room_name, &peer_id).await?;
            }
            ClientEvent::SendMessage {
                room_name,
                text,
                correlation_id,
            } => {
                rooms::msg::send_message(
                    &*self.store,
                    &self.router,
                    session,
                    &room_name,
                    &text,
                    correlation_id,
                )
                .await?;
            }
        }
        Ok(())
    }

    pub async fn disconnect(&self, session: &mut Session) {
        rooms::leave_all(&self.router, session).await;
        debug!(connection = %session.connection_id(), "disconnected");
    }
}
