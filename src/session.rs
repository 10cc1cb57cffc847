use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use tokio::sync::{
    mpsc::{self, error::TrySendError},
    Notify,
};
use tracing::{trace, warn};
use uuid::Uuid;

use crate::{
    error::{ChatError, ChatResult},
    protocol::ServerEvent,
};

/// Events a connection may have queued but not yet written.
pub const OUTBOX_CAPACITY: usize = 1024;

/// Queue of events waiting to be written to one connection.
///
/// Never drops an event quietly: once the queue is full the outbox is marked
/// stalled, refuses everything after, and the connection task closes the
/// connection. A client that reconnects gets the missed messages as backfill.
#[derive(Debug, Clone)]
pub struct Outbox {
    tx: mpsc::Sender<ServerEvent>,
    stalled: Arc<AtomicBool>,
    stall_signal: Arc<Notify>,
}

impl Outbox {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        let outbox = Self {
            tx,
            stalled: Arc::new(AtomicBool::new(false)),
            stall_signal: Arc::new(Notify::new()),
        };
        (outbox, rx)
    }

    /// Queues `event`; `false` if the connection is gone or stalled.
    pub fn send(&self, event: ServerEvent) -> bool {
        if self.is_stalled() {
            return false;
        }
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.stalled.store(true, Ordering::SeqCst);
                self.stall_signal.notify_one();
                warn!("outbox full, connection stalled");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    pub fn is_stalled(&self) -> bool {
        self.stalled.load(Ordering::SeqCst)
    }

    /// Resolves once the outbox has overflowed.
    pub async fn stalled(&self) {
        if !self.is_stalled() {
            self.stall_signal.notified().await;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connected,
    Identified,
    InRoom,
    Disconnected,
}

/// State of one live connection, owned by the task serving it.
#[derive(Debug)]
pub struct Session {
    connection_id: Uuid,
    bound_user_id: Option<Uuid>,
    /// room name -> peer id announced in that room
    joined_rooms: HashMap<String, String>,
    outbox: Outbox,
    closed: bool,
}

impl Session {
    pub fn new(outbox: Outbox) -> Self {
        Self {
            connection_id: Uuid::now_v7(),
            bound_user_id: None,
            joined_rooms: HashMap::new(),
            outbox,
            closed: false,
        }
    }

    /// A session together with the receiving end of its outbox.
    pub fn channel() -> (Self, mpsc::Receiver<ServerEvent>) {
        Self::with_capacity(OUTBOX_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> (Self, mpsc::Receiver<ServerEvent>) {
        let (outbox, rx) = Outbox::new(capacity);
        (Self::new(outbox), rx)
    }

    pub fn connection_id(&self) -> Uuid {
        self.connection_id
    }

    pub fn bound_user_id(&self) -> Option<Uuid> {
        self.bound_user_id
    }

    pub fn require_identity(&self) -> ChatResult<Uuid> {
        if self.closed {
            return Err(ChatError::validation("connection is closed"));
        }
        self.bound_user_id
            .ok_or_else(|| ChatError::validation("bind an identity first"))
    }

    /// Sets the identity unless one is already bound; returns the binding in effect.
    pub(crate) fn bind(&mut self, user_id: Uuid) -> Uuid {
        *self.bound_user_id.get_or_insert(user_id)
    }

    pub fn has_joined(&self, room_name: &str) -> bool {
        self.joined_rooms.contains_key(room_name)
    }

    pub fn peer_id(&self, room_name: &str) -> Option<&str> {
        self.joined_rooms.get(room_name).map(String::as_str)
    }

    pub fn joined_rooms(&self) -> impl Iterator<Item = &str> {
        self.joined_rooms.keys().map(String::as_str)
    }

    pub(crate) fn record_join(&mut self, room_name: &str, peer_id: &str) {
        self.joined_rooms.insert(room_name.to_owned(), peer_id.to_owned());
    }

    /// Moves to `Disconnected` and hands back the rooms that were joined.
    pub(crate) fn close(&mut self) -> HashMap<String, String> {
        self.closed = true;
        std::mem::take(&mut self.joined_rooms)
    }

    pub fn state(&self) -> SessionState {
        if self.closed {
            SessionState::Disconnected
        } else if !self.joined_rooms.is_empty() {
            SessionState::InRoom
        } else if self.bound_user_id.is_some() {
            SessionState::Identified
        } else {
            SessionState::Connected
        }
    }

    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    pub fn send(&self, event: ServerEvent) {
        if !self.outbox.send(event) {
            trace!(connection = %self.connection_id, "outbox closed or stalled, event refused");
        }
    }
}
