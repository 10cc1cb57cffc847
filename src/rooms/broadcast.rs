//! Per-room subscriber groups.
//!
//! Each room has one group guarded by an async mutex, the room gate. Every
//! change to the group and every delivery to it happens while the gate is
//! held, so a subscriber never sees an event from before it joined or after
//! it left.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::trace;
use uuid::Uuid;

use crate::{protocol::ServerEvent, session::Outbox};

#[derive(Debug)]
struct Subscriber {
    peer_id: String,
    outbox: Outbox,
}

#[derive(Debug, Default)]
struct Members {
    subscribers: HashMap<Uuid, Subscriber>,
}

type Group = Arc<AsyncMutex<Members>>;

#[derive(Debug, Clone, Default)]
pub struct BroadcastRouter {
    groups: Arc<Mutex<HashMap<String, Group>>>,
}

impl BroadcastRouter {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_groups(&self) -> MutexGuard<'_, HashMap<String, Group>> {
        self.groups.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Waits for exclusive access to the room's group, creating it if needed.
    pub async fn gate(&self, room_name: &str) -> RoomGate {
        let group = self
            .lock_groups()
            .entry(room_name.to_owned())
            .or_default()
            .clone();

        RoomGate {
            room_name: room_name.to_owned(),
            members: group.lock_owned().await,
        }
    }

    /// Drops the group of `room_name` if it is empty and nobody is waiting on it.
    pub fn prune(&self, room_name: &str) {
        let mut groups = self.lock_groups();
        let unused = groups.get(room_name).is_some_and(|group| {
            Arc::strong_count(group) == 1
                && group.try_lock().is_ok_and(|members| members.subscribers.is_empty())
        });
        if unused {
            groups.remove(room_name);
            trace!(room = room_name, "pruned empty group");
        }
    }

    pub async fn subscriber_count(&self, room_name: &str) -> usize {
        let group = self.lock_groups().get(room_name).cloned();
        match group {
            Some(group) => group.lock().await.subscribers.len(),
            None => 0,
        }
    }

    pub fn group_count(&self) -> usize {
        self.lock_groups().len()
    }
}

/// Exclusive handle on one room's group; released on drop.
pub struct RoomGate {
    room_name: String,
    members: OwnedMutexGuard<Members>,
}

impl RoomGate {
    /// Returns the peer id the connection was subscribed with before, if any.
    pub fn subscribe(
        &mut self,
        connection_id: Uuid,
        peer_id: &str,
        outbox: Outbox,
    ) -> Option<String> {
        let subscriber = Subscriber {
            peer_id: peer_id.to_owned(),
            outbox,
        };
        self.members
            .subscribers
            .insert(connection_id, subscriber)
            .map(|previous| previous.peer_id)
    }

    /// Returns the peer id the connection was subscribed with.
    pub fn unsubscribe(&mut self, connection_id: Uuid) -> Option<String> {
        self.members
            .subscribers
            .remove(&connection_id)
            .map(|subscriber| subscriber.peer_id)
    }

    pub fn len(&self) -> usize {
        self.members.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.subscribers.is_empty()
    }

    /// Delivers to every subscriber; returns how many outboxes accepted it.
    pub fn publish(&self, event: &ServerEvent) -> usize {
        self.deliver(None, event)
    }

    /// Delivers to every subscriber except `connection_id`.
    pub fn notify_others(&self, connection_id: Uuid, event: &ServerEvent) -> usize {
        self.deliver(Some(connection_id), event)
    }

    fn deliver(&self, except: Option<Uuid>, event: &ServerEvent) -> usize {
        let mut delivered = 0;
        for (id, subscriber) in &self.members.subscribers {
            if Some(*id) == except {
                continue;
            }
            if subscriber.outbox.send(event.clone()) {
                delivered += 1;
            } else {
                trace!(room = %self.room_name, connection = %id, "subscriber outbox refused event");
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Session;

    fn joined(room: &str, peer: &str) -> ServerEvent {
        ServerEvent::PeerJoined {
            room_name: room.into(),
            peer_id: peer.into(),
        }
    }

    #[tokio::test]
    async fn publish_reaches_all_and_notify_skips_origin() {
        let router = BroadcastRouter::new();
        let (a, mut rx_a) = Session::channel();
        let (b, mut rx_b) = Session::channel();

        let mut gate = router.gate("lobby").await;
        assert_eq!(gate.subscribe(a.connection_id(), "pA", a.outbox().clone()), None);
        assert_eq!(gate.subscribe(b.connection_id(), "pB", b.outbox().clone()), None);

        assert_eq!(gate.notify_others(b.connection_id(), &joined("lobby", "pB")), 1);
        assert_eq!(rx_a.try_recv().unwrap(), joined("lobby", "pB"));
        assert!(rx_b.try_recv().is_err());

        let event = ServerEvent::Error { reason: "x".into() };
        assert_eq!(gate.publish(&event), 2);
        assert_eq!(rx_a.try_recv().unwrap(), event);
        assert_eq!(rx_b.try_recv().unwrap(), event);
    }

    #[tokio::test]
    async fn resubscribe_updates_peer_id() {
        let router = BroadcastRouter::new();
        let (a, _rx) = Session::channel();

        let mut gate = router.gate("lobby").await;
        assert_eq!(gate.subscribe(a.connection_id(), "old", a.outbox().clone()), None);
        assert_eq!(
            gate.subscribe(a.connection_id(), "new", a.outbox().clone()).as_deref(),
            Some("old")
        );
        assert_eq!(gate.len(), 1);
        assert_eq!(gate.unsubscribe(a.connection_id()).as_deref(), Some("new"));
        assert!(gate.is_empty());
    }

    #[tokio::test]
    async fn closed_outbox_is_not_counted() {
        let router = BroadcastRouter::new();
        let (a, rx_a) = Session::channel();
        let (b, _rx_b) = Session::channel();
        drop(rx_a);

        let mut gate = router.gate("lobby").await;
        gate.subscribe(a.connection_id(), "pA", a.outbox().clone());
        gate.subscribe(b.connection_id(), "pB", b.outbox().clone());
        assert_eq!(gate.publish(&joined("lobby", "pC")), 1);
    }

    #[tokio::test]
    async fn slow_subscriber_stalls_without_holding_up_others() {
        let router = BroadcastRouter::new();
        let (slow, _rx_slow) = Session::with_capacity(1);
        let (fast, mut rx_fast) = Session::channel();

        let mut gate = router.gate("lobby").await;
        gate.subscribe(slow.connection_id(), "pS", slow.outbox().clone());
        gate.subscribe(fast.connection_id(), "pF", fast.outbox().clone());
        assert_eq!(gate.publish(&joined("lobby", "p1")), 2);
        assert_eq!(gate.publish(&joined("lobby", "p2")), 1);
        assert_eq!(gate.publish(&joined("lobby", "p3")), 1);
        drop(gate);

        assert!(slow.outbox().is_stalled());
        let to_fast: Vec<_> = std::iter::from_fn(|| rx_fast.try_recv().ok()).collect();
        assert_eq!(to_fast.len(), 3);
    }

    #[tokio::test]
    async fn prune_keeps_groups_in_use() {
        let router = BroadcastRouter::new();
        let (a, _rx) = Session::channel();

        let gate = router.gate("lobby").await;
        router.prune("lobby");
        assert_eq!(router.group_count(), 1, "held gate must survive prune");
        drop(gate);

        let mut gate = router.gate("lobby").await;
        gate.subscribe(a.connection_id(), "pA", a.outbox().clone());
        drop(gate);
        router.prune("lobby");
        assert_eq!(router.subscriber_count("lobby").await, 1);

        let mut gate = router.gate("lobby").await;
        gate.unsubscribe(a.connection_id());
        drop(gate);
        router.prune("lobby");
        assert_eq!(router.group_count(), 0);
        assert_eq!(router.subscriber_count("lobby").await, 0);
    }
}
