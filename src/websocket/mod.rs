pub mod events;
pub mod handlers;
pub mod message_types;
pub mod pubsub;

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Process-local connection handle. A user may hold several at once (one per
/// device or tab).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Logical distribution target. Every connection joins its user's personal
/// room at registration; conversation rooms are joined per membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoomId {
    Conversation(Uuid),
    User(Uuid),
}

impl RoomId {
    /// Cross-instance channel name for this room.
    pub fn channel(&self) -> String {
        match self {
            RoomId::Conversation(id) => format!("room:conversation:{id}"),
            RoomId::User(id) => format!("room:user:{id}"),
        }
    }

    pub fn parse_channel(channel: &str) -> Option<Self> {
        if let Some(id) = channel.strip_prefix("room:conversation:") {
            return id.parse().ok().map(RoomId::Conversation);
        }
        if let Some(id) = channel.strip_prefix("room:user:") {
            return id.parse().ok().map(RoomId::User);
        }
        None
    }
}

struct Connection {
    user_id: Uuid,
    sender: UnboundedSender<String>,
    rooms: HashSet<RoomId>,
}

#[derive(Default)]
struct RegistryInner {
    connections: HashMap<ConnectionId, Connection>,
    rooms: HashMap<RoomId, HashSet<ConnectionId>>,
    by_user: HashMap<Uuid, HashSet<ConnectionId>>,
}

/// In-process registry of live connections and their room subscriptions.
/// Payloads are plain strings; the socket task owns the transport framing.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<RwLock<RegistryInner>>,
    next_id: Arc<AtomicU64>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection and auto-join its user's personal room.
    pub async fn register(&self, user_id: Uuid) -> (ConnectionId, UnboundedReceiver<String>) {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = unbounded_channel();
        let personal = RoomId::User(user_id);

        let mut inner = self.inner.write().await;
        inner.connections.insert(
            id,
            Connection {
                user_id,
                sender: tx,
                rooms: HashSet::from([personal]),
            },
        );
        inner.rooms.entry(personal).or_default().insert(id);
        inner.by_user.entry(user_id).or_default().insert(id);
        (id, rx)
    }

    pub async fn join_room(&self, id: ConnectionId, room: RoomId) {
        let mut guard = self.inner.write().await;
        let inner = &mut *guard;
        if let Some(conn) = inner.connections.get_mut(&id) {
            conn.rooms.insert(room);
            inner.rooms.entry(room).or_default().insert(id);
        }
    }

    pub async fn leave_room(&self, id: ConnectionId, room: RoomId) {
        let mut inner = self.inner.write().await;
        if let Some(conn) = inner.connections.get_mut(&id) {
            conn.rooms.remove(&room);
        }
        if let Some(members) = inner.rooms.get_mut(&room) {
            members.remove(&id);
            if members.is_empty() {
                inner.rooms.remove(&room);
            }
        }
    }

    /// Remove a connection. Returns true when this was the user's last live
    /// connection on this instance, which is the signal to drop presence.
    pub async fn unregister(&self, id: ConnectionId) -> bool {
        let mut inner = self.inner.write().await;
        let conn = match inner.connections.remove(&id) {
            Some(c) => c,
            None => return false,
        };
        for room in &conn.rooms {
            if let Some(members) = inner.rooms.get_mut(room) {
                members.remove(&id);
                if members.is_empty() {
                    inner.rooms.remove(room);
                }
            }
        }
        let mut was_last = false;
        if let Some(ids) = inner.by_user.get_mut(&conn.user_id) {
            ids.remove(&id);
            if ids.is_empty() {
                inner.by_user.remove(&conn.user_id);
                was_last = true;
            }
        }
        was_last
    }

    /// Current member snapshot of a room. Joins after the snapshot miss the
    /// event being prepared and catch up from the store.
    pub async fn members_of(&self, room: RoomId) -> Vec<ConnectionId> {
        self.inner
            .read()
            .await
            .rooms
            .get(&room)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    pub async fn connection_count(&self, user_id: Uuid) -> usize {
        self.inner
            .read()
            .await
            .by_user
            .get(&user_id)
            .map_or(0, HashSet::len)
    }

    /// Deliver a payload to every current member of a room. Membership is
    /// snapshotted under the lock; joins after the snapshot miss this event
    /// and catch up from the store.
    pub async fn broadcast(&self, room: RoomId, payload: &str) {
        let inner = self.inner.read().await;
        let Some(members) = inner.rooms.get(&room) else {
            return;
        };
        for id in members {
            if let Some(conn) = inner.connections.get(id) {
                // A full buffer means the receiver task is gone; unregister
                // handles cleanup on its way out.
                let _ = conn.sender.send(payload.to_owned());
            }
        }
    }

    pub async fn send_to(&self, id: ConnectionId, payload: &str) {
        let inner = self.inner.read().await;
        if let Some(conn) = inner.connections.get(&id) {
            let _ = conn.sender.send(payload.to_owned());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_joins_personal_room() {
        let registry = ConnectionRegistry::new();
        let user = Uuid::new_v4();
        let (_id, mut rx) = registry.register(user).await;

        registry.broadcast(RoomId::User(user), "hello").await;
        assert_eq!(rx.recv().await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn broadcast_reaches_all_room_members() {
        let registry = ConnectionRegistry::new();
        let room = RoomId::Conversation(Uuid::new_v4());
        let (a, mut rx_a) = registry.register(Uuid::new_v4()).await;
        let (b, mut rx_b) = registry.register(Uuid::new_v4()).await;
        registry.join_room(a, room).await;
        registry.join_room(b, room).await;

        registry.broadcast(room, "payload").await;
        assert_eq!(rx_a.recv().await.unwrap(), "payload");
        assert_eq!(rx_b.recv().await.unwrap(), "payload");
    }

    #[tokio::test]
    async fn leave_room_stops_delivery() {
        let registry = ConnectionRegistry::new();
        let room = RoomId::Conversation(Uuid::new_v4());
        let (id, mut rx) = registry.register(Uuid::new_v4()).await;
        registry.join_room(id, room).await;
        registry.leave_room(id, room).await;

        registry.broadcast(room, "gone").await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unregister_reports_last_connection() {
        let registry = ConnectionRegistry::new();
        let user = Uuid::new_v4();
        let (first, _rx1) = registry.register(user).await;
        let (second, _rx2) = registry.register(user).await;

        assert!(!registry.unregister(first).await);
        assert!(registry.unregister(second).await);
        assert_eq!(registry.connection_count(user).await, 0);
    }

    #[test]
    fn channel_names_round_trip() {
        let id = Uuid::new_v4();
        for room in [RoomId::Conversation(id), RoomId::User(id)] {
            assert_eq!(RoomId::parse_channel(&room.channel()), Some(room));
        }
        assert_eq!(RoomId::parse_channel("room:other:abc"), None);
    }
}
