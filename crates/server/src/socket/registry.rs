//! Registry of this node's live sockets and their room subscriptions.
//!
//! Maps room ids to the sockets that joined them, with a reverse index for
//! O(rooms-per-socket) cleanup on disconnect. This is purely node-local
//! state: the cross-node picture lives in the shared stores, and the bus
//! delivers into this registry on every node that holds a subscriber.
//!
//! Lock ordering: always acquire `rooms` first, then `socket_rooms`, then
//! `senders` (consistent order to prevent deadlock).

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use palaver_core::RoomId;
use palaver_core::events::ServerEvent;
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

pub type SocketId = Uuid;

#[derive(Default)]
pub struct SocketRegistry {
    /// room id -> sockets subscribed on this node
    rooms: RwLock<HashMap<RoomId, HashSet<SocketId>>>,
    /// socket id -> rooms (reverse index for cleanup)
    socket_rooms: RwLock<HashMap<SocketId, HashSet<RoomId>>>,
    /// socket id -> outbound frame sender
    senders: RwLock<HashMap<SocketId, UnboundedSender<String>>>,
}

impl SocketRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, socket_id: SocketId, sender: UnboundedSender<String>) {
        self.senders
            .write()
            .expect("socket registry lock poisoned")
            .insert(socket_id, sender);
    }

    /// Removes the socket from every room and drops its sender.
    pub fn unregister(&self, socket_id: SocketId) {
        let mut rooms = self.rooms.write().expect("socket registry lock poisoned");
        let mut socket_rooms = self.socket_rooms.write().expect("socket registry lock poisoned");

        if let Some(joined) = socket_rooms.remove(&socket_id) {
            for room_id in joined {
                if let Some(members) = rooms.get_mut(&room_id) {
                    members.remove(&socket_id);
                    if members.is_empty() {
                        rooms.remove(&room_id);
                    }
                }
            }
        }
        drop(socket_rooms);
        drop(rooms);

        self.senders
            .write()
            .expect("socket registry lock poisoned")
            .remove(&socket_id);
    }

    pub fn join(&self, socket_id: SocketId, room_id: RoomId) {
        let mut rooms = self.rooms.write().expect("socket registry lock poisoned");
        let mut socket_rooms = self.socket_rooms.write().expect("socket registry lock poisoned");
        rooms.entry(room_id).or_default().insert(socket_id);
        socket_rooms.entry(socket_id).or_default().insert(room_id);
    }

    pub fn leave(&self, socket_id: SocketId, room_id: RoomId) {
        let mut rooms = self.rooms.write().expect("socket registry lock poisoned");
        let mut socket_rooms = self.socket_rooms.write().expect("socket registry lock poisoned");

        if let Some(members) = rooms.get_mut(&room_id) {
            members.remove(&socket_id);
            if members.is_empty() {
                rooms.remove(&room_id);
            }
        }
        if let Some(joined) = socket_rooms.get_mut(&socket_id) {
            joined.remove(&room_id);
            if joined.is_empty() {
                socket_rooms.remove(&socket_id);
            }
        }
    }

    pub fn is_joined(&self, socket_id: SocketId, room_id: RoomId) -> bool {
        self.rooms
            .read()
            .expect("socket registry lock poisoned")
            .get(&room_id)
            .is_some_and(|members| members.contains(&socket_id))
    }

    /// Sends one event to one socket. Returns false when the socket is gone;
    /// the disconnect path cleans the entry up.
    pub fn send_to(&self, socket_id: SocketId, event: &ServerEvent) -> bool {
        let Ok(frame) = serde_json::to_string(event) else {
            tracing::error!(%socket_id, "failed to serialize server event");
            return false;
        };
        self.senders
            .read()
            .expect("socket registry lock poisoned")
            .get(&socket_id)
            .is_some_and(|sender| sender.send(frame).is_ok())
    }

    /// Fans one event out to every local socket joined to the room,
    /// serializing once. `exclude` skips the originating socket for events
    /// like typing that the sender should not echo.
    pub fn broadcast(&self, room_id: RoomId, event: &ServerEvent, exclude: Option<SocketId>) {
        let frame = match serde_json::to_string(event) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(%room_id, error = %e, "failed to serialize room event");
                return;
            }
        };

        let targets: Vec<SocketId> = {
            let rooms = self.rooms.read().expect("socket registry lock poisoned");
            match rooms.get(&room_id) {
                Some(members) => members
                    .iter()
                    .copied()
                    .filter(|id| Some(*id) != exclude)
                    .collect(),
                None => return,
            }
        };

        let senders = self.senders.read().expect("socket registry lock poisoned");
        for socket_id in targets {
            if let Some(sender) = senders.get(&socket_id) {
                // a full/closed channel means the socket is going away
                sender.send(frame.clone()).ok();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use palaver_core::events::ServerEvent;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    use super::SocketRegistry;

    #[test]
    fn join_leave_round_trip() {
        let registry = SocketRegistry::new();
        let socket = Uuid::new_v4();
        let room = Uuid::new_v4();
        let (tx, _rx) = mpsc::unbounded_channel();
        registry.register(socket, tx);

        registry.join(socket, room);
        assert!(registry.is_joined(socket, room));
        registry.leave(socket, room);
        assert!(!registry.is_joined(socket, room));
    }

    #[test]
    fn broadcast_skips_excluded_socket_and_other_rooms() {
        let registry = SocketRegistry::new();
        let room = Uuid::new_v4();
        let other_room = Uuid::new_v4();

        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        let (tx_c, mut rx_c) = mpsc::unbounded_channel();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        registry.register(a, tx_a);
        registry.register(b, tx_b);
        registry.register(c, tx_c);
        registry.join(a, room);
        registry.join(b, room);
        registry.join(c, other_room);

        let event = ServerEvent::RoomLeft { room_id: room };
        registry.broadcast(room, &event, Some(a));

        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_ok());
        assert!(rx_c.try_recv().is_err());
    }

    #[test]
    fn unregister_cleans_every_room() {
        let registry = SocketRegistry::new();
        let socket = Uuid::new_v4();
        let rooms = [Uuid::new_v4(), Uuid::new_v4()];
        let (tx, _rx) = mpsc::unbounded_channel();
        registry.register(socket, tx);
        for room in rooms {
            registry.join(socket, room);
        }

        registry.unregister(socket);
        for room in rooms {
            assert!(!registry.is_joined(socket, room));
        }
        assert!(!registry.send_to(socket, &ServerEvent::HeartbeatAck {}));
    }
}
