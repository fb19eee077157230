//! Cross-node fan-out over the shared message bus.
//!
//! Each room is a topic (`room:{id}`). Publishing a room-scoped event reaches
//! every node that holds a subscriber, including the publishing node itself,
//! so local and remote delivery share one path: publish, then let the
//! subscriber task hand the event to the local socket registry. Delivery is
//! best-effort and at-most-once; the router never retries a lost broadcast.

use std::sync::Arc;

use futures_util::StreamExt;
use palaver_core::RoomId;
use palaver_core::events::ServerEvent;
use redis::aio::MultiplexedConnection;
use serde::{Deserialize, Serialize};

use crate::AppResult;
use crate::socket::{SocketId, SocketRegistry};

pub const ROOM_TOPIC_PATTERN: &str = "room:*";

fn room_topic(room_id: RoomId) -> String {
    format!("room:{room_id}")
}

/// What actually travels over the bus: the event plus enough routing
/// information for the receiving node to deliver it.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BusEnvelope {
    pub room_id: RoomId,
    pub event: ServerEvent,
    /// Set for events the originating socket must not receive back, e.g.
    /// typing signals.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude_socket: Option<SocketId>,
}

#[derive(Clone)]
pub struct Bus {
    conn: MultiplexedConnection,
}

impl Bus {
    pub async fn connect(url: &str) -> AppResult<Self> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_tokio_connection().await?;
        Ok(Self { conn })
    }

    /// Publishes one event to a room topic. Errors surface to the caller,
    /// which decides whether the operation as a whole still succeeded —
    /// losing a transient fan-out beats re-delivery.
    pub async fn publish(
        &self,
        room_id: RoomId,
        event: ServerEvent,
        exclude_socket: Option<SocketId>,
    ) -> AppResult<()> {
        let envelope = BusEnvelope {
            room_id,
            event,
            exclude_socket,
        };
        let payload = serde_json::to_string(&envelope)?;
        let mut conn = self.conn.clone();
        redis::cmd("PUBLISH")
            .arg(room_topic(room_id))
            .arg(payload)
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }
}

/// Long-lived subscriber task: one dedicated connection per node, pattern
/// subscribed to every room topic, delivering into the local registry.
/// Malformed payloads are dropped with a warning; at-most-once means a
/// poisoned frame never wedges the loop.
pub async fn subscribe(client: redis::Client, registry: Arc<SocketRegistry>) -> AppResult<()> {
    let mut pubsub = client.get_async_pubsub().await?;
    pubsub.psubscribe(ROOM_TOPIC_PATTERN).await?;
    tracing::info!(pattern = ROOM_TOPIC_PATTERN, "bus subscriber started");

    let mut stream = pubsub.on_message();
    while let Some(msg) = stream.next().await {
        let payload: String = match msg.get_payload() {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(error = %e, "undecodable bus payload");
                continue;
            }
        };
        let envelope: BusEnvelope = match serde_json::from_str(&payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(error = %e, channel = msg.get_channel_name(), "malformed bus envelope");
                continue;
            }
        };
        registry.broadcast(envelope.room_id, &envelope.event, envelope.exclude_socket);
    }

    tracing::warn!("bus subscriber stream ended");
    Ok(())
}

#[cfg(test)]
mod tests {
    use palaver_core::events::ServerEvent;
    use uuid::Uuid;

    use super::{BusEnvelope, room_topic};

    #[test]
    fn topic_is_keyed_on_room_id() {
        let room = Uuid::nil();
        assert_eq!(room_topic(room), "room:00000000-0000-0000-0000-000000000000");
    }

    #[test]
    fn envelope_round_trips() {
        let room = Uuid::new_v4();
        let socket = Uuid::new_v4();
        let envelope = BusEnvelope {
            room_id: room,
            event: ServerEvent::UserTyping {
                user_id: Uuid::new_v4(),
                username: "carol".to_owned(),
                room_id: room,
                is_typing: true,
            },
            exclude_socket: Some(socket),
        };
        let json = serde_json::to_string(&envelope).unwrap();
        let back: BusEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(back.room_id, room);
        assert_eq!(back.exclude_socket, Some(socket));
        assert_eq!(back.event, envelope.event);
    }

    #[test]
    fn exclude_socket_is_omitted_when_absent() {
        let envelope = BusEnvelope {
            room_id: Uuid::new_v4(),
            event: ServerEvent::HeartbeatAck {},
            exclude_socket: None,
        };
        let json = serde_json::to_string(&envelope).unwrap();
        assert!(!json.contains("exclude_socket"));
    }
}
