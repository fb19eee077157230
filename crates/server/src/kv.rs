//! Typed access to the shared fast store.
//!
//! One multiplexed connection per node serves every command; the bus
//! subscriber holds its own dedicated connection (see `bus`). Keys are
//! grouped by value shape: the per-room recent-message list, the member and
//! online sets, the per-user presence hash, and the short-TTL heartbeat and
//! session keys. Everything here is idempotent except the list push.

use std::collections::HashMap;

use palaver_core::presence::PresenceRecord;
use palaver_core::{RoomId, UnixMillis, UserId};
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use uuid::Uuid;

use crate::AppResult;

pub const ONLINE_USERS_KEY: &str = "online_users";

fn room_messages_key(room_id: RoomId) -> String {
    format!("room:{room_id}:messages")
}
fn room_members_key(room_id: RoomId) -> String {
    format!("room:{room_id}:members")
}
fn presence_key(user_id: UserId) -> String {
    format!("presence:{user_id}")
}
fn heartbeat_key(user_id: UserId) -> String {
    format!("heartbeat:{user_id}")
}
fn session_key(user_id: UserId) -> String {
    format!("session:{user_id}")
}

#[derive(Clone)]
pub struct KvStore {
    conn: MultiplexedConnection,
}

impl KvStore {
    pub async fn connect(url: &str) -> AppResult<Self> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_tokio_connection().await?;
        Ok(Self { conn })
    }

    pub async fn ping(&self) -> AppResult<()> {
        let mut conn = self.conn.clone();
        redis::cmd("PING").query_async::<()>(&mut conn).await?;
        Ok(())
    }

    /// Prepends one serialized message to the room's recent list.
    ///
    /// The push, the trim to `cap`, and the TTL refresh run as a single
    /// transaction: interleaved writers may order their pushes either way,
    /// but the length bound holds.
    pub async fn push_message(
        &self,
        room_id: RoomId,
        payload: &str,
        cap: i64,
        ttl_secs: u64,
    ) -> AppResult<()> {
        let key = room_messages_key(room_id);
        let mut conn = self.conn.clone();
        redis::pipe()
            .atomic()
            .lpush(&key, payload)
            .ignore()
            .ltrim(&key, 0, (cap - 1) as isize)
            .ignore()
            .expire(&key, ttl_secs as i64)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    /// Atomically replaces the room's recent list with `payloads` pushed in
    /// order: chronological input lands newest-first. The leading delete is
    /// what makes concurrent seeds converge instead of interleaving.
    pub async fn seed_messages(
        &self,
        room_id: RoomId,
        payloads: &[String],
        cap: i64,
        ttl_secs: u64,
    ) -> AppResult<()> {
        let key = room_messages_key(room_id);
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.del(&key).ignore();
        for payload in payloads {
            pipe.lpush(&key, payload).ignore();
        }
        pipe.ltrim(&key, 0, (cap - 1) as isize).ignore();
        pipe.expire(&key, ttl_secs as i64).ignore();
        pipe.query_async::<()>(&mut conn).await?;
        Ok(())
    }

    /// The newest `n` serialized messages, newest first.
    pub async fn recent_range(&self, room_id: RoomId, n: i64) -> AppResult<Vec<String>> {
        let mut conn = self.conn.clone();
        Ok(conn.lrange(room_messages_key(room_id), 0, (n - 1).max(0) as isize).await?)
    }

    pub async fn cache_len(&self, room_id: RoomId) -> AppResult<i64> {
        let mut conn = self.conn.clone();
        Ok(conn.llen(room_messages_key(room_id)).await?)
    }

    pub async fn cache_exists(&self, room_id: RoomId) -> AppResult<bool> {
        let mut conn = self.conn.clone();
        Ok(conn.exists(room_messages_key(room_id)).await?)
    }

    pub async fn delete_cache(&self, room_id: RoomId) -> AppResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(room_messages_key(room_id)).await?;
        Ok(())
    }

    pub async fn add_online(&self, user_id: UserId) -> AppResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.sadd(ONLINE_USERS_KEY, user_id.to_string()).await?;
        Ok(())
    }

    /// Removes the user from the online set, reporting whether this caller
    /// actually removed it. The removal is the offline commit point: across
    /// the cluster only one caller sees `true` per transition, and only that
    /// caller may emit the disconnect broadcast.
    pub async fn remove_online(&self, user_id: UserId) -> AppResult<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn.srem(ONLINE_USERS_KEY, user_id.to_string()).await?;
        Ok(removed > 0)
    }

    pub async fn online_users(&self) -> AppResult<Vec<UserId>> {
        let mut conn = self.conn.clone();
        let raw: Vec<String> = conn.smembers(ONLINE_USERS_KEY).await?;
        Ok(parse_members(raw))
    }

    pub async fn add_room_member(&self, room_id: RoomId, user_id: UserId) -> AppResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.sadd(room_members_key(room_id), user_id.to_string()).await?;
        Ok(())
    }

    pub async fn remove_room_member(&self, room_id: RoomId, user_id: UserId) -> AppResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.srem(room_members_key(room_id), user_id.to_string()).await?;
        Ok(())
    }

    pub async fn room_members(&self, room_id: RoomId) -> AppResult<Vec<UserId>> {
        let mut conn = self.conn.clone();
        let raw: Vec<String> = conn.smembers(room_members_key(room_id)).await?;
        Ok(parse_members(raw))
    }

    pub async fn is_room_member(&self, room_id: RoomId, user_id: UserId) -> AppResult<bool> {
        let mut conn = self.conn.clone();
        Ok(conn
            .sismember(room_members_key(room_id), user_id.to_string())
            .await?)
    }

    pub async fn set_presence(&self, user_id: UserId, record: &PresenceRecord) -> AppResult<()> {
        let fields = record.to_fields();
        let mut conn = self.conn.clone();
        let _: () = conn.hset_multiple(presence_key(user_id), &fields).await?;
        Ok(())
    }

    pub async fn get_presence(&self, user_id: UserId) -> AppResult<Option<PresenceRecord>> {
        let mut conn = self.conn.clone();
        let map: HashMap<String, String> = conn.hgetall(presence_key(user_id)).await?;
        if map.is_empty() {
            return Ok(None);
        }
        Ok(Some(PresenceRecord::from_fields(&map)))
    }

    pub async fn set_heartbeat(
        &self,
        user_id: UserId,
        now: UnixMillis,
        ttl_secs: u64,
    ) -> AppResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.set_ex(heartbeat_key(user_id), now.get(), ttl_secs).await?;
        Ok(())
    }

    pub async fn heartbeat(&self, user_id: UserId) -> AppResult<Option<UnixMillis>> {
        let mut conn = self.conn.clone();
        let value: Option<i64> = conn.get(heartbeat_key(user_id)).await?;
        Ok(value.map(UnixMillis))
    }

    pub async fn set_session(
        &self,
        user_id: UserId,
        socket_id: Uuid,
        ttl_secs: u64,
    ) -> AppResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .set_ex(session_key(user_id), socket_id.to_string(), ttl_secs)
            .await?;
        Ok(())
    }

    pub async fn refresh_session(&self, user_id: UserId, ttl_secs: u64) -> AppResult<()> {
        let mut conn = self.conn.clone();
        let _: bool = conn.expire(session_key(user_id), ttl_secs as i64).await?;
        Ok(())
    }

    pub async fn delete_session(&self, user_id: UserId) -> AppResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(session_key(user_id)).await?;
        Ok(())
    }
}

fn parse_members(raw: Vec<String>) -> Vec<UserId> {
    raw.into_iter()
        .filter_map(|s| match Uuid::parse_str(&s) {
            Ok(id) => Some(id),
            Err(_) => {
                tracing::warn!(member = %s, "skipping unparseable set member");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::{heartbeat_key, parse_members, presence_key, room_members_key, room_messages_key, session_key};

    #[test]
    fn key_naming_scheme() {
        let room = Uuid::nil();
        let user = Uuid::nil();
        assert_eq!(
            room_messages_key(room),
            "room:00000000-0000-0000-0000-000000000000:messages"
        );
        assert_eq!(
            room_members_key(room),
            "room:00000000-0000-0000-0000-000000000000:members"
        );
        assert_eq!(presence_key(user), "presence:00000000-0000-0000-0000-000000000000");
        assert_eq!(heartbeat_key(user), "heartbeat:00000000-0000-0000-0000-000000000000");
        assert_eq!(session_key(user), "session:00000000-0000-0000-0000-000000000000");
    }

    #[test]
    fn parse_members_drops_garbage() {
        let id = Uuid::new_v4();
        let parsed = parse_members(vec![id.to_string(), "not-a-uuid".to_owned()]);
        assert_eq!(parsed, vec![id]);
    }
}
