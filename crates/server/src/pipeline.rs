//! The hybrid message pipeline: synchronous durable append, best-effort
//! cache mirror, and a read path that stitches the recent-message cache with
//! the database at a strict `(created_at, id)` boundary.
//!
//! The database row is the commit point. Cache inserts and bus emits that
//! fail are logged and swallowed; the next reader repopulates from the
//! database, and the source of truth never disagrees with itself.

use std::collections::HashMap;
use std::sync::Arc;

use itertools::Itertools;
use palaver_core::events::{MessagePage, ServerEvent};
use palaver_core::message::{Message, MessageKind, UserSummary};
use palaver_core::{MessageId, RoomId, UserId};
use palaver_data::message::{DbMessage, NewDbMessage};

use crate::AppResult;
use crate::bus::Bus;
use crate::config::ServerConfig;
use crate::kv::KvStore;

#[derive(Clone)]
pub struct MessagePipeline {
    kv: KvStore,
    bus: Bus,
    config: Arc<ServerConfig>,
}

impl MessagePipeline {
    pub fn new(kv: KvStore, bus: Bus, config: Arc<ServerConfig>) -> Self {
        Self { kv, bus, config }
    }

    /// Durable write, then cache mirror, then room broadcast. The append
    /// must succeed before anything else happens; the rest is best-effort.
    pub async fn create(
        &self,
        room_id: RoomId,
        author: Option<UserSummary>,
        content: String,
        kind: MessageKind,
    ) -> AppResult<Message> {
        let row = palaver_data::message::create_message(NewDbMessage {
            room_id,
            user_id: author.as_ref().map(|u| u.id),
            content,
            message_type: kind.as_str().to_owned(),
        })?;
        let message = row.to_message(author);

        if let Err(e) = self.cache_push(&message).await {
            warn!(%room_id, error = %e, "recent-cache insert failed");
        }
        if let Err(e) = self
            .bus
            .publish(room_id, ServerEvent::new_message(room_id, message.clone()), None)
            .await
        {
            warn!(%room_id, error = %e, "new_message broadcast failed");
        }
        Ok(message)
    }

    async fn cache_push(&self, message: &Message) -> AppResult<()> {
        let payload = serde_json::to_string(message)?;
        self.kv
            .push_message(
                message.room_id,
                &payload,
                self.config.cache.recent_limit,
                self.config.cache.ttl,
            )
            .await
    }

    /// Up to `limit` newest messages in chronological order, cache-first.
    ///
    /// Reading `limit + 1` everywhere (cache and DB alike) is what decides
    /// `has_more` without a second query; a full page straight from the
    /// cache touches the database only when the cache holds exactly the
    /// page and nothing older.
    pub async fn recent(&self, room_id: RoomId, limit: i64) -> AppResult<MessagePage> {
        let limit = clamp_limit(limit, self.config.cache.recent_limit);

        let cached_raw = match self.kv.recent_range(room_id, limit + 1).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(%room_id, error = %e, "recent-cache read failed, falling back to db");
                vec![]
            }
        };
        let (mut cached, cache_has_more) = split_excess(decode_cached(&cached_raw), limit as usize);
        cached.reverse(); // newest-first -> chronological

        let (messages, has_more) = if cached.is_empty() {
            let rows = palaver_data::message::newest_messages(room_id, limit + 1)?;
            let (rows, has_more) = split_excess(rows, limit as usize);
            let mut messages = attach_authors(rows)?;
            messages.reverse();
            if !messages.is_empty() {
                if let Err(e) = self.seed(room_id, &messages).await {
                    warn!(%room_id, error = %e, "recent-cache seed failed");
                }
            }
            (messages, has_more)
        } else if (cached.len() as i64) < limit {
            // stitch: fetch what the cache is missing, strictly older than
            // the oldest cached entry
            let need = limit - cached.len() as i64;
            let oldest = &cached[0];
            let rows = palaver_data::message::messages_before(
                room_id,
                oldest.created_at,
                oldest.id,
                need + 1,
            )?;
            let (rows, has_more) = split_excess(rows, need as usize);
            let mut messages = attach_authors(rows)?;
            messages.reverse();
            messages.extend(cached);
            (messages, has_more)
        } else {
            let has_more = if cache_has_more {
                true
            } else {
                let oldest = &cached[0];
                !palaver_data::message::messages_before(room_id, oldest.created_at, oldest.id, 1)?
                    .is_empty()
            };
            (cached, has_more)
        };

        let next_cursor = next_cursor(&messages, has_more);
        Ok(MessagePage {
            room_id,
            messages,
            has_more,
            next_cursor,
        })
    }

    /// One older page, cache bypassed: the `limit` newest rows strictly
    /// older than the cursor message, chronological. An unknown cursor (or
    /// one belonging to another room) reads as an empty page.
    pub async fn older(&self, room_id: RoomId, limit: i64, before: MessageId) -> AppResult<MessagePage> {
        let limit = clamp_limit(limit, self.config.cache.recent_limit);

        let anchor = match palaver_data::message::message_by_id(before)? {
            Some(anchor) if anchor.room_id == room_id => anchor,
            _ => {
                return Ok(MessagePage {
                    room_id,
                    messages: vec![],
                    has_more: false,
                    next_cursor: None,
                });
            }
        };

        let rows = palaver_data::message::messages_before(
            room_id,
            anchor.created_at,
            anchor.id,
            limit + 1,
        )?;
        let (rows, has_more) = split_excess(rows, limit as usize);
        let mut messages = attach_authors(rows)?;
        messages.reverse();

        let next_cursor = next_cursor(&messages, has_more);
        Ok(MessagePage {
            room_id,
            messages,
            has_more,
            next_cursor,
        })
    }

    /// First-join cache warm: when the room has no cache key, load the
    /// newest rows and seed. Callers spawn this; a join response never waits
    /// on it.
    pub async fn preload(&self, room_id: RoomId) -> AppResult<()> {
        if self.kv.cache_exists(room_id).await? {
            return Ok(());
        }
        let rows =
            palaver_data::message::newest_messages(room_id, self.config.cache.recent_limit)?;
        if rows.is_empty() {
            return Ok(());
        }
        let mut messages = attach_authors(rows)?;
        messages.reverse();
        self.seed(room_id, &messages).await
    }

    async fn seed(&self, room_id: RoomId, chronological: &[Message]) -> AppResult<()> {
        let payloads = chronological
            .iter()
            .map(serde_json::to_string)
            .collect::<Result<Vec<_>, _>>()?;
        self.kv
            .seed_messages(
                room_id,
                &payloads,
                self.config.cache.recent_limit,
                self.config.cache.ttl,
            )
            .await
    }

    /// Rewrites the room's cache without the given user's messages. Only
    /// runs when the `purge_on_leave` policy is enabled.
    pub async fn purge_user_from_cache(&self, room_id: RoomId, user_id: UserId) -> AppResult<()> {
        if self.kv.cache_len(room_id).await? == 0 {
            return Ok(());
        }
        let raw = self
            .kv
            .recent_range(room_id, self.config.cache.recent_limit)
            .await?;
        let mut kept = decode_cached(&raw);
        kept.retain(|m| m.user.as_ref().map(|u| u.id) != Some(user_id));
        if kept.is_empty() {
            return self.kv.delete_cache(room_id).await;
        }
        kept.reverse();
        self.seed(room_id, &kept).await
    }
}

fn clamp_limit(limit: i64, max: i64) -> i64 {
    limit.clamp(1, max)
}

/// Cached entries are serialized wire messages; a corrupt entry is dropped
/// rather than failing the read.
fn decode_cached(raw: &[String]) -> Vec<Message> {
    raw.iter()
        .filter_map(|payload| match serde_json::from_str(payload) {
            Ok(message) => Some(message),
            Err(e) => {
                warn!(error = %e, "dropping corrupt cache entry");
                None
            }
        })
        .collect()
}

/// Fetch-N+1: drop the probe element and report whether anything was beyond
/// the page.
fn split_excess<T>(mut rows: Vec<T>, limit: usize) -> (Vec<T>, bool) {
    let has_more = rows.len() > limit;
    rows.truncate(limit);
    (rows, has_more)
}

/// The cursor is the id of the oldest message returned, present only when an
/// older page exists.
fn next_cursor(chronological: &[Message], has_more: bool) -> Option<MessageId> {
    if has_more {
        chronological.first().map(|m| m.id)
    } else {
        None
    }
}

/// Resolves message authors in one query over the distinct author ids.
fn attach_authors(rows: Vec<DbMessage>) -> AppResult<Vec<Message>> {
    let author_ids: Vec<UserId> = rows.iter().filter_map(|r| r.user_id).unique().collect();
    let authors: HashMap<UserId, UserSummary> = if author_ids.is_empty() {
        HashMap::new()
    } else {
        palaver_data::user::users_by_ids(&author_ids)?
            .into_iter()
            .map(|u| (u.id, u.summary()))
            .collect()
    };
    Ok(rows
        .into_iter()
        .map(|row| {
            let user = row.user_id.and_then(|id| authors.get(&id).cloned());
            row.to_message(user)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use palaver_core::UnixMillis;
    use palaver_core::message::{Message, MessageKind};
    use uuid::Uuid;

    use super::{clamp_limit, decode_cached, next_cursor, split_excess};

    fn message(id: i64) -> Message {
        Message {
            id,
            room_id: Uuid::nil(),
            user: None,
            content: format!("message {id}"),
            kind: MessageKind::Text,
            created_at: UnixMillis(id * 1_000),
        }
    }

    #[test]
    fn split_excess_detects_the_probe_row() {
        let (rows, has_more) = split_excess(vec![1, 2, 3], 2);
        assert_eq!(rows, vec![1, 2]);
        assert!(has_more);

        let (rows, has_more) = split_excess(vec![1, 2], 2);
        assert_eq!(rows, vec![1, 2]);
        assert!(!has_more);

        let (rows, has_more) = split_excess(Vec::<i64>::new(), 2);
        assert!(rows.is_empty());
        assert!(!has_more);
    }

    #[test]
    fn next_cursor_is_the_oldest_returned_id() {
        let page = vec![message(5), message(6), message(7)];
        assert_eq!(next_cursor(&page, true), Some(5));
        assert_eq!(next_cursor(&page, false), None);
        assert_eq!(next_cursor(&[], true), None);
    }

    #[test]
    fn decode_cached_drops_corrupt_entries() {
        let good = serde_json::to_string(&message(1)).unwrap();
        let raw = vec![good, "{half a message".to_owned()];
        let decoded = decode_cached(&raw);
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].id, 1);
    }

    #[test]
    fn limits_are_clamped_to_the_cache_bound() {
        assert_eq!(clamp_limit(50, 100), 50);
        assert_eq!(clamp_limit(0, 100), 1);
        assert_eq!(clamp_limit(-3, 100), 1);
        assert_eq!(clamp_limit(500, 100), 100);
    }
}
