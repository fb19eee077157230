use diesel::prelude::*;
use palaver_core::message::{Message, MessageKind, UserSummary};
use palaver_core::{MessageId, RoomId, UnixMillis, UserId};

use crate::schema::*;
use crate::{DataResult, connect};

#[derive(Identifiable, Queryable, Debug, Clone)]
#[diesel(table_name = messages)]
pub struct DbMessage {
    pub id: MessageId,
    pub room_id: RoomId,
    pub user_id: Option<UserId>,
    pub content: String,
    pub message_type: String,
    pub created_at: UnixMillis,
}

impl DbMessage {
    pub fn kind(&self) -> MessageKind {
        MessageKind::from_str(&self.message_type).unwrap_or(MessageKind::Text)
    }

    pub fn to_message(&self, user: Option<UserSummary>) -> Message {
        Message {
            id: self.id,
            room_id: self.room_id,
            user,
            content: self.content.clone(),
            kind: self.kind(),
            created_at: self.created_at,
        }
    }
}

/// `id` and `created_at` are assigned by the database; the returned row is
/// the canonical message.
#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = messages)]
pub struct NewDbMessage {
    pub room_id: RoomId,
    pub user_id: Option<UserId>,
    pub content: String,
    pub message_type: String,
}

pub fn create_message(new_message: NewDbMessage) -> DataResult<DbMessage> {
    diesel::insert_into(messages::table)
        .values(&new_message)
        .get_result(&mut connect()?)
        .map_err(Into::into)
}

pub fn message_by_id(message_id: MessageId) -> DataResult<Option<DbMessage>> {
    messages::table
        .find(message_id)
        .first::<DbMessage>(&mut connect()?)
        .optional()
        .map_err(Into::into)
}

/// The newest `limit` messages of a room, newest first.
pub fn newest_messages(room_id: RoomId, limit: i64) -> DataResult<Vec<DbMessage>> {
    messages::table
        .filter(messages::room_id.eq(room_id))
        .order((messages::created_at.desc(), messages::id.desc()))
        .limit(limit)
        .load::<DbMessage>(&mut connect()?)
        .map_err(Into::into)
}

/// Messages strictly older than the `(created_at, id)` boundary, newest
/// first. Timestamps are only non-decreasing (DB-assigned `now()`), so the id
/// breaks ties; the strict boundary is what keeps stitched pages free of
/// duplicates.
pub fn messages_before(
    room_id: RoomId,
    before_ts: UnixMillis,
    before_id: MessageId,
    limit: i64,
) -> DataResult<Vec<DbMessage>> {
    messages::table
        .filter(messages::room_id.eq(room_id))
        .filter(
            messages::created_at.lt(before_ts).or(messages::created_at
                .eq(before_ts)
                .and(messages::id.lt(before_id))),
        )
        .order((messages::created_at.desc(), messages::id.desc()))
        .limit(limit)
        .load::<DbMessage>(&mut connect()?)
        .map_err(Into::into)
}
