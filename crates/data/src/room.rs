use diesel::prelude::*;
use palaver_core::message::RoomSummary;
use palaver_core::{RoomId, UnixMillis, UserId};

use crate::schema::*;
use crate::{DataResult, connect};

#[derive(Identifiable, Insertable, Queryable, Debug, Clone)]
#[diesel(table_name = rooms)]
pub struct DbRoom {
    pub id: RoomId,
    pub name: String,
    pub description: Option<String>,
    pub is_private: bool,
    pub passcode_hash: Option<String>,
    pub created_by: UserId,
    pub created_at: UnixMillis,
}

impl DbRoom {
    pub fn to_summary(&self) -> RoomSummary {
        RoomSummary {
            id: self.id,
            name: self.name.clone(),
            description: self.description.clone(),
            is_private: self.is_private,
            created_at: self.created_at,
        }
    }
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = rooms)]
pub struct NewDbRoom {
    pub id: RoomId,
    pub name: String,
    pub description: Option<String>,
    pub is_private: bool,
    pub passcode_hash: Option<String>,
    pub created_by: UserId,
    pub created_at: UnixMillis,
}

#[derive(Identifiable, Insertable, Queryable, Debug, Clone)]
#[diesel(table_name = room_memberships, primary_key(user_id, room_id))]
pub struct DbMembership {
    pub user_id: UserId,
    pub room_id: RoomId,
    pub joined_at: UnixMillis,
    pub is_active: bool,
}

pub fn create_room(new_room: NewDbRoom) -> DataResult<DbRoom> {
    diesel::insert_into(rooms::table)
        .values(&new_room)
        .get_result(&mut connect()?)
        .map_err(Into::into)
}

pub fn room_by_id(room_id: RoomId) -> DataResult<Option<DbRoom>> {
    rooms::table
        .find(room_id)
        .first::<DbRoom>(&mut connect()?)
        .optional()
        .map_err(Into::into)
}

pub fn room_name_taken(name: &str) -> DataResult<bool> {
    diesel_exists!(rooms::table.filter(rooms::name.eq(name)), &mut connect()?).map_err(Into::into)
}

pub fn public_rooms() -> DataResult<Vec<DbRoom>> {
    rooms::table
        .filter(rooms::is_private.eq(false))
        .order(rooms::created_at.desc())
        .load::<DbRoom>(&mut connect()?)
        .map_err(Into::into)
}

/// Rooms the user is an active member of, most recently joined first.
pub fn rooms_for_user(user_id: UserId) -> DataResult<Vec<DbRoom>> {
    room_memberships::table
        .inner_join(rooms::table)
        .filter(room_memberships::user_id.eq(user_id))
        .filter(room_memberships::is_active.eq(true))
        .order(room_memberships::joined_at.desc())
        .select(rooms::all_columns)
        .load::<DbRoom>(&mut connect()?)
        .map_err(Into::into)
}

/// Activates the membership, creating it on first join. A re-join flips the
/// row back to active and refreshes `joined_at`; the history row is never
/// deleted. Returns `true` when the membership was newly activated, which is
/// what gates the system join message and the `user_joined` broadcast.
pub fn upsert_membership(user_id: UserId, room_id: RoomId, now: UnixMillis) -> DataResult<bool> {
    let was_active = diesel_exists!(
        room_memberships::table
            .filter(room_memberships::user_id.eq(user_id))
            .filter(room_memberships::room_id.eq(room_id))
            .filter(room_memberships::is_active.eq(true)),
        &mut connect()?
    )?;

    diesel::insert_into(room_memberships::table)
        .values(&DbMembership {
            user_id,
            room_id,
            joined_at: now,
            is_active: true,
        })
        .on_conflict((room_memberships::user_id, room_memberships::room_id))
        .do_update()
        .set((
            room_memberships::is_active.eq(true),
            room_memberships::joined_at.eq(now),
        ))
        .execute(&mut connect()?)?;

    Ok(!was_active)
}

/// Soft delete: the membership row stays so history survives a leave.
pub fn deactivate_membership(user_id: UserId, room_id: RoomId) -> DataResult<()> {
    diesel::update(
        room_memberships::table
            .filter(room_memberships::user_id.eq(user_id))
            .filter(room_memberships::room_id.eq(room_id)),
    )
    .set(room_memberships::is_active.eq(false))
    .execute(&mut connect()?)?;
    Ok(())
}

pub fn is_active_member(user_id: UserId, room_id: RoomId) -> DataResult<bool> {
    diesel_exists!(
        room_memberships::table
            .filter(room_memberships::user_id.eq(user_id))
            .filter(room_memberships::room_id.eq(room_id))
            .filter(room_memberships::is_active.eq(true)),
        &mut connect()?
    )
    .map_err(Into::into)
}

/// The rooms a user currently belongs to. This is the authoritative source
/// the presence engine recomputes from; the cached set in the fast store is
/// only a fan-out shortcut.
pub fn active_room_ids(user_id: UserId) -> DataResult<Vec<RoomId>> {
    room_memberships::table
        .filter(room_memberships::user_id.eq(user_id))
        .filter(room_memberships::is_active.eq(true))
        .select(room_memberships::room_id)
        .load::<RoomId>(&mut connect()?)
        .map_err(Into::into)
}

pub fn active_member_ids(room_id: RoomId) -> DataResult<Vec<UserId>> {
    room_memberships::table
        .filter(room_memberships::room_id.eq(room_id))
        .filter(room_memberships::is_active.eq(true))
        .select(room_memberships::user_id)
        .load::<UserId>(&mut connect()?)
        .map_err(Into::into)
}
