use diesel::prelude::*;
use palaver_core::message::UserSummary;
use palaver_core::{UnixMillis, UserId};

use crate::schema::*;
use crate::{DataResult, connect};

#[derive(Identifiable, Insertable, Queryable, Debug, Clone)]
#[diesel(table_name = users)]
pub struct DbUser {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub created_at: UnixMillis,
}

impl DbUser {
    pub fn summary(&self) -> UserSummary {
        UserSummary {
            id: self.id,
            username: self.username.clone(),
        }
    }
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = users)]
pub struct NewDbUser {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub created_at: UnixMillis,
}

pub fn create_user(new_user: NewDbUser) -> DataResult<DbUser> {
    diesel::insert_into(users::table)
        .values(&new_user)
        .get_result(&mut connect()?)
        .map_err(Into::into)
}

pub fn user_by_id(user_id: UserId) -> DataResult<Option<DbUser>> {
    users::table
        .find(user_id)
        .first::<DbUser>(&mut connect()?)
        .optional()
        .map_err(Into::into)
}

pub fn user_by_username(username: &str) -> DataResult<Option<DbUser>> {
    users::table
        .filter(users::username.eq(username))
        .first::<DbUser>(&mut connect()?)
        .optional()
        .map_err(Into::into)
}

pub fn username_taken(username: &str) -> DataResult<bool> {
    diesel_exists!(
        users::table.filter(users::username.eq(username)),
        &mut connect()?
    )
    .map_err(Into::into)
}

pub fn email_taken(email: &str) -> DataResult<bool> {
    diesel_exists!(users::table.filter(users::email.eq(email)), &mut connect()?).map_err(Into::into)
}

/// Bulk lookup used when rendering message authors and presence snapshots.
pub fn users_by_ids(user_ids: &[UserId]) -> DataResult<Vec<DbUser>> {
    users::table
        .filter(users::id.eq_any(user_ids))
        .load::<DbUser>(&mut connect()?)
        .map_err(Into::into)
}
