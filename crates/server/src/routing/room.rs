use diesel::result::DatabaseErrorKind;
use palaver_core::events::{RoomUpdateType, ServerEvent};
use palaver_core::message::{MessageKind, RoomSummary};
use palaver_core::{ChatError, RoomId, UnixMillis};
use palaver_data::DataError;
use palaver_data::room::NewDbRoom;
use salvo::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::hoops::DepotExt;
use crate::state::AppState;
use crate::{AppError, JsonResult, json_ok};

#[derive(Debug, Deserialize)]
pub struct CreateRoomReqBody {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub is_private: bool,
    #[serde(default)]
    pub passcode: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct JoinRoomReqBody {
    pub room_id: RoomId,
    #[serde(default)]
    pub passcode: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RoomResBody {
    pub room: RoomSummary,
}

#[derive(Debug, Serialize)]
pub struct RoomsResBody {
    pub rooms: Vec<RoomSummary>,
}

#[derive(Debug, Serialize)]
pub struct EmptyResBody {}

// #GET /rooms/public
#[handler]
pub async fn public_rooms() -> JsonResult<RoomsResBody> {
    let rooms = palaver_data::room::public_rooms()?
        .iter()
        .map(|r| r.to_summary())
        .collect();
    json_ok(RoomsResBody { rooms })
}

// #GET /rooms/my-rooms
#[handler]
pub async fn my_rooms(depot: &mut Depot) -> JsonResult<RoomsResBody> {
    let user = depot.authed_user()?;
    let rooms = palaver_data::room::rooms_for_user(user.id)?
        .iter()
        .map(|r| r.to_summary())
        .collect();
    json_ok(RoomsResBody { rooms })
}

// #POST /rooms/create
/// Creates the room and joins the creator to it. A private room must carry a
/// passcode; its hash uses the same primitive as user credentials.
#[handler]
pub async fn create(req: &mut Request, depot: &mut Depot) -> JsonResult<RoomResBody> {
    let state = obtain_state(depot)?;
    let user = depot.authed_user()?.clone();
    let body: CreateRoomReqBody = req
        .parse_json()
        .await
        .map_err(|_| ChatError::validation("Malformed JSON body."))?;

    let name = body.name.trim().to_owned();
    if name.is_empty() || name.len() > 64 {
        return Err(ChatError::validation("Room name must be between 1 and 64 characters.").into());
    }
    let passcode = body.passcode.as_deref().filter(|p| !p.is_empty());
    if body.is_private && passcode.is_none() {
        return Err(ChatError::validation("Private rooms require a passcode.").into());
    }
    if palaver_data::room::room_name_taken(&name)? {
        return Err(ChatError::duplicate_room_name("A room with this name already exists.").into());
    }

    let passcode_hash = passcode
        .map(|p| bcrypt::hash(p, bcrypt::DEFAULT_COST))
        .transpose()?;
    let room = match palaver_data::room::create_room(NewDbRoom {
        id: Uuid::new_v4(),
        name,
        description: body.description.filter(|d| !d.trim().is_empty()),
        is_private: body.is_private,
        passcode_hash,
        created_by: user.id,
        created_at: UnixMillis::now(),
    }) {
        Ok(room) => room,
        // two creators racing past the pre-check land on the unique index
        Err(DataError::Diesel(diesel::result::Error::DatabaseError(
            DatabaseErrorKind::UniqueViolation,
            _,
        ))) => {
            return Err(ChatError::duplicate_room_name("A room with this name already exists.").into());
        }
        Err(e) => return Err(e.into()),
    };

    palaver_data::room::upsert_membership(user.id, room.id, UnixMillis::now())?;
    state.kv.add_room_member(room.id, user.id).await?;
    info!(room_id = %room.id, user_id = %user.id, "room created");
    json_ok(RoomResBody {
        room: room.to_summary(),
    })
}

// #POST /rooms/join
/// The join flow: membership checks, the passcode gate for private rooms,
/// and the join announcement when a membership is newly activated. Re-joins
/// are idempotent and announce nothing.
#[handler]
pub async fn join(req: &mut Request, depot: &mut Depot) -> JsonResult<RoomResBody> {
    let state = obtain_state(depot)?;
    let user = depot.authed_user()?.clone();
    let body: JoinRoomReqBody = req
        .parse_json()
        .await
        .map_err(|_| ChatError::validation("Malformed JSON body."))?;

    let room = palaver_data::room::room_by_id(body.room_id)?
        .ok_or_else(|| ChatError::not_found("Room not found."))?;

    if room.is_private {
        let passcode = body
            .passcode
            .as_deref()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| ChatError::passcode_required("This room requires a passcode."))?;
        let hash = room
            .passcode_hash
            .as_deref()
            .ok_or_else(|| AppError::internal("private room has no passcode hash"))?;
        if !bcrypt::verify(passcode, hash)? {
            return Err(ChatError::invalid_passcode("Incorrect passcode.").into());
        }
    }

    let newly_joined = palaver_data::room::upsert_membership(user.id, room.id, UnixMillis::now())?;
    state.kv.add_room_member(room.id, user.id).await?;

    if newly_joined {
        announce_join(&state, room.id, &user.username).await;
    }
    json_ok(RoomResBody {
        room: room.to_summary(),
    })
}

// #POST /rooms/{room_id}/leave
#[handler]
pub async fn leave(req: &mut Request, depot: &mut Depot) -> JsonResult<EmptyResBody> {
    let state = obtain_state(depot)?;
    let user = depot.authed_user()?.clone();
    let room_id: RoomId = req
        .param("room_id")
        .ok_or_else(|| ChatError::validation("Invalid room id."))?;

    palaver_data::room::room_by_id(room_id)?.ok_or_else(|| ChatError::not_found("Room not found."))?;
    if !palaver_data::room::is_active_member(user.id, room_id)? {
        return Err(ChatError::forbidden("You are not a member of this room.").into());
    }

    palaver_data::room::deactivate_membership(user.id, room_id)?;
    state.kv.remove_room_member(room_id, user.id).await?;
    if state.config.cache.purge_on_leave {
        if let Err(e) = state.pipeline.purge_user_from_cache(room_id, user.id).await {
            warn!(%room_id, user_id = %user.id, error = %e, "cache purge on leave failed");
        }
    }

    announce_leave(&state, room_id, &user.username).await;
    json_ok(EmptyResBody {})
}

/// System join message plus the `user_joined` broadcast. Failures are logged
/// and never cascade: the membership change already committed.
pub async fn announce_join(state: &AppState, room_id: RoomId, username: &str) {
    let content = format!("{username} joined the room");
    if let Err(e) = state
        .pipeline
        .create(room_id, None, content, MessageKind::System)
        .await
    {
        error!(%room_id, error = %e, "system join message failed");
    }
    broadcast_presences(state, room_id, RoomUpdateType::UserJoined).await;
}

/// Mirror of [`announce_join`] for leaves.
pub async fn announce_leave(state: &AppState, room_id: RoomId, username: &str) {
    let content = format!("{username} left the room");
    if let Err(e) = state
        .pipeline
        .create(room_id, None, content, MessageKind::System)
        .await
    {
        error!(%room_id, error = %e, "system leave message failed");
    }
    broadcast_presences(state, room_id, RoomUpdateType::UserLeft).await;
}

async fn broadcast_presences(state: &AppState, room_id: RoomId, update_type: RoomUpdateType) {
    match state.presence.snapshot(room_id).await {
        Ok(presences) => {
            if let Err(e) = state
                .bus
                .publish(
                    room_id,
                    ServerEvent::presence_update(update_type, room_id, presences),
                    None,
                )
                .await
            {
                warn!(%room_id, ?update_type, error = %e, "presence broadcast failed");
            }
        }
        Err(e) => warn!(%room_id, ?update_type, error = %e, "presence snapshot failed"),
    }
}

fn obtain_state(depot: &Depot) -> Result<AppState, AppError> {
    depot
        .obtain::<AppState>()
        .map(Clone::clone)
        .map_err(|_| AppError::internal("app state missing from depot"))
}
