//! The fan-out router: per-socket sessions, event dispatch, and room-scoped
//! emits.
//!
//! Events on one socket are handled serially, each under the configured
//! deadline. Any handler error is caught here, logged with its correlation
//! ids, and answered with a single `error` event to the originating socket —
//! a failed command never turns into a broadcast.

mod registry;

pub use registry::{SocketId, SocketRegistry};

use futures_util::{SinkExt, StreamExt};
use palaver_core::events::{ClientEvent, RoomUpdateType, ServerEvent};
use palaver_core::message::MessageKind;
use palaver_core::{ChatError, MessageId, RoomId, UnixMillis};
use salvo::prelude::*;
use salvo::websocket::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use uuid::Uuid;

use crate::AppResult;
use crate::hoops::{AuthedUser, DepotExt};
use crate::routing::room::{announce_join, announce_leave};
use crate::state::AppState;

const DEFAULT_PAGE_SIZE: i64 = 50;

#[handler]
pub async fn connect(req: &mut Request, res: &mut Response, depot: &mut Depot) -> Result<(), StatusError> {
    let state = depot
        .obtain::<AppState>()
        .ok()
        .cloned()
        .ok_or_else(StatusError::internal_server_error)?;
    let user = depot
        .authed_user()
        .map_err(|_| StatusError::unauthorized())?
        .clone();

    WebSocketUpgrade::new()
        .upgrade(req, res, move |ws| serve_socket(ws, state, user))
        .await
}

async fn serve_socket(ws: WebSocket, state: AppState, user: AuthedUser) {
    let socket_id = Uuid::new_v4();
    info!(%socket_id, user_id = %user.id, username = %user.username, "socket connected");

    let (mut ws_tx, mut ws_rx) = ws.split();
    let (tx, rx) = mpsc::unbounded_channel::<String>();
    let mut rx = UnboundedReceiverStream::new(rx);
    let send_task = tokio::spawn(async move {
        while let Some(frame) = rx.next().await {
            if ws_tx.send(WsMessage::text(frame)).await.is_err() {
                break;
            }
        }
    });

    state.registry.register(socket_id, tx);
    let session = Session {
        socket_id,
        user,
        state,
    };
    session.on_connect().await;

    while let Some(result) = ws_rx.next().await {
        let msg = match result {
            Ok(msg) => msg,
            Err(e) => {
                debug!(%socket_id, error = %e, "socket read failed");
                break;
            }
        };
        if msg.is_close() {
            break;
        }
        // non-text frames (pings are answered by the library) are ignored
        let Some(frame) = msg.as_str().ok() else { continue };
        session.handle_frame(frame).await;
    }

    session.on_disconnect().await;
    session.state.registry.unregister(socket_id);
    send_task.abort();
    info!(%socket_id, user_id = %session.user.id, "socket disconnected");
}

struct Session {
    socket_id: SocketId,
    user: AuthedUser,
    state: AppState,
}

impl Session {
    fn reply(&self, event: &ServerEvent) {
        self.state.registry.send_to(self.socket_id, event);
    }

    /// Parses and dispatches one frame under the per-event deadline,
    /// translating every failure into one `error` reply.
    async fn handle_frame(&self, frame: &str) {
        let event: ClientEvent = match serde_json::from_str(frame) {
            Ok(event) => event,
            Err(e) => {
                debug!(socket_id = %self.socket_id, user_id = %self.user.id, error = %e, "unparseable client event");
                self.reply(&ServerEvent::error(&ChatError::validation(
                    "Unrecognized or malformed event.",
                )));
                return;
            }
        };

        let event_name = event.name();
        let deadline = std::time::Duration::from_millis(self.state.config.event_timeout);
        match tokio::time::timeout(deadline, self.dispatch(event)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!(
                    socket_id = %self.socket_id,
                    user_id = %self.user.id,
                    event = event_name,
                    error = %e,
                    "event handler failed"
                );
                self.reply(&ServerEvent::error(&e.to_chat_error()));
            }
            Err(_) => {
                warn!(
                    socket_id = %self.socket_id,
                    user_id = %self.user.id,
                    event = event_name,
                    "event handler exceeded deadline"
                );
                self.reply(&ServerEvent::error(&ChatError::server_error(
                    "Request timed out.",
                )));
            }
        }
    }

    async fn dispatch(&self, event: ClientEvent) -> AppResult<()> {
        match event {
            ClientEvent::JoinRoom {
                room_id,
                already_joined,
            } => self.join_room(room_id, already_joined).await,
            ClientEvent::LeaveRoom { room_id } => self.leave_room(room_id).await,
            ClientEvent::SendMessage { room_id, content } => {
                self.send_message(room_id, content).await
            }
            ClientEvent::LoadMoreMessages {
                room_id,
                limit,
                before,
            } => self.load_more(room_id, limit, before).await,
            ClientEvent::TypingStart { room_id } => self.typing(room_id, true).await,
            ClientEvent::TypingStop { room_id } => self.typing(room_id, false).await,
            ClientEvent::Heartbeat {} => self.heartbeat().await,
            ClientEvent::GetRoomPresences { room_id } => self.room_presences(room_id).await,
            ClientEvent::GetMyRooms {} => self.my_rooms().await,
        }
    }

    /// Connect bookkeeping: presence online with the DB room set, session
    /// key, and a `user_connected` for every room the user belongs to.
    async fn on_connect(&self) {
        let result: AppResult<()> = async {
            let rooms = palaver_data::room::active_room_ids(self.user.id)?;
            self.state
                .presence
                .mark_online(self.user.id, &self.user.username, rooms.clone())
                .await?;
            self.state.presence.touch(self.user.id).await?;
            self.state
                .kv
                .set_session(self.user.id, self.socket_id, self.state.config.kv.session_ttl)
                .await?;

            for room_id in rooms {
                let presences = self.state.presence.snapshot(room_id).await?;
                if let Err(e) = self
                    .state
                    .bus
                    .publish(
                        room_id,
                        ServerEvent::presence_update(
                            RoomUpdateType::UserConnected,
                            room_id,
                            presences,
                        ),
                        None,
                    )
                    .await
                {
                    warn!(%room_id, error = %e, "user_connected broadcast failed");
                }
            }
            Ok(())
        }
        .await;

        if let Err(e) = result {
            error!(socket_id = %self.socket_id, user_id = %self.user.id, error = %e, "connect bookkeeping failed");
        }
    }

    /// Disconnect mirror. During a shutdown drain the transition is left to
    /// the surviving reapers unless `offline_on_shutdown` says otherwise.
    async fn on_disconnect(&self) {
        if let Err(e) = self.state.kv.delete_session(self.user.id).await {
            warn!(user_id = %self.user.id, error = %e, "session cleanup failed");
        }

        if self.state.is_shutting_down() && !self.state.config.presence.offline_on_shutdown {
            debug!(user_id = %self.user.id, "leaving offline transition to the reaper");
            return;
        }

        match self.state.presence.mark_offline(self.user.id).await {
            Ok(Some(rooms)) => {
                for room_id in rooms {
                    let presences = match self.state.presence.snapshot(room_id).await {
                        Ok(presences) => presences,
                        Err(e) => {
                            warn!(%room_id, error = %e, "snapshot failed on disconnect");
                            continue;
                        }
                    };
                    if let Err(e) = self
                        .state
                        .bus
                        .publish(
                            room_id,
                            ServerEvent::presence_update(
                                RoomUpdateType::UserDisconnected,
                                room_id,
                                presences,
                            ),
                            None,
                        )
                        .await
                    {
                        warn!(%room_id, error = %e, "user_disconnected broadcast failed");
                    }
                }
            }
            Ok(None) => {} // a reaper got there first
            Err(e) => {
                error!(socket_id = %self.socket_id, user_id = %self.user.id, error = %e, "offline transition failed")
            }
        }
    }

    async fn join_room(&self, room_id: RoomId, client_already_joined: bool) -> AppResult<()> {
        let room = palaver_data::room::room_by_id(room_id)?
            .ok_or_else(|| ChatError::not_found("Room not found."))?;

        // the membership upsert decides idempotence; the client flag is
        // advisory only
        let newly_joined = if palaver_data::room::is_active_member(self.user.id, room_id)? {
            false
        } else if room.is_private {
            // passcodes only travel over the REST join flow
            return Err(ChatError::passcode_required("This room requires a passcode.").into());
        } else {
            palaver_data::room::upsert_membership(self.user.id, room_id, UnixMillis::now())?
        };
        if client_already_joined && newly_joined {
            debug!(user_id = %self.user.id, %room_id, "client claimed a membership it did not have");
        }

        self.state.kv.add_room_member(room_id, self.user.id).await?;
        self.state.registry.join(self.socket_id, room_id);

        let rooms = palaver_data::room::active_room_ids(self.user.id)?;
        self.state
            .presence
            .mark_online(self.user.id, &self.user.username, rooms)
            .await?;

        // warm the cache in the background; the join reply never waits on it
        let pipeline = self.state.pipeline.clone();
        tokio::spawn(async move {
            if let Err(e) = pipeline.preload(room_id).await {
                warn!(%room_id, error = %e, "cache preload failed");
            }
        });

        let presences = self.state.presence.snapshot(room_id).await?;
        let page = self.state.pipeline.recent(room_id, DEFAULT_PAGE_SIZE).await?;
        self.reply(&ServerEvent::RoomJoined { room_id, presences });
        self.reply(&ServerEvent::RecentMessages(page));

        if newly_joined {
            announce_join(&self.state, room_id, &self.user.username).await;
        }
        Ok(())
    }

    async fn leave_room(&self, room_id: RoomId) -> AppResult<()> {
        palaver_data::room::room_by_id(room_id)?
            .ok_or_else(|| ChatError::not_found("Room not found."))?;
        if !palaver_data::room::is_active_member(self.user.id, room_id)? {
            return Err(ChatError::forbidden("You are not a member of this room.").into());
        }

        palaver_data::room::deactivate_membership(self.user.id, room_id)?;
        self.state.kv.remove_room_member(room_id, self.user.id).await?;
        self.state.registry.leave(self.socket_id, room_id);
        if self.state.config.cache.purge_on_leave {
            if let Err(e) = self
                .state
                .pipeline
                .purge_user_from_cache(room_id, self.user.id)
                .await
            {
                warn!(%room_id, user_id = %self.user.id, error = %e, "cache purge on leave failed");
            }
        }

        let rooms = palaver_data::room::active_room_ids(self.user.id)?;
        self.state
            .presence
            .mark_online(self.user.id, &self.user.username, rooms)
            .await?;

        self.reply(&ServerEvent::RoomLeft { room_id });
        announce_leave(&self.state, room_id, &self.user.username).await;
        Ok(())
    }

    async fn send_message(&self, room_id: RoomId, content: String) -> AppResult<()> {
        if content.trim().is_empty() {
            return Err(ChatError::validation("Message content must not be empty.").into());
        }

        // member set first, database as the authority behind it
        let is_member = self.state.kv.is_room_member(room_id, self.user.id).await.unwrap_or(false)
            || palaver_data::room::is_active_member(self.user.id, room_id)?;
        if !is_member {
            return Err(ChatError::forbidden("You are not a member of this room.").into());
        }

        self.state
            .presence
            .bump_activity(self.user.id, &self.user.username)
            .await?;
        self.state
            .pipeline
            .create(room_id, Some(self.user.summary()), content, MessageKind::Text)
            .await?;
        Ok(())
    }

    async fn load_more(
        &self,
        room_id: RoomId,
        limit: Option<i64>,
        before: Option<MessageId>,
    ) -> AppResult<()> {
        let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE);
        let page = match before {
            Some(before) => self.state.pipeline.older(room_id, limit, before).await?,
            None => self.state.pipeline.recent(room_id, limit).await?,
        };
        self.reply(&ServerEvent::MoreMessagesLoaded(page));
        Ok(())
    }

    async fn typing(&self, room_id: RoomId, is_typing: bool) -> AppResult<()> {
        if !self.state.registry.is_joined(self.socket_id, room_id) {
            return Ok(());
        }
        if is_typing {
            self.state
                .presence
                .bump_activity(self.user.id, &self.user.username)
                .await?;
        }
        self.state
            .bus
            .publish(
                room_id,
                ServerEvent::UserTyping {
                    user_id: self.user.id,
                    username: self.user.username.clone(),
                    room_id,
                    is_typing,
                },
                Some(self.socket_id),
            )
            .await?;
        Ok(())
    }

    async fn heartbeat(&self) -> AppResult<()> {
        self.state
            .presence
            .bump_activity(self.user.id, &self.user.username)
            .await?;
        self.reply(&ServerEvent::HeartbeatAck {});
        Ok(())
    }

    async fn room_presences(&self, room_id: RoomId) -> AppResult<()> {
        let presences = self.state.presence.snapshot(room_id).await?;
        self.reply(&ServerEvent::RoomPresences { room_id, presences });
        Ok(())
    }

    async fn my_rooms(&self) -> AppResult<()> {
        let rooms = palaver_data::room::rooms_for_user(self.user.id)?
            .iter()
            .map(|r| r.to_summary())
            .collect();
        self.reply(&ServerEvent::MyRooms { rooms });
        Ok(())
    }
}
