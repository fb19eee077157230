//! The socket event vocabulary.
//!
//! Every frame on the wire is a JSON envelope `{"event": <name>, "data":
//! <payload>}`. Client and server events are separate tagged unions so the
//! router can validate payload shape at the boundary instead of poking at
//! dynamic maps.

use serde::{Deserialize, Serialize};

use crate::error::{ChatError, ErrorKind};
use crate::message::{Message, RoomSummary};
use crate::presence::PresenceEntry;
use crate::{MessageId, RoomId, UserId};

/// Events sent by a client over its socket.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    JoinRoom {
        room_id: RoomId,
        #[serde(default)]
        already_joined: bool,
    },
    LeaveRoom {
        room_id: RoomId,
    },
    SendMessage {
        room_id: RoomId,
        content: String,
    },
    LoadMoreMessages {
        room_id: RoomId,
        #[serde(default)]
        limit: Option<i64>,
        #[serde(default)]
        before: Option<MessageId>,
    },
    TypingStart {
        room_id: RoomId,
    },
    TypingStop {
        room_id: RoomId,
    },
    Heartbeat {},
    GetRoomPresences {
        room_id: RoomId,
    },
    GetMyRooms {},
}

impl ClientEvent {
    /// The wire name of the event, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::JoinRoom { .. } => "join_room",
            Self::LeaveRoom { .. } => "leave_room",
            Self::SendMessage { .. } => "send_message",
            Self::LoadMoreMessages { .. } => "load_more_messages",
            Self::TypingStart { .. } => "typing_start",
            Self::TypingStop { .. } => "typing_stop",
            Self::Heartbeat {} => "heartbeat",
            Self::GetRoomPresences { .. } => "get_room_presences",
            Self::GetMyRooms {} => "get_my_rooms",
        }
    }
}

/// The kind of a `room_update` broadcast.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RoomUpdateType {
    NewMessage,
    UserJoined,
    UserLeft,
    UserConnected,
    UserDisconnected,
}

/// A room-scoped broadcast: something changed that every subscriber of the
/// room should see.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct RoomUpdate {
    #[serde(rename = "type")]
    pub update_type: RoomUpdateType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room_id: Option<RoomId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presences: Option<Vec<PresenceEntry>>,
}

/// One page of messages, oldest first, with the cursor for the next older
/// page when there is one.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct MessagePage {
    pub room_id: RoomId,
    pub messages: Vec<Message>,
    pub has_more: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<MessageId>,
}

/// Events sent by the server to a client.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    RoomJoined {
        room_id: RoomId,
        presences: Vec<PresenceEntry>,
    },
    RoomLeft {
        room_id: RoomId,
    },
    RoomUpdate(RoomUpdate),
    RecentMessages(MessagePage),
    MoreMessagesLoaded(MessagePage),
    RoomPresences {
        room_id: RoomId,
        presences: Vec<PresenceEntry>,
    },
    MyRooms {
        rooms: Vec<RoomSummary>,
    },
    UserTyping {
        user_id: UserId,
        username: String,
        room_id: RoomId,
        is_typing: bool,
    },
    HeartbeatAck {},
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<ErrorKind>,
    },
}

impl ServerEvent {
    pub fn error(err: &ChatError) -> Self {
        Self::Error {
            message: err.message.clone(),
            code: Some(err.kind),
        }
    }

    pub fn new_message(room_id: RoomId, message: Message) -> Self {
        Self::RoomUpdate(RoomUpdate {
            update_type: RoomUpdateType::NewMessage,
            room_id: Some(room_id),
            message: Some(message),
            presences: None,
        })
    }

    pub fn presence_update(
        update_type: RoomUpdateType,
        room_id: RoomId,
        presences: Vec<PresenceEntry>,
    ) -> Self {
        Self::RoomUpdate(RoomUpdate {
            update_type,
            room_id: Some(room_id),
            message: None,
            presences: Some(presences),
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use uuid::Uuid;

    use super::{ClientEvent, RoomUpdateType, ServerEvent};
    use crate::error::ChatError;

    #[test]
    fn client_events_parse_from_envelopes() {
        let room_id = Uuid::new_v4();
        let event: ClientEvent = serde_json::from_value(json!({
            "event": "join_room",
            "data": {"room_id": room_id, "already_joined": true},
        }))
        .unwrap();
        assert_eq!(
            event,
            ClientEvent::JoinRoom {
                room_id,
                already_joined: true,
            }
        );

        let event: ClientEvent = serde_json::from_value(json!({
            "event": "heartbeat",
            "data": {},
        }))
        .unwrap();
        assert_eq!(event, ClientEvent::Heartbeat {});
        assert_eq!(event.name(), "heartbeat");
    }

    #[test]
    fn already_joined_defaults_to_false() {
        let room_id = Uuid::new_v4();
        let event: ClientEvent = serde_json::from_value(json!({
            "event": "join_room",
            "data": {"room_id": room_id},
        }))
        .unwrap();
        assert_eq!(
            event,
            ClientEvent::JoinRoom {
                room_id,
                already_joined: false,
            }
        );
    }

    #[test]
    fn load_more_tolerates_missing_paging_fields() {
        let room_id = Uuid::new_v4();
        let event: ClientEvent = serde_json::from_value(json!({
            "event": "load_more_messages",
            "data": {"room_id": room_id},
        }))
        .unwrap();
        assert_eq!(
            event,
            ClientEvent::LoadMoreMessages {
                room_id,
                limit: None,
                before: None,
            }
        );
    }

    #[test]
    fn server_events_round_trip() {
        let room_id = Uuid::new_v4();
        let event = ServerEvent::presence_update(RoomUpdateType::UserDisconnected, room_id, vec![]);
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event\":\"room_update\""));
        assert!(json.contains("\"type\":\"user_disconnected\""));
        let back: ServerEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn error_event_carries_the_code() {
        let event = ServerEvent::error(&ChatError::invalid_passcode("Incorrect passcode."));
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "error");
        assert_eq!(value["data"]["code"], "INVALID_PASSCODE");
        assert_eq!(value["data"]["message"], "Incorrect passcode.");
    }

    #[test]
    fn unknown_event_is_rejected() {
        let result: Result<ClientEvent, _> = serde_json::from_value(json!({
            "event": "self_destruct",
            "data": {},
        }));
        assert!(result.is_err());
    }
}
