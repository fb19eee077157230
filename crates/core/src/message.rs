//! Message and room shapes shared between the wire protocol and the server.

use serde::{Deserialize, Serialize};

use crate::{MessageId, RoomId, UnixMillis, UserId};

/// The kind of a message: authored text or a server-generated notice.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    System,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::System => "system",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "text" => Some(Self::Text),
            "system" => Some(Self::System),
            _ => None,
        }
    }
}

/// The author of a message, as rendered to clients.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct UserSummary {
    pub id: UserId,
    pub username: String,
}

/// A message as delivered over the wire.
///
/// `user` is absent for system messages. `created_at` is the server-assigned
/// timestamp; ordering within a room is `(created_at, id)`.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub room_id: RoomId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<UserSummary>,
    pub content: String,
    pub kind: MessageKind,
    pub created_at: UnixMillis,
}

/// A room as listed by the REST surface and `my_rooms`.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct RoomSummary {
    pub id: RoomId,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub is_private: bool,
    pub created_at: UnixMillis,
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use uuid::Uuid;

    use super::{Message, MessageKind, UserSummary};
    use crate::UnixMillis;

    #[test]
    fn message_round_trip_preserves_all_fields() {
        let msg = Message {
            id: 42,
            room_id: Uuid::new_v4(),
            user: Some(UserSummary {
                id: Uuid::new_v4(),
                username: "alice".to_owned(),
            }),
            content: "hi".to_owned(),
            kind: MessageKind::Text,
            created_at: UnixMillis(1_700_000_000_000),
        };
        let json = serde_json::to_string(&msg).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn system_message_omits_user() {
        let msg = Message {
            id: 7,
            room_id: Uuid::new_v4(),
            user: None,
            content: "alice joined the room".to_owned(),
            kind: MessageKind::System,
            created_at: UnixMillis(1),
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert!(value.get("user").is_none());
        assert_eq!(value.get("kind"), Some(&json!("system")));
    }

    #[test]
    fn kind_strings_match_storage() {
        assert_eq!(MessageKind::Text.as_str(), "text");
        assert_eq!(MessageKind::from_str("system"), Some(MessageKind::System));
        assert_eq!(MessageKind::from_str("video"), None);
    }
}
