//! Presence types: the online/offline belief about a user and the set of
//! rooms they currently belong to.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{RoomId, UnixMillis, UserId};

/// A description of a user's connectivity.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PresenceState {
    /// Disconnected from the service. The state of any user without a
    /// presence record.
    #[default]
    Offline,

    /// Connected to the service.
    Online,
}

impl PresenceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Offline => "offline",
            Self::Online => "online",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "offline" => Some(Self::Offline),
            "online" => Some(Self::Online),
            _ => None,
        }
    }
}

/// One user's presence as rendered into room snapshots and events.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct PresenceEntry {
    pub user_id: UserId,
    pub username: String,
    pub status: PresenceState,
    pub last_seen: UnixMillis,
}

/// The presence record materialized in the shared fast store, one hash per
/// user.
///
/// The hash is authoritative over any relational snapshot of active rooms:
/// membership can change while a user is connected and presence must reflect
/// the current moment.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PresenceRecord {
    pub status: PresenceState,
    pub last_seen: UnixMillis,
    pub username: String,
    pub active_rooms: Vec<RoomId>,
}

impl PresenceRecord {
    pub const FIELD_STATUS: &'static str = "status";
    pub const FIELD_LAST_SEEN: &'static str = "last_seen";
    pub const FIELD_USERNAME: &'static str = "username";
    pub const FIELD_ACTIVE_ROOMS: &'static str = "active_rooms";

    /// Flattens the record into hash fields. `active_rooms` is serialized as
    /// a JSON array so the field survives as a single value.
    pub fn to_fields(&self) -> Vec<(&'static str, String)> {
        let rooms = serde_json::to_string(&self.active_rooms).unwrap_or_else(|_| "[]".to_owned());
        vec![
            (Self::FIELD_STATUS, self.status.as_str().to_owned()),
            (Self::FIELD_LAST_SEEN, self.last_seen.get().to_string()),
            (Self::FIELD_USERNAME, self.username.clone()),
            (Self::FIELD_ACTIVE_ROOMS, rooms),
        ]
    }

    /// Rebuilds a record from hash fields.
    ///
    /// Unparseable fields degrade to their defaults rather than failing the
    /// read: a corrupt record reads as an offline user with no rooms.
    pub fn from_fields(fields: &HashMap<String, String>) -> Self {
        let status = fields
            .get(Self::FIELD_STATUS)
            .and_then(|s| PresenceState::from_str(s))
            .unwrap_or_default();
        let last_seen = fields
            .get(Self::FIELD_LAST_SEEN)
            .and_then(|s| s.parse().ok())
            .map(UnixMillis)
            .unwrap_or_default();
        let username = fields.get(Self::FIELD_USERNAME).cloned().unwrap_or_default();
        let active_rooms = fields
            .get(Self::FIELD_ACTIVE_ROOMS)
            .and_then(|s| serde_json::from_str(s).ok())
            .unwrap_or_default();
        Self {
            status,
            last_seen,
            username,
            active_rooms,
        }
    }

    pub fn to_entry(&self, user_id: UserId) -> PresenceEntry {
        PresenceEntry {
            user_id,
            username: self.username.clone(),
            status: self.status,
            last_seen: self.last_seen,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use uuid::Uuid;

    use super::{PresenceRecord, PresenceState};
    use crate::UnixMillis;

    #[test]
    fn record_fields_round_trip() {
        let record = PresenceRecord {
            status: PresenceState::Online,
            last_seen: UnixMillis(1_700_000_000_000),
            username: "bob".to_owned(),
            active_rooms: vec![Uuid::new_v4(), Uuid::new_v4()],
        };
        let fields: HashMap<String, String> = record
            .to_fields()
            .into_iter()
            .map(|(k, v)| (k.to_owned(), v))
            .collect();
        assert_eq!(PresenceRecord::from_fields(&fields), record);
    }

    #[test]
    fn corrupt_record_degrades_to_offline() {
        let mut fields = HashMap::new();
        fields.insert("status".to_owned(), "astral".to_owned());
        fields.insert("last_seen".to_owned(), "not-a-number".to_owned());
        fields.insert("active_rooms".to_owned(), "{broken".to_owned());
        let record = PresenceRecord::from_fields(&fields);
        assert_eq!(record.status, PresenceState::Offline);
        assert_eq!(record.last_seen, UnixMillis(0));
        assert!(record.active_rooms.is_empty());
    }

    #[test]
    fn missing_record_reads_as_offline() {
        let record = PresenceRecord::from_fields(&HashMap::new());
        assert_eq!(record.status, PresenceState::Offline);
    }
}
