//! Per-user presence lifecycle: online/offline transitions driven by
//! heartbeats, room-scoped snapshots for the router, and the background
//! reaper that demotes users whose heartbeat went stale.
//!
//! The online-users set in the fast store is the serialization point for
//! transitions. `mark_offline` treats the set removal as its commit: only
//! the caller that actually removed the member gets the room list back and
//! emits `user_disconnected`, so two nodes racing to reap the same user
//! produce at most one broadcast.

use std::sync::Arc;

use palaver_core::events::{RoomUpdateType, ServerEvent};
use palaver_core::presence::{PresenceEntry, PresenceRecord, PresenceState};
use palaver_core::{RoomId, UnixMillis, UserId};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::AppResult;
use crate::bus::Bus;
use crate::config::ServerConfig;
use crate::kv::KvStore;

#[derive(Clone)]
pub struct PresenceEngine {
    kv: KvStore,
    bus: Bus,
    config: Arc<ServerConfig>,
}

impl PresenceEngine {
    pub fn new(kv: KvStore, bus: Bus, config: Arc<ServerConfig>) -> Self {
        Self { kv, bus, config }
    }

    /// Writes the user online with the given room set and registers them in
    /// the online set and each room's member set. Idempotent: re-marking an
    /// online user refreshes `last_seen` and the room set without emitting
    /// anything.
    pub async fn mark_online(
        &self,
        user_id: UserId,
        username: &str,
        active_rooms: Vec<RoomId>,
    ) -> AppResult<()> {
        let record = PresenceRecord {
            status: PresenceState::Online,
            last_seen: UnixMillis::now(),
            username: username.to_owned(),
            active_rooms: active_rooms.clone(),
        };
        self.kv.set_presence(user_id, &record).await?;
        self.kv.add_online(user_id).await?;
        for room_id in active_rooms {
            self.kv.add_room_member(room_id, user_id).await?;
        }
        Ok(())
    }

    /// Transitions the user offline. Returns the rooms the user belonged to
    /// when this caller won the transition, `None` when some other caller
    /// (another node's reaper, usually) already did.
    pub async fn mark_offline(&self, user_id: UserId) -> AppResult<Option<Vec<RoomId>>> {
        if !self.kv.remove_online(user_id).await? {
            return Ok(None);
        }

        let mut record = match self.kv.get_presence(user_id).await? {
            Some(record) => record,
            None => {
                // broken invariant: user was in the online set without a record
                error!(%user_id, "presence record missing for online user");
                PresenceRecord::default()
            }
        };
        record.status = PresenceState::Offline;
        record.last_seen = UnixMillis::now();
        self.kv.set_presence(user_id, &record).await?;
        Ok(Some(record.active_rooms))
    }

    /// O(1) hot path: refresh the heartbeat key.
    pub async fn touch(&self, user_id: UserId) -> AppResult<()> {
        self.kv
            .set_heartbeat(user_id, UnixMillis::now(), self.config.kv.heartbeat_ttl)
            .await
    }

    /// Heartbeat plus idle→online rehydration. When the user was not online,
    /// their room set is recomputed from the database (never mutated in
    /// place) and every room hears `user_connected` exactly once.
    pub async fn bump_activity(&self, user_id: UserId, username: &str) -> AppResult<()> {
        self.touch(user_id).await?;
        self.kv
            .refresh_session(user_id, self.config.kv.session_ttl)
            .await?;

        let status = self
            .kv
            .get_presence(user_id)
            .await?
            .map(|r| r.status)
            .unwrap_or_default();
        if status == PresenceState::Online {
            return Ok(());
        }

        let rooms = palaver_data::room::active_room_ids(user_id)?;
        self.mark_online(user_id, username, rooms.clone()).await?;
        for room_id in rooms {
            let presences = self.snapshot(room_id).await?;
            if let Err(e) = self
                .bus
                .publish(
                    room_id,
                    ServerEvent::presence_update(RoomUpdateType::UserConnected, room_id, presences),
                    None,
                )
                .await
            {
                warn!(%user_id, %room_id, error = %e, "user_connected broadcast failed");
            }
        }
        Ok(())
    }

    /// Presence of every active member of the room. The member set in the
    /// fast store is consulted first; an empty set falls back to the
    /// database and repopulates it.
    pub async fn snapshot(&self, room_id: RoomId) -> AppResult<Vec<PresenceEntry>> {
        let mut members = self.kv.room_members(room_id).await?;
        if members.is_empty() {
            members = palaver_data::room::active_member_ids(room_id)?;
            for user_id in &members {
                self.kv.add_room_member(room_id, *user_id).await?;
            }
        }

        let mut entries = Vec::with_capacity(members.len());
        for user_id in members {
            match self.kv.get_presence(user_id).await? {
                Some(record) => entries.push(record.to_entry(user_id)),
                None => {
                    // member has never connected: offline, name from the DB
                    if let Some(user) = palaver_data::user::user_by_id(user_id)? {
                        entries.push(PresenceEntry {
                            user_id,
                            username: user.username,
                            status: PresenceState::Offline,
                            last_seen: UnixMillis(0),
                        });
                    }
                }
            }
        }
        entries.sort_by(|a, b| a.username.cmp(&b.username).then(a.user_id.cmp(&b.user_id)));
        Ok(entries)
    }

    /// One reaper pass: every online user whose heartbeat is absent or older
    /// than the stale threshold goes offline, and each of their rooms hears
    /// `user_disconnected` once. Per-user failures are logged and skipped so
    /// one bad record cannot starve the rest of the pass.
    pub async fn reap_stale(&self, now: UnixMillis) -> AppResult<()> {
        let stale_threshold_ms = (self.config.presence.stale_threshold * 1_000) as i64;
        for user_id in self.kv.online_users().await? {
            let heartbeat = match self.kv.heartbeat(user_id).await {
                Ok(hb) => hb,
                Err(e) => {
                    warn!(%user_id, error = %e, "heartbeat read failed, skipping");
                    continue;
                }
            };
            if !is_stale(heartbeat, now, stale_threshold_ms) {
                continue;
            }

            let rooms = match self.mark_offline(user_id).await {
                Ok(Some(rooms)) => rooms,
                Ok(None) => continue, // another node committed this transition
                Err(e) => {
                    warn!(%user_id, error = %e, "offline transition failed, skipping");
                    continue;
                }
            };
            debug!(%user_id, rooms = rooms.len(), "reaped stale user");
            for room_id in rooms {
                let presences = match self.snapshot(room_id).await {
                    Ok(presences) => presences,
                    Err(e) => {
                        warn!(%room_id, error = %e, "snapshot failed during reap");
                        continue;
                    }
                };
                if let Err(e) = self
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
                    warn!(%user_id, %room_id, error = %e, "user_disconnected broadcast failed");
                }
            }
        }
        Ok(())
    }
}

/// A user is reapable when the heartbeat key is gone (TTL fired) or the
/// recorded beat is older than the threshold.
fn is_stale(heartbeat: Option<UnixMillis>, now: UnixMillis, threshold_ms: i64) -> bool {
    match heartbeat {
        None => true,
        Some(beat) => now.since(beat) > threshold_ms,
    }
}

/// The per-node reaper: one long-lived task on a fixed period. Errors are
/// logged and the loop continues on the next tick; a shutdown signal stops
/// it between passes.
pub async fn run_reaper(engine: PresenceEngine, mut shutdown: watch::Receiver<bool>) {
    let period = std::time::Duration::from_secs(engine.config.presence.reap_interval);
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // the first tick fires immediately; skip it so a fresh node does not
    // reap before clients had one interval to heartbeat
    ticker.tick().await;

    info!(period_secs = engine.config.presence.reap_interval, "presence reaper started");
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = engine.reap_stale(UnixMillis::now()).await {
                    error!(error = %e, "presence reap pass failed");
                }
            }
            _ = shutdown.changed() => break,
        }
    }
    info!("presence reaper stopped");
}

#[cfg(test)]
mod tests {
    use palaver_core::UnixMillis;

    use super::is_stale;

    const THRESHOLD_MS: i64 = 180_000;

    #[test]
    fn absent_heartbeat_is_stale() {
        assert!(is_stale(None, UnixMillis(1_000_000), THRESHOLD_MS));
    }

    #[test]
    fn fresh_heartbeat_survives() {
        let now = UnixMillis(1_000_000);
        assert!(!is_stale(Some(UnixMillis(1_000_000 - 30_000)), now, THRESHOLD_MS));
        // exactly at the threshold is not yet stale
        assert!(!is_stale(Some(UnixMillis(1_000_000 - THRESHOLD_MS)), now, THRESHOLD_MS));
    }

    #[test]
    fn old_heartbeat_is_stale() {
        let now = UnixMillis(1_000_000);
        assert!(is_stale(Some(UnixMillis(1_000_000 - THRESHOLD_MS - 1)), now, THRESHOLD_MS));
    }

    #[test]
    fn future_heartbeat_is_not_stale() {
        // clock skew between nodes must not reap a live user
        let now = UnixMillis(1_000_000);
        assert!(!is_stale(Some(UnixMillis(2_000_000)), now, THRESHOLD_MS));
    }
}
