use serde::Deserialize;

#[derive(Clone, Debug, Deserialize)]
pub struct CacheConfig {
    /// Maximum length of a room's recent-message list.
    #[serde(default = "default_recent_limit")]
    pub recent_limit: i64,

    /// Seconds an untouched recent-message list survives before eviction.
    #[serde(default = "default_ttl")]
    pub ttl: u64,

    /// Whether leaving a room purges the leaver's messages from its
    /// recent-message list. Membership does not alter the messages
    /// themselves, so this is off unless a deployment wants it.
    #[serde(default)]
    pub purge_on_leave: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            recent_limit: default_recent_limit(),
            ttl: default_ttl(),
            purge_on_leave: false,
        }
    }
}

fn default_recent_limit() -> i64 {
    100
}
fn default_ttl() -> u64 {
    86_400
}
