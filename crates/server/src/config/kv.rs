use serde::Deserialize;

#[derive(Clone, Debug, Deserialize)]
pub struct KvConfig {
    /// Connection URL of the shared fast store.
    pub url: String,

    /// Connection URL of the message bus. Defaults to the fast store, which
    /// serves both roles in the common deployment.
    #[serde(default)]
    pub bus_url: Option<String>,

    /// Heartbeat key TTL in seconds, slightly larger than the reap interval
    /// so a silently dead client is observable as an absent key.
    #[serde(default = "default_heartbeat_ttl")]
    pub heartbeat_ttl: u64,

    /// Session key TTL in seconds, refreshed on activity.
    #[serde(default = "default_session_ttl")]
    pub session_ttl: u64,
}

impl KvConfig {
    pub fn bus_url(&self) -> &str {
        self.bus_url.as_deref().unwrap_or(&self.url)
    }
}

fn default_heartbeat_ttl() -> u64 {
    30
}
fn default_session_ttl() -> u64 {
    3_600
}
