use serde::Deserialize;

#[derive(Clone, Debug, Deserialize)]
pub struct PresenceConfig {
    /// Seconds between reaper ticks.
    #[serde(default = "default_reap_interval")]
    pub reap_interval: u64,

    /// Seconds a heartbeat may age before its user is reaped to offline.
    #[serde(default = "default_stale_threshold")]
    pub stale_threshold: u64,

    /// Whether shutdown proactively marks this node's users offline instead
    /// of leaving the transition to the surviving reapers.
    #[serde(default)]
    pub offline_on_shutdown: bool,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            reap_interval: default_reap_interval(),
            stale_threshold: default_stale_threshold(),
            offline_on_shutdown: false,
        }
    }
}

fn default_reap_interval() -> u64 {
    30
}
fn default_stale_threshold() -> u64 {
    180
}
