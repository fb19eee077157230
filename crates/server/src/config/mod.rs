mod cache;
mod jwt;
mod kv;
mod presence;

pub use cache::CacheConfig;
pub use jwt::JwtConfig;
pub use kv::KvConfig;
pub use presence::PresenceConfig;

use palaver_data::DbConfig;
use serde::Deserialize;

#[derive(Clone, Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Origins allowed by CORS. Empty means any origin.
    #[serde(default)]
    pub allowed_origins: Vec<String>,

    /// Per-event deadline in milliseconds: one socket event gets this long
    /// for all of its DB and KV work before the client sees an error.
    #[serde(default = "default_event_timeout")]
    pub event_timeout: u64,

    /// Seconds granted to in-flight handlers on shutdown, capped at 10.
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace: u64,

    pub db: DbConfig,
    pub kv: KvConfig,
    pub jwt: JwtConfig,
    #[serde(default)]
    pub presence: PresenceConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

fn default_listen_addr() -> String {
    "0.0.0.0:8300".to_owned()
}
fn default_event_timeout() -> u64 {
    5_000
}
fn default_shutdown_grace() -> u64 {
    10
}

#[cfg(test)]
mod tests {
    use figment::Figment;
    use figment::providers::{Format, Toml};

    use super::ServerConfig;

    #[test]
    fn minimal_config_gets_spec_defaults() {
        let conf: ServerConfig = Figment::new()
            .merge(Toml::string(
                r#"
                    [db]
                    url = "postgres://localhost/palaver"
                    [kv]
                    url = "redis://localhost"
                    [jwt]
                    secret = "notsecret"
                "#,
            ))
            .extract()
            .unwrap();

        assert_eq!(conf.event_timeout, 5_000);
        assert_eq!(conf.db.pool_size, 20);
        assert_eq!(conf.kv.bus_url(), "redis://localhost");
        assert_eq!(conf.kv.heartbeat_ttl, 30);
        assert_eq!(conf.kv.session_ttl, 3_600);
        assert_eq!(conf.presence.reap_interval, 30);
        assert_eq!(conf.presence.stale_threshold, 180);
        assert!(!conf.presence.offline_on_shutdown);
        assert_eq!(conf.cache.recent_limit, 100);
        assert_eq!(conf.cache.ttl, 86_400);
        assert!(!conf.cache.purge_on_leave);
        assert_eq!(conf.jwt.lifetime, 86_400);
    }

    #[test]
    fn bus_url_can_diverge_from_kv() {
        let conf: ServerConfig = Figment::new()
            .merge(Toml::string(
                r#"
                    [db]
                    url = "postgres://localhost/palaver"
                    [kv]
                    url = "redis://localhost"
                    bus_url = "redis://bus-host"
                    [jwt]
                    secret = "notsecret"
                "#,
            ))
            .extract()
            .unwrap();
        assert_eq!(conf.kv.bus_url(), "redis://bus-host");
    }
}
