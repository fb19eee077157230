use serde::Deserialize;

#[derive(Clone, Debug, Deserialize)]
pub struct DbConfig {
    /// Connection URL of the primary database.
    pub url: String,

    /// Upper bound on pooled connections.
    #[serde(default = "default_db_pool_size")]
    pub pool_size: u32,

    /// Connections the pool keeps warm. Defaults to the pool size.
    #[serde(default)]
    pub min_idle: Option<u32>,

    /// Milliseconds of unacknowledged TCP traffic before the kernel declares
    /// a connection dead (`tcp_user_timeout`). Bounds the outage when all
    /// packets to the database are lost.
    #[serde(default = "default_tcp_timeout")]
    pub tcp_timeout: u64,

    /// Milliseconds to wait for a free connection from the pool.
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout: u64,

    /// Milliseconds a single statement may run before the database cancels
    /// it.
    #[serde(default = "default_statement_timeout")]
    pub statement_timeout: u64,

    /// Threads for background work such as connection creation.
    #[serde(default = "default_helper_threads")]
    pub helper_threads: usize,

    /// Refuse unencrypted connections to the database.
    #[serde(default)]
    pub enforce_tls: bool,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            pool_size: default_db_pool_size(),
            min_idle: None,
            tcp_timeout: default_tcp_timeout(),
            connection_timeout: default_connection_timeout(),
            statement_timeout: default_statement_timeout(),
            helper_threads: default_helper_threads(),
            enforce_tls: false,
        }
    }
}

fn default_db_pool_size() -> u32 {
    20
}
fn default_tcp_timeout() -> u64 {
    10_000
}
fn default_connection_timeout() -> u64 {
    30_000
}
fn default_statement_timeout() -> u64 {
    30_000
}
fn default_helper_threads() -> usize {
    10
}
