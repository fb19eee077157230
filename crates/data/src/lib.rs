//! Durable state for the chat backend: users, rooms, memberships, and the
//! complete message log, behind a pooled PostgreSQL connection.
//!
//! The pool is process-wide; query functions borrow a connection per call via
//! [`connect`]. The shared fast store (presence, caches) lives in the server
//! crate — everything here is the relational source of truth.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, PooledConnection};
use diesel::{PgConnection, r2d2};
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};
use scheduled_thread_pool::ScheduledThreadPool;
use url::Url;

#[macro_use]
mod macros;
mod config;
pub use config::DbConfig;

pub mod message;
pub mod room;
pub mod schema;
pub mod user;

mod error;
pub use error::DataError;

pub type DataResult<T> = Result<T, DataError>;

pub type DieselPool = r2d2::Pool<ConnectionManager<PgConnection>>;
pub type PgPooledConnection = PooledConnection<ConnectionManager<PgConnection>>;
pub use diesel::r2d2::PoolError;

pub static DIESEL_POOL: OnceLock<DieselPool> = OnceLock::new();

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!();

/// Caps how long any single statement may run on a connection handed out by
/// the pool, so a stuck query cannot outlive the per-event deadline.
#[derive(Debug)]
struct StatementTimeout(u64);

impl CustomizeConnection<PgConnection, r2d2::Error> for StatementTimeout {
    fn on_acquire(&self, conn: &mut PgConnection) -> Result<(), r2d2::Error> {
        diesel::sql_query(format!("SET statement_timeout = {}", self.0))
            .execute(conn)
            .map(drop)
            .map_err(r2d2::Error::QueryError)
    }
}

/// Builds the process-wide pool and applies pending migrations. Must be
/// called once before any query function; panics on misconfiguration since
/// a node without its database has nothing to do.
pub fn init(config: &DbConfig) {
    let manager = ConnectionManager::<PgConnection>::new(connection_url(config));
    let pool = r2d2::Pool::builder()
        .max_size(config.pool_size)
        .min_idle(config.min_idle)
        .connection_timeout(Duration::from_millis(config.connection_timeout))
        .connection_customizer(Box::new(StatementTimeout(config.statement_timeout)))
        .thread_pool(Arc::new(ScheduledThreadPool::new(config.helper_threads)))
        .build(manager)
        .expect("database pool");
    DIESEL_POOL.set(pool).expect("database pool initialized twice");

    let mut conn = connect().expect("database connection for migrations");
    conn.run_pending_migrations(MIGRATIONS)
        .expect("pending migrations");
}

pub fn connect() -> Result<PgPooledConnection, PoolError> {
    DIESEL_POOL
        .get()
        .expect("database pool is not initialized")
        .get()
        .inspect_err(|e| tracing::error!(error = %e, "checkout from database pool failed"))
}

/// Fills in the connection-level query parameters the config asks for,
/// leaving anything already present in the URL untouched.
fn connection_url(config: &DbConfig) -> String {
    let mut url = Url::parse(&config.url).expect("malformed database URL");
    let present: Vec<String> = url.query_pairs().map(|(k, _)| k.into_owned()).collect();
    let missing = |key: &str| !present.iter().any(|k| k == key);

    let mut pairs = url.query_pairs_mut();
    if config.enforce_tls && missing("sslmode") {
        pairs.append_pair("sslmode", "require");
    }
    // bound how long a dead peer can hold a connection hostage
    if missing("tcp_user_timeout") {
        pairs.append_pair("tcp_user_timeout", &config.tcp_timeout.to_string());
    }
    drop(pairs);
    url.into()
}

#[cfg(test)]
mod tests {
    use super::{DbConfig, connection_url};

    #[test]
    fn connection_url_appends_tcp_timeout() {
        let config = DbConfig {
            url: "postgres://localhost/palaver".to_owned(),
            ..Default::default()
        };
        assert!(connection_url(&config).contains("tcp_user_timeout=10000"));
    }

    #[test]
    fn existing_params_are_left_alone() {
        let config = DbConfig {
            url: "postgres://localhost/palaver?tcp_user_timeout=5".to_owned(),
            ..Default::default()
        };
        let url = connection_url(&config);
        assert_eq!(url.matches("tcp_user_timeout").count(), 1);
        assert!(url.contains("tcp_user_timeout=5"));
    }

    #[test]
    fn enforce_tls_requires_sslmode() {
        let config = DbConfig {
            url: "postgres://localhost/palaver".to_owned(),
            enforce_tls: true,
            ..Default::default()
        };
        assert!(connection_url(&config).contains("sslmode=require"));
    }
}
