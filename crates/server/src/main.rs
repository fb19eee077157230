//! The palaver node binary.
//!
//! Nodes are interchangeable: all shared state lives in PostgreSQL (durable)
//! and the shared fast store (hot), and room events travel over the bus so a
//! message accepted on one node reaches subscribers on every node.

#[macro_use]
extern crate tracing;

pub mod bus;
pub mod config;
pub mod error;
pub mod hoops;
pub mod kv;
pub mod pipeline;
pub mod presence;
pub mod routing;
pub mod socket;
pub mod state;

pub use error::AppError;

use std::sync::Arc;
use std::time::Duration;

use dotenvy::dotenv;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use salvo::cors::{AllowHeaders, AllowOrigin, Cors};
use salvo::http::{HeaderValue, Method};
use salvo::logging::Logger;
use salvo::prelude::*;
use tokio::sync::watch;

use crate::bus::Bus;
use crate::config::ServerConfig;
use crate::kv::KvStore;
use crate::pipeline::MessagePipeline;
use crate::presence::PresenceEngine;
use crate::socket::SocketRegistry;
use crate::state::AppState;

pub type AppResult<T> = Result<T, AppError>;
pub type JsonResult<T> = Result<Json<T>, AppError>;

pub fn json_ok<T>(data: T) -> JsonResult<T> {
    Ok(Json(data))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    if let Err(e) = dotenv() {
        println!("dotenv error: {e:?}");
    }
    let filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "palaver=info,palaver_data=info,salvo=warn".to_owned());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let raw_config = Figment::new()
        .merge(Toml::file(
            Env::var("PALAVER_CONFIG").as_deref().unwrap_or("palaver.toml"),
        ))
        .merge(Env::prefixed("PALAVER_").global());

    let conf = match raw_config.extract::<ServerConfig>() {
        Ok(conf) => conf,
        Err(e) => {
            eprintln!("It looks like your config is invalid. The following error occurred: {e}");
            std::process::exit(1);
        }
    };

    palaver_data::init(&conf.db);

    let kv = KvStore::connect(&conf.kv.url).await?;
    let bus = Bus::connect(conf.kv.bus_url()).await?;
    let subscriber_client = redis::Client::open(conf.kv.bus_url())?;

    let config = Arc::new(conf);
    let registry = Arc::new(SocketRegistry::new());
    let presence = PresenceEngine::new(kv.clone(), bus.clone(), config.clone());
    let pipeline = MessagePipeline::new(kv.clone(), bus.clone(), config.clone());
    let state = AppState::new(
        config.clone(),
        kv,
        bus,
        presence.clone(),
        pipeline,
        registry.clone(),
    );

    tokio::spawn(async move {
        if let Err(e) = bus::subscribe(subscriber_client, registry).await {
            error!(error = %e, "bus subscriber failed");
        }
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(presence::run_reaper(presence, shutdown_rx));

    let service = Service::new(routing::router(state.clone()))
        .hoop(Logger::new())
        .hoop(cors_handler(&config));

    let acceptor = TcpListener::new(config.listen_addr.clone()).bind().await;
    let server = Server::new(acceptor);
    let handle = server.handle();
    let grace = Duration::from_secs(config.shutdown_grace.min(10));
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received, draining");
        state.begin_shutdown();
        let _ = shutdown_tx.send(true);
        handle.stop_graceful(grace);
    });

    info!(addr = %config.listen_addr, "palaver node listening");
    server.serve(service).await;
    Ok(())
}

fn cors_handler(config: &ServerConfig) -> salvo::cors::CorsHandler {
    let allow_origin = if config.allowed_origins.is_empty() {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(
            config
                .allowed_origins
                .iter()
                .filter_map(|origin| origin.parse::<HeaderValue>().ok()),
        )
    };
    Cors::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(AllowHeaders::list([
            salvo::http::header::ACCEPT,
            salvo::http::header::CONTENT_TYPE,
            salvo::http::header::AUTHORIZATION,
        ]))
        .max_age(Duration::from_secs(86400))
        .into_handler()
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install ctrl-c handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => error!(error = %e, "failed to install SIGTERM handler"),
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
