use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::bus::Bus;
use crate::config::ServerConfig;
use crate::kv::KvStore;
use crate::pipeline::MessagePipeline;
use crate::presence::PresenceEngine;
use crate::socket::SocketRegistry;

/// Everything a handler needs, assembled once at startup and injected into
/// the depot. The adapters are passed in explicitly rather than reached for
/// globally so tests can wire the parts against their own stores.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub kv: KvStore,
    pub bus: Bus,
    pub presence: PresenceEngine,
    pub pipeline: MessagePipeline,
    pub registry: Arc<SocketRegistry>,
    shutting_down: Arc<AtomicBool>,
}

impl AppState {
    pub fn new(
        config: Arc<ServerConfig>,
        kv: KvStore,
        bus: Bus,
        presence: PresenceEngine,
        pipeline: MessagePipeline,
        registry: Arc<SocketRegistry>,
    ) -> Self {
        Self {
            config,
            kv,
            bus,
            presence,
            pipeline,
            registry,
            shutting_down: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flipped once by the shutdown path. Disconnect handlers consult this
    /// to decide whether presence transitions are theirs to make or the
    /// surviving reapers'.
    pub fn begin_shutdown(&self) {
        self.shutting_down.store(true, Ordering::Relaxed);
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Relaxed)
    }
}
