//! The Rune Forge server core: a server-authoritative session manager that
//! accepts WebSocket connections, validates and executes game actions against
//! the deterministic simulation, and fans ordered state deltas out to every
//! session member.

pub mod auth;
pub mod config;
pub mod connection;
pub mod coordinator;
pub mod delta;
pub mod handshake;
pub mod http;
pub mod rate_limit;
pub mod registry;
pub mod session;
pub mod store;

use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::auth::AuthService;
use crate::config::ServerConfig;
use crate::registry::SessionRegistry;
use crate::store::Store;

/// Milliseconds since the unix epoch, the timestamp unit of the protocol.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Counters surfaced by the health endpoint.
#[derive(Default)]
pub struct Metrics {
    /// Open WebSocket connections, authenticated or not.
    pub connections: AtomicUsize,
    /// Connections that passed the auth handshake.
    pub authenticated: AtomicUsize,
}

/// The application state shared by all handlers.
pub struct AppState {
    pub config: ServerConfig,
    pub store: Arc<dyn Store>,
    pub auth: AuthService,
    pub registry: Arc<SessionRegistry>,
    pub metrics: Metrics,
}
