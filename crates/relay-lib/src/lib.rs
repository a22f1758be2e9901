// ============================
// crates/relay-lib/src/lib.rs
// ============================
//! Core library for the focusrelay server: real-time meeting presence,
//! focus-score broadcast and WebRTC signaling relay.

pub mod config;
pub mod error;
pub mod handlers;
pub mod liveness;
pub mod metrics;
pub mod registry;
pub mod rooms;
pub mod router;
pub mod sidecar;

use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::config::Settings;
use crate::handlers::Session;
use crate::registry::{ConnId, ConnectionRegistry};
use crate::rooms::Rooms;

/// Application state shared across all handlers. The registry, room map and
/// session map are the only shared mutable resources; all are owned
/// exclusively by this process, and the sidecar mutates them through the
/// same in-process handlers as the WebSocket path.
pub struct AppState {
    /// Relay settings
    pub settings: Settings,
    /// Live transport connections
    pub registry: ConnectionRegistry,
    /// Per-meeting room state
    pub rooms: Rooms,
    /// Which meeting each joined connection sits in. Shared so that both a
    /// connection's own task and the liveness supervisor can run disconnect
    /// cleanup; the atomic remove keeps it single-shot.
    pub sessions: DashMap<ConnId, Session>,
    started_at: Instant,
}

impl AppState {
    /// Create a new application state
    #[must_use]
    pub fn new(settings: Settings) -> Self {
        let registry =
            ConnectionRegistry::new(Duration::from_secs(settings.heartbeat_timeout_secs));
        Self {
            settings,
            registry,
            rooms: Rooms::new(),
            sessions: DashMap::new(),
            started_at: Instant::now(),
        }
    }

    /// Seconds since the relay started, reported by `GET /health`.
    #[must_use]
    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
