// ============================
// crates/relay-lib/src/registry.rs
// ============================
//! Connection registry: owns every live transport connection.
//!
//! Each connection is tracked from accept to close. The registry holds the
//! outbound frame channel and a last-activity timestamp per connection; the
//! liveness supervisor calls [`ConnectionRegistry::sweep`] on a fixed
//! interval to ping the living and evict the silent. Eviction removes the
//! entry and closes the transport; the supervisor then completes the room
//! leave for each evicted connection, since a dead peer never finishes the
//! close handshake on its own.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use axum::extract::ws::Message;
use dashmap::DashMap;
use focusrelay_common::ServerMessage;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Opaque identifier for one transport connection.
pub type ConnId = Uuid;

/// Heartbeat text frames, intercepted before JSON decoding.
pub const PING_FRAME: &str = "ping";
pub const PONG_FRAME: &str = "pong";

/// Failure to deliver a message to one recipient. Non-fatal by contract:
/// fan-out loops log it and continue with the remaining recipients.
#[derive(Error, Debug)]
pub enum SendError {
    #[error("connection is not registered")]
    Unknown,
    #[error("connection channel is closed")]
    Closed,
    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

struct ConnEntry {
    tx: mpsc::UnboundedSender<Message>,
    /// Milliseconds since the registry epoch; refreshed on any inbound frame.
    last_seen_ms: AtomicU64,
}

pub struct ConnectionRegistry {
    conns: DashMap<ConnId, ConnEntry>,
    epoch: Instant,
    heartbeat_timeout: Duration,
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new(heartbeat_timeout: Duration) -> Self {
        Self {
            conns: DashMap::new(),
            epoch: Instant::now(),
            heartbeat_timeout,
        }
    }

    fn now_ms(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// Begin tracking a connection; it starts out alive.
    pub fn register(&self, tx: mpsc::UnboundedSender<Message>) -> ConnId {
        let conn_id = Uuid::new_v4();
        let entry = ConnEntry {
            tx,
            last_seen_ms: AtomicU64::new(self.now_ms()),
        };
        self.conns.insert(conn_id, entry);
        tracing::debug!(%conn_id, "connection registered");
        conn_id
    }

    /// Refresh the last-activity timestamp. Called on every inbound frame,
    /// including heartbeat pongs. A no-op for already-evicted connections.
    pub fn mark_alive(&self, conn_id: ConnId) {
        if let Some(entry) = self.conns.get(&conn_id) {
            entry.last_seen_ms.store(self.now_ms(), Ordering::Relaxed);
        }
    }

    /// Stop tracking a connection. Idempotent: the disconnect path and the
    /// sweep may race, whichever runs second finds nothing to remove.
    pub fn unregister(&self, conn_id: ConnId) -> bool {
        self.conns.remove(&conn_id).is_some()
    }

    /// Send one protocol message to one connection. Failure is per-recipient
    /// and non-fatal; callers log it and move on.
    pub fn send(&self, conn_id: ConnId, msg: &ServerMessage) -> Result<(), SendError> {
        let entry = self.conns.get(&conn_id).ok_or(SendError::Unknown)?;
        let json = serde_json::to_string(msg)?;
        entry
            .tx
            .send(Message::Text(json.into()))
            .map_err(|_| SendError::Closed)
    }

    /// Send a raw text frame (heartbeat traffic) to one connection.
    pub fn send_raw(&self, conn_id: ConnId, text: &str) -> Result<(), SendError> {
        let entry = self.conns.get(&conn_id).ok_or(SendError::Unknown)?;
        entry
            .tx
            .send(Message::Text(text.to_string().into()))
            .map_err(|_| SendError::Closed)
    }

    /// One liveness pass: evict every connection silent for at least the
    /// heartbeat timeout, ping the rest. Returns the evicted connections;
    /// the caller owns their room cleanup. With the timeout equal to the
    /// sweep cadence, a silent peer is gone within two sweeps: the first
    /// sweep after silence begins pings it, the next one evicts.
    pub fn sweep(&self) -> Vec<ConnId> {
        let now = self.now_ms();
        let timeout_ms = u64::try_from(self.heartbeat_timeout.as_millis()).unwrap_or(u64::MAX);
        let mut evicted = Vec::new();
        self.conns.retain(|conn_id, entry| {
            let last_seen = entry.last_seen_ms.load(Ordering::Relaxed);
            if now.saturating_sub(last_seen) >= timeout_ms {
                let _ = entry.tx.send(Message::Close(None));
                evicted.push(*conn_id);
                false
            } else {
                let _ = entry.tx.send(Message::Text(PING_FRAME.into()));
                true
            }
        });
        if !evicted.is_empty() {
            tracing::info!(count = evicted.len(), "evicted unresponsive connections");
        }
        evicted
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.conns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.conns.is_empty()
    }
}
