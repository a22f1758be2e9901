// ============================
// crates/relay-lib/src/liveness.rs
// ============================
//! Liveness supervisor: a single periodic task that pings every open
//! connection and evicts the ones that have gone silent. The supervisor
//! completes the room leave and `user_left` broadcast for each evicted
//! connection itself: a truly dead peer never answers the close handshake,
//! so its read loop cannot be relied on to run the cleanup.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::handlers;
use crate::metrics::WS_SWEEP_EVICTED;
use crate::AppState;

/// Spawn the heartbeat sweep loop. Runs for the lifetime of the process.
pub fn spawn(state: Arc<AppState>) -> JoinHandle<()> {
    let interval = Duration::from_secs(state.settings.heartbeat_interval_secs);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let evicted = state.registry.sweep();
            for conn_id in &evicted {
                handlers::handle_disconnect(&state, *conn_id);
            }
            if !evicted.is_empty() {
                counter!(WS_SWEEP_EVICTED).increment(evicted.len() as u64);
                tracing::info!(count = evicted.len(), "liveness sweep evicted connections");
            }
        }
    })
}
