// ============================
// crates/relay-lib/src/router.rs
// ============================
//! HTTP/WebSocket router and per-connection handling.
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use focusrelay_common::{decode_client_message, ServerMessage};
use futures_util::{SinkExt, StreamExt};
use metrics::{counter, gauge};
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::metrics::{WS_ACTIVE, WS_CONNECTION, WS_DISCONNECTION};
use crate::registry::{PING_FRAME, PONG_FRAME};
use crate::sidecar;
use crate::AppState;

/// Create the relay router: the WebSocket endpoint plus the HTTP sidecar.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/broadcast-focus", post(sidecar::broadcast_focus))
        .route("/health", get(sidecar::health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Handler for WebSocket connections
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    counter!(WS_CONNECTION).increment(1);
    gauge!(WS_ACTIVE).increment(1.0);
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

async fn handle_connection(socket: WebSocket, state: Arc<AppState>) {
    let (mut sink, mut stream) = socket.split();

    // Outbound channel: handlers, sweep and heartbeat all write here; a
    // single writer task owns the sink.
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let conn_id = state.registry.register(tx);

    let send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let closing = matches!(frame, Message::Close(_));
            if sink.send(frame).await.is_err() {
                break;
            }
            if closing {
                break;
            }
        }
    });

    while let Some(Ok(frame)) = stream.next().await {
        match frame {
            Message::Text(text) => {
                // Any inbound frame counts as activity for the sweep.
                state.registry.mark_alive(conn_id);

                // Heartbeat control frames are raw text, intercepted before
                // JSON decoding and never routed.
                let trimmed = text.trim();
                if trimmed == PING_FRAME {
                    let _ = state.registry.send_raw(conn_id, PONG_FRAME);
                    continue;
                }
                if trimmed == PONG_FRAME {
                    continue;
                }

                match decode_client_message(&text) {
                    Ok(msg) => handlers::handle_message(&state, conn_id, msg),
                    Err(err) => {
                        // Best-effort error reply; the connection stays
                        // open and no state was mutated.
                        tracing::warn!(%conn_id, %err, "rejected inbound message");
                        let _ = state.registry.send(conn_id, &ServerMessage::Error {
                            error: err.to_string(),
                        });
                    },
                }
            },
            Message::Ping(_) | Message::Pong(_) => state.registry.mark_alive(conn_id),
            Message::Close(_) => break,
            Message::Binary(_) => {},
        }
    }

    // Runs for graceful closes and transport errors; after a sweep
    // eviction the supervisor has already done the cleanup and both calls
    // are no-ops.
    handlers::handle_disconnect(&state, conn_id);
    state.registry.unregister(conn_id);

    counter!(WS_DISCONNECTION).increment(1);
    gauge!(WS_ACTIVE).decrement(1.0);

    send_task.abort();
}
