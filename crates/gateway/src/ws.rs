//! WebSocket connection lifecycle: upgrade auth → session → read/write
//! loops → cleanup.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use {
    axum::extract::ws::{Message, WebSocket},
    futures::{SinkExt, stream::StreamExt},
    tokio::sync::{Mutex, mpsc},
    tracing::{debug, info, warn},
};

use {
    relay_common::TenantId,
    relay_metrics::{gauge, labels, names},
    relay_protocol::{MAX_PAYLOAD_BYTES, PING_INTERVAL_MS, PONG_TIMEOUT_MS, WRITE_CHANNEL_CAPACITY},
    relay_sessions::Session,
};

use crate::{
    dispatch::{AfterDispatch, handle_frame},
    state::AppState,
};

/// Drive one authenticated connection to completion.
pub async fn handle_connection(socket: WebSocket, state: Arc<AppState>, tenant: TenantId) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::channel::<String>(WRITE_CHANNEL_CAPACITY);

    let session = Session::new(tenant, tx);
    let session_id = state.sessions.insert(session).await;
    info!(session_id = %session_id, tenant_id = %tenant, "ws: session opened");
    gauge!(
        names::SESSIONS_ACTIVE,
        labels::TENANT => tenant.to_string(),
        labels::COMPONENT => "gateway",
    )
    .increment(1.0);

    // Liveness: the write loop pings every 30s; the read loop records pongs.
    // A connection that misses pongs past the timeout is torn down.
    let last_pong = Arc::new(Mutex::new(Instant::now()));

    // Write loop: serializes frames onto the socket and owns the ping timer.
    let write_handle = {
        let last_pong = Arc::clone(&last_pong);
        tokio::spawn(async move {
            let mut ping = tokio::time::interval(Duration::from_millis(PING_INTERVAL_MS));
            ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    frame = rx.recv() => {
                        let Some(frame) = frame else { break };
                        if ws_tx.send(Message::Text(frame.into())).await.is_err() {
                            break;
                        }
                    },
                    _ = ping.tick() => {
                        if last_pong.lock().await.elapsed()
                            > Duration::from_millis(PONG_TIMEOUT_MS)
                        {
                            debug!("ws: pong timeout");
                            break;
                        }
                        if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                            break;
                        }
                    },
                }
            }
            let _ = ws_tx.send(Message::Close(None)).await;
        })
    };

    // Read loop: frames are dispatched in client-send order; long-running
    // requests are spawned by the dispatcher so the loop stays responsive.
    let shutdown = state.shutdown.clone();
    loop {
        let message = tokio::select! {
            _ = shutdown.cancelled() => {
                debug!(session_id = %session_id, "ws: server shutdown");
                drain_in_flight(&state, session_id).await;
                break;
            },
            message = ws_rx.next() => message,
        };
        let Some(Ok(message)) = message else { break };

        match message {
            Message::Text(text) => {
                if text.len() > MAX_PAYLOAD_BYTES {
                    warn!(session_id = %session_id, size = text.len(), "ws: frame too large");
                    break;
                }
                if handle_frame(&state, session_id, text.as_str()).await == AfterDispatch::Close {
                    break;
                }
            },
            Message::Pong(_) => {
                *last_pong.lock().await = Instant::now();
            },
            Message::Ping(payload) => {
                // axum answers pings at the protocol layer; nothing to do
                // beyond treating it as activity.
                let _ = payload;
                *last_pong.lock().await = Instant::now();
            },
            Message::Close(_) => break,
            Message::Binary(_) => {
                warn!(session_id = %session_id, "ws: binary frames not supported");
                break;
            },
        }
    }

    // Cleanup: cancel in-flight work, drop the session (and its agents).
    if let Some(mut session) = state.sessions.remove(session_id).await {
        session.cancel_all();
    }
    write_handle.abort();
    gauge!(
        names::SESSIONS_ACTIVE,
        labels::TENANT => tenant.to_string(),
        labels::COMPONENT => "gateway",
    )
    .decrement(1.0);
    info!(session_id = %session_id, "ws: session closed");
}

/// Grace period for requests already executing when the server shuts down;
/// stragglers are cancelled by the connection cleanup.
async fn drain_in_flight(state: &AppState, session_id: relay_common::SessionId) {
    let deadline = Instant::now() + Duration::from_millis(relay_protocol::SHUTDOWN_DRAIN_MS);
    loop {
        let pending = state
            .sessions
            .with_session(session_id, |session| session.pending_count())
            .await
            .unwrap_or(0);
        if pending == 0 || Instant::now() >= deadline {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
