//! Health and metrics endpoints.

use std::sync::Arc;

use axum::{
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Json, Response},
};

use crate::state::AppState;

pub async fn health(State(state): State<Arc<AppState>>) -> Response {
    // The queue is the only dependency worth probing: SQLite is in-process
    // and provider reachability is the breakers' business.
    let queue_ok = state.queue.len("healthz").await.is_ok();
    let sessions = state.sessions.count().await;

    let status = if queue_ok { "ok" } else { "degraded" };
    let code = if queue_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        code,
        Json(serde_json::json!({
            "status": status,
            "components": {
                "queue": if queue_ok { "ok" } else { "unreachable" },
                "sessions": sessions,
                "active_tenants": state.active_tenants().len(),
            },
            "version": env!("CARGO_PKG_VERSION"),
        })),
    )
        .into_response()
}

pub async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
        .into_response()
}
