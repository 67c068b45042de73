//! Router assembly and the two listeners.

use std::sync::Arc;

use {
    axum::{
        Router,
        extract::{Query, State, WebSocketUpgrade},
        http::{HeaderMap, StatusCode},
        response::{IntoResponse, Response},
        routing::{delete, get, post, put},
    },
    tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer},
    tracing::info,
};

use relay_webhooks::FsArchive;

use crate::{auth, health_routes, state::AppState, tools_routes, webhook_routes, ws};

/// The MCP front door: `/ws` plus health and metrics.
pub fn ws_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws", get(ws_upgrade))
        .route("/health", get(health_routes::health))
        .route("/metrics", get(health_routes::metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// The webhook + management front door.
pub fn http_router(state: Arc<AppState>) -> Router {
    let max_body = state.config.webhooks.max_payload_bytes;
    Router::new()
        .route("/api/webhooks/{provider}", post(webhook_routes::receive_webhook))
        .route(
            "/api/v1/organizations/{org}/tools",
            post(tools_routes::register_tool).get(tools_routes::list_tools),
        )
        .route(
            "/api/v1/organizations/{org}/tools/{id}/credentials",
            put(tools_routes::rotate_credentials),
        )
        .route(
            "/api/v1/organizations/{org}/tools/{id}",
            delete(tools_routes::delete_tool),
        )
        .route("/health", get(health_routes::health))
        .route("/metrics", get(health_routes::metrics))
        .layer(RequestBodyLimitLayer::new(max_body * 2))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(serde::Deserialize)]
struct WsQuery {
    #[serde(default)]
    api_key: Option<String>,
}

async fn ws_upgrade(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<WsQuery>,
    upgrade: WebSocketUpgrade,
) -> Response {
    let query_string = query.api_key.map(|key| format!("api_key={key}"));
    let Some(tenant) =
        auth::authenticate(&state.credentials, &headers, query_string.as_deref()).await
    else {
        return StatusCode::UNAUTHORIZED.into_response();
    };

    upgrade.on_upgrade(move |socket| ws::handle_connection(socket, state, tenant))
}

/// Run both listeners until the shutdown token fires, then drain.
pub async fn run(state: Arc<AppState>) -> anyhow::Result<()> {
    let archive = Arc::new(FsArchive::new(state.config.webhooks.archive_dir.clone()));
    state.spawn_maintainers(archive);

    // Start consumers for tenants that already have tools registered; new
    // tenants join on their first webhook or registration.
    match state.org_tools.tenants().await {
        Ok(tenants) => {
            for tenant in tenants {
                state.ensure_consumers(tenant);
            }
        },
        Err(e) => tracing::warn!(error = %e, "tenant bootstrap listing failed"),
    }

    let bind = state.config.gateway.bind.clone();
    let ws_addr = format!("{bind}:{}", state.config.gateway.ws_port);
    let http_addr = format!("{bind}:{}", state.config.gateway.webhook_port);

    let ws_listener = tokio::net::TcpListener::bind(&ws_addr).await?;
    let http_listener = tokio::net::TcpListener::bind(&http_addr).await?;
    info!(ws = %ws_addr, http = %http_addr, "relay listening");

    let shutdown = state.shutdown.clone();
    let ws_server = axum::serve(ws_listener, ws_router(Arc::clone(&state)))
        .with_graceful_shutdown({
            let shutdown = shutdown.clone();
            async move { shutdown.cancelled().await }
        });
    let http_server = axum::serve(http_listener, http_router(Arc::clone(&state)))
        .with_graceful_shutdown({
            let shutdown = shutdown.clone();
            async move { shutdown.cancelled().await }
        });

    let (ws_result, http_result) = tokio::join!(ws_server, http_server);
    ws_result?;
    http_result?;

    info!("listeners stopped; draining");
    Ok(())
}
