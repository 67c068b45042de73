//! Protocol-level tests against a live gateway: handshake, state machine,
//! version negotiation, cancellation plumbing.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::{Arc, OnceLock};

use {
    futures::{SinkExt, StreamExt},
    secrecy::ExposeSecret,
    tokio_tungstenite::tungstenite::Message,
};

use {
    relay_common::TenantId,
    relay_gateway::{AppState, ws_router},
    relay_metrics::{MetricsHandle, MetricsRecorderConfig, init_metrics},
    relay_vault::vault::generate_master_key,
};

fn test_metrics() -> MetricsHandle {
    static HANDLE: OnceLock<MetricsHandle> = OnceLock::new();
    HANDLE
        .get_or_init(|| {
            init_metrics(MetricsRecorderConfig {
                enabled: false,
                global_labels: Vec::new(),
            })
            .unwrap()
        })
        .clone()
}

struct TestServer {
    ws_url: String,
    state: Arc<AppState>,
    api_key: String,
    tenant: TenantId,
    _db: tempfile::NamedTempFile,
}

async fn spawn_server() -> TestServer {
    let db = tempfile::NamedTempFile::new().unwrap();
    let mut config = relay_config::RelayConfig::default();
    config.database.url = format!("sqlite:{}?mode=rwc", db.path().display());
    config.vault.master_key = Some(generate_master_key());

    let state = AppState::build(config, test_metrics()).await.unwrap();

    let tenant = TenantId::new();
    let api_key = state
        .credentials
        .create_api_key(tenant, "test")
        .await
        .unwrap()
        .expose_secret()
        .clone();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = ws_router(Arc::clone(&state));
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    TestServer {
        ws_url: format!("ws://{addr}/ws"),
        state,
        api_key,
        tenant,
        _db: db,
    }
}

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

async fn connect(server: &TestServer) -> WsStream {
    let url = format!("{}?api_key={}", server.ws_url, server.api_key);
    let (stream, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    stream
}

async fn recv_json(ws: &mut WsStream) -> serde_json::Value {
    loop {
        match ws.next().await.unwrap().unwrap() {
            Message::Text(text) => return serde_json::from_str(&text).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

async fn send_json(ws: &mut WsStream, value: serde_json::Value) {
    ws.send(Message::Text(value.to_string().into()))
        .await
        .unwrap();
}

async fn do_handshake(ws: &mut WsStream) {
    send_json(ws, serde_json::json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "initialize",
        "params": {
            "protocolVersion": "2025-06-18",
            "clientInfo": {"name": "test-agent", "version": "0.1"}
        }
    }))
    .await;
    let response = recv_json(ws).await;
    assert_eq!(response["id"], 1);
    send_json(ws, serde_json::json!({"jsonrpc": "2.0", "method": "initialized"})).await;
}

#[tokio::test]
async fn initialize_handshake_negotiates_version_and_capabilities() {
    let server = spawn_server().await;
    let mut ws = connect(&server).await;

    send_json(&mut ws, serde_json::json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "initialize",
        "params": {
            "protocolVersion": "2025-06-18",
            "clientInfo": {"name": "test-agent", "version": "0.1"}
        }
    }))
    .await;

    let response = recv_json(&mut ws).await;
    assert_eq!(response["id"], 1);
    let result = &response["result"];
    assert_eq!(result["protocolVersion"], "2025-06-18");
    assert_eq!(result["capabilities"]["tools"]["listChanged"], true);
    assert_eq!(result["capabilities"]["resources"]["subscribe"], false);
    assert_eq!(result["serverInfo"]["name"], "relay");

    // Complete the handshake; afterwards normal methods work.
    send_json(
        &mut ws,
        serde_json::json!({"jsonrpc": "2.0", "method": "initialized"}),
    )
    .await;
    send_json(
        &mut ws,
        serde_json::json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"}),
    )
    .await;
    let response = recv_json(&mut ws).await;
    assert_eq!(response["id"], 2);
    // No org tools registered: the permission-filtered list is empty.
    assert_eq!(response["result"]["tools"], serde_json::json!([]));
}

#[tokio::test]
async fn protocol_version_mismatch_is_rejected_and_closed() {
    let server = spawn_server().await;
    let mut ws = connect(&server).await;

    send_json(&mut ws, serde_json::json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "initialize",
        "params": {
            "protocolVersion": "2024-11-05",
            "clientInfo": {"name": "old-agent", "version": "0.1"}
        }
    }))
    .await;

    let response = recv_json(&mut ws).await;
    assert_eq!(response["error"]["code"], -32600);
    assert!(
        response["error"]["message"]
            .as_str()
            .unwrap()
            .contains("unsupported protocol version")
    );

    // The server closes after answering.
    loop {
        match ws.next().await {
            None => break,
            Some(Ok(Message::Close(_))) => break,
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            Some(Ok(other)) => panic!("unexpected frame after mismatch: {other:?}"),
            Some(Err(_)) => break,
        }
    }
}

#[tokio::test]
async fn requests_before_initialized_are_invalid_except_ping() {
    let server = spawn_server().await;
    let mut ws = connect(&server).await;

    // tools/list before any handshake.
    send_json(
        &mut ws,
        serde_json::json!({"jsonrpc": "2.0", "id": 5, "method": "tools/list"}),
    )
    .await;
    let response = recv_json(&mut ws).await;
    assert_eq!(response["id"], 5);
    assert_eq!(response["error"]["code"], -32600);

    // ping is allowed in any state.
    send_json(
        &mut ws,
        serde_json::json!({"jsonrpc": "2.0", "id": 6, "method": "ping"}),
    )
    .await;
    let response = recv_json(&mut ws).await;
    assert_eq!(response["id"], 6);
    assert!(response["error"].is_null());
}

#[tokio::test]
async fn unknown_method_is_method_not_found() {
    let server = spawn_server().await;
    let mut ws = connect(&server).await;
    do_handshake(&mut ws).await;

    send_json(
        &mut ws,
        serde_json::json!({"jsonrpc": "2.0", "id": 9, "method": "tools/destroy"}),
    )
    .await;
    let response = recv_json(&mut ws).await;
    assert_eq!(response["error"]["code"], -32601);
}

#[tokio::test]
async fn unparsable_frame_gets_parse_error() {
    let server = spawn_server().await;
    let mut ws = connect(&server).await;

    ws.send(Message::Text("{definitely not json".to_string().into()))
        .await
        .unwrap();
    let response = recv_json(&mut ws).await;
    assert_eq!(response["error"]["code"], -32700);
}

#[tokio::test]
async fn unauthenticated_upgrade_is_rejected() {
    let server = spawn_server().await;
    let result = tokio_tungstenite::connect_async(server.ws_url.clone()).await;
    assert!(result.is_err());

    let bad = format!("{}?api_key=rk_{}", server.ws_url, "B".repeat(43));
    assert!(tokio_tungstenite::connect_async(bad).await.is_err());
}

#[tokio::test]
async fn cancel_of_unknown_request_is_acknowledged() {
    let server = spawn_server().await;
    let mut ws = connect(&server).await;
    do_handshake(&mut ws).await;

    send_json(&mut ws, serde_json::json!({
        "jsonrpc": "2.0",
        "id": 7,
        "method": "$/cancelRequest",
        "params": {"id": 12345}
    }))
    .await;
    let response = recv_json(&mut ws).await;
    assert_eq!(response["id"], 7);
    assert!(response["error"].is_null());
}

#[tokio::test]
async fn resources_and_prompts_are_exposed_after_handshake() {
    let server = spawn_server().await;
    let mut ws = connect(&server).await;
    do_handshake(&mut ws).await;

    send_json(
        &mut ws,
        serde_json::json!({"jsonrpc": "2.0", "id": 10, "method": "resources/list"}),
    )
    .await;
    let response = recv_json(&mut ws).await;
    let resources = response["result"]["resources"].as_array().unwrap();
    assert!(
        resources
            .iter()
            .any(|r| r["uri"] == "relay://tasks")
    );

    send_json(&mut ws, serde_json::json!({
        "jsonrpc": "2.0",
        "id": 11,
        "method": "resources/read",
        "params": {"uri": "relay://tasks"}
    }))
    .await;
    let response = recv_json(&mut ws).await;
    assert_eq!(response["result"]["contents"][0]["uri"], "relay://tasks");

    send_json(&mut ws, serde_json::json!({
        "jsonrpc": "2.0",
        "id": 12,
        "method": "resources/read",
        "params": {"uri": "relay://nonsense"}
    }))
    .await;
    let response = recv_json(&mut ws).await;
    assert_eq!(response["error"]["code"], -32602);

    send_json(
        &mut ws,
        serde_json::json!({"jsonrpc": "2.0", "id": 13, "method": "prompts/list"}),
    )
    .await;
    let response = recv_json(&mut ws).await;
    assert!(response["result"]["prompts"].is_array());
}

#[tokio::test]
async fn shutdown_acknowledges_then_closes() {
    let server = spawn_server().await;
    let mut ws = connect(&server).await;
    do_handshake(&mut ws).await;

    send_json(
        &mut ws,
        serde_json::json!({"jsonrpc": "2.0", "id": 20, "method": "shutdown"}),
    )
    .await;
    let response = recv_json(&mut ws).await;
    assert_eq!(response["id"], 20);
    assert!(response["error"].is_null());

    loop {
        match ws.next().await {
            None | Some(Ok(Message::Close(_))) | Some(Err(_)) => break,
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            Some(Ok(other)) => panic!("unexpected frame after shutdown: {other:?}"),
        }
    }

    // The session is gone from the registry.
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert_eq!(server.state.sessions.count().await, 0);
    let _ = server.tenant;
}
