//! The MCP method dispatcher.
//!
//! One inbound frame comes in, the protocol state machine is consulted, and
//! either a response goes back through the session's write channel or (for
//! long-running calls) a task is spawned that will send it later. The read
//! loop never blocks on a provider.

use std::{sync::Arc, time::Duration};

use {secrecy::SecretString, tracing::{debug, warn}};

use {
    relay_common::{SessionId, TenantId},
    relay_metrics::{counter, histogram, labels, names},
    relay_protocol::{
        CancelParams, InboundFrame, InitializeParams, InitializeResult, JsonRpcError,
        JsonRpcResponse, McpToolDef, PROTOCOL_VERSION, PromptDef, PromptsListResult, ResourceDef,
        ResourcesListResult, ResourcesReadParams, ResourcesReadResult, ResourceContents,
        ServerCapabilities, ServerInfo, SetLevelParams, ToolsCallParams, ToolsListResult,
        error_codes, methods,
    },
    relay_sessions::SessionPhase,
    relay_tools::{OrgToolAdapter, OrgToolStatus, ToolError},
};

use crate::state::AppState;

/// Per-call deadline for outbound tool execution.
const TOOL_CALL_DEADLINE: Duration = Duration::from_secs(30);

/// What the read loop should do after a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AfterDispatch {
    Continue,
    /// Send nothing further and close the connection.
    Close,
}

/// Handle one text frame from the client.
pub async fn handle_frame(
    state: &Arc<AppState>,
    session_id: SessionId,
    raw: &str,
) -> AfterDispatch {
    let frame: InboundFrame = match serde_json::from_str(raw) {
        Ok(frame) => frame,
        Err(e) => {
            debug!(session_id = %session_id, error = %e, "unparsable frame");
            send_response(
                state,
                session_id,
                JsonRpcResponse::err(
                    serde_json::Value::Null,
                    JsonRpcError::new(error_codes::PARSE_ERROR, "parse error"),
                ),
            )
            .await;
            return AfterDispatch::Continue;
        },
    };

    let Some((phase, tenant)) = state
        .sessions
        .with_session(session_id, |session| {
            session.touch();
            (session.phase, session.tenant_id)
        })
        .await
    else {
        return AfterDispatch::Close;
    };

    counter!(
        names::REQUESTS_TOTAL,
        labels::TENANT => tenant.to_string(),
        labels::COMPONENT => "gateway",
        labels::METHOD => frame.method.clone(),
    )
    .increment(1);

    match frame.method.as_str() {
        methods::INITIALIZE => initialize(state, session_id, frame, phase).await,
        methods::INITIALIZED => {
            if phase == SessionPhase::Initializing {
                state
                    .sessions
                    .with_session(session_id, |session| {
                        session.phase = SessionPhase::Initialized;
                    })
                    .await;
                debug!(session_id = %session_id, "session initialized");
            }
            AfterDispatch::Continue
        },
        methods::PING => {
            if let Some(id) = frame.id {
                send_response(
                    state,
                    session_id,
                    JsonRpcResponse::ok(id, serde_json::json!({})),
                )
                .await;
            }
            AfterDispatch::Continue
        },
        _ if phase != SessionPhase::Initialized => {
            // Everything else needs a completed handshake.
            if let Some(id) = frame.id {
                send_response(
                    state,
                    session_id,
                    JsonRpcResponse::err(
                        id,
                        JsonRpcError::new(
                            error_codes::INVALID_REQUEST,
                            "session not initialized",
                        ),
                    ),
                )
                .await;
            }
            AfterDispatch::Continue
        },
        methods::CANCEL_REQUEST => cancel_request(state, session_id, frame).await,
        methods::SHUTDOWN => shutdown(state, session_id, frame).await,
        methods::TOOLS_LIST => tools_list(state, session_id, tenant, frame).await,
        methods::TOOLS_CALL => tools_call(state, session_id, tenant, frame).await,
        methods::RESOURCES_LIST => resources_list(state, session_id, frame).await,
        methods::RESOURCES_READ => resources_read(state, session_id, tenant, frame).await,
        methods::PROMPTS_LIST => prompts_list(state, session_id, frame).await,
        methods::LOGGING_SET_LEVEL => set_level(state, session_id, frame).await,
        unknown => {
            if let Some(id) = frame.id {
                send_response(
                    state,
                    session_id,
                    JsonRpcResponse::err(
                        id,
                        JsonRpcError::new(
                            error_codes::METHOD_NOT_FOUND,
                            format!("method not found: {unknown}"),
                        ),
                    ),
                )
                .await;
            }
            AfterDispatch::Continue
        },
    }
}

// ── Handshake ───────────────────────────────────────────────────────────────

async fn initialize(
    state: &Arc<AppState>,
    session_id: SessionId,
    frame: InboundFrame,
    phase: SessionPhase,
) -> AfterDispatch {
    let Some(id) = frame.id else {
        return AfterDispatch::Continue;
    };

    if phase != SessionPhase::Connected {
        send_response(
            state,
            session_id,
            JsonRpcResponse::err(
                id,
                JsonRpcError::new(error_codes::INVALID_REQUEST, "already initialized"),
            ),
        )
        .await;
        return AfterDispatch::Continue;
    }

    let params: InitializeParams = match frame
        .params
        .map(serde_json::from_value)
        .transpose()
    {
        Ok(Some(params)) => params,
        _ => {
            send_response(
                state,
                session_id,
                JsonRpcResponse::err(
                    id,
                    JsonRpcError::new(error_codes::INVALID_PARAMS, "invalid initialize params"),
                ),
            )
            .await;
            return AfterDispatch::Continue;
        },
    };

    // Exact-match negotiation. A mismatch is answered, then the connection
    // closes.
    if params.protocol_version != PROTOCOL_VERSION {
        warn!(
            session_id = %session_id,
            requested = %params.protocol_version,
            "unsupported protocol version"
        );
        send_response(
            state,
            session_id,
            JsonRpcResponse::err(
                id,
                JsonRpcError::new(
                    error_codes::INVALID_REQUEST,
                    format!(
                        "unsupported protocol version: {} (server speaks {PROTOCOL_VERSION})",
                        params.protocol_version
                    ),
                ),
            ),
        )
        .await;
        return AfterDispatch::Close;
    }

    state
        .sessions
        .with_session(session_id, |session| {
            session.phase = SessionPhase::Initializing;
            session.protocol_version = Some(params.protocol_version.clone());
            session.client_info = Some(params.client_info.clone());
            session.client_capabilities = Some(params.capabilities.clone());
        })
        .await;

    let result = InitializeResult {
        protocol_version: PROTOCOL_VERSION.to_string(),
        capabilities: ServerCapabilities::default(),
        server_info: ServerInfo {
            name: "relay".into(),
            version: env!("CARGO_PKG_VERSION").into(),
        },
    };
    send_response(
        state,
        session_id,
        JsonRpcResponse::ok(id, serde_json::json!(result)),
    )
    .await;
    AfterDispatch::Continue
}

async fn shutdown(state: &Arc<AppState>, session_id: SessionId, frame: InboundFrame) -> AfterDispatch {
    state
        .sessions
        .with_session(session_id, |session| {
            session.phase = SessionPhase::ShuttingDown;
        })
        .await;

    if let Some(id) = frame.id {
        send_response(
            state,
            session_id,
            JsonRpcResponse::ok(id, serde_json::json!({})),
        )
        .await;
    }

    // Drain: give in-flight requests a grace period, then cancel stragglers.
    let deadline =
        tokio::time::Instant::now() + Duration::from_millis(relay_protocol::SHUTDOWN_DRAIN_MS);
    loop {
        let pending = state
            .sessions
            .with_session(session_id, |session| session.pending_count())
            .await
            .unwrap_or(0);
        if pending == 0 || tokio::time::Instant::now() >= deadline {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    state
        .sessions
        .with_session(session_id, |session| session.cancel_all())
        .await;
    AfterDispatch::Close
}

async fn cancel_request(
    state: &Arc<AppState>,
    session_id: SessionId,
    frame: InboundFrame,
) -> AfterDispatch {
    let target = frame
        .params
        .and_then(|params| serde_json::from_value::<CancelParams>(params).ok());
    if let Some(target) = target {
        let signalled = state
            .sessions
            .with_session(session_id, |session| session.cancel_request(&target.id))
            .await
            .unwrap_or(false);
        debug!(session_id = %session_id, signalled, "cancel request");
    }
    // Sent as a request (unusual but legal): acknowledge.
    if let Some(id) = frame.id {
        send_response(
            state,
            session_id,
            JsonRpcResponse::ok(id, serde_json::json!({})),
        )
        .await;
    }
    AfterDispatch::Continue
}

// ── Tools ───────────────────────────────────────────────────────────────────

async fn tools_list(
    state: &Arc<AppState>,
    session_id: SessionId,
    tenant: TenantId,
    frame: InboundFrame,
) -> AfterDispatch {
    let Some(id) = frame.id else {
        return AfterDispatch::Continue;
    };

    let started = std::time::Instant::now();
    let mut tools: Vec<McpToolDef> = Vec::new();
    for (adapter, _credential) in adapters_for_tenant(state, tenant).await {
        tools.extend(adapter.expand());
    }
    tools.sort_by(|a, b| a.name.cmp(&b.name));

    histogram!(
        names::REQUEST_DURATION_SECONDS,
        labels::TENANT => tenant.to_string(),
        labels::COMPONENT => "gateway",
        labels::METHOD => "tools/list",
    )
    .record(started.elapsed().as_secs_f64());

    send_response(
        state,
        session_id,
        JsonRpcResponse::ok(id, serde_json::json!(ToolsListResult { tools })),
    )
    .await;
    AfterDispatch::Continue
}

async fn tools_call(
    state: &Arc<AppState>,
    session_id: SessionId,
    tenant: TenantId,
    frame: InboundFrame,
) -> AfterDispatch {
    let Some(id) = frame.id else {
        return AfterDispatch::Continue;
    };

    let params: ToolsCallParams = match frame.params.map(serde_json::from_value).transpose() {
        Ok(Some(params)) => params,
        _ => {
            send_response(
                state,
                session_id,
                JsonRpcResponse::err(
                    id,
                    JsonRpcError::new(error_codes::INVALID_PARAMS, "invalid tools/call params"),
                ),
            )
            .await;
            return AfterDispatch::Continue;
        },
    };

    // Register the cancel handle before spawning so a fast `$/cancelRequest`
    // cannot race past it.
    let Some(cancel) = state
        .sessions
        .with_session(session_id, |session| session.register_request(&id))
        .await
    else {
        return AfterDispatch::Close;
    };

    let state = Arc::clone(state);
    tokio::spawn(async move {
        let started = std::time::Instant::now();
        let response = execute_tool_call(&state, tenant, &params, cancel).await;
        let response = match response {
            Ok(result) => JsonRpcResponse::ok(id.clone(), serde_json::json!(result)),
            Err(error) => JsonRpcResponse::err(id.clone(), tool_error_to_rpc(error)),
        };

        histogram!(
            names::REQUEST_DURATION_SECONDS,
            labels::TENANT => tenant.to_string(),
            labels::COMPONENT => "gateway",
            labels::METHOD => "tools/call",
        )
        .record(started.elapsed().as_secs_f64());

        state
            .sessions
            .with_session(session_id, |session| session.complete_request(&id))
            .await;
        send_response(&state, session_id, response).await;
    });
    AfterDispatch::Continue
}

async fn execute_tool_call(
    state: &Arc<AppState>,
    tenant: TenantId,
    params: &ToolsCallParams,
    cancel: tokio_util::sync::CancellationToken,
) -> Result<relay_protocol::ToolsCallResult, ToolError> {
    for (adapter, credential) in adapters_for_tenant(state, tenant).await {
        if !adapter.resolves(&params.name) {
            continue;
        }
        return adapter
            .execute(
                &params.name,
                &params.arguments,
                &credential,
                TOOL_CALL_DEADLINE,
                cancel,
            )
            .await;
    }
    Err(ToolError::UnknownTool(params.name.clone()))
}

/// Build ready-to-execute adapters for every active tool of a tenant.
///
/// Wiring failures (missing credential, unreachable spec with no fallback)
/// skip the tool rather than failing the whole listing.
async fn adapters_for_tenant(
    state: &Arc<AppState>,
    tenant: TenantId,
) -> Vec<(OrgToolAdapter, SecretString)> {
    let records = match state.org_tools.list(tenant).await {
        Ok(records) => records,
        Err(e) => {
            warn!(tenant_id = %tenant, error = %e, "org tool listing failed");
            return Vec::new();
        },
    };

    let mut adapters = Vec::new();
    for record in records {
        if record.status != OrgToolStatus::Active {
            continue;
        }
        let provider = match state.providers.get(&record.provider_name) {
            Ok(provider) => provider,
            Err(e) => {
                warn!(tool = %record.id, error = %e, "unknown provider for tool");
                continue;
            },
        };
        let spec = match state.specs.get(&provider.name, &provider.spec_url).await {
            Ok(spec) => spec,
            Err(e) => {
                warn!(tool = %record.id, error = %e, "spec unavailable for tool");
                continue;
            },
        };
        let credential_record = match state
            .credentials
            .get_credential(tenant, record.credential_ref)
            .await
        {
            Ok(record) => record,
            Err(e) => {
                warn!(tool = %record.id, error = %e, "credential missing for tool");
                continue;
            },
        };
        let credential = match state.credentials.decrypt_credential(&credential_record) {
            Ok(credential) => credential,
            Err(e) => {
                warn!(tool = %record.id, error = %e, "credential decrypt failed");
                continue;
            },
        };
        let fingerprint = relay_vault::credential_fingerprint(&credential_record);

        let permissions = match state
            .discoverer
            .discover(record.id, &fingerprint, &credential, &provider, &spec)
            .await
        {
            Ok(permissions) => permissions,
            Err(e) => {
                warn!(tool = %record.id, error = %e, "permission discovery failed closed");
                continue;
            },
        };

        // Refresh-ahead: when the cached entry is near expiry, re-probe in
        // the background so the next caller never waits on discovery.
        if state.discoverer.needs_refresh(record.id, &fingerprint) {
            let discoverer = Arc::clone(&state.discoverer);
            let tool_id = record.id;
            let fingerprint = fingerprint.clone();
            let credential = credential.clone();
            let provider = Arc::clone(&provider);
            let spec = Arc::clone(&spec);
            tokio::spawn(async move {
                let _ = discoverer
                    .discover(tool_id, &fingerprint, &credential, &provider, &spec)
                    .await;
            });
        }

        adapters.push((
            OrgToolAdapter::new(
                record,
                provider,
                permissions,
                Arc::clone(&state.executor),
                Arc::clone(&state.guards),
                Arc::clone(&state.audit),
            ),
            credential,
        ));
    }
    adapters
}

fn tool_error_to_rpc(error: ToolError) -> JsonRpcError {
    match error {
        ToolError::UnknownTool(name) => JsonRpcError::new(
            error_codes::METHOD_NOT_FOUND,
            format!("unknown tool: {name}"),
        ),
        ToolError::InvalidArgs(message) => {
            JsonRpcError::new(error_codes::INVALID_PARAMS, message)
        },
        ToolError::Cancelled => {
            JsonRpcError::new(error_codes::REQUEST_CANCELLED, "request cancelled")
        },
        ToolError::Backpressure(ref e) => {
            let retry_after_ms = e.retry_after().map(|d| d.as_millis() as u64);
            let class = error.class();
            JsonRpcError::new(error_codes::INTERNAL_ERROR, error.to_string()).with_data(
                serde_json::json!({
                    "class": class,
                    "retryable": class.retryable(),
                    "retryAfterMs": retry_after_ms,
                }),
            )
        },
        ToolError::Provider(ref e) => {
            let class = error.class();
            let status = e.status();
            JsonRpcError::new(error_codes::INTERNAL_ERROR, error.to_string()).with_data(
                serde_json::json!({
                    "class": class,
                    "status": status,
                    "retryable": class.retryable(),
                }),
            )
        },
    }
}

// ── Resources / prompts / logging ───────────────────────────────────────────

const RESOURCE_TASKS: &str = "relay://tasks";
const RESOURCE_TOOLS: &str = "relay://tools";
const RESOURCE_AUDIT: &str = "relay://audit";

async fn resources_list(
    state: &Arc<AppState>,
    session_id: SessionId,
    frame: InboundFrame,
) -> AfterDispatch {
    let Some(id) = frame.id else {
        return AfterDispatch::Continue;
    };
    let resources = vec![
        ResourceDef {
            uri: RESOURCE_TASKS.into(),
            name: "Assignable tasks".into(),
            description: Some("Tasks waiting for an agent, in dequeue order".into()),
            mime_type: Some("application/json".into()),
        },
        ResourceDef {
            uri: RESOURCE_TOOLS.into(),
            name: "Organization tools".into(),
            description: Some("Registered provider instances for this tenant".into()),
            mime_type: Some("application/json".into()),
        },
        ResourceDef {
            uri: RESOURCE_AUDIT.into(),
            name: "Audit log".into(),
            description: Some("Recent audit entries for this tenant".into()),
            mime_type: Some("application/json".into()),
        },
    ];
    send_response(
        state,
        session_id,
        JsonRpcResponse::ok(id, serde_json::json!(ResourcesListResult { resources })),
    )
    .await;
    AfterDispatch::Continue
}

async fn resources_read(
    state: &Arc<AppState>,
    session_id: SessionId,
    tenant: TenantId,
    frame: InboundFrame,
) -> AfterDispatch {
    let Some(id) = frame.id else {
        return AfterDispatch::Continue;
    };
    let params: Option<ResourcesReadParams> = frame
        .params
        .and_then(|params| serde_json::from_value(params).ok());
    let Some(params) = params else {
        send_response(
            state,
            session_id,
            JsonRpcResponse::err(
                id,
                JsonRpcError::new(error_codes::INVALID_PARAMS, "missing uri"),
            ),
        )
        .await;
        return AfterDispatch::Continue;
    };

    let body = match params.uri.as_str() {
        RESOURCE_TASKS => state
            .tasks
            .pending_tasks(tenant, 50)
            .await
            .ok()
            .and_then(|tasks| serde_json::to_string_pretty(&tasks).ok()),
        RESOURCE_TOOLS => state
            .org_tools
            .list(tenant)
            .await
            .ok()
            .and_then(|tools| serde_json::to_string_pretty(&tools).ok()),
        RESOURCE_AUDIT => state
            .audit
            .recent(tenant, 50)
            .await
            .ok()
            .and_then(|rows| serde_json::to_string_pretty(&rows).ok()),
        _ => None,
    };

    let response = match body {
        Some(text) => JsonRpcResponse::ok(
            id,
            serde_json::json!(ResourcesReadResult {
                contents: vec![ResourceContents {
                    uri: params.uri,
                    mime_type: Some("application/json".into()),
                    text,
                }],
            }),
        ),
        None => JsonRpcResponse::err(
            id,
            JsonRpcError::new(
                error_codes::INVALID_PARAMS,
                format!("unknown resource uri: {}", params.uri),
            ),
        ),
    };
    send_response(state, session_id, response).await;
    AfterDispatch::Continue
}

async fn prompts_list(
    state: &Arc<AppState>,
    session_id: SessionId,
    frame: InboundFrame,
) -> AfterDispatch {
    let Some(id) = frame.id else {
        return AfterDispatch::Continue;
    };
    let prompts = vec![PromptDef {
        name: "task-briefing".into(),
        description: Some("Summarize an assigned task and its context".into()),
    }];
    send_response(
        state,
        session_id,
        JsonRpcResponse::ok(id, serde_json::json!(PromptsListResult { prompts })),
    )
    .await;
    AfterDispatch::Continue
}

async fn set_level(
    state: &Arc<AppState>,
    session_id: SessionId,
    frame: InboundFrame,
) -> AfterDispatch {
    let params: Option<SetLevelParams> = frame
        .params
        .and_then(|params| serde_json::from_value(params).ok());
    if let Some(params) = params {
        state
            .sessions
            .with_session(session_id, |session| {
                session.log_level = params.level;
            })
            .await;
    }
    if let Some(id) = frame.id {
        send_response(
            state,
            session_id,
            JsonRpcResponse::ok(id, serde_json::json!({})),
        )
        .await;
    }
    AfterDispatch::Continue
}

// ── Plumbing ────────────────────────────────────────────────────────────────

pub(crate) async fn send_response(
    state: &Arc<AppState>,
    session_id: SessionId,
    response: JsonRpcResponse,
) {
    let Ok(frame) = serde_json::to_string(&response) else {
        return;
    };
    let sender = state
        .sessions
        .with_session(session_id, |session| session.sender.clone())
        .await;
    if let Some(sender) = sender
        && sender.send(frame).await.is_err()
    {
        debug!(session_id = %session_id, "response dropped: write loop gone");
    }
}
