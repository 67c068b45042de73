//! Organization-tool management HTTP surface.
//!
//! All routes authenticate with the same API keys as the WebSocket and are
//! tenant-checked against the `{org}` path segment: a valid key for tenant A
//! can never touch tenant B's tools.

use std::sync::Arc;

use {
    axum::{
        extract::{Path, State},
        http::{HeaderMap, StatusCode},
        response::{IntoResponse, Json, Response},
    },
    secrecy::SecretString,
    serde::Deserialize,
};

use {
    relay_common::{AuditEvent, AuditRecord, TenantId, ToolId},
    relay_protocol::{JsonRpcNotification, methods},
    relay_tools::{OrgToolError, OrgToolRecord, OrgToolStatus},
    relay_vault::CredentialType,
};

use crate::{auth::authenticate, state::AppState};

/// Tell every initialized session of the tenant that its tool surface moved.
async fn notify_tools_changed(state: &AppState, tenant: TenantId) {
    let notification = JsonRpcNotification::new(methods::TOOLS_LIST_CHANGED, None);
    if let Ok(frame) = serde_json::to_string(&notification) {
        state.sessions.notify_tenant(tenant, &frame).await;
    }
}

#[derive(Debug, Deserialize)]
pub struct RegisterToolBody {
    pub provider_name: String,
    pub instance_name: String,
    pub credential_type: CredentialType,
    pub credential: String,
    /// HMAC secret for this tenant's deliveries from the provider.
    #[serde(default)]
    pub webhook_secret: Option<String>,
    #[serde(default)]
    pub config_overrides: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct RotateCredentialBody {
    pub credential: String,
    #[serde(default)]
    pub credential_type: Option<CredentialType>,
}

/// Resolve and authorize the caller against the path tenant.
async fn caller_tenant(
    state: &AppState,
    headers: &HeaderMap,
    org: &str,
) -> Result<TenantId, Response> {
    let Ok(path_tenant) = org.parse::<TenantId>() else {
        return Err(StatusCode::NOT_FOUND.into_response());
    };
    let Some(caller) = authenticate(&state.credentials, headers, None).await else {
        return Err(StatusCode::UNAUTHORIZED.into_response());
    };
    if caller != path_tenant {
        // Cross-tenant probing gets the same answer as a missing org.
        return Err(StatusCode::NOT_FOUND.into_response());
    }
    Ok(path_tenant)
}

pub async fn register_tool(
    State(state): State<Arc<AppState>>,
    Path(org): Path<String>,
    headers: HeaderMap,
    Json(body): Json<RegisterToolBody>,
) -> Response {
    let tenant = match caller_tenant(&state, &headers, &org).await {
        Ok(tenant) => tenant,
        Err(response) => return response,
    };

    if !state.providers.contains(&body.provider_name) {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(serde_json::json!({"error": "unknown provider"})),
        )
            .into_response();
    }

    let credential_ref = match state
        .credentials
        .upsert_credential(
            tenant,
            &body.provider_name,
            &body.instance_name,
            body.credential_type,
            &SecretString::new(body.credential),
            None,
        )
        .await
    {
        Ok(id) => id,
        Err(e) => {
            tracing::error!(tenant_id = %tenant, error = %e, "credential store failed");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        },
    };

    if let Some(webhook_secret) = body.webhook_secret
        && let Err(e) = state
            .credentials
            .set_webhook_secret(
                tenant,
                &body.provider_name,
                &SecretString::new(webhook_secret),
            )
            .await
    {
        tracing::error!(tenant_id = %tenant, error = %e, "webhook secret store failed");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    let record = OrgToolRecord {
        id: ToolId::new(),
        tenant_id: tenant,
        provider_name: body.provider_name.clone(),
        instance_name: body.instance_name.clone(),
        credential_ref,
        config_overrides: body.config_overrides,
        status: OrgToolStatus::Active,
        feature_flags: serde_json::json!({}),
    };
    match state.org_tools.insert(&record).await {
        Ok(()) => {},
        Err(OrgToolError::DuplicateInstance) => {
            return (
                StatusCode::CONFLICT,
                Json(serde_json::json!({"error": "instance name already in use"})),
            )
                .into_response();
        },
        Err(e) => {
            tracing::error!(tenant_id = %tenant, error = %e, "org tool insert failed");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        },
    }

    state
        .audit
        .record(AuditRecord::new(tenant, AuditEvent::CredentialMutation {
            provider: body.provider_name,
            credential_name: body.instance_name,
            action: "created".into(),
        }))
        .await;
    state.ensure_consumers(tenant);
    notify_tools_changed(&state, tenant).await;

    (StatusCode::CREATED, Json(serde_json::json!(record))).into_response()
}

pub async fn list_tools(
    State(state): State<Arc<AppState>>,
    Path(org): Path<String>,
    headers: HeaderMap,
) -> Response {
    let tenant = match caller_tenant(&state, &headers, &org).await {
        Ok(tenant) => tenant,
        Err(response) => return response,
    };
    match state.org_tools.list(tenant).await {
        Ok(tools) => Json(serde_json::json!({"tools": tools})).into_response(),
        Err(e) => {
            tracing::error!(tenant_id = %tenant, error = %e, "org tool list failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        },
    }
}

pub async fn rotate_credentials(
    State(state): State<Arc<AppState>>,
    Path((org, tool_id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(body): Json<RotateCredentialBody>,
) -> Response {
    let tenant = match caller_tenant(&state, &headers, &org).await {
        Ok(tenant) => tenant,
        Err(response) => return response,
    };
    let Ok(tool_id) = tool_id.parse::<ToolId>() else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let record = match state.org_tools.get(tenant, tool_id).await {
        Ok(record) => record,
        Err(OrgToolError::NotFound) => return StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            tracing::error!(error = %e, "org tool lookup failed");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        },
    };

    let credential_type = body.credential_type.unwrap_or(CredentialType::ApiKey);
    let result = state
        .credentials
        .upsert_credential(
            tenant,
            &record.provider_name,
            &record.instance_name,
            credential_type,
            &SecretString::new(body.credential),
            None,
        )
        .await;
    let credential_ref = match result {
        Ok(id) => id,
        Err(e) => {
            tracing::error!(tenant_id = %tenant, error = %e, "credential rotation failed");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        },
    };
    if let Err(e) = state
        .org_tools
        .set_credential_ref(tenant, tool_id, credential_ref)
        .await
    {
        tracing::error!(error = %e, "credential ref update failed");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    // Cached permissions belong to the old credential generation.
    state.discoverer.invalidate_tool(tool_id);

    state
        .audit
        .record(AuditRecord::new(tenant, AuditEvent::CredentialMutation {
            provider: record.provider_name,
            credential_name: record.instance_name,
            action: "rotated".into(),
        }))
        .await;
    notify_tools_changed(&state, tenant).await;

    Json(serde_json::json!({"rotated": true})).into_response()
}

pub async fn delete_tool(
    State(state): State<Arc<AppState>>,
    Path((org, tool_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    let tenant = match caller_tenant(&state, &headers, &org).await {
        Ok(tenant) => tenant,
        Err(response) => return response,
    };
    let Ok(tool_id) = tool_id.parse::<ToolId>() else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let record = match state.org_tools.get(tenant, tool_id).await {
        Ok(record) => record,
        Err(OrgToolError::NotFound) => return StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            tracing::error!(error = %e, "org tool lookup failed");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        },
    };

    let credential_ref = match state.org_tools.delete(tenant, tool_id).await {
        Ok(credential_ref) => credential_ref,
        Err(OrgToolError::NotFound) => return StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            tracing::error!(error = %e, "org tool delete failed");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        },
    };

    // Tool deletion destroys its credential.
    if let Err(e) = state.credentials.delete_credential(tenant, credential_ref).await {
        tracing::warn!(error = %e, "credential already gone during tool delete");
    }
    state.discoverer.invalidate_tool(tool_id);

    state
        .audit
        .record(AuditRecord::new(tenant, AuditEvent::CredentialMutation {
            provider: record.provider_name,
            credential_name: record.instance_name,
            action: "destroyed".into(),
        }))
        .await;
    notify_tools_changed(&state, tenant).await;

    StatusCode::NO_CONTENT.into_response()
}
