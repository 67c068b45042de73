//! Webhook ingestion HTTP surface: `POST /api/webhooks/{provider}`.

use std::sync::Arc;

use {
    axum::{
        extract::{Path, State},
        http::{HeaderMap, StatusCode},
        response::{IntoResponse, Json, Response},
    },
    bytes::Bytes,
    tracing::debug,
};

use {
    relay_common::{AuditEvent, AuditRecord, TenantId},
    relay_webhooks::{IngressOutcome, WebhookError},
};

use crate::state::AppState;

/// Header the delivery pipeline uses to route a payload to its tenant.
const TENANT_HEADER: &str = "x-relay-tenant";

/// Signature headers, in precedence order (provider-native first).
const SIGNATURE_HEADERS: &[&str] = &["x-hub-signature-256", "x-relay-signature"];

/// Delivery-id headers, in precedence order.
const DELIVERY_HEADERS: &[&str] = &[
    "x-github-delivery",
    "x-gitlab-event-uuid",
    "x-relay-delivery",
];

/// Event-type headers, in precedence order.
const EVENT_HEADERS: &[&str] = &["x-github-event", "x-gitlab-event", "x-relay-event"];

fn first_header<'a>(headers: &'a HeaderMap, names: &[&str]) -> Option<&'a str> {
    names
        .iter()
        .find_map(|name| headers.get(*name).and_then(|v| v.to_str().ok()))
}

pub async fn receive_webhook(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if !state.providers.contains(&provider) {
        return (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": "unknown provider"})),
        )
            .into_response();
    }

    // Tenant resolution failures are answered like signature failures: an
    // unauthenticated caller learns nothing about which part was wrong.
    let Some(tenant) = first_header(&headers, &[TENANT_HEADER])
        .and_then(|v| v.parse::<TenantId>().ok())
    else {
        return unauthorized();
    };

    let secret = match state.credentials.webhook_secret(tenant, &provider).await {
        Ok(secret) => secret,
        Err(_) => return unauthorized(),
    };

    let signature = first_header(&headers, SIGNATURE_HEADERS);
    let event_type = first_header(&headers, EVENT_HEADERS).unwrap_or("unknown");
    let delivery_id = match first_header(&headers, DELIVERY_HEADERS) {
        Some(id) => id.to_string(),
        None => {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({"error": "missing delivery id header"})),
            )
                .into_response();
        },
    };

    match state
        .ingress
        .handle(
            tenant,
            &provider,
            event_type,
            &delivery_id,
            signature,
            &secret,
            &body,
        )
        .await
    {
        Ok(IngressOutcome::Accepted { entry_id }) => {
            debug!(tenant_id = %tenant, provider, entry_id, "delivery accepted");
            state
                .audit
                .record(AuditRecord::new(tenant, AuditEvent::WebhookAccepted {
                    provider: provider.clone(),
                    event_type: event_type.to_string(),
                    delivery_id,
                }))
                .await;
            state.ensure_consumers(tenant);
            (StatusCode::OK, Json(serde_json::json!({"accepted": true}))).into_response()
        },
        Ok(IngressOutcome::Deduplicated) => (
            StatusCode::OK,
            Json(serde_json::json!({"deduplicated": true})),
        )
            .into_response(),
        Err(WebhookError::BadSignature | WebhookError::NoSecret) => unauthorized(),
        Err(WebhookError::Backpressure) => (
            StatusCode::TOO_MANY_REQUESTS,
            Json(serde_json::json!({"error": "tenant over capacity, slow down"})),
        )
            .into_response(),
        Err(WebhookError::PayloadTooLarge { size, limit }) => (
            StatusCode::PAYLOAD_TOO_LARGE,
            Json(serde_json::json!({"error": "payload too large", "size": size, "limit": limit})),
        )
            .into_response(),
        Err(WebhookError::Queue(e)) => {
            tracing::error!(tenant_id = %tenant, error = %e, "enqueue failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({"error": "queue unavailable"})),
            )
                .into_response()
        },
    }
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({"error": "signature verification failed"})),
    )
        .into_response()
}
