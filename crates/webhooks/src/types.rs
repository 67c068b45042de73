//! Webhook event model.

use {
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
    sha2::{Digest, Sha256},
};

use relay_common::{EventId, TenantId};

/// A verified inbound delivery, as enqueued for the worker fleet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub event_id: EventId,
    pub tenant_id: TenantId,
    pub provider: String,
    pub event_type: String,
    pub delivery_id: String,
    #[serde(with = "payload_b64")]
    pub payload: Vec<u8>,
    pub received_at: DateTime<Utc>,
    /// `sha256(tenant ∥ provider ∥ event_type ∥ payload)`, hex.
    pub fingerprint: String,
}

impl WebhookEvent {
    #[must_use]
    pub fn new(
        tenant_id: TenantId,
        provider: &str,
        event_type: &str,
        delivery_id: &str,
        payload: Vec<u8>,
    ) -> Self {
        let fingerprint = fingerprint(tenant_id, provider, event_type, &payload);
        Self {
            event_id: EventId::new(),
            tenant_id,
            provider: provider.to_string(),
            event_type: event_type.to_string(),
            delivery_id: delivery_id.to_string(),
            payload,
            received_at: Utc::now(),
            fingerprint,
        }
    }
}

/// Deterministic duplicate identity for an event.
#[must_use]
pub fn fingerprint(tenant_id: TenantId, provider: &str, event_type: &str, payload: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(tenant_id.as_uuid().as_bytes());
    hasher.update(provider.as_bytes());
    hasher.update(event_type.as_bytes());
    hasher.update(payload);
    hex::encode(hasher.finalize())
}

mod payload_b64 {
    use {
        base64::Engine,
        serde::{Deserialize, Deserializer, Serializer},
    };

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        base64::engine::general_purpose::STANDARD
            .decode(text)
            .map_err(serde::de::Error::custom)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_deterministic_and_payload_sensitive() {
        let tenant = TenantId::new();
        let a = fingerprint(tenant, "github", "push", b"{\"ref\":1}");
        let b = fingerprint(tenant, "github", "push", b"{\"ref\":1}");
        let c = fingerprint(tenant, "github", "push", b"{\"ref\":2}");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn fingerprint_is_tenant_scoped() {
        let a = fingerprint(TenantId::new(), "github", "push", b"x");
        let b = fingerprint(TenantId::new(), "github", "push", b"x");
        assert_ne!(a, b);
    }

    #[test]
    fn event_round_trips_through_json() {
        let event = WebhookEvent::new(
            TenantId::new(),
            "github",
            "push",
            "delivery-1",
            vec![0, 1, 2, 250, 255],
        );
        let json = serde_json::to_string(&event).unwrap();
        let back: WebhookEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event, back);
    }
}
