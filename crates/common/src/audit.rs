//! Immutable audit record types.
//!
//! Audit rows are append-only and never carry plaintext credentials. The
//! sink implementation lives with the store that owns the table; this module
//! only defines the shared shape.

use {
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
};

use crate::ids::TenantId;

/// What happened, from the audit log's point of view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "event", content = "detail")]
pub enum AuditEvent {
    /// A tool operation was executed (or rejected) on behalf of a session.
    ToolExecution {
        tool_name: String,
        provider: String,
        operation_id: String,
        outcome: String,
    },
    /// A credential was created, rotated, or revoked. Never the plaintext.
    CredentialMutation {
        provider: String,
        credential_name: String,
        action: String,
    },
    /// A webhook event was accepted into the pipeline.
    WebhookAccepted {
        provider: String,
        event_type: String,
        delivery_id: String,
    },
}

/// One append-only audit row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub tenant_id: TenantId,
    pub event: AuditEvent,
    /// Correlation id threaded from the originating request, if any.
    pub trace_id: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl AuditRecord {
    #[must_use]
    pub fn new(tenant_id: TenantId, event: AuditEvent) -> Self {
        Self {
            tenant_id,
            event,
            trace_id: None,
            recorded_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_trace(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audit_event_serializes_with_tag() {
        let record = AuditRecord::new(TenantId::new(), AuditEvent::CredentialMutation {
            provider: "github".into(),
            credential_name: "ci-bot".into(),
            action: "rotated".into(),
        });
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["event"]["event"], "credential_mutation");
        assert_eq!(json["event"]["detail"]["action"], "rotated");
    }
}
