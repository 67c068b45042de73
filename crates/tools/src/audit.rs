//! Append-only audit log.
//!
//! Records tool executions and credential mutations. Rows are never updated
//! or deleted, and plaintext credentials never reach this table.

use sqlx::SqlitePool;

use relay_common::{AuditRecord, TenantId};

/// SQLite-backed audit sink.
pub struct AuditStore {
    pool: SqlitePool,
}

impl AuditStore {
    pub async fn new(pool: SqlitePool) -> Result<Self, sqlx::Error> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS audit_log (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                tenant_id   TEXT NOT NULL,
                event       TEXT NOT NULL,
                trace_id    TEXT,
                recorded_at TEXT NOT NULL
            )",
        )
        .execute(&pool)
        .await?;
        Ok(Self { pool })
    }

    /// Append a record. Failures are logged, not propagated: the audit log
    /// never takes down the operation it describes.
    pub async fn record(&self, record: AuditRecord) {
        let event = match serde_json::to_string(&record.event) {
            Ok(event) => event,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize audit event");
                return;
            },
        };
        let result = sqlx::query(
            "INSERT INTO audit_log (tenant_id, event, trace_id, recorded_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(record.tenant_id.to_string())
        .bind(&event)
        .bind(&record.trace_id)
        .bind(record.recorded_at.to_rfc3339())
        .execute(&self.pool)
        .await;
        if let Err(e) = result {
            tracing::error!(error = %e, "failed to append audit record");
        }
    }

    /// Recent entries for a tenant, newest first.
    pub async fn recent(
        &self,
        tenant_id: TenantId,
        limit: usize,
    ) -> Result<Vec<(String, Option<String>, String)>, sqlx::Error> {
        sqlx::query_as(
            "SELECT event, trace_id, recorded_at FROM audit_log
             WHERE tenant_id = ? ORDER BY id DESC LIMIT ?",
        )
        .bind(tenant_id.to_string())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, relay_common::AuditEvent};

    #[tokio::test]
    async fn records_are_appended_and_tenant_scoped() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        let store = AuditStore::new(pool).await.unwrap();
        let tenant = TenantId::new();

        store
            .record(
                AuditRecord::new(tenant, AuditEvent::ToolExecution {
                    tool_name: "github_repos_get".into(),
                    provider: "github".into(),
                    operation_id: "repos/get".into(),
                    outcome: "ok".into(),
                })
                .with_trace("trace-1"),
            )
            .await;

        let rows = store.recent(tenant, 10).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].0.contains("repos/get"));
        assert_eq!(rows[0].1.as_deref(), Some("trace-1"));

        assert!(store.recent(TenantId::new(), 10).await.unwrap().is_empty());
    }
}
